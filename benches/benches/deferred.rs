// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::rc::Rc;
use std::time::Duration;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use understory_deferred::{
    AsyncResultCache, Coalescing, ComputeFn, DeferredValueScheduler, EventLoop, Seq, Session,
    SessionConfig, Settle, TextRenderer, UpdateBatcher, Versioned,
};

#[derive(Clone)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        // Numerical Recipes LCG parameters.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 32) as u32
    }

    fn gen_range_u32(&mut self, upper_exclusive: u32) -> u32 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u32() % upper_exclusive
    }
}

fn random_keys(n: u32, distinct: u32, seed: u64) -> Vec<u32> {
    let mut rng = Lcg::new(seed);
    (0..n).map(|_| rng.gen_range_u32(distinct)).collect()
}

fn search(event_loop: &EventLoop) -> ComputeFn<String, String, String> {
    let timers = event_loop.clone();
    Rc::new(move |text: &String, settle: Settle<String, String>| {
        let upper = text.to_uppercase();
        timers.set_timeout(Duration::from_millis(10), move || settle.fulfill(upper));
        Ok(())
    })
}

fn bench_deferred(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_deferred");
    group.sample_size(50);

    for &(n, distinct) in &[(1_024_u32, 16_u32), (1_024_u32, 1_024_u32), (16_384_u32, 256_u32)] {
        let keys = random_keys(n, distinct, 0xDEF0_0000_0000_0001);

        group.bench_function(format!("cache_get_or_create(n={n},keys={distinct})"), |b| {
            b.iter_batched(
                AsyncResultCache::<u32, u32, ()>::new,
                |cache| {
                    for key in &keys {
                        let _ = cache.get_or_create(key, |key, settle| {
                            settle.fulfill(*key);
                            Ok(())
                        });
                    }
                    black_box(cache.len());
                },
                BatchSize::LargeInput,
            );
        });
    }

    for &(writes, interval) in &[(1_000_u32, 0_u32), (1_000_u32, 1_u32), (1_000_u32, 8_u32)] {
        group.bench_function(
            format!("scheduler_observe_and_drain(writes={writes},commit_every={interval})"),
            |b| {
                let coalescing = if interval == 0 {
                    Coalescing::LatestOnFlush
                } else {
                    Coalescing::CommitEvery(interval)
                };
                b.iter(|| {
                    let mut scheduler =
                        DeferredValueScheduler::new(Versioned::initial(0_u32), coalescing);
                    let mut commits = 0_u64;
                    for n in 1..=writes {
                        scheduler.observe(Versioned::new(n, Seq::new(u64::from(n))));
                        if n % 16 == 0 {
                            while scheduler.begin_commit().is_some() {
                                commits += 1;
                                scheduler.finish_commit();
                            }
                        }
                    }
                    black_box(commits);
                });
            },
        );
    }

    group.bench_function("batcher_record_1000_in_window", |b| {
        b.iter(|| {
            let mut batcher = UpdateBatcher::new();
            batcher.open();
            for n in 1..=1_000_u64 {
                let _ = batcher.record(Versioned::new(n, Seq::new(n)));
            }
            black_box(batcher.close());
        });
    });

    for &(typed, gap_ms) in &[(32_usize, 0_u64), (32_usize, 1_u64), (32_usize, 20_u64)] {
        group.bench_function(format!("session_typing(chars={typed},gap_ms={gap_ms})"), |b| {
            b.iter_batched(
                || {
                    let event_loop = EventLoop::new();
                    let compute = search(&event_loop);
                    Session::new(
                        event_loop,
                        SessionConfig::default(),
                        String::new(),
                        compute,
                        TextRenderer::new(),
                    )
                    .expect("default config is valid")
                },
                |session| {
                    let mut text = String::new();
                    for i in 0..typed {
                        text.push(char::from(b'a' + (i % 26) as u8));
                        session.write(text.clone());
                        session.event_loop().advance(Duration::from_millis(gap_ms));
                    }
                    session.event_loop().run_until_idle();
                    black_box(session.stats());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_deferred);
criterion_main!(benches);
