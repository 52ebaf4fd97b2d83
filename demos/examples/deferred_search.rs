// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred search.
//!
//! Types "a" then "ab" into a search box whose results are keyed by the
//! deferred text, and reports when "AB" shows up. Flags switch between the
//! failing shape (batched writes with a gap, throttled resumption) and each
//! of its workarounds.
//!
//! Run:
//! - `cargo run -p understory_deferred_demos --example deferred_search`
//! - `cargo run -p understory_deferred_demos --example deferred_search -- --throttle-ms 300 --timeout-ms 100`
//! - `cargo run -p understory_deferred_demos --example deferred_search -- --gap-ms 0 -v`

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use understory_deferred::{
    Coalescing, EventLoop, KeySource, ResumePolicy, Session, SessionConfig, TextRenderer,
};
use understory_deferred_demos::{TextSession, init_logging, type_text, uppercase_search};

#[derive(Parser, Debug)]
#[command(about = "Type into a deferred search box on virtual time")]
struct Args {
    /// Text written on each keystroke.
    #[arg(long, num_args = 1.., default_values = ["a", "ab"])]
    writes: Vec<String>,
    /// Milliseconds between keystrokes; 0 writes them all at once.
    #[arg(long, default_value_t = 1)]
    gap_ms: u64,
    /// Milliseconds a search takes.
    #[arg(long, default_value_t = 10)]
    latency_ms: u64,
    /// Keep a shown fallback up for at least this many milliseconds.
    #[arg(long)]
    throttle_ms: Option<u64>,
    /// How long to wait for the final result.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Write outside a batch window.
    #[arg(long)]
    unbatched: bool,
    /// Key the search by the live text instead of the deferred text.
    #[arg(long)]
    authoritative: bool,
    /// Commit every n-th observed write even if a newer one is pending.
    #[arg(long)]
    commit_every: Option<u32>,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(interval) = self.throttle_ms {
            config = config.with_resume(ResumePolicy::Throttled {
                interval: Duration::from_millis(interval),
            });
        }
        if let Some(every) = self.commit_every {
            config = config.with_coalescing(Coalescing::CommitEvery(every));
        }
        if self.authoritative {
            config = config.with_key_source(KeySource::Authoritative);
        }
        config
    }
}

fn expected(text: &str) -> String {
    if text.is_empty() {
        "<empty>".to_string()
    } else {
        text.to_uppercase()
    }
}

fn report(session: &TextSession<String, String>) {
    for (at, text) in session.renderer().history() {
        println!("  {at:?}: {text}");
    }
    let stats = session.stats();
    println!(
        "writes={} flushes={} commits={} evaluations={} resumptions={} coalesced={}",
        stats.writes,
        stats.flushes,
        stats.commits,
        stats.evaluations,
        stats.resumptions,
        stats.coalesced_resumptions
    );
    println!("searches started: {:?}", session.cache().keys());
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let event_loop = EventLoop::new();
    let compute = uppercase_search(&event_loop, Duration::from_millis(args.latency_ms));
    let session = Session::new(
        event_loop,
        args.config(),
        String::new(),
        compute,
        TextRenderer::new(),
    )?;
    session.wait_for(
        |s| s.renderer().text_content() == "<empty>",
        Duration::from_millis(args.timeout_ms),
    )?;
    tracing::info!(at = ?session.event_loop().now(), "mounted");

    let target = expected(args.writes.last().map_or("", String::as_str));
    type_text(
        &session,
        &args.writes,
        Duration::from_millis(args.gap_ms),
        !args.unbatched,
    );

    let outcome = session.wait_for(
        |s| s.renderer().text_content() == target,
        Duration::from_millis(args.timeout_ms),
    );
    report(&session);
    match outcome {
        Ok(elapsed) => {
            println!("{target:?} shown after {}ms", elapsed.as_millis());
            Ok(())
        }
        Err(err) => {
            println!("{target:?} not shown: {err}");
            Err(err.into())
        }
    }
}
