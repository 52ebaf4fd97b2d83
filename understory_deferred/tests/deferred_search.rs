// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end search scenarios for `understory_deferred`.
//!
//! A text field drives a search whose result is the uppercased text, ready
//! 10ms after the search starts. The consumer reads the result keyed by the
//! deferred copy of the text and shows "Loading..." while suspended.

use std::rc::Rc;
use std::time::Duration;

use understory_deferred::{
    Coalescing, ComputeFn, Error, EventLoop, Fate, KeySource, ResumePolicy, Seq, Session,
    SessionConfig, Settle, TextRenderer, VirtualTime,
};

const LATENCY: Duration = Duration::from_millis(10);
const GAP: Duration = Duration::from_millis(1);

type Search = Session<String, String, String, TextRenderer>;

fn uppercase_search(event_loop: &EventLoop) -> ComputeFn<String, String, String> {
    let timers = event_loop.clone();
    Rc::new(move |text: &String, settle: Settle<String, String>| {
        let result = if text.is_empty() {
            "<empty>".to_string()
        } else {
            text.to_uppercase()
        };
        timers.set_timeout(LATENCY, move || settle.fulfill(result));
        Ok(())
    })
}

/// Creates a session and waits until the initial empty search is shown.
fn mounted(config: SessionConfig) -> Search {
    let event_loop = EventLoop::new();
    let compute = uppercase_search(&event_loop);
    let session = Session::new(
        event_loop,
        config,
        String::new(),
        compute,
        TextRenderer::new(),
    )
    .unwrap();
    assert_eq!(session.renderer().text_content(), "Loading...");
    session
        .wait_for(
            |s| s.renderer().text_content() == "<empty>",
            Duration::from_secs(5),
        )
        .unwrap();
    session
}

/// Types "a", then "ab" one millisecond later, inside one batch window.
fn type_with_gap(session: &Search) {
    session
        .run_in_batch(|s| {
            s.write("a".to_string());
            let later = s.clone();
            s.event_loop().set_timeout(GAP, move || {
                later.write("ab".to_string());
            });
            Ok::<_, ()>(())
        })
        .unwrap();
}

/// Types "a" and "ab" with no gap, inside one batch window.
fn type_without_gap(session: &Search) {
    session
        .run_in_batch(|s| {
            s.write("a".to_string());
            s.write("ab".to_string());
            Ok::<_, ()>(())
        })
        .unwrap();
}

fn wait_for_ab(session: &Search, timeout: Duration) -> Result<Duration, Error> {
    session.wait_for(|s| s.renderer().text_content() == "AB", timeout)
}

fn keys(session: &Search) -> Vec<String> {
    session.cache().keys()
}

#[test]
fn gap_between_writes_commits_twice() {
    let session = mounted(SessionConfig::default());
    assert_eq!(session.event_loop().now(), VirtualTime::from_millis(10));

    type_with_gap(&session);
    let elapsed = wait_for_ab(&session, Duration::from_secs(1)).unwrap();

    assert_eq!(session.stats().commits, 2);
    assert_eq!(keys(&session), ["", "a", "ab"]);
    assert_eq!(session.transitions().commits(), &[Seq::new(1), Seq::new(2)]);
    // The "ab" search started one millisecond in and takes one latency.
    assert_eq!(elapsed, LATENCY + GAP);
    assert_eq!(session.current_deferred_value(), "ab");
}

#[test]
fn stale_resolution_does_not_register_a_second_waiter() {
    let session = mounted(SessionConfig::default());
    type_with_gap(&session);
    session.event_loop().advance(LATENCY);

    // "a" has settled and its re-evaluation found "ab" still pending.
    assert_eq!(session.event_loop().now(), VirtualTime::from_millis(20));
    assert_eq!(session.stats().resumptions, 2);
    let ab = session.cache().peek(&"ab".to_string()).unwrap();
    assert_eq!(ab.waiter_count(), 1);

    wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    assert_eq!(session.stats().coalesced_resumptions, 0);
    assert_eq!(session.stats().resumptions, 3);
}

#[test]
fn stale_resolution_folds_into_final_render() {
    let session = mounted(SessionConfig::default());
    type_with_gap(&session);
    wait_for_ab(&session, Duration::from_secs(1)).unwrap();

    // "a" resolved while the consumer was already waiting on "ab": it
    // re-evaluated once, still suspended, and never showed "A".
    let history = session.renderer().history().to_vec();
    assert!(history.iter().all(|(_, text)| text != "A"));
    assert_eq!(session.renderer().first_shown("AB"), Some(VirtualTime::from_millis(21)));
}

#[test]
fn zero_gap_commits_once() {
    let session = mounted(SessionConfig::default());

    type_without_gap(&session);
    let elapsed = wait_for_ab(&session, Duration::from_secs(1)).unwrap();

    assert!(session.stats().commits <= 1);
    assert_eq!(session.stats().flushes, 1);
    assert_eq!(keys(&session), ["", "ab"]);
    assert_eq!(elapsed, LATENCY);
    // The scheduler never observed "a": the batch collapsed it.
    assert_eq!(session.transitions().fate(Seq::new(1)), None);
    assert_eq!(session.transitions().fate(Seq::new(2)), Some(Fate::Committed));
}

#[test]
fn unbatched_writes_flush_separately() {
    let session = mounted(SessionConfig::default());

    session.write("a".to_string());
    session.write("ab".to_string());
    assert_eq!(session.stats().flushes, 2);

    wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    // The second flush superseded the first before its opportunity ran.
    assert_eq!(session.stats().commits, 1);
    assert_eq!(keys(&session), ["", "ab"]);
    assert_eq!(
        session.transitions().fate(Seq::new(1)),
        Some(Fate::Superseded { by: Seq::new(2) })
    );
    assert_eq!(
        session.transitions().explain(Seq::new(1)),
        Some(vec![Seq::new(1), Seq::new(2)])
    );
}

#[test]
fn unbatched_writes_with_gap_match_batched() {
    let session = mounted(SessionConfig::default());

    session.write("a".to_string());
    let later = session.clone();
    session.event_loop().set_timeout(GAP, move || {
        later.write("ab".to_string());
    });

    let elapsed = wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    assert_eq!(session.stats().commits, 2);
    assert_eq!(elapsed, LATENCY + GAP);
}

#[test]
fn authoritative_key_reads_every_write() {
    let session = mounted(SessionConfig::default().with_key_source(KeySource::Authoritative));

    type_with_gap(&session);
    let elapsed = wait_for_ab(&session, Duration::from_secs(1)).unwrap();

    assert_eq!(keys(&session), ["", "a", "ab"]);
    assert_eq!(elapsed, LATENCY + GAP);
}

#[test]
fn authoritative_key_suspends_before_the_commit() {
    let session = mounted(SessionConfig::default().with_key_source(KeySource::Authoritative));

    session.write("a".to_string());
    // The write itself re-evaluated the consumer; the deferred value has not
    // moved yet.
    assert_eq!(session.renderer().text_content(), "Loading...");
    assert_eq!(session.current_deferred_value(), "");
    assert!(session.cache().contains_key(&"a".to_string()));
}

#[test]
fn throttled_resumption_inflates_latency() {
    let throttled = SessionConfig::default().with_resume(ResumePolicy::Throttled {
        interval: Duration::from_millis(300),
    });
    let session = mounted(throttled);
    assert_eq!(session.event_loop().now(), VirtualTime::from_millis(300));

    type_with_gap(&session);
    // A wait sized for the computation latency gives up.
    let err = wait_for_ab(&session, Duration::from_millis(100)).unwrap_err();
    assert_eq!(err, Error::WaitTimeout { timeout_ms: 100 });
    assert_eq!(session.renderer().text_content(), "Loading...");
    assert_eq!(session.event_loop().now(), VirtualTime::from_millis(400));

    // A longer wait sees the result once the throttle lets the consumer run.
    wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    assert_eq!(session.renderer().first_shown("AB"), Some(VirtualTime::from_millis(601)));
    // "ab" settled while the re-evaluation for "a" was already queued.
    assert_eq!(session.stats().coalesced_resumptions, 1);
}

#[test]
fn commit_every_write_shows_no_skips() {
    let session = mounted(SessionConfig::default().with_coalescing(Coalescing::CommitEvery(1)));

    type_without_gap(&session);
    wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    // The batch still flushed once, so only "ab" was ever observed.
    assert_eq!(session.stats().commits, 1);

    session.write("x".to_string());
    session.write("xy".to_string());
    session
        .wait_for(|s| s.renderer().text_content() == "XY", Duration::from_secs(1))
        .unwrap();
    assert_eq!(session.stats().commits, 3);
    assert!(session.cache().contains_key(&"x".to_string()));
}

#[test]
fn commit_delay_postpones_the_deferred_value() {
    let session = mounted(SessionConfig::default().with_commit_delay(Duration::from_millis(5)));

    session.write("ab".to_string());
    session.event_loop().advance(Duration::from_millis(4));
    assert_eq!(session.current_deferred_value(), "");

    let elapsed = wait_for_ab(&session, Duration::from_secs(1)).unwrap();
    assert_eq!(session.current_deferred_value(), "ab");
    // One millisecond of the delay plus the latency remained.
    assert_eq!(elapsed, Duration::from_millis(11));
}

#[test]
fn rejected_search_is_rendered_and_not_retried() {
    let event_loop = EventLoop::new();
    let timers = event_loop.clone();
    let compute: ComputeFn<String, String, String> =
        Rc::new(move |text: &String, settle: Settle<String, String>| {
            let text = text.clone();
            timers.set_timeout(LATENCY, move || {
                if text == "bad" {
                    settle.reject("search failed".to_string());
                } else {
                    settle.fulfill(text.to_uppercase());
                }
            });
            Ok(())
        });
    let session = Session::new(
        event_loop,
        SessionConfig::default(),
        "ok".to_string(),
        compute,
        TextRenderer::new(),
    )
    .unwrap();

    session.write("bad".to_string());
    session
        .wait_for(
            |s| s.renderer().text_content() == "search failed",
            Duration::from_secs(1),
        )
        .unwrap();

    session.write("ok".to_string());
    session.write("bad".to_string());
    session.event_loop().run_until_idle();
    assert_eq!(session.renderer().text_content(), "search failed");
    assert_eq!(session.cache().computations_started(), 2);
}

#[test]
fn synchronous_failure_renders_without_caching() {
    let event_loop = EventLoop::new();
    let compute: ComputeFn<String, String, String> =
        Rc::new(|text: &String, _settle: Settle<String, String>| {
            Err(format!("no index for {text:?}"))
        });
    let session = Session::new(
        event_loop,
        SessionConfig::default(),
        "q".to_string(),
        compute,
        TextRenderer::new(),
    )
    .unwrap();

    assert_eq!(session.renderer().text_content(), "no index for \"q\"");
    assert!(session.cache().is_empty());
    assert_eq!(session.cache().computations_started(), 1);
}
