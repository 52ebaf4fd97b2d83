// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared pieces for the `understory_deferred` demos.
//!
//! - [`init_logging`] installs a `tracing` subscriber filtered by `RUST_LOG`
//!   or a verbosity count.
//! - [`uppercase_search`] and [`counter`] are the two computations the demos
//!   key by text.
//! - [`type_text`] replays a sequence of keystrokes into a session.

use std::cell::Cell;
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt as log_fmt};
use understory_deferred::{ComputeFn, EventLoop, Renderer, Session, Settle, TextRenderer};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbosity` picks the level for the
/// library: 0 is `info`, 1 is `debug`, anything higher is `trace`.
///
/// Timestamps are left out: the demos run on virtual time.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbosity: u8) -> Result<(), TryInitError> {
    let level = match verbosity {
        0 => "info",
        1 => "understory_deferred=debug,info",
        _ => "understory_deferred=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(log_fmt::layer().without_time().with_target(true))
        .try_init()
}

/// Search computation: the uppercased text, or `"<empty>"` for empty text,
/// ready `latency` after the search starts.
pub fn uppercase_search(
    event_loop: &EventLoop,
    latency: Duration,
) -> ComputeFn<String, String, String> {
    let timers = event_loop.clone();
    Rc::new(move |text: &String, settle: Settle<String, String>| {
        let result = if text.is_empty() {
            "<empty>".to_string()
        } else {
            text.to_uppercase()
        };
        timers.set_timeout(latency, move || settle.fulfill(result));
        Ok(())
    })
}

/// A number handed out by [`counter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Number(pub u64);

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Number: {}", self.0)
    }
}

/// Counter computation: every new key is assigned the next number when its
/// computation starts, and the number is ready `latency` later.
///
/// Keys the cache has already seen never reach this function, so a key
/// keeps its number for the lifetime of the session.
pub fn counter(
    event_loop: &EventLoop,
    latency: Duration,
) -> ComputeFn<String, Number, Infallible> {
    let timers = event_loop.clone();
    let next = Rc::new(Cell::new(0_u64));
    Rc::new(move |_: &String, settle: Settle<Number, Infallible>| {
        let number = Number(next.get());
        next.set(number.0 + 1);
        timers.set_timeout(latency, move || settle.fulfill(number));
        Ok(())
    })
}

/// A text session rendering into a [`TextRenderer`].
pub type TextSession<V, E> = Session<String, V, E, TextRenderer>;

/// Replays `writes` into `session`.
///
/// The first write happens at once; with a non-zero `gap`, each later write
/// is scheduled `gap` after the previous one. With `batched`, the writes are
/// made inside one batch window; writes scheduled on a timer still land
/// after the window closes.
pub fn type_text<V, E, R>(
    session: &Session<String, V, E, R>,
    writes: &[String],
    gap: Duration,
    batched: bool,
) where
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    let body = |s: &Session<String, V, E, R>| {
        let mut delay = Duration::ZERO;
        for (i, text) in writes.iter().enumerate() {
            if i == 0 || gap.is_zero() {
                s.write(text.clone());
                continue;
            }
            delay += gap;
            let later = s.clone();
            let text = text.clone();
            s.event_loop().set_timeout(delay, move || {
                later.write(text);
            });
        }
        Ok::<_, Infallible>(())
    };
    let Ok(()) = if batched {
        session.run_in_batch(body)
    } else {
        body(session)
    };
}
