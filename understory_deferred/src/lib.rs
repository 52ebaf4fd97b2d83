// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Deferred: deferred-value scheduling over a memoizing async cache.
//!
//! This crate models a consumer that renders the result of an asynchronous
//! computation keyed by a value that changes quickly. Instead of keying the
//! computation directly by the live ("authoritative") value, the consumer
//! reads through a lagging ("deferred") copy of it that only advances at
//! scheduling opportunities. The building blocks are:
//!
//! - **Async results** ([`AsyncResultCache`], [`CacheEntry`], [`Settle`]):
//!   at most one computation per key, ever, with settlement callbacks.
//! - **Suspending reads** ([`SuspendingReader`], [`Read`], [`Suspension`]):
//!   non-blocking reads that hand back a resumption token while pending.
//! - **Deferred values** ([`DeferredValueScheduler`], [`CoalescePolicy`]):
//!   an explicit state machine that turns flushed writes into monotonic
//!   commits, superseding transitions that never got to commit.
//! - **Batching** ([`UpdateBatcher`], [`Flush`]): writes inside a window
//!   reach the scheduler as a single flush.
//! - **Orchestration** ([`Session`], [`SessionConfig`]): wires the above
//!   together on a deterministic [`EventLoop`] and renders [`Frame`]s.
//! - **Explainability** ([`TransitionLog`], [`TransitionTrace`]): the fate of
//!   every observed write.
//!
//! ## Quick Start
//!
//! ```rust
//! use core::time::Duration;
//! use std::rc::Rc;
//! use understory_deferred::{EventLoop, Session, SessionConfig, Settle, TextRenderer};
//!
//! let event_loop = EventLoop::new();
//! let timers = event_loop.clone();
//! let session = Session::new(
//!     event_loop,
//!     SessionConfig::default(),
//!     String::new(),
//!     Rc::new(move |text: &String, settle: Settle<String, String>| {
//!         let upper = text.to_uppercase();
//!         timers.set_timeout(Duration::from_millis(10), move || settle.fulfill(upper));
//!         Ok(())
//!     }),
//!     TextRenderer::new(),
//! )
//! .unwrap();
//!
//! // Both writes land in one window, so the deferred value skips "a".
//! session
//!     .run_in_batch(|s| {
//!         s.write("a".to_string());
//!         s.write("ab".to_string());
//!         Ok::<_, ()>(())
//!     })
//!     .unwrap();
//!
//! session
//!     .wait_for(|s| s.renderer().text_content() == "AB", Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(session.stats().commits, 1);
//! assert!(!session.cache().contains_key(&"a".to_string()));
//! ```
//!
//! ## Execution Model
//!
//! Everything runs on one logical thread. Shared state uses `Rc`,
//! `RefCell` and `Cell`; nothing here is `Send`. Time is virtual: the
//! [`EventLoop`] orders macrotasks by due time and drains its microtask queue
//! around each one, so every scenario replays identically.
//!
//! A consumer suspended on a pending read is resumed by a queued task, never
//! inline from the settlement. Started computations are never cancelled, and
//! cache entries are never evicted.
//!
//! ## Coalescing
//!
//! - [`LatestOnFlush`]: a newer flush supersedes any transition that has not
//!   committed yet. A burst of writes can produce a single commit.
//! - [`CommitEvery`]: every n-th observed write is a checkpoint that always
//!   commits. An interval of one commits every distinct write.
//!
//! [`Coalescing`] is the configuration form of both, used by
//! [`SessionConfig`].
//!
//! ## Resumption Timing
//!
//! [`ResumePolicy::Immediate`] re-evaluates a suspended consumer on the next
//! turn after its entry settles. [`ResumePolicy::Throttled`] keeps a freshly
//! shown fallback up for a minimum interval, which is enough to push the
//! completion of a quick computation far past its own latency.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. The `std` feature (on by default)
//! only forwards to the `std` features of `thiserror` and `tracing`.
//!
//! ## Logging
//!
//! Flushes, commits, cache-entry creation and settlement, and resumptions are
//! reported through [`tracing`] at `debug` and `trace` level. No subscriber is
//! installed by this crate.

#![no_std]

extern crate alloc;

mod batch;
mod cache;
mod config;
mod error;
pub mod event_loop;
mod policy;
mod reader;
mod render;
mod scheduler;
mod session;
pub mod trace;
mod value;

pub use batch::{Flush, UpdateBatcher};
pub use cache::{AsyncResultCache, CacheEntry, EntryId, EntryState, Settle};
pub use config::{KeySource, ResumePolicy, SessionConfig};
pub use error::Error;
pub use event_loop::{EventLoop, LoopConfig, LoopStats, TimerId, VirtualTime};
pub use policy::{CoalescePolicy, Coalescing, CommitEvery, LatestOnFlush, Retention};
pub use reader::{ComputeFn, Read, SuspendingReader, Suspension};
pub use render::{Frame, Renderer, TextRenderer};
pub use scheduler::{Commit, DeferredValueScheduler, Observed, SchedulerState};
pub use session::{Session, SessionStats, SubscriptionId};
pub use trace::{Fate, NoTrace, TransitionLog, TransitionTrace};
pub use value::{Authoritative, Seq, Versioned};
