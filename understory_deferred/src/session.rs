// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The orchestrator that wires writes, the deferred value, and the reader.
//!
//! A [`Session`] owns one authoritative value, one [`UpdateBatcher`], one
//! [`DeferredValueScheduler`], and one consumer that reads through a
//! [`SuspendingReader`] and renders into a [`Renderer`]. All work that is not
//! a direct response to a call happens in tasks on the session's
//! [`EventLoop`]:
//!
//! - A flush that needs a scheduling opportunity queues one macrotask,
//!   `commit_delay` later. The opportunity commits one transition, notifies
//!   subscribers, and re-evaluates the consumer.
//! - A settled entry the consumer was suspended on queues one re-evaluation,
//!   timed by the [`ResumePolicy`]. Settlements that arrive while one is
//!   already queued are folded into it. The consumer waits on an entry at
//!   most once, however often it re-evaluates while that entry is pending.
//!
//! Tasks hold only a weak reference to the session; dropping every handle
//! turns outstanding tasks into no-ops.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, Ref, RefCell, RefMut};
use core::fmt;
use core::hash::Hash;
use core::time::Duration;

use crate::batch::{Flush, UpdateBatcher};
use crate::cache::{AsyncResultCache, EntryId};
use crate::config::{KeySource, ResumePolicy, SessionConfig};
use crate::error::Error;
use crate::event_loop::{EventLoop, TimerId, VirtualTime};
use crate::policy::Coalescing;
use crate::reader::{ComputeFn, Read, SuspendingReader};
use crate::render::{Frame, Renderer};
use crate::scheduler::{DeferredValueScheduler, Observed, SchedulerState};
use crate::trace::TransitionLog;
use crate::value::{Authoritative, Seq, Versioned};
use smallvec::SmallVec;

type Subscriber<K> = Rc<dyn Fn(&Versioned<K>)>;

/// Handle returned by [`Session::subscribe`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Counters describing what a session has done.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Authoritative writes.
    pub writes: u64,
    /// Flushes delivered to the scheduler.
    pub flushes: u64,
    /// Deferred-value commits.
    pub commits: u64,
    /// Consumer evaluations, including the initial one.
    pub evaluations: u64,
    /// Re-evaluations run because an entry settled.
    pub resumptions: u64,
    /// Settlements of distinct entries folded into an already queued
    /// re-evaluation.
    pub coalesced_resumptions: u64,
}

#[derive(Debug, Default)]
struct ResumeState {
    queued: Option<TimerId>,
    last_render: VirtualTime,
    /// Pending entries the consumer has registered a resumption with.
    waiting_on: SmallVec<[EntryId; 2]>,
}

struct SessionInner<K, V, E, R> {
    event_loop: EventLoop,
    config: SessionConfig,
    authoritative: RefCell<Authoritative<K>>,
    batcher: RefCell<UpdateBatcher<K>>,
    scheduler: RefCell<DeferredValueScheduler<K, Coalescing>>,
    transitions: RefCell<TransitionLog>,
    reader: SuspendingReader<K, V, E>,
    renderer: RefCell<R>,
    subscribers: RefCell<Vec<(SubscriptionId, Subscriber<K>)>>,
    next_subscription: Cell<u64>,
    resume: RefCell<ResumeState>,
    stats: Cell<SessionStats>,
}

/// Cheap-clone handle to a deferred-value session.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use std::rc::Rc;
/// use understory_deferred::{EventLoop, Session, SessionConfig, TextRenderer};
///
/// let event_loop = EventLoop::new();
/// let timers = event_loop.clone();
/// let session = Session::new(
///     event_loop.clone(),
///     SessionConfig::default(),
///     String::new(),
///     Rc::new(move |text: &String, settle| {
///         let upper = text.to_uppercase();
///         timers.set_timeout(Duration::from_millis(10), move || settle.fulfill(upper));
///         Ok::<(), String>(())
///     }),
///     TextRenderer::new(),
/// )
/// .unwrap();
/// assert_eq!(session.renderer().text_content(), "Loading...");
///
/// session.write("ab".to_string());
/// session
///     .wait_for(|s| s.renderer().text_content() == "AB", Duration::from_secs(1))
///     .unwrap();
/// assert_eq!(session.current_deferred_value(), "ab");
/// ```
pub struct Session<K, V, E, R> {
    inner: Rc<SessionInner<K, V, E, R>>,
}

impl<K, V, E, R> Clone for Session<K, V, E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: fmt::Debug, V, E, R> fmt::Debug for Session<K, V, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authoritative", &*self.inner.authoritative.borrow())
            .field("scheduler", &*self.inner.scheduler.borrow())
            .field("config", &self.inner.config)
            .field("stats", &self.inner.stats.get())
            .finish_non_exhaustive()
    }
}

impl<K, V, E, R> Session<K, V, E, R>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    /// Creates a session and performs the initial evaluation.
    ///
    /// Both the authoritative and the deferred value start at `initial`;
    /// that is not counted as a commit. `compute` is started by the reader
    /// for each key it has not seen before.
    ///
    /// # Errors
    ///
    /// Returns the error of [`SessionConfig::validate`].
    pub fn new(
        event_loop: EventLoop,
        config: SessionConfig,
        initial: K,
        compute: ComputeFn<K, V, E>,
        renderer: R,
    ) -> Result<Self, Error> {
        config.validate()?;
        let authoritative = Authoritative::new(initial);
        let scheduler =
            DeferredValueScheduler::new(authoritative.versioned().clone(), config.coalescing);
        let session = Self {
            inner: Rc::new(SessionInner {
                event_loop,
                config,
                authoritative: RefCell::new(authoritative),
                batcher: RefCell::new(UpdateBatcher::new()),
                scheduler: RefCell::new(scheduler),
                transitions: RefCell::new(TransitionLog::new()),
                reader: SuspendingReader::new(Rc::new(AsyncResultCache::new()), compute),
                renderer: RefCell::new(renderer),
                subscribers: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
                resume: RefCell::new(ResumeState::default()),
                stats: Cell::new(SessionStats::default()),
            }),
        };
        tracing::debug!(config = ?session.inner.config, "session created");
        evaluate(&session.inner);
        Ok(session)
    }

    /// Writes a new authoritative value and returns its sequence number.
    ///
    /// Outside [`run_in_batch`](Self::run_in_batch) the write flushes to the
    /// scheduler at once. Inside a batch it is held until the batch closes.
    pub fn write(&self, value: K) -> Seq {
        let inner = &self.inner;
        let versioned = {
            let mut authoritative = inner.authoritative.borrow_mut();
            authoritative.write(value);
            authoritative.versioned().clone()
        };
        let seq = versioned.seq;
        bump(inner, |stats| stats.writes += 1);
        tracing::trace!(seq = seq.get(), value = ?versioned.value, "write");

        let flush = inner.batcher.borrow_mut().record(versioned);
        if let Some(flush) = flush {
            apply_flush(inner, flush);
        }
        seq
    }

    /// Runs `body` inside a batch window.
    ///
    /// Writes made by `body`, and by microtasks it queued, are delivered to
    /// the scheduler as one flush when the outermost window closes. No
    /// transition commits while the window is open. Work `body` schedules on
    /// a timer runs after the window and flushes on its own.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`. Writes it made before failing stay
    /// applied and are flushed.
    pub fn run_in_batch<T, BodyError>(
        &self,
        body: impl FnOnce(&Self) -> Result<T, BodyError>,
    ) -> Result<T, BodyError> {
        let inner = &self.inner;
        inner.batcher.borrow_mut().open();
        inner.scheduler.borrow_mut().hold();

        let result = body(self);
        inner.event_loop.run_microtasks();
        if result.is_err() {
            tracing::debug!("batch body failed; flushing writes it made");
        }

        let flush = inner.batcher.borrow_mut().close();
        let refused = inner.scheduler.borrow_mut().release();
        if let Some(flush) = flush {
            apply_flush(inner, flush);
        }
        if refused {
            request_opportunity(inner);
        }
        result
    }

    /// The current deferred value.
    #[must_use]
    pub fn current_deferred_value(&self) -> K {
        self.inner.scheduler.borrow().current().value.clone()
    }

    /// The current deferred value with the sequence number of its write.
    #[must_use]
    pub fn deferred(&self) -> Versioned<K> {
        self.inner.scheduler.borrow().current().clone()
    }

    /// The current authoritative value with its sequence number.
    #[must_use]
    pub fn authoritative(&self) -> Versioned<K> {
        self.inner.authoritative.borrow().versioned().clone()
    }

    /// State of the deferred-value scheduler.
    #[must_use]
    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.borrow().state()
    }

    /// Calls `on_change` with every new deferred value, until unsubscribed.
    ///
    /// `on_change` may write to the session; such writes are queued behind
    /// the commit being delivered.
    pub fn subscribe(&self, on_change: impl Fn(&Versioned<K>) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.get());
        self.inner.next_subscription.set(id.0 + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(on_change)));
        id
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Drives the event loop until `done` holds.
    ///
    /// Returns the virtual time that elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitTimeout`] if `done` does not hold within
    /// `timeout` of virtual time.
    pub fn wait_for(
        &self,
        mut done: impl FnMut(&Self) -> bool,
        timeout: Duration,
    ) -> Result<Duration, Error> {
        let this = self.clone();
        self.inner.event_loop.run_until(move || done(&this), timeout)
    }

    /// Counters describing what the session has done.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.inner.stats.get()
    }

    /// The fate of every write the scheduler observed.
    ///
    /// The log gains an entry for every observed write until it is cleared
    /// with [`clear_transitions`](Self::clear_transitions).
    #[must_use]
    pub fn transitions(&self) -> Ref<'_, TransitionLog> {
        self.inner.transitions.borrow()
    }

    /// Forgets every recorded fate. Later writes are recorded as before.
    pub fn clear_transitions(&self) {
        self.inner.transitions.borrow_mut().clear();
    }

    /// The cache the consumer reads through.
    #[must_use]
    pub fn cache(&self) -> &Rc<AsyncResultCache<K, V, E>> {
        self.inner.reader.cache()
    }

    /// The renderer frames are delivered to.
    #[must_use]
    pub fn renderer(&self) -> Ref<'_, R> {
        self.inner.renderer.borrow()
    }

    /// Mutable access to the renderer, e.g. to trim a recorded history.
    ///
    /// The borrow must be released before the event loop runs again.
    #[must_use]
    pub fn renderer_mut(&self) -> RefMut<'_, R> {
        self.inner.renderer.borrow_mut()
    }

    /// The event loop driving the session.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// The configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

fn bump<K, V, E, R>(inner: &SessionInner<K, V, E, R>, f: impl FnOnce(&mut SessionStats)) {
    let mut stats = inner.stats.get();
    f(&mut stats);
    inner.stats.set(stats);
}

fn apply_flush<K, V, E, R>(inner: &Rc<SessionInner<K, V, E, R>>, flush: Flush<K>)
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    bump(inner, |stats| stats.flushes += 1);
    tracing::debug!(
        seq = flush.value.seq.get(),
        coalesced = flush.coalesced,
        "flush"
    );
    let observed = {
        let mut scheduler = inner.scheduler.borrow_mut();
        let mut transitions = inner.transitions.borrow_mut();
        scheduler.observe_with_trace(flush.value, &mut *transitions)
    };
    if observed == Observed::ScheduleOpportunity {
        request_opportunity(inner);
    }
    if inner.config.key_source == KeySource::Authoritative {
        evaluate(inner);
    }
}

fn request_opportunity<K, V, E, R>(inner: &Rc<SessionInner<K, V, E, R>>)
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    let weak = Rc::downgrade(inner);
    inner
        .event_loop
        .set_timeout(inner.config.commit_delay, move || {
            if let Some(inner) = weak.upgrade() {
                run_opportunity(&inner);
            }
        });
}

fn run_opportunity<K, V, E, R>(inner: &Rc<SessionInner<K, V, E, R>>)
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    let commit = {
        let mut scheduler = inner.scheduler.borrow_mut();
        let mut transitions = inner.transitions.borrow_mut();
        scheduler.begin_commit_with_trace(&mut *transitions)
    };
    let Some(commit) = commit else {
        return;
    };
    bump(inner, |stats| stats.commits += 1);
    tracing::debug!(
        seq = commit.value.seq.get(),
        previous = commit.previous.seq.get(),
        at = inner.event_loop.now().as_millis(),
        "deferred value committed"
    );

    let subscribers: Vec<Subscriber<K>> = inner
        .subscribers
        .borrow()
        .iter()
        .map(|(_, subscriber)| subscriber.clone())
        .collect();
    for subscriber in subscribers {
        subscriber(&commit.value);
    }
    evaluate(inner);

    if inner.scheduler.borrow_mut().finish_commit() {
        request_opportunity(inner);
    }
}

fn evaluate<K, V, E, R>(inner: &Rc<SessionInner<K, V, E, R>>)
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    let key = match inner.config.key_source {
        KeySource::Deferred => inner.scheduler.borrow().current().value.clone(),
        KeySource::Authoritative => inner.authoritative.borrow().get().clone(),
    };
    bump(inner, |stats| stats.evaluations += 1);

    let now = inner.event_loop.now();
    let read = inner.reader.read(&key);
    {
        let mut renderer = inner.renderer.borrow_mut();
        match &read {
            Read::Ready(value) => renderer.render(Frame::Ready(value), now),
            Read::Failed(error) => renderer.render(Frame::Failed(error), now),
            Read::Pending(_) => renderer.render(Frame::Fallback, now),
        }
    }
    inner.resume.borrow_mut().last_render = now;

    if let Read::Pending(suspension) = read {
        let entry = suspension.entry_id();
        tracing::trace!(?key, entry = entry.get(), "consumer suspended");
        {
            let mut resume = inner.resume.borrow_mut();
            if resume.waiting_on.contains(&entry) {
                return;
            }
            resume.waiting_on.push(entry);
        }
        let weak = Rc::downgrade(inner);
        suspension.on_resume(move || schedule_resume(&weak, entry));
    }
}

fn schedule_resume<K, V, E, R>(weak: &Weak<SessionInner<K, V, E, R>>, settled: EntryId)
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
    R: Renderer<V, E> + 'static,
{
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut resume = inner.resume.borrow_mut();
    resume.waiting_on.retain(|entry| *entry != settled);
    if resume.queued.is_some() {
        bump(&inner, |stats| stats.coalesced_resumptions += 1);
        tracing::trace!("resumption folded into queued re-evaluation");
        return;
    }

    let now = inner.event_loop.now();
    let delay = match inner.config.resume {
        ResumePolicy::Immediate => Duration::ZERO,
        ResumePolicy::Throttled { interval } => resume
            .last_render
            .saturating_add(interval)
            .duration_since(now),
    };
    let weak = weak.clone();
    let id = inner.event_loop.set_timeout(delay, move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.resume.borrow_mut().queued = None;
        bump(&inner, |stats| stats.resumptions += 1);
        tracing::debug!(at = inner.event_loop.now().as_millis(), "consumer resumed");
        evaluate(&inner);
    });
    resume.queued = Some(id);
}
