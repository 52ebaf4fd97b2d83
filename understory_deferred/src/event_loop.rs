// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic single-threaded event loop with a virtual clock.
//!
//! The loop models the host scheduling environment the rest of the crate is
//! specified against:
//!
//! - **Macrotasks** (timers) ordered by due time, then by registration order.
//! - **Microtasks** in a FIFO queue that drains fully before and after every
//!   macrotask.
//! - A **virtual clock** that only moves when the loop runs a task that is due
//!   later than "now", or when a caller advances it explicitly.
//!
//! Nothing here sleeps or reads a wall clock, so a scenario replays
//! identically on every run.

use alloc::boxed::Box;
use alloc::collections::{BinaryHeap, VecDeque};
use alloc::rc::Rc;
use core::cell::RefCell;
use core::cmp::Reverse;
use core::fmt;
use core::time::Duration;

use hashbrown::HashMap;

use crate::error::Error;

type Task = Box<dyn FnOnce()>;

/// A point in virtual time, with millisecond resolution.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The start of every loop's clock.
    pub const ZERO: Self = Self(0);

    /// Creates a point `ms` milliseconds after [`VirtualTime::ZERO`].
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since [`VirtualTime::ZERO`].
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns `self + delay`, saturating at the end of time.
    #[must_use]
    pub fn saturating_add(self, delay: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(delay)))
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Debug for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a scheduled macrotask, used to cancel it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Event loop tuning.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Upper bound on microtasks run by a single drain.
    ///
    /// A microtask that keeps queueing microtasks would otherwise starve
    /// every macrotask. When the bound is hit the remainder stays queued for
    /// the next drain.
    pub max_microtasks_per_drain: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_drain: 100_000,
        }
    }
}

/// Counters describing the work an [`EventLoop`] has done.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Macrotasks run.
    pub tasks_run: u64,
    /// Microtasks run.
    pub microtasks_run: u64,
}

struct LoopState {
    now: VirtualTime,
    next_timer: u64,
    queue: BinaryHeap<Reverse<(VirtualTime, u64)>>,
    tasks: HashMap<u64, Task>,
    microtasks: VecDeque<Task>,
    config: LoopConfig,
    stats: LoopStats,
}

/// Cheap-clone handle to a deterministic event loop.
///
/// Tasks run with no internal borrow held, so a task may schedule timers,
/// queue microtasks, or read the clock.
///
/// # Example
///
/// ```
/// use core::cell::RefCell;
/// use core::time::Duration;
/// use std::rc::Rc;
/// use understory_deferred::{EventLoop, VirtualTime};
///
/// let event_loop = EventLoop::new();
/// let order = Rc::new(RefCell::new(Vec::new()));
///
/// let o = order.clone();
/// event_loop.set_timeout(Duration::from_millis(10), move || o.borrow_mut().push("timer"));
/// let o = order.clone();
/// event_loop.queue_microtask(move || o.borrow_mut().push("microtask"));
///
/// event_loop.run_until_idle();
/// assert_eq!(*order.borrow(), ["microtask", "timer"]);
/// assert_eq!(event_loop.now(), VirtualTime::from_millis(10));
/// ```
#[derive(Clone)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("pending_tasks", &state.tasks.len())
            .field("pending_microtasks", &state.microtasks.len())
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates an idle loop at [`VirtualTime::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Creates an idle loop with the given configuration.
    #[must_use]
    pub fn with_config(config: LoopConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(LoopState {
                now: VirtualTime::ZERO,
                next_timer: 0,
                queue: BinaryHeap::new(),
                tasks: HashMap::new(),
                microtasks: VecDeque::new(),
                config,
                stats: LoopStats::default(),
            })),
        }
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> VirtualTime {
        self.state.borrow().now
    }

    /// Schedules `task` to run as a macrotask once `delay` has elapsed.
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_timer;
        state.next_timer += 1;
        let due = state.now.saturating_add(delay);
        state.queue.push(Reverse((due, id)));
        state.tasks.insert(id, Box::new(task));
        TimerId(id)
    }

    /// Schedules `task` as a macrotask due now, behind every task already due.
    pub fn queue_task(&self, task: impl FnOnce() + 'static) -> TimerId {
        self.set_timeout(Duration::ZERO, task)
    }

    /// Cancels a scheduled macrotask.
    ///
    /// Returns `false` if the task already ran or was already cancelled.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.state.borrow_mut().tasks.remove(&id.0).is_some()
    }

    /// Queues `task` on the microtask queue.
    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.state.borrow_mut().microtasks.push_back(Box::new(task));
    }

    /// Drains the microtask queue, including microtasks queued while draining.
    ///
    /// Returns the number of microtasks run.
    pub fn run_microtasks(&self) -> usize {
        let limit = self.state.borrow().config.max_microtasks_per_drain;
        let mut ran = 0;
        loop {
            if ran >= limit {
                let remaining = self.state.borrow().microtasks.len();
                if remaining > 0 {
                    tracing::warn!(limit, remaining, "microtask drain limit reached");
                }
                break;
            }
            let task = self.state.borrow_mut().microtasks.pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        self.state.borrow_mut().stats.microtasks_run += ran as u64;
        ran
    }

    /// Runs the next macrotask, advancing the clock to its due time, then
    /// drains microtasks.
    ///
    /// Returns `false` if no macrotask was pending.
    pub fn turn(&self) -> bool {
        self.run_microtasks();
        self.run_next(None)
    }

    /// Runs every macrotask due within `by`, then leaves the clock at
    /// `now + by`.
    ///
    /// Returns the number of macrotasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        self.run_microtasks();
        let mut ran = 0;
        while self.run_next(Some(target)) {
            ran += 1;
        }
        let mut state = self.state.borrow_mut();
        state.now = state.now.max(target);
        ran
    }

    /// Runs macrotasks until none remain.
    ///
    /// Returns the number of macrotasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.turn() {
            ran += 1;
        }
        ran
    }

    /// Runs the loop until `done` returns `true`, giving up once virtual
    /// time passes `timeout`.
    ///
    /// `done` is checked before the first task and after every macrotask.
    /// On success, returns the virtual time that elapsed. On failure the
    /// clock is left at the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitTimeout`] if `done` never held in time.
    pub fn run_until(
        &self,
        mut done: impl FnMut() -> bool,
        timeout: Duration,
    ) -> Result<Duration, Error> {
        let start = self.now();
        let deadline = start.saturating_add(timeout);
        self.run_microtasks();
        loop {
            if done() {
                return Ok(self.now().duration_since(start));
            }
            if !self.run_next(Some(deadline)) {
                break;
            }
        }
        {
            let mut state = self.state.borrow_mut();
            state.now = state.now.max(deadline);
        }
        if done() {
            return Ok(self.now().duration_since(start));
        }
        Err(Error::WaitTimeout {
            timeout_ms: duration_millis(timeout),
        })
    }

    /// Due time of the earliest pending macrotask.
    #[must_use]
    pub fn next_due(&self) -> Option<VirtualTime> {
        let state = self.state.borrow();
        state
            .queue
            .iter()
            .filter(|Reverse((_, id))| state.tasks.contains_key(id))
            .map(|Reverse((due, _))| *due)
            .min()
    }

    /// Number of pending macrotasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    /// Number of pending microtasks.
    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.state.borrow().microtasks.len()
    }

    /// Returns `true` if no macrotask or microtask is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.tasks.is_empty() && state.microtasks.is_empty()
    }

    /// Work counters.
    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.state.borrow().stats
    }

    /// Pops and runs the earliest macrotask due at or before `deadline`.
    fn run_next(&self, deadline: Option<VirtualTime>) -> bool {
        let (due, task) = {
            let mut state = self.state.borrow_mut();
            loop {
                let Some(&Reverse((due, id))) = state.queue.peek() else {
                    return false;
                };
                if !state.tasks.contains_key(&id) {
                    // Cancelled.
                    state.queue.pop();
                    continue;
                }
                if deadline.is_some_and(|deadline| due > deadline) {
                    return false;
                }
                state.queue.pop();
                let Some(task) = state.tasks.remove(&id) else {
                    continue;
                };
                state.now = state.now.max(due);
                state.stats.tasks_run += 1;
                break (due, task);
            }
        };
        tracing::trace!(due = due.as_millis(), "running macrotask");
        task();
        self.run_microtasks();
        true
    }
}
