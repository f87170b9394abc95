//! The host side of the promise machinery: a thread-local FIFO microtask
//! queue plus a virtual-time timer queue standing in for external completion
//! sources.
//!
//! Nothing here runs on its own. The host drives the loop with [`run`],
//! [`run_microtasks`] or [`block_on`], and every queued task runs to
//! completion before the next one starts.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{event_loop, Promise};
//! use std::time::Duration;
//!
//! let later = Promise::<&str, ()>::new(|resolver| {
//!     event_loop::set_timeout(Duration::from_millis(50), move || resolver.fulfill("done"));
//!     Ok(())
//! });
//! assert_eq!(event_loop::block_on(&later).unwrap(), Ok("done"));
//! assert_eq!(event_loop::now(), Duration::from_millis(50));
//! ```
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::time::Duration;

use crate::error::{PromiseError, UncaughtRejection};
use crate::promise::Promise;
use crate::waiter::Waiter;

pub(crate) type Microtask = Box<dyn FnOnce() -> Result<(), UncaughtRejection>>;

/// What a run does when a rejection nobody listens to reaches the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledPolicy {
    /// Stop at the first uncaught rejection and return it as an error.
    /// Tasks still queued stay queued.
    #[default]
    Abort,
    /// Log it, collect it into [`RunReport::uncaught`] and keep draining.
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    pub unhandled: UnhandledPolicy,
    /// Upper bound on microtasks executed by a single run call. `None` never stops.
    pub microtask_budget: Option<usize>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            unhandled: UnhandledPolicy::default(),
            microtask_budget: Some(1_000_000),
        }
    }
}

impl EventLoopConfig {
    pub fn with_unhandled(mut self, unhandled: UnhandledPolicy) -> Self {
        self.unhandled = unhandled;
        self
    }

    pub fn with_microtask_budget(mut self, budget: Option<usize>) -> Self {
        self.microtask_budget = budget;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Work done by one run call.
#[derive(Debug, Default)]
pub struct RunReport {
    pub microtasks: usize,
    pub timers: usize,
    /// Only populated under [`UnhandledPolicy::Report`].
    pub uncaught: Vec<UncaughtRejection>,
}

struct Timer {
    id: TimerId,
    due: Duration,
    callback: Box<dyn FnOnce()>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("due", &self.due)
            .finish()
    }
}

#[derive(Default)]
struct EventLoop {
    config: EventLoopConfig,
    microtasks: VecDeque<Microtask>,
    timers: Vec<Timer>,
    now: Duration,
    next_timer: u64,
}

impl EventLoop {
    /// Removes the earliest due timer (ties go to the older one) and moves
    /// the clock forward to its due time.
    fn next_timer(&mut self) -> Option<Timer> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, timer)| (timer.due, timer.id))
            .map(|(index, _)| index)?;
        let timer = self.timers.remove(index);
        self.now = self.now.max(timer.due);
        Some(timer)
    }
}

thread_local! {
    static EVENT_LOOP: RefCell<EventLoop> = RefCell::new(EventLoop::default());
}

pub fn configure(config: EventLoopConfig) {
    EVENT_LOOP.with(|event_loop| event_loop.borrow_mut().config = config);
}

pub fn config() -> EventLoopConfig {
    EVENT_LOOP.with(|event_loop| event_loop.borrow().config.clone())
}

pub(crate) fn schedule(task: Microtask) {
    EVENT_LOOP.with(|event_loop| event_loop.borrow_mut().microtasks.push_back(task));
}

/// Enqueues `task` behind every microtask already queued.
pub fn queue_microtask<F>(task: F)
where
    F: FnOnce() + 'static,
{
    schedule(Box::new(move || {
        task();
        Ok(())
    }));
}

/// Runs `callback` once the virtual clock reaches `now() + delay`.
pub fn set_timeout<F>(delay: Duration, callback: F) -> TimerId
where
    F: FnOnce() + 'static,
{
    EVENT_LOOP.with(|event_loop| {
        let mut event_loop = event_loop.borrow_mut();
        let id = TimerId(event_loop.next_timer);
        event_loop.next_timer += 1;
        let due = event_loop.now + delay;
        event_loop.timers.push(Timer {
            id,
            due,
            callback: Box::new(callback),
        });
        id
    })
}

/// Current virtual time.
pub fn now() -> Duration {
    EVENT_LOOP.with(|event_loop| event_loop.borrow().now)
}

pub fn is_idle() -> bool {
    EVENT_LOOP.with(|event_loop| {
        let event_loop = event_loop.borrow();
        event_loop.microtasks.is_empty() && event_loop.timers.is_empty()
    })
}

/// Throws away all queued work, rewinds the clock and restores the default config.
pub fn reset() {
    let discarded = EVENT_LOOP.with(|event_loop| mem::take(&mut *event_loop.borrow_mut()));
    drop(discarded);
}

/// Drains the microtask queue, including tasks queued while draining.
pub fn run_microtasks() -> Result<RunReport, PromiseError> {
    let mut run = Run::start();
    run.drain()?;
    Ok(run.report)
}

/// Drains microtasks, then fires timers in due order, draining microtasks
/// after each one, until nothing is left.
pub fn run() -> Result<RunReport, PromiseError> {
    let mut run = Run::start();
    loop {
        run.drain()?;
        if !run.fire_timer() {
            return Ok(run.report);
        }
    }
}

/// Steps the loop until `promise` settles and returns its outcome.
///
/// Waiting registers reactions on `promise`, so a rejection delivered here
/// counts as handled.
pub fn block_on<T, E>(promise: &Promise<T, E>) -> Result<Result<T, E>, PromiseError>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let waiter = Waiter::new(promise);
    let mut run = Run::start();
    loop {
        if let Some(outcome) = waiter.try_take() {
            return Ok(outcome);
        }
        if !(run.microtask()? || run.fire_timer()) {
            return Err(PromiseError::Stalled);
        }
    }
}

struct Run {
    config: EventLoopConfig,
    report: RunReport,
}

impl Run {
    fn start() -> Self {
        Self {
            config: config(),
            report: RunReport::default(),
        }
    }

    fn drain(&mut self) -> Result<(), PromiseError> {
        while self.microtask()? {}
        Ok(())
    }

    /// Runs the oldest queued microtask. `false` when the queue is empty.
    fn microtask(&mut self) -> Result<bool, PromiseError> {
        if let Some(budget) = self.config.microtask_budget {
            let queued = EVENT_LOOP.with(|event_loop| !event_loop.borrow().microtasks.is_empty());
            if queued && self.report.microtasks >= budget {
                tracing::warn!(budget, "microtask budget exhausted, leaving the rest queued");
                return Err(PromiseError::BudgetExhausted { budget });
            }
        }
        let Some(task) = EVENT_LOOP.with(|event_loop| event_loop.borrow_mut().microtasks.pop_front())
        else {
            return Ok(false);
        };
        self.report.microtasks += 1;
        tracing::trace!(seq = self.report.microtasks, "running microtask");
        if let Err(uncaught) = task() {
            self.uncaught(uncaught)?;
        }
        Ok(true)
    }

    fn fire_timer(&mut self) -> bool {
        let Some(timer) = EVENT_LOOP.with(|event_loop| event_loop.borrow_mut().next_timer()) else {
            return false;
        };
        tracing::debug!(id = timer.id.0, due = ?timer.due, "firing timer");
        self.report.timers += 1;
        (timer.callback)();
        true
    }

    fn uncaught(&mut self, uncaught: UncaughtRejection) -> Result<(), PromiseError> {
        tracing::error!(
            reason = %uncaught.description(),
            "uncaught rejection ({})",
            uncaught.provenance()
        );
        match self.config.unhandled {
            UnhandledPolicy::Abort => Err(uncaught.into()),
            UnhandledPolicy::Report => {
                self.report.uncaught.push(uncaught);
                Ok(())
            }
        }
    }
}
