//! The single-stream scheduler: one `(times, callback)` pair driven by a
//! dedicated worker task.
//!
//! [`chime_at`] consumes a lazy sequence of time-convertibles and fires the
//! callback at each one, honoring overrun, error, cancellation, and shutdown
//! semantics. The returned [`ScheduleHandle`] is deliberately two things at
//! once: the whole schedule (close / wait / pending) and its currently
//! pending next firing (cancel / remaining delay).

mod queue;
mod runner;

use std::future::Future;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::errors::Error;
use crate::times::ToInstant;

use queue::TimeQueue;
use runner::{Command, Runner, TimeFeed};

/// How a schedule reached its terminal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The time sequence was exhausted, or the error handler stopped the
    /// schedule cleanly.
    Finished,
    /// The user closed the schedule.
    Aborted,
}

/// State of the currently pending firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CurrentFire {
    Idle,
    Scheduled { at: DateTime<Utc> },
    Running { at: DateTime<Utc> },
    Cancelled,
}

pub(crate) type BoxCallback<T> = Box<dyn FnMut(T) -> BoxFuture<'static, anyhow::Result<()>> + Send>;
type ErrorHandler = Box<dyn FnMut(&anyhow::Error) -> bool + Send>;
type CompletionHook = Box<dyn FnOnce() + Send>;

/// Options for [`chime_at_with`].
pub struct ScheduleOptions {
    error_handler: ErrorHandler,
    on_finished: Option<CompletionHook>,
    on_aborted: Option<CompletionHook>,
    clock: Arc<dyn Clock>,
    drop_overruns: bool,
    mutable: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            error_handler: Box::new(|e| {
                tracing::warn!(error = %e, "chime callback failed; continuing");
                true
            }),
            on_finished: None,
            on_aborted: None,
            clock: Arc::new(SystemClock),
            drop_overruns: false,
            mutable: false,
        }
    }
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides, per callback failure, whether the schedule continues
    /// (`true`) or terminates cleanly (`false`). The default logs a warning
    /// and continues.
    pub fn error_handler(mut self, f: impl FnMut(&anyhow::Error) -> bool + Send + 'static) -> Self {
        self.error_handler = Box::new(f);
        self
    }

    /// Runs once when the sequence is exhausted or the schedule stops
    /// itself. Must not block on this schedule's `wait`.
    pub fn on_finished(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    /// Runs once when the user closes the schedule. Without it, a close
    /// falls back to `on_finished`.
    pub fn on_aborted(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_aborted = Some(Box::new(f));
        self
    }

    /// Substitute the wall clock; every "now" read goes through it.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Catch-up mode: skip times already in the past at scheduling time
    /// instead of firing them immediately.
    pub fn drop_overruns(mut self, drop: bool) -> Self {
        self.drop_overruns = drop;
        self
    }

    /// Back the schedule with a shared FIFO so times can be appended after
    /// construction. The initial sequence is drained eagerly and must be
    /// finite.
    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }
}

struct Shared<T> {
    ctrl: mpsc::UnboundedSender<Command>,
    done: watch::Receiver<Option<Completion>>,
    current: RwLock<CurrentFire>,
    queue: Option<Arc<TimeQueue<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T> Shared<T> {
    fn store_current(&self, state: CurrentFire) {
        *self.current.write().unwrap() = state;
    }

    fn read_current(&self) -> CurrentFire {
        *self.current.read().unwrap()
    }
}

/// Handle to a running schedule and to its pending next firing.
///
/// Clones share the same schedule. Dropping every handle leaves the
/// schedule running to exhaustion; use [`close`](ScheduleHandle::close) to
/// stop it.
pub struct ScheduleHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ScheduleHandle<T> {
    fn clone(&self) -> Self {
        ScheduleHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Schedule `callback` at each element of `times` with default options.
///
/// Must be called within a tokio runtime; the schedule owns one worker task.
pub fn chime_at<T, I, F, Fut>(times: I, callback: F) -> ScheduleHandle<T>
where
    T: ToInstant + Clone + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    chime_at_with(times, callback, ScheduleOptions::default())
}

/// Schedule `callback` at each element of `times`.
///
/// Elements must map to non-decreasing instants; the scheduler does not
/// sort. Past elements fire immediately unless
/// [`drop_overruns`](ScheduleOptions::drop_overruns) is set.
pub fn chime_at_with<T, I, F, Fut>(
    times: I,
    mut callback: F,
    options: ScheduleOptions,
) -> ScheduleHandle<T>
where
    T: ToInstant + Clone + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let boxed: BoxCallback<T> = Box::new(move |t| callback(t).boxed());
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = watch::channel(None);

    let (feed, queue) = if options.mutable {
        let queue = Arc::new(TimeQueue::seeded(times));
        (TimeFeed::Queue(Arc::clone(&queue)), Some(queue))
    } else {
        let iter: Box<dyn Iterator<Item = T> + Send> = Box::new(times.into_iter());
        (TimeFeed::Iter(iter), None)
    };

    let shared = Arc::new(Shared {
        ctrl: ctrl_tx,
        done: done_rx,
        current: RwLock::new(CurrentFire::Idle),
        queue,
        clock: Arc::clone(&options.clock),
    });

    let runner = Runner {
        shared: Arc::clone(&shared),
        feed,
        callback: boxed,
        error_handler: options.error_handler,
        on_finished: options.on_finished,
        on_aborted: options.on_aborted,
        drop_overruns: options.drop_overruns,
        ctrl_rx,
        done_tx,
    };
    tokio::spawn(runner.run().instrument(tracing::debug_span!("chime_schedule")));

    ScheduleHandle { shared }
}

impl<T> ScheduleHandle<T> {
    /// Request graceful shutdown: no further firings start; a running
    /// callback finishes. Signals the latch with [`Completion::Aborted`].
    pub fn close(&self) {
        let _ = self.shared.ctrl.send(Command::Close { interrupt: false });
    }

    /// Graceful shutdown; identical to [`close`](ScheduleHandle::close).
    pub fn shutdown(&self) {
        self.close();
    }

    /// Shutdown that also interrupts a running callback by dropping its
    /// future at the next await point. The error handler observes
    /// [`Error::Interrupted`].
    pub fn shutdown_now(&self) {
        let _ = self.shared.ctrl.send(Command::Close { interrupt: true });
    }

    /// Block until the schedule reaches its terminal edge.
    pub async fn wait(&self) -> Completion {
        let mut done = self.shared.done.clone();
        let result = done.wait_for(|c| c.is_some()).await;
        match result {
            Ok(value) => (*value).unwrap_or(Completion::Aborted),
            Err(_) => {
                // Worker vanished without signalling; should be impossible.
                tracing::error!("schedule worker dropped its latch unsignalled");
                Completion::Aborted
            }
        }
    }

    /// Like [`wait`](ScheduleHandle::wait), returning `None` on timeout.
    pub async fn wait_timeout(&self, timeout: std::time::Duration) -> Option<Completion> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Whether the latch is still unsignalled.
    pub fn pending(&self) -> bool {
        self.shared.done.borrow().is_none()
    }

    pub fn finished(&self) -> bool {
        !self.pending()
    }

    /// Cancel the currently pending firing. With `interrupt`, a callback
    /// already running is interrupted at its next await point.
    ///
    /// Returns `true` iff the cancel took effect or the task was already
    /// cancelled. A live schedule reschedules from the next time after the
    /// cancelled one.
    pub async fn cancel_current(&self, interrupt: bool) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.shared.ctrl.send(Command::CancelCurrent {
            interrupt,
            reply: reply_tx,
        });
        if sent.is_err() {
            // Worker already gone; report whether the last task stayed
            // cancelled.
            return matches!(self.shared.read_current(), CurrentFire::Cancelled);
        }
        match reply_rx.await {
            Ok(took_effect) => took_effect,
            Err(_) => matches!(self.shared.read_current(), CurrentFire::Cancelled),
        }
    }

    /// Cancel the pending firing only if it has not started yet. Never
    /// interrupts, never closes the schedule.
    pub async fn cancel_current_if_pending(&self) -> bool {
        self.cancel_current(false).await
    }

    /// Remaining milliseconds until the current pending firing (possibly
    /// `<= 0` while it runs or is overdue), `Some(-1)` if it was cancelled,
    /// `None` if there is none.
    pub fn until_current(&self) -> Option<i64> {
        match self.shared.read_current() {
            CurrentFire::Idle => None,
            CurrentFire::Cancelled => Some(-1),
            CurrentFire::Scheduled { at } | CurrentFire::Running { at } => {
                Some((at - self.shared.clock.now()).num_milliseconds())
            }
        }
    }

    /// Instant of the next firing, or `None` if it is already due, running,
    /// cancelled, or absent.
    pub fn current_at(&self) -> Option<DateTime<Utc>> {
        match self.shared.read_current() {
            CurrentFire::Scheduled { at } if at > self.shared.clock.now() => Some(at),
            _ => None,
        }
    }
}

impl<T: Clone> ScheduleHandle<T> {
    /// Append times to the tail of a mutable schedule, in order.
    ///
    /// Errors with [`Error::ImmutableSchedule`] unless the schedule was
    /// opened with [`ScheduleOptions::mutable`]. A no-op once the schedule
    /// has terminated.
    pub fn append(&self, times: impl IntoIterator<Item = T>) -> Result<(), Error> {
        match &self.shared.queue {
            Some(queue) => {
                queue.append(times);
                Ok(())
            }
            None => Err(Error::ImmutableSchedule),
        }
    }

    /// Append `offset(last)` where `last` is the most recently queued time.
    pub fn append_relative_to_last<F>(&self, offset: F) -> Result<(), Error>
    where
        F: FnOnce(&T) -> T,
    {
        match &self.shared.queue {
            Some(queue) => queue.append_relative_to_last(offset),
            None => Err(Error::ImmutableSchedule),
        }
    }
}
