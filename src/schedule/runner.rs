use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};

use crate::errors::Error;
use crate::times::ToInstant;

use super::queue::TimeQueue;
use super::{BoxCallback, Completion, CurrentFire, Shared};

/// Control traffic from handles to the worker.
pub(super) enum Command {
    Close {
        interrupt: bool,
    },
    CancelCurrent {
        interrupt: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Where the worker takes its heads from: a consumed iterator (immutable
/// mode) or the shared FIFO (mutable mode).
pub(super) enum TimeFeed<T> {
    Iter(Box<dyn Iterator<Item = T> + Send>),
    Queue(Arc<TimeQueue<T>>),
}

impl<T: Clone> TimeFeed<T> {
    fn pop(&mut self) -> Option<T> {
        match self {
            TimeFeed::Iter(iter) => iter.next(),
            TimeFeed::Queue(queue) => queue.pop(),
        }
    }
}

enum WaitOutcome {
    /// The due instant arrived.
    Fire,
    /// The pending task was cancelled; reschedule from the tail.
    Cancelled,
    /// The schedule was closed while waiting.
    Closed,
}

enum CallbackEnd {
    Ok,
    Failed(anyhow::Error),
    /// The callback future was dropped mid-flight.
    Interrupted { via_close: bool },
}

enum RunOutcome {
    Continue,
    Stop(Completion),
}

/// The per-schedule worker: pops heads, sleeps to the due instant, runs the
/// callback, and applies exactly one terminal edge.
pub(super) struct Runner<T> {
    pub(super) shared: Arc<Shared<T>>,
    pub(super) feed: TimeFeed<T>,
    pub(super) callback: BoxCallback<T>,
    pub(super) error_handler: Box<dyn FnMut(&anyhow::Error) -> bool + Send>,
    pub(super) on_finished: Option<Box<dyn FnOnce() + Send>>,
    pub(super) on_aborted: Option<Box<dyn FnOnce() + Send>>,
    pub(super) drop_overruns: bool,
    pub(super) ctrl_rx: mpsc::UnboundedReceiver<Command>,
    pub(super) done_tx: watch::Sender<Option<Completion>>,
}

impl<T> Runner<T>
where
    T: ToInstant + Clone + Send + 'static,
{
    pub(super) async fn run(mut self) {
        loop {
            let Some(t) = self.feed.pop() else {
                self.finish(Completion::Finished);
                return;
            };
            let at = t.to_instant();
            let delay_ms = (at - self.shared.clock.now()).num_milliseconds();

            if delay_ms <= 0 && self.drop_overruns {
                tracing::debug!(%at, "dropping overdue chime");
                continue;
            }

            self.shared.store_current(CurrentFire::Scheduled { at });
            match self.wait_until(delay_ms).await {
                WaitOutcome::Fire => {}
                WaitOutcome::Cancelled => continue,
                WaitOutcome::Closed => {
                    self.shared.store_current(CurrentFire::Cancelled);
                    self.finish(Completion::Aborted);
                    return;
                }
            }

            self.shared.store_current(CurrentFire::Running { at });
            tracing::debug!(%at, "chime");
            match self.invoke(t).await {
                RunOutcome::Continue => {}
                RunOutcome::Stop(completion) => {
                    self.finish(completion);
                    return;
                }
            }
        }
    }

    /// Sleep out the delay (push-forward: overdue fires immediately) while
    /// staying responsive to control traffic.
    async fn wait_until(&mut self, delay_ms: i64) -> WaitOutcome {
        tokio::select! {
            biased;
            cmd = self.ctrl_rx.recv() => match cmd {
                Some(Command::Close { .. }) | None => WaitOutcome::Closed,
                Some(Command::CancelCurrent { reply, .. }) => {
                    // Not started yet, so any cancel takes effect.
                    self.shared.store_current(CurrentFire::Cancelled);
                    let _ = reply.send(true);
                    WaitOutcome::Cancelled
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64)) => {
                WaitOutcome::Fire
            }
        }
    }

    /// Run one callback to completion, interruption, or failure, and decide
    /// how the schedule proceeds.
    async fn invoke(&mut self, t: T) -> RunOutcome {
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(t))) {
            Ok(fut) => fut,
            Err(panic) => {
                return self.after_failure(panic_error(panic), false);
            }
        };
        let fut = AssertUnwindSafe(fut).catch_unwind();
        tokio::pin!(fut);

        let mut closing = false;
        let end = loop {
            tokio::select! {
                biased;
                cmd = self.ctrl_rx.recv() => match cmd {
                    Some(Command::Close { interrupt: false }) => {
                        // Let the running callback finish, then abort.
                        closing = true;
                    }
                    Some(Command::Close { interrupt: true }) | None => {
                        break CallbackEnd::Interrupted { via_close: true };
                    }
                    Some(Command::CancelCurrent { interrupt: true, reply }) => {
                        self.shared.store_current(CurrentFire::Cancelled);
                        let _ = reply.send(true);
                        break CallbackEnd::Interrupted { via_close: false };
                    }
                    Some(Command::CancelCurrent { interrupt: false, reply }) => {
                        // Already started; a non-interrupting cancel has no
                        // effect.
                        let _ = reply.send(false);
                    }
                },
                result = &mut fut => break match result {
                    Ok(Ok(())) => CallbackEnd::Ok,
                    Ok(Err(error)) => CallbackEnd::Failed(error),
                    Err(panic) => CallbackEnd::Failed(panic_error(panic)),
                },
            }
        };

        match end {
            CallbackEnd::Ok => {
                if closing {
                    RunOutcome::Stop(Completion::Aborted)
                } else {
                    RunOutcome::Continue
                }
            }
            CallbackEnd::Failed(error) => self.after_failure(error, closing),
            CallbackEnd::Interrupted { via_close } => {
                let error = anyhow::Error::from(Error::Interrupted);
                let continue_schedule = self.consult_handler(&error);
                if via_close || closing {
                    RunOutcome::Stop(Completion::Aborted)
                } else if continue_schedule == Some(true) {
                    RunOutcome::Continue
                } else {
                    RunOutcome::Stop(Completion::Finished)
                }
            }
        }
    }

    fn after_failure(&mut self, error: anyhow::Error, closing: bool) -> RunOutcome {
        match self.consult_handler(&error) {
            Some(true) => {
                if closing {
                    RunOutcome::Stop(Completion::Aborted)
                } else {
                    RunOutcome::Continue
                }
            }
            // Falsy means stop cleanly; a panicking handler stops too.
            Some(false) | None => RunOutcome::Stop(if closing {
                Completion::Aborted
            } else {
                Completion::Finished
            }),
        }
    }

    /// `None` when the handler itself panicked.
    fn consult_handler(&mut self, error: &anyhow::Error) -> Option<bool> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.error_handler)(error))) {
            Ok(continue_schedule) => Some(continue_schedule),
            Err(_) => {
                tracing::error!(%error, "error handler panicked; stopping schedule");
                None
            }
        }
    }

    /// Apply the terminal edge: close the queue, signal the latch, run the
    /// completion hook. Runs at most once per schedule.
    fn finish(&mut self, completion: Completion) {
        if self.done_tx.borrow().is_some() {
            tracing::error!("second terminal edge suppressed");
            return;
        }
        if let Some(queue) = self.shared.queue.as_ref() {
            queue.close();
        }
        {
            let mut current = self.shared.current.write().unwrap();
            if !matches!(*current, CurrentFire::Cancelled) {
                *current = CurrentFire::Idle;
            }
        }
        tracing::debug!(?completion, "schedule done");
        let _ = self.done_tx.send(Some(completion));

        let hook = match completion {
            Completion::Aborted => self.on_aborted.take().or_else(|| self.on_finished.take()),
            Completion::Finished => self.on_finished.take(),
        };
        if let Some(hook) = hook {
            if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!("completion hook panicked");
            }
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string());
    anyhow::anyhow!("chime callback panicked: {message}")
}
