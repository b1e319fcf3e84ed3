//! Channel adapter: chimes delivered through a bounded in-process queue
//! instead of a callback.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::errors::Error;
use crate::schedule::{chime_at_with, ScheduleHandle, ScheduleOptions};
use crate::times::ToInstant;

/// What happens to a chime when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// The schedule's worker blocks until the reader catches up (delaying
    /// subsequent chimes).
    Block,
    /// The incoming chime is discarded.
    DropNewest,
    /// The oldest buffered chime is evicted to make room.
    Sliding,
}

/// Options for [`chime_ch`].
pub struct ChannelOptions {
    buffer: usize,
    policy: OverflowPolicy,
    error_handler: Option<Box<dyn FnMut(&anyhow::Error) -> bool + Send>>,
    on_finished: Option<Box<dyn FnOnce() + Send>>,
    clock: Arc<dyn Clock>,
    drop_overruns: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            buffer: 32,
            policy: OverflowPolicy::Block,
            error_handler: None,
            on_finished: None,
            clock: Arc::new(SystemClock),
            drop_overruns: false,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer capacity; clamped to at least one slot.
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity;
        self
    }

    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decides per callback failure whether the schedule continues; `false`
    /// also closes the read end.
    pub fn error_handler(mut self, f: impl FnMut(&anyhow::Error) -> bool + Send + 'static) -> Self {
        self.error_handler = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn drop_overruns(mut self, drop: bool) -> Self {
        self.drop_overruns = drop;
        self
    }
}

struct BufferState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded policy buffer between the schedule's worker and the reader.
///
/// Notify registration happens before the state re-check (`enable`), so a
/// close or push between the check and the await cannot be missed.
struct ChimeBuffer<T> {
    state: Mutex<BufferState<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    readable: Notify,
    writable: Notify,
}

impl<T> ChimeBuffer<T> {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        ChimeBuffer {
            state: Mutex::new(BufferState {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Deliver one chime per the overflow policy. `false` means the read
    /// end is closed and the schedule should stop.
    async fn push(&self, value: T) -> bool {
        let mut value = Some(value);
        loop {
            let mut writable = pin!(self.writable.notified());
            writable.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return false;
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(value.take().expect("value present"));
                    self.readable.notify_one();
                    return true;
                }
                match self.policy {
                    OverflowPolicy::DropNewest => return true,
                    OverflowPolicy::Sliding => {
                        state.items.pop_front();
                        state.items.push_back(value.take().expect("value present"));
                        self.readable.notify_one();
                        return true;
                    }
                    OverflowPolicy::Block => {}
                }
            }
            writable.await;
        }
    }

    async fn recv(&self) -> Option<T> {
        loop {
            let mut readable = pin!(self.readable.notified());
            readable.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(value) = state.items.pop_front() {
                    self.writable.notify_one();
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            readable.await;
        }
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// Read end of a chime channel. Buffered chimes drain after the schedule
/// terminates; then [`recv`](ChimeStream::recv) returns `None`.
///
/// Closing (or dropping) the stream closes the schedule and the write end.
pub struct ChimeStream<T> {
    buffer: Arc<ChimeBuffer<T>>,
    handle: ScheduleHandle<T>,
}

impl<T> ChimeStream<T> {
    pub async fn recv(&self) -> Option<T> {
        self.buffer.recv().await
    }

    pub fn close(&self) {
        self.buffer.close();
        self.handle.close();
    }

    /// The underlying schedule, for queries such as `current_at`.
    pub fn handle(&self) -> &ScheduleHandle<T> {
        &self.handle
    }
}

impl<T> Drop for ChimeStream<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Schedule `times` so each chime is pushed into a bounded queue instead of
/// invoking a callback.
pub fn chime_ch<T, I>(times: I, options: ChannelOptions) -> ChimeStream<T>
where
    T: ToInstant + Clone + Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let buffer = Arc::new(ChimeBuffer::new(options.buffer, options.policy));

    let push_buffer = Arc::clone(&buffer);
    let handler_buffer = Arc::clone(&buffer);
    let finish_buffer = Arc::clone(&buffer);
    let mut user_handler = options.error_handler;
    let user_on_finished = options.on_finished;

    let schedule_options = ScheduleOptions::new()
        .clock(options.clock)
        .drop_overruns(options.drop_overruns)
        .error_handler(move |e| {
            // The read end going away is a shutdown signal, not a failure.
            if matches!(e.downcast_ref::<Error>(), Some(Error::ChannelClosed)) {
                return false;
            }
            let continue_schedule = match user_handler.as_mut() {
                Some(handler) => handler(e),
                None => {
                    tracing::warn!(error = %e, "chime delivery failed; continuing");
                    true
                }
            };
            if !continue_schedule {
                handler_buffer.close();
            }
            continue_schedule
        })
        .on_finished(move || {
            finish_buffer.close();
            if let Some(f) = user_on_finished {
                f();
            }
        });

    let handle = chime_at_with(
        times,
        move |t: T| {
            let buffer = Arc::clone(&push_buffer);
            async move {
                if buffer.push(t).await {
                    Ok(())
                } else {
                    Err(Error::ChannelClosed.into())
                }
            }
        },
        schedule_options,
    );

    ChimeStream { buffer, handle }
}
