use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::Error;

/// Shared FIFO backing a mutable schedule.
///
/// Appends and the scheduler's pop are linearized by the mutex. The most
/// recently queued time is remembered across pops so relative appends keep
/// an anchor after the queue drains.
pub(crate) struct TimeQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    last: Option<T>,
    closed: bool,
}

impl<T: Clone> TimeQueue<T> {
    pub(crate) fn seeded(times: impl IntoIterator<Item = T>) -> Self {
        let items: VecDeque<T> = times.into_iter().collect();
        let last = items.back().cloned();
        TimeQueue {
            inner: Mutex::new(QueueInner {
                items,
                last,
                closed: false,
            }),
        }
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Append in order. A no-op once the schedule has terminated.
    pub(crate) fn append(&self, times: impl IntoIterator<Item = T>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        for t in times {
            inner.last = Some(t.clone());
            inner.items.push_back(t);
        }
    }

    /// Append `offset(last)` where `last` is the most recently queued time
    /// (surviving pops). Errors when the queue was never seeded.
    pub(crate) fn append_relative_to_last<F>(&self, offset: F) -> Result<(), Error>
    where
        F: FnOnce(&T) -> T,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Ok(());
        }
        let last = inner.last.as_ref().ok_or(Error::NoLastTime)?;
        let next = offset(last);
        inner.last = Some(next.clone());
        inner.items.push_back(next);
        Ok(())
    }

    /// Mark the schedule terminated; later appends become no-ops.
    pub(crate) fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let q = TimeQueue::seeded([1, 2, 3]);
        assert_eq!(q.pop(), Some(1));
        q.append([4]);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn relative_append_anchors_on_the_last_queued_time() {
        let q = TimeQueue::seeded([10]);
        assert_eq!(q.pop(), Some(10));
        // The anchor survives the pop.
        q.append_relative_to_last(|last| last + 5).unwrap();
        assert_eq!(q.pop(), Some(15));
        q.append_relative_to_last(|last| last + 5).unwrap();
        assert_eq!(q.pop(), Some(20));
    }

    #[test]
    fn relative_append_without_a_seed_errors() {
        let q: TimeQueue<i64> = TimeQueue::seeded([]);
        assert!(matches!(
            q.append_relative_to_last(|last| last + 1),
            Err(Error::NoLastTime)
        ));
    }

    #[test]
    fn appends_after_close_are_no_ops() {
        let q = TimeQueue::seeded([1]);
        q.close();
        q.append([2]);
        q.append_relative_to_last(|last| last + 1).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
    }
}
