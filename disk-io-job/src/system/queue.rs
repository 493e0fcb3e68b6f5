//! Intrusive FIFO of pooled jobs.
//!
//! The list is threaded through the `next` link of the pool slots, so pushing
//! and popping never allocate. A job can be in at most one [`WaitQueue`] at a
//! time; the queue does not enforce that itself. Callers (the fence protocol
//! and the execution queue) keep the discipline, and debug builds assert it
//! through the slot's `linked` check.
//!
//! The same structure backs the execution queue, each storage's fence-wait
//! queue, and is available to a block cache for jobs waiting on a piece.

use super::pool::{JobHandle, JobPool};

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        WaitQueue {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back(&mut self, pool: &mut JobPool, handle: JobHandle) {
        let index = handle.index();
        debug_assert!(pool.contains(handle), "queueing a dead job {handle:?}");
        pool.set_linked(index, true);
        pool.link(index, None);
        match self.tail {
            Some(tail) => pool.link(tail, Some(index)),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    pub(crate) fn pop_front(&mut self, pool: &mut JobPool) -> Option<JobHandle> {
        let index = self.head?;
        self.head = pool.next(index);
        if self.head.is_none() {
            self.tail = None;
        }
        pool.link(index, None);
        pool.set_linked(index, false);
        self.len -= 1;
        Some(pool.handle_at(index))
    }

    /// Detaches the whole list in O(1), leaving `self` empty.
    ///
    /// Used to re-admit waiters in order while new arrivals go to the fresh,
    /// empty queue.
    pub(crate) fn take(&mut self) -> WaitQueue {
        std::mem::take(self)
    }

    /// Empties the queue, returning its members in FIFO order.
    #[cfg(test)]
    pub(crate) fn drain(&mut self, pool: &mut JobPool) -> Vec<JobHandle> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(handle) = self.pop_front(pool) {
            out.push(handle);
        }
        out
    }

    /// Walks the members front to back without unlinking them.
    #[cfg(test)]
    pub(crate) fn iter<'a>(&self, pool: &'a JobPool) -> impl Iterator<Item = JobHandle> + 'a {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let index = cur?;
            cur = pool.next(index);
            Some(pool.handle_at(index))
        })
    }
}
