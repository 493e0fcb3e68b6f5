//! Submitter side of the completion hand-off.
//!
//! Workers (and the fast-fail path) post the handle of every finished job to an
//! unbounded channel. The [`Dispatcher`] is its only consumer: it moves the job
//! out of the pool, calls the handler outside of the system mutex and then
//! returns the slot to the pool, also if the handler panics.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use super::{pool::JobHandle, Shared};
use crate::metrics;

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<JobHandle>,
    /// Max handlers per [`Self::dispatch_ready`]; 0 means no limit.
    batch: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        rx: mpsc::UnboundedReceiver<JobHandle>,
        batch: usize,
    ) -> Self {
        Dispatcher { shared, rx, batch }
    }

    /// Runs the handlers of all jobs that completed so far, up to the batch
    /// limit. Never waits.
    pub(crate) fn dispatch_ready(&mut self) -> usize {
        let limit = if self.batch == 0 {
            usize::MAX
        } else {
            self.batch
        };
        let mut dispatched = 0;
        while dispatched < limit {
            match self.rx.try_recv() {
                Ok(handle) => {
                    self.dispatch(handle);
                    dispatched += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    unreachable!("the sender lives in the shared state we hold")
                }
            }
        }
        dispatched
    }

    /// Waits for at least one completion, then behaves like
    /// [`Self::dispatch_ready`].
    pub(crate) async fn completed(&mut self) -> usize {
        let Some(handle) = self.rx.recv().await else {
            unreachable!("the sender lives in the shared state we hold")
        };
        self.dispatch(handle);
        1 + self.dispatch_ready()
    }

    fn dispatch(&self, handle: JobHandle) {
        let job = self
            .shared
            .inner
            .lock()
            .unwrap()
            .pool
            .take_for_dispatch(handle);
        trace!(action = ?job.action(), ?handle, "dispatching completion");
        let shared = &self.shared;
        scopeguard::defer! {
            shared.inner.lock().unwrap().pool.free(handle);
        }
        job.call_handler();
        metrics::inc(&shared.metrics.jobs_completed);
    }
}
