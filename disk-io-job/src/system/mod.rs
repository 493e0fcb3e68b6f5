//! The job system: pool, queues, fence protocol, dispatcher and workers.
//!
//! All mutable state of one system lives in [`Inner`] behind a single mutex.
//! Job execution and handler invocation both happen outside of it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{mpsc, Notify};

use crate::{
    metrics::{self, JobMetricsStorage},
    storage::StorageId,
};

pub(crate) mod completion;
pub(crate) mod fence;
pub(crate) mod lifecycle;
pub(crate) mod pool;
pub(crate) mod queue;
pub(crate) mod submission;
pub(crate) mod worker;
#[cfg(test)]
mod test_util;

use self::{
    fence::StorageFence,
    pool::{JobHandle, JobPool},
    queue::WaitQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Running,
    ShuttingDown,
}

/// State shared by the [`SystemHandle`](crate::SystemHandle), the
/// [`Submitter`](crate::Submitter)s and the [`WorkerHandle`](crate::WorkerHandle)s.
pub(crate) struct Shared {
    pub(crate) id: usize,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) work_available: Arc<Notify>,
    pub(crate) metrics: Arc<JobMetricsStorage>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        metrics::inc(&metrics::GLOBAL.systems_destroyed);
        tracing::debug!(system = self.id, "system dropped");
    }
}

pub(crate) struct Inner {
    pub(crate) state: State,
    pub(crate) pool: JobPool,
    /// Jobs admitted to execution, in admission order.
    pub(crate) execution: WaitQueue,
    /// Fence state of every storage unit with queued or executing jobs.
    pub(crate) fences: HashMap<StorageId, StorageFence>,
    /// Jobs moved out to a worker and not yet completed.
    pub(crate) executing: usize,
    pub(crate) completions: mpsc::UnboundedSender<JobHandle>,
    pub(crate) work_available: Arc<Notify>,
    pub(crate) metrics: Arc<JobMetricsStorage>,
}

impl Inner {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.state == State::ShuttingDown
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("state", &self.state)
            .field("pool", &self.pool)
            .field("execution", &self.execution.len())
            .field("fences", &self.fences)
            .field("executing", &self.executing)
            .finish()
    }
}
