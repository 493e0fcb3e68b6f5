//! Producer side: putting jobs into the system.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{pool::JobHandle, Shared};
use crate::{
    error::{Rejected, SystemError},
    job::Job,
    metrics,
    storage::StorageId,
};

/// Cloneable submission endpoint.
///
/// Unlike the [`SystemHandle`](crate::SystemHandle), submitters do not own the
/// completion receiver; handlers of their jobs run wherever the system handle
/// dispatches. Submitters do not keep a system alive once its handle is gone:
/// every submission is then rejected with [`SystemError::ShuttingDown`].
#[derive(Clone)]
pub struct Submitter {
    pub(crate) shared: Arc<Shared>,
}

impl Submitter {
    /// Parks `job` in the pool and admits it.
    ///
    /// Never performs I/O and never waits for it. The handler is called later
    /// by the dispatcher, exactly once. On rejection the handler has not been
    /// called and the job is handed back.
    pub fn submit(&self, job: Job) -> Result<JobHandle, Rejected> {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.is_shutting_down() {
            metrics::inc(&self.shared.metrics.jobs_rejected);
            return Err(Rejected {
                job,
                reason: SystemError::ShuttingDown,
            });
        }
        let action = job.action();
        let handle = inner.pool.allocate(job).map_err(|(job, reason)| {
            metrics::inc(&self.shared.metrics.jobs_rejected);
            debug!(system = self.shared.id, ?action, %reason, "job rejected");
            Rejected { job, reason }
        })?;
        metrics::inc(&self.shared.metrics.jobs_submitted);
        trace!(system = self.shared.id, ?action, ?handle, "job submitted");
        inner.admit(handle);
        Ok(handle)
    }

    /// Flags a job that has not started executing. Returns `false` if the job
    /// is already executing or finished.
    ///
    /// An aborted job still has its handler called, with
    /// [`StorageError::OperationAborted`](crate::StorageError::OperationAborted).
    pub fn abort(&self, handle: JobHandle) -> bool {
        self.shared.inner.lock().unwrap().abort(handle)
    }

    /// Aborts every job of `storage` that has not started executing yet and
    /// returns how many were flagged.
    pub fn abort_storage(&self, storage: StorageId) -> usize {
        self.shared.inner.lock().unwrap().abort_storage(storage)
    }
}
