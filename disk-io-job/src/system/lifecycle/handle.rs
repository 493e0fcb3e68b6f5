//! Owned handle to a [`System::launch`](crate::System::launch)ed system.

use std::sync::Arc;

use tracing::info;

use crate::{
    error::Rejected,
    job::Job,
    metrics::JobMetrics,
    storage::StorageId,
    system::{completion::Dispatcher, pool::JobHandle, submission::Submitter, Shared},
};

/// Producer side of a [`System`](crate::System).
///
/// Owns the only completion receiver, so handlers of all jobs run wherever
/// this handle calls [`dispatch_ready`](Self::dispatch_ready) or
/// [`completed`](Self::completed). Use [`submitter`](Self::submitter) to
/// submit from other places.
///
/// Call [`shutdown`](Self::shutdown) for an orderly shutdown that waits until
/// every handler ran. Alternatively, `drop` will also initiate shutdown, but
/// handlers of jobs that complete afterwards are dropped without being called.
///
/// This handle is [`Send`] but not [`Clone`].
pub struct SystemHandle {
    submitter: Submitter,
    dispatcher: Dispatcher,
}

impl SystemHandle {
    pub(crate) fn new(shared: Arc<Shared>, dispatcher: Dispatcher) -> Self {
        SystemHandle {
            submitter: Submitter { shared },
            dispatcher,
        }
    }

    fn shared(&self) -> &Shared {
        &self.submitter.shared
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> std::sync::MutexGuard<'_, crate::system::Inner> {
        self.shared().inner.lock().unwrap()
    }

    /// See [`Submitter::submit`].
    pub fn submit(&self, job: Job) -> Result<JobHandle, Rejected> {
        self.submitter.submit(job)
    }

    /// See [`Submitter::abort`].
    pub fn abort(&self, handle: JobHandle) -> bool {
        self.submitter.abort(handle)
    }

    /// See [`Submitter::abort_storage`].
    pub fn abort_storage(&self, storage: StorageId) -> usize {
        self.submitter.abort_storage(storage)
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Runs the handlers of completed jobs on the calling thread and returns
    /// how many ran. Never waits. With a configured
    /// [`dispatch_batch`](crate::Config::dispatch_batch), runs at most that many.
    pub fn dispatch_ready(&mut self) -> usize {
        self.dispatcher.dispatch_ready()
    }

    /// Waits until at least one job completed, then runs the handlers of all
    /// completed jobs (subject to the batch limit).
    pub async fn completed(&mut self) -> usize {
        self.dispatcher.completed().await
    }

    /// Stops accepting jobs and aborts every job that has not started
    /// executing. Idempotent.
    ///
    /// After this returns, [`submit`](Self::submit) fails with
    /// [`SystemError::ShuttingDown`](crate::SystemError::ShuttingDown). Jobs
    /// that are already executing run to completion; workers exit once no
    /// work is left.
    pub fn initiate_shutdown(&self) {
        self.shared().inner.lock().unwrap().shut_down();
    }

    /// Orderly shutdown: initiates it, then dispatches completions until every
    /// job's handler ran.
    ///
    /// Jobs that are executing must be completed by some worker for this to
    /// finish.
    pub async fn shutdown(mut self) {
        let id = self.shared().id;
        info!(system = id, "shutdown start");
        self.initiate_shutdown();
        loop {
            self.dispatch_ready();
            if self.jobs_in_flight() == 0 {
                break;
            }
            self.completed().await;
        }
        info!(system = id, "shutdown end");
    }

    /// Jobs submitted whose handler has not run yet.
    pub fn jobs_in_flight(&self) -> usize {
        self.shared().inner.lock().unwrap().pool.in_use()
    }

    pub fn metrics(&self) -> JobMetrics {
        self.shared().metrics.make_pub()
    }
}

impl Drop for SystemHandle {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.initiate_shutdown();
        // Handlers of jobs that already completed can still run here.
        self.dispatch_ready();
    }
}
