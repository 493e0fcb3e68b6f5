//! Execution side: taking admitted jobs and reporting them back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn};

use super::{pool::JobHandle, Shared};
use crate::{
    backend::{self, DiskBackend},
    job::{Job, JobResult},
};

/// Cloneable worker side of a [`System`](crate::System).
///
/// Anything that executes jobs holds one: the threads of a [`WorkerPool`],
/// an async task calling [`run`](Self::run), or a test stepping through
/// [`next_ready`](Self::next_ready) by hand.
#[derive(Clone)]
pub struct WorkerHandle {
    pub(crate) shared: Arc<Shared>,
}

/// A job moved out to a worker.
///
/// Must be finished with [`complete`](Self::complete) or
/// [`execute`](Self::execute). Dropping it unfinished completes the job as
/// aborted, so its fence is still released and its handler still called.
pub struct ReadyJob {
    handle: JobHandle,
    job: Option<Job>,
    shared: Arc<Shared>,
}

impl ReadyJob {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn job(&self) -> &Job {
        match &self.job {
            Some(job) => job,
            None => unreachable!("job is only taken when the ReadyJob is consumed"),
        }
    }

    /// Runs the job against `backend` and completes it with the outcome.
    ///
    /// If the backend panics, the job stays in `self` and `Drop` completes it
    /// as aborted.
    pub fn execute(mut self, backend: &dyn DiskBackend) {
        let Some(job) = self.job.as_mut() else {
            unreachable!("job is only taken when the ReadyJob is consumed")
        };
        let result = backend::execute(job, backend);
        let Some(job) = self.job.take() else {
            unreachable!("job is only taken when the ReadyJob is consumed")
        };
        self.finish(job, result);
    }

    /// Reports the job as finished with `result`.
    pub fn complete(mut self, result: JobResult) {
        let Some(job) = self.job.take() else {
            unreachable!("job is only taken when the ReadyJob is consumed")
        };
        self.finish(job, result);
    }

    fn finish(&self, job: Job, result: JobResult) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .complete(self.handle, job, result);
    }
}

impl Drop for ReadyJob {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            warn!(action = ?job.action(), handle = ?self.handle, "ready job dropped unfinished, completing it as aborted");
            self.finish(job, JobResult::aborted());
        }
    }
}

impl std::fmt::Debug for ReadyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyJob")
            .field("handle", &self.handle)
            .field("job", &self.job)
            .finish()
    }
}

impl WorkerHandle {
    /// Takes the next admitted job, if any. Never waits.
    pub fn next_ready(&self) -> Option<ReadyJob> {
        let (handle, job) = self.shared.inner.lock().unwrap().next_ready()?;
        Some(ReadyJob {
            handle,
            job: Some(job),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Waits for the next admitted job.
    ///
    /// Resolves to `None` once the system is shutting down and there is
    /// nothing left to execute.
    pub async fn ready(&self) -> Option<ReadyJob> {
        loop {
            let mut notified = std::pin::pin!(self.shared.work_available.notified());
            // register before checking so a notify in between is not lost
            notified.as_mut().enable();
            {
                let mut inner = self.shared.inner.lock().unwrap();
                if let Some((handle, job)) = inner.next_ready() {
                    return Some(ReadyJob {
                        handle,
                        job: Some(job),
                        shared: Arc::clone(&self.shared),
                    });
                }
                if inner.is_shutting_down() && inner.executing == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Executes jobs against `backend` until the system shuts down or `cancel`
    /// fires.
    ///
    /// Backends do blocking I/O, so drive this on a dedicated thread (as
    /// [`WorkerPool`] does) or inside `spawn_blocking`.
    pub async fn run(&self, backend: &dyn DiskBackend, cancel: &CancellationToken) {
        loop {
            let ready = tokio::select! {
                ready = self.ready() => ready,
                _ = cancel.cancelled() => {
                    debug!("worker cancelled");
                    return;
                }
            };
            let Some(ready) = ready else {
                debug!("no work left, system is shutting down");
                return;
            };
            ready.execute(backend);
        }
    }
}

/// A fixed set of OS threads executing jobs of one system.
pub struct WorkerPool {
    threads: Vec<std::thread::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawns `threads` threads named `disk-io-worker-{i}`, each running
    /// [`WorkerHandle::run`].
    pub fn spawn(
        worker: WorkerHandle,
        backend: Arc<dyn DiskBackend>,
        threads: usize,
    ) -> std::io::Result<WorkerPool> {
        let mut pool = WorkerPool {
            threads: Vec::with_capacity(threads),
            cancel: CancellationToken::new(),
        };
        for i in 0..threads {
            let worker = worker.clone();
            let backend = Arc::clone(&backend);
            let cancel = pool.cancel.clone();
            let system = worker.shared.id;
            // on error, dropping `pool` stops the threads spawned so far
            let jh = std::thread::Builder::new()
                .name(format!("disk-io-worker-{i}"))
                .spawn(move || {
                    let _entered = info_span!("worker", worker = i, system).entered();
                    debug!("worker start");
                    scopeguard::defer_on_unwind! {tracing::error!("worker panic")};
                    futures::executor::block_on(worker.run(&*backend, &cancel));
                    debug!("worker exit");
                })?;
            pool.threads.push(jh);
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Asks the threads to exit after their current job. Queued jobs stay
    /// queued.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits for all threads to exit, i.e. until [`Self::stop`] was called or
    /// the system shut down.
    pub fn join(mut self) -> std::thread::Result<()> {
        for jh in std::mem::take(&mut self.threads) {
            jh.join()?;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.cancel.cancel();
        }
    }
}
