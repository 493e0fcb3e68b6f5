//! The storage fence protocol.
//!
//! Every storage unit with work in the system has a [`StorageFence`]. A fence
//! job (move, rename, delete, release, check, stop, file priority) raises it
//! and then runs alone: it waits for the jobs admitted before it to finish
//! (`outstanding`), and every job submitted while it is raised is parked in
//! the fence-wait queue. When the fence job finishes, the fence is lowered and
//! the waiters are re-admitted in FIFO order; a waiting fence job re-raises it
//! and leaves the waiters behind it queued again.
//!
//! Aborted jobs are failed without executing the moment they are admitted or
//! popped from the execution queue. An aborted fence job that had already
//! raised the fence lowers it again right away, so it never holds up the jobs
//! queued behind it.
//!
//! All functions here run with the system mutex held.

use nix::errno::Errno;
use tracing::{debug, error, trace};

use super::{pool::JobHandle, queue::WaitQueue, Inner, State};
use crate::{
    error::{FileOperation, StorageError},
    job::{Job, JobFlags, JobResult},
    metrics,
    storage::StorageId,
};

#[derive(Debug, Default)]
pub(crate) struct StorageFence {
    raised: bool,
    /// Admitted jobs that have not finished yet: queued for execution or
    /// executing. The fence holder counts too.
    outstanding: usize,
    /// Fence job that raised the fence but waits for `outstanding` to drop to
    /// zero before it may execute.
    pending_fence: Option<JobHandle>,
    waiters: WaitQueue,
}

impl StorageFence {
    #[cfg(test)]
    pub(crate) fn is_raised(&self) -> bool {
        self.raised
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        self.waiters.len() + usize::from(self.pending_fence.is_some())
    }

    fn is_idle(&self) -> bool {
        !self.raised
            && self.outstanding == 0
            && self.pending_fence.is_none()
            && self.waiters.is_empty()
    }
}

enum Admission {
    Execute,
    Wait,
    PendingFence,
}

impl Inner {
    fn resident(&mut self, handle: JobHandle) -> &mut Job {
        match self.pool.resident_mut(handle) {
            Some(job) => job,
            None => panic!("implementation error: job {handle:?} is not owned by the pool"),
        }
    }

    /// Decides whether a freshly submitted (or re-admitted) job runs now, waits
    /// behind the fence of its storage, or is failed right away.
    pub(crate) fn admit(&mut self, handle: JobHandle) {
        let job = self.resident(handle);
        if job.is_aborted() {
            self.fast_fail(handle);
            return;
        }
        job.set_flag(JobFlags::IN_PROGRESS);
        let is_fence = job.is_fence();
        let storage = job.storage().id();

        let fence = self.fences.entry(storage).or_default();
        let admission = if fence.raised {
            fence.waiters.push_back(&mut self.pool, handle);
            Admission::Wait
        } else if is_fence {
            fence.raised = true;
            metrics::inc(&self.metrics.fences_raised);
            debug!(%storage, ?handle, "fence raised");
            if fence.outstanding > 0 {
                debug_assert!(fence.pending_fence.is_none());
                fence.pending_fence = Some(handle);
                Admission::PendingFence
            } else {
                fence.outstanding += 1;
                Admission::Execute
            }
        } else {
            fence.outstanding += 1;
            Admission::Execute
        };

        match admission {
            Admission::Execute => self.push_execution(handle),
            Admission::Wait | Admission::PendingFence => {
                self.pool.set_blocked(handle, true);
                metrics::inc(&self.metrics.jobs_blocked);
                trace!(%storage, ?handle, pending_fence = matches!(admission, Admission::PendingFence), "job waits on fence");
            }
        }
    }

    fn push_execution(&mut self, handle: JobHandle) {
        self.execution.push_back(&mut self.pool, handle);
        trace!(?handle, queued = self.execution.len(), "job queued for execution");
        self.work_available.notify_one();
    }

    /// Records the aborted result and posts the job without executing it.
    ///
    /// Does not touch the fence; callers that already counted the job as
    /// outstanding follow up with [`Self::job_finished`].
    fn fast_fail(&mut self, handle: JobHandle) {
        let job = self.resident(handle);
        debug!(action = ?job.action(), storage = %job.storage().id(), ?handle, "fast-failing aborted job");
        job.set_result(JobResult::aborted());
        self.pool.complete_resident(handle);
        metrics::inc(&self.metrics.jobs_aborted);
        self.post(handle);
    }

    /// Hands a completed job to the dispatcher.
    pub(crate) fn post(&mut self, handle: JobHandle) {
        if self.completions.send(handle).is_err() {
            // The receiver lives in the SystemHandle; once that is gone nobody
            // will run handlers anymore.
            debug!(?handle, "completion dropped, dispatcher is gone");
        }
    }

    /// Pops the next job to execute, failing aborted ones on the way.
    pub(crate) fn next_ready(&mut self) -> Option<(JobHandle, Job)> {
        while let Some(handle) = self.execution.pop_front(&mut self.pool) {
            if self.resident(handle).is_aborted() {
                self.fail_queued(handle);
                continue;
            }
            self.executing += 1;
            let job = self.pool.take_for_execution(handle);
            trace!(action = ?job.action(), storage = %job.storage().id(), ?handle, "job handed to worker");
            return Some((handle, job));
        }
        None
    }

    /// Takes back a job from a worker and releases whatever waited on it.
    ///
    /// A success reported for a read or hash job that never received its
    /// buffer or digest is turned into an `EIO` failure, so the handler still
    /// runs.
    pub(crate) fn complete(&mut self, handle: JobHandle, mut job: Job, mut result: JobResult) {
        let storage = job.storage().id();
        let was_fence = job.is_fence();
        if result.is_ok() && job.lacks_output() {
            error!(action = ?job.action(), %storage, ?handle, "job reported success without its output, failing it");
            result = JobResult::failed(StorageError::filesystem(
                Errno::EIO,
                FileOperation::Read,
                job.storage().save_path(),
                None,
            ));
        }
        trace!(action = ?job.action(), %storage, ?handle, status = ?result.status, "job completed");
        job.set_result(result);
        self.pool.put_completed(handle, job);
        self.executing -= 1;
        self.post(handle);
        self.job_finished(storage, was_fence);
        if self.state == State::ShuttingDown && self.executing == 0 {
            // idle workers exit now
            self.work_available.notify_waiters();
        }
    }

    /// Fails a job popped from the execution queue. It was counted as
    /// outstanding, and holds the fence if it is a fence job.
    fn fail_queued(&mut self, handle: JobHandle) {
        let job = self.resident(handle);
        let storage = job.storage().id();
        let was_fence = job.is_fence();
        self.fast_fail(handle);
        self.job_finished(storage, was_fence);
    }

    fn job_finished(&mut self, storage: StorageId, mut fence_holder: bool) {
        loop {
            let Some(fence) = self.fences.get_mut(&storage) else {
                panic!("implementation error: no fence state for {storage}");
            };
            assert!(
                fence.outstanding > 0,
                "implementation error: {storage} finished more jobs than it admitted"
            );
            fence.outstanding -= 1;

            if fence_holder {
                debug_assert!(fence.raised);
                debug_assert_eq!(fence.outstanding, 0, "fence holder ran alongside other jobs");
                fence.raised = false;
                let mut waiters = fence.waiters.take();
                debug!(%storage, waiters = waiters.len(), "fence lowered");
                while let Some(handle) = waiters.pop_front(&mut self.pool) {
                    self.pool.set_blocked(handle, false);
                    self.admit(handle);
                }
                break;
            }

            if fence.outstanding == 0 {
                if let Some(handle) = fence.pending_fence.take() {
                    fence.outstanding += 1;
                    self.pool.set_blocked(handle, false);
                    if self.resident(handle).is_aborted() {
                        // The fence was raised for it; lower it again.
                        self.fast_fail(handle);
                        fence_holder = true;
                        continue;
                    }
                    self.push_execution(handle);
                }
            }
            break;
        }
        self.release_idle(storage);
    }

    fn release_idle(&mut self, storage: StorageId) {
        if self.fences.get(&storage).is_some_and(StorageFence::is_idle) {
            self.fences.remove(&storage);
            trace!(%storage, "fence state released");
        }
    }

    /// Flags a job that has not started executing yet. It is failed when it
    /// reaches the front of whatever queue it sits in.
    pub(crate) fn abort(&mut self, handle: JobHandle) -> bool {
        if !self.pool.contains(handle) {
            return false;
        }
        match self.pool.resident_mut(handle) {
            Some(job) => {
                job.set_flag(JobFlags::ABORTED);
                debug!(action = ?job.action(), ?handle, "job aborted");
                true
            }
            None => false,
        }
    }

    /// Flags every not yet executing job of `storage`.
    pub(crate) fn abort_storage(&mut self, storage: StorageId) -> usize {
        let aborted = self.abort_where(|job| job.storage().id() == storage);
        debug!(%storage, aborted, "storage jobs aborted");
        aborted
    }

    fn abort_where(&mut self, mut pred: impl FnMut(&Job) -> bool) -> usize {
        let mut aborted = 0;
        for job in self.pool.resident_jobs_mut() {
            if !job.is_aborted() && pred(job) {
                job.set_flag(JobFlags::ABORTED);
                aborted += 1;
            }
        }
        aborted
    }

    /// Stops accepting work and fails everything that has not started yet.
    ///
    /// Jobs parked behind an executing fence job are failed once it completes.
    pub(crate) fn shut_down(&mut self) {
        if self.state == State::ShuttingDown {
            return;
        }
        self.state = State::ShuttingDown;
        let aborted = self.abort_where(|_| true);
        while let Some(handle) = self.execution.pop_front(&mut self.pool) {
            self.fail_queued(handle);
        }
        debug!(aborted, executing = self.executing, "system shutting down");
        self.work_available.notify_waiters();
    }
}
