//! Pooled disk I/O jobs with per-storage fences and exactly-once completion
//! dispatch.
//!
//! # Usage
//!
//! 1. Launch a [`System`] to get a [`SystemHandle`] and a [`WorkerHandle`].
//! 2. Hand the [`WorkerHandle`] to whatever executes jobs, usually a
//!    [`WorkerPool`] running against your [`DiskBackend`].
//! 3. Build a [`Job`] with the constructor of its action, passing the
//!    completion handler, and [`submit`](SystemHandle::submit) it. Submission
//!    never performs I/O.
//! 4. Call [`dispatch_ready`](SystemHandle::dispatch_ready) (e.g. once per
//!    event loop tick) or await [`completed`](SystemHandle::completed) to run
//!    the handlers of finished jobs on your side.
//!
//! Whole-storage actions (move, rename, delete, release, check, stop, file
//! priority) are *fence* jobs: a fence job waits for the jobs submitted before
//! it on the same storage unit, then runs alone; jobs submitted after it wait
//! until it finished. Storage units never wait on each other.
//!
//! Every submitted job has its handler called exactly once, also when it was
//! aborted: aborted jobs are failed with [`StorageError::OperationAborted`]
//! without touching the backend.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use disk_io_job::{Config, IoArgs, Job, PieceIndex, Storage, StorageId, System};
//!
//! let (mut system, worker) = System::launch(Config::default());
//! let storage = Storage::new(StorageId(0), "/tmp/downloads", 1);
//!
//! let result = Arc::new(Mutex::new(None));
//! let job = Job::read(storage, PieceIndex(0), IoArgs::new(0, 16 * 1024), {
//!     let result = Arc::clone(&result);
//!     move |res| *result.lock().unwrap() = Some(res)
//! });
//! let handle = system.submit(job).unwrap();
//! // nobody took it yet: abort it instead
//! assert!(system.abort(handle));
//! let ready = worker.next_ready();
//! assert!(ready.is_none());
//! assert_eq!(system.dispatch_ready(), 1);
//! assert!(result.lock().unwrap().take().unwrap().is_err());
//! ```

mod backend;
mod config;
mod error;
mod job;
pub mod metrics;
pub mod priority;
mod storage;
mod system;

pub use backend::DiskBackend;
pub use config::Config;
pub use error::{FileOperation, Rejected, StorageError, SystemError};
pub use job::{
    CheckHandler, ClearPieceHandler, DownloadPriority, FileIndex, FilePriorityHandler,
    Hash2Handler, HashHandler, IoArgs, Job, JobAction, JobFlags, JobResult, MoveFlags,
    MoveHandler, Payload, PieceIndex, ReadHandler, ReleaseHandler, RemoveFlags, RenameHandler,
    ResumeParams, Sha1Hash, Sha256Hash, Status, Target, WriteHandler,
};
pub use metrics::JobMetrics;
pub use storage::{Storage, StorageId};
pub use system::lifecycle::handle::SystemHandle;
pub use system::lifecycle::System;
pub use system::pool::JobHandle;
pub use system::submission::Submitter;
pub use system::worker::{ReadyJob, WorkerHandle, WorkerPool};

pub use disk_io_common::DiskBuffer;

#[doc(hidden)]
pub mod env_tunables {
    pub(crate) static INITIAL_POOL_CAPACITY: once_cell::sync::Lazy<usize> =
        once_cell::sync::Lazy::new(|| {
            parse("DISK_IO_JOB_INITIAL_POOL_CAPACITY").unwrap_or(64)
        });
    pub(crate) static MAX_POOL_CAPACITY: once_cell::sync::Lazy<Option<usize>> =
        once_cell::sync::Lazy::new(|| parse("DISK_IO_JOB_MAX_POOL_CAPACITY")); // default unlimited
    pub(crate) static DISPATCH_BATCH: once_cell::sync::Lazy<usize> =
        once_cell::sync::Lazy::new(|| {
            parse("DISK_IO_JOB_DISPATCH_BATCH").unwrap_or(0) // default: everything ready
        });

    fn parse(var: &str) -> Option<usize> {
        match std::env::var(var) {
            Ok(v) => match v.parse() {
                Ok(n) => Some(n),
                Err(e) => panic!("{var} must be a non-negative integer: {e}"),
            },
            Err(std::env::VarError::NotPresent) => None,
            Err(std::env::VarError::NotUnicode(_)) => panic!("{var} must be a unicode string"),
        }
    }

    pub fn assert_no_unknown_env_vars() {
        std::env::vars()
            .filter_map(|(v, _)| {
                if v.starts_with("DISK_IO_JOB_") {
                    Some(v)
                } else {
                    None
                }
            })
            .for_each(|v| match v.as_str() {
                "DISK_IO_JOB_INITIAL_POOL_CAPACITY"
                | "DISK_IO_JOB_MAX_POOL_CAPACITY"
                | "DISK_IO_JOB_DISPATCH_BATCH" => {}
                x => panic!("env var starts with DISK_IO_JOB_ but is not an env_tunable: {x:?}"),
            });
    }
}
