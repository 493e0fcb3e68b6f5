use std::{fmt, path::PathBuf};

use nix::errno::Errno;

use crate::job::{FileIndex, Job};

/// The file system operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Open,
    Read,
    Write,
    Stat,
    Mkdir,
    Rename,
    Remove,
    HardLink,
    Truncate,
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOperation::Open => "open",
            FileOperation::Read => "read",
            FileOperation::Write => "write",
            FileOperation::Stat => "stat",
            FileOperation::Mkdir => "mkdir",
            FileOperation::Rename => "rename",
            FileOperation::Remove => "remove",
            FileOperation::HardLink => "hard link",
            FileOperation::Truncate => "truncate",
        };
        f.write_str(s)
    }
}

/// The error record of a finished job.
///
/// Every outcome, including aborts, reaches the submitter through the job's
/// completion handler; nothing is propagated across the worker boundary any
/// other way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{operation} {}: {errno}", path.display())]
    Filesystem {
        errno: Errno,
        path: PathBuf,
        file: Option<FileIndex>,
        operation: FileOperation,
    },
    #[error("operation aborted")]
    OperationAborted,
}

impl StorageError {
    pub fn filesystem(
        errno: Errno,
        operation: FileOperation,
        path: impl Into<PathBuf>,
        file: Option<FileIndex>,
    ) -> Self {
        StorageError::Filesystem {
            errno,
            path: path.into(),
            file,
            operation,
        }
    }

    /// Maps an [`std::io::Error`] from a backend. Errors without an OS code
    /// are reported as `EIO`.
    pub fn from_io(
        err: &std::io::Error,
        operation: FileOperation,
        path: impl Into<PathBuf>,
        file: Option<FileIndex>,
    ) -> Self {
        let errno = err.raw_os_error().map(Errno::from_i32).unwrap_or(Errno::EIO);
        Self::filesystem(errno, operation, path, file)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, StorageError::OperationAborted)
    }

    /// The path the failure happened on, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            StorageError::Filesystem { path, .. } => Some(path),
            StorageError::OperationAborted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemError {
    #[error("shutting down")]
    ShuttingDown,
    #[error("job pool exhausted: {capacity} slots in use")]
    PoolExhausted { capacity: usize },
}

/// A job the system refused to take. The handler has not been invoked; the
/// job is handed back so the caller can run or drop it.
#[derive(thiserror::Error)]
#[error("disk-io-job: submission rejected: {reason}")]
pub struct Rejected {
    pub job: Job,
    #[source]
    pub reason: SystemError,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("job", &self.job)
            .field("reason", &self.reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_error_display_carries_path_and_code() {
        let err = StorageError::filesystem(
            Errno::ENOENT,
            FileOperation::Open,
            "/data/a.bin",
            Some(FileIndex(2)),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("open /data/a.bin: ENOENT"), "{msg}");
        assert_eq!(err.path(), Some(std::path::Path::new("/data/a.bin")));
        assert!(!err.is_aborted());
    }

    #[test]
    fn io_error_without_os_code_maps_to_eio() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = StorageError::from_io(&io, FileOperation::Write, "/x", None);
        assert!(matches!(
            err,
            StorageError::Filesystem {
                errno: Errno::EIO,
                ..
            }
        ));

        let io = std::io::Error::from_raw_os_error(Errno::ENOSPC as i32);
        let err = StorageError::from_io(&io, FileOperation::Write, "/x", None);
        assert!(matches!(
            err,
            StorageError::Filesystem {
                errno: Errno::ENOSPC,
                ..
            }
        ));
    }
}
