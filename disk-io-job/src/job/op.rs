//! Per-action payload and completion handler, paired in one sum type.
//!
//! Each [`JobOp`] variant carries exactly the inputs its action needs, the
//! slot its output is written to, and the handler signature of its action
//! family, so a write job with a move handler cannot be built.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use disk_io_common::DiskBuffer;

use super::{
    DownloadPriority, FileIndex, IoArgs, JobAction, JobResult, MoveFlags, PieceIndex,
    RemoveFlags, ResumeParams, Sha1Hash, Sha256Hash, Status, Target,
};
use crate::error::StorageError;

/// `read` and `partial_read`. An error means no buffer is delivered.
pub type ReadHandler = Box<dyn FnOnce(Result<DiskBuffer, StorageError>) + Send>;
/// `write` and `delete_files`.
pub type WriteHandler = Box<dyn FnOnce(Result<(), StorageError>) + Send>;
pub type HashHandler = Box<dyn FnOnce(PieceIndex, Result<Sha1Hash, StorageError>) + Send>;
pub type Hash2Handler = Box<dyn FnOnce(PieceIndex, Result<Sha256Hash, StorageError>) + Send>;
/// Receives the save path in effect after the job, also on failure.
pub type MoveHandler = Box<dyn FnOnce(Status, PathBuf, Result<(), StorageError>) + Send>;
/// `release_files` and `stop_torrent`.
pub type ReleaseHandler = Box<dyn FnOnce() + Send>;
pub type CheckHandler = Box<dyn FnOnce(Status, Result<(), StorageError>) + Send>;
pub type RenameHandler = Box<dyn FnOnce(String, FileIndex, Result<(), StorageError>) + Send>;
pub type ClearPieceHandler = Box<dyn FnOnce(PieceIndex) + Send>;
/// Receives the priorities actually in effect after the job.
pub type FilePriorityHandler =
    Box<dyn FnOnce(Result<(), StorageError>, Vec<DownloadPriority>) + Send>;

pub(crate) enum JobOp {
    Read {
        piece: PieceIndex,
        io: IoArgs,
        buffer: Option<DiskBuffer>,
        handler: ReadHandler,
    },
    PartialRead {
        piece: PieceIndex,
        io: IoArgs,
        buffer: DiskBuffer,
        handler: ReadHandler,
    },
    Write {
        piece: PieceIndex,
        io: IoArgs,
        buffer: DiskBuffer,
        handler: WriteHandler,
    },
    Hash {
        piece: PieceIndex,
        digest: Option<Sha1Hash>,
        handler: HashHandler,
    },
    Hash2 {
        piece: PieceIndex,
        offset: u32,
        digest: Option<Sha256Hash>,
        handler: Hash2Handler,
    },
    MoveStorage {
        path: PathBuf,
        flags: MoveFlags,
        handler: MoveHandler,
    },
    ReleaseFiles {
        handler: ReleaseHandler,
    },
    DeleteFiles {
        options: RemoveFlags,
        handler: WriteHandler,
    },
    CheckFastResume {
        params: Option<Arc<ResumeParams>>,
        handler: CheckHandler,
    },
    RenameFile {
        file: FileIndex,
        name: String,
        handler: RenameHandler,
    },
    StopTorrent {
        handler: ReleaseHandler,
    },
    FilePriority {
        priorities: Vec<DownloadPriority>,
        handler: FilePriorityHandler,
    },
    ClearPiece {
        piece: PieceIndex,
        handler: ClearPieceHandler,
    },
}

/// Borrowed view of a job's payload. Which case is active follows from the
/// job's action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    Buffer(&'a DiskBuffer),
    Path(&'a Path),
    Priorities(&'a [DownloadPriority]),
    AddParams(&'a ResumeParams),
    RemoveFlags(RemoveFlags),
    None,
}

impl JobOp {
    pub(crate) fn action(&self) -> JobAction {
        match self {
            JobOp::Read { .. } => JobAction::Read,
            JobOp::PartialRead { .. } => JobAction::PartialRead,
            JobOp::Write { .. } => JobAction::Write,
            JobOp::Hash { .. } => JobAction::Hash,
            JobOp::Hash2 { .. } => JobAction::Hash2,
            JobOp::MoveStorage { .. } => JobAction::MoveStorage,
            JobOp::ReleaseFiles { .. } => JobAction::ReleaseFiles,
            JobOp::DeleteFiles { .. } => JobAction::DeleteFiles,
            JobOp::CheckFastResume { .. } => JobAction::CheckFastResume,
            JobOp::RenameFile { .. } => JobAction::RenameFile,
            JobOp::StopTorrent { .. } => JobAction::StopTorrent,
            JobOp::FilePriority { .. } => JobAction::FilePriority,
            JobOp::ClearPiece { .. } => JobAction::ClearPiece,
        }
    }

    pub(crate) fn target(&self) -> Target {
        match self {
            JobOp::Read { piece, .. }
            | JobOp::PartialRead { piece, .. }
            | JobOp::Write { piece, .. }
            | JobOp::Hash { piece, .. }
            | JobOp::Hash2 { piece, .. }
            | JobOp::ClearPiece { piece, .. } => Target::Piece(*piece),
            JobOp::RenameFile { file, .. } => Target::File(*file),
            JobOp::MoveStorage { .. }
            | JobOp::ReleaseFiles { .. }
            | JobOp::DeleteFiles { .. }
            | JobOp::CheckFastResume { .. }
            | JobOp::StopTorrent { .. }
            | JobOp::FilePriority { .. } => Target::Storage,
        }
    }

    pub(crate) fn payload(&self) -> Payload<'_> {
        match self {
            JobOp::Read { buffer, .. } => buffer.as_ref().map_or(Payload::None, Payload::Buffer),
            JobOp::PartialRead { buffer, .. } | JobOp::Write { buffer, .. } => {
                Payload::Buffer(buffer)
            }
            JobOp::MoveStorage { path, .. } => Payload::Path(path),
            JobOp::RenameFile { name, .. } => Payload::Path(Path::new(name)),
            JobOp::DeleteFiles { options, .. } => Payload::RemoveFlags(*options),
            JobOp::CheckFastResume { params, .. } => {
                params.as_deref().map_or(Payload::None, Payload::AddParams)
            }
            JobOp::FilePriority { priorities, .. } => Payload::Priorities(priorities),
            JobOp::Hash { .. }
            | JobOp::Hash2 { .. }
            | JobOp::ReleaseFiles { .. }
            | JobOp::StopTorrent { .. }
            | JobOp::ClearPiece { .. } => Payload::None,
        }
    }

    /// Whether this job's handler expects an output that was never written.
    pub(crate) fn lacks_output(&self) -> bool {
        matches!(
            self,
            JobOp::Read { buffer: None, .. }
                | JobOp::Hash { digest: None, .. }
                | JobOp::Hash2 { digest: None, .. }
        )
    }

    /// Hands the outputs and the result to the handler of this action family.
    pub(crate) fn call_handler(self, result: JobResult) {
        let JobResult { status, error } = result;
        match self {
            JobOp::Read {
                buffer, handler, ..
            } => handler(output(error, buffer, "read")),
            JobOp::PartialRead {
                buffer, handler, ..
            } => handler(output(error, Some(buffer), "partial_read")),
            JobOp::Write { handler, .. } | JobOp::DeleteFiles { handler, .. } => {
                handler(into_result(error))
            }
            JobOp::Hash {
                piece,
                digest,
                handler,
            } => handler(piece, output(error, digest, "hash")),
            JobOp::Hash2 {
                piece,
                digest,
                handler,
                ..
            } => handler(piece, output(error, digest, "hash2")),
            JobOp::MoveStorage { path, handler, .. } => handler(status, path, into_result(error)),
            JobOp::ReleaseFiles { handler } | JobOp::StopTorrent { handler } => handler(),
            JobOp::CheckFastResume { handler, .. } => handler(status, into_result(error)),
            JobOp::RenameFile {
                file,
                name,
                handler,
            } => handler(name, file, into_result(error)),
            JobOp::FilePriority {
                priorities,
                handler,
            } => handler(into_result(error), priorities),
            JobOp::ClearPiece { piece, handler } => handler(piece),
        }
    }
}

fn into_result(error: Option<StorageError>) -> Result<(), StorageError> {
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn output<T>(
    error: Option<StorageError>,
    out: Option<T>,
    action: &'static str,
) -> Result<T, StorageError> {
    match (error, out) {
        (Some(e), _) => Err(e),
        (None, Some(v)) => Ok(v),
        (None, None) => unreachable!("{action} job succeeded without producing its output"),
    }
}
