//! Interface to whatever performs the actual file system work.
//!
//! Workers call [`execute`] on each job they take; it dispatches to exactly the
//! [`DiskBackend`] method of the job's action and writes outputs (read buffers,
//! digests, resulting paths and priorities) back into the job. Aborted jobs
//! never get here.

use std::path::PathBuf;

use disk_io_common::DiskBuffer;

use crate::{
    error::StorageError,
    job::{
        DownloadPriority, FileIndex, IoArgs, Job, JobOp, JobResult, MoveFlags, PieceIndex,
        RemoveFlags, ResumeParams, Sha1Hash, Sha256Hash, Status,
    },
    storage::Storage,
};

pub trait DiskBackend: Send + Sync {
    fn read(&self, storage: &Storage, piece: PieceIndex, io: IoArgs)
        -> Result<DiskBuffer, StorageError>;

    /// Reads `io.buffer_size` bytes into `buffer` at `io.buffer_offset`,
    /// growing the buffer if needed.
    fn partial_read(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
        buffer: &mut DiskBuffer,
    ) -> Result<(), StorageError> {
        let block = self.read(
            storage,
            piece,
            IoArgs {
                buffer_offset: 0,
                ..io
            },
        )?;
        let start = usize::from(io.buffer_offset);
        let end = start + block.len();
        if buffer.len() < end {
            buffer.resize(end);
        }
        buffer[start..end].copy_from_slice(&block);
        Ok(())
    }

    fn write(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
        buffer: &DiskBuffer,
    ) -> Result<(), StorageError>;

    fn hash(&self, storage: &Storage, piece: PieceIndex) -> Result<Sha1Hash, StorageError>;

    fn hash2(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        offset: u32,
    ) -> Result<Sha256Hash, StorageError>;

    /// Moves the files to `path`. On return `path` holds the save path in
    /// effect, which is the old one if nothing was moved.
    fn move_storage(
        &self,
        storage: &Storage,
        path: &mut PathBuf,
        flags: MoveFlags,
    ) -> Result<Status, StorageError>;

    fn release_files(&self, storage: &Storage) -> Result<(), StorageError>;

    fn delete_files(&self, storage: &Storage, options: RemoveFlags) -> Result<(), StorageError>;

    fn check_fastresume(
        &self,
        storage: &Storage,
        params: Option<&ResumeParams>,
    ) -> Result<Status, StorageError>;

    /// Renames `file`. On return `name` holds the name in effect.
    fn rename_file(
        &self,
        storage: &Storage,
        file: FileIndex,
        name: &mut String,
    ) -> Result<(), StorageError>;

    fn stop_torrent(&self, storage: &Storage) -> Result<(), StorageError> {
        self.release_files(storage)
    }

    /// Applies `priorities`. On return it holds the priorities in effect.
    fn set_file_priority(
        &self,
        storage: &Storage,
        priorities: &mut Vec<DownloadPriority>,
    ) -> Result<(), StorageError>;

    /// Forgets any cached state of `piece`.
    fn clear_piece(&self, _storage: &Storage, _piece: PieceIndex) {}
}

/// Runs `job` against `backend` and returns the result to record.
pub(crate) fn execute(job: &mut Job, backend: &dyn DiskBackend) -> JobResult {
    debug_assert!(!job.is_aborted(), "aborted jobs are fast-failed, not executed");
    let (storage, op) = job.parts_mut();
    let status = match op {
        JobOp::Read {
            piece, io, buffer, ..
        } => backend.read(storage, *piece, *io).map(|block| {
            *buffer = Some(block);
            Status::NoError
        }),
        JobOp::PartialRead {
            piece, io, buffer, ..
        } => backend
            .partial_read(storage, *piece, *io, buffer)
            .map(|()| Status::NoError),
        JobOp::Write {
            piece, io, buffer, ..
        } => backend
            .write(storage, *piece, *io, buffer)
            .map(|()| Status::NoError),
        JobOp::Hash { piece, digest, .. } => backend.hash(storage, *piece).map(|d| {
            *digest = Some(d);
            Status::NoError
        }),
        JobOp::Hash2 {
            piece,
            offset,
            digest,
            ..
        } => backend.hash2(storage, *piece, *offset).map(|d| {
            *digest = Some(d);
            Status::NoError
        }),
        JobOp::MoveStorage { path, flags, .. } => backend.move_storage(storage, path, *flags),
        JobOp::ReleaseFiles { .. } => backend.release_files(storage).map(|()| Status::NoError),
        JobOp::DeleteFiles { options, .. } => backend
            .delete_files(storage, *options)
            .map(|()| Status::NoError),
        JobOp::CheckFastResume { params, .. } => {
            backend.check_fastresume(storage, params.as_deref())
        }
        JobOp::RenameFile { file, name, .. } => backend
            .rename_file(storage, *file, name)
            .map(|()| Status::NoError),
        JobOp::StopTorrent { .. } => backend.stop_torrent(storage).map(|()| Status::NoError),
        JobOp::FilePriority { priorities, .. } => backend
            .set_file_priority(storage, priorities)
            .map(|()| Status::NoError),
        JobOp::ClearPiece { piece, .. } => {
            backend.clear_piece(storage, *piece);
            Ok(Status::NoError)
        }
    };
    match status {
        Ok(status) => JobResult::with_status(status),
        Err(e) => JobResult::failed(e),
    }
}
