//! The job descriptor: one pending or in-flight disk operation.
//!
//! A [`Job`] is built with the constructor of its action, which fixes the
//! payload and handler types together. It is then handed to
//! [`SystemHandle::submit`](crate::SystemHandle::submit), which parks it in a
//! pooled slot until a worker executes it (or it is fast-failed) and the
//! dispatcher calls its handler exactly once.

use std::{fmt, path::PathBuf, sync::Arc};

use disk_io_common::DiskBuffer;

use crate::{error::StorageError, storage::Storage};

mod op;
mod types;

pub use op::{
    CheckHandler, ClearPieceHandler, FilePriorityHandler, Hash2Handler, HashHandler,
    MoveHandler, Payload, ReadHandler, ReleaseHandler, RenameHandler, WriteHandler,
};
pub use types::{
    DownloadPriority, FileIndex, IoArgs, MoveFlags, PieceIndex, RemoveFlags, ResumeParams,
    Sha1Hash, Sha256Hash, Status, Target,
};

pub(crate) use op::JobOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    Read,
    Write,
    Hash,
    Hash2,
    MoveStorage,
    ReleaseFiles,
    DeleteFiles,
    CheckFastResume,
    RenameFile,
    StopTorrent,
    FilePriority,
    ClearPiece,
    PartialRead,
}

impl JobAction {
    /// Actions that touch the storage unit as a whole and must not run
    /// concurrently with any other job on it.
    pub const fn is_fence(self) -> bool {
        match self {
            JobAction::MoveStorage
            | JobAction::ReleaseFiles
            | JobAction::DeleteFiles
            | JobAction::CheckFastResume
            | JobAction::RenameFile
            | JobAction::StopTorrent
            | JobAction::FilePriority => true,
            JobAction::Read
            | JobAction::Write
            | JobAction::Hash
            | JobAction::Hash2
            | JobAction::ClearPiece
            | JobAction::PartialRead => false,
        }
    }
}

/// Bit set of job state flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct JobFlags(u8);

impl JobFlags {
    /// No other job on the same storage runs while this one does. Set at
    /// construction for the whole-storage actions, never for the others.
    pub const FENCE: JobFlags = JobFlags(1 << 0);
    /// Admitted: queued for execution, executing, or waiting on a fence.
    pub const IN_PROGRESS: JobFlags = JobFlags(1 << 1);
    /// No longer wanted. Fails with `OperationAborted` instead of executing.
    pub const ABORTED: JobFlags = JobFlags(1 << 6);

    pub const fn empty() -> Self {
        JobFlags(0)
    }

    pub const fn contains(self, other: JobFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: JobFlags) {
        self.0 |= other.0;
    }
}

impl fmt::Debug for JobFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(
                [
                    (Self::FENCE, "FENCE"),
                    (Self::IN_PROGRESS, "IN_PROGRESS"),
                    (Self::ABORTED, "ABORTED"),
                ]
                .into_iter()
                .filter(|(flag, _)| self.contains(*flag))
                .map(|(_, name)| name),
            )
            .finish()
    }
}

/// Status code plus error record of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobResult {
    pub status: Status,
    pub error: Option<StorageError>,
}

impl JobResult {
    pub fn ok() -> Self {
        JobResult::default()
    }

    pub fn with_status(status: Status) -> Self {
        JobResult {
            status,
            error: None,
        }
    }

    pub fn failed(error: StorageError) -> Self {
        JobResult {
            status: Status::FatalDiskError,
            error: Some(error),
        }
    }

    pub fn aborted() -> Self {
        Self::failed(StorageError::OperationAborted)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Job {
    op: JobOp,
    storage: Arc<Storage>,
    flags: JobFlags,
    result: Option<JobResult>,
}

impl Job {
    fn new(storage: Arc<Storage>, op: JobOp) -> Job {
        let mut flags = JobFlags::empty();
        if op.action().is_fence() {
            flags.insert(JobFlags::FENCE);
        }
        Job {
            op,
            storage,
            flags,
            result: None,
        }
    }

    /// Reads `io.buffer_size` bytes at `io.offset` of `piece` into a fresh buffer.
    pub fn read<H>(storage: Arc<Storage>, piece: PieceIndex, io: IoArgs, handler: H) -> Job
    where
        H: FnOnce(Result<DiskBuffer, StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::Read {
                piece,
                io,
                buffer: None,
                handler: Box::new(handler),
            },
        )
    }

    /// Reads into `buffer` starting at `io.buffer_offset`, keeping the bytes before it.
    pub fn partial_read<H>(
        storage: Arc<Storage>,
        piece: PieceIndex,
        io: IoArgs,
        buffer: DiskBuffer,
        handler: H,
    ) -> Job
    where
        H: FnOnce(Result<DiskBuffer, StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::PartialRead {
                piece,
                io,
                buffer,
                handler: Box::new(handler),
            },
        )
    }

    pub fn write<H>(
        storage: Arc<Storage>,
        piece: PieceIndex,
        io: IoArgs,
        buffer: DiskBuffer,
        handler: H,
    ) -> Job
    where
        H: FnOnce(Result<(), StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::Write {
                piece,
                io,
                buffer,
                handler: Box::new(handler),
            },
        )
    }

    pub fn hash<H>(storage: Arc<Storage>, piece: PieceIndex, handler: H) -> Job
    where
        H: FnOnce(PieceIndex, Result<Sha1Hash, StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::Hash {
                piece,
                digest: None,
                handler: Box::new(handler),
            },
        )
    }

    /// SHA-256 of the block at `offset` in `piece`.
    pub fn hash2<H>(storage: Arc<Storage>, piece: PieceIndex, offset: u32, handler: H) -> Job
    where
        H: FnOnce(PieceIndex, Result<Sha256Hash, StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::Hash2 {
                piece,
                offset,
                digest: None,
                handler: Box::new(handler),
            },
        )
    }

    pub fn move_storage<H>(
        storage: Arc<Storage>,
        path: impl Into<PathBuf>,
        flags: MoveFlags,
        handler: H,
    ) -> Job
    where
        H: FnOnce(Status, PathBuf, Result<(), StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::MoveStorage {
                path: path.into(),
                flags,
                handler: Box::new(handler),
            },
        )
    }

    pub fn release_files<H>(storage: Arc<Storage>, handler: H) -> Job
    where
        H: FnOnce() + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::ReleaseFiles {
                handler: Box::new(handler),
            },
        )
    }

    pub fn delete_files<H>(storage: Arc<Storage>, options: RemoveFlags, handler: H) -> Job
    where
        H: FnOnce(Result<(), StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::DeleteFiles {
                options,
                handler: Box::new(handler),
            },
        )
    }

    pub fn check_fastresume<H>(
        storage: Arc<Storage>,
        params: Option<Arc<ResumeParams>>,
        handler: H,
    ) -> Job
    where
        H: FnOnce(Status, Result<(), StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::CheckFastResume {
                params,
                handler: Box::new(handler),
            },
        )
    }

    pub fn rename_file<H>(
        storage: Arc<Storage>,
        file: FileIndex,
        name: impl Into<String>,
        handler: H,
    ) -> Job
    where
        H: FnOnce(String, FileIndex, Result<(), StorageError>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::RenameFile {
                file,
                name: name.into(),
                handler: Box::new(handler),
            },
        )
    }

    pub fn stop_torrent<H>(storage: Arc<Storage>, handler: H) -> Job
    where
        H: FnOnce() + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::StopTorrent {
                handler: Box::new(handler),
            },
        )
    }

    pub fn file_priority<H>(
        storage: Arc<Storage>,
        priorities: Vec<DownloadPriority>,
        handler: H,
    ) -> Job
    where
        H: FnOnce(Result<(), StorageError>, Vec<DownloadPriority>) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::FilePriority {
                priorities,
                handler: Box::new(handler),
            },
        )
    }

    pub fn clear_piece<H>(storage: Arc<Storage>, piece: PieceIndex, handler: H) -> Job
    where
        H: FnOnce(PieceIndex) + Send + 'static,
    {
        Job::new(
            storage,
            JobOp::ClearPiece {
                piece,
                handler: Box::new(handler),
            },
        )
    }

    pub fn action(&self) -> JobAction {
        self.op.action()
    }

    pub fn target(&self) -> Target {
        self.op.target()
    }

    pub fn payload(&self) -> Payload<'_> {
        self.op.payload()
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn flags(&self) -> JobFlags {
        self.flags
    }

    pub fn is_fence(&self) -> bool {
        self.flags.contains(JobFlags::FENCE)
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.contains(JobFlags::ABORTED)
    }

    /// `None` until the job has executed or been fast-failed.
    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub(crate) fn set_flag(&mut self, flag: JobFlags) {
        self.flags.insert(flag);
    }

    pub(crate) fn parts_mut(&mut self) -> (&Storage, &mut JobOp) {
        (&self.storage, &mut self.op)
    }

    pub(crate) fn lacks_output(&self) -> bool {
        self.op.lacks_output()
    }

    pub(crate) fn set_result(&mut self, result: JobResult) {
        assert!(
            self.result.is_none(),
            "implementation error: job result is written once per job ({:?})",
            self.action()
        );
        self.result = Some(result);
    }

    /// Consumes the job and calls its handler with the recorded result.
    pub(crate) fn call_handler(self) {
        let Job { op, result, .. } = self;
        let Some(result) = result else {
            unreachable!("handler called for a job that never finished");
        };
        op.call_handler(result)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("action", &self.action())
            .field("target", &self.target())
            .field("storage", &self.storage.id())
            .field("flags", &self.flags)
            .field("result", &self.result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::storage::StorageId;

    fn storage() -> Arc<Storage> {
        Storage::new(StorageId(1), "/tmp/s1", 4)
    }

    #[test]
    fn fence_flag_follows_action() {
        let s = storage();
        let jobs = [
            Job::read(s.clone(), PieceIndex(0), IoArgs::new(0, 16), |_| {}),
            Job::write(s.clone(), PieceIndex(0), IoArgs::new(0, 1), DiskBuffer::new(1), |_| {}),
            Job::hash(s.clone(), PieceIndex(0), |_, _| {}),
            Job::clear_piece(s.clone(), PieceIndex(0), |_| {}),
            Job::move_storage(s.clone(), "/tmp/elsewhere", MoveFlags::default(), |_, _, _| {}),
            Job::delete_files(s.clone(), RemoveFlags::DELETE_FILES, |_| {}),
            Job::check_fastresume(s.clone(), None, |_, _| {}),
            Job::rename_file(s.clone(), FileIndex(1), "b.bin", |_, _, _| {}),
            Job::stop_torrent(s.clone(), || {}),
            Job::release_files(s.clone(), || {}),
            Job::file_priority(s, vec![DownloadPriority::TOP], |_, _| {}),
        ];
        for job in &jobs {
            assert_eq!(job.is_fence(), job.action().is_fence(), "{job:?}");
            assert!(!job.is_aborted());
            assert!(job.result().is_none());
        }
        assert_eq!(jobs.iter().filter(|j| j.is_fence()).count(), 7);
    }

    #[test]
    fn target_and_payload_match_action() {
        let s = storage();
        let job = Job::rename_file(s.clone(), FileIndex(3), "new.bin", |_, _, _| {});
        assert_eq!(job.target(), Target::File(FileIndex(3)));
        assert_eq!(
            job.payload(),
            Payload::Path(std::path::Path::new("new.bin"))
        );

        let job = Job::read(s.clone(), PieceIndex(7), IoArgs::new(0, 16), |_| {});
        assert_eq!(job.target(), Target::Piece(PieceIndex(7)));
        assert_eq!(job.payload(), Payload::None);

        let job = Job::delete_files(s.clone(), RemoveFlags::DELETE_PARTFILE, |_| {});
        assert_eq!(job.target(), Target::Storage);
        assert_eq!(job.payload(), Payload::RemoveFlags(RemoveFlags::DELETE_PARTFILE));

        let params = Arc::new(ResumeParams {
            links: vec![None, Some("/seed/a".into())],
        });
        let job = Job::check_fastresume(s, Some(params.clone()), |_, _| {});
        assert_eq!(job.payload(), Payload::AddParams(&params));
    }

    #[test]
    fn handler_receives_recorded_result() {
        let seen = Arc::new(Mutex::new(None));
        let mut job = Job::move_storage(storage(), "/tmp/dst", MoveFlags::FailIfExist, {
            let seen = Arc::clone(&seen);
            move |status, path, res| *seen.lock().unwrap() = Some((status, path, res))
        });
        job.set_result(JobResult::with_status(Status::FileExist));
        job.call_handler();
        let (status, path, res) = seen.lock().unwrap().take().unwrap();
        assert_eq!(status, Status::FileExist);
        assert_eq!(path, PathBuf::from("/tmp/dst"));
        assert!(res.is_ok());
    }

    #[test]
    fn aborted_read_delivers_no_buffer() {
        let seen = Arc::new(Mutex::new(None));
        let mut job = Job::read(storage(), PieceIndex(3), IoArgs::new(0, 16), {
            let seen = Arc::clone(&seen);
            move |res| *seen.lock().unwrap() = Some(res)
        });
        job.set_result(JobResult::aborted());
        job.call_handler();
        let res = seen.lock().unwrap().take().unwrap();
        assert_eq!(res, Err(StorageError::OperationAborted));
    }

    #[test]
    #[should_panic(expected = "written once")]
    fn result_is_write_once() {
        let mut job = Job::hash(storage(), PieceIndex(0), |_, _| {});
        job.set_result(JobResult::ok());
        job.set_result(JobResult::aborted());
    }

    #[test]
    fn flags_debug_lists_set_bits() {
        let mut flags = JobFlags::FENCE;
        flags.insert(JobFlags::ABORTED);
        assert_eq!(format!("{flags:?}"), r#"{"FENCE", "ABORTED"}"#);
    }
}
