use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use disk_io_common::DiskBuffer;
use nix::errno::Errno;

use crate::{
    backend::DiskBackend,
    error::{FileOperation, StorageError},
    job::{
        DownloadPriority, FileIndex, IoArgs, JobAction, MoveFlags, PieceIndex, RemoveFlags,
        ResumeParams, Sha1Hash, Sha256Hash, Status, Target,
    },
    storage::{Storage, StorageId},
    Config, System, SystemHandle, WorkerHandle,
};

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn launch() -> (SystemHandle, WorkerHandle) {
    init_logging();
    System::launch(Config {
        initial_pool_capacity: 4,
        max_pool_capacity: None,
        dispatch_batch: 0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Begin(StorageId, JobAction, Target),
    End(StorageId, JobAction, Target),
}

/// In-memory backend that logs when each call begins and ends.
#[derive(Default)]
pub(crate) struct RecordingBackend {
    events: Mutex<Vec<Event>>,
    pieces: Mutex<HashMap<(StorageId, PieceIndex), Vec<u8>>>,
    failing_pieces: Mutex<HashSet<PieceIndex>>,
    /// Time spent inside every call, to widen race windows.
    delay: Option<Duration>,
}

impl RecordingBackend {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        RecordingBackend {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Reads and writes of `piece` fail with `EIO` from now on.
    pub(crate) fn fail_piece(&self, piece: PieceIndex) {
        self.failing_pieces.lock().unwrap().insert(piece);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Actions in the order their calls began.
    pub(crate) fn started(&self) -> Vec<(StorageId, JobAction)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Begin(s, a, _) => Some((s, a)),
                Event::End(..) => None,
            })
            .collect()
    }

    /// Panics if a fence action overlapped any other call on the same storage.
    pub(crate) fn assert_fences_exclusive(&self) {
        let mut active: HashMap<StorageId, Vec<JobAction>> = HashMap::new();
        for event in self.events() {
            match event {
                Event::Begin(s, a, _) => {
                    let running = active.entry(s).or_default();
                    let exclusive_ok =
                        !a.is_fence() && !running.iter().any(|r| r.is_fence());
                    assert!(
                        running.is_empty() || exclusive_ok,
                        "{a:?} began on {s} while {running:?} was running"
                    );
                    running.push(a);
                }
                Event::End(s, a, _) => {
                    let running = active.entry(s).or_default();
                    let pos = running
                        .iter()
                        .position(|r| *r == a)
                        .expect("end without begin");
                    running.swap_remove(pos);
                }
            }
        }
    }

    fn record<T>(
        &self,
        storage: &Storage,
        action: JobAction,
        target: Target,
        f: impl FnOnce() -> T,
    ) -> T {
        let id = storage.id();
        self.events
            .lock()
            .unwrap()
            .push(Event::Begin(id, action, target));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let out = f();
        self.events.lock().unwrap().push(Event::End(id, action, target));
        out
    }

    fn check_piece(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        op: FileOperation,
    ) -> Result<(), StorageError> {
        if self.failing_pieces.lock().unwrap().contains(&piece) {
            return Err(StorageError::filesystem(
                Errno::EIO,
                op,
                storage.save_path().join(format!("piece-{}", piece.0)),
                None,
            ));
        }
        Ok(())
    }

    fn digest(&self, storage: &Storage, piece: PieceIndex) -> [u8; 32] {
        let mut out = [0u8; 32];
        if let Some(data) = self.pieces.lock().unwrap().get(&(storage.id(), piece)) {
            for (i, b) in data.iter().enumerate() {
                out[i % 32] ^= b.rotate_left(i as u32 % 8);
            }
        }
        out
    }
}

impl DiskBackend for RecordingBackend {
    fn read(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
    ) -> Result<DiskBuffer, StorageError> {
        self.record(storage, JobAction::Read, Target::Piece(piece), || {
            self.check_piece(storage, piece, FileOperation::Read)?;
            let pieces = self.pieces.lock().unwrap();
            let data = pieces
                .get(&(storage.id(), piece))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let mut buf = DiskBuffer::new(usize::from(io.buffer_size));
            let start = (io.offset as usize).min(data.len());
            let end = (start + buf.len()).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
            Ok(buf)
        })
    }

    fn write(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
        buffer: &DiskBuffer,
    ) -> Result<(), StorageError> {
        self.record(storage, JobAction::Write, Target::Piece(piece), || {
            self.check_piece(storage, piece, FileOperation::Write)?;
            let mut pieces = self.pieces.lock().unwrap();
            let data = pieces.entry((storage.id(), piece)).or_default();
            let start = io.offset as usize;
            let end = start + buffer.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buffer);
            Ok(())
        })
    }

    fn hash(&self, storage: &Storage, piece: PieceIndex) -> Result<Sha1Hash, StorageError> {
        self.record(storage, JobAction::Hash, Target::Piece(piece), || {
            self.check_piece(storage, piece, FileOperation::Read)?;
            let mut out = [0u8; 20];
            out.copy_from_slice(&self.digest(storage, piece)[..20]);
            Ok(Sha1Hash(out))
        })
    }

    fn hash2(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        offset: u32,
    ) -> Result<Sha256Hash, StorageError> {
        self.record(storage, JobAction::Hash2, Target::Piece(piece), || {
            self.check_piece(storage, piece, FileOperation::Read)?;
            let mut out = self.digest(storage, piece);
            out[0] ^= offset.to_be_bytes()[3];
            Ok(Sha256Hash(out))
        })
    }

    fn move_storage(
        &self,
        storage: &Storage,
        path: &mut PathBuf,
        flags: MoveFlags,
    ) -> Result<Status, StorageError> {
        self.record(storage, JobAction::MoveStorage, Target::Storage, || {
            let old = storage.save_path();
            match flags {
                MoveFlags::ResetSavePath | MoveFlags::ResetSavePathUnchecked => {}
                MoveFlags::FailIfExist if path.exists() => {
                    *path = old;
                    return Ok(Status::FileExist);
                }
                MoveFlags::DontReplace if path.exists() => {}
                _ if old.exists() => {
                    if let Err(e) = std::fs::rename(&old, &*path) {
                        let err = StorageError::from_io(&e, FileOperation::Rename, &old, None);
                        *path = old;
                        return Err(err);
                    }
                }
                _ => {}
            }
            storage.set_save_path(&*path);
            Ok(Status::NoError)
        })
    }

    fn release_files(&self, storage: &Storage) -> Result<(), StorageError> {
        self.record(storage, JobAction::ReleaseFiles, Target::Storage, || Ok(()))
    }

    fn delete_files(&self, storage: &Storage, options: RemoveFlags) -> Result<(), StorageError> {
        self.record(storage, JobAction::DeleteFiles, Target::Storage, || {
            if options.contains(RemoveFlags::DELETE_FILES) {
                self.pieces
                    .lock()
                    .unwrap()
                    .retain(|(s, _), _| *s != storage.id());
            }
            Ok(())
        })
    }

    fn check_fastresume(
        &self,
        storage: &Storage,
        params: Option<&ResumeParams>,
    ) -> Result<Status, StorageError> {
        self.record(storage, JobAction::CheckFastResume, Target::Storage, || {
            Ok(match params {
                Some(_) => Status::NoError,
                None => Status::NeedFullCheck,
            })
        })
    }

    fn rename_file(
        &self,
        storage: &Storage,
        file: FileIndex,
        name: &mut String,
    ) -> Result<(), StorageError> {
        self.record(storage, JobAction::RenameFile, Target::File(file), || {
            if file.0 >= storage.num_files() {
                return Err(StorageError::filesystem(
                    Errno::ENOENT,
                    FileOperation::Rename,
                    storage.save_path().join(&*name),
                    Some(file),
                ));
            }
            Ok(())
        })
    }

    fn stop_torrent(&self, storage: &Storage) -> Result<(), StorageError> {
        self.record(storage, JobAction::StopTorrent, Target::Storage, || Ok(()))
    }

    fn set_file_priority(
        &self,
        storage: &Storage,
        priorities: &mut Vec<DownloadPriority>,
    ) -> Result<(), StorageError> {
        self.record(storage, JobAction::FilePriority, Target::Storage, || {
            priorities.truncate(storage.num_files() as usize);
            Ok(())
        })
    }

    fn clear_piece(&self, storage: &Storage, piece: PieceIndex) {
        self.record(storage, JobAction::ClearPiece, Target::Piece(piece), || {})
    }
}

pub(crate) fn storage(id: u32) -> Arc<Storage> {
    Storage::new(StorageId(id), format!("/tmp/disk-io-job-test/{id}"), 4)
}
