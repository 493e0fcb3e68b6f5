use std::{
    collections::HashMap,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use disk_io_job::{
    DiskBackend, DiskBuffer, DownloadPriority, FileIndex, FileOperation, IoArgs, MoveFlags,
    PieceIndex, RemoveFlags, ResumeParams, Sha1Hash, Sha256Hash, Status, Storage, StorageError,
    StorageId,
};

/// Cheap stand-in for a digest; the benchmark measures the job system, not hashing.
fn fold_digest<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    for (i, b) in data.iter().enumerate() {
        out[i % N] = out[i % N].wrapping_add(*b).rotate_left(3);
    }
    out
}

/// Keeps every piece in a `HashMap`.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    pieces: Mutex<HashMap<(StorageId, PieceIndex), Vec<u8>>>,
}

impl MemoryBackend {
    fn with_piece<R>(&self, storage: &Storage, piece: PieceIndex, f: impl FnOnce(&[u8]) -> R) -> R {
        let pieces = self.pieces.lock().unwrap();
        f(pieces
            .get(&(storage.id(), piece))
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

impl DiskBackend for MemoryBackend {
    fn read(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
    ) -> Result<DiskBuffer, StorageError> {
        let mut buf = DiskBuffer::new(usize::from(io.buffer_size));
        self.with_piece(storage, piece, |data| {
            let start = (io.offset as usize).min(data.len());
            let end = (start + buf.len()).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
        });
        Ok(buf)
    }

    fn write(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
        buffer: &DiskBuffer,
    ) -> Result<(), StorageError> {
        let mut pieces = self.pieces.lock().unwrap();
        let data = pieces.entry((storage.id(), piece)).or_default();
        let start = io.offset as usize;
        let end = start + buffer.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buffer);
        Ok(())
    }

    fn hash(&self, storage: &Storage, piece: PieceIndex) -> Result<Sha1Hash, StorageError> {
        Ok(Sha1Hash(self.with_piece(storage, piece, fold_digest)))
    }

    fn hash2(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        offset: u32,
    ) -> Result<Sha256Hash, StorageError> {
        Ok(Sha256Hash(self.with_piece(storage, piece, |data| {
            fold_digest(data.get(offset as usize..).unwrap_or(&[]))
        })))
    }

    fn move_storage(
        &self,
        storage: &Storage,
        path: &mut PathBuf,
        _flags: MoveFlags,
    ) -> Result<Status, StorageError> {
        storage.set_save_path(&*path);
        Ok(Status::NoError)
    }

    fn release_files(&self, _storage: &Storage) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_files(&self, storage: &Storage, _options: RemoveFlags) -> Result<(), StorageError> {
        self.pieces
            .lock()
            .unwrap()
            .retain(|(s, _), _| *s != storage.id());
        Ok(())
    }

    fn check_fastresume(
        &self,
        _storage: &Storage,
        _params: Option<&ResumeParams>,
    ) -> Result<Status, StorageError> {
        Ok(Status::NoError)
    }

    fn rename_file(
        &self,
        _storage: &Storage,
        _file: FileIndex,
        _name: &mut String,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn set_file_priority(
        &self,
        _storage: &Storage,
        _priorities: &mut Vec<DownloadPriority>,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

/// One file per piece below the storage's save path, accessed with
/// positional reads and writes.
#[derive(Default)]
pub(crate) struct FileBackend {}

impl FileBackend {
    fn piece_path(storage: &Storage, piece: PieceIndex) -> PathBuf {
        storage.save_path().join(format!("piece_{}.data", piece.0))
    }

    fn open(path: &Path, write: bool) -> Result<std::fs::File, StorageError> {
        std::fs::OpenOptions::new()
            .read(true)
            .write(write)
            .create(write)
            .open(path)
            .map_err(|e| StorageError::from_io(&e, FileOperation::Open, path, None))
    }

    fn read_all(storage: &Storage, piece: PieceIndex) -> Result<Vec<u8>, StorageError> {
        let path = Self::piece_path(storage, piece);
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::from_io(&e, FileOperation::Read, &path, None)),
        }
    }
}

impl DiskBackend for FileBackend {
    fn read(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
    ) -> Result<DiskBuffer, StorageError> {
        let path = Self::piece_path(storage, piece);
        let file = Self::open(&path, false)?;
        let mut buf = DiskBuffer::new(usize::from(io.buffer_size));
        file.read_exact_at(&mut buf, u64::from(io.offset))
            .map_err(|e| StorageError::from_io(&e, FileOperation::Read, &path, None))?;
        Ok(buf)
    }

    fn write(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        io: IoArgs,
        buffer: &DiskBuffer,
    ) -> Result<(), StorageError> {
        let path = Self::piece_path(storage, piece);
        let file = Self::open(&path, true)?;
        file.write_all_at(buffer, u64::from(io.offset))
            .map_err(|e| StorageError::from_io(&e, FileOperation::Write, &path, None))
    }

    fn hash(&self, storage: &Storage, piece: PieceIndex) -> Result<Sha1Hash, StorageError> {
        Ok(Sha1Hash(fold_digest(&Self::read_all(storage, piece)?)))
    }

    fn hash2(
        &self,
        storage: &Storage,
        piece: PieceIndex,
        offset: u32,
    ) -> Result<Sha256Hash, StorageError> {
        let data = Self::read_all(storage, piece)?;
        Ok(Sha256Hash(fold_digest(data.get(offset as usize..).unwrap_or(&[]))))
    }

    fn move_storage(
        &self,
        storage: &Storage,
        path: &mut PathBuf,
        flags: MoveFlags,
    ) -> Result<Status, StorageError> {
        let old = storage.save_path();
        match flags {
            MoveFlags::ResetSavePath | MoveFlags::ResetSavePathUnchecked => {}
            MoveFlags::FailIfExist | MoveFlags::DontReplace if path.exists() => {
                *path = old;
                return Ok(Status::FileExist);
            }
            MoveFlags::AlwaysReplaceFiles | MoveFlags::FailIfExist | MoveFlags::DontReplace => {
                if let Err(e) = std::fs::rename(&old, &*path) {
                    let err = StorageError::from_io(&e, FileOperation::Rename, &old, None);
                    *path = old;
                    return Err(err);
                }
            }
        }
        storage.set_save_path(&*path);
        Ok(Status::NoError)
    }

    fn release_files(&self, _storage: &Storage) -> Result<(), StorageError> {
        // no file handles are cached
        Ok(())
    }

    fn delete_files(&self, storage: &Storage, options: RemoveFlags) -> Result<(), StorageError> {
        if !options.contains(RemoveFlags::DELETE_FILES) {
            return Ok(());
        }
        let dir = storage.save_path();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(&e, FileOperation::Remove, &dir, None)),
        }
    }

    fn check_fastresume(
        &self,
        storage: &Storage,
        _params: Option<&ResumeParams>,
    ) -> Result<Status, StorageError> {
        if storage.save_path().exists() {
            Ok(Status::NoError)
        } else {
            Ok(Status::NeedFullCheck)
        }
    }

    fn rename_file(
        &self,
        _storage: &Storage,
        _file: FileIndex,
        _name: &mut String,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn set_file_priority(
        &self,
        _storage: &Storage,
        _priorities: &mut Vec<DownloadPriority>,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}
