//! The storage unit jobs operate on.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u32);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage-{}", self.0)
    }
}

/// A set of files/pieces addressed by jobs.
///
/// Shared as `Arc<Storage>` by the session, backend caches and every
/// outstanding job that references it; the unit lives as long as the longest
/// of those holders. The job system does not keep a strong reference of its
/// own. Mutating operations on the unit are serialized by the storage fence,
/// not by this type.
pub struct Storage {
    id: StorageId,
    save_path: RwLock<PathBuf>,
    num_files: u32,
}

impl Storage {
    pub fn new(id: StorageId, save_path: impl Into<PathBuf>, num_files: u32) -> Arc<Self> {
        Arc::new(Storage {
            id,
            save_path: RwLock::new(save_path.into()),
            num_files,
        })
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn num_files(&self) -> u32 {
        self.num_files
    }

    pub fn save_path(&self) -> PathBuf {
        self.save_path.read().unwrap().clone()
    }

    /// Used by backends once a `move_storage` job has relocated the files.
    pub fn set_save_path(&self, path: impl AsRef<Path>) {
        *self.save_path.write().unwrap() = path.as_ref().to_path_buf();
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("save_path", &*self.save_path.read().unwrap())
            .field("num_files", &self.num_files)
            .finish()
    }
}
