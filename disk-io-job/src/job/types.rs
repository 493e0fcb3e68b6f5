//! Plain value types carried by jobs.

use std::{fmt, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIndex(pub u32);

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "piece {}", self.0)
    }
}

impl fmt::Display for FileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {}", self.0)
    }
}

/// What inside the storage unit a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Piece(PieceIndex),
    File(FileIndex),
    /// Whole-storage actions select neither a piece nor a file.
    Storage,
}

/// Where in a piece a read or write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoArgs {
    /// Byte offset into the piece.
    pub offset: u32,
    /// Number of bytes to transfer.
    pub buffer_size: u16,
    /// Partial reads only: bytes to skip in the destination buffer.
    pub buffer_offset: u16,
}

impl IoArgs {
    pub fn new(offset: u32, buffer_size: u16) -> Self {
        IoArgs {
            offset,
            buffer_size,
            buffer_offset: 0,
        }
    }
}

/// How `move_storage` treats files already present at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveFlags {
    #[default]
    AlwaysReplaceFiles,
    FailIfExist,
    DontReplace,
    /// Only update the save path, do not move anything.
    ResetSavePath,
    ResetSavePathUnchecked,
}

/// Options for `delete_files`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveFlags(u8);

impl RemoveFlags {
    pub const DELETE_FILES: RemoveFlags = RemoveFlags(1 << 0);
    pub const DELETE_PARTFILE: RemoveFlags = RemoveFlags(1 << 1);

    pub const fn empty() -> Self {
        RemoveFlags(0)
    }

    pub const fn contains(self, other: RemoveFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for RemoveFlags {
    type Output = RemoveFlags;

    fn bitor(self, rhs: RemoveFlags) -> RemoveFlags {
        RemoveFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for RemoveFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(
                [
                    (Self::DELETE_FILES, "DELETE_FILES"),
                    (Self::DELETE_PARTFILE, "DELETE_PARTFILE"),
                ]
                .into_iter()
                .filter(|(flag, _)| self.contains(*flag))
                .map(|(_, name)| name),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DownloadPriority(pub u8);

impl DownloadPriority {
    pub const DONT_DOWNLOAD: DownloadPriority = DownloadPriority(0);
    pub const LOW: DownloadPriority = DownloadPriority(1);
    pub const DEFAULT: DownloadPriority = DownloadPriority(4);
    pub const TOP: DownloadPriority = DownloadPriority(7);
}

impl Default for DownloadPriority {
    fn default() -> Self {
        DownloadPriority::DEFAULT
    }
}

/// Status code reported alongside the error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NoError,
    FatalDiskError,
    /// Resume data could not be trusted; the storage needs a full recheck.
    NeedFullCheck,
    /// `move_storage` with [`MoveFlags::FailIfExist`] found existing files.
    FileExist,
}

/// Resume data handed to `check_fastresume`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeParams {
    /// One entry per file: if set, the file should be created as a hard link
    /// to this path instead of being downloaded.
    pub links: Vec<Option<PathBuf>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sha1Hash(pub [u8; 20]);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sha256Hash(pub [u8; 32]);

impl fmt::Debug for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hash({})", hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
