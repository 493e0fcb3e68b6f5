//! Serialized form of per-file download priorities, as stored in resume data.
//!
//! Layout: big-endian `u32` number of files, then one priority byte per file.

use disk_io_common::io_bytes::{self, DecodeError};

use crate::job::DownloadPriority;

/// Appends the encoding of `priorities` to `out`.
pub fn encode(priorities: &[DownloadPriority], out: &mut Vec<u8>) {
    let count = u32::try_from(priorities.len()).expect("more than u32::MAX files");
    let start = out.len();
    out.resize(start + 4 + priorities.len(), 0);
    let mut cursor = &mut out[start..];
    io_bytes::write_u32(count, &mut cursor);
    for prio in priorities {
        io_bytes::write_u8(prio.0, &mut cursor);
    }
    debug_assert!(cursor.is_empty());
}

/// Decodes what [`encode`] wrote. Trailing bytes are ignored.
pub fn decode(mut src: &[u8]) -> Result<Vec<DownloadPriority>, DecodeError> {
    let count = io_bytes::try_read_u32(&mut src)? as usize;
    if src.len() < count {
        return Err(DecodeError::UnexpectedEof {
            needed: count,
            remaining: src.len(),
        });
    }
    let mut priorities = Vec::with_capacity(count);
    for _ in 0..count {
        priorities.push(DownloadPriority(io_bytes::read_u8(&mut src)));
    }
    Ok(priorities)
}
