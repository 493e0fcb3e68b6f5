//! Owned block buffers that travel with read/write jobs.
//!
//! A [`DiskBuffer`] is moved into a job when it is submitted and handed back to
//! the completion handler, so the disk thread never borrows submitter memory.

use std::ops::{Deref, DerefMut};

/// An owned, contiguous block buffer.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct DiskBuffer {
    buf: Vec<u8>,
}

impl DiskBuffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        DiskBuffer { buf: vec![0; len] }
    }

    pub fn from_vec(buf: Vec<u8>) -> Self {
        DiskBuffer { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Grows or shrinks the buffer, zero-filling new bytes.
    pub fn resize(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl Deref for DiskBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for DiskBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl From<Vec<u8>> for DiskBuffer {
    fn from(buf: Vec<u8>) -> Self {
        DiskBuffer { buf }
    }
}

impl From<&[u8]> for DiskBuffer {
    fn from(buf: &[u8]) -> Self {
        DiskBuffer { buf: buf.to_vec() }
    }
}

impl std::fmt::Debug for DiskBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}

#[cfg(feature = "bytes")]
impl From<DiskBuffer> for bytes::Bytes {
    fn from(buf: DiskBuffer) -> Self {
        bytes::Bytes::from(buf.buf)
    }
}

#[cfg(feature = "bytes")]
impl From<bytes::BytesMut> for DiskBuffer {
    fn from(buf: bytes::BytesMut) -> Self {
        DiskBuffer { buf: buf.to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use super::DiskBuffer;

    #[test]
    fn new_is_zero_filled() {
        let buf = DiskBuffer::new(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn resize_keeps_prefix() {
        let mut buf = DiskBuffer::from(&b"abc"[..]);
        buf.resize(5);
        assert_eq!(buf.as_slice(), b"abc\0\0");
        buf.resize(1);
        assert_eq!(buf.into_vec(), b"a".to_vec());
    }

    #[test]
    fn debug_does_not_dump_contents() {
        let buf = DiskBuffer::from(vec![0xab; 4]);
        assert_eq!(format!("{buf:?}"), "DiskBuffer { len: 4 }");
    }
}
