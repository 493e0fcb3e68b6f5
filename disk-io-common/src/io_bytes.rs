//! Fixed-width big-endian integer encoding.
//!
//! Readers and writers operate on a cursor (`&mut &[u8]` / `&mut &mut [u8]`)
//! and advance it by exactly the width of the integer. The unchecked variants
//! do not validate capacity: the caller guarantees enough bytes are left, and a
//! violation panics on the slice bound. The `try_read_*` variants are for input
//! that comes from outside the process.

/// Returned by the checked readers when the input ends early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
}

macro_rules! fixed_width {
    ($($ty:ty => $read:ident, $try_read:ident, $write:ident;)*) => {
        $(
            #[doc = concat!("Reads a big-endian `", stringify!($ty), "` and advances `src`.")]
            #[inline]
            pub fn $read(src: &mut &[u8]) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let (head, tail) = src.split_at(N);
                let mut raw = [0u8; N];
                raw.copy_from_slice(head);
                *src = tail;
                <$ty>::from_be_bytes(raw)
            }

            #[doc = concat!("Like [`", stringify!($read), "`] but fails instead of panicking on short input.")]
            #[inline]
            pub fn $try_read(src: &mut &[u8]) -> Result<$ty, DecodeError> {
                const N: usize = std::mem::size_of::<$ty>();
                if src.len() < N {
                    return Err(DecodeError::UnexpectedEof {
                        needed: N,
                        remaining: src.len(),
                    });
                }
                Ok($read(src))
            }

            #[doc = concat!("Writes `val` as a big-endian `", stringify!($ty), "` and advances `dst`.")]
            #[inline]
            pub fn $write(val: $ty, dst: &mut &mut [u8]) {
                const N: usize = std::mem::size_of::<$ty>();
                let (head, tail) = std::mem::take(dst).split_at_mut(N);
                head.copy_from_slice(&val.to_be_bytes());
                *dst = tail;
            }
        )*
    };
}

fixed_width! {
    u8 => read_u8, try_read_u8, write_u8;
    i8 => read_i8, try_read_i8, write_i8;
    u16 => read_u16, try_read_u16, write_u16;
    i16 => read_i16, try_read_i16, write_i16;
    u32 => read_u32, try_read_u32, write_u32;
    i32 => read_i32, try_read_i32, write_i32;
    u64 => read_u64, try_read_u64, write_u64;
    i64 => read_i64, try_read_i64, write_i64;
}

/// Copies the bytes of `s` (no length prefix, no terminator) and advances `dst`.
/// Returns the number of bytes written.
pub fn write_string(s: &str, dst: &mut &mut [u8]) -> usize {
    let (head, tail) = std::mem::take(dst).split_at_mut(s.len());
    head.copy_from_slice(s.as_bytes());
    *dst = tail;
    s.len()
}
