//! Page-aligned buffers for direct IO

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::error::{IoError, IoResult};

/// Page size for direct IO alignment (4KB)
pub const PAGE_SIZE: usize = 4096;

/// A fixed-length buffer aligned to PAGE_SIZE
///
/// The kernel reads from or writes into the whole buffer, so unlike a `Vec`
/// there is no separate fill length: `len()` is the transfer size of every
/// read or write submitted with it. The heap allocation never moves, which
/// keeps the address handed to the kernel valid while the buffer itself is
/// moved in and out of the engine.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: AlignedBuffer owns its data and can be sent between threads
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

macro_rules! accessors {
    ($($get:ident, $set:ident, $ty:ty, $from:ident, $to:ident;)*) => {
        $(
            #[doc = concat!("Read a `", stringify!($ty), "` at byte offset `off`")]
            #[inline]
            pub fn $get(&self, off: usize) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; N];
                raw.copy_from_slice(&self.as_slice()[off..off + N]);
                <$ty>::$from(raw)
            }

            #[doc = concat!("Write a `", stringify!($ty), "` at byte offset `off`")]
            #[inline]
            pub fn $set(&mut self, off: usize, x: $ty) {
                const N: usize = std::mem::size_of::<$ty>();
                self.as_mut_slice()[off..off + N].copy_from_slice(&x.$to());
            }
        )*
    };
}

impl AlignedBuffer {
    /// Create a new zeroed buffer of exactly `size` bytes
    ///
    /// `size` must be a non-zero multiple of PAGE_SIZE.
    pub fn new(size: usize) -> IoResult<Self> {
        if size == 0 || !Self::is_aligned(size) {
            return Err(IoError::BufferSize {
                size,
                alignment: PAGE_SIZE,
            });
        }

        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|_| IoError::Alignment {
            expected: PAGE_SIZE,
            actual: 0,
        })?;

        // Safety: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            IoError::Io(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "Failed to allocate aligned buffer",
            ))
        })?;

        Ok(Self { ptr, len: size })
    }

    /// Create a buffer with exactly one page
    pub fn page() -> IoResult<Self> {
        Self::new(PAGE_SIZE)
    }

    /// Create a buffer with multiple pages
    pub fn pages(count: usize) -> IoResult<Self> {
        Self::new(count * PAGE_SIZE)
    }

    /// Check if a size is page-aligned
    #[inline]
    pub fn is_aligned(size: usize) -> bool {
        size.is_multiple_of(PAGE_SIZE)
    }

    /// Byte length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length buffers cannot be created
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get a pointer to the buffer data
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Get a mutable pointer to the buffer data
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for len bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: ptr is valid for len bytes and uniquely borrowed
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Fill the buffer with zeros
    pub fn zero(&mut self) {
        self.fill(0);
    }

    /// Fill the whole buffer with `byte`
    pub fn fill(&mut self, byte: u8) {
        // Safety: ptr is valid for len bytes
        unsafe {
            std::ptr::write_bytes(self.ptr.as_ptr(), byte, self.len);
        }
    }

    /// Copy `data` into the buffer starting at `offset`
    pub fn copy_from_slice(&mut self, offset: usize, data: &[u8]) -> IoResult<()> {
        let end = offset.checked_add(data.len()).filter(|&end| end <= self.len);
        let Some(end) = end else {
            return Err(IoError::OutOfBounds {
                offset,
                len: data.len(),
                size: self.len,
            });
        };

        self.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    accessors! {
        get_u8, set_u8, u8, from_ne_bytes, to_ne_bytes;
        get_i8, set_i8, i8, from_ne_bytes, to_ne_bytes;
        get_u16_ne, set_u16_ne, u16, from_ne_bytes, to_ne_bytes;
        get_u16_be, set_u16_be, u16, from_be_bytes, to_be_bytes;
        get_u16_le, set_u16_le, u16, from_le_bytes, to_le_bytes;
        get_i16_ne, set_i16_ne, i16, from_ne_bytes, to_ne_bytes;
        get_i16_be, set_i16_be, i16, from_be_bytes, to_be_bytes;
        get_i16_le, set_i16_le, i16, from_le_bytes, to_le_bytes;
        get_u32_ne, set_u32_ne, u32, from_ne_bytes, to_ne_bytes;
        get_u32_be, set_u32_be, u32, from_be_bytes, to_be_bytes;
        get_u32_le, set_u32_le, u32, from_le_bytes, to_le_bytes;
        get_i32_ne, set_i32_ne, i32, from_ne_bytes, to_ne_bytes;
        get_i32_be, set_i32_be, i32, from_be_bytes, to_be_bytes;
        get_i32_le, set_i32_le, i32, from_le_bytes, to_le_bytes;
        get_u64_ne, set_u64_ne, u64, from_ne_bytes, to_ne_bytes;
        get_u64_be, set_u64_be, u64, from_be_bytes, to_be_bytes;
        get_u64_le, set_u64_le, u64, from_le_bytes, to_le_bytes;
        get_i64_ne, set_i64_ne, i64, from_ne_bytes, to_ne_bytes;
        get_i64_be, set_i64_be, i64, from_be_bytes, to_be_bytes;
        get_i64_le, set_i64_le, i64, from_le_bytes, to_le_bytes;
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, PAGE_SIZE)
            .expect("layout was valid at allocation");
        // Safety: ptr was allocated with this layout
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let buf = AlignedBuffer::pages(3).unwrap();
        assert!((buf.as_ptr() as usize).is_multiple_of(PAGE_SIZE));
        assert_eq!(buf.len(), PAGE_SIZE * 3);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_unaligned_size() {
        assert!(matches!(
            AlignedBuffer::new(100),
            Err(IoError::BufferSize { size: 100, .. })
        ));
        assert!(matches!(
            AlignedBuffer::new(0),
            Err(IoError::BufferSize { size: 0, .. })
        ));
    }

    #[test]
    fn test_copy_from_slice() {
        let mut buf = AlignedBuffer::page().unwrap();
        buf.copy_from_slice(10, b"hello").unwrap();
        assert_eq!(&buf[10..15], b"hello");

        let err = buf.copy_from_slice(PAGE_SIZE - 2, b"hello").unwrap_err();
        assert!(matches!(err, IoError::OutOfBounds { .. }));
    }

    #[test]
    fn test_endian_accessors() {
        let mut buf = AlignedBuffer::page().unwrap();

        buf.set_u32_be(0, 0x0102_0304);
        assert_eq!(&buf[0..4], &[1, 2, 3, 4]);
        assert_eq!(buf.get_u32_le(0), 0x0403_0201);

        buf.set_i16_le(7, -2);
        assert_eq!(buf.get_i16_le(7), -2);
        assert_eq!(buf.get_u16_be(7), 0xfeff);

        buf.set_u64_ne(100, u64::MAX - 1);
        assert_eq!(buf.get_u64_ne(100), u64::MAX - 1);

        buf.set_i8(PAGE_SIZE - 1, -1);
        assert_eq!(buf.get_u8(PAGE_SIZE - 1), 0xff);
    }

    #[test]
    #[should_panic]
    fn test_accessor_out_of_range_panics() {
        let buf = AlignedBuffer::page().unwrap();
        buf.get_u32_le(PAGE_SIZE - 3);
    }

    #[test]
    fn test_fill() {
        let mut buf = AlignedBuffer::page().unwrap();
        buf.fill(0xab);
        assert!(buf.iter().all(|&b| b == 0xab));
        buf.zero();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
