//! Blocking pread/pwrite fallback
//!
//! For callers that hit the context's capacity and would rather block than
//! wait for a slot, or for one-off IO outside any context.

use std::io;
use std::os::fd::{AsFd, AsRawFd};

use super::aligned_buffer::AlignedBuffer;
use super::error::{IoError, IoResult};

/// Check that `offset..offset + len` is addressable as a file offset
pub(crate) fn file_offset(offset: u64, len: usize) -> IoResult<libc::off_t> {
    offset
        .checked_add(len as u64)
        .filter(|&end| libc::off_t::try_from(end).is_ok())
        .map(|_| offset as libc::off_t)
        .ok_or(IoError::OffsetRange { offset, len })
}

/// Fill the whole buffer from `fd` at `offset`
///
/// Reaching end of file first is a `ShortTransfer` error.
pub fn sync_read(fd: impl AsFd, offset: u64, buf: &mut AlignedBuffer) -> IoResult<()> {
    let raw = fd.as_fd().as_raw_fd();
    let len = buf.len();
    let start = file_offset(offset, len)?;
    let mut done = 0;

    while done < len {
        let dst = buf.as_mut_slice()[done..].as_mut_ptr();
        let n = unsafe {
            libc::pread(
                raw,
                dst as *mut libc::c_void,
                len - done,
                start + done as libc::off_t,
            )
        };
        match n {
            0 => {
                return Err(IoError::ShortTransfer {
                    expected: len,
                    actual: done,
                })
            }
            n if n > 0 => done += n as usize,
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err.into());
                }
            }
        }
    }

    Ok(())
}

/// Write `buf[buf_offset..buf_offset + len]` to `fd` at `offset`
///
/// Returns the number of bytes written, which is always `len`.
pub fn sync_write(
    fd: impl AsFd,
    offset: u64,
    buf: &AlignedBuffer,
    buf_offset: usize,
    len: usize,
) -> IoResult<usize> {
    let end = buf_offset
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(IoError::OutOfBounds {
            offset: buf_offset,
            len,
            size: buf.len(),
        })?;

    let start = file_offset(offset, len)?;
    let raw = fd.as_fd().as_raw_fd();
    let data = &buf[buf_offset..end];
    let mut done = 0;

    while done < len {
        let n = unsafe {
            libc::pwrite(
                raw,
                data[done..].as_ptr() as *const libc::c_void,
                len - done,
                start + done as libc::off_t,
            )
        };
        match n {
            0 => {
                return Err(IoError::ShortTransfer {
                    expected: len,
                    actual: done,
                })
            }
            n if n > 0 => done += n as usize,
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err.into());
                }
            }
        }
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::aligned_buffer::PAGE_SIZE;

    #[test]
    fn test_write_read_roundtrip() {
        let file = tempfile::tempfile().unwrap();

        let mut src = AlignedBuffer::pages(2).unwrap();
        src.fill(0x5a);
        src.copy_from_slice(0, b"sync fallback").unwrap();
        assert_eq!(sync_write(&file, 0, &src, 0, src.len()).unwrap(), 2 * PAGE_SIZE);

        let mut dst = AlignedBuffer::pages(2).unwrap();
        sync_read(&file, 0, &mut dst).unwrap();
        assert_eq!(dst.as_slice(), src.as_slice());
    }

    #[test]
    fn test_write_subrange() {
        let file = tempfile::tempfile().unwrap();

        let mut src = AlignedBuffer::page().unwrap();
        src.copy_from_slice(100, b"middle").unwrap();
        assert_eq!(sync_write(&file, 10, &src, 100, 6).unwrap(), 6);
        assert_eq!(file.metadata().unwrap().len(), 16);
    }

    #[test]
    fn test_write_out_of_bounds() {
        let file = tempfile::tempfile().unwrap();
        let src = AlignedBuffer::page().unwrap();
        let err = sync_write(&file, 0, &src, PAGE_SIZE - 1, 2).unwrap_err();
        assert!(matches!(err, IoError::OutOfBounds { .. }));
    }

    #[test]
    fn test_offset_past_off_t_rejected() {
        let file = tempfile::tempfile().unwrap();
        let mut buf = AlignedBuffer::page().unwrap();

        let err = sync_read(&file, u64::MAX, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            IoError::OffsetRange {
                offset: u64::MAX,
                len: PAGE_SIZE
            }
        ));

        // The end of the range has to fit, not just the start
        let err = sync_write(&file, i64::MAX as u64, &buf, 0, 1).unwrap_err();
        assert!(matches!(err, IoError::OffsetRange { len: 1, .. }));
        assert_eq!(file.metadata().unwrap().len(), 0);
    }

    #[test]
    fn test_file_offset_bounds() {
        assert_eq!(file_offset(0, PAGE_SIZE).unwrap(), 0);
        let last = i64::MAX as u64 - PAGE_SIZE as u64;
        assert_eq!(file_offset(last, PAGE_SIZE).unwrap(), last as libc::off_t);
        assert!(file_offset(last + 1, PAGE_SIZE).is_err());
    }

    #[test]
    fn test_read_past_eof_is_short() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(100).unwrap();

        let mut dst = AlignedBuffer::page().unwrap();
        let err = sync_read(&file, 0, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            IoError::ShortTransfer {
                expected: PAGE_SIZE,
                actual: 100
            }
        ));
    }
}
