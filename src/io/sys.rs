//! Linux native AIO syscalls
//!
//! libc exposes the syscall numbers but not the `linux/aio_abi.h` structures,
//! so the request and event layouts are mirrored here.

use std::io;
use std::os::fd::RawFd;
use std::ptr;

/// Kernel AIO context handle (`aio_context_t`)
pub(crate) type AioContext = libc::c_ulong;

pub(crate) const IOCB_CMD_PREAD: u16 = 0;
pub(crate) const IOCB_CMD_PWRITE: u16 = 1;
pub(crate) const IOCB_CMD_POLL: u16 = 5;

/// `aio_resfd` is valid: signal the eventfd on completion
pub(crate) const IOCB_FLAG_RESFD: u32 = 1 << 0;

/// Mirror of `struct iocb`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Iocb {
    pub aio_data: u64,
    #[cfg(target_endian = "little")]
    pub aio_key: u32,
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_key: u32,
    pub aio_lio_opcode: u16,
    pub aio_reqprio: i16,
    pub aio_fildes: u32,
    pub aio_buf: u64,
    pub aio_nbytes: u64,
    pub aio_offset: i64,
    pub aio_reserved2: u64,
    pub aio_flags: u32,
    pub aio_resfd: u32,
}

impl Iocb {
    /// Reset to a positioned read or write, keeping the slot tag
    pub fn prep_rw(&mut self, opcode: u16, fd: RawFd, buf: u64, len: usize, offset: i64) {
        *self = Iocb {
            aio_data: self.aio_data,
            aio_lio_opcode: opcode,
            aio_fildes: fd as u32,
            aio_buf: buf,
            aio_nbytes: len as u64,
            aio_offset: offset,
            ..Iocb::default()
        };
    }

    /// Reset to a poll for `events`, keeping the slot tag
    pub fn prep_poll(&mut self, fd: RawFd, events: i16) {
        *self = Iocb {
            aio_data: self.aio_data,
            aio_lio_opcode: IOCB_CMD_POLL,
            aio_fildes: fd as u32,
            aio_buf: events as u16 as u64,
            ..Iocb::default()
        };
    }

    /// Route the completion to an eventfd
    pub fn set_eventfd(&mut self, fd: RawFd) {
        self.aio_flags |= IOCB_FLAG_RESFD;
        self.aio_resfd = fd as u32;
    }
}

/// Mirror of `struct io_event`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct IoEvent {
    pub data: u64,
    pub obj: u64,
    pub res: i64,
    pub res2: i64,
}

pub(crate) fn io_setup(nr_events: usize) -> io::Result<AioContext> {
    let mut ctx: AioContext = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_setup,
            nr_events as libc::c_uint,
            &mut ctx as *mut AioContext,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ctx)
}

/// Tear down a kernel context.
///
/// The kernel cancels what it can and waits for the remaining in-flight
/// requests before returning, so no request memory is touched afterwards.
pub(crate) fn io_destroy(ctx: AioContext) -> io::Result<()> {
    let ret = unsafe { libc::syscall(libc::SYS_io_destroy, ctx) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Submit a single request.
///
/// # Safety
/// `iocb` and every buffer it references must stay valid until its
/// completion has been reaped.
pub(crate) unsafe fn io_submit_one(ctx: AioContext, iocb: *mut Iocb) -> io::Result<()> {
    let mut list = [iocb];
    let ret = libc::syscall(
        libc::SYS_io_submit,
        ctx,
        1 as libc::c_long,
        list.as_mut_ptr(),
    );
    match ret {
        1 => Ok(()),
        r if r < 0 => Err(io::Error::last_os_error()),
        _ => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "io_submit accepted no request",
        )),
    }
}

/// How long `io_getevents` may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// Until `min_nr` events are available
    Block,
    /// Return only what is already in the completion ring
    Poll,
}

/// Fetch between `min_nr` and `events.len()` completions.
///
/// Retries when interrupted by a signal.
pub(crate) fn io_getevents(
    ctx: AioContext,
    min_nr: usize,
    events: &mut [IoEvent],
    wait: Wait,
) -> io::Result<usize> {
    debug_assert!(min_nr <= events.len());
    let mut zero = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let timeout = match wait {
        Wait::Block => ptr::null_mut(),
        Wait::Poll => &mut zero as *mut libc::timespec,
    };
    loop {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                ctx,
                min_nr as libc::c_long,
                events.len() as libc::c_long,
                events.as_mut_ptr(),
                timeout,
            )
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
