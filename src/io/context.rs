//! AIO context
//!
//! A `Context` owns one kernel AIO queue, the eventfd its requests complete
//! into, a fixed pool of request slots and the callback for every occupied
//! slot. Submission is synchronous; completions are reaped either by `run`
//! (drain everything) or by `process` (drain what the eventfd reported, for
//! use from a readiness loop).
//!
//! ```text
//!   submit_*  ──► slot pool ──► io_submit ──► kernel
//!                    ▲                          │
//!                    │ release            eventfd += 1
//!                    │                          ▼
//!   callback ◄── classify ◄── io_getevents ◄── run / process
//! ```
//!
//! The context is single-threaded: it is neither `Send` nor `Sync`, and
//! callbacks run on the thread that drains.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, trace, warn};

use super::aligned_buffer::AlignedBuffer;
use super::callbacks::{Callback, CallbackTable, PendingOp};
use super::completion::{Completion, OpKind};
use super::config::{AioConfig, TeardownPolicy};
use super::error::{IoError, IoResult, SubmitError};
use super::notifier::Notifier;
use super::slots::{SlotId, SlotPool};
use super::stats::ContextStats;
use super::sync::file_offset;
use super::sys::{self, AioContext, IoEvent, Iocb, Wait, IOCB_CMD_PREAD, IOCB_CMD_PWRITE};

/// Fixed-capacity queue of in-flight AIO operations
pub struct Context {
    ctx: AioContext,
    released: bool,
    pending: usize,
    notifier: Notifier,
    slots: SlotPool,
    callbacks: CallbackTable,
    /// Scratch space for io_getevents, one entry per slot
    events: Box<[IoEvent]>,
    /// Events reaped by `run` whose eventfd counts have not been read yet
    uncounted: u64,
    teardown: TeardownPolicy,
    stats: ContextStats,
}

impl Context {
    /// Create a context holding up to `capacity` operations in flight
    pub fn new(capacity: usize) -> IoResult<Self> {
        Self::with_config(AioConfig::new().with_capacity(capacity))
    }

    pub fn with_config(config: AioConfig) -> IoResult<Self> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(IoError::InvalidCapacity(capacity));
        }

        let notifier = Notifier::new(config.cloexec)
            .map_err(|source| IoError::ResourceExhaustion { capacity, source })?;
        let ctx = sys::io_setup(capacity)
            .map_err(|source| IoError::ResourceExhaustion { capacity, source })?;

        debug!(capacity, fd = notifier.as_raw_fd(), "Created AIO context");

        Ok(Self {
            ctx,
            released: false,
            pending: 0,
            notifier,
            slots: SlotPool::new(capacity),
            callbacks: CallbackTable::new(capacity),
            events: vec![IoEvent::default(); capacity].into_boxed_slice(),
            uncounted: 0,
            teardown: config.teardown,
            stats: ContextStats::default(),
        })
    }

    /// Maximum number of operations in flight
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Operations submitted and not yet reaped
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Free slots left for submission
    pub fn available(&self) -> usize {
        self.slots.available()
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    /// The completion notifier, for multiplexing with other readiness sources.
    ///
    /// Becomes readable when completions are waiting; call `process` then.
    /// Reading it directly steals counts from `process`.
    pub fn descriptor(&self) -> BorrowedFd<'_> {
        self.notifier.as_fd()
    }

    /// Read the whole buffer from `fd` at `offset`
    ///
    /// The buffer is handed back through the callback's `Completion`.
    pub fn submit_read<F>(
        &mut self,
        fd: impl AsFd,
        offset: u64,
        mut buf: AlignedBuffer,
        callback: F,
    ) -> Result<SlotId, SubmitError>
    where
        F: FnOnce(&mut Context, Completion) + 'static,
    {
        let raw = fd.as_fd().as_raw_fd();
        let addr = buf.as_mut_ptr() as u64;
        let len = buf.len();
        let offset = match file_offset(offset, len) {
            Ok(offset) => offset,
            Err(e) => return Err(SubmitError::new(e, Some(buf))),
        };
        self.submit(OpKind::Read, Some(buf), Box::new(callback), |iocb| {
            iocb.prep_rw(IOCB_CMD_PREAD, raw, addr, len, offset)
        })
    }

    /// Write the whole buffer to `fd` at `offset`
    pub fn submit_write<F>(
        &mut self,
        fd: impl AsFd,
        offset: u64,
        buf: AlignedBuffer,
        callback: F,
    ) -> Result<SlotId, SubmitError>
    where
        F: FnOnce(&mut Context, Completion) + 'static,
    {
        let raw = fd.as_fd().as_raw_fd();
        let addr = buf.as_ptr() as u64;
        let len = buf.len();
        let offset = match file_offset(offset, len) {
            Ok(offset) => offset,
            Err(e) => return Err(SubmitError::new(e, Some(buf))),
        };
        self.submit(OpKind::Write, Some(buf), Box::new(callback), |iocb| {
            iocb.prep_rw(IOCB_CMD_PWRITE, raw, addr, len, offset)
        })
    }

    /// Wait for `events` (`POLLIN`, `POLLOUT`, ...) on `fd`
    ///
    /// Completes with `Completion::Ready(revents)`. Needs Linux 4.18+.
    pub fn submit_poll<F>(
        &mut self,
        fd: impl AsFd,
        events: i16,
        callback: F,
    ) -> Result<SlotId, SubmitError>
    where
        F: FnOnce(&mut Context, Completion) + 'static,
    {
        let raw = fd.as_fd().as_raw_fd();
        self.submit(OpKind::Poll, None, Box::new(callback), |iocb| {
            iocb.prep_poll(raw, events)
        })
    }

    fn submit(
        &mut self,
        kind: OpKind,
        buf: Option<AlignedBuffer>,
        callback: Callback,
        prep: impl FnOnce(&mut Iocb),
    ) -> Result<SlotId, SubmitError> {
        debug_assert_eq!(self.pending + self.slots.available(), self.capacity());

        let Some(slot) = self.slots.acquire() else {
            let capacity = self.capacity();
            return Err(SubmitError::new(IoError::CapacityExceeded { capacity }, buf));
        };

        let iocb = self.slots.iocb_mut(slot);
        prep(iocb);
        iocb.set_eventfd(self.notifier.as_raw_fd());
        self.callbacks.insert(slot, PendingOp { kind, buf, callback });

        // Safety: the iocb stays in the slot arena and the buffer in the
        // callback table until this slot's completion is reaped. Both are
        // only released after io_destroy on teardown.
        let submitted = unsafe { sys::io_submit_one(self.ctx, self.slots.iocb_ptr(slot)) };
        if let Err(source) = submitted {
            let buf = self.callbacks.take(slot).and_then(|op| op.buf);
            self.slots.release(slot);
            debug!(%slot, ?kind, error = %source, "AIO submission rejected");
            return Err(SubmitError::new(IoError::SubmissionFailed(source), buf));
        }

        self.pending += 1;
        self.stats.submitted += 1;
        trace!(%slot, ?kind, pending = self.pending, "Submitted AIO request");
        Ok(slot)
    }

    /// Drain until nothing is pending, blocking for completions.
    ///
    /// Callbacks may submit more work; `run` keeps going until that is
    /// drained too. Returns the number of callbacks invoked.
    ///
    /// Events reaped here are remembered until their eventfd counts are
    /// read, so a later `process` never waits for them again. That holds
    /// even when a callback panics or the kernel wait fails part way.
    pub fn run(&mut self) -> IoResult<usize> {
        let mut dispatched = 0;
        while self.pending > 0 {
            dispatched += self.reap(1, self.pending, Wait::Block, false)?;
        }

        let stale = self.notifier.take()?;
        self.uncounted = self.uncounted.saturating_sub(stale);
        Ok(dispatched)
    }

    /// Dispatch the completions signaled since the last call.
    ///
    /// Never blocks: only events already in the completion ring are
    /// fetched, and counts for events `run` reaped earlier are skipped.
    pub fn process(&mut self) -> IoResult<usize> {
        let signaled = self.notifier.take()?;
        if signaled == 0 {
            return Ok(0);
        }

        let absorbed = signaled.min(self.uncounted);
        self.uncounted -= absorbed;
        let fresh = signaled - absorbed;
        if fresh == 0 {
            trace!(absorbed, "AIO notifier counts already reaped by run");
            return Ok(0);
        }

        let want = usize::try_from(fresh)
            .unwrap_or(usize::MAX)
            .min(self.pending);
        if want == 0 {
            warn!(signaled = fresh, "AIO notifier signaled with nothing pending");
            return Ok(0);
        }

        self.reap(0, want, Wait::Poll, true)
    }

    /// Fetch between `min_nr` and `max_nr` events and dispatch them.
    ///
    /// `counted` says whether the caller already consumed the eventfd
    /// counts for what it reaps. Bookkeeping for the whole batch is done
    /// before any callback runs.
    fn reap(
        &mut self,
        min_nr: usize,
        max_nr: usize,
        wait: Wait,
        counted: bool,
    ) -> IoResult<usize> {
        self.stats.waits += 1;
        let n = sys::io_getevents(self.ctx, min_nr, &mut self.events[..max_nr], wait)?;
        if !counted {
            self.uncounted += n as u64;
        }

        let mut ready: Vec<(Callback, Completion)> = Vec::with_capacity(n);
        for ev in &self.events[..n] {
            let Some(slot) = self.slots.resolve(ev.data) else {
                warn!(tag = ev.data, "AIO event with unknown slot tag");
                continue;
            };
            let Some(op) = self.callbacks.take(slot) else {
                warn!(%slot, "AIO event for a vacant slot");
                continue;
            };

            self.slots.release(slot);
            self.pending -= 1;
            self.stats.completed += 1;

            let kind = op.kind;
            let completion = Completion::classify(kind, op.buf, ev.res, ev.res2);
            match &completion {
                Completion::Partial { transferred, .. } => {
                    self.stats.partial += 1;
                    debug!(%slot, ?kind, transferred, "AIO partial transfer");
                }
                Completion::Error { code, .. } => {
                    self.stats.failed += 1;
                    debug!(%slot, ?kind, code, "AIO request failed");
                }
                _ => trace!(%slot, ?kind, res = ev.res, "AIO request completed"),
            }
            ready.push((op.callback, completion));
        }

        Ok(self.dispatch(ready))
    }

    /// Invoke callbacks in kernel report order.
    ///
    /// A panicking callback does not cost the rest of the batch its
    /// completions; the first panic is resumed once all have run.
    fn dispatch(&mut self, ready: Vec<(Callback, Completion)>) -> usize {
        let n = ready.len();
        let mut panicked = None;

        for (callback, completion) in ready {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(self, completion)));
            if let Err(payload) = result {
                error!("AIO completion callback panicked");
                panicked.get_or_insert(payload);
            }
        }

        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        n
    }

    /// Drain everything, then release the kernel queue and notifier.
    pub fn close(mut self) -> IoResult<()> {
        self.run()?;
        self.release().map_err(IoError::from)
    }

    fn release(&mut self) -> std::io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!(capacity = self.capacity(), "Releasing AIO context");
        sys::io_destroy(self.ctx)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let mut panicked = None;
        if self.pending > 0 {
            let policy = if std::thread::panicking() {
                TeardownPolicy::Abandon
            } else {
                self.teardown
            };
            warn!(
                pending = self.pending,
                ?policy,
                "AIO context dropped with operations in flight"
            );

            if policy == TeardownPolicy::Drain {
                match panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Failed to drain AIO context"),
                    Err(payload) => {
                        error!(
                            pending = self.pending,
                            "AIO callback panicked while draining on drop"
                        );
                        panicked = Some(payload);
                    }
                }
            }
        }

        // io_destroy waits for in-flight requests, so after this the kernel
        // no longer touches slots or buffers and both can be freed.
        if let Err(e) = self.release() {
            error!(error = %e, "io_destroy failed");
        }

        let abandoned = self.callbacks.clear();
        if abandoned > 0 {
            debug!(abandoned, "Dropped AIO callbacks without completion");
        }

        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }
}

impl AsFd for Context {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.descriptor()
    }
}

impl AsRawFd for Context {
    fn as_raw_fd(&self) -> RawFd {
        self.notifier.as_raw_fd()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("capacity", &self.capacity())
            .field("pending", &self.pending)
            .field("notifier", &self.notifier.as_raw_fd())
            .field("teardown", &self.teardown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(Context::new(0), Err(IoError::InvalidCapacity(0))));
    }

    #[test]
    fn test_run_with_nothing_pending() {
        let mut ctx = Context::new(2).unwrap();
        assert_eq!(ctx.run().unwrap(), 0);
        assert_eq!(ctx.stats().waits, 0);
    }

    #[test]
    fn test_process_without_signal_skips_wait() {
        let mut ctx = Context::new(2).unwrap();
        assert_eq!(ctx.process().unwrap(), 0);
        assert_eq!(ctx.stats().waits, 0);
    }

    #[test]
    fn test_stale_signal_ignored() {
        let mut ctx = Context::new(2).unwrap();
        ctx.notifier.signal(3).unwrap();
        assert_eq!(ctx.process().unwrap(), 0);
        assert_eq!(ctx.stats().waits, 0);
        assert_eq!(ctx.notifier.take().unwrap(), 0);
    }

    #[test]
    fn test_process_never_waits_for_unfinished_events() {
        let (rd, _wr) = std::io::pipe().unwrap();
        let mut ctx = Context::with_config(
            AioConfig::new()
                .with_capacity(2)
                .with_teardown(TeardownPolicy::Abandon),
        )
        .unwrap();
        ctx.submit_poll(&rd, libc::POLLIN, |_, _| {}).unwrap();

        // A count with no finished request behind it
        ctx.notifier.signal(1).unwrap();
        assert_eq!(ctx.process().unwrap(), 0);
        assert_eq!(ctx.pending(), 1);
        assert_eq!(ctx.stats().waits, 1);
    }

    #[test]
    fn test_counts_reaped_by_run_are_absorbed() {
        let mut ctx = Context::new(2).unwrap();
        ctx.uncounted = 2;
        ctx.notifier.signal(3).unwrap();

        // Two counts belong to earlier events, the third has nothing pending
        assert_eq!(ctx.process().unwrap(), 0);
        assert_eq!(ctx.uncounted, 0);
        assert_eq!(ctx.stats().waits, 0);
    }

    #[test]
    fn test_offset_out_of_range_returns_buffer() {
        let file = tempfile::tempfile().unwrap();
        let mut ctx = Context::new(2).unwrap();

        let buf = AlignedBuffer::page().unwrap();
        let err = ctx.submit_read(&file, u64::MAX, buf, |_, _| {}).unwrap_err();
        assert!(matches!(err.error, IoError::OffsetRange { offset: u64::MAX, .. }));
        assert!(err.into_buffer().is_some());

        let buf = AlignedBuffer::page().unwrap();
        let err = ctx
            .submit_write(&file, i64::MAX as u64, buf, |_, _| {})
            .unwrap_err();
        assert!(matches!(err.error, IoError::OffsetRange { .. }));

        assert_eq!(ctx.pending(), 0);
        assert_eq!(ctx.available(), 2);
        assert_eq!(ctx.stats().submitted, 0);
    }

    #[test]
    fn test_capacity_exceeded_returns_buffer() {
        let (rd, _wr) = std::io::pipe().unwrap();
        let mut ctx = Context::with_config(
            AioConfig::new()
                .with_capacity(1)
                .with_teardown(TeardownPolicy::Abandon),
        )
        .unwrap();

        ctx.submit_poll(&rd, libc::POLLIN, |_, _| {}).unwrap();
        assert_eq!(ctx.available(), 0);

        let buf = AlignedBuffer::page().unwrap();
        let err = ctx.submit_read(&rd, 0, buf, |_, _| {}).unwrap_err();
        assert!(matches!(err.error, IoError::CapacityExceeded { capacity: 1 }));
        assert!(err.into_buffer().is_some());
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn test_abandon_drops_callbacks_uncalled() {
        use std::cell::Cell;
        use std::rc::Rc;

        let (rd, _wr) = std::io::pipe().unwrap();
        let fired = Rc::new(Cell::new(false));
        let mut ctx = Context::with_config(
            AioConfig::new()
                .with_capacity(2)
                .with_teardown(TeardownPolicy::Abandon),
        )
        .unwrap();

        let flag = fired.clone();
        ctx.submit_poll(&rd, libc::POLLIN, move |_, _| flag.set(true))
            .unwrap();
        drop(ctx);

        assert!(!fired.get());
        assert_eq!(Rc::strong_count(&fired), 1);
    }
}
