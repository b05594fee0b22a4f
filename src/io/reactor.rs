//! Tokio integration
//!
//! Registers the context's completion notifier with the tokio IO driver and
//! calls `process` whenever it becomes readable, so AIO completions are
//! dispatched from the same event loop as sockets and timers.

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use super::context::Context;
use super::error::IoResult;

/// A context driven by notifier readiness on a tokio runtime
pub struct AioReactor {
    inner: AsyncFd<Context>,
}

impl AioReactor {
    /// Register `ctx` with the current runtime's IO driver
    ///
    /// Must be called from within a tokio runtime with IO enabled.
    pub fn new(ctx: Context) -> IoResult<Self> {
        let inner = AsyncFd::with_interest(ctx, Interest::READABLE)?;
        Ok(Self { inner })
    }

    pub fn context(&self) -> &Context {
        self.inner.get_ref()
    }

    pub fn context_mut(&mut self) -> &mut Context {
        self.inner.get_mut()
    }

    /// Wait for the notifier and dispatch what it reported.
    ///
    /// Never returns while nothing is pending; check `pending()` first.
    pub async fn turn(&mut self) -> IoResult<usize> {
        loop {
            let mut guard = self.inner.readable_mut().await?;
            let dispatched = guard.get_inner_mut().process()?;
            // process() consumed the counter, so the eventfd is no longer
            // readable until the kernel signals again
            guard.clear_ready();
            if dispatched > 0 {
                return Ok(dispatched);
            }
        }
    }

    /// Turn until nothing is pending. Returns the number dispatched.
    pub async fn drain(&mut self) -> IoResult<usize> {
        let mut dispatched = 0;
        while self.context().pending() > 0 {
            dispatched += self.turn().await?;
        }
        Ok(dispatched)
    }

    /// Deregister from the runtime and return the context
    pub fn into_inner(self) -> Context {
        self.inner.into_inner()
    }
}

impl std::fmt::Debug for AioReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AioReactor")
            .field("context", self.context())
            .finish()
    }
}
