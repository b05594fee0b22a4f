//! Linux native AIO engine
//!
//! A `Context` keeps a fixed number of read, write and poll requests in
//! flight on the kernel's AIO queue. Completions are signaled through one
//! eventfd and dispatched to per-request callbacks, either by draining
//! (`Context::run`) or from an external readiness loop (`Context::process`,
//! or `AioReactor` on tokio).
//!
//! Buffers are page-aligned `AlignedBuffer`s so the same requests work on
//! files opened with `O_DIRECT`. The engine owns a buffer while the kernel
//! may touch it and returns it through the callback's `Completion`.

pub mod aligned_buffer;
pub mod config;
pub mod error;
pub mod sync;

#[cfg(target_os = "linux")]
mod callbacks;
#[cfg(target_os = "linux")]
pub mod completion;
#[cfg(target_os = "linux")]
pub mod context;
#[cfg(target_os = "linux")]
mod notifier;
#[cfg(target_os = "linux")]
pub mod reactor;
#[cfg(target_os = "linux")]
mod slots;
#[cfg(target_os = "linux")]
mod stats;
#[cfg(target_os = "linux")]
mod sys;

pub use aligned_buffer::{AlignedBuffer, PAGE_SIZE};
pub use config::{AioConfig, TeardownPolicy, DEFAULT_CAPACITY};
pub use error::{IoError, IoResult, SubmitError};
pub use sync::{sync_read, sync_write};

#[cfg(target_os = "linux")]
pub use callbacks::Callback;
#[cfg(target_os = "linux")]
pub use completion::{Completion, OpKind};
#[cfg(target_os = "linux")]
pub use context::Context;
#[cfg(target_os = "linux")]
pub use reactor::AioReactor;
#[cfg(target_os = "linux")]
pub use slots::SlotId;
#[cfg(target_os = "linux")]
pub use stats::ContextStats;
