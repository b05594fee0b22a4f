//! aiodisk - Linux native AIO completion engine
//!
//! Features:
//! - Fixed-capacity contexts of in-flight read, write and poll requests
//! - Completions signaled through a single eventfd, dispatched to callbacks
//! - Blocking drain, readiness-driven processing, or a tokio reactor
//! - Page-aligned buffers for direct IO, with a blocking pread/pwrite fallback

pub mod io;
