//! IO error types

use thiserror::Error;

use super::aligned_buffer::AlignedBuffer;

/// IO operation errors
#[derive(Error, Debug)]
pub enum IoError {
    /// Standard IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The kernel could not set up a queue or notifier of the requested size
    #[error("Cannot allocate AIO context for {capacity} operations: {source}")]
    ResourceExhaustion {
        capacity: usize,
        #[source]
        source: std::io::Error,
    },

    /// A context must hold at least one operation
    #[error("Invalid AIO context capacity {0}")]
    InvalidCapacity(usize),

    /// Every slot is occupied; the caller has to drain before submitting
    #[error("All {capacity} AIO slots are in flight")]
    CapacityExceeded { capacity: usize },

    /// io_submit rejected the request
    #[error("AIO submission failed: {0}")]
    SubmissionFailed(#[source] std::io::Error),

    /// Buffer alignment error
    #[error("Buffer not aligned to {expected} bytes (got offset {actual})")]
    Alignment { expected: usize, actual: usize },

    /// Buffer size error
    #[error("Buffer size {size} not a multiple of {alignment}")]
    BufferSize { size: usize, alignment: usize },

    /// Byte range outside the buffer
    #[error("Range {offset}..{offset}+{len} outside buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// File range past the largest offset the kernel accepts
    #[error("File range {offset}+{len} exceeds the maximum file offset")]
    OffsetRange { offset: u64, len: usize },

    /// Synchronous transfer stopped early
    #[error("Short transfer: expected {expected} bytes, moved {actual}")]
    ShortTransfer { expected: usize, actual: usize },
}

/// Result type for IO operations
pub type IoResult<T> = Result<T, IoError>;

/// A rejected submission.
///
/// The engine owns a buffer only while the kernel may touch it, so a failed
/// submission hands the buffer straight back.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct SubmitError {
    #[source]
    pub error: IoError,
    pub buf: Option<AlignedBuffer>,
}

impl SubmitError {
    pub(crate) fn new(error: IoError, buf: Option<AlignedBuffer>) -> Self {
        Self { error, buf }
    }

    /// Recover the buffer passed to the failed submission, if any
    pub fn into_buffer(self) -> Option<AlignedBuffer> {
        self.buf
    }
}

impl From<SubmitError> for IoError {
    fn from(e: SubmitError) -> Self {
        e.error
    }
}
