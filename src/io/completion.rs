//! Completion outcomes

use super::aligned_buffer::AlignedBuffer;

/// Kind of operation occupying a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    Write,
    Poll,
}

/// Outcome delivered to an operation's callback
#[derive(Debug)]
pub enum Completion {
    /// The whole buffer was transferred
    Done(AlignedBuffer),
    /// Fewer bytes than the buffer length were transferred, without an error.
    /// Typically EOF on a read; resubmit for the remainder if needed.
    Partial {
        buf: AlignedBuffer,
        transferred: usize,
    },
    /// A poll request fired with these `revents`
    Ready(i16),
    /// The kernel reported an errno for the request
    Error {
        code: i32,
        buf: Option<AlignedBuffer>,
    },
}

impl Completion {
    /// Classify a raw kernel result for a request of `kind`
    pub(crate) fn classify(
        kind: OpKind,
        buf: Option<AlignedBuffer>,
        res: i64,
        res2: i64,
    ) -> Self {
        if res2 != 0 {
            return Completion::Error {
                code: res2 as i32,
                buf,
            };
        }
        if res < 0 {
            return Completion::Error {
                code: (-res) as i32,
                buf,
            };
        }

        match (kind, buf) {
            (OpKind::Poll, _) => Completion::Ready(res as i16),
            (_, Some(buf)) if res as usize == buf.len() => Completion::Done(buf),
            (_, Some(buf)) => Completion::Partial {
                buf,
                transferred: res as usize,
            },
            // Read and write always carry a buffer
            (_, None) => Completion::Error {
                code: libc::EFAULT,
                buf: None,
            },
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Completion::Done(_))
    }

    /// The errno as an `io::Error`, for error outcomes
    pub fn os_error(&self) -> Option<std::io::Error> {
        match self {
            Completion::Error { code, .. } => Some(std::io::Error::from_raw_os_error(*code)),
            _ => None,
        }
    }

    /// Take back the buffer, whatever the outcome
    pub fn into_buffer(self) -> Option<AlignedBuffer> {
        match self {
            Completion::Done(buf) | Completion::Partial { buf, .. } => Some(buf),
            Completion::Error { buf, .. } => buf,
            Completion::Ready(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Option<AlignedBuffer> {
        Some(AlignedBuffer::page().unwrap())
    }

    #[test]
    fn test_full_transfer_is_done() {
        let c = Completion::classify(OpKind::Read, page(), 4096, 0);
        assert!(c.is_done());
    }

    #[test]
    fn test_short_transfer_is_partial() {
        let c = Completion::classify(OpKind::Write, page(), 100, 0);
        assert!(matches!(c, Completion::Partial { transferred: 100, .. }));

        let c = Completion::classify(OpKind::Read, page(), 0, 0);
        assert!(matches!(c, Completion::Partial { transferred: 0, .. }));
    }

    #[test]
    fn test_secondary_error_wins() {
        let c = Completion::classify(OpKind::Read, page(), 4096, libc::EIO as i64);
        assert!(matches!(c, Completion::Error { code, buf: Some(_) } if code == libc::EIO));
    }

    #[test]
    fn test_negative_result_is_error() {
        let c = Completion::classify(OpKind::Read, page(), -(libc::EBADF as i64), 0);
        assert_eq!(c.os_error().unwrap().raw_os_error(), Some(libc::EBADF));
        assert!(c.into_buffer().is_some());
    }

    #[test]
    fn test_poll_ready() {
        let c = Completion::classify(OpKind::Poll, None, libc::POLLIN as i64, 0);
        assert!(matches!(c, Completion::Ready(ev) if ev & libc::POLLIN != 0));
        assert!(c.into_buffer().is_none());
    }
}
