//! Callback table
//!
//! Engine-side state of each in-flight operation, indexed by slot id. An entry
//! exists exactly while its slot is occupied.

use super::aligned_buffer::AlignedBuffer;
use super::completion::{Completion, OpKind};
use super::context::Context;
use super::slots::SlotId;

/// Completion callback.
///
/// Receives the context so it can submit follow-up operations; the slot it
/// came from is already free by the time it runs.
pub type Callback = Box<dyn FnOnce(&mut Context, Completion)>;

pub(crate) struct PendingOp {
    pub kind: OpKind,
    pub buf: Option<AlignedBuffer>,
    pub callback: Callback,
}

pub(crate) struct CallbackTable {
    entries: Vec<Option<PendingOp>>,
}

impl CallbackTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn insert(&mut self, slot: SlotId, op: PendingOp) {
        let entry = &mut self.entries[slot.index()];
        debug_assert!(entry.is_none(), "{slot} already has a pending operation");
        *entry = Some(op);
    }

    pub fn take(&mut self, slot: SlotId) -> Option<PendingOp> {
        self.entries.get_mut(slot.index())?.take()
    }

    /// Drop every entry without invoking it
    pub fn clear(&mut self) -> usize {
        self.entries.iter_mut().filter_map(Option::take).count()
    }

    #[cfg(test)]
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> PendingOp {
        PendingOp {
            kind: OpKind::Poll,
            buf: None,
            callback: Box::new(|_, _| {}),
        }
    }

    #[test]
    fn test_insert_take() {
        let mut table = CallbackTable::new(2);
        table.insert(SlotId(1), noop());
        assert_eq!(table.occupied(), 1);

        let op = table.take(SlotId(1)).unwrap();
        assert_eq!(op.kind, OpKind::Poll);
        assert!(table.take(SlotId(1)).is_none());
        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn test_take_out_of_range() {
        let mut table = CallbackTable::new(1);
        assert!(table.take(SlotId(5)).is_none());
    }

    #[test]
    fn test_clear() {
        let mut table = CallbackTable::new(3);
        table.insert(SlotId(0), noop());
        table.insert(SlotId(2), noop());
        assert_eq!(table.clear(), 2);
        assert_eq!(table.occupied(), 0);
    }
}
