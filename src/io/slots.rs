//! Operation slot pool
//!
//! A fixed arena of kernel request blocks. Each block is tagged once with its
//! index, which the kernel echoes back in the completion event, so a
//! completion maps to engine state without touching pointers.

use super::sys::Iocb;

/// Stable identity of an operation slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

pub(crate) struct SlotPool {
    /// Never reallocated; the kernel holds pointers into it while in flight
    iocbs: Box<[Iocb]>,
    /// Free slot ids, most recently released on top
    free: Vec<SlotId>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        let iocbs: Box<[Iocb]> = (0..capacity)
            .map(|i| Iocb {
                aio_data: i as u64,
                ..Iocb::default()
            })
            .collect();
        // Reversed so slot 0 is handed out first
        let free = (0..capacity).rev().map(SlotId).collect();
        Self { iocbs, free }
    }

    pub fn capacity(&self) -> usize {
        self.iocbs.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn acquire(&mut self) -> Option<SlotId> {
        self.free.pop()
    }

    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(slot.0 < self.iocbs.len());
        debug_assert!(!self.free.contains(&slot), "{slot} released twice");
        self.free.push(slot);
    }

    /// Map a kernel event tag back to a slot
    pub fn resolve(&self, tag: u64) -> Option<SlotId> {
        let idx = usize::try_from(tag).ok()?;
        (idx < self.iocbs.len()).then_some(SlotId(idx))
    }

    pub fn iocb_mut(&mut self, slot: SlotId) -> &mut Iocb {
        &mut self.iocbs[slot.0]
    }

    pub fn iocb_ptr(&mut self, slot: SlotId) -> *mut Iocb {
        &mut self.iocbs[slot.0] as *mut Iocb
    }
}
