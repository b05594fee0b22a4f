//! Per-context operation counters

/// Snapshot of a context's counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Operations accepted by the kernel
    pub submitted: u64,
    /// Completions dispatched to callbacks
    pub completed: u64,
    /// Completions classified as partial transfers
    pub partial: u64,
    /// Completions classified as errors
    pub failed: u64,
    /// `io_getevents` calls, blocking or not
    pub waits: u64,
}

impl ContextStats {
    /// Operations submitted but not yet dispatched
    pub fn in_flight(&self) -> u64 {
        self.submitted - self.completed
    }
}
