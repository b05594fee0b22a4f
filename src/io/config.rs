//! AIO context configuration

/// Default number of operations a context keeps in flight
pub const DEFAULT_CAPACITY: usize = 64;

/// What dropping a context with operations still in flight does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Block until every pending operation completes and dispatch its callback
    #[default]
    Drain,
    /// Drop pending callbacks without calling them.
    ///
    /// The kernel queue is still destroyed before any slot or buffer is
    /// freed, and `io_destroy` waits for requests the kernel is working on.
    Abandon,
}

/// Configuration for an AIO context
#[derive(Debug, Clone)]
pub struct AioConfig {
    /// Maximum number of operations in flight
    pub capacity: usize,

    /// Open the completion notifier with close-on-exec
    pub cloexec: bool,

    /// Behaviour when dropped with pending operations
    pub teardown: TeardownPolicy,
}

impl Default for AioConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            cloexec: true,
            teardown: TeardownPolicy::default(),
        }
    }
}

impl AioConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of operations in flight
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable close-on-exec for the notifier
    pub fn with_cloexec(mut self, enabled: bool) -> Self {
        self.cloexec = enabled;
        self
    }

    /// Set the teardown policy
    pub fn with_teardown(mut self, policy: TeardownPolicy) -> Self {
        self.teardown = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AioConfig::new();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert!(config.cloexec);
        assert_eq!(config.teardown, TeardownPolicy::Drain);
    }

    #[test]
    fn test_builder() {
        let config = AioConfig::new()
            .with_capacity(8)
            .with_cloexec(false)
            .with_teardown(TeardownPolicy::Abandon);
        assert_eq!(config.capacity, 8);
        assert!(!config.cloexec);
        assert_eq!(config.teardown, TeardownPolicy::Abandon);
    }
}
