/// Runtime configuration for a dirdb store.
#[derive(Debug, Clone)]
pub struct DirDbConfig {
    /// Maximum nesting depth for a submitted query tree. Deeper trees are
    /// rejected before evaluation to bound matcher recursion.
    pub max_node_depth: usize,
    /// How often a blocked read-lock request rechecks its cancellation flag.
    pub lock_poll_interval_ms: u64,
    /// Upper bound on how long a read-lock request may block before it is
    /// reported as interrupted. `None` blocks until granted or cancelled.
    pub lock_wait_timeout_ms: Option<u64>,
}

impl Default for DirDbConfig {
    fn default() -> Self {
        Self {
            max_node_depth: 32,
            lock_poll_interval_ms: 25,
            lock_wait_timeout_ms: None,
        }
    }
}

impl DirDbConfig {
    /// Profile for test runs: short lock timeout so a deadlocked test fails
    /// fast instead of hanging the suite.
    pub fn testing() -> Self {
        Self {
            lock_wait_timeout_ms: Some(2_000),
            ..Self::default()
        }
    }
}
