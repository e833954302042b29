//! Database thread configuration.

/// Configuration for a [`crate::DatabaseThread`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How many clean cell contents the live cache keeps before evicting.
    ///
    /// Modified contents are never evicted, so the cache may temporarily
    /// hold more entries than this.
    pub live_cache_capacity: usize,

    /// Whether to run the full consistency checks on every produced snapshot.
    pub check_invariants: bool,

    /// Tool name recorded in snapshots produced by `backup`.
    pub tool: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live_cache_capacity: 64,
            check_invariants: false,
            tool: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the live cache capacity. Zero is treated as one.
    #[must_use]
    pub const fn live_cache_capacity(mut self, capacity: usize) -> Self {
        self.live_cache_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Sets whether snapshots are checked after every backup.
    #[must_use]
    pub const fn check_invariants(mut self, value: bool) -> Self {
        self.check_invariants = value;
        self
    }

    /// Sets the tool name recorded in snapshots.
    #[must_use]
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool = Some(name.into());
        self
    }
}
