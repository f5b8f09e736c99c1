//! Configuration for the sync engine.

/// Configuration for a sync engine instance.
///
/// The defaults match a small client: a handful of worker threads, one
/// token reset per fetch, and a few conflict resubmission rounds before
/// giving up.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the custom zone that holds the user's own records in the
    /// private database.
    pub zone_name: String,
    /// Number of worker threads executing remote operations.
    pub max_workers: usize,
    /// How many times a rejected batch is resolved and resubmitted before
    /// the conflict is surfaced.
    pub max_resubmit_rounds: u32,
    /// How many times an expired change token is discarded and the fetch
    /// restarted, per top-level fetch call.
    pub max_token_resets: u32,
}

impl EngineConfig {
    /// Creates a configuration with the given custom zone name.
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            max_workers: 4,
            max_resubmit_rounds: 3,
            max_token_resets: 1,
        }
    }

    /// Sets the worker thread count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Sets the conflict resubmission bound.
    pub fn with_max_resubmit_rounds(mut self, rounds: u32) -> Self {
        self.max_resubmit_rounds = rounds;
        self
    }

    /// Sets the token reset bound.
    pub fn with_max_token_resets(mut self, resets: u32) -> Self {
        self.max_token_resets = resets;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("primary")
    }
}
