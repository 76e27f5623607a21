//! Runtime configuration for the collaboration layer.

use folio_core::Millis;
use std::time::Duration;

/// Timing and buffering knobs shared by every per-document session.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// How often the local presence record is republished (default: 1s)
    pub heartbeat_interval: Duration,
    /// Presence older than this is not rendered (default: 3 heartbeats)
    pub staleness_window: Duration,
    /// How long a confirmed local write may override a lagging remote read (default: 5s)
    pub grace_window: Duration,
    /// Messages buffered per change-feed subscriber (default: 256)
    pub feed_capacity: usize,
    /// Step updates kept before the engine folds them into a snapshot (default: 64)
    pub step_compaction_threshold: u64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            staleness_window: Duration::from_millis(3000),
            grace_window: Duration::from_millis(5000),
            feed_capacity: 256,
            step_compaction_threshold: 64,
        }
    }
}

impl CollabConfig {
    /// Fast timers and small buffers for tests.
    pub fn for_testing() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(20),
            staleness_window: Duration::from_millis(3000),
            grace_window: Duration::from_millis(5000),
            feed_capacity: 64,
            step_compaction_threshold: 4,
        }
    }

    pub fn staleness_ms(&self) -> Millis {
        self.staleness_window.as_millis() as Millis
    }

    pub fn grace_ms(&self) -> Millis {
        self.grace_window.as_millis() as Millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_staleness_is_three_heartbeats() {
        let config = CollabConfig::default();
        assert_eq!(config.staleness_window, config.heartbeat_interval * 3);
        assert_eq!(config.staleness_ms(), 3000);
        assert_eq!(config.grace_ms(), 5000);
    }
}
