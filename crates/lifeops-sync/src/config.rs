//! Sync configuration.

use std::time::Duration;

/// Configuration for sync behaviour.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Quiet period before a scheduled write is sent (in milliseconds).
    pub debounce_ms: u64,
    /// Cooldown after a quota failure (in milliseconds).
    pub quota_cooldown_ms: u64,
    /// Cooldown after a network failure (in milliseconds).
    pub transient_cooldown_ms: u64,
    /// Drop confirmed snapshots whose fingerprint is already the last
    /// confirmed one.
    pub skip_identical_snapshots: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 800,
            quota_cooldown_ms: 60_000,
            transient_cooldown_ms: 15_000,
            skip_identical_snapshots: true,
            event_capacity: 100,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_millis(self.quota_cooldown_ms)
    }

    pub fn transient_cooldown(&self) -> Duration {
        Duration::from_millis(self.transient_cooldown_ms)
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn debounce(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn quota_cooldown(mut self, ms: u64) -> Self {
        self.config.quota_cooldown_ms = ms;
        self
    }

    pub fn transient_cooldown(mut self, ms: u64) -> Self {
        self.config.transient_cooldown_ms = ms;
        self
    }

    pub fn skip_identical_snapshots(mut self, enabled: bool) -> Self {
        self.config.skip_identical_snapshots = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();

        assert_eq!(config.debounce(), Duration::from_millis(800));
        assert_eq!(config.quota_cooldown(), Duration::from_secs(60));
        assert_eq!(config.transient_cooldown(), Duration::from_secs(15));
        assert!(config.skip_identical_snapshots);
    }

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfigBuilder::new()
            .debounce(250)
            .quota_cooldown(5_000)
            .transient_cooldown(1_000)
            .skip_identical_snapshots(false)
            .event_capacity(16)
            .build();

        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.quota_cooldown_ms, 5_000);
        assert_eq!(config.transient_cooldown_ms, 1_000);
        assert!(!config.skip_identical_snapshots);
        assert_eq!(config.event_capacity, 16);
    }
}
