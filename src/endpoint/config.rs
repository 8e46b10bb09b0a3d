// Endpoint timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for an endpoint's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Delay before the first ping after start, giving a just-booted robot
    /// time to bring up its VM.
    pub ping_delay_ms: u64,
    /// Delay between issuing a reboot command and resuming normal
    /// operation.
    pub reboot_delay_ms: u64,
    /// Whether periodic health checks run for this endpoint.
    pub health_check: bool,
    /// Interval between health-check probes.
    pub health_check_interval_ms: u64,
    /// Settle time after leaving dongle configuration mode, before the
    /// read loop resumes.
    pub config_settle_delay_ms: u64,
    /// Settle time before the initial wireless settings read.
    pub wireless_startup_delay_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ping_delay_ms: 200,
            reboot_delay_ms: 1000,
            health_check: true,
            health_check_interval_ms: 2000,
            config_settle_delay_ms: 500,
            wireless_startup_delay_ms: 100,
        }
    }
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ping_delay_ms(mut self, ms: u64) -> Self {
        self.ping_delay_ms = ms;
        self
    }

    pub fn with_reboot_delay_ms(mut self, ms: u64) -> Self {
        self.reboot_delay_ms = ms;
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn with_health_check_interval_ms(mut self, ms: u64) -> Self {
        self.health_check_interval_ms = ms;
        self
    }

    pub fn with_config_settle_delay_ms(mut self, ms: u64) -> Self {
        self.config_settle_delay_ms = ms;
        self
    }

    pub fn with_wireless_startup_delay_ms(mut self, ms: u64) -> Self {
        self.wireless_startup_delay_ms = ms;
        self
    }

    pub fn ping_delay(&self) -> Duration {
        Duration::from_millis(self.ping_delay_ms)
    }

    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn config_settle_delay(&self) -> Duration {
        Duration::from_millis(self.config_settle_delay_ms)
    }

    pub fn wireless_startup_delay(&self) -> Duration {
        Duration::from_millis(self.wireless_startup_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.ping_delay_ms, 200);
        assert_eq!(config.reboot_delay_ms, 1000);
        assert!(config.health_check);
    }

    #[test]
    fn test_builder() {
        let config = EndpointConfig::new()
            .with_ping_delay_ms(10)
            .with_reboot_delay_ms(50)
            .with_health_check(false);
        assert_eq!(config.ping_delay(), Duration::from_millis(10));
        assert_eq!(config.reboot_delay(), Duration::from_millis(50));
        assert!(!config.health_check);
    }
}
