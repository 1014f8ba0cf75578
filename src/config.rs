//! Runtime configuration.
//!
//! Defaults overlaid with `TRAVELLER_*` environment variables, e.g.
//! `TRAVELLER_TICK_INTERVAL_MS=50` or `TRAVELLER_BIND_ADDR=0.0.0.0:9000`.

use std::net::SocketAddr;
use std::time::Duration;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::core::coord::{DEFAULT_STEP_DEGREES, LAT_MAX};
use crate::feed::scheduler::SchedulerConfig;
use crate::network::delivery::DeliveryConfig;
use crate::{DEFAULT_DISPATCH_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_TICK_INTERVAL_MS};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TRAVELLER_";

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Default number of frames buffered between a delivery loop and its HTTP body.
pub const DEFAULT_BODY_BUFFER: usize = 16;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or a value did not parse.
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value parsed but is not usable.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Broadcaster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Scheduler tick period (ms).
    pub tick_interval_ms: u64,
    /// Idle time before a keep-alive frame (ms).
    pub keepalive_interval_ms: u64,
    /// Bound on one inbox send during dispatch (ms).
    pub dispatch_timeout_ms: u64,
    /// Degrees removed from latitude and longitude per tick.
    pub step_degrees: f64,
    /// Frames buffered per connection before a flush waits.
    pub body_buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            step_degrees: DEFAULT_STEP_DEGREES,
            body_buffer: DEFAULT_BODY_BUFFER,
        }
    }
}

impl BroadcasterConfig {
    /// Load defaults overlaid with `TRAVELLER_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler or delivery loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("dispatch_timeout_ms", self.dispatch_timeout_ms),
            ("body_buffer", self.body_buffer as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: "must be greater than zero".into() });
            }
        }

        // A step of a full half-range or more could skip across the whole domain.
        if !self.step_degrees.is_finite() || self.step_degrees <= 0.0 || self.step_degrees >= LAT_MAX {
            return Err(ConfigError::Invalid {
                field: "step_degrees",
                reason: format!("{} is not in (0, {})", self.step_degrees, LAT_MAX),
            });
        }

        Ok(())
    }

    /// Scheduler section.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            dispatch_timeout: Duration::from_millis(self.dispatch_timeout_ms),
            step_degrees: self.step_degrees,
        }
    }

    /// Delivery section.
    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.tick_interval_ms, 25);
        assert_eq!(config.keepalive_interval_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_carry_durations() {
        let config = BroadcasterConfig {
            tick_interval_ms: 40,
            keepalive_interval_ms: 1_000,
            dispatch_timeout_ms: 10,
            ..Default::default()
        };

        assert_eq!(config.scheduler().tick_interval, Duration::from_millis(40));
        assert_eq!(config.scheduler().dispatch_timeout, Duration::from_millis(10));
        assert_eq!(config.delivery().keepalive_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides_merge_over_defaults() {
        let figment = Figment::from(Serialized::defaults(BroadcasterConfig::default()))
            .merge(Serialized::default("tick_interval_ms", 100u64))
            .merge(Serialized::default("bind_addr", "0.0.0.0:9000"));

        let config = BroadcasterConfig::from_figment(figment).unwrap();
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.keepalive_interval_ms, 30_000);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = BroadcasterConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "tick_interval_ms", .. })
        ));
    }

    #[test]
    fn test_bad_step_rejected() {
        for step in [0.0, -0.08, 90.0, f64::NAN] {
            let config = BroadcasterConfig {
                step_degrees: step,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "step {} accepted", step);
        }
    }
}
