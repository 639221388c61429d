//! Machine configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```rust
//! use laundry_machine::MachineConfig;
//! use std::time::Duration;
//!
//! let config = MachineConfig::from_json_str(r#"{ "soak_time_ms": 50 }"#).unwrap();
//! assert_eq!(config.soak_time(), Duration::from_millis(50));
//! assert_eq!(config.lock_timeout(), MachineConfig::default().lock_timeout());
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub lock_timeout_ms: u64,
    pub lock_poll_interval_ms: u64,
    pub transition_timeout_ms: u64,
    pub spin_iterations_before_sleep: u32,
    pub idle_sleep_ms: u64,
    pub max_time_to_start_ms: u64,
    pub max_time_to_stop_ms: u64,
    pub disposal_grace_ms: u64,
    pub activation_time_ms: u64,
    pub soak_time_ms: u64,
    pub cleanse_time_ms: u64,
    pub dry_time_ms: u64,
    pub cancellation_check_interval_ms: u64,
    pub fault_probability: f64,
    pub rng_seed: Option<u64>,
    /// Most recent state changes kept in the published history.
    pub history_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            lock_poll_interval_ms: 5,
            transition_timeout_ms: 250,
            spin_iterations_before_sleep: 16,
            idle_sleep_ms: 2,
            max_time_to_start_ms: 2_000,
            max_time_to_stop_ms: 5_000,
            disposal_grace_ms: 10_000,
            activation_time_ms: 500,
            soak_time_ms: 1_000,
            cleanse_time_ms: 1_500,
            dry_time_ms: 1_500,
            cancellation_check_interval_ms: 10,
            fault_probability: 0.0,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl MachineConfig {
    /// Short durations suitable for tests and demos.
    pub fn fast() -> Self {
        Self {
            activation_time_ms: 50,
            soak_time_ms: 80,
            cleanse_time_ms: 80,
            dry_time_ms: 80,
            cancellation_check_interval_ms: 2,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("lock_timeout_ms", self.lock_timeout_ms),
            ("lock_poll_interval_ms", self.lock_poll_interval_ms),
            ("transition_timeout_ms", self.transition_timeout_ms),
            ("max_time_to_start_ms", self.max_time_to_start_ms),
            ("max_time_to_stop_ms", self.max_time_to_stop_ms),
            ("disposal_grace_ms", self.disposal_grace_ms),
            ("cancellation_check_interval_ms", self.cancellation_check_interval_ms),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(ConfigError::Invalid(format!(
                "fault_probability must be within 0.0..=1.0, got {}",
                self.fault_probability
            )));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn max_time_to_start(&self) -> Duration {
        Duration::from_millis(self.max_time_to_start_ms)
    }

    pub fn max_time_to_stop(&self) -> Duration {
        Duration::from_millis(self.max_time_to_stop_ms)
    }

    pub fn disposal_grace(&self) -> Duration {
        Duration::from_millis(self.disposal_grace_ms)
    }

    pub fn activation_time(&self) -> Duration {
        Duration::from_millis(self.activation_time_ms)
    }

    pub fn soak_time(&self) -> Duration {
        Duration::from_millis(self.soak_time_ms)
    }

    pub fn cleanse_time(&self) -> Duration {
        Duration::from_millis(self.cleanse_time_ms)
    }

    pub fn dry_time(&self) -> Duration {
        Duration::from_millis(self.dry_time_ms)
    }

    pub fn cancellation_check_interval(&self) -> Duration {
        Duration::from_millis(self.cancellation_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(MachineConfig::default().validate().is_ok());
        assert!(MachineConfig::fast().validate().is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = MachineConfig::from_json_str(r#"{ "lock_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("lock_timeout_ms")));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let err = MachineConfig::from_json_str(r#"{ "fault_probability": 1.5 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_history_capacity_is_rejected() {
        let err = MachineConfig::from_json_str(r#"{ "history_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("history_capacity")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = MachineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = MachineConfig::from_json_file("/nonexistent/laundry.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = MachineConfig {
            rng_seed: Some(9),
            ..MachineConfig::fast()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(MachineConfig::from_json_str(&json).unwrap(), config);
    }
}
