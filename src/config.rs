//! Static configuration handed to the device handle at construction.
//!
//! Loading it from disk is the application's business; the struct derives
//! `Deserialize` so any serde format works:
//!
//! ```toml
//! default_voltage = 2.5
//! default_current_limit = 0.1
//! verbosity = "sequence"
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! stop_bits = "two"
//! read_timeout_ms = 500
//! ```

use crate::transport::SerialSettings;
use serde::Deserialize;
use std::time::Duration;

/// The PSU ignores reads shorter than this; the configured timeout must exceed it.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(300);

/// How chatty the driver is. Each level includes everything below it.
///
/// The level only decides what the driver emits; where it ends up is still
/// up to whatever `log` backend the application installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    #[default]
    Quiet,
    /// Progress of the initialization sequence.
    Sequence,
    /// Every command and response on the wire.
    Wire,
    /// Parsed values and other details.
    Detail,
}

impl Verbosity {
    pub fn allows(self, level: Self) -> bool {
        self >= level
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Read timeout {configured:?} is too short, the PSU needs more than {min:?}",
        min = MIN_READ_TIMEOUT
    )]
    ReadTimeoutTooShort { configured: Duration },

    #[error("Default {name} must be a finite, non-negative number, got {value}")]
    InvalidDefault { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PsuConfig {
    pub serial: SerialSettings,
    /// Volts applied during initialization.
    pub default_voltage: f64,
    /// Amps applied during initialization.
    pub default_current_limit: f64,
    /// Interval a polling application waits between snapshots.
    pub command_poll_ms: u64,
    pub verbosity: Verbosity,
}

impl Default for PsuConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            default_voltage: 2.5,
            default_current_limit: 0.100,
            command_poll_ms: 100,
            verbosity: Verbosity::Quiet,
        }
    }
}

impl PsuConfig {
    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let read_timeout = self.serial.read_timeout();
        if read_timeout <= MIN_READ_TIMEOUT {
            return Err(ConfigError::ReadTimeoutTooShort {
                configured: read_timeout,
            });
        }

        for (name, value) in [
            ("voltage", self.default_voltage),
            ("current limit", self.default_current_limit),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidDefault { name, value });
            }
        }

        Ok(())
    }
}
