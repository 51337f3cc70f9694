//! Power-up handshake run once when a [`Psu`] handle is created.
//!
//! The steps run strictly in order: connect, remote mode, power on, channel
//! select, voltage setpoint, current limit. Every step after remote mode
//! writes a setting and reads it back. The first failure ends the sequence;
//! nothing is retried and nothing already applied is undone.

use crate::config::{ConfigError, PsuConfig, Verbosity};
use crate::psu::{Channel, Psu, PsuError, WORKING_CHANNEL};
use crate::serial_terminal::PsuTerminal;
use crate::transport::{Transport, TransportError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Connect,
    RemoteMode,
    PowerOn,
    SelectChannel,
    SetVoltage,
    SetCurrentLimit,
}

impl InitStep {
    pub const ALL: [Self; 6] = [
        Self::Connect,
        Self::RemoteMode,
        Self::PowerOn,
        Self::SelectChannel,
        Self::SetVoltage,
        Self::SetCurrentLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::RemoteMode => "remote mode",
            Self::PowerOn => "power on",
            Self::SelectChannel => "select channel",
            Self::SetVoltage => "set voltage",
            Self::SetCurrentLimit => "set current limit",
        }
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a verified step did not pass.
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    /// The PSU answered, but with something other than what was written.
    #[error("PSU reported '{actual}'")]
    Mismatch { actual: String },

    #[error(transparent)]
    Transaction(#[from] PsuError),
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    #[error("Could not put the PSU in remote mode: {0}")]
    RemoteMode(#[source] PsuError),

    #[error("PSU power on failed: {0}")]
    PowerOnFailed(#[source] StepFailure),

    #[error("Selected channel not verified, expected {expected}: {reason}")]
    ChannelNotVerified {
        expected: Channel,
        #[source]
        reason: StepFailure,
    },

    #[error("Output voltage setting not verified, expected {expected:.3} V: {reason}")]
    VoltageNotVerified {
        expected: f64,
        #[source]
        reason: StepFailure,
    },

    #[error("Current limit setting not verified, expected {expected:.3} A: {reason}")]
    CurrentLimitNotVerified {
        expected: f64,
        #[source]
        reason: StepFailure,
    },
}

impl InitError {
    /// The step the sequence stopped at.
    pub fn step(&self) -> InitStep {
        match self {
            Self::InvalidConfig(_) | Self::ConnectFailed(_) => InitStep::Connect,
            Self::RemoteMode(_) => InitStep::RemoteMode,
            Self::PowerOnFailed(_) => InitStep::PowerOn,
            Self::ChannelNotVerified { .. } => InitStep::SelectChannel,
            Self::VoltageNotVerified { .. } => InitStep::SetVoltage,
            Self::CurrentLimitNotVerified { .. } => InitStep::SetCurrentLimit,
        }
    }
}

/// Record of the steps that have passed so far.
#[derive(Debug, Clone, Default)]
pub struct InitSequence {
    completed: Vec<InitStep>,
}

impl InitSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> &[InitStep] {
        &self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == InitStep::ALL
    }

    fn pass(&mut self, step: InitStep, verbosity: Verbosity) {
        if verbosity.allows(Verbosity::Sequence) {
            log::info!("PSU init: {} ok", step);
        }
        self.completed.push(step);
    }

    /// Drive `psu` through every step. On failure the terminal comes back
    /// still open together with the error.
    pub(crate) fn run<T: Transport>(
        mut psu: Psu<T>,
        config: &PsuConfig,
    ) -> Result<Psu<T>, (PsuTerminal<T>, InitError)> {
        let span = tracing::info_span!("psu_init", port = %config.serial.port);
        let _entered = span.enter();

        match Self::steps(&mut psu, config) {
            Ok(()) => Ok(psu),
            Err(e) => {
                if psu.terminal().verbosity().allows(Verbosity::Sequence) {
                    log::error!("PSU init aborted at {}: {}", e.step(), e);
                }
                Err((psu.into_terminal(), e))
            }
        }
    }

    fn steps<T: Transport>(psu: &mut Psu<T>, config: &PsuConfig) -> Result<(), InitError> {
        let verbosity = psu.terminal().verbosity();

        if !psu.terminal().transport().is_open() {
            return Err(InitError::ConnectFailed(TransportError::Closed));
        }
        psu.init_mut().pass(InitStep::Connect, verbosity);

        // No read-back exists for remote mode.
        psu.remote_mode().map_err(InitError::RemoteMode)?;
        psu.init_mut().pass(InitStep::RemoteMode, verbosity);

        let powered = psu
            .set_power(true)
            .map_err(|e| InitError::PowerOnFailed(e.into()))?;
        if !powered {
            return Err(InitError::PowerOnFailed(StepFailure::Mismatch {
                actual: "0".to_string(),
            }));
        }
        psu.init_mut().pass(InitStep::PowerOn, verbosity);

        let channel_not_verified = |reason: StepFailure| InitError::ChannelNotVerified {
            expected: WORKING_CHANNEL,
            reason,
        };
        let selected = psu
            .select_channel(WORKING_CHANNEL)
            .map_err(|e| channel_not_verified(e.into()))?;
        if !WORKING_CHANNEL.matches(&selected) {
            return Err(channel_not_verified(StepFailure::Mismatch { actual: selected }));
        }
        psu.init_mut().pass(InitStep::SelectChannel, verbosity);

        let expected = config.default_voltage;
        let confirmed = psu
            .set_voltage(Some(expected))
            .map_err(|e| InitError::VoltageNotVerified {
                expected,
                reason: e.into(),
            })?;
        if confirmed != expected {
            return Err(InitError::VoltageNotVerified {
                expected,
                reason: StepFailure::Mismatch {
                    actual: confirmed.to_string(),
                },
            });
        }
        psu.init_mut().pass(InitStep::SetVoltage, verbosity);

        let expected = config.default_current_limit;
        let confirmed = psu
            .set_current_limit(Some(expected))
            .map_err(|e| InitError::CurrentLimitNotVerified {
                expected,
                reason: e.into(),
            })?;
        if confirmed != expected {
            return Err(InitError::CurrentLimitNotVerified {
                expected,
                reason: StepFailure::Mismatch {
                    actual: confirmed.to_string(),
                },
            });
        }
        psu.init_mut().pass(InitStep::SetCurrentLimit, verbosity);

        Ok(())
    }
}
