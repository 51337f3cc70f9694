use crate::config::{PsuConfig, Verbosity};
use crate::init_sequence::{InitError, InitSequence, InitStep};
use crate::serial_terminal::{PsuTerminal, TerminalError};
use crate::transport::{SerialTransport, Transport};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// SCPI commands understood by the PSU.
pub mod commands {
    pub const OUTPUT_STATE_QUERY: &str = "Output:state?";
    pub const OUTPUT_ON: &str = "Output:State ON";
    pub const OUTPUT_OFF: &str = "Output:State OFF";
    pub const VOLTAGE_QUERY: &str = "Source:Voltage:Immediate?";
    pub const VOLTAGE_SET: &str = "Source:Voltage:Immediate";
    pub const CURRENT_QUERY: &str = "Source:Current:Immediate?";
    pub const CURRENT_SET: &str = "Source:Current:Immediate";
    pub const MEASURE_VOLTAGE: &str = "Measure:Voltage:DC? P25V";
    pub const MEASURE_CURRENT: &str = "Measure:Current:DC? P25V";
    pub const STATUS_QUERY: &str = "Status:Questionable:Condition?";
    pub const CHANNEL_QUERY: &str = "Instrument:Select?";
    pub const CHANNEL_SELECT: &str = "INST:SEL";
    pub const CHANNEL_SELECT_LONG: &str = "Instrument:Select";
    pub const VERSION_QUERY: &str = "System:Version?";
    pub const REMOTE: &str = "System:Remote";
    pub const LOCAL: &str = "System:Local";
}

/// Condition register value reported by [`commands::STATUS_QUERY`] when no limit is active.
pub const STATUS_OK: i64 = 0;

/// SCPI revision the PSU speaks.
pub const SCPI_VERSION: &str = "1995.0";

/// Channel the driver works on. Measurements are always taken from it.
pub const WORKING_CHANNEL: Channel = Channel::P25V;

#[derive(Debug, thiserror::Error)]
pub enum PsuError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("Unexpected reply '{response}' to '{command}'")]
    UnexpectedValue { command: String, response: String },

    #[error("Setpoint {value} is not a finite number")]
    InvalidSetpoint { value: f64 },
}

impl PsuError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Terminal(TerminalError::Timeout { .. }))
    }
}

/// The PSU's selectable outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    #[default]
    P6V,
    P25V,
    N25V,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P6V => "P6V",
            Self::P25V => "P25V",
            Self::N25V => "N25V",
        }
    }

    /// Whether a reply to [`commands::CHANNEL_QUERY`] names this channel.
    pub fn matches(&self, reply: &str) -> bool {
        reply.trim_start().starts_with(self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    OverCurrent,
    Ok,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OverCurrent => "OVER CURRENT",
            Self::Ok => "OK",
        }
    }
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a monitoring loop records per poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PsuValues {
    pub power: bool,
    pub voltage_setting: f64,
    pub current_limit: f64,
    pub measured_current: f64,
    pub measured_voltage: f64,
    pub status: OutputStatus,
}

impl PsuValues {
    pub fn power_str(&self) -> &'static str {
        if self.power {
            "ON"
        } else {
            "OFF"
        }
    }
}

/// Terminal readings taken by [`Psu::check_output`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCheck {
    /// Measured with the output off.
    pub idle_voltage: f64,
    /// Whether the PSU confirmed the output back on.
    pub powered: bool,
    pub set_voltage: f64,
    /// Measured with the output on.
    pub measured_voltage: f64,
}

impl OutputCheck {
    /// Highest reading on the terminals that still counts as "off".
    pub const OFF_LIMIT: f64 = 0.02;
    /// Allowed gap between the setpoint and the measured output.
    pub const TRACKING_LIMIT: f64 = 0.05;

    pub fn output_off_ok(&self) -> bool {
        self.idle_voltage.abs() < Self::OFF_LIMIT
    }

    pub fn output_on_ok(&self) -> bool {
        self.powered && (self.measured_voltage - self.set_voltage).abs() < Self::TRACKING_LIMIT
    }

    pub fn passed(&self) -> bool {
        self.output_off_ok() && self.output_on_ok()
    }
}

/// Whether `version` belongs to the SCPI revision this driver was written against.
pub fn is_supported_scpi_version(version: &str) -> bool {
    version.trim().chars().next() == SCPI_VERSION.chars().next()
}

/// Handle to an initialized PSU.
///
/// Nothing is cached: every getter is a live round-trip, and every setter
/// returns the value the PSU reports after the write, which may differ from
/// what was asked for.
#[derive(Debug)]
pub struct Psu<T: Transport> {
    terminal: PsuTerminal<T>,
    verbosity: Verbosity,
    init: InitSequence,
}

impl Psu<SerialTransport> {
    /// Open the configured port and run the initialization sequence.
    ///
    /// On failure the port is closed again before the error is returned.
    pub fn open(config: &PsuConfig) -> Result<Self, InitError> {
        config.validate()?;
        let transport = SerialTransport::open(&config.serial).map_err(InitError::ConnectFailed)?;
        let terminal = PsuTerminal::new(transport, config.verbosity);

        Self::initialize(terminal, config).map_err(|(mut terminal, e)| {
            terminal.close();
            e
        })
    }
}

impl<T: Transport> Psu<T> {
    /// Run the initialization sequence over an already open terminal.
    ///
    /// On failure the terminal is handed back untouched; closing it is up to the caller.
    pub fn initialize(
        terminal: PsuTerminal<T>,
        config: &PsuConfig,
    ) -> Result<Self, (PsuTerminal<T>, InitError)> {
        let verbosity = terminal.verbosity();
        let psu = Self {
            terminal,
            verbosity,
            init: InitSequence::new(),
        };
        InitSequence::run(psu, config)
    }

    pub(crate) fn init_mut(&mut self) -> &mut InitSequence {
        &mut self.init
    }

    /// Steps of the initialization sequence, in the order they passed.
    pub fn init_steps(&self) -> &[InitStep] {
        self.init.completed()
    }

    pub fn terminal(&self) -> &PsuTerminal<T> {
        &self.terminal
    }

    pub fn into_terminal(self) -> PsuTerminal<T> {
        self.terminal
    }

    fn query<V: FromStr>(&mut self, command: &str) -> Result<V, PsuError> {
        let response = self.terminal.transact(command)?;
        let value = response
            .trim()
            .parse()
            .map_err(|_| PsuError::UnexpectedValue {
                command: command.to_string(),
                response: response.clone(),
            })?;

        if self.verbosity.allows(Verbosity::Detail) {
            log::trace!("{} = {}", command, response.trim());
        }
        Ok(value)
    }

    fn set_value(&mut self, command: &str, value: f64) -> Result<(), PsuError> {
        // Range is the PSU's call; negative values program N25V.
        if !value.is_finite() {
            return Err(PsuError::InvalidSetpoint { value });
        }
        // 1 mV / 1 mA resolution
        self.terminal.send(&format!("{command} {value:.3}"))?;
        Ok(())
    }

    /// Whether the output is enabled.
    pub fn power(&mut self) -> Result<bool, PsuError> {
        match self.query::<i64>(commands::OUTPUT_STATE_QUERY) {
            Ok(1) => Ok(true),
            Ok(0) => Ok(false),
            Ok(other) => Err(PsuError::UnexpectedValue {
                command: commands::OUTPUT_STATE_QUERY.to_string(),
                response: other.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Switch the output and return the state the PSU confirms.
    pub fn set_power(&mut self, on: bool) -> Result<bool, PsuError> {
        self.terminal.send(if on {
            commands::OUTPUT_ON
        } else {
            commands::OUTPUT_OFF
        })?;
        self.power()
    }

    /// Voltage setpoint in volts. Not the measured output, see [`Measure::voltage`].
    pub fn voltage(&mut self) -> Result<f64, PsuError> {
        self.query(commands::VOLTAGE_QUERY)
    }

    /// Write the voltage setpoint if one is given, then return what the PSU reports.
    ///
    /// `None` only reads back; `Some(0.0)` really sets zero volts.
    pub fn set_voltage(&mut self, volts: Option<f64>) -> Result<f64, PsuError> {
        if let Some(volts) = volts {
            self.set_value(commands::VOLTAGE_SET, volts)?;
        }
        self.voltage()
    }

    /// Current limit setpoint in amps.
    pub fn current_limit(&mut self) -> Result<f64, PsuError> {
        self.query(commands::CURRENT_QUERY)
    }

    /// Same contract as [`Self::set_voltage`], for the current limit.
    pub fn set_current_limit(&mut self, amps: Option<f64>) -> Result<f64, PsuError> {
        if let Some(amps) = amps {
            self.set_value(commands::CURRENT_SET, amps)?;
        }
        self.current_limit()
    }

    pub fn measure(&mut self) -> Measure<'_, T> {
        Measure { psu: self }
    }

    /// Over-current status. Any set bit in the questionable condition register counts.
    pub fn status(&mut self) -> Result<OutputStatus, PsuError> {
        Ok(if self.query::<i64>(commands::STATUS_QUERY)? == STATUS_OK {
            OutputStatus::Ok
        } else {
            OutputStatus::OverCurrent
        })
    }

    /// Raw reply to the channel query, e.g. `"P25V"`.
    pub fn selected_channel(&mut self) -> Result<String, PsuError> {
        Ok(self.terminal.transact(commands::CHANNEL_QUERY)?)
    }

    /// Select `channel` and return the PSU's reply to the channel query.
    pub fn select_channel(&mut self, channel: Channel) -> Result<String, PsuError> {
        self.terminal
            .send(&format!("{} {}", commands::CHANNEL_SELECT, channel))?;
        self.selected_channel()
    }

    /// [`Self::select_channel`] using the long command form.
    pub fn select_channel_long_form(&mut self, channel: Channel) -> Result<String, PsuError> {
        self.terminal
            .send(&format!("{} {}", commands::CHANNEL_SELECT_LONG, channel))?;
        self.selected_channel()
    }

    /// SCPI version string, e.g. `"1995.0"`.
    pub fn version(&mut self) -> Result<String, PsuError> {
        Ok(self.terminal.transact(commands::VERSION_QUERY)?.trim().to_string())
    }

    /// Put the PSU under remote control. The PSU gives no reply to confirm it.
    pub fn remote_mode(&mut self) -> Result<(), PsuError> {
        self.terminal.send(commands::REMOTE)?;
        Ok(())
    }

    /// Switch the output off, then on again, measuring the terminals after
    /// `settle` each time. The output is left on.
    pub fn check_output(&mut self, settle: Duration) -> Result<OutputCheck, PsuError> {
        self.set_power(false)?;
        thread::sleep(settle);
        let idle_voltage = self.measure().voltage()?;

        let powered = self.set_power(true)?;
        thread::sleep(settle);
        let check = OutputCheck {
            idle_voltage,
            powered,
            set_voltage: self.voltage()?,
            measured_voltage: self.measure().voltage()?,
        };

        if self.verbosity.allows(Verbosity::Sequence) {
            log::info!("Output check: {:?}", check);
        }
        Ok(check)
    }

    /// Read every monitored value, one transaction each.
    pub fn values(&mut self) -> Result<PsuValues, PsuError> {
        Ok(PsuValues {
            power: self.power()?,
            voltage_setting: self.voltage()?,
            current_limit: self.current_limit()?,
            measured_current: self.measure().current()?,
            measured_voltage: self.measure().voltage()?,
            status: self.status()?,
        })
    }

    /// Hand the front panel back and release the transport.
    ///
    /// The transport is released even if the PSU could not be told. Closing
    /// an already closed handle does nothing.
    pub fn close(&mut self) -> Result<(), PsuError> {
        if !self.terminal.transport().is_open() {
            return Ok(());
        }
        let result = self.terminal.send(commands::LOCAL);
        self.terminal.close();
        result.map_err(PsuError::from)
    }
}

/// Measurements taken on [`WORKING_CHANNEL`].
pub struct Measure<'a, T: Transport> {
    psu: &'a mut Psu<T>,
}

impl<T: Transport> Measure<'_, T> {
    /// Measured output voltage in volts.
    pub fn voltage(&mut self) -> Result<f64, PsuError> {
        self.psu.query(commands::MEASURE_VOLTAGE)
    }

    /// Measured output current in amps.
    pub fn current(&mut self) -> Result<f64, PsuError> {
        self.psu.query(commands::MEASURE_CURRENT)
    }
}
