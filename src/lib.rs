//! # Agilent PSU RS
//!
//! A Rust library for driving an Agilent-style bench power supply over a
//! serial line using SCPI.
//!
//! The driver talks to one PSU, on one channel, one command at a time. Every
//! read goes to the device; nothing is cached. Setters write a value and then
//! read it back, returning what the PSU actually applied.
//!
//! ## Features
//!
//! - **Verified power-up**: remote mode, output on, channel select and default setpoints, each checked by read-back
//! - **Live properties**: output state, voltage setpoint, current limit, measured voltage and current, over-current status
//! - **Cross-platform device discovery**: Uses `serialport` to probe ports for the PSU's version reply
//! - **Type safety**: Strong typing and error handling throughout
//!
//! ## Examples
//!
//! ### Connecting and Basic Usage
//!
//! ```rust,no_run
//! use agilent_psu_rs::{Psu, PsuConfig};
//!
//! let config = PsuConfig::default();
//! let mut psu = Psu::open(&config)?;
//!
//! // Setters return what the PSU reports after the write
//! let volts = psu.set_voltage(Some(3.3))?;
//! println!("Voltage setpoint: {:.3} V", volts);
//!
//! let measured = psu.measure().current()?;
//! println!("Drawing {:.3} A", measured);
//!
//! psu.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Snapshot
//!
//! ```rust,no_run
//! use agilent_psu_rs::{Psu, PsuConfig};
//!
//! let mut psu = Psu::open(&PsuConfig::default())?;
//! let values = psu.values()?;
//! println!(
//!     "{} {:.3} V / {:.3} A limit, status {}",
//!     values.power_str(),
//!     values.voltage_setting,
//!     values.current_limit,
//!     values.status
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Device Discovery
//!
//! ```rust,no_run
//! use agilent_psu_rs::{PsuConfig, PsuConnector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PsuConfig::default();
//!
//! // Probe every serial port for the PSU
//! if let Some(port) = PsuConnector::find(&config.serial) {
//!     println!("PSU found on {}", port);
//! }
//!
//! // Or discover and initialize in one go
//! let psu = PsuConnector::connect(&config, true)?;
//! println!("Initialized: {:?}", psu.init_steps());
//! # Ok(())
//! # }
//! ```
//!
//! ### Initialization Failures
//!
//! ```rust,no_run
//! use agilent_psu_rs::{InitError, Psu, PsuConfig};
//!
//! match Psu::open(&PsuConfig::default()) {
//!     Ok(_psu) => println!("PSU ready"),
//!     Err(e @ InitError::VoltageNotVerified { .. }) => eprintln!("Setpoint rejected: {}", e),
//!     Err(e) => eprintln!("Init failed at {}: {}", e.step(), e),
//! }
//! ```

pub mod config;
pub mod init_sequence;
pub mod psu;
pub mod psu_connector;
pub mod serial_terminal;
pub mod transport;

#[cfg(test)]
mod mock_transport;

// Re-export the main types for convenience
pub use config::{ConfigError, PsuConfig, Verbosity};

pub use init_sequence::{InitError, InitSequence, InitStep, StepFailure};

pub use psu::{Channel, Measure, OutputCheck, OutputStatus, Psu, PsuError, PsuValues};

pub use psu_connector::{ConnectorError, PsuConnector};

pub use serial_terminal::{PsuTerminal, TerminalError};

pub use transport::{SerialSettings, SerialTransport, Transport, TransportError};
