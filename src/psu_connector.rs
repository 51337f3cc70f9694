use crate::config::{PsuConfig, Verbosity};
use crate::init_sequence::InitError;
use crate::psu::{commands, Psu};
use crate::serial_terminal::PsuTerminal;
use crate::transport::{SerialSettings, SerialTransport, Transport, TransportError};
use std::time::Duration;

/// Read timeout used while probing candidate ports.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("No PSU found. Please connect the PSU or specify the port manually")]
    DeviceNotFound,

    #[error(transparent)]
    Init(#[from] InitError),
}

/// Whether `reply` looks like a `YYYY.V` version string.
pub fn is_firmware_version(reply: &str) -> bool {
    matches!(
        reply.trim_end().as_bytes(),
        [y0, y1, y2, y3, b'.', v, ..]
            if [y0, y1, y2, y3, v].iter().all(|b| b.is_ascii_digit())
    )
}

pub struct PsuConnector;

impl PsuConnector {
    /// Open the PSU and run its initialization sequence.
    ///
    /// With `discover` set, the configured port is ignored and every serial
    /// port on the system is probed instead.
    pub fn connect(config: &PsuConfig, discover: bool) -> Result<Psu<SerialTransport>, ConnectorError> {
        if !discover {
            log::debug!("Connecting to PSU on port {}", config.serial.port);
            return Ok(Psu::open(config)?);
        }

        let port = Self::find(&config.serial).ok_or(ConnectorError::DeviceNotFound)?;
        log::debug!("Connecting to PSU found on port {}", port);
        let config = PsuConfig {
            serial: config.serial.with_port(&port),
            ..config.clone()
        };
        Ok(Psu::open(&config)?)
    }

    /// Names of the serial ports the OS reports. Enumeration failures give an empty list.
    pub fn candidate_ports() -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                log::debug!("Could not enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    /// First serial port whose device answers the version query.
    ///
    /// Every other setting in `settings` is used as-is for the probes.
    pub fn find(settings: &SerialSettings) -> Option<String> {
        let probe_settings = settings.with_read_timeout(PROBE_TIMEOUT);
        Self::find_among(&Self::candidate_ports(), |port| {
            SerialTransport::open(&probe_settings.with_port(port))
        })
    }

    /// Probe `candidates` in order using `open` and return the first that
    /// answers with a version string. Ports that fail to open or answer
    /// anything else are skipped.
    pub fn find_among<S, T, F>(candidates: &[S], mut open: F) -> Option<String>
    where
        S: AsRef<str>,
        T: Transport,
        F: FnMut(&str) -> Result<T, TransportError>,
    {
        candidates.iter().map(AsRef::as_ref).find_map(|port| {
            let transport = match open(port) {
                Ok(transport) => transport,
                Err(e) => {
                    log::debug!("Skipping {}: {}", port, e);
                    return None;
                }
            };

            match Self::probe(transport) {
                Some(version) => {
                    log::info!("Found PSU on {} (SCPI version {})", port, version);
                    Some(port.to_string())
                }
                None => {
                    log::debug!("{} is not the PSU", port);
                    None
                }
            }
        })
    }

    fn probe<T: Transport>(transport: T) -> Option<String> {
        let mut terminal = PsuTerminal::new(transport, Verbosity::Quiet);
        let reply = terminal.transact(commands::VERSION_QUERY).ok();
        terminal.close();
        reply.filter(|reply| is_firmware_version(reply))
    }
}
