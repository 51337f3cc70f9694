use serde::Deserialize;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Carriage-return + line-feed, the line terminator used in both directions.
pub const CRLF: &[u8] = b"\r\n";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not open serial port {port}: {source}")]
    ConnectFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: no terminator within {timeout:?}, received '{received}'")]
    Timeout { timeout: Duration, received: String },

    #[error("Transport is closed")]
    Closed,
}

/// Byte-level access to the line the PSU hangs off.
///
/// Implementations block for at most their configured read timeout inside
/// [`Transport::read_until`]. A read that does not see the terminator in that
/// window fails with [`TransportError::Timeout`]; it never hands back a
/// truncated buffer.
pub trait Transport {
    /// Write all of `bytes`, returning how many were written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Read until `terminator` has been received, returning everything read
    /// including the terminator. At most `max_length` bytes are consumed.
    fn read_until(&mut self, terminator: &[u8], max_length: usize)
        -> Result<Vec<u8>, TransportError>;

    /// Release the underlying line. Safe to call any number of times.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    #[default]
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => Self::None,
            FlowControl::Software => Self::Software,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

/// Line parameters for the PSU's RS-232 port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Raise DTR after opening. The PSU will not talk to a host that leaves it low.
    pub assert_dtr: bool,
    pub read_timeout_ms: u64,
    /// `None` keeps the read timeout for writes as well.
    pub write_timeout_ms: Option<u64>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::Two,
            flow_control: FlowControl::None,
            assert_dtr: true,
            read_timeout_ms: 500,
            write_timeout_ms: None,
        }
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// Same settings, different port.
    pub fn with_port(&self, port: &str) -> Self {
        Self {
            port: port.to_string(),
            ..self.clone()
        }
    }

    /// Same settings, different read timeout.
    pub fn with_read_timeout(&self, timeout: Duration) -> Self {
        Self {
            read_timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ..self.clone()
        }
    }
}

/// Timeout the port itself blocks for on each read. The deadline of a whole
/// [`Transport::read_until`] call is kept by the caller's clock.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`Transport`] over a real serial port.
pub struct SerialTransport {
    port_name: String,
    serial: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("open", &self.serial.is_some())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl SerialTransport {
    /// Open and configure the port described by `settings`.
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let serial = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(settings.flow_control.into())
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(|source| TransportError::ConnectFailed {
                port: settings.port.clone(),
                source,
            })?;

        Self::from_port(serial, settings)
    }

    /// Take over an already opened port. Line parameters are left as they
    /// are; timeouts, DTR and buffers are set up from `settings`.
    pub fn from_port(
        mut serial: Box<dyn SerialPort>,
        settings: &SerialSettings,
    ) -> Result<Self, TransportError> {
        let connect_failed = |source| TransportError::ConnectFailed {
            port: settings.port.clone(),
            source,
        };

        serial.set_timeout(POLL_INTERVAL).map_err(connect_failed)?;
        if settings.assert_dtr {
            serial
                .write_data_terminal_ready(true)
                .map_err(connect_failed)?;
        }
        serial
            .clear(serialport::ClearBuffer::All)
            .map_err(connect_failed)?;

        log::debug!(
            "Opened {} at {} baud, read timeout {:?}",
            settings.port,
            settings.baud_rate,
            settings.read_timeout()
        );

        Ok(Self {
            port_name: settings.port.clone(),
            serial: Some(serial),
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout().unwrap_or_else(|| settings.read_timeout()),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn serial(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.serial.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let write_timeout = self.write_timeout;
        let serial = self.serial()?;

        serial
            .set_timeout(write_timeout)
            .map_err(|e| TransportError::Io(e.into()))?;
        let written = serial.write_all(bytes).and_then(|()| serial.flush());
        serial
            .set_timeout(POLL_INTERVAL)
            .map_err(|e| TransportError::Io(e.into()))?;
        written?;

        Ok(bytes.len())
    }

    fn read_until(
        &mut self,
        terminator: &[u8],
        max_length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let timeout = self.read_timeout;
        let serial = self.serial()?;
        let mut response = Vec::with_capacity(max_length);
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let mut byte = [0u8; 1];
            match serial.read(&mut byte) {
                Ok(1) => {
                    response.push(byte[0]);
                    if response.ends_with(terminator) {
                        return Ok(response);
                    }
                    if response.len() >= max_length {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransportError::Timeout {
            timeout,
            received: String::from_utf8_lossy(&response).into_owned(),
        })
    }

    fn close(&mut self) {
        if self.serial.take().is_some() {
            log::debug!("Closed {}", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.serial.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
