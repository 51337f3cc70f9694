use crate::config::Verbosity;
use crate::transport::{Transport, TransportError, CRLF};
use std::string::FromUtf8Error;
use std::time::Duration;

/// Longest reply the PSU sends (numeric readings, short status words) plus CRLF.
pub const MAX_RESPONSE_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Timeout error: no terminated response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("UTF-8 conversion error in response to '{command}': {source}")]
    Encoding {
        command: String,
        #[source]
        source: FromUtf8Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Append the line terminator to `command`.
pub fn frame(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + CRLF.len());
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(CRLF);
    bytes
}

/// One-at-a-time SCPI exchange over a [`Transport`].
///
/// `&mut self` on every call is what keeps a second write from landing while a
/// read is still pending; there is no queue behind it.
#[derive(Debug)]
pub struct PsuTerminal<T: Transport> {
    transport: T,
    verbosity: Verbosity,
}

impl<T: Transport> PsuTerminal<T> {
    pub fn new(transport: T, verbosity: Verbosity) -> Self {
        Self {
            transport,
            verbosity,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a command that has no reply.
    pub fn send(&mut self, command: &str) -> Result<(), TerminalError> {
        if self.verbosity.allows(Verbosity::Wire) {
            log::debug!("-> {}", command);
        }
        self.transport.write(&frame(command))?;
        Ok(())
    }

    /// Send `command` and return the reply with its terminator stripped.
    pub fn transact(&mut self, command: &str) -> Result<String, TerminalError> {
        self.send(command)?;

        let bytes = match self.transport.read_until(CRLF, MAX_RESPONSE_LEN) {
            Ok(bytes) => bytes,
            Err(TransportError::Timeout { timeout, received }) => {
                if self.verbosity.allows(Verbosity::Wire) {
                    log::debug!(
                        "<- timeout after {:?} waiting on '{}', got '{}'",
                        timeout,
                        command,
                        received.escape_default()
                    );
                }
                return Err(TerminalError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut response = String::from_utf8(bytes).map_err(|source| TerminalError::Encoding {
            command: command.to_string(),
            source,
        })?;
        if response.ends_with("\r\n") {
            response.truncate(response.len() - CRLF.len());
        }

        if self.verbosity.allows(Verbosity::Wire) {
            log::debug!("<- {}", response);
        }
        Ok(response)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}
