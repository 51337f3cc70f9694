//! Scripted stand-in for the serial line, used by the unit tests.
//!
//! Replies registered with [`MockTransport::reply`] are handed out in order,
//! one per matching command. With [`MockTransport::simulated`] the mock also
//! keeps a small model of the PSU so setters and their read-backs line up
//! without scripting every query.

use crate::transport::{Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Default)]
struct DeviceModel {
    power: bool,
    voltage: String,
    current_limit: String,
    channel: String,
}

#[derive(Debug)]
pub struct MockTransport {
    written: Vec<u8>,
    pending: VecDeque<u8>,
    replies: HashMap<String, VecDeque<Vec<u8>>>,
    device: Option<DeviceModel>,
    strip_terminators: bool,
    write_error: bool,
    open: bool,
}

impl MockTransport {
    pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

    /// A mock that only answers what has been scripted.
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            pending: VecDeque::new(),
            replies: HashMap::new(),
            device: None,
            strip_terminators: false,
            write_error: false,
            open: true,
        }
    }

    /// A mock that behaves like a well-mannered PSU, powered off on P6V.
    pub fn simulated() -> Self {
        Self {
            device: Some(DeviceModel {
                power: false,
                voltage: "0.000".to_string(),
                current_limit: "0.000".to_string(),
                channel: "P6V".to_string(),
            }),
            ..Self::new()
        }
    }

    /// Queue `response` (CRLF appended) as the next reply to `command`.
    pub fn reply(&mut self, command: &str, response: &str) -> &mut Self {
        let mut bytes = response.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.raw_reply(command, &bytes)
    }

    /// Queue `bytes` verbatim as the next reply to `command`.
    pub fn raw_reply(&mut self, command: &str, bytes: &[u8]) -> &mut Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push_back(bytes.to_vec());
        self
    }

    /// Drop every CR/LF the device would send.
    pub fn set_strip_terminators(&mut self, strip: bool) {
        self.strip_terminators = strip;
    }

    pub fn set_write_error(&mut self, fail: bool) {
        self.write_error = fail;
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Everything written so far, split into commands without terminators.
    pub fn commands(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .split("\r\n")
            .filter(|command| !command.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn was_sent(&self, prefix: &str) -> bool {
        self.commands().iter().any(|c| c.starts_with(prefix))
    }

    fn respond(&mut self, command: &str) {
        let scripted = self
            .replies
            .get_mut(command)
            .and_then(VecDeque::pop_front);

        let reply = match scripted {
            Some(bytes) => Some(bytes),
            None => self.simulate(command).map(|text| format!("{text}\r\n").into_bytes()),
        };

        let strip = self.strip_terminators;
        if let Some(bytes) = reply {
            self.pending.extend(
                bytes
                    .into_iter()
                    .filter(|b| !(strip && (*b == b'\r' || *b == b'\n'))),
            );
        }
    }

    fn simulate(&mut self, command: &str) -> Option<String> {
        let device = self.device.as_mut()?;

        match command {
            "Output:state?" => Some(if device.power { "1" } else { "0" }.to_string()),
            "Output:State ON" => {
                device.power = true;
                None
            }
            "Output:State OFF" => {
                device.power = false;
                None
            }
            "Source:Voltage:Immediate?" => Some(device.voltage.clone()),
            "Source:Current:Immediate?" => Some(device.current_limit.clone()),
            "Instrument:Select?" => Some(device.channel.clone()),
            "Measure:Voltage:DC? P25V" => Some(if device.power {
                device.voltage.clone()
            } else {
                "0.000".to_string()
            }),
            "Measure:Current:DC? P25V" => Some("0.000".to_string()),
            "Status:Questionable:Condition?" => Some("0".to_string()),
            "System:Version?" => Some("1995.0".to_string()),
            _ => {
                if let Some(value) = command.strip_prefix("Source:Voltage:Immediate ") {
                    device.voltage = value.to_string();
                } else if let Some(value) = command.strip_prefix("Source:Current:Immediate ") {
                    device.current_limit = value.to_string();
                } else if let Some(channel) = command
                    .strip_prefix("INST:SEL ")
                    .or_else(|| command.strip_prefix("Instrument:Select "))
                {
                    device.channel = channel.to_string();
                }
                None
            }
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if self.write_error {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }

        self.written.extend_from_slice(bytes);
        let command = String::from_utf8_lossy(bytes);
        self.respond(command.trim_end_matches("\r\n"));
        Ok(bytes.len())
    }

    fn read_until(
        &mut self,
        terminator: &[u8],
        max_length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let mut response = Vec::new();
        while let Some(byte) = self.pending.pop_front() {
            response.push(byte);
            if response.ends_with(terminator) {
                return Ok(response);
            }
            if response.len() >= max_length {
                break;
            }
        }

        Err(TransportError::Timeout {
            timeout: Self::READ_TIMEOUT,
            received: String::from_utf8_lossy(&response).into_owned(),
        })
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replies_in_order() {
        let mut mock = MockTransport::new();
        mock.reply("Output:state?", "0").reply("Output:state?", "1");

        mock.write(b"Output:state?\r\n").unwrap();
        assert_eq!(mock.read_until(b"\r\n", 20).unwrap(), b"0\r\n");
        mock.write(b"Output:state?\r\n").unwrap();
        assert_eq!(mock.read_until(b"\r\n", 20).unwrap(), b"1\r\n");
        mock.write(b"Output:state?\r\n").unwrap();
        assert!(matches!(
            mock.read_until(b"\r\n", 20),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_simulated_device_tracks_setpoints() {
        let mut mock = MockTransport::simulated();
        mock.write(b"Source:Voltage:Immediate 3.300\r\n").unwrap();
        mock.write(b"Source:Voltage:Immediate?\r\n").unwrap();
        assert_eq!(mock.read_until(b"\r\n", 20).unwrap(), b"3.300\r\n");
    }

    #[test]
    fn test_scripted_reply_overrides_simulation() {
        let mut mock = MockTransport::simulated();
        mock.reply("Instrument:Select?", "N25V");
        mock.write(b"INST:SEL P25V\r\n").unwrap();
        mock.write(b"Instrument:Select?\r\n").unwrap();
        assert_eq!(mock.read_until(b"\r\n", 20).unwrap(), b"N25V\r\n");
        mock.write(b"Instrument:Select?\r\n").unwrap();
        assert_eq!(mock.read_until(b"\r\n", 20).unwrap(), b"P25V\r\n");
    }

    #[test]
    fn test_commands_split() {
        let mut mock = MockTransport::new();
        mock.write(b"System:Remote\r\n").unwrap();
        mock.write(b"Output:State ON\r\n").unwrap();
        assert_eq!(mock.commands(), vec!["System:Remote", "Output:State ON"]);
        assert!(mock.was_sent("Output:State"));
        assert!(!mock.was_sent("INST:SEL"));
    }

    #[test]
    fn test_strip_terminators() {
        let mut mock = MockTransport::simulated();
        mock.set_strip_terminators(true);
        mock.write(b"Output:state?\r\n").unwrap();
        match mock.read_until(b"\r\n", 20) {
            Err(TransportError::Timeout { received, .. }) => assert_eq!(received, "0"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
