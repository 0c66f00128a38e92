//! Real UART backend over a native serial port.
//!
//! Adapted from the teacher's `gps::run_reader`: open the port with
//! `tokio_serial`, wrap it in a `BufReader`, and read lines. Here the read
//! is driven by the caller's cooperative loop instead of a background
//! thread, so `read_line` is called once per poll rather than in its own
//! `loop`.

use crate::{HalError, Uart};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{trace, warn};

/// A real serial port, opened via `tokio_serial`'s native (blocking) API.
pub struct SerialUart {
    reader: BufReader<Box<dyn tokio_serial::SerialPort>>,
    line: String,
}

impl SerialUart {
    /// Opens `port` at `baud_rate`. The port's own read timeout is set to
    /// `timeout`; callers should pass the same value to `read_line` so the
    /// two agree.
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, HalError> {
        let handle = tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native()
            .map_err(|e| HalError::Uart(e.to_string()))?;

        Ok(Self {
            reader: BufReader::new(Box::new(handle)),
            line: String::new(),
        })
    }
}

impl Uart for SerialUart {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HalError> {
        self.reader.get_mut().set_timeout(timeout).map_err(|e| HalError::Uart(e.to_string()))?;

        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => {
                warn!("serial port closed (EOF)");
                Err(HalError::Uart("port closed".into()))
            }
            Ok(_) => {
                let trimmed = self.line.trim_end_matches(['\r', '\n']);
                trace!(sentence = %trimmed, "uart line");
                Ok(Some(trimmed.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(HalError::Uart(e.to_string())),
        }
    }
}
