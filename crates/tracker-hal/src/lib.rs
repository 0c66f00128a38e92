//! Hardware abstraction layer for the track recorder firmware.
//!
//! Defines the trait boundary between the firmware core and the physical
//! byte transport, filesystem, GPIO/interrupt delivery, and wall-clock
//! source. Real backends for these (a UART driver, a FAT filesystem driver,
//! sysfs/GPIO interrupt delivery, a monotonic clock) are external
//! collaborators outside this crate's scope; what ships here is the trait
//! surface plus an in-memory [`mock`] implementation sufficient to drive
//! the firmware core end to end in tests.

use std::time::Duration;
use thiserror::Error;

pub mod mock;

#[cfg(feature = "serial")]
pub mod serial;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("UART error: {0}")]
    Uart(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("filesystem mount failed: {0}")]
    Mount(String),
    #[error("filesystem open failed: {0}")]
    Open(String),
    #[error("filesystem I/O error: {0}")]
    Io(String),
}

/// GPIO interrupt edge to trigger on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Callback invoked from [`Gpio::set_irq`] on a matching edge. Takes the
/// pin number and an opaque event mask, mirroring
/// `hal_gpio_irq_callback_t` in the original firmware's HAL.
pub type IrqCallback = Box<dyn FnMut(u32, u32) + Send>;

/// Blocking, line-oriented UART reader.
///
/// `read_line` blocks for up to `timeout`, returning `Ok(None)` on timeout
/// with no data. A returned line has already had its trailing `\r`/`\n`
/// stripped.
pub trait Uart: Send {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HalError>;
}

/// Digital input with edge-triggered interrupt delivery.
pub trait Gpio: Send {
    fn init_input(&mut self, pin: u32) -> Result<(), HalError>;
    fn read(&self, pin: u32) -> bool;
    fn set_irq(&mut self, pin: u32, edge: Edge, callback: IrqCallback) -> Result<(), HalError>;
}

/// File open mode, as passed to [`Filesystem::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// An open file handle on the medium.
pub trait File {
    fn write(&mut self, buf: &[u8]) -> Result<(), HalError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HalError>;
    fn sync(&mut self) -> Result<(), HalError>;
    fn close(self) -> Result<(), HalError>;
    fn size(&mut self) -> Result<u64, HalError>;
    /// Reads the final byte of the file without disturbing the handle's
    /// position, or `None` if the file is empty.
    fn read_byte_at_end(&mut self) -> Result<Option<u8>, HalError>;
}

/// Mount/unmount and path operations on the removable medium.
pub trait Filesystem {
    type File: File;

    fn mount(&mut self) -> Result<(), HalError>;
    fn unmount(&mut self) -> Result<(), HalError>;
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, HalError>;
    fn exists(&self, path: &str) -> bool;
    fn remove(&mut self, path: &str) -> Result<(), HalError>;
}

/// Monotonic wall clock.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn sleep_ms(&self, ms: u32);
}
