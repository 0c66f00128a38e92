//! In-memory HAL implementation for tests.
//!
//! Grounded on `original_source/src/hal/hal_mock.c`: a fed UART line
//! buffer, an array of GPIO values with a registered interrupt callback
//! per pin, an in-memory filesystem keyed by path, and a settable clock.

use crate::{Edge, File, Filesystem, Gpio, HalError, IrqCallback, OpenMode, Uart};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// Feeds pre-recorded lines to the firmware core, as if they arrived over
/// the serial link one at a time.
#[derive(Default)]
pub struct MockUart {
    lines: VecDeque<String>,
}

impl MockUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a block of NMEA text, splitting on `\n` the way a real
    /// receiver's line framing would.
    pub fn push_data(&mut self, data: &str) {
        for line in data.split('\n') {
            if !line.is_empty() {
                self.lines.push_back(line.to_string());
            }
        }
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }
}

impl Uart for MockUart {
    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, HalError> {
        Ok(self.lines.pop_front())
    }
}

/// GPIO mock: a fixed-size table of levels, each with an optional
/// registered interrupt callback fired by [`MockGpio::trigger_irq`].
#[derive(Default)]
pub struct MockGpio {
    initialized: HashMap<u32, bool>,
    values: HashMap<u32, bool>,
    callbacks: HashMap<u32, (Edge, IrqCallback)>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a pin's current level, as if read from the physical line.
    pub fn set(&mut self, pin: u32, value: bool) {
        self.values.insert(pin, value);
    }

    pub fn is_initialized(&self, pin: u32) -> bool {
        self.initialized.get(&pin).copied().unwrap_or(false)
    }

    /// Simulate an edge arriving on `pin`: invokes the registered callback
    /// if one was set via [`Gpio::set_irq`] and the edge matches.
    pub fn trigger_irq(&mut self, pin: u32, edge: Edge, events: u32) {
        if let Some((registered_edge, cb)) = self.callbacks.get_mut(&pin) {
            if *registered_edge == edge {
                cb(pin, events);
            }
        }
    }
}

impl Gpio for MockGpio {
    fn init_input(&mut self, pin: u32) -> Result<(), HalError> {
        self.initialized.insert(pin, true);
        Ok(())
    }

    fn read(&self, pin: u32) -> bool {
        self.values.get(&pin).copied().unwrap_or(false)
    }

    fn set_irq(&mut self, pin: u32, edge: Edge, callback: IrqCallback) -> Result<(), HalError> {
        self.callbacks.insert(pin, (edge, callback));
        Ok(())
    }
}

/// A file handle into [`MockFilesystem`]'s in-memory store.
///
/// Shares its backing buffer with the filesystem table via `Rc<RefCell<_>>`
/// so writes are visible to a later `open` on the same path without an
/// explicit flush step, the way a real file would behave.
pub struct MockFile {
    contents: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    append: bool,
    pos: usize,
}

impl File for MockFile {
    fn write(&mut self, buf: &[u8]) -> Result<(), HalError> {
        let mut contents = self.contents.borrow_mut();
        if self.append {
            contents.extend_from_slice(buf);
        } else {
            let end = self.pos + buf.len();
            if contents.len() < end {
                contents.resize(end, 0);
            }
            contents[self.pos..end].copy_from_slice(buf);
            self.pos = end;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let contents = self.contents.borrow();
        let remaining = contents.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&contents[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn sync(&mut self) -> Result<(), HalError> {
        Ok(())
    }

    fn close(self) -> Result<(), HalError> {
        Ok(())
    }

    fn size(&mut self) -> Result<u64, HalError> {
        Ok(self.contents.borrow().len() as u64)
    }

    fn read_byte_at_end(&mut self) -> Result<Option<u8>, HalError> {
        Ok(self.contents.borrow().last().copied())
    }
}

/// In-memory filesystem keyed by path, standing in for the removable
/// FAT-formatted medium.
#[derive(Default)]
pub struct MockFilesystem {
    mounted: bool,
    files: HashMap<String, std::rc::Rc<std::cell::RefCell<Vec<u8>>>>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a file's contents, as if it survived from a prior boot.
    pub fn seed(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .insert(path.into(), std::rc::Rc::new(std::cell::RefCell::new(contents.into())));
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).map(|v| v.borrow().clone())
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}

impl Filesystem for MockFilesystem {
    type File = MockFile;

    fn mount(&mut self) -> Result<(), HalError> {
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), HalError> {
        self.mounted = false;
        Ok(())
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, HalError> {
        if !self.mounted {
            return Err(HalError::Open("filesystem not mounted".into()));
        }
        let entry = self
            .files
            .entry(path.to_string())
            .or_insert_with(|| std::rc::Rc::new(std::cell::RefCell::new(Vec::new())))
            .clone();

        match mode {
            OpenMode::Read => Ok(MockFile {
                contents: entry,
                append: false,
                pos: 0,
            }),
            OpenMode::Write => {
                entry.borrow_mut().clear();
                Ok(MockFile {
                    contents: entry,
                    append: false,
                    pos: 0,
                })
            }
            OpenMode::Append => {
                let pos = entry.borrow().len();
                Ok(MockFile {
                    contents: entry,
                    append: true,
                    pos,
                })
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn remove(&mut self, path: &str) -> Result<(), HalError> {
        self.files.remove(path);
        Ok(())
    }
}

/// Settable monotonic clock for deterministic sync-interval tests.
#[derive(Default)]
pub struct MockClock {
    now_ms: std::cell::Cell<u32>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ms(&self, ms: u32) {
        self.now_ms.set(ms);
    }

    pub fn advance_ms(&self, ms: u32) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl crate::Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.get()
    }

    fn sleep_ms(&self, _ms: u32) {
        // No-op: tests advance time explicitly via `advance_ms`.
    }
}
