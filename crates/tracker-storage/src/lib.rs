//! Crash-safe, append-only CSV log store.
//!
//! File rotation is driven by a dirty-marker protocol: the marker exists
//! from a successful [`StorageEngine::init`] until a clean
//! [`StorageEngine::shutdown`]. Its presence at the next `init` proves the
//! prior run did not terminate cleanly and forces rotation, so a later run
//! never appends to a file a crashed run left mid-row. A trailing-newline
//! check on the last file is a secondary defense for the case where the
//! marker itself was lost.

use thiserror::Error;
use tracing::{debug, warn};
use tracker_hal::{File, Filesystem, OpenMode};
use tracker_types::{FixFlags, GpsFix};

const DIRTY_FILENAME: &str = "_dirty";
const BASE_FILENAME: &str = "track";
const MAX_FILE_NUMBER: u32 = 999;
const SYNC_INTERVAL_MS: u32 = 5_000;
const CSV_HEADER: &str = "timestamp,latitude,longitude,speed_kmh,altitude_m,course_deg,satellites,hdop,fix_quality\n";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to mount storage medium")]
    Mount,
    #[error("failed to open log file")]
    Open,
    #[error("failed to write log row")]
    Write,
    #[error("failed to sync log file")]
    Sync,
    #[error("storage medium full")]
    Full,
    #[error("exceeded maximum file index ({MAX_FILE_NUMBER})")]
    TooManyFiles,
}

fn make_filename(number: u32) -> String {
    if number == 0 {
        format!("{BASE_FILENAME}.csv")
    } else {
        format!("{BASE_FILENAME}_{number}.csv")
    }
}

/// Owns the active file handle and the bookkeeping needed to rotate and
/// sync it. Generic over the concrete [`Filesystem`] backend so the same
/// engine drives both the in-memory mock and a real medium.
pub struct StorageEngine<FS: Filesystem> {
    fs: FS,
    file: Option<FS::File>,
    filename: String,
    last_sync_ms: u32,
    is_open: bool,
}

impl<FS: Filesystem> StorageEngine<FS> {
    pub fn new(fs: FS) -> Self {
        Self {
            fs,
            file: None,
            filename: String::new(),
            last_sync_ms: 0,
            is_open: false,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Accessor for the underlying filesystem, mainly useful in tests that
    /// want to inspect what actually landed on the (mock) medium.
    pub fn fs(&self) -> &FS {
        &self.fs
    }

    fn find_highest_file_number(&self) -> i32 {
        let mut highest: i32 = -1;
        if self.fs.exists(&make_filename(0)) {
            highest = 0;
        }
        for i in 1..=MAX_FILE_NUMBER {
            if self.fs.exists(&make_filename(i)) {
                highest = i as i32;
            }
        }
        highest
    }

    fn file_is_empty(&mut self, name: &str) -> bool {
        match self.fs.open(name, OpenMode::Read) {
            Ok(mut f) => f.size().map(|s| s == 0).unwrap_or(true),
            Err(_) => true,
        }
    }

    fn file_ends_with_newline(&mut self, name: &str) -> bool {
        match self.fs.open(name, OpenMode::Read) {
            Ok(mut f) => match f.size() {
                Ok(0) => true,
                Ok(_) => matches!(f.read_byte_at_end(), Ok(Some(b'\n'))),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Mounts the medium, selects or creates the active file per the
    /// dirty-marker/rotation algorithm, writes a header if needed, and
    /// places a fresh dirty marker.
    pub fn init(&mut self, now_ms: u32) -> Result<(), StorageError> {
        self.fs.mount().map_err(|_| StorageError::Mount)?;

        let mut highest = self.find_highest_file_number();
        let dirty = self.fs.exists(DIRTY_FILENAME);
        let mut need_new_file = false;
        let mut need_header = false;

        if highest < 0 {
            highest = 0;
            need_new_file = true;
            need_header = true;
        } else if dirty {
            warn!("dirty marker present at startup, rotating to a new file");
            need_new_file = true;
            need_header = true;
            let _ = self.fs.remove(DIRTY_FILENAME);
        } else {
            let name = make_filename(highest as u32);
            if self.file_is_empty(&name) {
                need_header = true;
            } else if !self.file_ends_with_newline(&name) {
                warn!(file = %name, "last file missing trailing newline, rotating");
                need_new_file = true;
                need_header = true;
            }
        }

        if need_new_file {
            highest = self.find_highest_file_number() + 1;
        }

        if highest > MAX_FILE_NUMBER as i32 {
            return Err(StorageError::TooManyFiles);
        }

        self.filename = make_filename(highest as u32);

        let mut file = self
            .fs
            .open(&self.filename, OpenMode::Append)
            .map_err(|_| StorageError::Open)?;
        self.is_open = true;

        if need_header {
            file.write(CSV_HEADER.as_bytes()).map_err(|_| StorageError::Write)?;
        }
        self.file = Some(file);

        if let Ok(mut marker) = self.fs.open(DIRTY_FILENAME, OpenMode::Write) {
            let _ = marker.sync();
        }

        self.last_sync_ms = now_ms;
        debug!(file = %self.filename, "storage engine initialized");
        Ok(())
    }

    /// Appends one CSV row for `fix`, syncing if the sync interval has
    /// elapsed since the last one.
    pub fn write_fix(&mut self, fix: &GpsFix, now_ms: u32) -> Result<(), StorageError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::Write);
        };
        if !self.is_open {
            return Err(StorageError::Write);
        }

        let row = format_row(fix);
        file.write(row.as_bytes()).map_err(|_| StorageError::Write)?;

        if now_ms.wrapping_sub(self.last_sync_ms) >= SYNC_INTERVAL_MS {
            file.sync().map_err(|_| StorageError::Sync)?;
            self.last_sync_ms = now_ms;
        }

        Ok(())
    }

    /// Syncs, closes the active file, removes the dirty marker, and
    /// unmounts. Writes attempted after this return `ERR_WRITE`.
    pub fn shutdown(&mut self) -> Result<(), StorageError> {
        if !self.is_open {
            return Err(StorageError::Write);
        }

        if let Some(mut file) = self.file.take() {
            let _ = file.sync();
            let _ = file.close();
        }
        self.is_open = false;

        let _ = self.fs.remove(DIRTY_FILENAME);
        let _ = self.fs.unmount();

        Ok(())
    }
}

fn format_row(fix: &GpsFix) -> String {
    let timestamp = if fix.flags.contains(FixFlags::HAS_DATE) && fix.flags.contains(FixFlags::HAS_TIME) {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            fix.year, fix.month, fix.day, fix.hour, fix.minute, fix.second
        )
    } else {
        String::new()
    };

    let latitude = if fix.flags.contains(FixFlags::HAS_LATLON) {
        format!("{:.6}", fix.latitude)
    } else {
        String::new()
    };
    let longitude = if fix.flags.contains(FixFlags::HAS_LATLON) {
        format!("{:.6}", fix.longitude)
    } else {
        String::new()
    };
    let speed = if fix.flags.contains(FixFlags::HAS_SPEED) {
        format!("{:.2}", fix.speed_kmh)
    } else {
        String::new()
    };
    let altitude = if fix.flags.contains(FixFlags::HAS_ALT) {
        format!("{:.1}", fix.altitude_m)
    } else {
        String::new()
    };
    let course = if fix.flags.contains(FixFlags::HAS_COURSE) {
        format!("{:.1}", fix.course_deg)
    } else {
        String::new()
    };
    let satellites = if fix.flags.contains(FixFlags::HAS_LATLON) {
        fix.satellites.to_string()
    } else {
        String::new()
    };
    let hdop = if fix.flags.contains(FixFlags::HAS_HDOP) {
        format!("{:.2}", fix.hdop)
    } else {
        String::new()
    };
    let fix_quality = fix.fix_quality.to_string();

    format!(
        "{timestamp},{latitude},{longitude},{speed},{altitude},{course},{satellites},{hdop},{fix_quality}\n"
    )
}
