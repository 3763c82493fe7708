//! sdmmc-logger - Logging sessions
//!
//! A [`Logger`] owns a storage backend and a [`LogBuffer`]. Between
//! [`Logger::start`] and [`Logger::stop`] it turns measurements into CSV
//! lines and appends them to a file; the rest of the time every append is a
//! no-op. [`Logger::is_logging`] is the "logging active" indicator for the
//! user interface.

mod buffer;
mod record;

use core::cell::Cell;

use critical_section::Mutex;

pub use self::buffer::LogBuffer;
pub use self::record::{
    format_record, header_line, FileName, FileNaming, Measurement, Record, Timestamp,
    FILE_NAME_CAPACITY, RECORD_CAPACITY,
};

use crate::storage::StorageBackend;

#[cfg(feature = "log")]
use log::{debug, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, info, warn};

/// Default capacity of the append buffer
pub const DEFAULT_CAPACITY: usize = 256;

/// The errors a [`Logger`] can return.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogError<E> {
    /// The backend could not be brought up
    Init(E),
    /// The log file could not be opened
    Open(E),
    /// Buffered data could not be written and was dropped
    Write(E),
    /// The log file could not be closed cleanly
    Close(E),
    /// A record or file name did not fit its buffer
    Format,
}

/// Options for a [`Logger`].
#[derive(Debug, Copy, Clone)]
pub struct LoggerConfig {
    /// Flush once this many bytes are buffered
    pub flush_threshold: usize,
    /// Where each session writes
    pub naming: FileNaming,
    /// Log a fifth, light level, column
    pub light_channel: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            flush_threshold: 128,
            naming: FileNaming::TimeOfDay,
            light_channel: false,
        }
    }
}

#[derive(Debug)]
enum Session {
    Closed,
    Open {
        file: FileName,
        header_written: bool,
    },
}

/// Buffered CSV logging onto a storage backend.
pub struct Logger<B, const N: usize = DEFAULT_CAPACITY>
where
    B: StorageBackend,
{
    backend: B,
    config: LoggerConfig,
    buffer: LogBuffer<N>,
    session: Session,
    write_failures: u32,
}

impl<B, const N: usize> Logger<B, N>
where
    B: StorageBackend,
{
    pub fn new(backend: B, config: LoggerConfig) -> Self {
        Self {
            backend,
            buffer: LogBuffer::new(config.flush_threshold),
            config,
            session: Session::Closed,
            write_failures: 0,
        }
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn release(self) -> B {
        self.backend
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Is a session open?
    pub fn is_logging(&self) -> bool {
        matches!(self.session, Session::Open { .. })
    }

    /// The file the open session writes to.
    pub fn file_name(&self) -> Option<&str> {
        match &self.session {
            Session::Open { file, .. } => Some(file.as_str()),
            Session::Closed => None,
        }
    }

    /// How many writes have failed, and had their data dropped, since this
    /// logger was created.
    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    /// Bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bring up the storage and open a file named after `now`.
    ///
    /// Does nothing if a session is already open. On error the session stays
    /// closed. A header that can't be written yet doesn't stop the session;
    /// it is written before the next data instead.
    pub fn start(&mut self, now: &Timestamp) -> Result<(), LogError<B::Error>> {
        if self.is_logging() {
            return Ok(());
        }
        self.backend.init().map_err(LogError::Init)?;
        let file = self
            .config
            .naming
            .file_name(now)
            .map_err(|_| LogError::Format)?;
        self.backend
            .open_append(file.as_str())
            .map_err(LogError::Open)?;
        self.buffer.clear();

        let header = header_line(self.config.light_channel);
        let header_written = match self.backend.write(header.as_bytes()) {
            Ok(()) => true,
            Err(_) => {
                warn!("Header write failed, will retry");
                self.write_failures = self.write_failures.wrapping_add(1);
                false
            }
        };
        info!("Logging to {}", file.as_str());
        self.session = Session::Open {
            file,
            header_written,
        };
        Ok(())
    }

    /// Flush, close the file and end the session.
    ///
    /// The session is closed even if the flush or close fails; the first
    /// error is returned.
    pub fn stop(&mut self) -> Result<(), LogError<B::Error>> {
        if !self.is_logging() {
            return Ok(());
        }
        let flushed = self.flush();
        self.session = Session::Closed;
        self.buffer.clear();
        let closed = self.backend.close().map_err(LogError::Close);
        info!("Logging stopped");
        flushed.and(closed)
    }

    /// Start if stopped, stop if started. Returns whether a session is open
    /// afterwards.
    pub fn toggle(&mut self, now: &Timestamp) -> Result<bool, LogError<B::Error>> {
        if self.is_logging() {
            self.stop()?;
        } else {
            self.start(now)?;
        }
        Ok(self.is_logging())
    }

    /// Write out everything buffered.
    pub fn flush(&mut self) -> Result<(), LogError<B::Error>> {
        if !self.is_logging() {
            return Ok(());
        }
        let light = self.config.light_channel;
        let result = if self.buffer.is_empty() {
            write_header_if_needed(
                &mut self.backend,
                &mut self.session,
                light,
                &mut self.write_failures,
            )
        } else {
            let mut sink = |data: &[u8]| {
                write_through(
                    &mut self.backend,
                    &mut self.session,
                    light,
                    &mut self.write_failures,
                    data,
                )
            };
            self.buffer.flush(&mut sink)
        };
        result.map_err(LogError::Write)
    }

    /// Append raw bytes to the log. Does nothing when no session is open.
    pub fn append(&mut self, record: &[u8]) -> Result<(), LogError<B::Error>> {
        if !self.is_logging() {
            return Ok(());
        }
        let light = self.config.light_channel;
        let sink = |data: &[u8]| {
            write_through(
                &mut self.backend,
                &mut self.session,
                light,
                &mut self.write_failures,
                data,
            )
        };
        self.buffer.append(record, sink).map_err(LogError::Write)
    }

    /// Log one set of readings. Does nothing when no session is open.
    pub fn append_line(
        &mut self,
        time: &Timestamp,
        measurement: &Measurement,
    ) -> Result<(), LogError<B::Error>> {
        if !self.is_logging() {
            return Ok(());
        }
        let record = format_record(time, measurement, self.config.light_channel)
            .map_err(|_| LogError::Format)?;
        self.append(record.as_bytes())
    }
}

/// Write the header if the session still owes one.
fn write_header_if_needed<B>(
    backend: &mut B,
    session: &mut Session,
    light: bool,
    failures: &mut u32,
) -> Result<(), B::Error>
where
    B: StorageBackend,
{
    if let Session::Open { header_written, .. } = session {
        if *header_written {
            return Ok(());
        }
        debug!("Retrying header");
        match backend.write(header_line(light).as_bytes()) {
            Ok(()) => *header_written = true,
            Err(e) => {
                *failures = failures.wrapping_add(1);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// The buffer's sink: header first if it is still owed, then the data. On
/// failure the data is dropped and counted.
fn write_through<B>(
    backend: &mut B,
    session: &mut Session,
    light: bool,
    failures: &mut u32,
    data: &[u8],
) -> Result<(), B::Error>
where
    B: StorageBackend,
{
    write_header_if_needed(backend, session, light, failures)?;
    backend.write(data).map_err(|e| {
        warn!("Log write failed, {} bytes dropped", data.len());
        *failures = failures.wrapping_add(1);
        e
    })
}

/// A start/stop request raised from an interrupt, e.g. an encoder button,
/// and picked up by the foreground loop.
pub struct ToggleRequest {
    pending: Mutex<Cell<bool>>,
}

impl ToggleRequest {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(false)),
        }
    }

    /// Ask for the logger to be toggled.
    pub fn request(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(true));
    }

    /// Was a toggle asked for since the last call? Clears the request.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).replace(false))
    }
}

impl Default for ToggleRequest {
    fn default() -> Self {
        Self::new()
    }
}
