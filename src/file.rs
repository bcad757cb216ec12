//! OS file handles beneath the buffered frame.
//!
//! The engine never touches these directly; the frame layer drives them
//! through [`RawFile`]. Three backends: a real file on disk, the standard
//! streams for the predefined units, and a growable in-memory file used by a
//! virtual filesystem (and by tests that want to inspect file images).

use crate::connection::{Action, CloseStatus, OpenStatus};
use crate::errors::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// A positioned byte store. Offsets are absolute; backends that cannot seek
/// (the standard streams) ignore them and move strictly forward.
pub trait RawFile: Send {
    fn read_at(&mut self, at: i64, buf: &mut [u8]) -> io::Result<usize>;
    fn write_at(&mut self, at: i64, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn truncate(&mut self, at: i64) -> io::Result<()>;

    fn known_size(&self) -> Option<i64>;
    fn may_position(&self) -> bool;
    fn may_read(&self) -> bool;
    fn may_write(&self) -> bool;
    fn may_asynchronous(&self) -> bool {
        true
    }
    fn is_terminal(&self) -> bool {
        false
    }
    fn is_windows_text_file(&self) -> bool {
        false
    }

    /// Releases the handle; `CloseStatus::Delete` also removes the file.
    fn close(&mut self, status: CloseStatus) -> io::Result<()>;
}

#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: Option<PathBuf>,
    may_read: bool,
    may_write: bool,
}

impl DiskFile {
    fn new(file: File, path: Option<PathBuf>, may_read: bool, may_write: bool) -> Self {
        Self {
            file,
            path,
            may_read,
            may_write,
        }
    }
}

impl RawFile for DiskFile {
    fn read_at(&mut self, at: i64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(at as u64))?;
        self.file.read(buf)
    }

    fn write_at(&mut self, at: i64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(at as u64))?;
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn truncate(&mut self, at: i64) -> io::Result<()> {
        self.file.set_len(at as u64)
    }

    fn known_size(&self) -> Option<i64> {
        self.file.metadata().ok().map(|m| m.len() as i64)
    }

    fn may_position(&self) -> bool {
        true
    }

    fn may_read(&self) -> bool {
        self.may_read
    }

    fn may_write(&self) -> bool {
        self.may_write
    }

    fn close(&mut self, status: CloseStatus) -> io::Result<()> {
        self.file.flush()?;
        if status == CloseStatus::Delete {
            if let Some(path) = self.path.take() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Opens or creates a file on disk per the OPEN statement's STATUS= and
/// ACTION= specifiers. With no ACTION=, read-write is attempted first and
/// degraded to read-only if the file system refuses it.
pub fn open_disk(path: &[u8], status: OpenStatus, action: Option<Action>) -> Result<DiskFile> {
    let path = PathBuf::from(std::str::from_utf8(path).map_err(|_| Error::NonUnicodePath)?);

    let attempts: &[Action] = match action {
        Some(Action::Read) => &[Action::Read],
        Some(Action::Write) => &[Action::Write],
        Some(Action::ReadWrite) => &[Action::ReadWrite],
        None => &[Action::ReadWrite, Action::Read, Action::Write],
    };

    let mut last_err = None;
    for &attempt in attempts {
        let (may_read, may_write) = match attempt {
            Action::Read => (true, false),
            Action::Write => (false, true),
            Action::ReadWrite => (true, true),
        };
        let mut options = OpenOptions::new();
        options.read(may_read).write(may_write);
        match status {
            OpenStatus::Old => (),
            OpenStatus::New => {
                options.create_new(true);
            }
            OpenStatus::Replace => {
                options.create(may_write).truncate(may_write);
            }
            OpenStatus::Unknown => {
                options.create(may_write);
            }
            OpenStatus::Scratch => unreachable!("scratch files have no path"),
        }
        match options.open(&path) {
            Ok(file) => return Ok(DiskFile::new(file, Some(path), may_read, may_write)),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied && attempts.len() > 1 => {
                last_err = Some(err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(last_err.expect("no open attempt was made").into())
}

/// An anonymous temporary file for STATUS='SCRATCH'; the OS unlinks it, so
/// CLOSE never needs to.
pub fn open_scratch() -> Result<DiskFile> {
    Ok(DiskFile::new(tempfile::tempfile()?, None, true, true))
}

/// One of the process standard streams, for the predefined units.
pub enum StdStream {
    Stdin(io::Stdin),
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl StdStream {
    pub fn stdin() -> Self {
        StdStream::Stdin(io::stdin())
    }

    pub fn stdout() -> Self {
        StdStream::Stdout(io::stdout())
    }

    pub fn stderr() -> Self {
        StdStream::Stderr(io::stderr())
    }
}

impl RawFile for StdStream {
    fn read_at(&mut self, _at: i64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StdStream::Stdin(stream) => stream.lock().read(buf),
            _ => Err(io::Error::from(io::ErrorKind::Unsupported)),
        }
    }

    fn write_at(&mut self, _at: i64, data: &[u8]) -> io::Result<()> {
        match self {
            StdStream::Stdin(_) => Err(io::Error::from(io::ErrorKind::Unsupported)),
            StdStream::Stdout(stream) => stream.lock().write_all(data),
            StdStream::Stderr(stream) => stream.lock().write_all(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StdStream::Stdin(_) => Ok(()),
            StdStream::Stdout(stream) => stream.lock().flush(),
            StdStream::Stderr(stream) => stream.lock().flush(),
        }
    }

    fn truncate(&mut self, _at: i64) -> io::Result<()> {
        Ok(())
    }

    fn known_size(&self) -> Option<i64> {
        None
    }

    fn may_position(&self) -> bool {
        false
    }

    fn may_read(&self) -> bool {
        matches!(self, StdStream::Stdin(_))
    }

    fn may_write(&self) -> bool {
        !matches!(self, StdStream::Stdin(_))
    }

    fn may_asynchronous(&self) -> bool {
        false
    }

    fn is_terminal(&self) -> bool {
        match self {
            StdStream::Stdin(stream) => stream.is_terminal(),
            StdStream::Stdout(stream) => stream.is_terminal(),
            StdStream::Stderr(stream) => stream.is_terminal(),
        }
    }

    fn close(&mut self, _status: CloseStatus) -> io::Result<()> {
        self.flush()
    }
}

/// Shared handle to a [`MemoryFile`]'s backing bytes.
pub type FileImage = Arc<Mutex<Vec<u8>>>;

/// An in-memory file image. The backing vector is shared, so a test can keep
/// a handle to it and inspect the bytes after the unit has been closed.
pub struct MemoryFile {
    data: FileImage,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_contents(contents: &[u8]) -> Self {
        Self {
            data: Arc::new(Mutex::new(contents.to_vec())),
        }
    }

    pub fn contents(&self) -> FileImage {
        Arc::clone(&self.data)
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RawFile for MemoryFile {
    fn read_at(&mut self, at: i64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let at = at as usize;
        if at >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - at);
        buf[..n].copy_from_slice(&data[at..at + n]);
        Ok(n)
    }

    fn write_at(&mut self, at: i64, new: &[u8]) -> io::Result<()> {
        let mut data = self.data.lock();
        let at = at as usize;
        if data.len() < at + new.len() {
            data.resize(at + new.len(), 0);
        }
        data[at..at + new.len()].copy_from_slice(new);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn truncate(&mut self, at: i64) -> io::Result<()> {
        self.data.lock().resize(at as usize, 0);
        Ok(())
    }

    fn known_size(&self) -> Option<i64> {
        Some(self.data.lock().len() as i64)
    }

    fn may_position(&self) -> bool {
        true
    }

    fn may_read(&self) -> bool {
        true
    }

    fn may_write(&self) -> bool {
        true
    }

    fn close(&mut self, _status: CloseStatus) -> io::Result<()> {
        Ok(())
    }
}
