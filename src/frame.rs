//! The buffered frame: a sliding window over the connected file.
//!
//! The record engine never reads or writes the OS file directly. It asks the
//! frame to make a window of bytes available starting at some file offset,
//! then moves data through `frame()`/`frame_mut()`. Reads extend the window;
//! writes dirty a prefix of it that is pushed out on `flush`. Repositioning
//! the window forward drains its front so that retained suffix bytes (such as
//! the footer kept behind after an unformatted sequential read) stay valid.
//!
//! The window exists even while no file is connected; writes then land in
//! memory and `flush` does nothing, which keeps the engine free of
//! is-connected checks on its hot paths.

use crate::connection::{Action, CloseStatus, OpenStatus};
use crate::errors::IoErrorHandler;
use crate::file::{self, RawFile};

/// Granularity for reads from positionable files. Terminals are read
/// exactly-as-needed instead, so a prompt never blocks on lookahead.
const MIN_READ: i64 = 4096;

pub struct FrameBuffer {
    file: Option<Box<dyn RawFile + Send>>,
    /// File offset of `buf[0]`.
    start: i64,
    buf: Vec<u8>,
    /// Length of the prefix of `buf` that must be written back.
    dirty: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            file: None,
            start: 0,
            buf: Vec::new(),
            dirty: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    /// Connects a pre-opened handle, as for the predefined units.
    pub fn predefine(&mut self, file: Box<dyn RawFile + Send>) {
        self.file = Some(file);
        self.start = 0;
        self.buf.clear();
        self.dirty = 0;
    }

    /// Opens the named file (or a scratch file) and connects it.
    pub fn open(
        &mut self,
        path: Option<&[u8]>,
        status: OpenStatus,
        action: Option<Action>,
        handler: &mut IoErrorHandler,
    ) {
        let opened = match status {
            OpenStatus::Scratch => file::open_scratch(),
            _ => match path {
                Some(path) if !path.is_empty() => file::open_disk(path, status, action),
                _ => Err(crate::errors::Error::OpenNoPath),
            },
        };
        match opened {
            Ok(file) => self.predefine(Box::new(file)),
            Err(err) => handler.signal_error(err),
        }
    }

    pub fn close(&mut self, status: CloseStatus, handler: &mut IoErrorHandler) {
        self.flush(handler);
        if let Some(mut file) = self.file.take() {
            if let Err(err) = file.close(status) {
                handler.signal_error(err.into());
            }
        }
        self.start = 0;
        self.buf.clear();
        self.dirty = 0;
    }

    /// Moves the window to start at `at`, preserving overlapping bytes when
    /// sliding forward. Any dirty prefix is written out first.
    fn reposition(&mut self, at: i64, handler: &mut IoErrorHandler) {
        if at == self.start {
            return;
        }
        self.flush_dirty(handler);
        if at > self.start && at <= self.start + self.buf.len() as i64 {
            self.buf.drain(..(at - self.start) as usize);
        } else {
            self.buf.clear();
        }
        self.start = at;
    }

    /// Makes at least `need` bytes available starting at file offset `at`,
    /// reading as necessary. Returns the bytes actually available, which is
    /// less than `need` only at end of file or on a read error.
    pub fn read_frame(&mut self, at: i64, need: i64, handler: &mut IoErrorHandler) -> i64 {
        self.reposition(at, handler);
        while (self.buf.len() as i64) < need {
            let Some(file) = self.file.as_mut() else {
                break;
            };
            let want = if file.is_terminal() {
                need - self.buf.len() as i64
            } else {
                (need - self.buf.len() as i64).max(MIN_READ)
            };
            let old = self.buf.len();
            self.buf.resize(old + want as usize, 0);
            match file.read_at(self.start + old as i64, &mut self.buf[old..]) {
                Ok(0) => {
                    self.buf.truncate(old);
                    break;
                }
                Ok(n) => self.buf.truncate(old + n),
                Err(err) => {
                    self.buf.truncate(old);
                    handler.signal_error(err.into());
                    break;
                }
            }
        }
        self.buf.len() as i64
    }

    /// Makes a writable window of `need` bytes starting at file offset `at`
    /// and marks it to be written back on the next flush.
    pub fn write_frame(&mut self, at: i64, need: i64, handler: &mut IoErrorHandler) {
        self.reposition(at, handler);
        if (self.buf.len() as i64) < need {
            self.buf.resize(need as usize, 0);
        }
        self.dirty = self.dirty.max(need as usize);
    }

    pub fn frame(&self) -> &[u8] {
        &self.buf
    }

    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn frame_len(&self) -> i64 {
        self.buf.len() as i64
    }

    pub fn frame_at(&self) -> i64 {
        self.start
    }

    fn flush_dirty(&mut self, handler: &mut IoErrorHandler) {
        if self.dirty > 0 {
            if let Some(file) = self.file.as_mut() {
                if let Err(err) = file.write_at(self.start, &self.buf[..self.dirty]) {
                    handler.signal_error(err.into());
                }
            }
            self.dirty = 0;
        }
    }

    pub fn flush(&mut self, handler: &mut IoErrorHandler) {
        self.flush_dirty(handler);
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = file.flush() {
                handler.signal_error(err.into());
            }
        }
    }

    /// Truncates the underlying file at `at`.
    pub fn truncate(&mut self, at: i64, handler: &mut IoErrorHandler) {
        if let Some(file) = self.file.as_mut() {
            if file.may_position() {
                if let Err(err) = file.truncate(at) {
                    handler.signal_error(err.into());
                }
            }
        }
    }

    /// Discards window contents at or beyond file offset `at`.
    pub fn truncate_frame(&mut self, at: i64, _handler: &mut IoErrorHandler) {
        if at <= self.start {
            self.buf.clear();
            self.dirty = 0;
            self.start = at;
        } else if at < self.start + self.buf.len() as i64 {
            self.buf.truncate((at - self.start) as usize);
            self.dirty = self.dirty.min(self.buf.len());
        }
    }

    pub fn known_size(&self) -> Option<i64> {
        self.file.as_ref().and_then(|f| f.known_size())
    }

    pub fn may_position(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.may_position())
    }

    pub fn may_read(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.may_read())
    }

    pub fn may_write(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.may_write())
    }

    pub fn may_asynchronous(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.may_asynchronous())
    }

    pub fn is_terminal(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.is_terminal())
    }

    pub fn is_windows_text_file(&self) -> bool {
        self.file.as_ref().is_some_and(|f| f.is_windows_text_file())
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
