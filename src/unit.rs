//! The external file unit: one connected file plus its record engine.
//!
//! A unit multiplexes three record models over the buffered frame:
//! fixed-length records (direct access), variable-length unformatted records
//! framed by a u32 length prefix *and* suffix (sequential unformatted), and
//! newline-terminated text records (formatted). Stream access moves raw bytes
//! with no framing at all. On top of that sit endianness conversion,
//! non-advancing I/O, BACKSPACE across every record model, implied-endfile
//! bookkeeping, and the asynchronous ID pool.
//!
//! The statement layer above drives a unit through `emit`/`receive`,
//! `begin_reading_record`/`finish_reading_record`/`advance_record`, and the
//! positioning entry points. Between calls the unit keeps its position as
//! `frame_offset_in_file + record_offset_in_frame + position_in_record`.

use crate::async_id::AsyncIdPool;
use crate::child::{ChildIo, ParentIo};
use crate::connection::{
    default_convert, swap_needed, Access, Action, CloseStatus, Convert, Direction, OpenStatus,
    Position,
};
use crate::endian::swap_endianness;
use crate::errors::{Error, IoErrorHandler, Result};
use crate::frame::FrameBuffer;
use crate::unit_map;
use log::debug;

const HEADER_BYTES: i64 = 4;

pub struct FileUnit {
    unit_number: i32,
    path: Option<Vec<u8>>,
    frame: FrameBuffer,

    pub access: Access,
    pub direction: Direction,
    pub is_unformatted: Option<bool>,
    pub open_recl: Option<i64>,
    pub record_length: Option<i64>,
    pub endfile_record_number: Option<i64>,
    pub current_record_number: i64, // 1-based

    pub frame_offset_in_file: i64,
    pub record_offset_in_frame: i64,
    pub position_in_record: i64,
    pub furthest_position_in_record: i64,

    /// Set iff a non-advancing I/O statement is in progress; holds the
    /// position where the next statement resumes in the open record.
    pub left_tab_limit: Option<i64>,

    pub began_reading_record: bool,
    pub implied_endfile: bool,
    pub unterminated_record: bool,
    pub pinned_frame: bool,
    pub direct_access_rec_was_set: bool,
    pub swap_endianness: bool,
    pub created_for_internal_child_io: bool,

    async_ids: AsyncIdPool,
    child: Option<Box<ChildIo>>,
}

impl FileUnit {
    pub fn new(unit_number: i32) -> Self {
        Self {
            unit_number,
            path: None,
            frame: FrameBuffer::new(),
            access: Access::Sequential,
            direction: Direction::Undetermined,
            is_unformatted: None,
            open_recl: None,
            record_length: None,
            endfile_record_number: None,
            current_record_number: 1,
            frame_offset_in_file: 0,
            record_offset_in_frame: 0,
            position_in_record: 0,
            furthest_position_in_record: 0,
            left_tab_limit: None,
            began_reading_record: false,
            implied_endfile: false,
            unterminated_record: false,
            pinned_frame: false,
            direct_access_rec_was_set: false,
            swap_endianness: false,
            created_for_internal_child_io: false,
            async_ids: AsyncIdPool::new(),
            child: None,
        }
    }

    pub fn unit_number(&self) -> i32 {
        self.unit_number
    }

    pub fn path(&self) -> Option<&[u8]> {
        self.path.as_deref()
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    pub fn is_connected(&self) -> bool {
        self.frame.is_connected()
    }

    /// True when read has reached EOF or the endfile record.
    pub fn is_at_eof(&self) -> bool {
        self.endfile_record_number
            .is_some_and(|n| self.current_record_number >= n)
    }

    /// True after an ENDFILE until the unit is repositioned.
    pub fn is_after_endfile(&self) -> bool {
        self.endfile_record_number
            .is_some_and(|n| self.current_record_number > n)
    }

    /// Formatted stream files are still viewed as having records on input;
    /// only unformatted stream access is truly recordless.
    pub fn is_record_file(&self) -> bool {
        self.access != Access::Stream || !self.is_unformatted.unwrap_or(true)
    }

    fn effective_record_length(&self) -> Option<i64> {
        self.open_recl.or(self.record_length)
    }

    pub fn begin_record(&mut self) {
        self.position_in_record = 0;
        self.furthest_position_in_record = 0;
        self.unterminated_record = false;
    }

    // ------------------------------------------------------------------
    // Connection lifecycle

    /// Connects this unit to a file. Returns true when the unit was already
    /// connected to a different file and that connection was closed first.
    pub fn open_unit(
        &mut self,
        status: Option<OpenStatus>,
        action: Option<Action>,
        position: Position,
        new_path: Option<Vec<u8>>,
        convert: Convert,
        handler: &mut IoErrorHandler,
    ) -> bool {
        let convert = match convert {
            Convert::Unknown => default_convert(),
            other => other,
        };
        self.swap_endianness = swap_needed(convert);
        let mut implied_close = false;
        if self.is_connected() {
            let is_same_path = match (&new_path, &self.path) {
                (Some(new), Some(old)) => new == old,
                _ => false,
            };
            if status.is_some_and(|s| s != OpenStatus::Old) && is_same_path {
                handler.signal_error(Error::OpenBadStatusOnConnectedUnit);
                return implied_close;
            }
            if new_path.is_none() || is_same_path {
                // OPEN of an existing connection, no new FILE=
                return implied_close;
            }
            // OPEN on a connected unit with a new FILE= implies CLOSE
            debug!(
                "unit {}: OPEN with a new file implies CLOSE of the old one",
                self.unit_number
            );
            self.do_implied_endfile(handler);
            self.flush_output(handler);
            self.frame.truncate_frame(0, handler);
            self.close_frame(CloseStatus::Keep, handler);
            implied_close = true;
        }
        if let Some(path) = new_path.as_deref() {
            if !path.is_empty() {
                if let Some(other) = unit_map::path_owner(path) {
                    if other != self.unit_number {
                        handler.signal_error(Error::OpenAlreadyConnected {
                            unit: self.unit_number,
                            path: String::from_utf8_lossy(path).into_owned(),
                            other,
                        });
                        return implied_close;
                    }
                }
            }
        }
        self.set_path(new_path);
        self.frame.open(
            self.path.as_deref(),
            status.unwrap_or(OpenStatus::Unknown),
            action,
            handler,
        );
        let total_bytes = self.frame.known_size();
        if self.access == Access::Direct {
            match self.open_recl {
                None => handler.signal_error(Error::OpenBadRecl {
                    unit: self.unit_number,
                    detail: "record length is not known".into(),
                }),
                Some(recl) if recl <= 0 => handler.signal_error(Error::OpenBadRecl {
                    unit: self.unit_number,
                    detail: format!("RECL={recl}: record length is invalid"),
                }),
                Some(recl) => {
                    if let Some(total) = total_bytes {
                        if total % recl != 0 {
                            handler.signal_error(Error::OpenBadRecl {
                                unit: self.unit_number,
                                detail: format!(
                                    "RECL={recl}: record length is not an even divisor of the file size {total}"
                                ),
                            });
                        }
                    }
                }
            }
            self.record_length = self.open_recl;
        }
        self.endfile_record_number = None;
        self.current_record_number = 1;
        if let (Some(total), Some(recl)) = (total_bytes, self.open_recl) {
            if self.access == Access::Direct && recl > 0 {
                self.endfile_record_number = Some(1 + total / recl);
            }
        }
        if position == Position::Append {
            if let Some(total) = total_bytes {
                self.frame_offset_in_file = total;
            }
            if self.access != Access::Stream {
                if self.endfile_record_number.is_none() {
                    // Fake it so that BACKSPACE can work relative to the end
                    self.endfile_record_number = Some(i64::MAX - 2);
                }
                self.current_record_number = self.endfile_record_number.unwrap();
            }
        }
        implied_close
    }

    /// I/O to an unconnected unit reads or creates a local file, e.g. fort.7
    pub fn open_anonymous_unit(
        &mut self,
        status: Option<OpenStatus>,
        action: Option<Action>,
        position: Position,
        convert: Convert,
        handler: &mut IoErrorHandler,
    ) {
        let path = format!("fort.{}", self.unit_number).into_bytes();
        self.open_unit(status, action, position, Some(path), convert, handler);
    }

    pub fn close_unit(&mut self, status: CloseStatus, handler: &mut IoErrorHandler) {
        debug!("unit {}: CLOSE", self.unit_number);
        self.do_implied_endfile(handler);
        self.flush_output(handler);
        self.close_frame(status, handler);
    }

    fn close_frame(&mut self, status: CloseStatus, handler: &mut IoErrorHandler) {
        self.frame.close(status, handler);
        if let Some(path) = self.path.take() {
            unit_map::unregister_path(&path);
        }
    }

    fn set_path(&mut self, new_path: Option<Vec<u8>>) {
        if let Some(old) = self.path.take() {
            unit_map::unregister_path(&old);
        }
        if let Some(path) = &new_path {
            if !path.is_empty() {
                unit_map::register_path(path.clone(), self.unit_number);
            }
        }
        self.path = new_path;
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Input => {
                if self.frame.may_read() {
                    self.direction = Direction::Input;
                    Ok(())
                } else {
                    Err(Error::ReadFromWriteOnly)
                }
            }
            Direction::Output => {
                if self.frame.may_write() {
                    self.direction = Direction::Output;
                    Ok(())
                } else {
                    Err(Error::WriteToReadOnly)
                }
            }
            Direction::Undetermined => {
                panic!("cannot set a unit's direction to Undetermined")
            }
        }
    }

    // ------------------------------------------------------------------
    // Data transfer

    /// Writes `data` at the current position in the current record.
    pub fn emit(&mut self, data: &[u8], element_bytes: usize, handler: &mut IoErrorHandler) -> bool {
        let bytes = data.len() as i64;
        let furthest_after = self
            .furthest_position_in_record
            .max(self.position_in_record + bytes);
        let mut header = 0i64;
        if let Some(open_recl) = self.open_recl {
            // Check for fixed-length record overrun, but allow for
            // sequential record termination.
            let mut extra = 0i64;
            if self.access == Access::Sequential {
                if self.is_unformatted.unwrap_or(false) {
                    header = HEADER_BYTES;
                    extra = 2 * header;
                } else {
                    if cfg!(windows) && !self.frame.is_windows_text_file() {
                        extra += 1; // carriage return (CR)
                    }
                    extra += 1; // newline (LF)
                }
            }
            if furthest_after > extra + open_recl {
                handler.signal_error(Error::RecordWriteOverrun {
                    bytes: data.len(),
                    position: self.position_in_record - header,
                    recl: open_recl,
                });
                return false;
            }
        }
        if self.record_length.is_some() {
            // Stale from a previous BACKSPACE or non-advancing input
            self.record_length = None;
            self.began_reading_record = false;
        }
        // On a direct unit the endfile record number only mirrors the file
        // size; records past it may be written freely.
        if self.access != Access::Direct && self.is_after_endfile() {
            handler.signal_error(Error::WriteAfterEndfile {
                unit: self.unit_number,
            });
            return false;
        }
        if !self.check_direct_access(handler) {
            return false;
        }
        self.frame.write_frame(
            self.frame_offset_in_file,
            self.record_offset_in_frame + furthest_after,
            handler,
        );
        let record_offset = self.record_offset_in_frame as usize;
        if self.position_in_record > self.furthest_position_in_record {
            // Fill the gap left by a forward tab with blanks
            let gap = record_offset + self.furthest_position_in_record as usize
                ..record_offset + self.position_in_record as usize;
            self.frame.frame_mut()[gap].fill(b' ');
        }
        let at = record_offset + self.position_in_record as usize;
        let to = &mut self.frame.frame_mut()[at..at + data.len()];
        to.copy_from_slice(data);
        if self.swap_endianness {
            swap_endianness(to, element_bytes);
        }
        self.position_in_record += bytes;
        self.furthest_position_in_record = furthest_after;
        true
    }

    /// Reads `data.len()` bytes from the current position in the current
    /// record.
    pub fn receive(
        &mut self,
        data: &mut [u8],
        element_bytes: usize,
        handler: &mut IoErrorHandler,
    ) -> bool {
        assert!(
            self.direction == Direction::Input,
            "receive on a unit not doing input"
        );
        let bytes = data.len() as i64;
        let furthest_after = self
            .furthest_position_in_record
            .max(self.position_in_record + bytes);
        if furthest_after > self.record_length.unwrap_or(furthest_after) {
            handler.signal_error(Error::RecordReadOverrun {
                bytes: data.len(),
                position: self.position_in_record,
                len: self.record_length.unwrap(),
            });
            return false;
        }
        let need = self.record_offset_in_frame + furthest_after;
        let got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
        if got >= need {
            let at = (self.record_offset_in_frame + self.position_in_record) as usize;
            data.copy_from_slice(&self.frame.frame()[at..at + data.len()]);
            if self.swap_endianness {
                swap_endianness(data, element_bytes);
            }
            self.position_in_record += bytes;
            self.furthest_position_in_record = furthest_after;
            true
        } else {
            self.hit_end_on_read(handler);
            false
        }
    }

    /// Streaming formatted input: the longest run of bytes available at the
    /// current position without leaving the record. Empty at end of record.
    pub fn get_next_input_bytes(&mut self, handler: &mut IoErrorHandler) -> &[u8] {
        assert!(
            self.direction == Direction::Input,
            "input lookahead on a unit not doing input"
        );
        let mut length = 1i64;
        if let Some(recl) = self.effective_record_length() {
            if self.position_in_record < recl {
                length = recl - self.position_in_record;
            } else {
                return &[];
            }
        }
        self.frame_next_input(length, handler)
    }

    fn frame_next_input(&mut self, bytes: i64, handler: &mut IoErrorHandler) -> &[u8] {
        assert!(
            !self.is_unformatted.unwrap_or(true),
            "byte-stream input lookahead on an unformatted unit"
        );
        if self.position_in_record + bytes
            <= self
                .record_length
                .unwrap_or(self.position_in_record + bytes)
        {
            let at = self.record_offset_in_frame + self.position_in_record;
            let need = at + bytes;
            let got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
            self.set_variable_formatted_record_length();
            if got >= need {
                return &self.frame.frame()[at as usize..need as usize];
            }
            self.hit_end_on_read(handler);
        }
        &[]
    }

    /// Determines the current formatted record's length from the newline in
    /// the frame, if one is present yet.
    pub fn set_variable_formatted_record_length(&mut self) -> bool {
        if self.record_length.is_some() || self.access == Access::Direct {
            true
        } else if self.frame.frame_len() > self.record_offset_in_frame {
            let record = &self.frame.frame()[self.record_offset_in_frame as usize..];
            if let Some(nl) = record.iter().position(|&b| b == b'\n') {
                let mut length = nl as i64;
                if length > 0 && record[nl - 1] == b'\r' {
                    length -= 1;
                }
                self.record_length = Some(length);
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Record control

    /// Reserves the length-prefix bytes of an output unformatted sequential
    /// record; `advance_record` completes them once the payload length is
    /// known. The statement layer calls this when such a record begins.
    pub fn begin_unformatted_output(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.access == Access::Sequential && self.open_recl.is_none() {
            self.record_length = None;
            return self.emit(&[0u8; HEADER_BYTES as usize], 1, handler);
        }
        true
    }

    /// Makes the next input record current. Idempotent until
    /// `finish_reading_record`.
    pub fn begin_reading_record(&mut self, handler: &mut IoErrorHandler) -> bool {
        assert!(
            self.direction == Direction::Input,
            "begin_reading_record on a unit not doing input"
        );
        if !self.began_reading_record {
            self.began_reading_record = true;
            if self.access == Access::Direct {
                if self.check_direct_access(handler) {
                    let need = self.record_offset_in_frame + self.open_recl.unwrap();
                    let got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
                    if got >= need {
                        self.record_length = self.open_recl;
                    } else {
                        self.record_length = None;
                        self.hit_end_on_read(handler);
                    }
                }
            } else {
                self.record_length = None;
                if self.is_at_eof() {
                    handler.signal_end();
                } else {
                    let unformatted = self
                        .is_unformatted
                        .expect("reading a record with undetermined formatting");
                    if unformatted {
                        if self.access == Access::Sequential {
                            self.begin_sequential_variable_unformatted_input_record(handler);
                        }
                    } else {
                        // formatted sequential or stream
                        self.begin_variable_formatted_input_record(handler);
                    }
                }
            }
        }
        debug_assert!(
            self.record_length.is_some() || !self.is_record_file() || handler.in_error(),
            "a record became current without a known length"
        );
        !handler.in_error()
    }

    fn begin_sequential_variable_unformatted_input_record(&mut self, handler: &mut IoErrorHandler) {
        let mut need = self.record_offset_in_frame + HEADER_BYTES;
        let mut got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
        // Emit informative errors to help debug corrupted files.
        let mut detail = None;
        if got < need {
            if got == self.record_offset_in_frame {
                self.hit_end_on_read(handler);
            } else {
                detail = Some("truncated record header".to_owned());
            }
        } else {
            let header = self.read_header_or_footer(self.record_offset_in_frame);
            self.record_length = Some(HEADER_BYTES + header as i64); // does not include the footer
            need = self.record_offset_in_frame + self.record_length.unwrap() + HEADER_BYTES;
            got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
            if got < need {
                detail = Some(format!(
                    "hit EOF reading record with length {header} bytes"
                ));
            } else {
                let footer = self
                    .read_header_or_footer(self.record_offset_in_frame + self.record_length.unwrap());
                if footer != header {
                    detail = Some(format!(
                        "record header has length {header} that does not match record footer ({footer})"
                    ));
                }
            }
        }
        if let Some(detail) = detail {
            handler.signal_error(Error::BadUnformattedRecord {
                record: self.current_record_number,
                offset: self.frame_offset_in_file,
                detail,
            });
        }
        self.position_in_record = HEADER_BYTES;
    }

    fn begin_variable_formatted_input_record(&mut self, handler: &mut IoErrorHandler) {
        if self.unit_number == unit_map::DEFAULT_INPUT_UNIT && !self.created_for_internal_child_io {
            // Reading from the default input flushes any pending prompt
            unit_map::flush_default_outputs();
        }
        let mut length = 0i64;
        loop {
            let need = length + 1;
            length = self
                .frame
                .read_frame(self.frame_offset_in_file, self.record_offset_in_frame + need, handler)
                - self.record_offset_in_frame;
            if length < need {
                if length > 0 {
                    // final record without a newline
                    self.record_length = Some(length);
                    self.unterminated_record = true;
                } else {
                    self.hit_end_on_read(handler);
                }
                break;
            }
            if self.set_variable_formatted_record_length() {
                break;
            }
        }
    }

    /// Releases the current input record. The record number still advances at
    /// EOF so that a following BACKSPACE lands on the endfile record.
    pub fn finish_reading_record(&mut self, handler: &mut IoErrorHandler) {
        assert!(
            self.direction == Direction::Input && self.began_reading_record,
            "finish_reading_record without a record being read"
        );
        self.began_reading_record = false;
        if handler.hit_end() || (self.is_record_file() && self.record_length.is_none()) {
            self.current_record_number += 1;
        } else if self.is_record_file() {
            self.record_offset_in_frame += self.record_length.unwrap();
            if self.access != Access::Direct {
                let unformatted = self
                    .is_unformatted
                    .expect("finishing a record with undetermined formatting");
                self.record_length = None;
                if unformatted {
                    // Retain the footer in the frame for efficient BACKSPACE
                    self.frame_offset_in_file += self.record_offset_in_frame;
                    self.record_offset_in_frame = HEADER_BYTES;
                } else {
                    if self.frame.frame_len() > self.record_offset_in_frame
                        && self.frame.frame()[self.record_offset_in_frame as usize] == b'\r'
                    {
                        self.record_offset_in_frame += 1;
                    }
                    if self.frame.frame_len() > self.record_offset_in_frame
                        && self.frame.frame()[self.record_offset_in_frame as usize] == b'\n'
                    {
                        self.record_offset_in_frame += 1;
                    }
                    if !self.pinned_frame || self.frame.may_position() {
                        self.frame_offset_in_file += self.record_offset_in_frame;
                        self.record_offset_in_frame = 0;
                    }
                }
            }
            self.current_record_number += 1;
        } else {
            // unformatted stream
            self.furthest_position_in_record = self
                .furthest_position_in_record
                .max(self.position_in_record);
            self.frame_offset_in_file +=
                self.record_offset_in_frame + self.furthest_position_in_record;
        }
        self.begin_record();
    }

    /// Ends the current record: terminates output records with the framing
    /// their record model requires, or steps input to the next record.
    pub fn advance_record(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.direction == Direction::Input {
            self.finish_reading_record(handler);
            return self.begin_reading_record(handler);
        }
        // Output
        let mut ok = true;
        let unformatted = self
            .is_unformatted
            .expect("ending a record with undetermined formatting");
        self.position_in_record = self.furthest_position_in_record;
        if self.access == Access::Direct {
            let open_recl = self.open_recl.expect("direct access without RECL");
            if self.furthest_position_in_record < open_recl {
                // Pad the remainder of the fixed-length record
                self.frame.write_frame(
                    self.frame_offset_in_file,
                    self.record_offset_in_frame + open_recl,
                    handler,
                );
                let fill = if unformatted { 0u8 } else { b' ' };
                let pad = (self.record_offset_in_frame + self.furthest_position_in_record) as usize
                    ..(self.record_offset_in_frame + open_recl) as usize;
                self.frame.frame_mut()[pad].fill(fill);
                self.furthest_position_in_record = open_recl;
            }
        } else if unformatted {
            if self.access == Access::Sequential {
                // Append the record length as the footer, then overwrite the
                // four bytes reserved when the record began with the same
                // value as the header.
                let word =
                    ((self.furthest_position_in_record - HEADER_BYTES) as u32).to_ne_bytes();
                ok = ok && self.emit(&word, word.len(), handler);
                self.position_in_record = 0;
                ok = ok && self.emit(&word, word.len(), handler);
            }
            // unformatted stream: nothing to do
        } else if handler.in_error() && self.furthest_position_in_record == 0 {
            // Error in a formatted variable-length record with no output yet:
            // succeed without emitting anything
            return true;
        } else {
            // Terminate the formatted variable-length record
            let line_ending: &[u8] = if cfg!(windows) && !self.frame.is_windows_text_file() {
                b"\r\n"
            } else {
                b"\n"
            };
            ok = ok && self.emit(line_ending, 1, handler);
        }
        self.left_tab_limit = None;
        if self.access != Access::Direct && self.is_after_endfile() {
            return false;
        }
        self.commit_writes();
        self.current_record_number += 1;
        if self.access != Access::Direct {
            self.implied_endfile = self.is_record_file();
            if self.is_at_eof() {
                self.endfile_record_number = None;
            }
        }
        ok
    }

    /// Repositions before the previous record.
    pub fn backspace_record(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct || !self.is_record_file() {
            handler.signal_error(Error::BackspaceNonSequential {
                unit: self.unit_number,
            });
        } else {
            if self.is_after_endfile() {
                // BACKSPACE after explicit ENDFILE
                self.current_record_number = self.endfile_record_number.unwrap();
            } else if self.left_tab_limit.is_some() {
                // BACKSPACE after non-advancing I/O
                self.left_tab_limit = None;
            } else {
                self.do_implied_endfile(handler);
                if self.frame_offset_in_file + self.record_offset_in_frame > 0 {
                    self.current_record_number -= 1;
                    if self.open_recl.is_some() && self.access == Access::Direct {
                        self.backspace_fixed_record(handler);
                    } else if self
                        .is_unformatted
                        .expect("backspacing a record with undetermined formatting")
                    {
                        self.backspace_variable_unformatted_record(handler);
                    } else {
                        self.backspace_variable_formatted_record(handler);
                    }
                } else {
                    handler.signal_error(Error::BackspaceAtFirstRecord);
                }
            }
            self.begin_record();
        }
    }

    fn backspace_fixed_record(&mut self, handler: &mut IoErrorHandler) {
        let open_recl = self.open_recl.expect("fixed-length backspace without RECL");
        if self.frame_offset_in_file < open_recl {
            handler.signal_error(Error::BackspaceAtFirstRecord);
        } else {
            self.frame_offset_in_file -= open_recl;
        }
    }

    fn backspace_variable_unformatted_record(&mut self, handler: &mut IoErrorHandler) {
        self.frame_offset_in_file += self.record_offset_in_frame;
        self.record_offset_in_frame = 0;
        if self.frame_offset_in_file <= HEADER_BYTES {
            handler.signal_error(Error::BackspaceAtFirstRecord);
            return;
        }
        // The structure of the file before this point was already checked
        // when it was read forward, so failures here are file corruption.
        let got = self
            .frame
            .read_frame(self.frame_offset_in_file - HEADER_BYTES, HEADER_BYTES, handler);
        if got < HEADER_BYTES {
            handler.signal_error(Error::ShortRead);
            return;
        }
        let length = self.read_header_or_footer(0) as i64;
        self.record_length = Some(length);
        if self.frame_offset_in_file < length + 2 * HEADER_BYTES {
            handler.signal_error(Error::BadUnformattedRecord {
                record: self.current_record_number,
                offset: self.frame_offset_in_file,
                detail: format!("record footer length {length} extends before the file start"),
            });
            return;
        }
        self.frame_offset_in_file -= length + 2 * HEADER_BYTES;
        let need = self.record_offset_in_frame + HEADER_BYTES + length;
        let got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
        if got < need {
            handler.signal_error(Error::ShortRead);
            return;
        }
        let header = self.read_header_or_footer(self.record_offset_in_frame) as i64;
        if header != length {
            handler.signal_error(Error::BadUnformattedRecord {
                record: self.current_record_number,
                offset: self.frame_offset_in_file,
                detail: format!(
                    "record header has length {header} that does not match record footer ({length})"
                ),
            });
        }
    }

    fn backspace_variable_formatted_record(&mut self, handler: &mut IoErrorHandler) {
        // File offset of the previous record's newline
        let prev_nl = self.frame_offset_in_file + self.record_offset_in_frame - 1;
        if prev_nl < 0 {
            handler.signal_error(Error::BackspaceAtFirstRecord);
            return;
        }
        loop {
            if self.frame_offset_in_file < prev_nl {
                let through = (prev_nl - 1 - self.frame_offset_in_file) as usize;
                if let Some(p) = find_last_newline(self.frame.frame(), through) {
                    self.record_offset_in_frame = p as i64 + 1;
                    self.record_length =
                        Some(prev_nl - (self.frame_offset_in_file + self.record_offset_in_frame));
                    break;
                }
            }
            if self.frame_offset_in_file == 0 {
                // The record starts at the beginning of the file
                self.record_offset_in_frame = 0;
                self.record_length = Some(prev_nl);
                break;
            }
            self.frame_offset_in_file -= self.frame_offset_in_file.min(1024);
            let need = prev_nl + 1 - self.frame_offset_in_file;
            let got = self.frame.read_frame(self.frame_offset_in_file, need, handler);
            if got < need {
                handler.signal_error(Error::ShortRead);
                return;
            }
        }
        let mut length = self.record_length.unwrap();
        let terminator = (self.record_offset_in_frame + length) as usize;
        if self.frame.frame().get(terminator) != Some(&b'\n') {
            handler.signal_error(Error::MissingTerminator);
            return;
        }
        if length > 0 && self.frame.frame()[terminator - 1] == b'\r' {
            length -= 1;
            self.record_length = Some(length);
        }
    }

    // ------------------------------------------------------------------
    // Positioning

    /// Completes any partial output record and materializes a pending implied
    /// endfile before the unit is repositioned or closed.
    pub fn do_implied_endfile(&mut self, handler: &mut IoErrorHandler) {
        if !self.implied_endfile
            && self.direction == Direction::Output
            && self.is_record_file()
            && self.access != Access::Direct
            && self.left_tab_limit.is_some()
        {
            // Complete a partial record after a non-advancing write;
            // usually sets implied_endfile
            self.advance_record(handler);
        }
        if self.implied_endfile {
            self.implied_endfile = false;
            if self.access != Access::Direct && self.is_record_file() && self.frame.may_position() {
                self.do_endfile(handler);
            }
        }
    }

    fn do_endfile(&mut self, handler: &mut IoErrorHandler) {
        if self.is_record_file() && self.access != Access::Direct {
            self.furthest_position_in_record = self
                .furthest_position_in_record
                .max(self.position_in_record);
            if self.left_tab_limit.is_some() {
                // The last transfer was non-advancing, so advance_record was
                // never called
                self.left_tab_limit = None;
                self.current_record_number += 1;
            }
            self.endfile_record_number = Some(self.current_record_number);
        }
        self.frame_offset_in_file +=
            self.record_offset_in_frame + self.furthest_position_in_record;
        self.record_offset_in_frame = 0;
        self.flush_output(handler);
        self.frame.truncate(self.frame_offset_in_file, handler);
        self.frame.truncate_frame(self.frame_offset_in_file, handler);
        self.begin_record();
        self.implied_endfile = false;
    }

    pub fn endfile(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct {
            handler.signal_error(Error::EndfileDirect {
                unit: self.unit_number,
            });
        } else if !self.frame.may_write() {
            handler.signal_error(Error::EndfileUnwritable {
                unit: self.unit_number,
            });
        } else if self.is_after_endfile() {
            // ENDFILE after ENDFILE
        } else {
            debug!("unit {}: ENDFILE", self.unit_number);
            self.do_endfile(handler);
            if self.is_record_file() && self.access != Access::Direct {
                // Explicit ENDFILE leaves the position *after* the endfile
                // record
                self.current_record_number = self
                    .endfile_record_number
                    .expect("ENDFILE did not set the endfile record number")
                    + 1;
            }
        }
    }

    pub fn rewind(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct {
            handler.signal_error(Error::RewindNonSequential {
                unit: self.unit_number,
            });
        } else {
            self.set_position(0, handler);
            self.current_record_number = 1;
            self.left_tab_limit = None;
        }
    }

    pub fn set_position(&mut self, pos: i64, handler: &mut IoErrorHandler) {
        self.do_implied_endfile(handler);
        self.frame_offset_in_file = pos;
        self.record_offset_in_frame = 0;
        if self.access == Access::Direct {
            self.direct_access_rec_was_set = true;
        }
        self.begin_record();
    }

    pub fn set_stream_pos(&mut self, one_based_pos: i64, handler: &mut IoErrorHandler) -> bool {
        if self.access != Access::Stream {
            handler.signal_error(Error::PosOnNonStream);
            return false;
        }
        if one_based_pos < 1 {
            // POS=1 is the beginning of the file
            handler.signal_error(Error::BadStreamPos { pos: one_based_pos });
            return false;
        }
        self.set_position(one_based_pos - 1, handler);
        // We no longer know which record we are in. Pick a record number from
        // which both ADVANCE and BACKSPACE stay in range.
        self.current_record_number = i64::MAX / 2;
        self.endfile_record_number = None;
        true
    }

    pub fn set_direct_rec(&mut self, one_based_rec: i64, handler: &mut IoErrorHandler) -> bool {
        if self.access != Access::Direct {
            handler.signal_error(Error::RecOnNonDirect);
            return false;
        }
        let Some(open_recl) = self.open_recl else {
            handler.signal_error(Error::MissingRecl);
            return false;
        };
        if one_based_rec < 1 {
            handler.signal_error(Error::BadDirectRec { rec: one_based_rec });
            return false;
        }
        self.current_record_number = one_based_rec;
        self.set_position((one_based_rec - 1) * open_recl, handler);
        true
    }

    /// Flushes pending output. A file that cannot be positioned first has its
    /// window committed forward so the flush never implies a seek backwards.
    pub fn flush_output(&mut self, handler: &mut IoErrorHandler) {
        if !self.frame.may_position() {
            let frame_at = self.frame.frame_at();
            if self.frame_offset_in_file >= frame_at
                && self.frame_offset_in_file < frame_at + self.frame.frame_len()
            {
                self.commit_writes();
                self.left_tab_limit = None;
            }
        }
        self.frame.flush(handler);
    }

    pub fn flush_if_terminal(&mut self, handler: &mut IoErrorHandler) {
        if self.frame.is_terminal() {
            self.flush_output(handler);
        }
    }

    fn commit_writes(&mut self) {
        self.frame_offset_in_file += self.record_offset_in_frame
            + self
                .record_length
                .unwrap_or(self.furthest_position_in_record);
        self.record_offset_in_frame = 0;
        self.begin_record();
    }

    fn check_direct_access(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.access == Access::Direct && !self.direct_access_rec_was_set {
            handler.signal_error(Error::MissingDirectRec);
            return false;
        }
        true
    }

    fn hit_end_on_read(&mut self, handler: &mut IoErrorHandler) {
        handler.signal_end();
        if self.is_record_file() && self.access != Access::Direct {
            self.endfile_record_number = Some(self.current_record_number);
        }
    }

    fn read_header_or_footer(&self, frame_offset: i64) -> i32 {
        let mut word = [0u8; HEADER_BYTES as usize];
        let at = frame_offset as usize;
        let len = word.len();
        word.copy_from_slice(&self.frame.frame()[at..at + len]);
        if self.swap_endianness {
            swap_endianness(&mut word, len);
        }
        i32::from_ne_bytes(word)
    }

    // ------------------------------------------------------------------
    // Child I/O

    /// Pushes a nested I/O context; the returned token must be handed back to
    /// `pop_child_io`.
    pub fn push_child_io(&mut self, parent: ParentIo) -> usize {
        let depth = self.child.as_ref().map_or(0, |c| c.depth) + 1;
        let previous = self.child.take();
        self.child = Some(Box::new(ChildIo::new(parent, depth, previous)));
        depth
    }

    /// Pops the top child. Popping anything else is a programming error.
    pub fn pop_child_io(&mut self, depth: usize) {
        let top = self
            .child
            .take()
            .expect("child I/O being popped from an empty stack");
        if top.depth != depth {
            panic!("child I/O being popped is not the top of the stack");
        }
        self.child = top.previous;
    }

    pub fn child_io(&self) -> Option<&ChildIo> {
        self.child.as_deref()
    }

    // ------------------------------------------------------------------
    // Asynchronous IDs

    pub fn get_asynchronous_id(&mut self, handler: &mut IoErrorHandler) -> i32 {
        if !self.frame.may_asynchronous() {
            handler.signal_error(Error::BadAsynchronous);
            -1
        } else if let Some(id) = self.async_ids.allocate() {
            id
        } else {
            handler.signal_error(Error::TooManyAsyncOps);
            -1
        }
    }

    pub fn wait(&mut self, id: i32) -> bool {
        self.async_ids.wait(id)
    }
}

// There is no memrchr in std, and the record may contain NULs, so scan.
fn find_last_newline(frame: &[u8], through: usize) -> Option<usize> {
    let end = (through + 1).min(frame.len());
    frame[..end].iter().rposition(|&b| b == b'\n')
}
