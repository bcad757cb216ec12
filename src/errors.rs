//! Error conditions and the per-statement error handler.
//!
//! Recoverable I/O errors are *signaled*, not returned: the engine records the
//! first condition in an [`IoErrorHandler`] and keeps going where it safely
//! can, so that the statement above can map the condition to an IOSTAT= value
//! or an ERR=/END= branch. Programmer bugs (child-stack misuse, impossible
//! internal state) panic instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of file")]
    End,

    #[error("attempt to write {bytes} bytes to position {position} in a fixed-size record of {recl} bytes")]
    RecordWriteOverrun { bytes: usize, position: i64, recl: i64 },

    #[error("attempt to read {bytes} bytes at position {position} in a record of {len} bytes")]
    RecordReadOverrun { bytes: usize, position: i64, len: i64 },

    #[error("WRITE on unit {unit} after an ENDFILE")]
    WriteAfterEndfile { unit: i32 },

    #[error("OPEN(UNIT={unit},FILE={path:?}): file is already connected to unit {other}")]
    OpenAlreadyConnected { unit: i32, path: String, other: i32 },

    #[error("OPEN statement for connected unit may not have explicit STATUS= other than 'OLD'")]
    OpenBadStatusOnConnectedUnit,

    #[error("OPEN(UNIT={unit},ACCESS='DIRECT'): {detail}")]
    OpenBadRecl { unit: i32, detail: String },

    #[error("file path is not representable in Unicode")]
    NonUnicodePath,

    #[error("OPEN: no FILE= was specified and STATUS= is not 'SCRATCH'")]
    OpenNoPath,

    #[error("BACKSPACE(UNIT={unit}) on direct-access file or unformatted stream")]
    BackspaceNonSequential { unit: i32 },

    #[error("BACKSPACE at the first record of the file")]
    BackspaceAtFirstRecord,

    #[error("unformatted variable-length sequential file input failed at record #{record} (file offset {offset}): {detail}")]
    BadUnformattedRecord { record: i64, offset: i64, detail: String },

    #[error("hit EOF while re-reading a previously read record")]
    ShortRead,

    #[error("formatted record is missing its newline terminator")]
    MissingTerminator,

    #[error("ENDFILE(UNIT={unit}) on direct-access file")]
    EndfileDirect { unit: i32 },

    #[error("ENDFILE(UNIT={unit}) on read-only file")]
    EndfileUnwritable { unit: i32 },

    #[error("REWIND(UNIT={unit}) on non-sequential file")]
    RewindNonSequential { unit: i32 },

    #[error("READ from write-only unit")]
    ReadFromWriteOnly,

    #[error("WRITE to read-only unit")]
    WriteToReadOnly,

    #[error("unit does not support asynchronous operations")]
    BadAsynchronous,

    #[error("too many concurrent asynchronous operations on one unit")]
    TooManyAsyncOps,

    #[error("no REC= was specified for a data transfer with ACCESS='DIRECT'")]
    MissingDirectRec,

    #[error("REC= may not appear unless ACCESS='DIRECT'")]
    RecOnNonDirect,

    #[error("RECL= was not specified")]
    MissingRecl,

    #[error("REC={rec} is invalid")]
    BadDirectRec { rec: i64 },

    #[error("POS= may not appear unless ACCESS='STREAM'")]
    PosOnNonStream,

    #[error("POS={pos} is invalid")]
    BadStreamPos { pos: i64 },

    #[error("formatted child I/O on unformatted parent")]
    FormattedChildOnUnformattedParent,

    #[error("unformatted child I/O on formatted parent")]
    UnformattedChildOnFormattedParent,

    #[error("child output on parent doing input")]
    ChildOutputToInputParent,

    #[error("child input on parent doing output")]
    ChildInputFromOutputParent,
}

impl Error {
    /// The IOSTAT= value for this condition. OS errors report their raw
    /// errno; the engine's own conditions use stable codes >= 10010.
    pub fn iostat(&self) -> i32 {
        match self {
            Error::Io(err) => err.raw_os_error().unwrap_or(i32::MAX),
            Error::End => -1,
            Error::RecordReadOverrun { .. } => 10010,
            Error::RecordWriteOverrun { .. } => 10011,
            Error::WriteAfterEndfile { .. } => 10012,
            Error::OpenAlreadyConnected { .. } => 10013,
            Error::OpenBadRecl { .. } => 10014,
            Error::BackspaceNonSequential { .. } => 10015,
            Error::BackspaceAtFirstRecord => 10016,
            Error::BadUnformattedRecord { .. } => 10017,
            Error::ShortRead => 10018,
            Error::MissingTerminator => 10019,
            Error::EndfileDirect { .. } => 10020,
            Error::EndfileUnwritable { .. } => 10021,
            Error::RewindNonSequential { .. } => 10022,
            Error::ReadFromWriteOnly => 10023,
            Error::WriteToReadOnly => 10024,
            Error::BadAsynchronous => 10025,
            Error::TooManyAsyncOps => 10026,
            Error::FormattedChildOnUnformattedParent => 10027,
            Error::UnformattedChildOnFormattedParent => 10028,
            Error::ChildOutputToInputParent => 10029,
            Error::ChildInputFromOutputParent => 10030,
            Error::OpenBadStatusOnConnectedUnit => 10031,
            Error::MissingDirectRec => 10032,
            Error::RecOnNonDirect => 10033,
            Error::MissingRecl => 10034,
            Error::BadDirectRec { .. } => 10035,
            Error::PosOnNonStream => 10036,
            Error::BadStreamPos { .. } => 10037,
            Error::NonUnicodePath => 10038,
            Error::OpenNoPath => 10039,
        }
    }
}

/// Collects the error state of one I/O statement.
///
/// The first hard error wins; an end-of-file signal is kept only until a hard
/// error displaces it.
#[derive(Debug, Default)]
pub struct IoErrorHandler {
    error: Option<Error>,
}

impl IoErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_error(&mut self, error: Error) {
        match &self.error {
            None => self.error = Some(error),
            Some(Error::End) if !matches!(error, Error::End) => self.error = Some(error),
            Some(_) => {}
        }
    }

    pub fn signal_end(&mut self) {
        self.signal_error(Error::End);
    }

    /// Whether any condition (including end-of-file) has been signaled.
    pub fn in_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the recorded condition is end-of-file.
    pub fn hit_end(&self) -> bool {
        matches!(self.error, Some(Error::End))
    }

    pub fn io_stat(&self) -> i32 {
        self.error.as_ref().map_or(0, Error::iostat)
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Consumes the recorded condition, for callers that want `?`.
    pub fn take_result(&mut self) -> Result<()> {
        match self.error.take() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
