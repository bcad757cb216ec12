//! Record-oriented I/O engine for Fortran-style external file units.
//!
//! Each connected file is a [`FileUnit`] owned by the process-wide
//! [`unit_map`]. A unit multiplexes the record models of the language
//! (fixed-length direct access, length-framed unformatted sequential records,
//! newline-terminated formatted records, and raw byte streams) over a
//! buffered [`FrameBuffer`], with endianness conversion, non-advancing I/O,
//! BACKSPACE, and implied-endfile semantics. The statement layer that
//! interprets formats and list items sits above this crate and drives it
//! through `emit`/`receive` and the record and positioning entry points.

mod async_id;
mod child;
mod connection;
mod endian;
mod errors;
mod file;
mod frame;
mod unit;
pub mod unit_map;

pub use async_id::*;
pub use child::*;
pub use connection::*;
pub use endian::*;
pub use errors::*;
pub use file::*;
pub use frame::*;
pub use unit::*;
