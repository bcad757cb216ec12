//! Connection attributes shared by OPEN, CLOSE, and data transfer statements.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Sequential,
    Direct,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Undetermined,
}

/// OPEN STATUS= specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Old,
    New,
    Scratch,
    Replace,
    Unknown,
}

/// CLOSE STATUS= specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    Keep,
    Delete,
}

/// OPEN POSITION= specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    AsIs,
    Rewind,
    Append,
}

/// OPEN ACTION= specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    ReadWrite,
}

/// OPEN CONVERT= specifier (an extension for reading files written on a
/// machine of the other byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convert {
    Unknown,
    Native,
    LittleEndian,
    BigEndian,
    Swap,
}

pub const IS_HOST_LITTLE_ENDIAN: bool = cfg!(target_endian = "little");

/// The process-wide default for CONVERT=, from the FORT_CONVERT environment
/// variable. Unrecognized values fall back to native order.
pub fn default_convert() -> Convert {
    static DEFAULT: OnceLock<Convert> = OnceLock::new();
    *DEFAULT.get_or_init(|| match std::env::var("FORT_CONVERT").as_deref() {
        Ok("LITTLE_ENDIAN") => Convert::LittleEndian,
        Ok("BIG_ENDIAN") => Convert::BigEndian,
        Ok("SWAP") => Convert::Swap,
        _ => Convert::Native,
    })
}

/// Whether a unit opened with this conversion must byte-swap its data.
pub fn swap_needed(convert: Convert) -> bool {
    convert == Convert::Swap
        || (convert == Convert::LittleEndian && !IS_HOST_LITTLE_ENDIAN)
        || (convert == Convert::BigEndian && IS_HOST_LITTLE_ENDIAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_decision() {
        assert!(swap_needed(Convert::Swap));
        assert!(!swap_needed(Convert::Native));
        assert_eq!(swap_needed(Convert::LittleEndian), !IS_HOST_LITTLE_ENDIAN);
        assert_eq!(swap_needed(Convert::BigEndian), IS_HOST_LITTLE_ENDIAN);
    }
}
