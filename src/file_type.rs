//! Data file types addressable through PCCC.
//!
//! Every symbolic address starts with a file-type prefix. The prefix fixes
//! the PCCC file type code sent on the wire and the byte width of one element.
//!
//! | Prefix | File | Code | Element bytes | Default file |
//! |--------|------|:----:|:-------------:|:------------:|
//! | `O` | Output image | 0x8B | 2 | 0 |
//! | `I` | Input image | 0x8C | 2 | 1 |
//! | `S` | Status | 0x84 | 2 | 2 |
//! | `B` | Bit | 0x85 | 2 | - |
//! | `T` | Timer | 0x86 | 6 | - |
//! | `C` | Counter | 0x87 | 6 | - |
//! | `R` | Control | 0x88 | 6 | - |
//! | `N` | Integer | 0x89 | 2 | - |
//! | `F` | Float | 0x8A | 4 | - |
//! | `ST` | String | 0x8D | 84 | - |
//! | `A` | ASCII | 0x8E | 2 | - |
//! | `L` | Long | 0x91 | 4 | - |
//! | `NST` | String stored in an integer file | 0x89 | 42 | - |
//!
//! # Example
//!
//! ```
//! use pccc_eip::FileType;
//!
//! let ft: FileType = "N".parse().unwrap();
//! assert_eq!(ft, FileType::N);
//! assert_eq!(ft.code(), 0x89);
//! assert_eq!(FileType::T.element_width(), 6);
//! assert_eq!(FileType::S.default_file(), Some(2));
//! ```

use std::str::FromStr;

use crate::error::{PcccError, Result};

/// PCCC data file types.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    /// Output image file.
    O,
    /// Input image file.
    I,
    /// Status file.
    S,
    /// Bit file.
    B,
    /// Timer file (three words per element).
    T,
    /// Counter file (three words per element).
    C,
    /// Control file (three words per element).
    R,
    /// Integer file.
    N,
    /// Floating point file.
    F,
    /// String file (84 bytes per element).
    ST,
    /// ASCII file. Recognized but not resolvable.
    A,
    /// Long integer file.
    L,
    /// String packed into an integer file.
    NST,
}

impl FileType {
    /// PCCC file type code sent in typed logical commands.
    pub fn code(self) -> u8 {
        match self {
            FileType::O => 0x8B,
            FileType::I => 0x8C,
            FileType::S => 0x84,
            FileType::B => 0x85,
            FileType::T => 0x86,
            FileType::C => 0x87,
            FileType::R => 0x88,
            FileType::N | FileType::NST => 0x89,
            FileType::F => 0x8A,
            FileType::ST => 0x8D,
            FileType::A => 0x8E,
            FileType::L => 0x91,
        }
    }

    /// Bytes occupied by one value of this file type.
    pub fn element_width(self) -> usize {
        match self {
            FileType::T | FileType::C | FileType::R => 6,
            FileType::F | FileType::L => 4,
            FileType::ST => 84,
            FileType::NST => 42,
            _ => 2,
        }
    }

    /// Bytes between consecutive element offsets on the wire.
    ///
    /// Equal to [`element_width`](Self::element_width) except for `NST`,
    /// whose offsets count words of the underlying integer file.
    pub fn stride(self) -> usize {
        match self {
            FileType::NST => 2,
            other => other.element_width(),
        }
    }

    /// File number assumed when the address omits one.
    pub fn default_file(self) -> Option<u16> {
        match self {
            FileType::O => Some(0),
            FileType::I => Some(1),
            FileType::S => Some(2),
            _ => None,
        }
    }

    /// Returns whether addresses of this type can be resolved.
    pub fn is_supported(self) -> bool {
        !matches!(self, FileType::A)
    }

    /// The address prefix for this file type.
    pub fn prefix(self) -> &'static str {
        match self {
            FileType::O => "O",
            FileType::I => "I",
            FileType::S => "S",
            FileType::B => "B",
            FileType::T => "T",
            FileType::C => "C",
            FileType::R => "R",
            FileType::N => "N",
            FileType::F => "F",
            FileType::ST => "ST",
            FileType::A => "A",
            FileType::L => "L",
            FileType::NST => "NST",
        }
    }
}

impl FromStr for FileType {
    type Err = PcccError;

    fn from_str(s: &str) -> Result<Self> {
        let ft = match s {
            "O" => FileType::O,
            "I" => FileType::I,
            "S" => FileType::S,
            "B" => FileType::B,
            "T" => FileType::T,
            "C" => FileType::C,
            "R" => FileType::R,
            "N" => FileType::N,
            "F" => FileType::F,
            "ST" => FileType::ST,
            "A" => FileType::A,
            "L" => FileType::L,
            "NST" => FileType::NST,
            other => {
                return Err(PcccError::invalid_address(
                    s,
                    format!("unsupported file type '{}'", other),
                ))
            }
        };
        Ok(ft)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(FileType::S.code(), 0x84);
        assert_eq!(FileType::B.code(), 0x85);
        assert_eq!(FileType::T.code(), 0x86);
        assert_eq!(FileType::C.code(), 0x87);
        assert_eq!(FileType::R.code(), 0x88);
        assert_eq!(FileType::N.code(), 0x89);
        assert_eq!(FileType::NST.code(), 0x89);
        assert_eq!(FileType::F.code(), 0x8A);
        assert_eq!(FileType::O.code(), 0x8B);
        assert_eq!(FileType::I.code(), 0x8C);
        assert_eq!(FileType::ST.code(), 0x8D);
        assert_eq!(FileType::L.code(), 0x91);
    }

    #[test]
    fn test_widths_and_stride() {
        assert_eq!(FileType::N.element_width(), 2);
        assert_eq!(FileType::L.element_width(), 4);
        assert_eq!(FileType::R.element_width(), 6);
        assert_eq!(FileType::ST.stride(), 84);
        assert_eq!(FileType::NST.element_width(), 42);
        assert_eq!(FileType::NST.stride(), 2);
    }

    #[test]
    fn test_parse_and_display() {
        for prefix in ["O", "I", "S", "B", "T", "C", "R", "N", "F", "ST", "A", "L", "NST"] {
            let ft: FileType = prefix.parse().unwrap();
            assert_eq!(ft.to_string(), prefix);
        }
        assert!("X".parse::<FileType>().is_err());
        assert!("n".parse::<FileType>().is_err());
    }

    #[test]
    fn test_default_files() {
        assert_eq!(FileType::O.default_file(), Some(0));
        assert_eq!(FileType::I.default_file(), Some(1));
        assert_eq!(FileType::S.default_file(), Some(2));
        assert_eq!(FileType::N.default_file(), None);
        assert!(!FileType::A.is_supported());
    }
}
