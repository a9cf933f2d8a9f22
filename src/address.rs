//! Symbolic address resolution.
//!
//! Addresses follow the classic Allen-Bradley data table syntax:
//!
//! ```text
//! <prefix><file>:<element>[/<bit> | .<field>][,<count>]
//! ```
//!
//! | Address | Meaning |
//! |---------|---------|
//! | `N7:0` | integer file 7, element 0 |
//! | `N7:10,5` | five integers starting at element 10 |
//! | `B3:1/4` | bit 4 of word 1 in bit file 3 |
//! | `B3/20` | bit 20 of bit file 3 (same as `B3:1/4`) |
//! | `T4:0.PRE` | preset word of timer 0 |
//! | `T4:0.DN` | done bit of timer 0 |
//! | `S:1/5` | status file (file number 2 implied) |
//! | `ST9:0` | string element 0 of file 9 |
//!
//! Bit offsets larger than the element are folded into the element offset,
//! so `B3:0/20` and `B3:1/4` resolve to the same [`Address`].
//!
//! # Example
//!
//! ```
//! use pccc_eip::{Address, DataKind, FileType, ScalarType};
//!
//! let addr: Address = "N7:0".parse().unwrap();
//! assert_eq!(addr.file_type(), FileType::N);
//! assert_eq!(addr.file(), 7);
//! assert_eq!(addr.kind(), DataKind::Scalar(ScalarType::Int));
//! assert_eq!(addr.byte_length(), 2);
//!
//! let bit: Address = "B3/20".parse().unwrap();
//! assert_eq!(bit.to_string(), "B3:1/4");
//! ```

use std::str::FromStr;

use crate::error::{PcccError, Result};
use crate::file_type::FileType;

/// Fixed-width numeric interpretations of element bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Signed 16-bit integer.
    Int,
    /// Signed 32-bit integer.
    Dint,
    /// IEEE 754 single precision float.
    Real,
    /// Unsigned 16-bit integer.
    Word,
    /// Unsigned 32-bit integer.
    Dword,
    /// Raw byte.
    Byte,
    /// Single ASCII character.
    Char,
}

impl ScalarType {
    /// Bytes per value.
    pub fn width(self) -> usize {
        match self {
            ScalarType::Int | ScalarType::Word => 2,
            ScalarType::Dint | ScalarType::Real | ScalarType::Dword => 4,
            ScalarType::Byte | ScalarType::Char => 1,
        }
    }
}

/// Length-prefixed string layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextType {
    /// `ST` file string: one length byte, a pad byte, then up to 82 characters.
    String,
    /// String copied into an integer file: 16-bit length, two unused bytes,
    /// then characters.
    NString,
}

impl TextType {
    /// Offset of the first character within an element.
    pub fn data_offset(self) -> usize {
        match self {
            TextType::String => 2,
            TextType::NString => 4,
        }
    }
}

/// Three-word structured elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureType {
    /// Timer (`T` files).
    Timer,
    /// Counter (`C` files).
    Counter,
    /// Control (`R` files).
    Control,
}

/// The two data words that follow a structure's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureField {
    /// `PRE` for timers and counters, `LEN` for controls.
    Preset,
    /// `ACC` for timers and counters, `POS` for controls.
    Accumulator,
}

impl StructureField {
    /// Subelement number used on the wire.
    pub fn subelement(self) -> u16 {
        match self {
            StructureField::Preset => 1,
            StructureField::Accumulator => 2,
        }
    }

    /// Byte offset of the word within the element.
    pub fn byte_offset(self) -> usize {
        usize::from(self.subelement()) * 2
    }

    fn name(self, structure: StructureType) -> &'static str {
        match (structure, self) {
            (StructureType::Control, StructureField::Preset) => "LEN",
            (StructureType::Control, StructureField::Accumulator) => "POS",
            (_, StructureField::Preset) => "PRE",
            (_, StructureField::Accumulator) => "ACC",
        }
    }
}

enum Subfield {
    Word(StructureField),
    Bit(u16),
}

fn lookup_subfield(structure: StructureType, name: &str) -> Option<Subfield> {
    use StructureField::*;
    use Subfield::{Bit, Word};

    let sub = match (structure, name) {
        (StructureType::Timer | StructureType::Counter, "PRE") => Word(Preset),
        (StructureType::Timer | StructureType::Counter, "ACC") => Word(Accumulator),
        (StructureType::Control, "LEN") => Word(Preset),
        (StructureType::Control, "POS") => Word(Accumulator),
        (StructureType::Timer | StructureType::Control, "EN") => Bit(15),
        (StructureType::Timer, "TT") => Bit(14),
        (_, "DN") => Bit(13),
        (StructureType::Counter, "CU") => Bit(15),
        (StructureType::Counter, "CD") => Bit(14),
        (StructureType::Counter, "OV") => Bit(12),
        (StructureType::Counter, "UN") => Bit(11),
        (StructureType::Control, "EU") => Bit(14),
        (StructureType::Control, "EM") => Bit(12),
        (StructureType::Control, "ER") => Bit(11),
        (StructureType::Control, "UL") => Bit(10),
        (StructureType::Control, "IN") => Bit(9),
        (StructureType::Control, "FD") => Bit(8),
        _ => return None,
    };
    Some(sub)
}

/// Datatype family of a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Fixed-width numbers.
    Scalar(ScalarType),
    /// Individual bits, byte-packed starting at [`Address::bit`].
    Bit,
    /// Length-prefixed strings.
    Text(TextType),
    /// Timer/counter/control elements, whole or a single data word.
    Structure {
        /// Structure layout.
        structure: StructureType,
        /// Selected data word, or `None` for the whole element.
        field: Option<StructureField>,
    },
}

/// A symbolic address resolved to wire terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    file_type: FileType,
    file: u16,
    element: u16,
    subelement: u16,
    bit: u16,
    count: u16,
    kind: DataKind,
}

impl Address {
    /// Resolves a symbolic address.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::InvalidAddress` if:
    /// - the string does not split into file and element parts
    /// - the prefix is unknown or unsupported (`A`)
    /// - the file number is missing for a file type without a default
    /// - both `/` and `.` are present, or the field is unknown for the file type
    /// - a named field is combined with an array count
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::{Address, DataKind, StructureField, StructureType};
    ///
    /// let pre = Address::parse("T4:0.PRE").unwrap();
    /// assert_eq!(pre.subelement(), 1);
    /// assert_eq!(
    ///     pre.kind(),
    ///     DataKind::Structure { structure: StructureType::Timer, field: Some(StructureField::Preset) }
    /// );
    ///
    /// assert!(Address::parse("T4:0.PRE,2").is_err());
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let fail = |reason: String| PcccError::invalid_address(address, reason);
        let upper = address.trim().to_ascii_uppercase();

        let (head, tail) = match upper.split_once(':') {
            Some((head, tail)) => (head.to_string(), tail.to_string()),
            None => match upper.split_once('/') {
                // "B3/20" addresses a bit counted from element 0.
                Some((head, bit)) => (head.to_string(), format!("0/{}", bit)),
                None => {
                    return Err(fail(
                        "expected '<file>:<element>' or '<file>/<bit>'".to_string(),
                    ))
                }
            },
        };
        if tail.contains(':') {
            return Err(fail("more than one ':'".to_string()));
        }

        let digits_at = head
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(head.len());
        let (prefix, file_digits) = head.split_at(digits_at);
        let file_type: FileType = prefix
            .parse()
            .map_err(|_| fail(format!("unsupported file type '{}'", prefix)))?;
        if !file_type.is_supported() {
            return Err(fail(format!("file type '{}' is not supported", prefix)));
        }
        let file = if file_digits.is_empty() {
            file_type
                .default_file()
                .ok_or_else(|| fail("missing file number".to_string()))?
        } else {
            parse_number(file_digits).ok_or_else(|| fail("invalid file number".to_string()))?
        };

        let mut parts = tail.split(',');
        let body = parts.next().unwrap_or_default();
        let count = match parts.next() {
            Some(n) => parse_number(n)
                .filter(|&n| n > 0)
                .ok_or_else(|| fail(format!("invalid array length '{}'", n)))?,
            None => 1,
        };
        if parts.next().is_some() {
            return Err(fail("more than one ','".to_string()));
        }

        if body.matches(['/', '.']).count() > 1 {
            return Err(fail("use either '/bit' or '.field', not both".to_string()));
        }
        let (element_str, sub) = match body.find(['/', '.']) {
            Some(i) => (&body[..i], Some(&body[i + 1..])),
            None => (body, None),
        };
        let element =
            parse_number(element_str).ok_or_else(|| fail("invalid element offset".to_string()))?;

        let mut addr = Address {
            file_type,
            file,
            element,
            subelement: 0,
            bit: 0,
            count,
            kind: default_kind(file_type),
        };

        match sub {
            None => {}
            Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                let bit = parse_number(s).ok_or_else(|| fail("invalid bit offset".to_string()))?;
                addr.set_bit(bit).map_err(fail)?;
            }
            Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphabetic()) => {
                let structure = match addr.kind {
                    DataKind::Structure { structure, .. } => structure,
                    _ => {
                        return Err(fail(format!(
                            "field '.{}' is only valid on T, C and R files",
                            s
                        )))
                    }
                };
                if count > 1 {
                    return Err(fail("arrays of named fields are not supported".to_string()));
                }
                match lookup_subfield(structure, s) {
                    Some(Subfield::Word(field)) => {
                        addr.subelement = field.subelement();
                        addr.kind = DataKind::Structure {
                            structure,
                            field: Some(field),
                        };
                    }
                    Some(Subfield::Bit(bit)) => addr.set_bit(bit).map_err(fail)?,
                    None => return Err(fail(format!("unknown field '.{}'", s))),
                }
            }
            Some(s) => return Err(fail(format!("invalid subfield '{}'", s))),
        }

        Ok(addr)
    }

    /// Switches to bit access, folding large offsets into the element offset.
    fn set_bit(&mut self, bit: u16) -> std::result::Result<(), String> {
        let bits_per_element = (self.file_type.stride() * 8) as u16;
        self.element = self
            .element
            .checked_add(bit / bits_per_element)
            .ok_or_else(|| "bit offset overflows the element offset".to_string())?;
        self.bit = bit % bits_per_element;
        self.subelement = self.bit / 16;
        self.kind = DataKind::Bit;
        Ok(())
    }

    /// Reinterprets a numeric address as another scalar type.
    ///
    /// `Word` requires 2-byte elements and `Dword` 4-byte elements. `Byte`
    /// and `Char` view the same bytes one at a time, so the count becomes
    /// the number of bytes.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::InvalidAddress` if the address is not numeric or
    /// the widths are incompatible.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::{Address, ScalarType};
    ///
    /// let raw = Address::parse("N7:0,2").unwrap().with_scalar_type(ScalarType::Byte).unwrap();
    /// assert_eq!(raw.count(), 4);
    /// assert_eq!(raw.byte_length(), 4);
    ///
    /// assert!(Address::parse("N7:0").unwrap().with_scalar_type(ScalarType::Dword).is_err());
    /// ```
    pub fn with_scalar_type(mut self, ty: ScalarType) -> Result<Self> {
        let current = match self.kind {
            DataKind::Scalar(current) => current,
            _ => {
                return Err(PcccError::invalid_address(
                    self.to_string(),
                    "only numeric addresses can be reinterpreted",
                ))
            }
        };
        if ty.width() == 1 {
            self.count = (usize::from(self.count) * current.width())
                .try_into()
                .map_err(|_| PcccError::invalid_address(self.to_string(), "too many bytes"))?;
        } else if ty.width() != self.file_type.element_width() {
            return Err(PcccError::invalid_address(
                self.to_string(),
                format!("{:?} does not fit {}-byte elements", ty, self.file_type.element_width()),
            ));
        }
        self.kind = DataKind::Scalar(ty);
        Ok(self)
    }

    /// File type.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// PCCC file type code.
    pub fn area_code(&self) -> u8 {
        self.file_type.code()
    }

    /// File number.
    pub fn file(&self) -> u16 {
        self.file
    }

    /// Element offset, in units of [`FileType::stride`].
    pub fn element(&self) -> u16 {
        self.element
    }

    /// Subelement (word within a multi-word element).
    pub fn subelement(&self) -> u16 {
        self.subelement
    }

    /// Bit offset within the element; zero unless [`DataKind::Bit`].
    pub fn bit(&self) -> u16 {
        self.bit
    }

    /// Number of values.
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Datatype family.
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Bytes occupied by one value.
    pub fn element_width(&self) -> usize {
        match self.kind {
            DataKind::Scalar(ty) => ty.width(),
            _ => self.file_type.element_width(),
        }
    }

    /// Bytes transferred by a read, always even.
    pub fn byte_length(&self) -> usize {
        let raw = match self.kind {
            DataKind::Bit => (usize::from(self.bit) + usize::from(self.count)).div_ceil(8),
            _ => usize::from(self.count) * self.element_width(),
        };
        raw + raw % 2
    }

    /// Bytes transferred by a write.
    ///
    /// Differs from [`byte_length`](Self::byte_length) for single structure
    /// words, bits and odd byte views.
    pub fn write_byte_length(&self) -> usize {
        match self.kind {
            DataKind::Bit => (usize::from(self.bit) + usize::from(self.count)).div_ceil(8),
            DataKind::Structure { field: Some(_), .. } => 2,
            DataKind::Scalar(ScalarType::Byte | ScalarType::Char) => usize::from(self.count),
            _ => self.byte_length(),
        }
    }
}

impl FromStr for Address {
    type Err = PcccError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}:{}", self.file_type, self.file, self.element)?;
        match self.kind {
            DataKind::Bit => write!(f, "/{}", self.bit)?,
            DataKind::Structure {
                structure,
                field: Some(field),
            } => write!(f, ".{}", field.name(structure))?,
            _ => {}
        }
        if self.count > 1 {
            write!(f, ",{}", self.count)?;
        }
        Ok(())
    }
}

fn default_kind(file_type: FileType) -> DataKind {
    match file_type {
        FileType::L => DataKind::Scalar(ScalarType::Dint),
        FileType::F => DataKind::Scalar(ScalarType::Real),
        FileType::T => DataKind::Structure {
            structure: StructureType::Timer,
            field: None,
        },
        FileType::C => DataKind::Structure {
            structure: StructureType::Counter,
            field: None,
        },
        FileType::R => DataKind::Structure {
            structure: StructureType::Control,
            field: None,
        },
        FileType::ST => DataKind::Text(TextType::String),
        FileType::NST => DataKind::Text(TextType::NString),
        _ => DataKind::Scalar(ScalarType::Int),
    }
}

fn parse_number(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
