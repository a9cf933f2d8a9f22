//! PCCC typed logical command bodies.
//!
//! Each command handles its own serialization. The bytes returned by
//! `to_bytes` follow the PCCC service header inside an encapsulated frame
//! (see [`FrameBuilder`](crate::FrameBuilder)).
//!
//! # Command Types
//!
//! - [`ReadCommand`] - `0xA2` protected typed logical read (three address fields)
//! - [`WriteCommand`] - `0xAA` protected typed logical write
//! - [`MaskedWriteCommand`] - `0xAB` protected typed logical masked write
//!
//! # Address Fields
//!
//! File number, element and subelement are each one byte when below 255.
//! Larger values are escaped as `0xFF` followed by the 16-bit value (LE).
//!
//! # Example
//!
//! ```
//! use pccc_eip::{FileType, ReadCommand};
//!
//! let cmd = ReadCommand::new(FileType::N, 7, 0, 0, 4).unwrap();
//! assert_eq!(cmd.to_bytes(), vec![0xA2, 4, 7, 0x89, 0, 0]);
//!
//! let far = ReadCommand::new(FileType::N, 300, 1000, 0, 2).unwrap();
//! assert_eq!(far.to_bytes(), vec![0xA2, 2, 0xFF, 0x2C, 0x01, 0x89, 0xFF, 0xE8, 0x03, 0]);
//! ```

use crate::error::{PcccError, Result};
use crate::file_type::FileType;

/// Protected typed logical read with three address fields.
pub const CMD_READ: u8 = 0xA2;
/// Protected typed logical write with three address fields.
pub const CMD_WRITE: u8 = 0xAA;
/// Protected typed logical masked write with three address fields.
pub const CMD_MASKED_WRITE: u8 = 0xAB;

/// Largest transfer expressible in the one-byte size field.
pub const MAX_TRANSFER_BYTES: usize = 255;

/// Largest address field value that fits in one byte.
const MAX_SHORT_FIELD: u16 = 254;

/// Appends one address field, escaping values above 254.
fn push_field(bytes: &mut Vec<u8>, value: u16) {
    if value > MAX_SHORT_FIELD {
        bytes.push(0xFF);
        bytes.extend_from_slice(&value.to_le_bytes());
    } else {
        bytes.push(value as u8);
    }
}

/// File/element/subelement target shared by all three commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    file_type: FileType,
    file: u16,
    element: u16,
    subelement: u16,
}

impl Target {
    fn write_to(&self, bytes: &mut Vec<u8>) {
        push_field(bytes, self.file);
        bytes.push(self.file_type.code());
        push_field(bytes, self.element);
        push_field(bytes, self.subelement);
    }
}

fn check_size(parameter: &str, size: usize) -> Result<u8> {
    if size == 0 {
        return Err(PcccError::invalid_parameter(parameter, "must be greater than 0"));
    }
    u8::try_from(size).map_err(|_| {
        PcccError::invalid_parameter(
            parameter,
            format!("must not exceed {}", MAX_TRANSFER_BYTES),
        )
    })
}

/// Command for reading bytes from a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    target: Target,
    size: u8,
}

impl ReadCommand {
    /// Creates a new read command.
    ///
    /// # Arguments
    ///
    /// * `file_type` - Data file type
    /// * `file` - File number
    /// * `element` - First element
    /// * `subelement` - Word within the element
    /// * `size` - Bytes to read (1-255)
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0 or exceeds [`MAX_TRANSFER_BYTES`].
    pub fn new(
        file_type: FileType,
        file: u16,
        element: u16,
        subelement: u16,
        size: usize,
    ) -> Result<Self> {
        Ok(Self {
            target: Target {
                file_type,
                file,
                element,
                subelement,
            },
            size: check_size("size", size)?,
        })
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12);
        bytes.push(CMD_READ);
        bytes.push(self.size);
        self.target.write_to(&mut bytes);
        bytes
    }
}

/// Command for writing bytes to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    target: Target,
    data: Vec<u8>,
}

impl WriteCommand {
    /// Creates a new write command.
    ///
    /// # Errors
    ///
    /// Returns an error if data is empty or longer than [`MAX_TRANSFER_BYTES`].
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::{FileType, WriteCommand};
    ///
    /// let cmd = WriteCommand::new(FileType::N, 7, 2, 0, vec![0x34, 0x12]).unwrap();
    /// assert_eq!(cmd.to_bytes(), vec![0xAA, 2, 7, 0x89, 2, 0, 0x34, 0x12]);
    /// ```
    pub fn new(
        file_type: FileType,
        file: u16,
        element: u16,
        subelement: u16,
        data: Vec<u8>,
    ) -> Result<Self> {
        check_size("data", data.len())?;
        Ok(Self {
            target: Target {
                file_type,
                file,
                element,
                subelement,
            },
            data,
        })
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + self.data.len());
        bytes.push(CMD_WRITE);
        bytes.push(self.data.len() as u8);
        self.target.write_to(&mut bytes);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Command for changing selected bits of one word.
///
/// Bits set in `mask` take their state from `value`; all others are left
/// untouched by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedWriteCommand {
    target: Target,
    mask: u16,
    value: u16,
}

impl MaskedWriteCommand {
    /// Creates a new masked write command.
    ///
    /// # Errors
    ///
    /// Returns an error if `mask` is zero.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::{FileType, MaskedWriteCommand};
    ///
    /// // Set B3:1/4
    /// let cmd = MaskedWriteCommand::new(FileType::B, 3, 1, 0, 1 << 4, 1 << 4).unwrap();
    /// assert_eq!(cmd.to_bytes(), vec![0xAB, 2, 3, 0x85, 1, 0, 0x10, 0x00, 0x10, 0x00]);
    /// ```
    pub fn new(
        file_type: FileType,
        file: u16,
        element: u16,
        subelement: u16,
        mask: u16,
        value: u16,
    ) -> Result<Self> {
        if mask == 0 {
            return Err(PcccError::invalid_parameter("mask", "must select at least one bit"));
        }
        Ok(Self {
            target: Target {
                file_type,
                file,
                element,
                subelement,
            },
            mask,
            value: value & mask,
        })
    }

    /// Serializes the command to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        bytes.push(CMD_MASKED_WRITE);
        bytes.push(2);
        self.target.write_to(&mut bytes);
        bytes.extend_from_slice(&self.mask.to_le_bytes());
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes
    }
}
