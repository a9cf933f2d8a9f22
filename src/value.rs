//! Typed values and their wire encoding.
//!
//! Reads land in a byte buffer paired with a quality buffer holding one
//! marker per byte ([`QUALITY_GOOD`] or [`QUALITY_BAD`]). [`decode`] turns an
//! item's slice of both into a [`PlcValue`]; [`encode`] produces the bytes
//! a write sends.
//!
//! | Kind | Wire layout |
//! |------|-------------|
//! | INT / WORD | 2 bytes LE |
//! | DINT / DWORD / REAL | 4 bytes LE |
//! | BYTE / CHAR | 1 byte |
//! | bit | byte-packed, LSB first, starting at the address bit offset |
//! | STRING | length byte, pad byte, characters pair-swapped |
//! | NSTRING | 16-bit length, 2 unused bytes, characters pair-swapped |
//! | TIMER / COUNTER / CONTROL | status word, then two data words |
//!
//! # Example
//!
//! ```
//! use pccc_eip::{decode, encode, Address, PlcValue, QUALITY_GOOD};
//!
//! let addr = Address::parse("ST9:0").unwrap();
//! let bytes = encode(&addr, &PlcValue::from("HELLO")).unwrap();
//! assert_eq!(&bytes[..7], &[5, 0, b'E', b'H', b'L', b'L', b'O']);
//!
//! let quality = vec![QUALITY_GOOD; bytes.len()];
//! let (value, good) = decode(&addr, &bytes, &quality);
//! assert!(good);
//! assert_eq!(value, PlcValue::from("HELLO"));
//! ```

use crate::address::{Address, DataKind, ScalarType, StructureType, TextType};
use crate::error::{PcccError, Result};
use crate::utils::{get_bit, packed_bit, pair_swap, set_bit};

/// Quality marker for a byte that arrived in a successful reply.
pub const QUALITY_GOOD: u8 = 0xC0;

/// Quality marker for a byte whose transfer failed.
pub const QUALITY_BAD: u8 = 0xFF;

/// Longest string an `ST` element holds.
pub const MAX_STRING_LENGTH: usize = 82;

/// Why an item has bad quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BadReason {
    /// No reply within the packet timeout.
    Timeout,
    /// The controller returned a non-zero PCCC status.
    PcccStatus(u8),
    /// The reply payload had the wrong shape or length.
    Malformed,
    /// The request was never sent because the session was down.
    NotConnected,
    /// The item was refused before sending (bad address or value).
    Rejected,
}

impl BadReason {
    /// Numeric code shown in quality strings.
    pub fn code(self) -> u8 {
        match self {
            BadReason::PcccStatus(code) => code,
            _ => QUALITY_BAD,
        }
    }

    /// Maps an item-level error onto a reason.
    pub fn from_error(err: &PcccError) -> Self {
        match err {
            PcccError::PcccStatus { code } => BadReason::PcccStatus(*code),
            PcccError::Timeout => BadReason::Timeout,
            PcccError::NotConnected | PcccError::Disconnected => BadReason::NotConnected,
            PcccError::InvalidAddress { .. } | PcccError::InvalidValue { .. } => {
                BadReason::Rejected
            }
            _ => BadReason::Malformed,
        }
    }
}

/// Per-item transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Quality {
    /// The last transfer succeeded.
    Good,
    /// The last transfer failed.
    Bad(BadReason),
}

impl Quality {
    /// Returns whether the quality is good.
    pub fn is_good(&self) -> bool {
        matches!(self, Quality::Good)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Good => f.write_str("OK"),
            Quality::Bad(reason) => write!(f, "BAD {}", reason.code()),
        }
    }
}

/// Timer element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timer {
    /// Enable (bit 15).
    pub en: bool,
    /// Timing (bit 14).
    pub tt: bool,
    /// Done (bit 13).
    pub dn: bool,
    /// Preset.
    pub pre: i16,
    /// Accumulator.
    pub acc: i16,
}

/// Counter element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Counter {
    /// Count up enable (bit 15).
    pub cu: bool,
    /// Count down enable (bit 14).
    pub cd: bool,
    /// Done (bit 13).
    pub dn: bool,
    /// Overflow (bit 12).
    pub ov: bool,
    /// Underflow (bit 11).
    pub un: bool,
    /// Preset.
    pub pre: i16,
    /// Accumulator.
    pub acc: i16,
}

/// Control element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Control {
    /// Enable (bit 15).
    pub en: bool,
    /// Enable unload (bit 14).
    pub eu: bool,
    /// Done (bit 13).
    pub dn: bool,
    /// Empty (bit 12).
    pub em: bool,
    /// Error (bit 11).
    pub er: bool,
    /// Unload (bit 10).
    pub ul: bool,
    /// Inhibit, `IN` (bit 9).
    pub inhibit: bool,
    /// Found (bit 8).
    pub fd: bool,
    /// Length.
    pub len: i16,
    /// Position.
    pub pos: i16,
}

/// A value read from or written to the controller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlcValue {
    /// Single bit.
    Bool(bool),
    /// INT.
    Int(i16),
    /// DINT.
    Dint(i32),
    /// REAL.
    Real(f32),
    /// WORD.
    Word(u16),
    /// DWORD.
    Dword(u32),
    /// BYTE.
    Byte(u8),
    /// STRING, NSTRING and CHAR arrays.
    Text(String),
    /// TIMER.
    Timer(Timer),
    /// COUNTER.
    Counter(Counter),
    /// CONTROL.
    Control(Control),
    /// Multiple values of one kind.
    Array(Vec<PlcValue>),
}

impl PlcValue {
    /// Integer view of numeric and boolean values.
    ///
    /// Reals convert only when they carry no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            PlcValue::Bool(b) => Some(i64::from(b)),
            PlcValue::Int(v) => Some(i64::from(v)),
            PlcValue::Dint(v) => Some(i64::from(v)),
            PlcValue::Word(v) => Some(i64::from(v)),
            PlcValue::Dword(v) => Some(i64::from(v)),
            PlcValue::Byte(v) => Some(i64::from(v)),
            PlcValue::Real(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    /// Floating point view of numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PlcValue::Real(v) => Some(f64::from(v)),
            _ => self.as_i64().map(|v| v as f64),
        }
    }
}

impl std::fmt::Display for PlcValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlcValue::Bool(v) => write!(f, "{}", v),
            PlcValue::Int(v) => write!(f, "{}", v),
            PlcValue::Dint(v) => write!(f, "{}", v),
            PlcValue::Real(v) => write!(f, "{}", v),
            PlcValue::Word(v) => write!(f, "{}", v),
            PlcValue::Dword(v) => write!(f, "{}", v),
            PlcValue::Byte(v) => write!(f, "{}", v),
            PlcValue::Text(v) => write!(f, "{:?}", v),
            PlcValue::Timer(t) => write!(f, "{:?}", t),
            PlcValue::Counter(c) => write!(f, "{:?}", c),
            PlcValue::Control(r) => write!(f, "{:?}", r),
            PlcValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for PlcValue {
            fn from(v: $ty) -> Self {
                PlcValue::$variant(v)
            }
        })*
    };
}

impl_from!(
    bool => Bool,
    i16 => Int,
    i32 => Dint,
    f32 => Real,
    u16 => Word,
    u32 => Dword,
    u8 => Byte,
    String => Text,
    Timer => Timer,
    Counter => Counter,
    Control => Control,
);

impl From<&str> for PlcValue {
    fn from(v: &str) -> Self {
        PlcValue::Text(v.to_string())
    }
}

impl<T: Into<PlcValue>> From<Vec<T>> for PlcValue {
    fn from(v: Vec<T>) -> Self {
        PlcValue::Array(v.into_iter().map(Into::into).collect())
    }
}

/// A decoded value with its quality, as delivered to read callers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemValue {
    /// Decoded value; a zero/empty placeholder where quality is bad.
    pub value: PlcValue,
    /// Quality of the last transfer.
    pub quality: Quality,
}

impl ItemValue {
    /// Returns whether the value is usable.
    pub fn is_good(&self) -> bool {
        self.quality.is_good()
    }
}

/// Decodes an item from its slice of a block buffer.
///
/// `data` and `quality` start at the item's first byte. Elements whose first
/// byte is not marked [`QUALITY_GOOD`] decode to a zero/empty placeholder.
/// Returns the value and whether every element was good.
pub fn decode(address: &Address, data: &[u8], quality: &[u8]) -> (PlcValue, bool) {
    let count = usize::from(address.count());
    let width = address.element_width();
    let good_at = |offset: usize| quality.get(offset) == Some(&QUALITY_GOOD);
    let mut all_good = true;
    let mut values = Vec::with_capacity(count);

    for i in 0..count {
        let (offset, value) = match address.kind() {
            DataKind::Bit => {
                let index = usize::from(address.bit()) + i;
                (index / 8, packed_bit(data, index).map(PlcValue::Bool))
            }
            DataKind::Scalar(ty) => (i * width, decode_scalar(ty, data.get(i * width..))),
            DataKind::Text(ty) => (i * width, decode_text(ty, width, data.get(i * width..))),
            DataKind::Structure {
                field: Some(field), ..
            } => {
                let offset = i * width + field.byte_offset();
                (offset, read_i16(data, offset).map(PlcValue::Int))
            }
            DataKind::Structure {
                structure,
                field: None,
            } => (
                i * width,
                decode_structure(structure, data.get(i * width..)),
            ),
        };
        match value {
            Some(v) if good_at(offset) => values.push(v),
            _ => {
                all_good = false;
                values.push(bad_value(address.kind()));
            }
        }
    }

    (collect(address, values), all_good)
}

/// Zero/empty placeholder for one element of `kind`.
pub fn bad_value(kind: DataKind) -> PlcValue {
    match kind {
        DataKind::Bit => PlcValue::Bool(false),
        DataKind::Scalar(ty) => match ty {
            ScalarType::Int => PlcValue::Int(0),
            ScalarType::Dint => PlcValue::Dint(0),
            ScalarType::Real => PlcValue::Real(0.0),
            ScalarType::Word => PlcValue::Word(0),
            ScalarType::Dword => PlcValue::Dword(0),
            ScalarType::Byte => PlcValue::Byte(0),
            ScalarType::Char => PlcValue::Text(String::new()),
        },
        DataKind::Text(_) => PlcValue::Text(String::new()),
        DataKind::Structure { field: Some(_), .. } => PlcValue::Int(0),
        DataKind::Structure { structure, .. } => match structure {
            StructureType::Timer => PlcValue::Timer(Timer::default()),
            StructureType::Counter => PlcValue::Counter(Counter::default()),
            StructureType::Control => PlcValue::Control(Control::default()),
        },
    }
}

/// Placeholder for a whole item whose transfer failed.
pub fn bad_item(address: &Address) -> PlcValue {
    let values = (0..address.count()).map(|_| bad_value(address.kind())).collect();
    collect(address, values)
}

fn collect(address: &Address, mut values: Vec<PlcValue>) -> PlcValue {
    if address.kind() == DataKind::Scalar(ScalarType::Char) {
        let text = values
            .into_iter()
            .filter_map(|v| match v {
                PlcValue::Text(s) => Some(s),
                _ => None,
            })
            .collect();
        return PlcValue::Text(text);
    }
    if values.len() == 1 {
        if let Some(v) = values.pop() {
            return v;
        }
    }
    PlcValue::Array(values)
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn read_i16(data: &[u8], offset: usize) -> Option<i16> {
    read_u16(data, offset).map(|v| v as i16)
}

fn read_4(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4)?.try_into().ok()
}

fn decode_scalar(ty: ScalarType, data: Option<&[u8]>) -> Option<PlcValue> {
    let data = data?;
    let value = match ty {
        ScalarType::Int => PlcValue::Int(read_i16(data, 0)?),
        ScalarType::Word => PlcValue::Word(read_u16(data, 0)?),
        ScalarType::Dint => PlcValue::Dint(i32::from_le_bytes(read_4(data)?)),
        ScalarType::Dword => PlcValue::Dword(u32::from_le_bytes(read_4(data)?)),
        ScalarType::Real => PlcValue::Real(f32::from_le_bytes(read_4(data)?)),
        ScalarType::Byte => PlcValue::Byte(*data.first()?),
        ScalarType::Char => PlcValue::Text(char::from(*data.first()?).to_string()),
    };
    Some(value)
}

fn decode_text(ty: TextType, width: usize, data: Option<&[u8]>) -> Option<PlcValue> {
    let data = data?;
    let start = ty.data_offset();
    let capacity = width - start;
    let declared = match ty {
        TextType::String => usize::from(*data.first()?),
        TextType::NString => usize::from(read_u16(data, 0)?),
    };
    let len = declared.min(capacity);
    // An odd final character sits unswapped in the first byte of its pair,
    // the same layout `encode` writes; the pad byte after it is not read.
    let chars = pair_swap(data.get(start..start + len)?);
    Some(PlcValue::Text(chars.into_iter().map(char::from).collect()))
}

fn decode_structure(structure: StructureType, data: Option<&[u8]>) -> Option<PlcValue> {
    let data = data?;
    let status = read_u16(data, 0)?;
    let first = read_i16(data, 2)?;
    let second = read_i16(data, 4)?;
    let value = match structure {
        StructureType::Timer => PlcValue::Timer(Timer {
            en: get_bit(status, 15),
            tt: get_bit(status, 14),
            dn: get_bit(status, 13),
            pre: first,
            acc: second,
        }),
        StructureType::Counter => PlcValue::Counter(Counter {
            cu: get_bit(status, 15),
            cd: get_bit(status, 14),
            dn: get_bit(status, 13),
            ov: get_bit(status, 12),
            un: get_bit(status, 11),
            pre: first,
            acc: second,
        }),
        StructureType::Control => PlcValue::Control(Control {
            en: get_bit(status, 15),
            eu: get_bit(status, 14),
            dn: get_bit(status, 13),
            em: get_bit(status, 12),
            er: get_bit(status, 11),
            ul: get_bit(status, 10),
            inhibit: get_bit(status, 9),
            fd: get_bit(status, 8),
            len: first,
            pos: second,
        }),
    };
    Some(value)
}

/// Encodes a value for writing to `address`.
///
/// The result is [`Address::write_byte_length`] bytes long. Bits are packed
/// at their absolute positions starting from the address bit offset.
///
/// # Errors
///
/// Returns `PcccError::InvalidValue` if the value's shape or range does not
/// fit the address.
pub fn encode(address: &Address, value: &PlcValue) -> Result<Vec<u8>> {
    let name = address.to_string();
    let invalid = |reason: &str| PcccError::invalid_value(name.as_str(), reason);
    let count = usize::from(address.count());

    if address.kind() == DataKind::Scalar(ScalarType::Char) {
        let text = match value {
            PlcValue::Text(t) => t,
            _ => return Err(invalid("expected text")),
        };
        let mut out = latin1(text).ok_or_else(|| invalid("non Latin-1 character"))?;
        if out.len() > count {
            return Err(invalid("text longer than the address"));
        }
        out.resize(count, 0);
        return Ok(out);
    }

    let elements: Vec<&PlcValue> = match value {
        PlcValue::Array(items) if count > 1 => items.iter().collect(),
        PlcValue::Array(_) => return Err(invalid("expected a single value")),
        single if count == 1 => vec![single],
        _ => return Err(invalid("expected an array")),
    };
    if elements.len() != count {
        return Err(invalid(&format!(
            "expected {} values, got {}",
            count,
            elements.len()
        )));
    }

    let mut out = vec![0u8; address.write_byte_length()];
    for (i, element) in elements.into_iter().enumerate() {
        match address.kind() {
            DataKind::Bit => {
                let state = match element {
                    PlcValue::Bool(b) => *b,
                    other => other.as_i64().ok_or_else(|| invalid("expected a bit"))? != 0,
                };
                let index = usize::from(address.bit()) + i;
                if state {
                    out[index / 8] |= 1 << (index % 8);
                }
            }
            DataKind::Scalar(ty) => {
                let bytes = encode_scalar(ty, element).ok_or_else(|| invalid("out of range"))?;
                let at = i * ty.width();
                out[at..at + bytes.len()].copy_from_slice(&bytes);
            }
            DataKind::Text(ty) => {
                let width = address.element_width();
                let bytes = encode_text(ty, width, element).map_err(invalid)?;
                out[i * width..(i + 1) * width].copy_from_slice(&bytes);
            }
            DataKind::Structure { field: Some(_), .. } => {
                let v = element
                    .as_i64()
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(|| invalid("expected a 16-bit integer"))?;
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            DataKind::Structure {
                structure,
                field: None,
            } => {
                let bytes = encode_structure(structure, element)
                    .ok_or_else(|| invalid("structure type mismatch"))?;
                out[i * 6..(i + 1) * 6].copy_from_slice(&bytes);
            }
        }
    }
    Ok(out)
}

fn encode_scalar(ty: ScalarType, value: &PlcValue) -> Option<Vec<u8>> {
    let bytes = match ty {
        ScalarType::Int => i16::try_from(value.as_i64()?).ok()?.to_le_bytes().to_vec(),
        ScalarType::Word => u16::try_from(value.as_i64()?).ok()?.to_le_bytes().to_vec(),
        ScalarType::Dint => i32::try_from(value.as_i64()?).ok()?.to_le_bytes().to_vec(),
        ScalarType::Dword => u32::try_from(value.as_i64()?).ok()?.to_le_bytes().to_vec(),
        ScalarType::Byte => vec![u8::try_from(value.as_i64()?).ok()?],
        ScalarType::Real => (value.as_f64()? as f32).to_le_bytes().to_vec(),
        ScalarType::Char => latin1(match value {
            PlcValue::Text(t) => t,
            _ => return None,
        })?,
    };
    Some(bytes)
}

fn encode_text(ty: TextType, width: usize, value: &PlcValue) -> std::result::Result<Vec<u8>, &'static str> {
    let text = match value {
        PlcValue::Text(t) => t,
        _ => return Err("expected text"),
    };
    let chars = latin1(text).ok_or("non Latin-1 character")?;
    let start = ty.data_offset();
    let capacity = match ty {
        TextType::String => MAX_STRING_LENGTH,
        TextType::NString => width - start,
    };
    if chars.len() > capacity {
        return Err("string too long");
    }
    let mut out = vec![0u8; width];
    match ty {
        TextType::String => out[0] = chars.len() as u8,
        TextType::NString => out[..2].copy_from_slice(&(chars.len() as u16).to_le_bytes()),
    }
    let swapped = pair_swap(&chars);
    out[start..start + swapped.len()].copy_from_slice(&swapped);
    Ok(out)
}

fn encode_structure(structure: StructureType, value: &PlcValue) -> Option<[u8; 6]> {
    let (status, first, second) = match (structure, value) {
        (StructureType::Timer, PlcValue::Timer(t)) => {
            let mut s = set_bit(0, 15, t.en);
            s = set_bit(s, 14, t.tt);
            s = set_bit(s, 13, t.dn);
            (s, t.pre, t.acc)
        }
        (StructureType::Counter, PlcValue::Counter(c)) => {
            let mut s = set_bit(0, 15, c.cu);
            s = set_bit(s, 14, c.cd);
            s = set_bit(s, 13, c.dn);
            s = set_bit(s, 12, c.ov);
            s = set_bit(s, 11, c.un);
            (s, c.pre, c.acc)
        }
        (StructureType::Control, PlcValue::Control(r)) => {
            let mut s = set_bit(0, 15, r.en);
            s = set_bit(s, 14, r.eu);
            s = set_bit(s, 13, r.dn);
            s = set_bit(s, 12, r.em);
            s = set_bit(s, 11, r.er);
            s = set_bit(s, 10, r.ul);
            s = set_bit(s, 9, r.inhibit);
            s = set_bit(s, 8, r.fd);
            (s, r.len, r.pos)
        }
        _ => return None,
    };
    let mut out = [0u8; 6];
    out[..2].copy_from_slice(&status.to_le_bytes());
    out[2..4].copy_from_slice(&first.to_le_bytes());
    out[4..].copy_from_slice(&second.to_le_bytes());
    Some(out)
}

fn latin1(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn good(len: usize) -> Vec<u8> {
        vec![QUALITY_GOOD; len]
    }

    fn round_trip(address: &str, value: PlcValue) {
        let a = addr(address);
        let mut bytes = encode(&a, &value).unwrap();
        bytes.resize(a.byte_length().max(bytes.len()), 0);
        let (decoded, ok) = decode(&a, &bytes, &good(bytes.len()));
        assert!(ok, "{}", address);
        assert_eq!(decoded, value, "{}", address);
    }

    #[test]
    fn test_decode_int() {
        let (v, ok) = decode(&addr("N7:0"), &[0x39, 0x30], &good(2));
        assert!(ok);
        assert_eq!(v, PlcValue::Int(12345));

        let (v, _) = decode(&addr("N7:0"), &[0xFF, 0xFF], &good(2));
        assert_eq!(v, PlcValue::Int(-1));
    }

    #[test]
    fn test_decode_array_with_bad_element() {
        let data = [1, 0, 2, 0, 3, 0];
        let quality = [QUALITY_GOOD, QUALITY_GOOD, QUALITY_BAD, QUALITY_BAD, QUALITY_GOOD, QUALITY_GOOD];
        let (v, ok) = decode(&addr("N7:0,3"), &data, &quality);
        assert!(!ok);
        assert_eq!(
            v,
            PlcValue::Array(vec![PlcValue::Int(1), PlcValue::Int(0), PlcValue::Int(3)])
        );
    }

    #[test]
    fn test_decode_bits_at_offset() {
        // B3:0/12,8 covers bits 12..20: word 0 high nibble, word 1 low nibble
        let data = [0x00, 0b1010_0000, 0b0000_0101, 0x00];
        let (v, ok) = decode(&addr("B3:0/12,8"), &data, &good(4));
        assert!(ok);
        let bits: Vec<PlcValue> = [false, true, false, true, true, false, true, false]
            .into_iter()
            .map(PlcValue::Bool)
            .collect();
        assert_eq!(v, PlcValue::Array(bits));

        let (v, _) = decode(&addr("B3:1/4"), &[0x10, 0x00], &good(2));
        assert_eq!(v, PlcValue::Bool(true));
    }

    #[test]
    fn test_decode_timer() {
        // EN and DN set, PRE 100, ACC 42
        let data = [0x00, 0xA0, 100, 0, 42, 0];
        let (v, ok) = decode(&addr("T4:0"), &data, &good(6));
        assert!(ok);
        assert_eq!(
            v,
            PlcValue::Timer(Timer {
                en: true,
                tt: false,
                dn: true,
                pre: 100,
                acc: 42
            })
        );

        let (v, _) = decode(&addr("T4:0.ACC"), &data, &good(6));
        assert_eq!(v, PlcValue::Int(42));
        let (v, _) = decode(&addr("T4:0.DN"), &data, &good(6));
        assert_eq!(v, PlcValue::Bool(true));
    }

    #[test]
    fn test_decode_control() {
        let data = [0x00, 0x06, 10, 0, 4, 0];
        let (v, _) = decode(&addr("R6:0"), &data, &good(6));
        match v {
            PlcValue::Control(r) => {
                assert!(r.inhibit);
                assert!(r.ul);
                assert!(!r.fd);
                assert_eq!(r.len, 10);
                assert_eq!(r.pos, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        let (v, _) = decode(&addr("R6:0.IN"), &data, &good(6));
        assert_eq!(v, PlcValue::Bool(true));
    }

    #[test]
    fn test_decode_string_wire_order() {
        let mut data = vec![0u8; 84];
        data[0] = 5;
        data[2..7].copy_from_slice(b"EHLLO");
        let (v, ok) = decode(&addr("ST9:0"), &data, &good(84));
        assert!(ok);
        assert_eq!(v, PlcValue::Text("HELLO".to_string()));
    }

    #[test]
    fn test_decode_string_length_clamped() {
        let mut data = vec![b'A'; 84];
        data[0] = 200;
        let (v, _) = decode(&addr("ST9:0"), &data, &good(84));
        match v {
            PlcValue::Text(s) => assert_eq!(s.len(), MAX_STRING_LENGTH),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_quality_placeholder() {
        let (v, ok) = decode(&addr("F8:0"), &[0, 0, 0x80, 0x3F], &[QUALITY_BAD; 4]);
        assert!(!ok);
        assert_eq!(v, PlcValue::Real(0.0));
        assert_eq!(bad_item(&addr("ST9:0,2")), PlcValue::Array(vec![
            PlcValue::Text(String::new()),
            PlcValue::Text(String::new())
        ]));
    }

    #[test]
    fn test_round_trips() {
        round_trip("N7:0", PlcValue::Int(-1234));
        round_trip("N7:0,3", PlcValue::from(vec![1i16, -2, 3]));
        round_trip("L9:0", PlcValue::Dint(-123_456));
        round_trip("F8:0,2", PlcValue::from(vec![1.5f32, -0.25]));
        round_trip("B3:1/4", PlcValue::Bool(true));
        round_trip(
            "B3:0/5,11",
            PlcValue::from(vec![
                true, false, true, true, false, false, true, false, true, true, true,
            ]),
        );
        round_trip("ST9:0", PlcValue::from("ODD"));
        round_trip("ST9:0", PlcValue::from("EVEN"));
        round_trip("ST9:0", PlcValue::from(""));
        round_trip("NST10:0", PlcValue::from("abcde"));
        round_trip(
            "T4:0",
            PlcValue::Timer(Timer {
                en: true,
                tt: true,
                dn: false,
                pre: 500,
                acc: 12,
            }),
        );
        round_trip(
            "C5:0,2",
            PlcValue::from(vec![
                Counter {
                    cu: true,
                    ov: true,
                    pre: 10,
                    acc: 11,
                    ..Counter::default()
                },
                Counter::default(),
            ]),
        );
        round_trip(
            "R6:0",
            PlcValue::Control(Control {
                en: true,
                fd: true,
                inhibit: true,
                len: 8,
                pos: 3,
                ..Control::default()
            }),
        );

        let word = addr("N7:0").with_scalar_type(ScalarType::Word).unwrap();
        let bytes = encode(&word, &PlcValue::Word(65535)).unwrap();
        assert_eq!(decode(&word, &bytes, &good(2)).0, PlcValue::Word(65535));

        let chars = addr("N7:0,2").with_scalar_type(ScalarType::Char).unwrap();
        let bytes = encode(&chars, &PlcValue::from("ab")).unwrap();
        assert_eq!(bytes, vec![b'a', b'b', 0, 0]);
        assert_eq!(decode(&chars, &bytes, &good(4)).0, PlcValue::from("ab\0\0"));
    }

    #[test]
    fn test_structure_word_encoding() {
        let bytes = encode(&addr("T4:0.PRE"), &PlcValue::Int(300)).unwrap();
        assert_eq!(bytes, vec![0x2C, 0x01]);
    }

    #[test]
    fn test_odd_string_encoding() {
        let bytes = encode(&addr("ST9:0"), &PlcValue::from("ABC")).unwrap();
        assert_eq!(bytes.len(), 84);
        assert_eq!(&bytes[..6], &[3, 0, b'B', b'A', b'C', 0]);
    }

    #[test]
    fn test_bit_encoding_positions() {
        let bytes = encode(&addr("B3:0/6,4"), &PlcValue::from(vec![true, true, false, true])).unwrap();
        assert_eq!(bytes, vec![0b1100_0000, 0b0000_0010]);
    }

    #[test]
    fn test_encode_coercion() {
        assert_eq!(encode(&addr("N7:0"), &PlcValue::Real(7.0)).unwrap(), vec![7, 0]);
        assert_eq!(encode(&addr("B3:0/1"), &PlcValue::Int(1)).unwrap(), vec![0b10]);
        assert_eq!(
            encode(&addr("F8:0"), &PlcValue::Int(1)).unwrap(),
            1.0f32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_encode_errors() {
        assert!(encode(&addr("N7:0"), &PlcValue::Dint(70000)).is_err());
        assert!(encode(&addr("N7:0"), &PlcValue::Real(1.5)).is_err());
        assert!(encode(&addr("N7:0,2"), &PlcValue::Int(1)).is_err());
        assert!(encode(&addr("N7:0,2"), &PlcValue::from(vec![1i16])).is_err());
        assert!(encode(&addr("N7:0"), &PlcValue::from(vec![1i16])).is_err());
        assert!(encode(&addr("ST9:0"), &PlcValue::from("x".repeat(83))).is_err());
        assert!(encode(&addr("ST9:0"), &PlcValue::Int(1)).is_err());
        assert!(encode(&addr("T4:0"), &PlcValue::Counter(Counter::default())).is_err());
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::Good.to_string(), "OK");
        assert_eq!(Quality::Bad(BadReason::PcccStatus(0x10)).to_string(), "BAD 16");
        assert_eq!(Quality::Bad(BadReason::Timeout).to_string(), "BAD 255");
    }

    fn listed<T: Into<PlcValue> + Copy>(values: &[T]) -> PlcValue {
        match values {
            [single] => (*single).into(),
            _ => PlcValue::from(values.to_vec()),
        }
    }

    proptest! {
        #[test]
        fn test_generated_int_round_trip(
            element in 0u16..500,
            values in prop::collection::vec(any::<i16>(), 1..20),
        ) {
            round_trip(&format!("N7:{},{}", element, values.len()), listed(&values));
        }

        #[test]
        fn test_generated_dint_round_trip(values in prop::collection::vec(any::<i32>(), 1..10)) {
            round_trip(&format!("L9:0,{}", values.len()), listed(&values));
        }

        #[test]
        fn test_generated_real_round_trip(
            values in prop::collection::vec(-1.0e6f32..1.0e6, 1..10),
        ) {
            round_trip(&format!("F8:0,{}", values.len()), listed(&values));
        }

        #[test]
        fn test_generated_bits_at_offset_round_trip(
            bit in 0u16..16,
            values in prop::collection::vec(any::<bool>(), 1..40),
        ) {
            round_trip(&format!("B3:2/{},{}", bit, values.len()), listed(&values));
        }

        #[test]
        fn test_generated_string_round_trip(text in "[ -~]{0,82}") {
            round_trip("ST9:0", PlcValue::Text(text));
        }

        #[test]
        fn test_generated_nstring_round_trip(text in "[ -~]{0,38}") {
            round_trip("NST10:0", PlcValue::Text(text));
        }
    }

    #[test]
    fn test_odd_length_string_layout() {
        let bytes = encode(&addr("ST9:0"), &PlcValue::from("ABC")).unwrap();
        assert_eq!(&bytes[..6], &[3, 0, b'B', b'A', b'C', 0]);
        let (v, _) = decode(&addr("ST9:0"), &bytes, &good(84));
        assert_eq!(v, PlcValue::from("ABC"));
    }
}
