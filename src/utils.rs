//! Utility functions for bit manipulation, string byte order and formatting.
//!
//! # Example
//!
//! ```
//! use pccc_eip::utils::{get_bit, set_bit, pair_swap, format_hex_bytes};
//!
//! let status: u16 = 0b1010_0000_0000_0000;
//! assert!(get_bit(status, 13));   // DN
//! assert!(!get_bit(status, 14));  // TT
//! assert_eq!(set_bit(status, 14, true), 0b1110_0000_0000_0000);
//!
//! // String characters travel with each pair of bytes swapped
//! assert_eq!(pair_swap(b"BADC"), b"ABCD");
//! assert_eq!(pair_swap(b"BAC"), b"ABC");
//!
//! assert_eq!(format_hex_bytes(&[0x6F, 0x00, 0x2A]), "6f 00 2a");
//! ```

/// Returns the state of a bit in a 16-bit word.
///
/// # Arguments
///
/// * `value` - The word to test
/// * `bit` - Bit position (0-15)
///
/// # Example
///
/// ```
/// use pccc_eip::utils::get_bit;
///
/// assert!(get_bit(0x8000, 15));
/// assert!(!get_bit(0x8000, 0));
/// ```
#[inline]
pub fn get_bit(value: u16, bit: u8) -> bool {
    bit < 16 && (value >> bit) & 1 == 1
}

/// Returns a copy of `value` with one bit set or cleared.
///
/// Positions above 15 leave the word unchanged.
///
/// # Example
///
/// ```
/// use pccc_eip::utils::set_bit;
///
/// assert_eq!(set_bit(0, 13, true), 0x2000);
/// assert_eq!(set_bit(0xFFFF, 0, false), 0xFFFE);
/// ```
#[inline]
pub fn set_bit(value: u16, bit: u8, state: bool) -> u16 {
    if bit >= 16 {
        return value;
    }
    if state {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

/// Reads bit `index` from a little-endian, byte-packed bit buffer.
///
/// Returns `None` if the bit lies past the end of `bytes`.
#[inline]
pub fn packed_bit(bytes: &[u8], index: usize) -> Option<bool> {
    bytes.get(index / 8).map(|b| (b >> (index % 8)) & 1 == 1)
}

/// Swaps each adjacent pair of bytes.
///
/// PCCC strings keep two characters per word, high byte first, so the
/// characters of every pair arrive reversed. A trailing unpaired byte keeps
/// its position. Applying the swap twice returns the input.
///
/// # Example
///
/// ```
/// use pccc_eip::utils::pair_swap;
///
/// assert_eq!(pair_swap(b"ELLHO"), b"LEHLO");
/// assert_eq!(pair_swap(&pair_swap(b"HELLO")), b"HELLO");
/// ```
pub fn pair_swap(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for pair in bytes.chunks(2) {
        match pair {
            [a, b] => {
                out.push(*b);
                out.push(*a);
            }
            [a] => out.push(*a),
            _ => {}
        }
    }
    out
}

/// Formats bytes as space separated lowercase hex, for trace logging.
///
/// # Example
///
/// ```
/// use pccc_eip::utils::format_hex_bytes;
///
/// assert_eq!(format_hex_bytes(&[]), "");
/// assert_eq!(format_hex_bytes(&[0xCB, 0x00]), "cb 00");
/// ```
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}
