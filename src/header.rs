//! EtherNet/IP encapsulation headers and frame assembly.
//!
//! A PCCC request travels as a SendRRData encapsulation frame:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | Encapsulation command (`0x6F` SendRRData) |
//! | 2 | 2 | Length of everything after the first 24 bytes |
//! | 4 | 4 | Session handle |
//! | 8 | 4 | Status |
//! | 12 | 8 | Sender context |
//! | 20 | 4 | Options |
//! | 24 | 4 | Interface handle |
//! | 28 | 2 | Timeout |
//! | 30 | 2 | Item count (2) |
//! | 32 | 4 | Null address item |
//! | 36 | 2 | Unconnected data item type (`0xB2`) |
//! | 38 | 2 | Unconnected data item length |
//! | 40 | 10 | Unconnected Send routing header (only with a connection path) |
//! | .. | 17 | Execute PCCC service header, transaction number in the last 2 bytes |
//! | .. | n | PCCC command ([`ReadCommand`](crate::ReadCommand) etc.) |
//! | .. | 0/1 | Pad byte when routed and the message length is odd |
//! | .. | m | Connection path (only when routed) |
//!
//! All multi-byte fields are little-endian.
//!
//! # Example
//!
//! ```
//! use pccc_eip::{FrameBuilder, ReadCommand, FileType};
//!
//! let cmd = ReadCommand::new(FileType::N, 7, 0, 0, 2).unwrap();
//! let frame = FrameBuilder::new(0x0102_0304, &[]).build(1, &cmd.to_bytes());
//! assert_eq!(frame.len(), 40 + 17 + 6);
//! assert_eq!(&frame[4..8], &[0x04, 0x03, 0x02, 0x01]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed encapsulation header.
pub const ENCAP_HEADER_SIZE: usize = 24;

/// Offset of the first byte after the common packet format items.
pub const CIP_HEADER_SIZE: usize = 40;

/// Size of the Unconnected Send routing header.
pub const ROUTING_HEADER_SIZE: usize = 10;

/// Size of the Execute PCCC service header.
pub const PCCC_HEADER_SIZE: usize = 17;

/// Size of a RegisterSession request and reply.
pub const REGISTER_SESSION_SIZE: usize = 28;

/// Encapsulation command: RegisterSession.
pub const CMD_REGISTER_SESSION: u8 = 0x65;

/// Encapsulation command: SendRRData.
pub const CMD_SEND_RR_DATA: u8 = 0x6F;

const REGISTER_SESSION_REQUEST: [u8; REGISTER_SESSION_SIZE] = [
    CMD_REGISTER_SESSION, 0x00, // command
    0x04, 0x00, // length
    0x00, 0x00, 0x00, 0x00, // session handle, issued by the controller
    0x00, 0x00, 0x00, 0x00, // status
    0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x0A, 0x0B, // sender context
    0x00, 0x00, 0x00, 0x00, // options
    0x01, 0x00, // protocol version
    0x00, 0x00, // option flags
];

const SEND_RR_DATA_HEADER: [u8; CIP_HEADER_SIZE] = [
    CMD_SEND_RR_DATA, 0x00, // command
    0x00, 0x00, // length, patched
    0x00, 0x00, 0x00, 0x00, // session handle, patched
    0x00, 0x00, 0x00, 0x00, // status
    0x00, 0x00, 0x00, 0x01, 0x00, 0x28, 0x1E, 0x4D, // sender context
    0x00, 0x00, 0x00, 0x00, // options
    0x00, 0x00, 0x00, 0x00, // interface handle (CIP)
    0x0A, 0x00, // timeout
    0x02, 0x00, // item count
    0x00, 0x00, 0x00, 0x00, // null address item
    0xB2, 0x00, // unconnected data item
    0x00, 0x00, // item length, patched
];

const ROUTING_HEADER: [u8; ROUTING_HEADER_SIZE] = [
    0x52, 0x02, // Unconnected Send, 2 word path
    0x20, 0x06, 0x24, 0x01, // Connection Manager, instance 1
    0x0A, 0x09, // priority/tick, timeout ticks
    0x00, 0x00, // embedded message length, patched
];

const PCCC_HEADER: [u8; PCCC_HEADER_SIZE] = [
    0x4B, 0x02, // Execute PCCC, 2 word path
    0x20, 0x67, 0x24, 0x01, // PCCC object, instance 1
    0x07, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, // requester id: length, vendor, serial
    0x0F, 0x00, // PCCC command 0x0F, status
    0x00, 0x00, // transaction number, patched
];

/// Returns a RegisterSession request.
pub fn register_session_request() -> [u8; REGISTER_SESSION_SIZE] {
    REGISTER_SESSION_REQUEST
}

/// Assembles SendRRData frames for one session.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    session: u32,
    routing: Bytes,
}

impl FrameBuilder {
    /// Creates a builder for `session`.
    ///
    /// An empty `routing` path sends the PCCC request directly; otherwise the
    /// request is wrapped in an Unconnected Send with that connection path.
    pub fn new(session: u32, routing: &[u8]) -> Self {
        Self {
            session,
            routing: Bytes::copy_from_slice(routing),
        }
    }

    /// Returns whether frames carry a routing header.
    pub fn is_routed(&self) -> bool {
        !self.routing.is_empty()
    }

    /// Builds a complete frame around a PCCC command.
    ///
    /// # Arguments
    ///
    /// * `sequence` - Transaction number echoed in the reply
    /// * `command` - Serialized PCCC command
    pub fn build(&self, sequence: u16, command: &[u8]) -> Bytes {
        let message_len = PCCC_HEADER_SIZE + command.len();
        let pad = usize::from(self.is_routed() && message_len % 2 == 1);
        let router_len = if self.is_routed() {
            ROUTING_HEADER_SIZE + pad + self.routing.len()
        } else {
            0
        };
        let total = CIP_HEADER_SIZE + router_len + message_len;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&SEND_RR_DATA_HEADER);
        if self.is_routed() {
            buf.put_slice(&ROUTING_HEADER[..ROUTING_HEADER_SIZE - 2]);
            buf.put_u16_le(message_len as u16);
        }
        buf.put_slice(&PCCC_HEADER[..PCCC_HEADER_SIZE - 2]);
        buf.put_u16_le(sequence);
        buf.put_slice(command);
        if self.is_routed() {
            if pad == 1 {
                buf.put_u8(0);
            }
            buf.put_slice(&self.routing);
        }

        buf[2..4].copy_from_slice(&((total - ENCAP_HEADER_SIZE) as u16).to_le_bytes());
        buf[4..8].copy_from_slice(&self.session.to_le_bytes());
        buf[38..40].copy_from_slice(&((message_len + router_len) as u16).to_le_bytes());
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_session_request() {
        let req = register_session_request();
        let expected = concat!(
            "65000400", "00000000", "00000000", "0a0b0c0d0e0f0a0b", "00000000", "0100", "0000",
        );
        assert_eq!(hex::encode(req), expected);
    }

    #[test]
    fn test_direct_frame() {
        let frame = FrameBuilder::new(0x1234_5678, &[]).build(2, &[0xA2, 0x02, 0x07, 0x89, 0x00, 0x00]);
        let expected = concat!(
            "6f002700", "78563412", "00000000", "0000000100281e4d", "00000000",
            "00000000", "0a00", "0200", "00000000", "b200", "1700",
            "4b02", "20672401", "07000001020304", "0f00", "0200",
            "a20207890000",
        );
        assert_eq!(hex::encode(&frame), expected);
    }

    #[test]
    fn test_routed_frame_with_pad() {
        let path = [0x01, 0x00, 0x01, 0x00];
        let frame = FrameBuilder::new(1, &path).build(0x1234, &[0xA2, 0x02, 0x07, 0x89, 0x00, 0x00]);

        assert_eq!(frame.len(), 40 + 10 + 17 + 6 + 1 + 4);
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]) as usize, frame.len() - 24);
        assert_eq!(u16::from_le_bytes([frame[38], frame[39]]), 17 + 6 + 10 + 1 + 4);
        assert_eq!(&frame[40..48], &[0x52, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0x09]);
        assert_eq!(u16::from_le_bytes([frame[48], frame[49]]), 23);
        assert_eq!(&frame[65..67], &[0x34, 0x12]);
        assert_eq!(frame[73], 0x00);
        assert_eq!(&frame[74..], &path);
    }

    #[test]
    fn test_routed_frame_without_pad() {
        let path = [0x01, 0x00, 0x01, 0x00];
        let cmd = [0xAA, 0x02, 0x07, 0x89, 0x00, 0x00, 0x01];
        let frame = FrameBuilder::new(1, &path).build(3, &cmd);
        assert_eq!(frame.len(), 40 + 10 + 17 + 7 + 4);
        assert_eq!(u16::from_le_bytes([frame[38], frame[39]]), 17 + 7 + 10 + 4);
        assert_eq!(&frame[74..], &path);
    }
}
