//! Reply frame validation and PCCC payload parsing.
//!
//! A SendRRData reply is validated in a fixed order; the first failing check
//! decides the [`ProtocolError`] returned:
//!
//! | # | Check | Error |
//! |---|-------|-------|
//! | 1 | at least 24 bytes | [`ProtocolError::FrameTooShort`] |
//! | 2 | session handle matches | [`ProtocolError::SessionMismatch`] |
//! | 3 | encapsulation status is zero | [`ProtocolError::EncapsulationStatus`] |
//! | 4 | command byte is `0x6F` | [`ProtocolError::UnexpectedCommand`] |
//! | 5 | declared length fits in the frame | [`ProtocolError::LengthMismatch`] |
//! | 6 | interface handle and null address item are zero | [`ProtocolError::CipStatus`] |
//! | 7 | data item length is declared length - 16 | [`ProtocolError::DataItemLength`] |
//! | 8 | reply service is `CB 00 00 00` | [`ProtocolError::ServiceRejected`] |
//!
//! The PCCC payload following the service reply starts with the requester id
//! (7 bytes), then the reply command, a status byte and the transaction
//! number. Read replies carry data after that.
//!
//! # Example
//!
//! ```
//! use pccc_eip::response::parse_read_payload;
//!
//! let payload = [0x07, 0, 0, 0, 0, 0, 0, 0x4F, 0x00, 0x01, 0x00, 0x2A, 0x00];
//! assert_eq!(parse_read_payload(&payload, 2).unwrap(), &[0x2A, 0x00]);
//! ```

use bytes::Bytes;

use crate::error::{PcccError, ProtocolError, Result};
use crate::header::{
    CIP_HEADER_SIZE, CMD_REGISTER_SESSION, CMD_SEND_RR_DATA, ENCAP_HEADER_SIZE,
    REGISTER_SESSION_SIZE,
};

/// Offset of the PCCC payload in a reply frame.
pub const REPLY_PAYLOAD_OFFSET: usize = CIP_HEADER_SIZE + 4;

/// Smallest payload that carries a transaction number.
pub const MIN_PAYLOAD_SIZE: usize = 11;

/// Successful Execute PCCC reply service.
const SERVICE_REPLY_OK: [u8; 4] = [0xCB, 0x00, 0x00, 0x00];

/// Reply command byte for typed logical commands (`0x0F | 0x40`).
const PCCC_REPLY_COMMAND: u8 = 0x4F;

/// One validated reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReply {
    /// Transaction number echoed from the request.
    pub sequence: u16,
    /// PCCC payload, starting at the requester id.
    pub payload: Bytes,
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Validates a RegisterSession reply and returns the issued session handle.
///
/// # Errors
///
/// Returns [`ProtocolError::Registration`] naming the first check that failed.
pub fn parse_registration(data: &[u8]) -> std::result::Result<u32, ProtocolError> {
    if data.len() < REGISTER_SESSION_SIZE {
        return Err(ProtocolError::Registration {
            reason: "reply shorter than 28 bytes",
        });
    }
    if data[0] != CMD_REGISTER_SESSION {
        return Err(ProtocolError::Registration {
            reason: "not a RegisterSession reply",
        });
    }
    if data[2] != 0x04 {
        return Err(ProtocolError::Registration {
            reason: "unexpected reply length",
        });
    }
    if u32_at(data, 8) != 0 {
        return Err(ProtocolError::Registration {
            reason: "non-zero encapsulation status",
        });
    }
    Ok(u32_at(data, 4))
}

/// Decodes every frame in `data`.
///
/// When the buffer is longer than the first frame's declared length the
/// remainder is decoded as an independent frame, so a controller that batches
/// two replies into one segment loses neither.
pub fn decode_frames(data: Bytes, session: u32) -> Vec<std::result::Result<DecodedReply, ProtocolError>> {
    let mut out = Vec::with_capacity(1);
    let mut rest = data;
    loop {
        if rest.len() < ENCAP_HEADER_SIZE {
            out.push(Err(ProtocolError::FrameTooShort { len: rest.len() }));
            break;
        }
        let end = usize::from(u16_at(&rest, 2)) + ENCAP_HEADER_SIZE;
        if rest.len() > end {
            let frame = rest.split_to(end);
            out.push(decode_frame(frame, session));
        } else {
            out.push(decode_frame(rest, session));
            break;
        }
    }
    out
}

/// Validates a single reply frame and extracts its PCCC payload.
pub fn decode_frame(frame: Bytes, session: u32) -> std::result::Result<DecodedReply, ProtocolError> {
    let len = frame.len();
    if len < ENCAP_HEADER_SIZE {
        return Err(ProtocolError::FrameTooShort { len });
    }
    let received = u32_at(&frame, 4);
    if received != session {
        return Err(ProtocolError::SessionMismatch {
            expected: session,
            received,
        });
    }
    let status = u32_at(&frame, 8);
    if status != 0 {
        return Err(ProtocolError::EncapsulationStatus { status });
    }
    if frame[0] != CMD_SEND_RR_DATA {
        return Err(ProtocolError::UnexpectedCommand { command: frame[0] });
    }
    let declared = usize::from(u16_at(&frame, 2));
    if declared > len - ENCAP_HEADER_SIZE {
        return Err(ProtocolError::LengthMismatch {
            declared,
            received: len - ENCAP_HEADER_SIZE,
        });
    }
    if len < REPLY_PAYLOAD_OFFSET {
        return Err(ProtocolError::FrameTooShort { len });
    }
    let interface = u32_at(&frame, 24);
    let address_length = u16_at(&frame, 34);
    if interface != 0 || address_length != 0 {
        return Err(ProtocolError::CipStatus {
            interface,
            address_length,
        });
    }
    let item_length = u16_at(&frame, 38);
    let expected = declared.saturating_sub(16) as u16;
    if item_length != expected {
        return Err(ProtocolError::DataItemLength {
            declared: item_length,
            expected,
        });
    }
    let mut reply = [0u8; 4];
    reply.copy_from_slice(&frame[CIP_HEADER_SIZE..REPLY_PAYLOAD_OFFSET]);
    if reply != SERVICE_REPLY_OK {
        return Err(ProtocolError::ServiceRejected { reply });
    }

    let end = declared + ENCAP_HEADER_SIZE;
    let payload = if end > REPLY_PAYLOAD_OFFSET {
        frame.slice(REPLY_PAYLOAD_OFFSET..end)
    } else {
        Bytes::new()
    };
    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooShort { len: payload.len() });
    }
    Ok(DecodedReply {
        sequence: u16_at(&payload, 9),
        payload,
    })
}

/// Validates a read reply payload and returns its data bytes.
///
/// # Arguments
///
/// * `payload` - PCCC payload from [`DecodedReply`]
/// * `expected` - Byte count requested by the read command
///
/// # Errors
///
/// * [`PcccError::MalformedReply`] if the payload is not a typed read reply or
///   carries the wrong number of bytes
/// * [`PcccError::PcccStatus`] if the controller reported an error
pub fn parse_read_payload(payload: &[u8], expected: usize) -> Result<&[u8]> {
    if payload.len() < 9 {
        return Err(PcccError::malformed(format!(
            "read reply of {} bytes",
            payload.len()
        )));
    }
    if payload[0] != 0x07 || payload[7] != PCCC_REPLY_COMMAND {
        return Err(PcccError::malformed("not a typed read reply"));
    }
    if payload[8] != 0 {
        return Err(PcccError::PcccStatus { code: payload[8] });
    }
    let data = payload.get(MIN_PAYLOAD_SIZE..).unwrap_or_default();
    if data.len() != expected {
        return Err(PcccError::malformed(format!(
            "expected {} data bytes, received {}",
            expected,
            data.len()
        )));
    }
    Ok(data)
}

/// Validates a write reply payload.
///
/// # Errors
///
/// * [`PcccError::MalformedReply`] if the payload is not a typed write reply
/// * [`PcccError::PcccStatus`] if the controller reported an error
pub fn parse_write_payload(payload: &[u8]) -> Result<()> {
    let id_len = payload
        .first()
        .map(|b| usize::from(*b))
        .ok_or_else(|| PcccError::malformed("empty write reply"))?;
    if payload.len() < id_len + 4 || payload[id_len] != PCCC_REPLY_COMMAND {
        return Err(PcccError::malformed("not a typed write reply"));
    }
    match payload[id_len + 1] {
        0 => Ok(()),
        code => Err(PcccError::PcccStatus { code }),
    }
}

/// Reply builders shared by the unit tests of the engine and client.
#[cfg(test)]
pub(crate) mod testing {
    use crate::header::{register_session_request, CMD_SEND_RR_DATA};

    /// RegisterSession reply issuing `session`.
    pub(crate) fn registration_reply(session: u32) -> Vec<u8> {
        let mut frame = register_session_request().to_vec();
        frame[4..8].copy_from_slice(&session.to_le_bytes());
        frame
    }

    /// SendRRData reply frame around a PCCC payload.
    pub(crate) fn reply_frame(session: u32, payload: &[u8]) -> Vec<u8> {
        let total = 44 + payload.len();
        let mut frame = vec![0u8; 40];
        frame[0] = CMD_SEND_RR_DATA;
        frame[2..4].copy_from_slice(&((total - 24) as u16).to_le_bytes());
        frame[4..8].copy_from_slice(&session.to_le_bytes());
        frame[30] = 0x02;
        frame[36] = 0xB2;
        frame[38..40].copy_from_slice(&((total - 40) as u16).to_le_bytes());
        frame.extend_from_slice(&[0xCB, 0x00, 0x00, 0x00]);
        frame.extend_from_slice(payload);
        frame
    }

    /// PCCC reply payload with status and trailing data.
    pub(crate) fn pccc_payload(sequence: u16, status: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x07, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x4F, status];
        payload.extend_from_slice(&sequence.to_le_bytes());
        payload.extend_from_slice(data);
        payload
    }

    /// Complete read reply frame.
    pub(crate) fn read_reply(session: u32, sequence: u16, data: &[u8]) -> Vec<u8> {
        reply_frame(session, &pccc_payload(sequence, 0, data))
    }

    /// Complete write reply frame.
    pub(crate) fn write_reply(session: u32, sequence: u16, status: u8) -> Vec<u8> {
        reply_frame(session, &pccc_payload(sequence, status, &[]))
    }
}
