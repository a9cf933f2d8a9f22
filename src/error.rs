//! Error types for the PCCC client.
//!
//! Errors fall into two groups. Item-level problems (a bad address, a
//! controller status code, a timed-out packet) degrade the quality of the
//! affected item and never abort a batch. Connection-level problems (a frame
//! that fails validation, a socket failure) tear the session down.
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | [`PcccError::InvalidAddress`] | item | item dropped from the batch |
//! | [`PcccError::PcccStatus`] | item | item quality BAD |
//! | [`PcccError::MalformedReply`] | item | item quality BAD |
//! | [`PcccError::Timeout`] | item / registration | BAD, or reset when registering |
//! | [`PcccError::Protocol`] | connection | reset unless [`ProtocolError::is_fatal`] is false |
//! | [`PcccError::Io`] | connection | reset |

use std::io;
use thiserror::Error;

/// Result type alias for PCCC operations.
pub type Result<T> = std::result::Result<T, PcccError>;

/// Errors that can occur while talking to a controller.
#[derive(Debug, Error)]
pub enum PcccError {
    /// A symbolic address could not be resolved.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The address as supplied (after translation).
        address: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A value cannot be encoded for the target address.
    #[error("Invalid value for '{address}': {reason}")]
    InvalidValue {
        /// Target address.
        address: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// A frame failed encapsulation-level validation.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The controller rejected a PCCC command.
    #[error("PCCC status 0x{code:02X}")]
    PcccStatus {
        /// Status byte from the reply.
        code: u8,
    },

    /// A PCCC reply payload did not have the expected shape.
    #[error("Malformed reply: {reason}")]
    MalformedReply {
        /// Description of the problem.
        reason: String,
    },

    /// Communication timeout.
    #[error("Communication timeout")]
    Timeout,

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The session is not established.
    #[error("Not connected")]
    NotConnected,

    /// A write is already queued or in flight.
    #[error("A write is already in progress")]
    WriteInProgress,

    /// The connection was closed before the operation completed.
    #[error("Disconnected")]
    Disconnected,

    /// `Client::new` was called outside a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The client's driver task is gone.
    #[error("Client closed")]
    ClientClosed,
}

impl PcccError {
    /// Creates a new `InvalidAddress` error.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::PcccError;
    ///
    /// let err = PcccError::invalid_address("X9:0", "unsupported file type 'X'");
    /// ```
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::PcccError;
    ///
    /// let err = PcccError::invalid_parameter("max_parallel", "must be greater than 0");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidValue` error.
    pub fn invalid_value(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `MalformedReply` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedReply {
            reason: reason.into(),
        }
    }
}

/// Encapsulation-level frame validation failures, one per decode check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes than an encapsulation header.
    #[error("frame too short: {len} bytes")]
    FrameTooShort {
        /// Received length.
        len: usize,
    },

    /// The echoed session handle does not match ours.
    #[error("session handle mismatch: expected 0x{expected:08X}, received 0x{received:08X}")]
    SessionMismatch {
        /// Handle issued at registration.
        expected: u32,
        /// Handle found in the frame.
        received: u32,
    },

    /// Non-zero encapsulation status word.
    #[error("encapsulation status 0x{status:08X}")]
    EncapsulationStatus {
        /// Status word.
        status: u32,
    },

    /// The frame is not a SendRRData reply.
    #[error("unexpected encapsulation command 0x{command:02X}")]
    UnexpectedCommand {
        /// Command byte at offset 0.
        command: u8,
    },

    /// The declared length claims more bytes than were received.
    #[error("declared length {declared} exceeds received {received}")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Bytes available after the header.
        received: usize,
    },

    /// Interface handle or null address item is not zero.
    #[error("unexpected CIP fields: interface 0x{interface:08X}, address item length {address_length}")]
    CipStatus {
        /// Interface handle.
        interface: u32,
        /// Null address item length.
        address_length: u16,
    },

    /// The data item length disagrees with the encapsulation length.
    #[error("data item length {declared} does not match expected {expected}")]
    DataItemLength {
        /// Length from the data item.
        declared: u16,
        /// Length implied by the encapsulation header.
        expected: u16,
    },

    /// The CIP reply service is not a successful PCCC execute reply.
    #[error("CIP service reply {reply:02X?}")]
    ServiceRejected {
        /// Reply service, reserved byte and general status.
        reply: [u8; 4],
    },

    /// The PCCC payload is too short to carry a transaction number.
    #[error("PCCC payload too short: {len} bytes")]
    PayloadTooShort {
        /// Payload length.
        len: usize,
    },

    /// The session registration reply was not accepted.
    #[error("session registration rejected: {reason}")]
    Registration {
        /// Which check failed.
        reason: &'static str,
    },
}

impl ProtocolError {
    /// Returns whether the failure should tear down the connection.
    ///
    /// A rejected service reply is dropped instead; the owning packet is left
    /// to time out. This happens while an ENI module is still powering up.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::ServiceRejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_display() {
        let err = PcccError::invalid_address("Q7:0", "unsupported file type 'Q'");
        assert_eq!(
            err.to_string(),
            "Invalid address 'Q7:0': unsupported file type 'Q'"
        );
    }

    #[test]
    fn test_pccc_status_display() {
        let err = PcccError::PcccStatus { code: 0x10 };
        assert_eq!(err.to_string(), "PCCC status 0x10");
    }

    #[test]
    fn test_protocol_error_wraps() {
        let err: PcccError = ProtocolError::SessionMismatch {
            expected: 1,
            received: 2,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Protocol error: session handle mismatch: expected 0x00000001, received 0x00000002"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(ProtocolError::FrameTooShort { len: 3 }.is_fatal());
        assert!(ProtocolError::EncapsulationStatus { status: 1 }.is_fatal());
        assert!(!ProtocolError::ServiceRejected {
            reply: [0xCB, 0, 8, 0]
        }
        .is_fatal());
    }
}
