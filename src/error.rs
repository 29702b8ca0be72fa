use std::io;
use thiserror::Error;

use crate::DisplayPath;

/// Convenience alias for fallible engine operations.
pub type Result<T> = ::std::result::Result<T, DdcError>;

/// Malformed or unexpected DDC/CI packet contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes were read than a minimal DDC/CI response requires.
    #[error("truncated response, read {len} bytes")]
    Truncated {
        /// Number of bytes actually read.
        len: usize,
    },
    /// The response length byte did not have the protocol bit (0x80) set.
    #[error("response length byte 0x{length_byte:02x} missing protocol flag")]
    MissingProtocolFlag {
        /// The raw length byte.
        length_byte: u8,
    },
    /// The declared payload length exceeds the DDC/CI maximum.
    #[error("declared payload length {len} out of range")]
    BadDeclaredLength {
        /// Payload length declared by the length byte.
        len: usize,
    },
    /// The response source address byte was not 0x6e.
    #[error("unexpected response source address 0x{actual:02x}")]
    BadSourceAddress {
        /// The source address byte received.
        actual: u8,
    },
    /// The response checksum did not match the computed value.
    #[error("checksum mismatch, computed 0x{computed:02x}, received 0x{received:02x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        computed: u8,
        /// Checksum byte received on the wire.
        received: u8,
    },
    /// The reply opcode does not match the request that was sent.
    #[error("unexpected reply opcode 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedOpcode {
        /// Opcode the request calls for.
        expected: u8,
        /// Opcode actually received.
        actual: u8,
    },
    /// The reply echoed a different feature code than was requested.
    #[error("reply for feature 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedFeature {
        /// Feature code that was requested.
        expected: u8,
        /// Feature code echoed in the reply.
        actual: u8,
    },
    /// The payload length is invalid for the reply opcode.
    #[error("invalid payload length {len} for opcode 0x{opcode:02x}")]
    InvalidPayloadLength {
        /// Reply opcode.
        opcode: u8,
        /// Received payload length.
        len: usize,
    },
    /// The reply carried a result code that marks the response invalid.
    #[error("invalid VCP result code 0x{result:02x} for feature 0x{feature:02x}")]
    InvalidResultCode {
        /// Feature code that was requested.
        feature: u8,
        /// Result code byte from the reply.
        result: u8,
    },
}

impl PacketError {
    /// Whether the error indicates line noise or corruption worth retrying,
    /// as opposed to a structurally wrong reply.
    pub fn is_retryable(&self) -> bool {
        match self {
            PacketError::Truncated { .. }
            | PacketError::MissingProtocolFlag { .. }
            | PacketError::BadDeclaredLength { .. }
            | PacketError::BadSourceAddress { .. }
            | PacketError::ChecksumMismatch { .. } => true,
            PacketError::UnexpectedOpcode { .. }
            | PacketError::UnexpectedFeature { .. }
            | PacketError::InvalidPayloadLength { .. }
            | PacketError::InvalidResultCode { .. } => false,
        }
    }
}

/// How a display was determined not to support a feature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnsupportedReason {
    /// The reply carried the Unsupported VCP result code.
    ReportedByFlag,
    /// The display answered with the DDC null message.
    NullResponse,
    /// The reply was well formed but every value byte was zero.
    ZeroPayload,
}

/// Errors arising from DDC/CI exchanges with a display.
#[derive(Debug, Error)]
pub enum DdcError {
    /// An I/O error not covered by a more specific classification.
    #[error("i2c i/o error")]
    Io(#[source] io::Error),
    /// The display is no longer connected (ENXIO or ENODEV).
    #[error("display disconnected")]
    Disconnected(#[source] io::Error),
    /// The device is held by another driver or client (EBUSY).
    #[error("device busy")]
    Busy(#[source] io::Error),
    /// The response packet was malformed.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The display answered with the zero-length DDC null message.
    #[error("null response")]
    NullResponse,
    /// The read buffer came back entirely zero.
    #[error("response bytes all zero")]
    AllZeroResponse,
    /// The fragment offset in a multi-part reply did not match the request.
    #[error("fragment offset {actual}, expected {expected}")]
    FragmentOffsetMismatch {
        /// Offset that was requested.
        expected: u16,
        /// Offset the display reported.
        actual: u16,
    },
    /// The display does not support the requested feature.
    #[error("feature unsupported ({0:?})")]
    Unsupported(UnsupportedReason),
    /// A verified write read back a different value than was set.
    #[error("verify failed for feature 0x{feature:02x}, set 0x{expected:02x}, read back 0x{actual:02x}")]
    VerifyFailed {
        /// Feature code that was written.
        feature: u8,
        /// Low value byte that was set.
        expected: u8,
        /// Low value byte read back.
        actual: u8,
    },
    /// All retry attempts failed; carries the error from each attempt.
    #[error("{tries} tries exhausted, last error: {}", .causes.last().map(|e| e.to_string()).unwrap_or_default())]
    RetriesExhausted {
        /// Number of attempts made.
        tries: u32,
        /// Per-attempt failure causes, in order.
        causes: Vec<DdcError>,
    },
    /// DDC communication with this display was found not to work at all.
    #[error("DDC communication not working for display {0}")]
    CommunicationFailed(DisplayPath),
    /// The current thread already holds the lock for this display.
    #[error("display {0} already locked by this thread")]
    AlreadyLockedByThread(DisplayPath),
    /// The lock for this display could not be acquired in time.
    #[error("display {0} locked by another thread")]
    DisplayLocked(DisplayPath),
    /// An unlock was attempted by a thread that does not hold the lock.
    #[error("display {0} not locked by this thread")]
    NotLockOwner(DisplayPath),
}

impl DdcError {
    /// Whether a failed exchange may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DdcError::Io(_) | DdcError::NullResponse | DdcError::AllZeroResponse => true,
            DdcError::Packet(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error means the feature is unsupported rather than
    /// that communication failed.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DdcError::Unsupported(_))
    }

    /// The per-attempt causes of an exhausted retry loop, if any.
    pub fn causes(&self) -> &[DdcError] {
        match self {
            DdcError::RetriesExhausted { causes, .. } => causes,
            _ => &[],
        }
    }

    /// True for an exhausted retry loop where every attempt saw the
    /// DDC null message.
    pub fn all_causes_null(&self) -> bool {
        let causes = self.causes();
        !causes.is_empty() && causes.iter().all(|e| matches!(e, DdcError::NullResponse))
    }

    /// True for an exhausted retry loop where every attempt read back
    /// nothing but zero bytes.
    pub fn all_causes_zero(&self) -> bool {
        let causes = self.causes();
        !causes.is_empty() && causes.iter().all(|e| matches!(e, DdcError::AllZeroResponse))
    }
}

/// Classify a raw I/O error by errno.
///
/// ENXIO and ENODEV mean the display is gone. EBUSY means another
/// driver or client holds the device. Everything else stays a plain
/// I/O error and is treated as retryable.
pub(crate) fn classify_io_error(e: io::Error) -> DdcError {
    match e.raw_os_error() {
        Some(libc::ENXIO) | Some(libc::ENODEV) => DdcError::Disconnected(e),
        Some(libc::EBUSY) => DdcError::Busy(e),
        _ => DdcError::Io(e),
    }
}
