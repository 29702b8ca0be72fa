//! DDC/CI wire framing.
//!
//! Requests are written to the display as
//! `[0x51] [0x80|len] [payload..] [checksum]`, responses read back as
//! `[0x6e] [0x80|len] [payload..] [checksum]`. The checksum is the XOR
//! of every packet byte seeded with the I2C address byte for the
//! direction of travel.

use crate::error::PacketError;
use crate::{I2C_ADDRESS_DDC_CI, SUB_ADDRESS_DDC_CI};

/// Largest payload of a single response fragment (offset bytes plus
/// 32 bytes of data).
pub const MAX_FRAGMENT_SIZE: usize = 32;

/// Largest request payload: a table write carrying 32 data bytes.
pub const MAX_REQUEST_PAYLOAD: usize = 36;

/// Largest response payload: reply opcode, offset and a full fragment.
pub const MAX_RESPONSE_PAYLOAD: usize = 35;

/// Bytes of envelope around a payload: address, length, checksum.
pub const ENVELOPE_LEN: usize = 3;

/// Source address byte carried by every display response.
pub const RESPONSE_SOURCE_ADDRESS: u8 = (I2C_ADDRESS_DDC_CI as u8) << 1;

/// Which direction a packet travels, for checksum seeding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host writing to the display: seeded with the display's write
    /// address byte.
    HostToDisplay,
    /// Display responding to the host: seeded with the host's virtual
    /// address 0x50 XOR the display's write address byte.
    DisplayToHost,
}

impl Direction {
    fn seed(self) -> u8 {
        match self {
            Direction::HostToDisplay => RESPONSE_SOURCE_ADDRESS,
            Direction::DisplayToHost => 0x50 ^ RESPONSE_SOURCE_ADDRESS,
        }
    }
}

/// XOR checksum over the given bytes, seeded for the packet direction.
pub fn checksum<I: IntoIterator<Item = u8>>(direction: Direction, bytes: I) -> u8 {
    bytes.into_iter().fold(direction.seed(), |sum, v| sum ^ v)
}

/// Frame a request payload into `out`, returning the number of bytes
/// to put on the wire.
///
/// Payload sizes are fixed per command, so an oversized payload or an
/// undersized buffer is a caller bug and panics.
pub fn frame_request(payload: &[u8], out: &mut [u8]) -> usize {
    assert!(payload.len() <= MAX_REQUEST_PAYLOAD);
    assert!(out.len() >= payload.len() + ENVELOPE_LEN);

    out[0] = SUB_ADDRESS_DDC_CI;
    out[1] = 0x80 | payload.len() as u8;
    out[2..2 + payload.len()].copy_from_slice(payload);
    out[2 + payload.len()] = checksum(
        Direction::HostToDisplay,
        out[..2 + payload.len()].iter().cloned(),
    );

    payload.len() + ENVELOPE_LEN
}

/// Validate a response envelope and return the payload slice.
///
/// `read` is the number of bytes the device actually produced. An
/// empty payload (the DDC null message) is returned as an empty slice
/// for the caller to classify.
pub fn unframe_response(raw: &[u8], read: usize) -> Result<&[u8], PacketError> {
    if read < 2 {
        return Err(PacketError::Truncated { len: read });
    }

    if raw[0] != RESPONSE_SOURCE_ADDRESS {
        return Err(PacketError::BadSourceAddress { actual: raw[0] });
    }

    if raw[1] & 0x80 == 0 {
        return Err(PacketError::MissingProtocolFlag { length_byte: raw[1] });
    }

    let len = (raw[1] & 0x7f) as usize;
    if len > MAX_RESPONSE_PAYLOAD {
        return Err(PacketError::BadDeclaredLength { len });
    }
    if read < len + ENVELOPE_LEN || raw.len() < len + ENVELOPE_LEN {
        return Err(PacketError::Truncated { len: read });
    }

    let computed = checksum(Direction::DisplayToHost, raw[1..2 + len].iter().cloned());
    if raw[2 + len] != computed {
        return Err(PacketError::ChecksumMismatch {
            computed,
            received: raw[2 + len],
        });
    }

    Ok(&raw[2..2 + len])
}

/// Whether an entire read buffer is zero, which some displays produce
/// in place of any response at all.
pub fn is_all_zero(raw: &[u8]) -> bool {
    raw.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_request_direction() {
        // Get VCP Feature for luminance: 0x6e 0x51 0x82 0x01 0x10 -> 0xac
        let sum = checksum(
            Direction::HostToDisplay,
            [0x51, 0x82, 0x01, 0x10].iter().cloned(),
        );
        assert_eq!(sum, 0xac);
        // Capabilities request at offset 0x01f5
        let sum = checksum(
            Direction::HostToDisplay,
            [0x51, 0x82, 0xf5, 0x01].iter().cloned(),
        );
        assert_eq!(sum, 0x49);
    }

    #[test]
    fn checksum_response_direction() {
        let sum = checksum(Direction::DisplayToHost, [0x82, 0xa1, 0x00].iter().cloned());
        assert_eq!(sum, 0x1d);
        // the null message
        let sum = checksum(Direction::DisplayToHost, [0x80].iter().cloned());
        assert_eq!(sum, 0xbe);
    }

    #[test]
    fn frame_and_unframe() {
        let mut wire = [0u8; MAX_REQUEST_PAYLOAD + ENVELOPE_LEN];
        let n = frame_request(&[0x01, 0x10], &mut wire);
        assert_eq!(&wire[..n], &[0x51, 0x82, 0x01, 0x10, 0xac]);

        let mut resp = [0u8; 16];
        resp[0] = RESPONSE_SOURCE_ADDRESS;
        resp[1] = 0x83;
        resp[2..5].copy_from_slice(&[0xe3, 0x00, 0x00]);
        resp[5] = checksum(Direction::DisplayToHost, resp[1..5].iter().cloned());
        let payload = unframe_response(&resp, 6).unwrap();
        assert_eq!(payload, &[0xe3, 0x00, 0x00]);
    }

    #[test]
    fn null_message_unframes_empty() {
        let raw = [RESPONSE_SOURCE_ADDRESS, 0x80, 0xbe];
        let payload = unframe_response(&raw, 3).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn corrupt_checksum_detected() {
        let mut resp = [0u8; 16];
        resp[0] = RESPONSE_SOURCE_ADDRESS;
        resp[1] = 0x82;
        resp[2] = 0x01;
        resp[3] = 0x10;
        resp[4] = checksum(Direction::DisplayToHost, resp[1..4].iter().cloned());
        assert!(unframe_response(&resp, 5).is_ok());

        // any single bit flip must be caught
        resp[3] ^= 0x04;
        assert!(matches!(
            unframe_response(&resp, 5),
            Err(PacketError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn envelope_validation() {
        assert_eq!(
            unframe_response(&[0x6e], 1),
            Err(PacketError::Truncated { len: 1 })
        );
        assert_eq!(
            unframe_response(&[0x00, 0x82, 0, 0, 0], 5),
            Err(PacketError::BadSourceAddress { actual: 0 })
        );
        assert_eq!(
            unframe_response(&[0x6e, 0x02, 0, 0, 0], 5),
            Err(PacketError::MissingProtocolFlag { length_byte: 0x02 })
        );
        assert_eq!(
            unframe_response(&[0x6e, 0x80 | 36, 0, 0, 0], 5),
            Err(PacketError::BadDeclaredLength { len: 36 })
        );
    }
}
