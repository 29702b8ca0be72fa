//! DDC/CI command request and response types.

use std::{fmt, mem};

use crate::error::PacketError;
use crate::packet::MAX_FRAGMENT_SIZE;

/// VCP feature code.
pub type FeatureCode = u8;

/// A DDC/CI request that can be encoded into a packet payload.
pub trait Command {
    /// The decoded response type, `()` for write-only commands.
    type Ok: CommandResult;
    /// Maximum encoded payload length.
    const MAX_LEN: usize;
    /// Delay between writing the request and reading the response.
    const DELAY_RESPONSE_MS: u64;
    /// Delay before the next command may be issued.
    const DELAY_COMMAND_MS: u64;

    /// Encoded payload length for this request.
    fn len(&self) -> usize;

    /// Encode the request payload into `data`, returning its length.
    ///
    /// Payload sizes are statically bounded, so a short buffer is a
    /// caller bug and panics.
    fn encode(&self, data: &mut [u8]) -> usize;
}

/// A response payload that can be decoded from a validated packet.
pub trait CommandResult: Sized {
    /// Maximum payload length of the response.
    const MAX_LEN: usize;

    /// Decode the payload, starting at the reply opcode byte.
    fn decode(data: &[u8]) -> Result<Self, PacketError>;
}

/// Query the current and maximum value of a non-table VCP feature.
#[derive(Copy, Clone, Debug)]
pub struct GetVcpFeature {
    /// Feature to query.
    pub code: FeatureCode,
}

impl GetVcpFeature {
    /// Query the given feature code.
    pub fn new(code: FeatureCode) -> Self {
        GetVcpFeature { code }
    }
}

impl Command for GetVcpFeature {
    type Ok = VcpResponse;
    const MAX_LEN: usize = 2;
    const DELAY_RESPONSE_MS: u64 = 40;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        2
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(data.len() >= 2);
        data[0] = 0x01;
        data[1] = self.code;
        2
    }
}

/// Set a non-table VCP feature to a 16-bit value.
#[derive(Copy, Clone, Debug)]
pub struct SetVcpFeature {
    /// Feature to set.
    pub code: FeatureCode,
    /// New value.
    pub value: u16,
}

impl SetVcpFeature {
    /// Set the given feature code to `value`.
    pub fn new(code: FeatureCode, value: u16) -> Self {
        SetVcpFeature { code, value }
    }
}

impl Command for SetVcpFeature {
    type Ok = ();
    const MAX_LEN: usize = 4;
    const DELAY_RESPONSE_MS: u64 = 0;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        4
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(data.len() >= 4);
        data[0] = 0x03;
        data[1] = self.code;
        data[2] = (self.value >> 8) as _;
        data[3] = self.value as _;
        4
    }
}

/// Instruct the display to persist its current settings.
#[derive(Copy, Clone, Debug)]
pub struct SaveCurrentSettings;

impl Command for SaveCurrentSettings {
    type Ok = ();
    const MAX_LEN: usize = 1;
    const DELAY_RESPONSE_MS: u64 = 0;
    const DELAY_COMMAND_MS: u64 = 200;

    fn len(&self) -> usize {
        1
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(!data.is_empty());
        data[0] = 0x0c;
        1
    }
}

/// Request a fragment of the capabilities string.
#[derive(Copy, Clone, Debug)]
pub struct CapabilitiesRequest {
    /// Byte offset into the capabilities string.
    pub offset: u16,
}

impl CapabilitiesRequest {
    /// Request the fragment starting at `offset`.
    pub fn new(offset: u16) -> Self {
        CapabilitiesRequest { offset }
    }
}

impl Command for CapabilitiesRequest {
    type Ok = Fragment;
    const MAX_LEN: usize = 3;
    const DELAY_RESPONSE_MS: u64 = 40;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        3
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(data.len() >= 3);
        data[0] = 0xf3;
        data[1] = (self.offset >> 8) as _;
        data[2] = self.offset as _;
        3
    }
}

/// Request a fragment of a table feature's value.
#[derive(Copy, Clone, Debug)]
pub struct TableRead {
    /// Table feature to read.
    pub code: FeatureCode,
    /// Byte offset into the table value.
    pub offset: u16,
}

impl TableRead {
    /// Request the fragment of `code` starting at `offset`.
    pub fn new(code: FeatureCode, offset: u16) -> Self {
        TableRead { code, offset }
    }
}

impl Command for TableRead {
    type Ok = Fragment;
    const MAX_LEN: usize = 4;
    const DELAY_RESPONSE_MS: u64 = 40;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        4
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(data.len() >= 4);
        data[0] = 0xe2;
        data[1] = self.code;
        data[2] = (self.offset >> 8) as _;
        data[3] = self.offset as _;
        4
    }
}

/// Write one fragment of a table feature's value.
#[derive(Copy, Clone, Debug)]
pub struct TableWrite<'a> {
    /// Table feature to write.
    pub code: FeatureCode,
    /// Byte offset of this fragment.
    pub offset: u16,
    /// Fragment bytes, at most 32.
    pub data: &'a [u8],
}

impl<'a> TableWrite<'a> {
    /// Write `data` to `code` starting at `offset`.
    pub fn new(code: FeatureCode, offset: u16, data: &'a [u8]) -> Self {
        TableWrite { code, offset, data }
    }
}

impl Command for TableWrite<'_> {
    type Ok = ();
    const MAX_LEN: usize = 4 + MAX_FRAGMENT_SIZE;
    const DELAY_RESPONSE_MS: u64 = 0;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        4 + self.data.len()
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(self.data.len() <= MAX_FRAGMENT_SIZE);
        assert!(data.len() >= 4 + self.data.len());
        data[0] = 0xe7;
        data[1] = self.code;
        data[2] = (self.offset >> 8) as _;
        data[3] = self.offset as _;
        data[4..4 + self.data.len()].copy_from_slice(self.data);
        4 + self.data.len()
    }
}

/// Request the display's timing report.
#[derive(Copy, Clone, Debug)]
pub struct GetTimingReport;

impl Command for GetTimingReport {
    type Ok = TimingReport;
    const MAX_LEN: usize = 1;
    const DELAY_RESPONSE_MS: u64 = 40;
    const DELAY_COMMAND_MS: u64 = 50;

    fn len(&self) -> usize {
        1
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        assert!(!data.is_empty());
        data[0] = 0x07;
        1
    }
}

/// Decoded Get VCP Feature reply.
///
/// Payload layout: `[0x02] [result] [feature] [type] [MH] [ML] [SH] [SL]`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct VcpResponse {
    /// Feature code echoed from the request.
    pub feature: FeatureCode,
    /// Result code byte, 0x00 for supported, 0x01 for unsupported.
    pub result: u8,
    /// VCP type byte (set parameter or momentary).
    pub kind: u8,
    /// Maximum value, high byte.
    pub mh: u8,
    /// Maximum value, low byte.
    pub ml: u8,
    /// Current value, high byte.
    pub sh: u8,
    /// Current value, low byte.
    pub sl: u8,
}

impl VcpResponse {
    /// Current feature value.
    pub fn value(&self) -> u16 {
        ((self.sh as u16) << 8) | self.sl as u16
    }

    /// Maximum feature value.
    pub fn maximum(&self) -> u16 {
        ((self.mh as u16) << 8) | self.ml as u16
    }

    /// Whether the display flagged the feature as supported.
    pub fn supported(&self) -> bool {
        self.result == 0x00
    }

    /// Whether every informative payload byte is zero, which some
    /// displays use to signal an unsupported feature.
    pub fn is_all_zero(&self) -> bool {
        self.kind == 0 && self.mh == 0 && self.ml == 0 && self.sh == 0 && self.sl == 0
    }
}

impl fmt::Debug for VcpResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VcpResponse")
            .field("feature", &format_args!("0x{:02x}", self.feature))
            .field("supported", &self.supported())
            .field("maximum", &self.maximum())
            .field("value", &self.value())
            .finish()
    }
}

impl CommandResult for VcpResponse {
    const MAX_LEN: usize = 8;

    fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data[0] != 0x02 {
            return Err(PacketError::UnexpectedOpcode {
                expected: 0x02,
                actual: data[0],
            });
        }

        if data.len() != 8 {
            return Err(PacketError::InvalidPayloadLength {
                opcode: 0x02,
                len: data.len(),
            });
        }

        match data[1] {
            0x00 | 0x01 => (),
            rc => {
                return Err(PacketError::InvalidResultCode {
                    feature: data[2],
                    result: rc,
                })
            }
        }

        Ok(VcpResponse {
            result: data[1],
            feature: data[2],
            kind: data[3],
            mh: data[4],
            ml: data[5],
            sh: data[6],
            sl: data[7],
        })
    }
}

/// One fragment of a capabilities string or table value reply.
///
/// Payload layout: `[0xe3|0xe4] [offset hi] [offset lo] [bytes..]`.
#[derive(Copy, Clone)]
pub struct Fragment {
    /// Reply opcode, 0xe3 for capabilities, 0xe4 for table read.
    pub opcode: u8,
    /// Byte offset echoed from the request.
    pub offset: u16,
    data: [u8; MAX_FRAGMENT_SIZE],
    len: u8,
}

impl Fragment {
    /// The fragment's data bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("opcode", &format_args!("0x{:02x}", self.opcode))
            .field("offset", &self.offset)
            .field("bytes", &self.bytes())
            .finish()
    }
}

impl Default for Fragment {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

impl CommandResult for Fragment {
    const MAX_LEN: usize = 35;

    fn decode(data: &[u8]) -> Result<Self, PacketError> {
        match data[0] {
            0xe3 | 0xe4 => (),
            actual => {
                return Err(PacketError::UnexpectedOpcode {
                    expected: 0xe3,
                    actual,
                })
            }
        }

        if data.len() < 3 || data.len() > Self::MAX_LEN {
            return Err(PacketError::InvalidPayloadLength {
                opcode: data[0],
                len: data.len(),
            });
        }

        let mut fragment = Fragment {
            opcode: data[0],
            offset: ((data[1] as u16) << 8) | data[2] as u16,
            ..Default::default()
        };
        let data = &data[3..];
        fragment.len = data.len() as u8;
        fragment.data[..data.len()].copy_from_slice(data);
        Ok(fragment)
    }
}

/// Decoded timing report reply.
#[derive(Copy, Clone, Debug)]
pub struct TimingReport {
    /// Timing status byte.
    pub status: u8,
    /// Horizontal frequency in units of 1/100 kHz.
    pub horizontal_frequency: u16,
    /// Vertical frequency in units of 1/100 Hz.
    pub vertical_frequency: u16,
}

impl CommandResult for TimingReport {
    const MAX_LEN: usize = 6;

    fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data[0] != 0x4e {
            return Err(PacketError::UnexpectedOpcode {
                expected: 0x4e,
                actual: data[0],
            });
        }

        if data.len() != 6 {
            return Err(PacketError::InvalidPayloadLength {
                opcode: 0x4e,
                len: data.len(),
            });
        }

        Ok(TimingReport {
            status: data[1],
            horizontal_frequency: ((data[2] as u16) << 8) | data[3] as u16,
            vertical_frequency: ((data[4] as u16) << 8) | data[5] as u16,
        })
    }
}

impl CommandResult for () {
    const MAX_LEN: usize = 0;

    fn decode(_data: &[u8]) -> Result<Self, PacketError> {
        unreachable!()
    }
}

impl<C: Command> Command for &C {
    type Ok = C::Ok;
    const MAX_LEN: usize = C::MAX_LEN;
    const DELAY_RESPONSE_MS: u64 = C::DELAY_RESPONSE_MS;
    const DELAY_COMMAND_MS: u64 = C::DELAY_COMMAND_MS;

    fn len(&self) -> usize {
        (*self).len()
    }

    fn encode(&self, data: &mut [u8]) -> usize {
        (*self).encode(data)
    }
}
