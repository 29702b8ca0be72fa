//! Multi-fragment reads and writes.
//!
//! Capabilities strings and table values travel in up-to-32-byte
//! fragments addressed by offset. Reads walk the offsets until a
//! zero-length fragment terminates the value; a fragment whose echoed
//! offset disagrees with the request aborts the whole read, since the
//! display's position can no longer be trusted. Failed reads restart
//! from offset zero. Writes stop at the first failure, there are no
//! partial-success semantics.

use log::debug;

use crate::commands::{CapabilitiesRequest, FeatureCode, TableRead, TableWrite};
use crate::error::{DdcError, Result};
use crate::packet::MAX_FRAGMENT_SIZE;
use crate::port::DdcPort;
use crate::DisplayHandle;

/// Payload room left for table-write data after the opcode, feature
/// and offset bytes.
pub const TABLE_WRITE_FRAGMENT_SIZE: usize = MAX_FRAGMENT_SIZE - 4;

/// What a multi-part read is fetching.
#[derive(Copy, Clone, Debug)]
pub(crate) enum MultiPartRequest {
    /// The capabilities string (request 0xf3, reply 0xe3).
    Capabilities,
    /// A table feature value (request 0xe2, reply 0xe4).
    Table(FeatureCode),
}

impl MultiPartRequest {
    fn reply_opcode(self) -> u8 {
        match self {
            MultiPartRequest::Capabilities => 0xe3,
            MultiPartRequest::Table(_) => 0xe4,
        }
    }
}

impl<P: DdcPort> DisplayHandle<P> {
    /// Read a complete multi-fragment value, restarting from scratch
    /// on retryable failure.
    pub(crate) fn multi_part_read_with_retry(
        &mut self,
        request: MultiPartRequest,
        all_zero_ok: bool,
    ) -> Result<Vec<u8>> {
        let max_tries = self.policy.max_multi_part_tries;
        let mut causes = Vec::new();

        for attempt in 0..max_tries {
            match self.try_multi_part_read(request, all_zero_ok) {
                Ok(value) => {
                    self.stats.multi_part.record_success(attempt + 1);
                    return Ok(value);
                }
                // an exhausted fragment exchange is worth one more
                // pass over the whole value, unless the display is
                // consistently signaling "unsupported"
                Err(e @ DdcError::RetriesExhausted { .. })
                    if !e.all_causes_null() && !e.all_causes_zero() =>
                {
                    debug!(
                        "display {}: multi-part read attempt {} failed: {}",
                        self.display().path(),
                        attempt + 1,
                        e
                    );
                    causes.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.multi_part.record_failure();
        Err(DdcError::RetriesExhausted {
            tries: max_tries,
            causes,
        })
    }

    fn try_multi_part_read(
        &mut self,
        request: MultiPartRequest,
        all_zero_ok: bool,
    ) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        let mut offset = 0u16;

        loop {
            // an all-zero reply only counts as an unsupported signal
            // before any fragment has arrived
            let zero_ok = all_zero_ok && offset == 0;
            let fragment = match request {
                MultiPartRequest::Capabilities => {
                    self.write_read_with_retry(&CapabilitiesRequest::new(offset), zero_ok)?
                }
                MultiPartRequest::Table(code) => {
                    self.write_read_with_retry(&TableRead::new(code, offset), zero_ok)?
                }
            };

            if fragment.opcode != request.reply_opcode() {
                return Err(crate::error::PacketError::UnexpectedOpcode {
                    expected: request.reply_opcode(),
                    actual: fragment.opcode,
                }
                .into());
            }

            if fragment.offset != offset {
                return Err(DdcError::FragmentOffsetMismatch {
                    expected: offset,
                    actual: fragment.offset,
                });
            }

            if fragment.bytes().is_empty() {
                break;
            }

            value.extend_from_slice(fragment.bytes());
            offset += fragment.bytes().len() as u16;
        }

        Ok(value)
    }

    /// Write a complete table value as a sequence of fragments
    /// followed by a zero-length terminator.
    pub(crate) fn multi_part_write(&mut self, code: FeatureCode, value: &[u8]) -> Result<()> {
        let mut offset = 0u16;
        for chunk in value.chunks(TABLE_WRITE_FRAGMENT_SIZE) {
            self.write_only_with_retry(&TableWrite::new(code, offset, chunk))?;
            offset += chunk.len() as u16;
        }
        self.write_only_with_retry(&TableWrite::new(code, offset, &[]))
    }
}
