//! Per-display quirk discovery.
//!
//! MCCS says an unsupported feature is reported with a result flag in
//! an otherwise well-formed reply. Real displays also answer with the
//! null message, with an all-zero payload, or claim support for
//! everything. The convention is probed once per display and cached so
//! later reads can be interpreted correctly.

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::commands::FeatureCode;
use crate::error::{DdcError, Result, UnsupportedReason};
use crate::port::DdcPort;
use crate::DisplayHandle;

/// Feature probed first: an unassigned code no display implements.
const PROBE_UNASSIGNED: FeatureCode = 0xdd;

/// Second probe on digital-input displays: an analog-only feature.
const PROBE_ANALOG_ONLY: FeatureCode = 0x41;

/// Last-resort probe: code 0x00, unassigned but answered oddly by
/// some displays.
const PROBE_ZERO: FeatureCode = 0x00;

/// Feature used to establish that DDC communication works at all.
const COMM_CHECK_FEATURE: FeatureCode = 0x10;

bitflags! {
    /// Cached facts about a display's DDC behavior.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct QuirkFlags: u16 {
        /// Communication with the display has been checked.
        const COMMUNICATION_CHECKED = 1 << 0;
        /// Communication with the display works.
        const COMMUNICATION_WORKING = 1 << 1;
        /// The device was busy when communication was last attempted.
        const BUSY = 1 << 7;
        /// The unsupported-feature convention has been determined.
        const UNSUPPORTED_CHECKED = 1 << 2;
        /// Unsupported features are reported with the MCCS result flag.
        const USES_UNSUPPORTED_FLAG = 1 << 3;
        /// Unsupported features are answered with the null message.
        const USES_NULL_RESPONSE = 1 << 4;
        /// Unsupported features are answered with an all-zero payload.
        const USES_ZERO_PAYLOAD = 1 << 5;
        /// The display claims support for every feature.
        const NEVER_INDICATES_UNSUPPORTED = 1 << 6;
    }
}

/// How a display signals that a feature is unsupported.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnsupportedConvention {
    /// The MCCS result flag, as the standard requires.
    ResultFlag,
    /// The DDC null message.
    NullMessage,
    /// A well-formed reply whose value bytes are all zero.
    ZeroPayload,
    /// No signal at all; every feature appears supported.
    NotIndicated,
}

impl QuirkFlags {
    /// The determined unsupported-feature convention, if probing has
    /// run.
    pub fn convention(self) -> Option<UnsupportedConvention> {
        if !self.contains(QuirkFlags::UNSUPPORTED_CHECKED) {
            return None;
        }
        Some(if self.contains(QuirkFlags::USES_NULL_RESPONSE) {
            UnsupportedConvention::NullMessage
        } else if self.contains(QuirkFlags::USES_ZERO_PAYLOAD) {
            UnsupportedConvention::ZeroPayload
        } else if self.contains(QuirkFlags::NEVER_INDICATES_UNSUPPORTED) {
            UnsupportedConvention::NotIndicated
        } else {
            UnsupportedConvention::ResultFlag
        })
    }
}

/// Outcome of probing one feature code that should be unsupported.
#[derive(Debug)]
enum Probe {
    /// The display reported unsupported with the MCCS result flag.
    ReportedByFlag,
    /// The display answered with an all-zero payload.
    ZeroPayload,
    /// Every attempt was answered with the null message.
    AllNull,
    /// The display claims the feature is supported.
    ClaimsSupport,
    /// Transient errors only; nothing can be concluded.
    Inconclusive,
}

impl<P: DdcPort> DisplayHandle<P> {
    /// Verify that DDC communication works at all, probing with the
    /// luminance feature on first call. Later calls return the cached
    /// verdict.
    pub fn ensure_communication(&mut self) -> Result<()> {
        let flags = self.display().quirks();
        if flags.contains(QuirkFlags::COMMUNICATION_CHECKED) {
            return if flags.contains(QuirkFlags::COMMUNICATION_WORKING) {
                Ok(())
            } else {
                Err(DdcError::CommunicationFailed(self.display().path().clone()))
            };
        }

        let result = self.probe_feature(COMM_CHECK_FEATURE);
        let mut verdict = QuirkFlags::COMMUNICATION_CHECKED;
        match result {
            Ok(_) => {
                verdict |= QuirkFlags::COMMUNICATION_WORKING;
            }
            // any answer at all, even "unsupported", means the channel works
            Err(e) if e.is_unsupported() => {
                verdict |= QuirkFlags::COMMUNICATION_WORKING;
            }
            Err(e @ DdcError::Disconnected(_)) => {
                return Err(e);
            }
            Err(e @ DdcError::Busy(_)) => {
                // a busy device may come back, so don't record a verdict
                self.display().set_quirks(QuirkFlags::BUSY);
                return Err(e);
            }
            Err(e) => {
                debug!(
                    "display {}: communication check failed: {}",
                    self.display().path(),
                    e
                );
            }
        }
        self.display().set_quirks(verdict);

        if verdict.contains(QuirkFlags::COMMUNICATION_WORKING) {
            Ok(())
        } else {
            Err(DdcError::CommunicationFailed(self.display().path().clone()))
        }
    }

    /// Determine how this display signals an unsupported feature.
    ///
    /// Idempotent: once a convention is recorded no further traffic is
    /// generated. Requires working communication, probes a sequence of
    /// feature codes known to be unimplemented, and records the first
    /// decisive observation.
    pub fn determine_unsupported_convention(&mut self) -> Result<()> {
        if self
            .display()
            .quirks()
            .contains(QuirkFlags::UNSUPPORTED_CHECKED)
        {
            return Ok(());
        }

        self.ensure_communication()?;

        // adaptation would train on deliberate failures
        self.display().governor().force(Some(1.0));
        let result = self.probe_convention();
        self.display().governor().force(None);

        let convention = result?;
        self.display()
            .set_quirks(convention | QuirkFlags::UNSUPPORTED_CHECKED);
        info!(
            "display {}: unsupported convention {:?}",
            self.display().path(),
            self.display().quirks().convention()
        );
        Ok(())
    }

    fn probe_convention(&mut self) -> Result<QuirkFlags> {
        let mut codes = vec![PROBE_UNASSIGNED];
        if self.display().has_digital_input() {
            codes.push(PROBE_ANALOG_ONLY);
        }
        codes.push(PROBE_ZERO);

        let mut last = Probe::Inconclusive;
        for code in codes {
            last = self.probe_one(code)?;
            match last {
                Probe::ReportedByFlag => return Ok(QuirkFlags::USES_UNSUPPORTED_FLAG),
                Probe::ZeroPayload => return Ok(QuirkFlags::USES_ZERO_PAYLOAD),
                Probe::AllNull => return Ok(QuirkFlags::USES_NULL_RESPONSE),
                // a "supported" answer for a bogus code is not decisive
                // by itself, the next probe may still get a real signal
                Probe::ClaimsSupport | Probe::Inconclusive => continue,
            }
        }

        Ok(match last {
            Probe::ClaimsSupport => {
                warn!(
                    "display {}: reports support for unassigned features",
                    self.display().path()
                );
                QuirkFlags::NEVER_INDICATES_UNSUPPORTED
            }
            _ => {
                warn!(
                    "display {}: probes inconclusive, assuming standard convention",
                    self.display().path()
                );
                QuirkFlags::USES_UNSUPPORTED_FLAG
            }
        })
    }

    fn probe_one(&mut self, code: FeatureCode) -> Result<Probe> {
        debug!(
            "display {}: probing unimplemented feature 0x{:02x}",
            self.display().path(),
            code
        );
        Ok(match self.probe_feature(code) {
            Ok(resp) if resp.is_all_zero() => Probe::ZeroPayload,
            Ok(_) => Probe::ClaimsSupport,
            Err(DdcError::Unsupported(UnsupportedReason::ReportedByFlag)) => Probe::ReportedByFlag,
            Err(e @ DdcError::Disconnected(_)) | Err(e @ DdcError::Busy(_)) => return Err(e),
            Err(e) if e.all_causes_null() => Probe::AllNull,
            Err(e) if e.all_causes_zero() => Probe::ZeroPayload,
            Err(_) => Probe::Inconclusive,
        })
    }
}
