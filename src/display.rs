//! Display references and operation handles.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::commands::{
    FeatureCode, GetTimingReport, GetVcpFeature, SaveCurrentSettings, SetVcpFeature, TimingReport,
    VcpResponse,
};
use crate::error::{DdcError, PacketError, Result, UnsupportedReason};
use crate::lock::{DisplayLockRegistry, LockMode};
use crate::multipart::MultiPartRequest;
use crate::port::DdcPort;
use crate::quirks::{QuirkFlags, UnsupportedConvention};
use crate::sleep::{Delay, SleepGovernor};
use crate::transact::{RetryPolicy, RetryStats};
use crate::DisplayPath;

/// Feature holding the display's MCCS version.
const FEATURE_VCP_VERSION: FeatureCode = 0xdf;

/// Features whose value the display may legitimately change right
/// after a write, so read-back verification would report spurious
/// mismatches.
const UNVERIFIABLE_FEATURES: &[FeatureCode] = &[
    0x02, // new control value
    0x03, // soft controls
    0x60, // input select, the write may switch the input away
];

/// Identity of a display as read from its EDID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayId {
    /// Three-letter manufacturer id.
    pub manufacturer: String,
    /// Model name.
    pub model: String,
    /// Serial number string.
    pub serial: String,
}

/// Long-lived reference to a detected display.
///
/// Holds the state that must survive individual handles: the quirk
/// flags learned about the display and its adaptive sleep state.
/// Shared via `Arc` between the detection layer, open handles and
/// anything reporting statistics.
#[derive(Debug)]
pub struct DisplayRef {
    path: DisplayPath,
    id: DisplayId,
    digital_input: bool,
    quirks: Mutex<QuirkFlags>,
    governor: Mutex<SleepGovernor>,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DisplayRef {
    /// Create a reference for a display at `path`.
    ///
    /// `digital_input` comes from the EDID and steers which feature
    /// codes quirk probing may use.
    pub fn new(path: DisplayPath, id: DisplayId, digital_input: bool) -> Arc<Self> {
        Arc::new(DisplayRef {
            path,
            id,
            digital_input,
            quirks: Default::default(),
            governor: Default::default(),
        })
    }

    /// The I/O path this display is reached through.
    pub fn path(&self) -> &DisplayPath {
        &self.path
    }

    /// The display's EDID identity.
    pub fn id(&self) -> &DisplayId {
        &self.id
    }

    /// Whether the display reports a digital input in its EDID.
    pub fn has_digital_input(&self) -> bool {
        self.digital_input
    }

    /// The quirk flags learned so far.
    pub fn quirks(&self) -> QuirkFlags {
        *lock_unpoisoned(&self.quirks)
    }

    /// The unsupported-feature convention, if it has been determined.
    pub fn convention(&self) -> Option<UnsupportedConvention> {
        self.quirks().convention()
    }

    pub(crate) fn set_quirks(&self, flags: QuirkFlags) {
        lock_unpoisoned(&self.quirks).insert(flags);
    }

    pub(crate) fn governor(&self) -> MutexGuard<'_, SleepGovernor> {
        lock_unpoisoned(&self.governor)
    }

    /// The current adaptive sleep multiplier.
    pub fn sleep_multiplier(&self) -> f64 {
        self.governor().multiplier()
    }
}

/// An exclusive handle for issuing DDC/CI operations to one display.
///
/// Creation takes the display's cross-thread lock; dropping the handle
/// releases it.
#[derive(Debug)]
pub struct DisplayHandle<P> {
    pub(crate) port: P,
    dref: Arc<DisplayRef>,
    registry: &'static DisplayLockRegistry,
    pub(crate) delay: Delay,
    pub(crate) policy: RetryPolicy,
    pub(crate) stats: RetryStats,
    verify_writes: bool,
    mccs_version: Option<MccsVersion>,
}

/// MCCS version reported by a display.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MccsVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

/// A non-table VCP feature value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VcpValue {
    /// VCP type byte.
    pub kind: u8,
    /// Maximum value.
    pub maximum: u16,
    /// Current value.
    pub value: u16,
}

impl From<VcpResponse> for VcpValue {
    fn from(resp: VcpResponse) -> Self {
        VcpValue {
            kind: resp.kind,
            maximum: resp.maximum(),
            value: resp.value(),
        }
    }
}

/// Open a handle on `display` over `port`, taking the display lock
/// from the global registry.
pub fn open_display<P: DdcPort>(
    port: P,
    display: Arc<DisplayRef>,
    mode: LockMode,
) -> Result<DisplayHandle<P>> {
    DisplayHandle::open(port, display, DisplayLockRegistry::global(), mode)
}

impl<P: DdcPort> DisplayHandle<P> {
    /// Open a handle using a specific lock registry instead of the
    /// global one.
    pub fn open(
        port: P,
        dref: Arc<DisplayRef>,
        registry: &'static DisplayLockRegistry,
        mode: LockMode,
    ) -> Result<Self> {
        registry.lock(dref.path(), mode)?;
        Ok(DisplayHandle {
            port,
            dref,
            registry,
            delay: Default::default(),
            policy: Default::default(),
            stats: Default::default(),
            verify_writes: true,
            mccs_version: None,
        })
    }

    /// The display this handle operates on.
    pub fn display(&self) -> &DisplayRef {
        &self.dref
    }

    /// Borrow the underlying port.
    pub fn port_ref(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Override the default retry limits.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Enable or disable read-back verification of value writes.
    pub fn set_verify_writes(&mut self, verify: bool) {
        self.verify_writes = verify;
    }

    /// Retry statistics accumulated by this handle.
    pub fn retry_stats(&self) -> &RetryStats {
        &self.stats
    }

    /// Read a non-table feature's current and maximum value.
    ///
    /// The reply is interpreted under the display's determined
    /// unsupported-feature convention, so a null message or an
    /// all-zero payload from a display known to use them comes back as
    /// [`DdcError::Unsupported`].
    pub fn get_nontable_value(&mut self, code: FeatureCode) -> Result<VcpValue> {
        let resp = self.probe_feature(code)?;

        if resp.is_all_zero()
            && self.display().convention() == Some(UnsupportedConvention::ZeroPayload)
        {
            return Err(DdcError::Unsupported(UnsupportedReason::ZeroPayload));
        }

        Ok(resp.into())
    }

    /// Raw non-table read: the exchange and structural checks, but no
    /// reinterpretation of an all-zero payload. Quirk probing depends
    /// on seeing the display's behavior unfiltered.
    pub(crate) fn probe_feature(&mut self, code: FeatureCode) -> Result<VcpResponse> {
        let resp = self.write_read_with_retry(&GetVcpFeature::new(code), false)?;

        if resp.feature != code {
            return Err(PacketError::UnexpectedFeature {
                expected: code,
                actual: resp.feature,
            }
            .into());
        }

        if !resp.supported() {
            return Err(DdcError::Unsupported(UnsupportedReason::ReportedByFlag));
        }

        Ok(resp)
    }

    /// Set a non-table feature, verifying the write by reading the
    /// value back unless verification is disabled or the feature is
    /// one whose value legitimately moves after a write.
    pub fn set_nontable_value(&mut self, code: FeatureCode, value: u16) -> Result<()> {
        if !self.verify_writes || UNVERIFIABLE_FEATURES.contains(&code) {
            return self.write_only_with_retry(&SetVcpFeature::new(code, value));
        }

        let max_tries = self.policy.max_verify_tries;
        let mut causes = Vec::new();

        for attempt in 0..max_tries {
            self.write_only_with_retry(&SetVcpFeature::new(code, value))?;

            let readback = self.get_nontable_value(code)?;
            // only the low byte round-trips reliably on all displays
            if readback.value as u8 == value as u8 {
                return Ok(());
            }

            debug!(
                "display {}: verify attempt {} for feature 0x{:02x}: set 0x{:02x}, read back 0x{:02x}",
                self.display().path(),
                attempt + 1,
                code,
                value as u8,
                readback.value as u8
            );
            causes.push(DdcError::VerifyFailed {
                feature: code,
                expected: value as u8,
                actual: readback.value as u8,
            });
        }

        if causes.len() == 1 {
            return Err(causes.swap_remove(0));
        }
        Err(DdcError::RetriesExhausted {
            tries: max_tries,
            causes,
        })
    }

    /// Read a table feature's complete value.
    pub fn get_table_value(&mut self, code: FeatureCode) -> Result<Vec<u8>> {
        match self.multi_part_read_with_retry(MultiPartRequest::Table(code), true) {
            Ok(value) => Ok(value),
            Err(DdcError::NullResponse) => {
                Err(DdcError::Unsupported(UnsupportedReason::NullResponse))
            }
            Err(DdcError::AllZeroResponse) => {
                Err(DdcError::Unsupported(UnsupportedReason::ZeroPayload))
            }
            Err(e) if e.all_causes_null() => {
                Err(DdcError::Unsupported(UnsupportedReason::NullResponse))
            }
            Err(e) => Err(e),
        }
    }

    /// Write a table feature's complete value.
    pub fn set_table_value(&mut self, code: FeatureCode, value: &[u8]) -> Result<()> {
        self.multi_part_write(code, value)
    }

    /// Read the display's capabilities string.
    pub fn get_capabilities(&mut self) -> Result<Vec<u8>> {
        self.multi_part_read_with_retry(MultiPartRequest::Capabilities, false)
    }

    /// Tell the display to persist its current settings.
    pub fn save_current_settings(&mut self) -> Result<()> {
        self.write_only_with_retry(&SaveCurrentSettings)
    }

    /// Request the display's timing report.
    pub fn get_timing_report(&mut self) -> Result<TimingReport> {
        self.write_read_with_retry(&GetTimingReport, false)
    }

    /// The display's MCCS version, read once and cached for the life
    /// of the handle.
    pub fn mccs_version(&mut self) -> Result<MccsVersion> {
        if let Some(version) = self.mccs_version {
            return Ok(version);
        }

        let resp = self.probe_feature(FEATURE_VCP_VERSION)?;
        let version = MccsVersion {
            major: resp.sh,
            minor: resp.sl,
        };
        self.mccs_version = Some(version);
        Ok(version)
    }
}

impl<P> Drop for DisplayHandle<P> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.unlock(self.dref.path()) {
            warn!("failed to release lock for display {}: {}", self.dref.path(), e);
        }
    }
}
