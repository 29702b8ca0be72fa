//! Single-exchange execution and retry management.
//!
//! One exchange is: wait out the inter-command interval, write the
//! framed request, sleep the response delay, read and validate the
//! reply. Retryable failures are re-attempted up to a per-kind limit
//! with an escalating pause between attempts, and every outcome feeds
//! the display's sleep governor.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::commands::{Command, CommandResult};
use crate::error::{classify_io_error, DdcError, Result, UnsupportedReason};
use crate::packet::{self, ENVELOPE_LEN, MAX_REQUEST_PAYLOAD};
use crate::port::DdcPort;
use crate::quirks::QuirkFlags;
use crate::sleep::Delay;
use crate::DisplayHandle;

/// Pause before re-attempting a failed exchange, scaled by the sleep
/// multiplier.
pub const DELAY_RETRY_MS: u64 = 200;

/// Added to the retry pause after each null response, on the theory
/// that the display needs longer to produce an answer.
pub const DELAY_NULL_INCREMENT_MS: u64 = 100;

/// Inter-command interval applied after a failed exchange.
const DELAY_COMMAND_FAILED_MS: u64 = 40;

/// Retry limits for each kind of exchange.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts for write-only commands.
    pub max_write_only_tries: u32,
    /// Attempts for write-read exchanges.
    pub max_write_read_tries: u32,
    /// Attempts for a whole multi-part read.
    pub max_multi_part_tries: u32,
    /// Attempts for a verified value write.
    pub max_verify_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_write_only_tries: 4,
            max_write_read_tries: 10,
            max_multi_part_tries: 8,
            max_verify_tries: 1,
        }
    }
}

/// Success-by-attempt histogram for one kind of exchange.
#[derive(Clone, Debug, Default)]
pub struct TryCounts {
    successes: Vec<u64>,
    failures: u64,
}

impl TryCounts {
    pub(crate) fn record_success(&mut self, tries: u32) {
        let slot = tries as usize - 1;
        if self.successes.len() <= slot {
            self.successes.resize(slot + 1, 0);
        }
        self.successes[slot] += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Operations that eventually succeeded, by the attempt number
    /// that succeeded (index 0 is first-try success).
    pub fn successes(&self) -> &[u64] {
        &self.successes
    }

    /// Operations that exhausted every attempt.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Total operations recorded.
    pub fn total(&self) -> u64 {
        self.successes.iter().sum::<u64>() + self.failures
    }
}

impl fmt::Display for TryCounts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ok {:?}, {} failed", self.total() - self.failures, self.successes, self.failures)
    }
}

/// Retry statistics for a handle, split by exchange kind.
#[derive(Clone, Debug, Default)]
pub struct RetryStats {
    /// Write-only command outcomes.
    pub write_only: TryCounts,
    /// Write-read exchange outcomes.
    pub write_read: TryCounts,
    /// Multi-part read outcomes.
    pub multi_part: TryCounts,
}

impl fmt::Display for RetryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "write-only:  {}", self.write_only)?;
        writeln!(f, "write-read:  {}", self.write_read)?;
        write!(f, "multi-part:  {}", self.multi_part)
    }
}

impl<P: DdcPort> DisplayHandle<P> {
    /// Execute a write-read exchange with retries.
    ///
    /// `all_zero_ok` marks the one spot (the first fragment of a table
    /// read) where an all-zero reply is a legitimate unsupported
    /// signal rather than a transient fault.
    pub(crate) fn write_read_with_retry<C: Command>(
        &mut self,
        command: &C,
        all_zero_ok: bool,
    ) -> Result<C::Ok> {
        let max_tries = self.policy.max_write_read_tries;
        let mut causes = Vec::new();

        for attempt in 0..max_tries {
            if attempt > 0 {
                self.retry_pause(&causes);
            }

            match self.exchange_once(command) {
                Ok(ok) => {
                    self.display().governor().note_success();
                    self.stats.write_read.record_success(attempt + 1);
                    return Ok(ok);
                }
                Err(DdcError::NullResponse)
                    if self
                        .display()
                        .quirks()
                        .contains(QuirkFlags::USES_NULL_RESPONSE) =>
                {
                    // for this display the null message means
                    // "unsupported", not "try again"
                    return Err(DdcError::Unsupported(UnsupportedReason::NullResponse));
                }
                Err(DdcError::AllZeroResponse) if all_zero_ok => {
                    return Err(DdcError::AllZeroResponse);
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        "display {}: exchange attempt {} failed: {}",
                        self.display().path(),
                        attempt + 1,
                        e
                    );
                    self.display().governor().note_failure();
                    causes.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.write_read.record_failure();
        Err(DdcError::RetriesExhausted {
            tries: max_tries,
            causes,
        })
    }

    /// Execute a write-only command with retries.
    pub(crate) fn write_only_with_retry<C: Command<Ok = ()>>(&mut self, command: &C) -> Result<()> {
        let max_tries = self.policy.max_write_only_tries;
        let mut causes = Vec::new();

        for attempt in 0..max_tries {
            if attempt > 0 {
                self.retry_pause(&causes);
            }

            match self.write_once(command) {
                Ok(()) => {
                    self.display().governor().note_success();
                    self.stats.write_only.record_success(attempt + 1);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        "display {}: write attempt {} failed: {}",
                        self.display().path(),
                        attempt + 1,
                        e
                    );
                    self.display().governor().note_failure();
                    causes.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.write_only.record_failure();
        Err(DdcError::RetriesExhausted {
            tries: max_tries,
            causes,
        })
    }

    fn retry_pause(&self, causes: &[DdcError]) {
        let mut base = DELAY_RETRY_MS;
        if matches!(causes.last(), Some(DdcError::NullResponse)) {
            base += DELAY_NULL_INCREMENT_MS;
        }
        let pause = self.display().governor().scale(Duration::from_millis(base));
        thread::sleep(pause);
    }

    fn write_once<C: Command<Ok = ()>>(&mut self, command: &C) -> Result<()> {
        let mut wire = [0u8; MAX_REQUEST_PAYLOAD + ENVELOPE_LEN];
        let len = self.frame(command, &mut wire);

        self.delay.sleep();
        trace!("display {}: write {:02x?}", self.display().path(), &wire[..len]);
        let res = self.port.write(&wire[..len]).map_err(classify_io_error);
        self.note_command_done::<C>(res.is_ok());
        res
    }

    fn exchange_once<C: Command>(&mut self, command: &C) -> Result<C::Ok> {
        let mut wire = [0u8; MAX_REQUEST_PAYLOAD + ENVELOPE_LEN];
        let len = self.frame(command, &mut wire);

        self.delay.sleep();
        trace!("display {}: write {:02x?}", self.display().path(), &wire[..len]);
        let res = self.read_response::<C>(&wire[..len]);
        self.note_command_done::<C>(res.is_ok());
        res
    }

    fn read_response<C: Command>(&mut self, wire: &[u8]) -> Result<C::Ok> {
        self.port.write(wire).map_err(classify_io_error)?;

        let response_delay = self
            .display()
            .governor()
            .scale(Duration::from_millis(C::DELAY_RESPONSE_MS));
        thread::sleep(response_delay);

        let mut out = [0u8; packet::MAX_RESPONSE_PAYLOAD + ENVELOPE_LEN + 1];
        let out = &mut out[..<C::Ok as CommandResult>::MAX_LEN + ENVELOPE_LEN];
        let read = self.port.read(out).map_err(classify_io_error)?;
        trace!("display {}: read {:02x?}", self.display().path(), &out[..read]);

        if packet::is_all_zero(out) {
            return Err(DdcError::AllZeroResponse);
        }

        let payload = packet::unframe_response(out, read)?;
        if payload.is_empty() {
            return Err(DdcError::NullResponse);
        }

        C::Ok::decode(payload).map_err(Into::into)
    }

    fn frame<C: Command>(&self, command: &C, wire: &mut [u8]) -> usize {
        let mut payload = [0u8; MAX_REQUEST_PAYLOAD];
        let len = command.encode(&mut payload);
        packet::frame_request(&payload[..len], wire)
    }

    fn note_command_done<C: Command>(&mut self, ok: bool) {
        let base = if ok {
            Duration::from_millis(C::DELAY_COMMAND_MS)
        } else {
            Duration::from_millis(DELAY_COMMAND_FAILED_MS)
        };
        let scaled = self.display().governor().scale(base);
        self.delay = Delay::new(scaled);
    }
}
