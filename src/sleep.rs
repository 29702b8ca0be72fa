//! Inter-command delays and adaptive sleep scaling.

use std::thread;
use std::time::{Duration, Instant};

/// Floor for the adaptive multiplier.
pub const MULTIPLIER_FLOOR: f64 = 1.0;

/// Ceiling for the adaptive multiplier.
pub const MULTIPLIER_CEILING: f64 = 4.0;

/// Added to the multiplier on each retryable failure.
const FAILURE_INCREMENT: f64 = 1.0;

/// Subtracted from the multiplier after a success streak.
const SUCCESS_DECREMENT: f64 = 0.5;

/// Consecutive successes required before the multiplier decays.
const DECAY_STREAK: u32 = 4;

/// Tracks the interval that must elapse between two commands, waiting
/// out only the remainder when other work already consumed part of it.
#[derive(Clone, Debug, Default)]
pub struct Delay {
    time: Option<Instant>,
    delay: Duration,
}

impl Delay {
    /// Start a delay interval now.
    pub fn new(delay: Duration) -> Self {
        Delay {
            time: Some(Instant::now()),
            delay,
        }
    }

    /// Sleep for whatever remains of the interval.
    pub fn sleep(&mut self) {
        if let Some(delay) = self
            .time
            .take()
            .and_then(|time| self.delay.checked_sub(time.elapsed()))
        {
            thread::sleep(delay);
        }
    }
}

/// Per-display adaptive sleep state.
///
/// Every exchange outcome feeds back into a multiplier applied to the
/// protocol's base delays. Retryable failures raise it by a full step
/// immediately; a streak of successes lowers it by a half step. It
/// never drops below 1.0 or climbs above [`MULTIPLIER_CEILING`].
#[derive(Clone, Debug)]
pub struct SleepGovernor {
    multiplier: f64,
    forced: Option<f64>,
    streak: u32,
    high_water: f64,
    adjustments: u64,
}

impl Default for SleepGovernor {
    fn default() -> Self {
        SleepGovernor {
            multiplier: MULTIPLIER_FLOOR,
            forced: None,
            streak: 0,
            high_water: MULTIPLIER_FLOOR,
            adjustments: 0,
        }
    }
}

impl SleepGovernor {
    /// The multiplier currently in effect.
    pub fn multiplier(&self) -> f64 {
        self.forced.unwrap_or(self.multiplier)
    }

    /// The highest multiplier reached since creation.
    pub fn high_water(&self) -> f64 {
        self.high_water
    }

    /// How many times the multiplier has been adjusted.
    pub fn adjustments(&self) -> u64 {
        self.adjustments
    }

    /// Scale a base delay by the current multiplier.
    pub fn scale(&self, base: Duration) -> Duration {
        base.mul_f64(self.multiplier())
    }

    /// Pin the multiplier to a fixed value, or release it with `None`.
    ///
    /// A forced value overrides adaptation but does not erase the
    /// learned multiplier, which resumes once released.
    pub fn force(&mut self, multiplier: Option<f64>) {
        self.forced = multiplier;
    }

    /// Record a successful exchange.
    ///
    /// Outcomes observed while the multiplier is pinned are discarded.
    pub fn note_success(&mut self) {
        if self.forced.is_some() {
            return;
        }
        self.streak += 1;
        if self.streak >= DECAY_STREAK && self.multiplier > MULTIPLIER_FLOOR {
            self.multiplier = (self.multiplier - SUCCESS_DECREMENT).max(MULTIPLIER_FLOOR);
            self.streak = 0;
            self.adjustments += 1;
        }
    }

    /// Record a retryable failure.
    ///
    /// Outcomes observed while the multiplier is pinned are discarded.
    pub fn note_failure(&mut self) {
        if self.forced.is_some() {
            return;
        }
        self.streak = 0;
        self.multiplier = (self.multiplier + FAILURE_INCREMENT).min(MULTIPLIER_CEILING);
        if self.multiplier > self.high_water {
            self.high_water = self.multiplier;
        }
        self.adjustments += 1;
    }
}
