use std::time::Duration;

/// Polling cadence with exponential backoff after failures.
///
/// The delay is `base` while the source is healthy and doubles per consecutive
/// failure, capped at `max_backoff`. A success resets it to `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCadence {
    base: Duration,
    max_backoff: Duration,
    consecutive_failures: u32,
}

impl PollCadence {
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Fixed cadence: failures do not stretch the interval.
    pub fn new(base: Duration) -> Self {
        let base = base.max(Self::MIN_INTERVAL);
        Self {
            base,
            max_backoff: base,
            consecutive_failures: 0,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base);
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn next_delay(&self) -> Duration {
        // 2^31 overflows any realistic Duration multiply; clamp the exponent.
        let factor = 1u32 << self.consecutive_failures.min(31);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
