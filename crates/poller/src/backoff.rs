//! Connection failure tracking and retry backoff.

use std::time::Duration;

/// Tracks consecutive cycle/connect failures and flags the device offline
/// once the threshold is crossed. The flag clears on the next good cycle.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    threshold: u32,
    offline: bool,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
            offline: false,
        }
    }

    /// Returns true when this failure newly crossed the offline threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold && !self.offline {
            self.offline = true;
            return true;
        }
        false
    }

    /// Returns true when the device just recovered from the offline state.
    pub fn record_success(&mut self) -> bool {
        self.consecutive = 0;
        std::mem::take(&mut self.offline)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }
}

/// Poll delay under failure: exponential from `base` doubling per failure,
/// clamped to `max`, never shorter than the normal interval.
pub fn backoff_delay(normal: Duration, failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return normal;
    }

    let shift = failures.saturating_sub(1).min(31);
    let factor = 1u64 << shift;
    let candidate = base.saturating_mul(factor.min(u64::from(u32::MAX)) as u32);
    let backoff = if candidate > max { max } else { candidate };
    if backoff > normal {
        backoff
    } else {
        normal
    }
}
