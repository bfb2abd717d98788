//! Monotonic clamp filter for cumulative counters.

use std::collections::HashMap;

use tracing::debug;

/// Readings within this distance below the last accepted value are treated
/// as float jitter, not a real decrease.
pub const CLAMP_TOLERANCE: f64 = 1e-6;

/// Per-key last-accepted values for registers marked cumulative. The device
/// occasionally glitches a counter downwards for one cycle; the filter keeps
/// the old value instead.
#[derive(Debug, Default)]
pub struct ClampFilter {
    last: HashMap<String, f64>,
    dirty: Vec<(String, f64)>,
}

impl ClampFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload last-accepted values, typically from the clamp store.
    pub fn seed(&mut self, entries: impl IntoIterator<Item = (String, f64)>) {
        self.last.extend(entries);
    }

    /// Returns the value to publish: the new value when it is monotonic, the
    /// previous one when the reading went backwards.
    pub fn apply(&mut self, key: &str, value: f64) -> f64 {
        if let Some(&last) = self.last.get(key) {
            if value < last - CLAMP_TOLERANCE {
                debug!(key, value, last, "monotonic clamp: keeping previous value");
                return last;
            }
        }
        self.last.insert(key.to_string(), value);
        self.dirty.push((key.to_string(), value));
        value
    }

    /// Accepted updates since the last call, for persisting.
    pub fn take_dirty(&mut self) -> Vec<(String, f64)> {
        std::mem::take(&mut self.dirty)
    }

    pub fn last_accepted(&self, key: &str) -> Option<f64> {
        self.last.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
