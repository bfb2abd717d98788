use std::time::Duration;

use poller::backoff::{backoff_delay, FailureTracker};
use poller::clamp::ClampFilter;

#[test]
fn clamp_accepts_monotonic_readings() {
    let mut filter = ClampFilter::new();
    assert_eq!(filter.apply("energy", 100.0), 100.0);
    assert_eq!(filter.apply("energy", 100.5), 100.5);
    assert_eq!(filter.apply("energy", 100.5), 100.5);
    assert_eq!(filter.last_accepted("energy"), Some(100.5));
}

#[test]
fn clamp_rejects_decreases_but_tolerates_jitter() {
    let mut filter = ClampFilter::new();
    filter.apply("energy", 100.0);

    // A real decrease keeps the previous value and does not move the cache.
    assert_eq!(filter.apply("energy", 99.0), 100.0);
    assert_eq!(filter.last_accepted("energy"), Some(100.0));

    // Within tolerance counts as equal, not a decrease.
    assert_eq!(filter.apply("energy", 100.0 - 1e-7), 100.0 - 1e-7);

    // Recovery above the old value is accepted again.
    assert_eq!(filter.apply("energy", 101.0), 101.0);
}

#[test]
fn clamp_keys_are_independent() {
    let mut filter = ClampFilter::new();
    filter.apply("a", 50.0);
    filter.apply("b", 10.0);
    assert_eq!(filter.apply("b", 5.0), 10.0);
    assert_eq!(filter.apply("a", 60.0), 60.0);
    assert_eq!(filter.len(), 2);
}

#[test]
fn clamp_seed_survives_like_a_restart() {
    // Seeding replays the persisted totals, so a lower first reading after a
    // restart is still clamped.
    let mut filter = ClampFilter::new();
    filter.seed(vec![("energy".to_string(), 500.0)]);
    assert_eq!(filter.apply("energy", 480.0), 500.0);
    assert_eq!(filter.apply("energy", 500.2), 500.2);
}

#[test]
fn clamp_dirty_tracks_accepted_updates_only() {
    let mut filter = ClampFilter::new();
    filter.apply("energy", 100.0);
    filter.apply("energy", 99.0);
    filter.apply("energy", 101.0);

    let dirty = filter.take_dirty();
    let values: Vec<f64> = dirty.iter().map(|(_, value)| *value).collect();
    assert_eq!(values, vec![100.0, 101.0]);
    assert!(filter.take_dirty().is_empty());
}

#[test]
fn failure_tracker_flags_offline_at_threshold() {
    let mut tracker = FailureTracker::new(3);
    assert!(!tracker.record_failure());
    assert!(!tracker.record_failure());
    assert!(!tracker.is_offline());
    // Third consecutive failure crosses the threshold exactly once.
    assert!(tracker.record_failure());
    assert!(tracker.is_offline());
    assert!(!tracker.record_failure());

    assert!(tracker.record_success());
    assert!(!tracker.is_offline());
    assert_eq!(tracker.consecutive(), 0);
    assert!(!tracker.record_success());
}

#[test]
fn backoff_delay_grows_and_clamps() {
    let normal = Duration::from_secs(10);
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(30);

    assert_eq!(backoff_delay(normal, 0, base, max), normal);
    // Early failures never drop below the normal poll interval.
    assert_eq!(backoff_delay(normal, 1, base, max), normal);
    assert_eq!(backoff_delay(normal, 5, base, max), Duration::from_secs(16));
    assert_eq!(backoff_delay(normal, 6, base, max), max);
    assert_eq!(backoff_delay(normal, 40, base, max), max);

    // A short poll interval backs off immediately.
    let fast = Duration::from_secs(1);
    assert_eq!(backoff_delay(fast, 2, base, max), Duration::from_secs(2));
}
