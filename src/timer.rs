use rand::Rng;
use std::time::Duration;

/// Draws a fresh randomized election timeout within the configured range.
///
/// A broad spread between `min_ms` and `max_ms` is what breaks split votes:
/// after a tied election the nodes re-arm with independent draws and one of
/// them times out first.
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

/// Fixed leader heartbeat period.
pub fn heartbeat_interval(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms)
}
