//! Process-monotonic microsecond clock shared by every frame producer.
//!
//! Using a single pinned epoch keeps every `Frame::timestamp` in one process
//! comparable, regardless of wall-clock adjustments.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Microseconds elapsed since this process's capture epoch.
pub fn now_micros() -> i64 {
    epoch().elapsed().as_micros() as i64
}
