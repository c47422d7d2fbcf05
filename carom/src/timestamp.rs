// Copyright 2020 Joyent, Inc.

use std::sync::Mutex;

use chrono::Utc;
use lazy_static::lazy_static;

const ONE_THOUSAND: i64 = 1000;

lazy_static! {
    //
    // The last microsecond value issued, shared by every caller in the
    // process. Cross-instance monotonicity is the whole point: two writers
    // in the same process must never draw equal ordering tokens, no matter
    // which cluster handle they went through.
    //
    static ref LAST_TIME: Mutex<i64> =
        Mutex::new(wall_clock_millis() * ONE_THOUSAND);
}

fn wall_clock_millis() -> i64 {
    Utc::now().timestamp_millis()
}

//
// Advance the process-wide counter given a candidate reading. When the
// wall clock is stationary or has moved backward the counter ticks by one
// instead, so the sequence stays strictly increasing.
//
fn next_micros(candidate: i64) -> i64 {
    let mut last = LAST_TIME.lock().unwrap();
    if candidate > *last {
        *last = candidate;
    } else {
        *last += 1;
    }
    *last
}

/// Resolution of the ordering tokens handed to writes.
///
/// Applications pick a resolution to match their existing data and any
/// other clients sharing the cluster, so it is configurable on the
/// cluster handle rather than fixed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimestampResolution {
    Seconds,
    Milliseconds,
    /// Simulated microseconds: wall millis scaled by 1000, with a
    /// process-wide tick to guarantee strictly increasing values even
    /// under a stalled clock.
    Microseconds,
}

pub const DEFAULT_TIMESTAMP_RESOLUTION: TimestampResolution =
    TimestampResolution::Microseconds;

impl TimestampResolution {
    /// Produce one ordering token at this resolution.
    ///
    /// For `Microseconds`, two calls ordered by happens-before always
    /// yield strictly increasing values within one process. No guarantee
    /// is made across resolutions or across processes.
    pub fn create_timestamp(self) -> i64 {
        match self {
            TimestampResolution::Seconds => {
                wall_clock_millis() / ONE_THOUSAND
            }
            TimestampResolution::Milliseconds => wall_clock_millis(),
            TimestampResolution::Microseconds => {
                next_micros(wall_clock_millis() * ONE_THOUSAND)
            }
        }
    }
}
