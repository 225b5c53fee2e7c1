use std::fmt::Debug;

use chrono::{DateTime, Local, Timelike, Utc};

/// Source of wall-clock time.
///
/// Delayed events and stats windows are anchored to wall-clock time so that they survive a
/// restart. Tests swap in a clock driven by tokio's paused time.
pub trait Clock: Debug + Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// The hour of the day in local time, `0..24`.
    fn local_hour(&self) -> u32 {
        self.now().with_timezone(&Local).hour()
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
