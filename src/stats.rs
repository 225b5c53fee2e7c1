//! Outcome counting by endpoint path and status code, windowed hourly.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use tokio::{sync::watch, time::Duration};
use tracing::info;

use crate::{clock::Clock, shutdown};

/// Recorded in place of a status code when no response was received.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Counts per canonical path, per status code.
pub type StatusCounts = BTreeMap<String, BTreeMap<u16, u64>>;

/// Counts outcomes of every outbound call.
///
/// Safe to share between tasks. Increments never get lost.
#[derive(Debug)]
pub struct StatsAggregator {
    clock: Arc<dyn Clock>,
    window: Mutex<StatsWindow>,
}

#[derive(Debug)]
struct StatsWindow {
    start: DateTime<Utc>,
    counts: StatusCounts,
}

/// A point-in-time copy of the current window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// When the current window started.
    pub start_time: DateTime<Utc>,
    /// When the snapshot was taken.
    pub current_time: DateTime<Utc>,
    /// Counts keyed by path, then by status code.
    pub stats: StatusCounts,
}

impl StatsSnapshot {
    /// The count for a path and status, zero if never recorded.
    pub fn count(&self, path: &str, status: u16) -> u64 {
        self.stats
            .get(path)
            .and_then(|codes| codes.get(&status))
            .copied()
            .unwrap_or(0)
    }

    /// Total count across all statuses for a path.
    pub fn total(&self, path: &str) -> u64 {
        self.stats
            .get(path)
            .map(|codes| codes.values().sum())
            .unwrap_or(0)
    }
}

impl StatsAggregator {
    /// Create an empty aggregator whose first window starts now.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            clock,
            window: Mutex::new(StatsWindow {
                start,
                counts: StatusCounts::new(),
            }),
        }
    }

    /// Count one outcome for the path of `url_or_path`.
    pub fn record(&self, url_or_path: &str, status: u16) {
        let path = canonical_path(url_or_path);
        let mut window = self.window.lock();
        *window
            .counts
            .entry(path)
            .or_default()
            .entry(status)
            .or_default() += 1;
    }

    /// The full counts for the current window.
    pub fn snapshot(&self) -> StatsSnapshot {
        let window = self.window.lock();
        StatsSnapshot {
            start_time: window.start,
            current_time: self.clock.now(),
            stats: window.counts.clone(),
        }
    }

    /// Clear all counts and start a new window. Returns the new window start.
    pub fn reset(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut window = self.window.lock();
        window.counts.clear();
        window.start = now;
        now
    }

    /// Reset at the top of every local hour until stopped.
    ///
    /// Each reset arms a one-shot timer for the following top of the hour, so the window stays
    /// aligned to clock boundaries, including in zones with a fractional-hour offset.
    pub async fn run_hourly_reset(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let wait = until_next_hour(&self.clock.now().with_timezone(&Local));
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => break,
                _ = tokio::time::sleep(wait) => {
                    let start = self.reset();
                    info!(window_start = %start, "Hourly stats reset");
                }
            }
        }
    }
}

/// Strip the scheme, host, query and fragment, leaving the path.
pub fn canonical_path(url_or_path: &str) -> String {
    if url_or_path.starts_with("http") {
        if let Ok(url) = Url::parse(url_or_path) {
            return url.path().to_string();
        }
    }
    let end = url_or_path
        .find(['?', '#'])
        .unwrap_or(url_or_path.len());
    url_or_path[..end].to_string()
}

/// Time from `now` until the next top of the hour in `now`'s time zone. Never zero.
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let seconds = u64::from(now.minute() * 60 + now.second());
    // A leap second reports a nanosecond count past one second.
    let nanos = u64::from(now.nanosecond() % 1_000_000_000);
    HOUR - Duration::from_secs(seconds) - Duration::from_nanos(nanos)
}
