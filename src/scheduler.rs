//! Delayed attribution events.
//!
//! Events are held in a queue ordered by absolute fire time. A background ticker pops every due
//! event and fires it at most once. The queue survives a controlled restart through a snapshot
//! file, written on shutdown and consumed once on startup.

use std::{
    collections::VecDeque,
    fmt::{self, Display},
    io,
    path::PathBuf,
    sync::Arc,
};

use bon::bon;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch,
    time::{Duration, MissedTickBehavior},
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::SnapshotError,
    shutdown,
    stats::{StatsAggregator, TRANSPORT_FAILURE_STATUS},
    transport::AdTransport,
};

/// What a delayed event attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Fired as soon as the ad is served.
    Impression,
    /// Fired after the click delay.
    Click,
    /// Fired after the conversion delay.
    Conversion,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Impression => "impression",
            EventKind::Click => "click",
            EventKind::Conversion => "conversion",
        })
    }
}

/// A scheduled attribution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Which pixel this is.
    pub kind: EventKind,
    /// The pixel to call.
    pub url: String,
    /// When to fire, in milliseconds since the Unix epoch.
    pub execute_at: i64,
    /// Opaque data carried through persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Events ordered by fire time. Events with equal fire times keep their insertion order.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<DelayedEvent>>,
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event, keeping the queue sorted.
    pub fn push(&self, event: DelayedEvent) {
        let mut events = self.events.lock();
        let at = events.partition_point(|e| e.execute_at <= event.execute_at);
        events.insert(at, event);
    }

    /// Insert many events, keeping the queue sorted.
    pub fn extend(&self, new_events: impl IntoIterator<Item = DelayedEvent>) {
        let mut events = self.events.lock();
        events.extend(new_events);
        events.make_contiguous().sort_by_key(|e| e.execute_at);
    }

    /// Remove and return every event due at or before `now_millis`, earliest first.
    pub fn pop_due(&self, now_millis: i64) -> Vec<DelayedEvent> {
        let mut events = self.events.lock();
        let due = events.partition_point(|e| e.execute_at <= now_millis);
        events.drain(..due).collect()
    }

    /// A copy of every pending event, earliest first.
    pub fn pending(&self) -> Vec<DelayedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Owns the delayed-event queue and fires events when they fall due.
#[derive(Debug)]
pub struct EventScheduler {
    queue: EventQueue,
    transport: Arc<dyn AdTransport>,
    stats: Arc<StatsAggregator>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    pixel_timeout: Duration,
    snapshot_path: Option<PathBuf>,
}

#[bon]
impl EventScheduler {
    /// Build a scheduler firing pixels through `transport`.
    #[builder]
    pub fn new(
        transport: Arc<dyn AdTransport>,
        stats: Arc<StatsAggregator>,
        clock: Arc<dyn Clock>,
        /// How often to check for due events.
        #[builder(default = Duration::from_secs(1))]
        tick_interval: Duration,
        /// Bound on each pixel call.
        #[builder(default = Duration::from_secs(5))]
        pixel_timeout: Duration,
        /// Where to persist pending events across restarts. No persistence if unset.
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            queue: EventQueue::new(),
            transport,
            stats,
            clock,
            tick_interval,
            pixel_timeout,
            snapshot_path,
        }
    }

    /// Schedule a pixel to fire `delay` from now. Returns the event id.
    pub fn enqueue(&self, kind: EventKind, url: impl Into<String>, delay: Duration) -> Uuid {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let event = DelayedEvent {
            id: Uuid::new_v4(),
            kind,
            url: url.into(),
            execute_at: self.clock.now_millis().saturating_add(delay_ms),
            payload: None,
        };
        let id = event.id;

        if !delay.is_zero() {
            debug!(
                %kind,
                delay_secs = delay.as_secs(),
                queue_len = self.queue.len() + 1,
                "Scheduled event"
            );
        }
        self.queue.push(event);
        id
    }

    /// The underlying queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Pop every due event and fire each in the background, earliest first.
    ///
    /// Returns the events that were fired.
    pub fn tick(&self) -> Vec<DelayedEvent> {
        let due = self.queue.pop_due(self.clock.now_millis());
        if !due.is_empty() {
            debug!(count = due.len(), "Firing due events");
        }
        for event in &due {
            let transport = Arc::clone(&self.transport);
            let stats = Arc::clone(&self.stats);
            let timeout = self.pixel_timeout;
            let span = info_span!("fire event", id = %event.id, kind = %event.kind);
            let (kind, url) = (event.kind, event.url.clone());

            tokio::spawn(
                async move {
                    let status = match transport.fire_pixel(&url, timeout).await {
                        Ok(status) => {
                            debug!(status, %url, "Fired {kind}");
                            status
                        }
                        Err(err) => {
                            warn!(error = %err, %url, "Failed to fire {kind}");
                            TRANSPORT_FAILURE_STATUS
                        }
                    };
                    stats.record(&url, status);
                }
                .instrument(span),
            );
        }
        due
    }

    /// Tick every `tick_interval` until stopped.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Event scheduler started");

        loop {
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        info!(pending = self.queue.len(), "Event scheduler stopped");
    }

    /// Write every pending event to the snapshot file. Returns how many were written.
    pub async fn persist(&self) -> Result<usize, SnapshotError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        let pending = self.queue.pending();
        let json = serde_json::to_vec_pretty(&pending)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SnapshotError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;

        info!(count = pending.len(), path = %path.display(), "Persisted pending events");
        Ok(pending.len())
    }

    /// Load pending events from the snapshot file, then delete it. Returns how many were loaded.
    ///
    /// A missing snapshot is not an error.
    pub async fn restore(&self) -> Result<usize, SnapshotError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        let json = match tokio::fs::read(path).await {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };
        let events: Vec<DelayedEvent> = serde_json::from_slice(&json)?;
        let count = events.len();
        self.queue.extend(events);

        if let Err(source) = tokio::fs::remove_file(path).await {
            warn!(error = %source, path = %path.display(), "Unable to delete restored snapshot");
        }

        info!(count, path = %path.display(), "Restored pending events");
        Ok(count)
    }
}
