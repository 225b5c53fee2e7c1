use std::{
    io,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use pulse_sim::{
    AdTransport, Clock, ScenarioError, ScenarioSource, TransportError,
    scenario::ScenarioDocument,
    transport::{AdCandidate, AdRequest, AdResponse},
};
use tokio::{
    sync::Notify,
    time::{Duration, Instant},
};

pub const AD_URL: &str = "http://ads.test/ad/get";

/// Wall-clock time driven by tokio's (usually paused) clock, with a fixed local hour.
#[derive(Debug)]
pub struct PausedClock {
    base: DateTime<Utc>,
    started: Instant,
    hour: u32,
}

impl PausedClock {
    /// 2026-03-14 03:10:00 UTC, local hour 3.
    pub fn night() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 3, 14, 3, 10, 0).unwrap(), 3)
    }

    pub fn new(base: DateTime<Utc>, hour: u32) -> Self {
        Self {
            base,
            started: Instant::now(),
            hour,
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.base + elapsed
    }

    fn local_hour(&self) -> u32 {
        self.hour
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, Option<AdCandidate>),
    Fail,
}

/// Records every call and answers with a configurable reply.
#[derive(Debug)]
pub struct FakeTransport {
    reply: Mutex<Reply>,
    latency: Duration,
    requests: Mutex<Vec<AdRequest>>,
    pixels: Mutex<Vec<String>>,
    pixel_status: Mutex<Option<u16>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new(reply: Reply) -> Self {
        Self::with_latency(reply, Duration::ZERO)
    }

    pub fn with_latency(reply: Reply, latency: Duration) -> Self {
        Self {
            reply: Mutex::new(reply),
            latency,
            requests: Mutex::new(Vec::new()),
            pixels: Mutex::new(Vec::new()),
            pixel_status: Mutex::new(Some(200)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every request answered 200 with no ad.
    pub fn no_fill() -> Self {
        Self::new(Reply::Status(200, None))
    }

    /// Every request answered 200 with `candidate`.
    pub fn serving(candidate: AdCandidate) -> Self {
        Self::new(Reply::Status(200, Some(candidate)))
    }

    /// `None` makes pixel calls fail.
    pub fn set_pixel_status(&self, status: Option<u16>) {
        *self.pixel_status.lock() = status;
    }

    pub fn requests(&self) -> Vec<AdRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn pixels(&self) -> Vec<String> {
        self.pixels.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdTransport for FakeTransport {
    async fn request_ad(&self, request: &AdRequest) -> Result<AdResponse, TransportError> {
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.reply.lock().clone();
        match reply {
            Reply::Status(status, candidate) => Ok(AdResponse {
                url: AD_URL.to_string(),
                status,
                candidate,
            }),
            Reply::Fail => Err(transport_error(AD_URL)),
        }
    }

    async fn fire_pixel(&self, url: &str, _timeout: Duration) -> Result<u16, TransportError> {
        self.pixels.lock().push(url.to_string());
        let status = *self.pixel_status.lock();
        status.ok_or_else(|| transport_error(url))
    }
}

/// A client error, produced without touching the network.
pub fn transport_error(url: &str) -> TransportError {
    let source = reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err();
    TransportError::Request {
        url: url.to_string(),
        source,
    }
}

/// A scenario document held in memory. Updating it signals a change.
#[derive(Debug, Default)]
pub struct MemoryScenarioSource {
    json: Mutex<Option<String>>,
    changed: Notify,
    loads: AtomicUsize,
}

impl MemoryScenarioSource {
    pub fn with(json: impl Into<String>) -> Self {
        let source = Self::default();
        *source.json.lock() = Some(json.into());
        source
    }

    pub fn set(&self, json: impl Into<String>) {
        *self.json.lock() = Some(json.into());
        self.changed.notify_one();
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScenarioSource for MemoryScenarioSource {
    async fn load(&self) -> Result<ScenarioDocument, ScenarioError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let json = self.json.lock().clone();
        match json {
            Some(json) => ScenarioDocument::parse(&json),
            None => Err(ScenarioError::Read {
                path: PathBuf::from("memory"),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }

    async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// A scenario with a single precomputed visitor.
pub fn single_visitor_scenario(name: &str, slot_id: &str, modifiers: &str) -> String {
    format!(
        r#"{{
            "scenario_name": "{name}",
            "feature_modifiers": {modifiers},
            "target_pool": [
                {{"slot_id": "{slot_id}", "country": "US", "os": "ios", "browser": "safari",
                  "device": "iPhone", "age": 31, "gender": "F", "interests": ["shopping"]}}
            ]
        }}"#
    )
}

/// A scenario every visitor of which clicks.
pub fn always_click_scenario(name: &str) -> String {
    single_visitor_scenario(name, "slot_interstitial", r#"{"os:ios": 1000.0}"#)
}

pub fn candidate() -> AdCandidate {
    AdCandidate {
        id: serde_json::json!(42),
        impression_url: Some("http://ads.test/pixel/impression?id=42".to_string()),
        click_url: Some("http://ads.test/pixel/click?id=42".to_string()),
        conversion_url: Some("http://ads.test/pixel/conversion?id=42&value={value}".to_string()),
    }
}
