//! The dispatch loop and the engine lifecycle.
//!
//! An [`Engine`] is assembled from its collaborators and started once. Starting restores any
//! persisted events, loads the scenario, and spawns four loops sharing the engine state:
//!
//! - dispatch: pace and issue ad requests while a usable scenario is active,
//! - scenario watcher: reload the scenario whenever its source changes,
//! - event scheduler: fire due attribution pixels every tick,
//! - stats reset: clear the counters at the top of every hour.
//!
//! The returned [`EngineHandle`] stops them.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bon::bon;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{
    sync::{Semaphore, watch},
    task::JoinHandle,
    time::Duration,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    attribution,
    clock::{Clock, SystemClock},
    config::EngineConfig,
    error::TransportError,
    outcome::OutcomeModel,
    pacing::PacingController,
    profile::UserProfile,
    scenario::{Scenario, ScenarioSource},
    scheduler::{EventKind, EventScheduler},
    shutdown,
    stats::{StatsAggregator, StatsSnapshot, TRANSPORT_FAILURE_STATUS},
    transport::{AdCandidate, AdRequest, AdResponse, AdTransport},
};

const CLICK_FALLBACK_PATH: &str = "/api/v1/ad/click";
const CONVERSION_FALLBACK_PATH: &str = "/api/v1/ad/conversion";

/// A traffic simulation engine, ready to start.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use pulse_sim::{Engine, EngineConfig, FileScenarioSource, HttpTransport};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EngineConfig::from_env()?;
/// let transport = HttpTransport::new(config.ad_server_host(), config.request_timeout())?;
/// let source = FileScenarioSource::new(config.scenario_path(), config.scenario_poll_interval());
///
/// let engine = Engine::builder()
///     .config(config)
///     .transport(Arc::new(transport))
///     .scenario_source(Arc::new(source))
///     .build()
///     .start()
///     .await;
///
/// tokio::signal::ctrl_c().await?;
/// engine.shut_down().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    transport: Arc<dyn AdTransport>,
    scenario_source: Arc<dyn ScenarioSource>,
    clock: Arc<dyn Clock>,
}

/// A running engine.
///
/// Dropping the handle aborts every loop without persisting pending events. Use
/// [`shut_down`](Self::shut_down) to stop gracefully.
#[derive(Debug)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared by the loops and by every in-flight request.
#[derive(Debug)]
struct Shared {
    config: EngineConfig,
    transport: Arc<dyn AdTransport>,
    scenario_source: Arc<dyn ScenarioSource>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsAggregator>,
    scheduler: Arc<EventScheduler>,
    /// Swapped as a whole. Requests hold on to the scenario they were built from.
    scenario: ArcSwapOption<Scenario>,
    limiter: Arc<Semaphore>,
    rng: Mutex<StdRng>,
    pacing: PacingController,
    outcomes: OutcomeModel,
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[bon]
impl Engine {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        #[builder(default)] config: EngineConfig,
        transport: Arc<dyn AdTransport>,
        scenario_source: Arc<dyn ScenarioSource>,
        /// Wall-clock time for event fire times and stats windows.
        #[builder(default = system_clock())]
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            scenario_source,
            clock,
        }
    }

    /// Restore pending events, load the scenario and spawn the loops.
    ///
    /// Never fails: an unreadable snapshot or scenario is logged, and the engine starts with an
    /// empty queue or idles until a usable scenario appears.
    pub async fn start(self) -> EngineHandle {
        let Engine {
            config,
            transport,
            scenario_source,
            clock,
        } = self;

        let stats = Arc::new(StatsAggregator::new(Arc::clone(&clock)));
        let scheduler = Arc::new(
            EventScheduler::builder()
                .transport(Arc::clone(&transport))
                .stats(Arc::clone(&stats))
                .clock(Arc::clone(&clock))
                .tick_interval(config.tick_interval)
                .pixel_timeout(config.pixel_timeout)
                .maybe_snapshot_path(config.snapshot_path.clone())
                .build(),
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let shared = Arc::new(Shared {
            limiter: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
            transport,
            scenario_source,
            clock,
            stats,
            scheduler,
            scenario: ArcSwapOption::empty(),
            rng: Mutex::new(rng),
            pacing: PacingController::new(),
            outcomes: OutcomeModel::new(),
        });

        info!(config = %shared.config, "Starting traffic simulation engine");

        if let Err(err) = shared.scheduler.restore().await {
            warn!(error = %err, "Unable to restore pending events, starting with an empty queue");
        }
        shared.reload_scenario().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Arc::clone(&shared).dispatch_loop(stop_rx.clone())),
            tokio::spawn(Arc::clone(&shared).watch_scenario(stop_rx.clone())),
            tokio::spawn(Arc::clone(&shared.scheduler).run(stop_rx.clone())),
            tokio::spawn(Arc::clone(&shared.stats).run_hourly_reset(stop_rx)),
        ];

        EngineHandle {
            shared,
            stop_tx,
            tasks,
        }
    }
}

impl EngineHandle {
    /// The stats aggregator.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.shared.stats
    }

    /// A snapshot of the current stats window.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The delayed-event scheduler.
    pub fn scheduler(&self) -> &Arc<EventScheduler> {
        &self.shared.scheduler
    }

    /// The active scenario, if one has been loaded.
    pub fn scenario(&self) -> Option<Arc<Scenario>> {
        self.shared.scenario.load_full()
    }

    /// Stop every loop, wait for them to finish, then persist pending events.
    ///
    /// Requests already in flight are not aborted: their outcome is still recorded when it
    /// arrives, but nothing new is scheduled from it. Shutdown waits up to the request timeout
    /// for them before persisting.
    pub async fn shut_down(mut self) {
        info!("Shutting down traffic simulation engine");
        self.stop_tx.send_replace(true);

        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(error = %err, "Engine loop did not stop cleanly");
            }
        }
        self.shared.drain_in_flight().await;

        if let Err(err) = self.shared.scheduler.persist().await {
            warn!(error = %err, "Unable to persist pending events");
        }
        info!("Traffic simulation engine stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Shared {
    /// Issue requests while a usable scenario is active, otherwise idle and retry the load.
    async fn dispatch_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut active = false;

        loop {
            let wait = match self.scenario.load_full().filter(|s| s.is_usable()) {
                Some(scenario) => {
                    if !active {
                        info!(scenario = %scenario.name, pool = scenario.pool.len(), "Dispatching");
                        active = true;
                    }
                    self.dispatch(&scenario, &stop);
                    self.next_delay()
                }
                None => {
                    if active {
                        info!("No usable scenario, idling");
                        active = false;
                    } else {
                        debug!("Idle, waiting for a usable scenario");
                    }
                    self.config.idle_wait
                }
            };

            tokio::select! {
                _ = shutdown::stopped(&mut stop) => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if !active {
                self.reload_scenario().await;
            }
        }

        debug!("Dispatch loop stopped");
    }

    /// Reload the scenario after every change, once the change has had time to settle.
    async fn watch_scenario(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => break,
                _ = self.scenario_source.changed() => {}
            }
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => break,
                _ = tokio::time::sleep(self.config.settle_delay) => {}
            }
            self.reload_scenario().await;
        }

        debug!("Scenario watcher stopped");
    }

    /// Load the scenario and swap it in. On failure the active scenario stays in effect.
    async fn reload_scenario(&self) {
        let document = match self.scenario_source.load().await {
            Ok(document) => document,
            Err(err) => {
                warn!(error = %err, "Unable to load scenario, keeping the current one");
                return;
            }
        };

        let scenario = document.into_scenario(self.config.pool_size, &mut *self.rng.lock());
        info!(
            scenario = %scenario.name,
            pool = scenario.pool.len(),
            modifiers = scenario.modifiers.len(),
            "Scenario loaded"
        );
        self.scenario.store(Some(Arc::new(scenario)));
    }

    /// Wait for every request holding a permit to complete, then refuse new ones.
    async fn drain_in_flight(&self) {
        let permits = u32::try_from(self.config.max_in_flight).unwrap_or(u32::MAX);
        let timeout = self.config.request_timeout;

        match tokio::time::timeout(timeout, self.limiter.acquire_many(permits)).await {
            Ok(_) => debug!("No requests in flight"),
            Err(_) => warn!(?timeout, "Requests still in flight, persisting without them"),
        }
        self.limiter.close();
    }

    fn next_delay(&self) -> Duration {
        let hour = self.clock.local_hour();
        self.pacing.next_delay(hour, &mut *self.rng.lock())
    }

    /// Issue one request in the background, without waiting for it.
    fn dispatch(self: &Arc<Self>, scenario: &Arc<Scenario>, stop: &watch::Receiver<bool>) {
        let index = self.rng.lock().random_range(0..scenario.pool.len());
        let request = AdRequest::new(scenario.pool[index].clone(), self.clock.now_millis());
        let span = info_span!("ad request", request_id = %request.request_id);

        let shared = Arc::clone(self);
        let scenario = Arc::clone(scenario);
        let stop = stop.clone();

        tokio::spawn(
            async move {
                let Ok(_permit) = Arc::clone(&shared.limiter).acquire_owned().await else {
                    return;
                };
                if *stop.borrow() {
                    debug!("Stopped before the request was sent");
                    return;
                }

                let result = shared.transport.request_ad(&request).await;
                let stopped = *stop.borrow();
                shared.complete(&request.profile, &scenario, result, stopped);
            }
            .instrument(span),
        );
    }

    /// Record the outcome of a request and schedule its attribution pixels.
    fn complete(
        &self,
        profile: &UserProfile,
        scenario: &Scenario,
        result: Result<AdResponse, TransportError>,
        stopped: bool,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.stats.record(err.url(), TRANSPORT_FAILURE_STATUS);
                warn!(error = %err, "Ad request failed");
                return;
            }
        };

        self.stats.record(&response.url, response.status);

        if !response.is_success() {
            warn!(status = response.status, "Ad request rejected");
            return;
        }
        let Some(candidate) = response.candidate else {
            debug!(status = response.status, "No ad served");
            return;
        };
        if stopped {
            debug!("Stopped, not scheduling attribution");
            return;
        }

        self.attribute(profile, scenario, &candidate);
    }

    fn attribute(&self, profile: &UserProfile, scenario: &Scenario, candidate: &AdCandidate) {
        if let Some(url) = candidate.impression_url.as_deref().filter(|u| !u.is_empty()) {
            self.scheduler.enqueue(EventKind::Impression, url, Duration::ZERO);
        }

        let mut rng = self.rng.lock();

        if !self.outcomes.should_click(profile, &scenario.modifiers, &mut *rng) {
            return;
        }
        let click_delay = attribution::click_delay(&mut *rng);
        let click_url = candidate
            .click_url
            .clone()
            .unwrap_or_else(|| self.fallback_url(CLICK_FALLBACK_PATH, candidate));

        let conversion = self
            .outcomes
            .should_convert(profile, &mut *rng)
            .then(|| {
                let url = match candidate.conversion_url.as_deref() {
                    Some(url) => attribution::substitute_value(url, &mut *rng),
                    None => self.fallback_url(CONVERSION_FALLBACK_PATH, candidate),
                };
                (url, attribution::conversion_delay(click_delay, &mut *rng))
            });
        drop(rng);

        self.scheduler.enqueue(EventKind::Click, click_url, click_delay);
        if let Some((url, delay)) = conversion {
            self.scheduler.enqueue(EventKind::Conversion, url, delay);
        }
    }

    fn fallback_url(&self, path: &str, candidate: &AdCandidate) -> String {
        format!(
            "{}{path}?id={}",
            self.config.ad_server_host.trim_end_matches('/'),
            candidate.id_string()
        )
    }
}
