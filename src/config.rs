use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use bon::bon;
use tokio::time::Duration;

use crate::error::ConfigError;

const DEFAULT_AD_SERVER_HOST: &str = "http://localhost:3000";
const DEFAULT_SCENARIO_PATH: &str = "scripts/daily_script.json";

/// Engine settings.
///
/// Every field has a default. [`EngineConfig::from_env`] layers `PULSE_*` environment variables on
/// top of the defaults.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EngineConfig {
    pub(crate) ad_server_host: String,
    pub(crate) scenario_path: PathBuf,
    pub(crate) snapshot_path: Option<PathBuf>,
    pub(crate) max_in_flight: usize,
    pub(crate) pool_size: usize,
    pub(crate) idle_wait: Duration,
    pub(crate) settle_delay: Duration,
    pub(crate) scenario_poll_interval: Duration,
    pub(crate) tick_interval: Duration,
    pub(crate) pixel_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) seed: Option<u64>,
}

#[bon]
impl EngineConfig {
    #[allow(missing_docs)]
    #[builder]
    pub fn new(
        /// Base URL of the ad server.
        #[builder(into, default = DEFAULT_AD_SERVER_HOST.to_string())]
        ad_server_host: String,
        /// Scenario file to load and watch.
        #[builder(into, default = PathBuf::from(DEFAULT_SCENARIO_PATH))]
        scenario_path: PathBuf,
        /// Where pending events are persisted across restarts.
        #[builder(into)]
        snapshot_path: Option<PathBuf>,
        /// Limits the number of ad requests in flight at once.
        #[builder(default = 5)]
        max_in_flight: usize,
        /// Number of profiles synthesized for trends-only scenarios.
        #[builder(default = 100)]
        pool_size: usize,
        /// How long to wait between attempts to load a usable scenario.
        #[builder(default = Duration::from_secs(5))]
        idle_wait: Duration,
        /// Pause between noticing a scenario change and reloading it, so writes can finish.
        #[builder(default = Duration::from_millis(500))]
        settle_delay: Duration,
        /// How often the scenario file is checked for changes.
        #[builder(default = Duration::from_secs(1))]
        scenario_poll_interval: Duration,
        /// How often due events are fired.
        #[builder(default = Duration::from_secs(1))]
        tick_interval: Duration,
        /// Bound on each pixel call.
        #[builder(default = Duration::from_secs(5))]
        pixel_timeout: Duration,
        /// Bound on each ad request.
        #[builder(default = Duration::from_secs(10))]
        request_timeout: Duration,
        /// Seed for reproducible runs.
        seed: Option<u64>,
    ) -> Self {
        Self {
            ad_server_host,
            scenario_path,
            snapshot_path,
            max_in_flight: max_in_flight.max(1),
            pool_size,
            idle_wait,
            settle_delay,
            scenario_poll_interval,
            tick_interval,
            pixel_timeout,
            request_timeout,
            seed,
        }
    }

    /// Defaults overridden by environment variables.
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `PULSE_AD_SERVER_HOST` (or `OPENADSERVER_HOST`) | ad server base URL |
    /// | `PULSE_SCENARIO_PATH` | scenario file |
    /// | `PULSE_SNAPSHOT_PATH` | event-queue snapshot file |
    /// | `PULSE_MAX_IN_FLIGHT` | concurrent ad requests |
    /// | `PULSE_POOL_SIZE` | synthesized pool size |
    /// | `PULSE_SEED` | RNG seed |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let host = lookup("PULSE_AD_SERVER_HOST").or_else(|| lookup("OPENADSERVER_HOST"));

        Ok(Self::builder()
            .maybe_ad_server_host(host)
            .maybe_scenario_path(lookup("PULSE_SCENARIO_PATH").map(PathBuf::from))
            .maybe_snapshot_path(lookup("PULSE_SNAPSHOT_PATH").map(PathBuf::from))
            .maybe_max_in_flight(parse_var(&lookup, "PULSE_MAX_IN_FLIGHT")?)
            .maybe_pool_size(parse_var(&lookup, "PULSE_POOL_SIZE")?)
            .maybe_seed(parse_var(&lookup, "PULSE_SEED")?)
            .build())
    }

    /// Base URL of the ad server.
    pub fn ad_server_host(&self) -> &str {
        &self.ad_server_host
    }

    /// Scenario file to load and watch.
    pub fn scenario_path(&self) -> &PathBuf {
        &self.scenario_path
    }

    /// Bound on each ad request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How often the scenario file is checked for changes.
    pub fn scenario_poll_interval(&self) -> Duration {
        self.scenario_poll_interval
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ad_server: {}, scenario: {}, max_in_flight: {}, pool_size: {}",
            self.ad_server_host,
            self.scenario_path.display(),
            self.max_in_flight,
            self.pool_size
        )
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { var, value })
        })
        .transpose()
}
