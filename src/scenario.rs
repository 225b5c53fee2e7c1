//! Scenarios: the declarative configuration driving simulated traffic.
//!
//! A scenario document is either produced externally with a precomputed profile pool, or carries
//! trend multipliers from which a pool is synthesized locally. Feature modifiers may be written as
//! a `{"field:value": weight}` map or as an array of `{feature, weight}` entries. Both are
//! normalized into [`FeatureModifier`]s here and nowhere else.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    path::PathBuf,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{error::ScenarioError, profile::UserProfile, synth};

/// A multiplicative weight applied when a profile field equals a value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureModifier {
    /// Profile field name, e.g. `os`.
    pub field: String,
    /// Value to compare against, case-insensitively.
    pub value: String,
    /// Multiplier applied to the click probability on a match.
    pub weight: f64,
}

impl FeatureModifier {
    /// Parse a `field:value` composite key. Keys without a `:` are not modifiers.
    pub fn from_key(key: &str, weight: f64) -> Option<Self> {
        let (field, value) = key.split_once(':')?;
        let value = value.split(':').next().unwrap_or(value);
        Some(Self {
            field: field.to_string(),
            value: value.to_string(),
            weight,
        })
    }
}

/// Per-value multipliers applied on top of the baseline demographic tables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawMultipliers")]
pub struct Multipliers(HashMap<String, f64>);

impl Multipliers {
    /// The multiplier for `value`, or 1.0 when unspecified.
    pub fn get(&self, value: &str) -> f64 {
        self.0.get(value).copied().unwrap_or(1.0)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Multipliers {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, w)| (k.into(), w)).collect())
    }
}

/// Traffic trend multipliers used to synthesize a profile pool.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrafficTrends {
    /// Multipliers keyed by country code.
    pub country_weights: Multipliers,
    /// Multipliers keyed by operating system.
    pub os_weights: Multipliers,
    /// Multipliers keyed by browser.
    pub browser_weights: Multipliers,
}

/// Where a scenario's profile pool comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolSource {
    /// Profiles supplied by the scenario author.
    Precomputed(Vec<UserProfile>),
    /// Synthesize profiles locally using these trends.
    Trends(TrafficTrends),
    /// Nothing to draw from. The dispatch loop stays idle.
    Empty,
}

/// A parsed scenario document, before any pool has been synthesized.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDocument {
    /// Scenario name, used in logs.
    pub name: String,
    /// Free-form description of the day's strategy.
    pub strategy: String,
    /// Click-probability modifiers, in declaration order.
    pub modifiers: Vec<FeatureModifier>,
    /// Where the visitor pool comes from.
    pub pool: PoolSource,
}

/// The active configuration. Swapped as a whole, never partially updated.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Scenario name, used in logs.
    pub name: String,
    /// Free-form description of the day's strategy.
    pub strategy: String,
    /// Click-probability modifiers, in declaration order.
    pub modifiers: Vec<FeatureModifier>,
    /// Profiles to sample requests from, with replacement.
    pub pool: Vec<UserProfile>,
}

impl Scenario {
    /// Can the dispatch loop issue requests for this scenario?
    pub fn is_usable(&self) -> bool {
        !self.pool.is_empty()
    }
}

impl ScenarioDocument {
    /// Parse and normalize a scenario document.
    pub fn parse(json: &str) -> Result<Self, ScenarioError> {
        let raw: RawScenario = serde_json::from_str(json)?;
        Ok(raw.into())
    }

    /// Turn this document into an active scenario, synthesizing a pool of `pool_size` profiles
    /// if the document only carries trends.
    pub fn into_scenario<R: Rng + ?Sized>(self, pool_size: usize, rng: &mut R) -> Scenario {
        let pool = match self.pool {
            PoolSource::Precomputed(pool) => pool,
            PoolSource::Trends(trends) => synth::synthesize(pool_size, Some(&trends), rng),
            PoolSource::Empty => Vec::new(),
        };
        Scenario {
            name: self.name,
            strategy: self.strategy,
            modifiers: self.modifiers,
            pool,
        }
    }
}

/// A source of scenario documents which can signal when it has changed.
#[async_trait]
pub trait ScenarioSource: Debug + Send + Sync + 'static {
    /// Load the current scenario document.
    async fn load(&self) -> Result<ScenarioDocument, ScenarioError>;

    /// Resolves once the source has changed since the last [`load`](Self::load).
    async fn changed(&self);
}

/// A scenario file on disk, watched by polling its modification time.
#[derive(Debug)]
pub struct FileScenarioSource {
    path: PathBuf,
    poll_interval: Duration,
    last_seen: Mutex<Option<SystemTime>>,
}

impl FileScenarioSource {
    /// Watch `path`, checking for modifications every `poll_interval`.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            last_seen: Mutex::new(None),
        }
    }

    async fn modified(&self) -> Option<SystemTime> {
        let metadata = tokio::fs::metadata(&self.path).await.ok()?;
        metadata.modified().ok()
    }
}

#[async_trait]
impl ScenarioSource for FileScenarioSource {
    async fn load(&self) -> Result<ScenarioDocument, ScenarioError> {
        let modified = self.modified().await;
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ScenarioError::Read {
                path: self.path.clone(),
                source,
            })?;
        *self.last_seen.lock() = modified;

        ScenarioDocument::parse(&json)
    }

    async fn changed(&self) {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let Some(modified) = self.modified().await else {
                continue;
            };
            let mut last_seen = self.last_seen.lock();
            if *last_seen != Some(modified) {
                debug!(path = %self.path.display(), "Scenario file changed");
                *last_seen = Some(modified);
                return;
            }
        }
    }
}

#[derive(Deserialize)]
struct RawScenario {
    #[serde(default)]
    scenario_name: String,
    #[serde(default, alias = "strategy_text")]
    strategy: String,
    #[serde(default)]
    feature_modifiers: Option<RawModifiers>,
    #[serde(default)]
    target_pool: Option<Vec<UserProfile>>,
    #[serde(default)]
    traffic_trends: Option<TrafficTrends>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModifiers {
    Entries(Vec<RawModifierEntry>),
    Map(BTreeMap<String, f64>),
}

#[derive(Deserialize)]
struct RawModifierEntry {
    #[serde(default)]
    feature: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMultipliers {
    Entries(Vec<RawMultiplierEntry>),
    Map(HashMap<String, f64>),
}

#[derive(Deserialize)]
struct RawMultiplierEntry {
    #[serde(alias = "feature", alias = "key")]
    value: String,
    weight: f64,
}

impl From<RawMultipliers> for Multipliers {
    fn from(raw: RawMultipliers) -> Self {
        match raw {
            RawMultipliers::Entries(entries) => {
                entries.into_iter().map(|e| (e.value, e.weight)).collect()
            }
            RawMultipliers::Map(map) => Multipliers(map),
        }
    }
}

impl From<RawModifiers> for Vec<FeatureModifier> {
    fn from(raw: RawModifiers) -> Self {
        match raw {
            RawModifiers::Entries(entries) => entries
                .into_iter()
                // Entries without a feature or with a zero weight are ignored.
                .filter_map(|e| match (e.feature, e.weight) {
                    (Some(feature), Some(weight)) if weight != 0.0 => {
                        FeatureModifier::from_key(&feature, weight)
                    }
                    _ => None,
                })
                .collect(),
            RawModifiers::Map(map) => map
                .into_iter()
                .filter_map(|(key, weight)| FeatureModifier::from_key(&key, weight))
                .collect(),
        }
    }
}

impl From<RawScenario> for ScenarioDocument {
    fn from(raw: RawScenario) -> Self {
        let pool = match (raw.target_pool, raw.traffic_trends) {
            (Some(pool), trends) => {
                if trends.is_some() {
                    warn!(
                        scenario = %raw.scenario_name,
                        "Scenario has both a target pool and traffic trends, using the target pool"
                    );
                }
                PoolSource::Precomputed(pool)
            }
            (None, Some(trends)) => PoolSource::Trends(trends),
            (None, None) => PoolSource::Empty,
        };

        Self {
            name: raw.scenario_name,
            strategy: raw.strategy,
            modifiers: raw.feature_modifiers.map(Into::into).unwrap_or_default(),
            pool,
        }
    }
}
