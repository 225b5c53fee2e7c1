//! Drive synthetic ad traffic against an ad server.
//!
//! A scenario describes the day's visitors: either a precomputed pool of profiles, or trend
//! multipliers from which a pool is synthesized. The engine samples visitors from the pool and
//! sends one ad request per visitor, paced by the hour of day. Served ads are run through a
//! probabilistic outcome model, and the resulting impression, click and conversion pixels are
//! fired later, after modelled delays. Every outbound call is counted by path and status code.
//!
//! Scenarios are hot-reloaded. Pending pixels survive a graceful restart.
//!
//! See the README for an example.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

pub mod attribution;
mod clock;
mod config;
pub mod demographics;
mod engine;
pub mod error;
pub mod outcome;
pub mod pacing;
mod profile;
pub mod scenario;
pub mod scheduler;
mod shutdown;
pub mod stats;
pub mod synth;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::{ConfigError, ScenarioError, SnapshotError, TransportError};
pub use outcome::OutcomeModel;
pub use pacing::PacingController;
pub use profile::{Gender, UserProfile};
pub use scenario::{FileScenarioSource, Scenario, ScenarioSource};
pub use scheduler::{DelayedEvent, EventKind, EventScheduler};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use transport::{AdTransport, HttpTransport};
