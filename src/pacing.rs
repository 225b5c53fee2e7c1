//! Dynamic request pacing.
//!
//! The request rate follows a coarse day/night cycle with two peak bands, jittered by a random
//! volatility factor so that traffic never looks perfectly regular.

use std::ops::{Range, RangeInclusive};

use rand::Rng;
use tokio::time::Duration;

const NIGHT_HOURS: Range<u32> = 0..6;
const NIGHT_RATE: f64 = 1.0;
const DAY_RATE: f64 = 3.0;

const MIDDAY_PEAK: RangeInclusive<u32> = 11..=13;
const EVENING_PEAK: RangeInclusive<u32> = 19..=22;
const PEAK_MULTIPLIER: f64 = 1.2;

const VOLATILITY: Range<f64> = 0.5..2.0;
const MIN_RATE: f64 = 0.1;

/// Computes the delay between dispatch iterations from the hour of day.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingController;

impl PacingController {
    /// The pacing controller with its fixed hourly rates.
    pub fn new() -> Self {
        Self
    }

    /// The delay before the next request, with a random volatility factor in `[0.5, 2.0)`.
    pub fn next_delay<R: Rng + ?Sized>(&self, hour: u32, rng: &mut R) -> Duration {
        self.delay_with_volatility(hour, rng.random_range(VOLATILITY))
    }

    /// The delay before the next request for a fixed volatility factor.
    ///
    /// Always a positive whole number of milliseconds.
    pub fn delay_with_volatility(&self, hour: u32, volatility: f64) -> Duration {
        let rate = Self::rate(hour, volatility);
        let millis = (1000.0 / rate).floor() as u64;
        Duration::from_millis(millis.max(1))
    }

    /// Requests per second, floored at 0.1.
    pub fn rate(hour: u32, volatility: f64) -> f64 {
        let base = if NIGHT_HOURS.contains(&hour) {
            NIGHT_RATE
        } else {
            DAY_RATE
        };
        let peak = if MIDDAY_PEAK.contains(&hour) || EVENING_PEAK.contains(&hour) {
            PEAK_MULTIPLIER
        } else {
            1.0
        };

        let rate = base * peak * volatility;
        // NaN from a bad volatility also lands on the floor.
        if rate >= MIN_RATE { rate } else { MIN_RATE }
    }
}
