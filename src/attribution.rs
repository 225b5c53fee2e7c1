//! Modelled delays between an impression and its click or conversion.
//!
//! Clicks follow within seconds. Conversions follow the click after a one-minute floor plus a
//! long tail: cubing a uniform sample bunches most conversions close to the floor while still
//! allowing the occasional purchase a day later.

use std::ops::Range;

use rand::Rng;
use tokio::time::Duration;

/// Click delay range, in milliseconds.
pub const CLICK_DELAY_MS: Range<u64> = 5_000..45_000;
/// Minimum gap between a click and its conversion.
pub const CONVERSION_FLOOR: Duration = Duration::from_secs(60);
/// Conversions always land within this window after the click.
pub const CONVERSION_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Substituted with a monetary amount in conversion URLs.
pub const VALUE_PLACEHOLDER: &str = "{value}";
const CONVERSION_VALUE: Range<f64> = 1.0..500.0;

/// Delay between an impression and its click.
pub fn click_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.random_range(CLICK_DELAY_MS))
}

/// Delay between an impression and its conversion, given the click delay.
pub fn conversion_delay<R: Rng + ?Sized>(click_delay: Duration, rng: &mut R) -> Duration {
    conversion_delay_for_sample(click_delay, rng.random::<f64>())
}

/// Conversion delay for a uniform sample in `[0, 1)`.
///
/// Always in `[click + floor, click + horizon)`.
pub fn conversion_delay_for_sample(click_delay: Duration, sample: f64) -> Duration {
    let tail_span = (CONVERSION_HORIZON - CONVERSION_FLOOR).as_millis() as f64;
    let tail_ms = (sample.clamp(0.0, 1.0).powi(3) * tail_span).floor() as u64;
    // A sample of exactly 1.0 is outside the contract; keep the result inside the horizon.
    let tail = Duration::from_millis(tail_ms.min(tail_span as u64 - 1));
    click_delay + CONVERSION_FLOOR + tail
}

/// Replace any value placeholder in `url` with a random amount, e.g. `137.42`.
pub fn substitute_value<R: Rng + ?Sized>(url: &str, rng: &mut R) -> String {
    if !url.contains(VALUE_PLACEHOLDER) {
        return url.to_string();
    }
    let amount = rng.random_range(CONVERSION_VALUE);
    url.replace(VALUE_PLACEHOLDER, &format!("{amount:.2}"))
}
