//! Profile synthesis from baseline demographics and optional trend multipliers.

use rand::Rng;

use crate::{
    demographics::{
        self, APPLE_BROWSER, BIASED_AWAY_BROWSER, BROWSERS, COUNTRIES, DESKTOP_APPLE_OS, INTERESTS,
        MOBILE_APPLE_OS, OPERATING_SYSTEMS,
    },
    profile::{Gender, UserProfile},
    scenario::{Multipliers, TrafficTrends},
};

const SLOT_TYPE_BANNER: u32 = 1;
/// Synthesized slot ids are never one of the biased placements.
const SLOT_ID_RANGE: u32 = 10_000;
const PAGE_CONTEXT: &str = "content";
const UNKNOWN_CITY: &str = "Unknown";

/// Generate exactly `pool_size` independent profiles.
///
/// Missing trends are neutral: every multiplier defaults to 1.0.
pub fn synthesize<R: Rng + ?Sized>(
    pool_size: usize,
    trends: Option<&TrafficTrends>,
    rng: &mut R,
) -> Vec<UserProfile> {
    let neutral = TrafficTrends::default();
    let trends = trends.unwrap_or(&neutral);

    (0..pool_size)
        .map(|_| synthesize_one(trends, rng))
        .collect()
}

fn synthesize_one<R: Rng + ?Sized>(trends: &TrafficTrends, rng: &mut R) -> UserProfile {
    let country = pick_weighted(COUNTRIES, &trends.country_weights, rng);
    let os = pick_weighted(OPERATING_SYSTEMS, &trends.os_weights, rng);
    let browser = correct_browser(os, pick_weighted(BROWSERS, &trends.browser_weights, rng));

    let devices = demographics::devices_for(os);
    let device = devices[rng.random_range(0..devices.len())];

    let mut interests = Vec::with_capacity(2);
    for _ in 0..2 {
        if rng.random_bool(0.5) {
            interests.push(INTERESTS[rng.random_range(0..INTERESTS.len())].to_string());
        }
    }

    UserProfile {
        slot_id: format!("s_{}", rng.random_range(0..SLOT_ID_RANGE)),
        slot_type: SLOT_TYPE_BANNER,
        country: country.to_string(),
        city: UNKNOWN_CITY.to_string(),
        ip: synthesize_ip(country, rng),
        os: os.to_string(),
        browser: browser.to_string(),
        device: device.to_string(),
        app_id: format!("com.app.{}", rng.random_range(0..500)),
        age: rng.random_range(18..=57),
        gender: if rng.random_bool(0.5) {
            Gender::Male
        } else {
            Gender::Female
        },
        interests,
        page_context: PAGE_CONTEXT.to_string(),
    }
}

/// Weighted choice over `table`, each baseline weight scaled by its multiplier.
///
/// Selects the first value whose cumulative weight covers the draw. If rounding leaves the draw
/// beyond the total, the first declared value is returned.
pub(crate) fn pick_weighted<'a, R: Rng + ?Sized>(
    table: &[(&'a str, f64)],
    multipliers: &Multipliers,
    rng: &mut R,
) -> &'a str {
    let adjusted: Vec<(&str, f64)> = table
        .iter()
        .map(|&(value, weight)| (value, (weight * multipliers.get(value)).max(0.0)))
        .collect();
    let total: f64 = adjusted.iter().map(|(_, w)| w).sum();

    pick_cumulative(&adjusted, rng.random::<f64>() * total)
}

fn pick_cumulative<'a>(adjusted: &[(&'a str, f64)], draw: f64) -> &'a str {
    let mut cumulative = 0.0;
    for &(value, weight) in adjusted {
        cumulative += weight;
        if draw <= cumulative {
            return value;
        }
    }
    adjusted.first().map(|&(value, _)| value).unwrap_or_default()
}

/// Hard OS/browser consistency rules, applied after independent sampling.
fn correct_browser<'a>(os: &str, browser: &'a str) -> &'a str {
    if os == MOBILE_APPLE_OS || (os == DESKTOP_APPLE_OS && browser == BIASED_AWAY_BROWSER) {
        APPLE_BROWSER
    } else {
        browser
    }
}

fn synthesize_ip<R: Rng + ?Sized>(country: &str, rng: &mut R) -> String {
    let first = demographics::ip_prefix(country).unwrap_or_else(|| rng.random_range(10..=209));
    format!(
        "{first}.{}.{}.{}",
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random::<u8>()
    )
}
