//! Probabilistic click and conversion decisions.

use rand::Rng;
use tracing::debug;

use crate::{profile::UserProfile, scenario::FeatureModifier};

/// Base click-through rate before any adjustment.
pub const BASE_CLICK_RATE: f64 = 0.01;
/// Base conversion rate, conditional on a click.
pub const BASE_CONVERSION_RATE: f64 = 0.05;

const INTERSTITIAL_SLOT: &str = "slot_interstitial";
const IN_ARTICLE_SLOT: &str = "slot_in_article";
const INTERSTITIAL_CONVERSION: f64 = 0.5;
const IN_ARTICLE_CONVERSION: f64 = 1.2;
const SHOPPING_INTEREST: &str = "shopping";
const SHOPPING_CONVERSION: f64 = 1.5;

/// Click-through multiplier for a slot. Unknown slots are neutral.
pub fn slot_click_bias(slot_id: &str) -> f64 {
    match slot_id {
        "slot_hero_top" => 5.0,
        "slot_in_article" => 3.5,
        "slot_feed_native" => 2.5,
        "slot_interstitial" => 8.0,
        "slot_sidebar" => 1.0,
        "slot_footer_fixed" => 0.6,
        _ => 1.0,
    }
}

/// Decides whether a served ad is clicked and whether a click converts.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeModel;

impl OutcomeModel {
    /// The outcome model with its fixed base rates.
    pub fn new() -> Self {
        Self
    }

    /// Click probability for this profile, clamped to `[0, 1]`.
    pub fn click_probability(&self, profile: &UserProfile, modifiers: &[FeatureModifier]) -> f64 {
        let slot_adjusted = BASE_CLICK_RATE * slot_click_bias(&profile.slot_id);

        let probability = modifiers
            .iter()
            .filter(|m| profile.field_matches(&m.field, &m.value))
            .fold(slot_adjusted, |p, m| p * m.weight);

        clamp_probability(probability)
    }

    /// Conversion probability for this profile, assuming it has already clicked.
    pub fn conversion_probability(&self, profile: &UserProfile) -> f64 {
        let mut probability = BASE_CONVERSION_RATE;

        match profile.slot_id.as_str() {
            INTERSTITIAL_SLOT => probability *= INTERSTITIAL_CONVERSION,
            IN_ARTICLE_SLOT => probability *= IN_ARTICLE_CONVERSION,
            _ => {}
        }
        if profile.has_interest(SHOPPING_INTEREST) {
            probability *= SHOPPING_CONVERSION;
        }

        clamp_probability(probability)
    }

    /// Should this impression be clicked?
    pub fn should_click<R: Rng + ?Sized>(
        &self,
        profile: &UserProfile,
        modifiers: &[FeatureModifier],
        rng: &mut R,
    ) -> bool {
        let probability = self.click_probability(profile, modifiers);
        let roll = rng.random::<f64>();
        let clicked = decide(probability, roll);
        if clicked {
            debug!(slot = %profile.slot_id, probability, roll, "Click");
        }
        clicked
    }

    /// Should this click convert? Only meaningful after a positive click.
    pub fn should_convert<R: Rng + ?Sized>(&self, profile: &UserProfile, rng: &mut R) -> bool {
        let probability = self.conversion_probability(profile);
        let roll = rng.random::<f64>();
        let converted = decide(probability, roll);
        if converted {
            debug!(slot = %profile.slot_id, probability, roll, "Conversion");
        }
        converted
    }
}

/// A uniform roll in `[0, 1)` wins iff it is strictly below the probability.
pub fn decide(probability: f64, roll: f64) -> bool {
    roll < probability
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}
