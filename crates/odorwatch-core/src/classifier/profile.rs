//! Heuristic odor profiles and the confidence-weighted matcher.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{OdorClass, OnsetRate};

/// Confidence reported when no profile covers the observed drop.
pub const UNKNOWN_CONFIDENCE: f64 = 0.3;
const MIN_MATCH_CONFIDENCE: f64 = 0.4;
const RATE_MATCH_BOOST: f64 = 0.2;
const MAX_CONFIDENCE: f64 = 0.95;

/// Expected resistance drop range and onset speed for one odor class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdorProfile {
    pub class: OdorClass,
    /// Lower bound of `1 - ratio`, inclusive.
    pub drop_min: f64,
    /// Upper bound of `1 - ratio`, inclusive.
    pub drop_max: f64,
    pub onset: OnsetRate,
}

impl OdorProfile {
    pub fn new(class: OdorClass, drop_min: f64, drop_max: f64, onset: OnsetRate) -> Self {
        Self {
            class,
            drop_min,
            drop_max,
            onset,
        }
    }

    /// Profiles based on typical VOC characteristics of each odor source.
    pub fn defaults() -> Vec<OdorProfile> {
        vec![
            OdorProfile::new(OdorClass::BodyOdor, 0.3, 0.7, OnsetRate::Gradual),
            OdorProfile::new(OdorClass::Flatulence, 0.2, 0.6, OnsetRate::Rapid),
            OdorProfile::new(OdorClass::BadBreath, 0.5, 0.8, OnsetRate::Moderate),
            OdorProfile::new(OdorClass::FoodStrong, 0.2, 0.5, OnsetRate::Gradual),
            OdorProfile::new(OdorClass::FoodFast, 0.3, 0.6, OnsetRate::Moderate),
            OdorProfile::new(OdorClass::Smoke, 0.1, 0.4, OnsetRate::Gradual),
            OdorProfile::new(OdorClass::Illness, 0.05, 0.3, OnsetRate::Rapid),
        ]
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidProfile {
            class: self.class,
            reason: reason.to_string(),
        };

        if matches!(self.class, OdorClass::Clean | OdorClass::UnknownFoul) {
            return Err(invalid("CLEAN and UNKNOWN_FOUL cannot carry a profile"));
        }
        if !self.drop_min.is_finite() || !self.drop_max.is_finite() {
            return Err(invalid("drop range must be finite"));
        }
        if !(0.0..=1.0).contains(&self.drop_min) || !(0.0..=1.0).contains(&self.drop_max) {
            return Err(invalid("drop range must lie within [0, 1]"));
        }
        if self.drop_min >= self.drop_max {
            return Err(invalid("drop_min must be below drop_max"));
        }
        Ok(())
    }

    /// Confidence that `drop` with the given onset belongs to this profile,
    /// `None` when the drop is outside the profile's range.
    pub fn score(&self, drop: f64, onset: OnsetRate) -> Option<f64> {
        if drop < self.drop_min || drop > self.drop_max {
            return None;
        }
        let center = (self.drop_min + self.drop_max) / 2.0;
        let half_width = (self.drop_max - self.drop_min) / 2.0;
        let distance = (drop - center).abs() / half_width;
        let mut confidence = (1.0 - distance * 0.5).max(MIN_MATCH_CONFIDENCE);
        if onset == self.onset {
            confidence = (confidence + RATE_MATCH_BOOST).min(MAX_CONFIDENCE);
        }
        Some(confidence)
    }
}

/// Orders profiles by class enumeration order. Ties in [`best_match`] go to the
/// earliest class, independent of how the profiles were configured.
pub(crate) fn sort_profiles(profiles: &mut [OdorProfile]) {
    profiles.sort_by_key(|p| p.class.index());
}

/// Scans `profiles` (already in enumeration order) for the best-scoring class.
///
/// Starts from `(UNKNOWN_FOUL, 0.3)`; a candidate replaces the current best
/// only when its confidence is strictly greater.
pub fn best_match(profiles: &[OdorProfile], drop: f64, onset: OnsetRate) -> (OdorClass, f64) {
    let mut best = (OdorClass::UnknownFoul, UNKNOWN_CONFIDENCE);
    for profile in profiles {
        if let Some(confidence) = profile.score(drop, onset)
            && confidence > best.1
        {
            best = (profile.class, confidence);
        }
    }
    best
}
