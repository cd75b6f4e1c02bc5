use serde::{Deserialize, Serialize};

use super::profile::OdorProfile;
use crate::error::{ConfigError, ConfigResult};
use crate::model::SeverityLevel;

/// Ratio thresholds separating the severity levels.
///
/// A ratio strictly greater than a threshold stops at the level above it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// 30% drop in resistance
    pub low: f64,
    /// 50% drop
    pub moderate: f64,
    /// 70% drop
    pub high: f64,
    /// 85% drop
    pub severe: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 0.7,
            moderate: 0.5,
            high: 0.3,
            severe: 0.15,
        }
    }
}

impl SeverityThresholds {
    pub fn grade(&self, ratio: f64) -> SeverityLevel {
        if ratio > self.low {
            SeverityLevel::None
        } else if ratio > self.moderate {
            SeverityLevel::Low
        } else if ratio > self.high {
            SeverityLevel::Moderate
        } else if ratio > self.severe {
            SeverityLevel::High
        } else {
            SeverityLevel::Severe
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let t = [self.low, self.moderate, self.high, self.severe];
        let in_range = t.iter().all(|v| v.is_finite() && *v > 0.0 && *v < 1.0);
        let decreasing = t.windows(2).all(|w| w[0] > w[1]);
        if in_range && decreasing {
            Ok(())
        } else {
            Err(ConfigError::InvalidThresholds(t))
        }
    }
}

/// Configuration for the odor classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Samples kept for baseline tracking (5 minutes at 1 Hz).
    pub baseline_window_size: usize,
    /// Percentile of the baseline window used as the clean-air reference.
    pub baseline_percentile: f64,
    pub thresholds: SeverityThresholds,

    /// Reference temperature (°C) for compensation.
    pub temp_reference: f64,
    /// Fractional correction per °C.
    pub temp_coefficient: f64,
    /// Reference humidity (%RH) for compensation.
    pub humidity_reference: f64,
    /// Fractional correction per %RH.
    pub humidity_coefficient: f64,

    /// Moving-average window over compensated resistance.
    pub smoothing_window: usize,
    /// Samples processed before classification is trusted.
    pub calibration_min_samples: usize,
    /// Instantaneous rates averaged for onset classification.
    pub rate_history_size: usize,

    pub profiles: Vec<OdorProfile>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            baseline_window_size: 300,
            baseline_percentile: 0.9,
            thresholds: SeverityThresholds::default(),
            temp_reference: 25.0,
            temp_coefficient: 0.02,
            humidity_reference: 40.0,
            humidity_coefficient: 0.01,
            smoothing_window: 5,
            calibration_min_samples: 60,
            rate_history_size: 10,
            profiles: OdorProfile::defaults(),
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.baseline_window_size == 0 {
            return Err(ConfigError::InvalidWindow("baseline_window_size"));
        }
        if self.smoothing_window == 0 {
            return Err(ConfigError::InvalidWindow("smoothing_window"));
        }
        if self.rate_history_size == 0 {
            return Err(ConfigError::InvalidWindow("rate_history_size"));
        }
        if !(0.0..=1.0).contains(&self.baseline_percentile) {
            return Err(ConfigError::InvalidPercentile(self.baseline_percentile));
        }
        for (name, value) in [
            ("temp_reference", self.temp_reference),
            ("temp_coefficient", self.temp_coefficient),
            ("humidity_reference", self.humidity_reference),
            ("humidity_coefficient", self.humidity_coefficient),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
        }
        self.thresholds.validate()?;

        let mut seen = Vec::with_capacity(self.profiles.len());
        for profile in &self.profiles {
            profile.validate()?;
            if seen.contains(&profile.class) {
                return Err(ConfigError::InvalidProfile {
                    class: profile.class,
                    reason: "duplicate profile".to_string(),
                });
            }
            seen.push(profile.class);
        }
        Ok(())
    }
}
