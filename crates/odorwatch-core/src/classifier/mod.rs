//! Streaming odor classifier.
//!
//! Each reading goes through the same pipeline:
//!
//! ```text
//! raw Ω ─► compensation ─► smoothing ─► rate tracking ─► baseline update
//!                                                            │
//!                 calibration gate ◄─────────────────────────┘
//!                        │
//!                 severity ladder (smoothed / baseline)
//!                        │
//!                 profile match (drop = 1 - ratio, onset rate)
//! ```
//!
//! The baseline is a high percentile of recent smoothed values, so it follows
//! the cleaner end of recent air and tolerates transient pollution without a
//! labeled clean period.

mod config;
mod profile;
mod window;

pub use config::{ClassifierConfig, SeverityThresholds};
pub use profile::{OdorProfile, UNKNOWN_CONFIDENCE, best_match};
pub use window::Window;

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ConfigResult;
use crate::model::{OdorClass, OdorEvent, OnsetRate, SeverityLevel};

/// Baseline is only computed once the window holds this many samples.
const MIN_BASELINE_SAMPLES: usize = 10;
const RECENT_EVENTS_CAPACITY: usize = 100;

/// Snapshot of classifier state for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierStats {
    pub is_calibrating: bool,
    pub baseline_resistance: Option<f64>,
    pub samples_collected: usize,
    pub recent_events_count: usize,
    /// 0.0 to 1.0
    pub calibration_progress: f64,
}

pub struct OdorClassifier {
    config: ClassifierConfig,
    baseline_window: Window,
    smoothing_window: Window,
    rate_history: Window,
    /// Previous smoothed resistance and its timestamp.
    prev: Option<(f64, f64)>,
    baseline: Option<f64>,
    calibration_samples: usize,
    calibrating: bool,
    recent_events: VecDeque<OdorEvent>,
}

impl OdorClassifier {
    pub fn new(config: ClassifierConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(mut config: ClassifierConfig) -> Self {
        profile::sort_profiles(&mut config.profiles);
        Self {
            baseline_window: Window::new(config.baseline_window_size),
            smoothing_window: Window::new(config.smoothing_window),
            rate_history: Window::new(config.rate_history_size),
            prev: None,
            baseline: None,
            calibration_samples: 0,
            calibrating: config.calibration_min_samples > 0,
            recent_events: VecDeque::with_capacity(RECENT_EVENTS_CAPACITY),
            config,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies one reading. Called once per tick.
    pub fn process_reading(
        &mut self,
        gas_resistance: f64,
        temperature: f64,
        humidity: f64,
        timestamp: f64,
    ) -> OdorEvent {
        let compensated = self.compensate(gas_resistance, temperature, humidity);

        self.smoothing_window.push(compensated);
        let smoothed = self.smoothing_window.mean().unwrap_or(compensated);

        let onset = self.update_rate(smoothed, timestamp);
        self.update_baseline(smoothed);

        if self.calibrating {
            self.calibration_samples += 1;
            if self.calibration_samples >= self.config.calibration_min_samples {
                self.calibrating = false;
                info!(
                    baseline = ?self.baseline,
                    "Calibration complete after {} samples", self.calibration_samples
                );
            }
            return OdorEvent::clean(gas_resistance, temperature, humidity, timestamp);
        }

        let (odor_class, severity, confidence) = self.classify(smoothed, onset);
        let event = OdorEvent {
            odor_class,
            severity,
            confidence,
            gas_resistance,
            timestamp,
            temperature,
            humidity,
        };

        if event.is_notable() {
            if self.recent_events.len() == RECENT_EVENTS_CAPACITY {
                self.recent_events.pop_front();
            }
            self.recent_events.push_back(event);
        }

        event
    }

    /// Linear temperature and humidity correction.
    pub fn compensate(&self, resistance: f64, temperature: f64, humidity: f64) -> f64 {
        let c = &self.config;
        let temp_factor = 1.0 + c.temp_coefficient * (temperature - c.temp_reference);
        let humidity_factor = 1.0 + c.humidity_coefficient * (humidity - c.humidity_reference);
        resistance * temp_factor * humidity_factor
    }

    fn update_rate(&mut self, resistance: f64, timestamp: f64) -> OnsetRate {
        let Some((prev_resistance, prev_timestamp)) = self.prev.replace((resistance, timestamp))
        else {
            return OnsetRate::Stable;
        };

        let dt = timestamp - prev_timestamp;
        if dt > 0.0 && prev_resistance != 0.0 {
            let rate = (resistance - prev_resistance) / (prev_resistance * dt);
            if rate.is_finite() {
                self.rate_history.push(rate);
            }
        }

        match self.rate_history.mean() {
            Some(mean) => OnsetRate::from_mean_rate(mean),
            None => OnsetRate::Stable,
        }
    }

    fn update_baseline(&mut self, resistance: f64) {
        self.baseline_window.push(resistance);
        if self.baseline_window.len() >= MIN_BASELINE_SAMPLES {
            self.baseline = self
                .baseline_window
                .percentile(self.config.baseline_percentile);
        }
    }

    fn classify(&self, resistance: f64, onset: OnsetRate) -> (OdorClass, SeverityLevel, f64) {
        let Some(baseline) = self.baseline.filter(|b| *b > 0.0) else {
            return (OdorClass::Clean, SeverityLevel::None, 0.0);
        };

        let ratio = resistance / baseline;
        let severity = self.config.thresholds.grade(ratio);
        if severity == SeverityLevel::None {
            return (OdorClass::Clean, severity, 1.0);
        }

        let drop = 1.0 - ratio;
        let (odor_class, confidence) = best_match(&self.config.profiles, drop, onset);
        debug!(
            ratio,
            drop,
            onset = onset.name(),
            class = %odor_class,
            confidence,
            "Odor pattern matched"
        );
        (odor_class, severity, confidence)
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Most recent notable events, oldest first.
    pub fn recent_events(&self, count: usize) -> Vec<OdorEvent> {
        let skip = self.recent_events.len().saturating_sub(count);
        self.recent_events.iter().skip(skip).copied().collect()
    }

    pub fn calibration_progress(&self) -> f64 {
        if self.config.calibration_min_samples == 0 {
            return 1.0;
        }
        (self.calibration_samples as f64 / self.config.calibration_min_samples as f64).min(1.0)
    }

    pub fn get_statistics(&self) -> ClassifierStats {
        ClassifierStats {
            is_calibrating: self.calibrating,
            baseline_resistance: self.baseline,
            samples_collected: self.baseline_window.len(),
            recent_events_count: self.recent_events.len(),
            calibration_progress: self.calibration_progress(),
        }
    }

    /// Drops the baseline and restarts calibration, e.g. after occupancy changes.
    pub fn reset_baseline(&mut self) {
        self.baseline_window.clear();
        self.baseline = None;
        self.calibration_samples = 0;
        self.calibrating = self.config.calibration_min_samples > 0;
        info!("Baseline reset, recalibrating");
    }
}

impl Default for OdorClassifier {
    fn default() -> Self {
        Self::build(ClassifierConfig::default())
    }
}
