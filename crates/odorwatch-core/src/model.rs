//! Core value types shared by the classifier, alert engine and data logger.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::fmt::round_to;

/// One sample from the cabin gas sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %RH.
    pub humidity: f64,
    /// Barometric pressure in hPa.
    pub pressure: f64,
    /// Gas sensor resistance in Ω. Lower means more VOCs.
    pub gas_resistance: f64,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
}

/// Odor categories the classifier can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OdorClass {
    Clean,
    BodyOdor,
    Flatulence,
    BadBreath,
    FoodStrong,
    FoodFast,
    Smoke,
    Illness,
    UnknownFoul,
}

impl OdorClass {
    /// Every class, in enumeration order.
    pub const ALL: [OdorClass; 9] = [
        OdorClass::Clean,
        OdorClass::BodyOdor,
        OdorClass::Flatulence,
        OdorClass::BadBreath,
        OdorClass::FoodStrong,
        OdorClass::FoodFast,
        OdorClass::Smoke,
        OdorClass::Illness,
        OdorClass::UnknownFoul,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OdorClass::Clean => "CLEAN",
            OdorClass::BodyOdor => "BODY_ODOR",
            OdorClass::Flatulence => "FLATULENCE",
            OdorClass::BadBreath => "BAD_BREATH",
            OdorClass::FoodStrong => "FOOD_STRONG",
            OdorClass::FoodFast => "FOOD_FAST",
            OdorClass::Smoke => "SMOKE",
            OdorClass::Illness => "ILLNESS",
            OdorClass::UnknownFoul => "UNKNOWN_FOUL",
        }
    }

    /// Position in [`OdorClass::ALL`]. Profile matching scans in this order.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OdorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity ladder.
///
/// Ordering is defined by [`SeverityLevel::rank`], not by declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    None,
    Low,
    Moderate,
    High,
    Severe,
}

impl SeverityLevel {
    pub const fn rank(self) -> u8 {
        match self {
            SeverityLevel::None => 0,
            SeverityLevel::Low => 1,
            SeverityLevel::Moderate => 2,
            SeverityLevel::High => 3,
            SeverityLevel::Severe => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SeverityLevel::None => "NONE",
            SeverityLevel::Low => "LOW",
            SeverityLevel::Moderate => "MODERATE",
            SeverityLevel::High => "HIGH",
            SeverityLevel::Severe => "SEVERE",
        }
    }
}

impl Ord for SeverityLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for SeverityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Qualitative bucket for how fast the gas resistance is moving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetRate {
    Rapid,
    Moderate,
    Gradual,
    Stable,
    Recovery,
}

impl OnsetRate {
    /// Buckets a mean relative rate (fraction per second).
    /// Cutoffs are evaluated most-negative first.
    pub fn from_mean_rate(rate: f64) -> Self {
        if rate < -0.1 {
            OnsetRate::Rapid
        } else if rate < -0.02 {
            OnsetRate::Moderate
        } else if rate < -0.005 {
            OnsetRate::Gradual
        } else if rate > 0.02 {
            OnsetRate::Recovery
        } else {
            OnsetRate::Stable
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OnsetRate::Rapid => "rapid",
            OnsetRate::Moderate => "moderate",
            OnsetRate::Gradual => "gradual",
            OnsetRate::Stable => "stable",
            OnsetRate::Recovery => "recovery",
        }
    }
}

/// Classification result for one reading. Never mutated after creation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OdorEvent {
    pub odor_class: OdorClass,
    pub severity: SeverityLevel,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Raw (uncompensated) gas resistance in Ω.
    pub gas_resistance: f64,
    pub timestamp: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl OdorEvent {
    /// The event used while calibrating or when no baseline exists.
    pub fn clean(gas_resistance: f64, temperature: f64, humidity: f64, timestamp: f64) -> Self {
        Self {
            odor_class: OdorClass::Clean,
            severity: SeverityLevel::None,
            confidence: 0.0,
            gas_resistance,
            timestamp,
            temperature,
            humidity,
        }
    }

    pub fn is_notable(&self) -> bool {
        self.severity != SeverityLevel::None
    }

    /// JSON payload handed to alert handlers and external consumers.
    pub fn to_payload(&self) -> Value {
        json!({
            "odor_class": self.odor_class.name(),
            "severity": self.severity.name(),
            "confidence": round_to(self.confidence, 3),
            "gas_resistance": round_to(self.gas_resistance, 2),
            "timestamp": self.timestamp,
            "temperature": round_to(self.temperature, 2),
            "humidity": round_to(self.humidity, 2),
        })
    }
}
