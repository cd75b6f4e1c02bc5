use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::fmt::title_case;
use crate::model::{OdorClass, OdorEvent, SeverityLevel};

/// What an alert asks downstream consumers to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertAction {
    LogOnly,
    NotifyDisplay,
    NotifySound,
    ActivateHvac,
    NotifyFleet,
    EmergencyStop,
}

impl AlertAction {
    pub fn name(self) -> &'static str {
        match self {
            AlertAction::LogOnly => "LOG_ONLY",
            AlertAction::NotifyDisplay => "NOTIFY_DISPLAY",
            AlertAction::NotifySound => "NOTIFY_SOUND",
            AlertAction::ActivateHvac => "ACTIVATE_HVAC",
            AlertAction::NotifyFleet => "NOTIFY_FLEET",
            AlertAction::EmergencyStop => "EMERGENCY_STOP",
        }
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const DEFAULT_TEMPLATE: &str = "Air quality alert: {odor_class} detected (severity: {severity})";

/// Gate deciding which events raise an alert and what the alert does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRule {
    pub name: String,
    pub odor_classes: Vec<OdorClass>,
    pub min_severity: SeverityLevel,
    pub actions: Vec<AlertAction>,
    pub cooldown_seconds: f64,
    pub message_template: String,
    /// Higher fires first.
    pub priority: i32,
}

impl Default for AlertRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            odor_classes: Vec::new(),
            min_severity: SeverityLevel::Moderate,
            actions: vec![AlertAction::LogOnly],
            cooldown_seconds: 60.0,
            message_template: DEFAULT_TEMPLATE.to_string(),
            priority: 1,
        }
    }
}

impl AlertRule {
    fn build(
        name: &str,
        odor_classes: &[OdorClass],
        min_severity: SeverityLevel,
        actions: &[AlertAction],
        cooldown_seconds: f64,
        message_template: &str,
        priority: i32,
    ) -> Self {
        Self {
            name: name.to_string(),
            odor_classes: odor_classes.to_vec(),
            min_severity,
            actions: actions.to_vec(),
            cooldown_seconds,
            message_template: message_template.to_string(),
            priority,
        }
    }

    /// The stock rule set for a shared vehicle cabin.
    pub fn defaults() -> Vec<AlertRule> {
        use AlertAction::*;
        use OdorClass::*;

        vec![
            Self::build(
                "mild_odor",
                &[BodyOdor, FoodStrong, FoodFast],
                SeverityLevel::Low,
                &[LogOnly, ActivateHvac],
                60.0,
                "Mild {odor_class} detected - activating ventilation",
                1,
            ),
            Self::build(
                "moderate_odor",
                &[BodyOdor, Flatulence, BadBreath, FoodStrong, Smoke],
                SeverityLevel::Moderate,
                &[LogOnly, NotifyDisplay, ActivateHvac],
                30.0,
                "Moderate {odor_class} detected (confidence: {confidence})",
                2,
            ),
            Self::build(
                "high_odor",
                &OdorClass::ALL,
                SeverityLevel::High,
                &[LogOnly, NotifyDisplay, NotifySound, ActivateHvac, NotifyFleet],
                15.0,
                "HIGH {odor_class} levels detected! Immediate action recommended.",
                3,
            ),
            Self::build(
                "illness_detected",
                &[Illness],
                SeverityLevel::Moderate,
                &[LogOnly, NotifyDisplay, NotifySound, NotifyFleet, EmergencyStop],
                10.0,
                "Possible illness detected in vehicle - fleet notified",
                5,
            ),
            Self::build(
                "smoke_detected",
                &[Smoke],
                SeverityLevel::Low,
                &[LogOnly, NotifyDisplay, NotifySound, ActivateHvac],
                30.0,
                "Smoke detected in vehicle - no smoking policy reminder",
                3,
            ),
        ]
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(invalid("cooldown_seconds must be finite and non-negative"));
        }
        if self.odor_classes.is_empty() {
            return Err(invalid("odor_classes must not be empty"));
        }
        if self.actions.is_empty() {
            return Err(invalid("actions must not be empty"));
        }
        Ok(())
    }

    /// Whether `event` passes this rule's class and severity gates.
    /// Cooldown is tracked by the manager.
    pub fn matches(&self, event: &OdorEvent) -> bool {
        self.odor_classes.contains(&event.odor_class)
            && event.severity.rank() >= self.min_severity.rank()
    }

    pub fn render_message(&self, event: &OdorEvent) -> String {
        render_message(&self.message_template, event)
    }
}

/// Expands `{odor_class}`, `{severity}`, `{confidence}`, `{temperature}` and
/// `{humidity}` in `template`. Unknown placeholders are left untouched.
pub fn render_message(template: &str, event: &OdorEvent) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };

        let key = &tail[1..close];
        match placeholder(key, event) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    out
}

fn placeholder(key: &str, event: &OdorEvent) -> Option<String> {
    let value = match key {
        "odor_class" => title_case(event.odor_class.name()),
        "severity" => event.severity.name().to_lowercase(),
        "confidence" => format!("{:.0}%", event.confidence * 100.0),
        "temperature" => format!("{:.1}°C", event.temperature),
        "humidity" => format!("{:.1}%", event.humidity),
        _ => return None,
    };
    Some(value)
}
