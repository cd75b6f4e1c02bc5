//! Application configuration.
//!
//! Loaded from an optional JSON file. Every section uses `#[serde(default)]`,
//! so a file only needs the keys it changes:
//!
//! ```json
//! {
//!   "classifier": { "calibration_min_samples": 120 },
//!   "logger": { "log_directory": "/var/log/odorwatch", "max_files": 30 },
//!   "monitor": { "interval_seconds": 0.5 }
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alerts::AlertRule;
use crate::classifier::ClassifierConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::logger::LoggerConfig;
use crate::monitor::MonitorConfig;

/// Alert rules and the built-in handlers to wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub rules: Vec<AlertRule>,
    /// Print display and sound notifications to stdout.
    pub console_enabled: bool,
    /// Translate HVAC actions into ventilation requests.
    pub hvac_enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rules: AlertRule::defaults(),
            console_enabled: true,
            hvac_enabled: true,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub alerts: AlertConfig,
    pub logger: LoggerConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.classifier.validate()?;
        self.alerts.validate()?;
        self.logger.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::model::{OdorClass, SeverityLevel};

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.alerts.rules.len(), 5);
        assert_eq!(config.monitor.interval_seconds, 1.0);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odorwatch.json");
        fs::write(
            &path,
            r#"{
                "classifier": {"calibration_min_samples": 120},
                "alerts": {"console_enabled": false, "rules": [
                    {"name": "smoke", "odor_classes": ["SMOKE"], "min_severity": "LOW",
                     "actions": ["LOG_ONLY"], "cooldown_seconds": 30}
                ]},
                "logger": {"max_files": 30}
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.classifier.calibration_min_samples, 120);
        assert_eq!(config.classifier.smoothing_window, 5);
        assert!(!config.alerts.console_enabled);
        assert!(config.alerts.hvac_enabled);
        assert_eq!(config.alerts.rules.len(), 1);
        assert_eq!(config.alerts.rules[0].odor_classes, vec![OdorClass::Smoke]);
        assert_eq!(config.alerts.rules[0].min_severity, SeverityLevel::Low);
        assert_eq!(config.logger.max_files, 30);
        assert_eq!(config.logger.buffer_size, 100);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = AppConfig::load(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("missing.json"));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_sections_rejected_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"classifier": {"baseline_percentile": 1.5}}"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::InvalidPercentile(_))
        ));
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let mut config = AppConfig::default();
        let first = config.alerts.rules[0].clone();
        config.alerts.rules.push(first);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateRule(name)) if name == "mild_odor"
        ));
    }

    #[test]
    fn test_logger_limits_rejected() {
        let mut config = AppConfig::default();
        config.logger.max_files = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogger(_))
        ));
    }
}
