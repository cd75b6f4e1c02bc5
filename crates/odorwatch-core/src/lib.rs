//! odorwatch-core: cabin air quality pipeline.
//!
//! Provides:
//! - `model`: sensor readings, odor classes, severity ladder, odor events
//! - `classifier`: streaming odor classifier (compensation, baseline, profiles)
//! - `alerts`: rule engine with per-rule cooldown and action handlers
//! - `logger`: asynchronous CSV / JSON-Lines data logger with rotation
//! - `sensor`: sensor source abstraction plus simulated and replay sources
//! - `monitor`: fixed-cadence orchestrator wiring everything together
//! - `config`: serde-backed application configuration
//! - `error`: error types for each concern
//! - `fmt`: shared formatting helpers

pub mod alerts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fmt;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod sensor;

pub use alerts::{Alert, AlertAction, AlertManager, AlertRule};
pub use classifier::{ClassifierConfig, OdorClassifier};
pub use config::AppConfig;
pub use logger::{DataLogger, LoggerConfig};
pub use model::{OdorClass, OdorEvent, OnsetRate, SensorReading, SeverityLevel};
pub use monitor::{Monitor, MonitorState, SessionSummary};
pub use sensor::SensorSource;
