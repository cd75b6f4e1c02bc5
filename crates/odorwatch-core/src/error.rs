//! Error types, one enum per concern.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::OdorClass;
use crate::monitor::MonitorState;

pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type AlertResult<T> = Result<T, AlertError>;
pub type LoggerResult<T> = Result<T, LoggerError>;
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Failure of a single sensor read. Recovered per tick by the monitor.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),

    #[error("sensor I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed sensor data: {0}")]
    Parse(String),

    /// The source has no more readings (end of a replay file).
    #[error("sensor source exhausted")]
    Exhausted,

    #[error("sensor is closed")]
    Closed,
}

/// Rejected configuration. Only raised before the sampling loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("severity thresholds must be strictly decreasing within (0, 1), got {0:?}")]
    InvalidThresholds([f64; 4]),

    #[error("baseline percentile must be within [0, 1], got {0}")]
    InvalidPercentile(f64),

    #[error("{0} must be at least 1")]
    InvalidWindow(&'static str),

    #[error("{0} must be a finite number")]
    NotFinite(&'static str),

    #[error("odor profile {class}: {reason}")]
    InvalidProfile { class: OdorClass, reason: String },

    #[error("alert rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("duplicate alert rule '{0}'")]
    DuplicateRule(String),

    #[error("logger: {0}")]
    InvalidLogger(String),

    #[error("monitor: {0}")]
    InvalidMonitor(String),

    #[error("failed to read config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Failure reported by an alert handler. Isolated per handler during dispatch.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to spawn logger worker: {0}")]
    Spawn(io::Error),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logger(#[from] LoggerError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("monitor is {actual}, expected {expected}")]
    InvalidState {
        actual: MonitorState,
        expected: MonitorState,
    },

    #[error("monitor is not initialized")]
    NotInitialized,
}
