//! Fixed-cadence monitoring loop.
//!
//! One tick: read the sensor, log the reading, classify it, log notable
//! events, run the alert rules, report a status line. A failed tick is
//! logged and counted and the loop moves on. The loop sleeps for whatever is
//! left of the interval after processing, so the cadence holds under load.
//!
//! ```text
//! Idle ──run()──► Running ──interrupt / duration cap / sensor exhausted──► Stopped
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertAction, AlertManager, ConsoleHandler, LogHandler, hvac_handler};
use crate::classifier::OdorClassifier;
use crate::config::AppConfig;
use crate::error::{ConfigError, ConfigResult, MonitorError, MonitorResult, SensorError};
use crate::fmt::{format_duration, title_case};
use crate::logger::DataLogger;
use crate::model::{OdorEvent, SensorReading, SeverityLevel};
use crate::sensor::SensorSource;

/// Shutdown checks happen at least this often while sleeping between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Target time between the starts of two ticks.
    pub interval_seconds: f64,
    /// Stop on its own after this long. Runs until interrupted when unset.
    pub max_duration_seconds: Option<f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 1.0,
            max_duration_seconds: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_seconds("interval_seconds", self.interval_seconds)?;
        if let Some(max) = self.max_duration_seconds {
            check_seconds("max_duration_seconds", max)?;
        }
        Ok(())
    }
}

/// Positive and representable as a [`Duration`].
fn check_seconds(name: &str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidMonitor(format!(
            "{name} must be positive, got {value}"
        )));
    }
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(ConfigError::InvalidMonitor(format!(
            "{name} is too large, got {value}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonitorState::Idle => "idle",
            MonitorState::Running => "running",
            MonitorState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub samples_total: u64,
    pub samples_with_odor: u64,
    pub alerts_generated: u64,
    pub errors: u64,
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub runtime_seconds: f64,
    #[serde(flatten)]
    pub stats: MonitorStats,
    pub baseline_resistance: Option<f64>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session summary")?;
        writeln!(
            f,
            "  Runtime:          {:.1}s ({})",
            self.runtime_seconds,
            format_duration(self.runtime_seconds as u64)
        )?;
        writeln!(f, "  Total samples:    {}", self.stats.samples_total)?;
        writeln!(f, "  Odor detections:  {}", self.stats.samples_with_odor)?;
        writeln!(f, "  Alerts generated: {}", self.stats.alerts_generated)?;
        writeln!(f, "  Errors:           {}", self.stats.errors)?;
        match self.baseline_resistance {
            Some(b) => write!(f, "  Baseline:         {b:.0}Ω"),
            None => write!(f, "  Baseline:         Not established"),
        }
    }
}

/// Everything one successful tick produced.
#[derive(Debug, Clone)]
pub struct Tick {
    pub reading: SensorReading,
    pub event: OdorEvent,
    pub alerts: Vec<Alert>,
}

type StatusCallback = Box<dyn FnMut(&str) + Send>;

pub struct Monitor<S: SensorSource> {
    config: AppConfig,
    sensor: S,
    classifier: Option<OdorClassifier>,
    alerts: AlertManager,
    logger: Option<DataLogger>,
    state: MonitorState,
    stats: MonitorStats,
    started: Option<Instant>,
    summary: Option<SessionSummary>,
    on_status: Option<StatusCallback>,
}

impl<S: SensorSource> Monitor<S> {
    /// Validates `config` and builds the alert rule set. Nothing is started yet.
    pub fn new(config: AppConfig, sensor: S) -> MonitorResult<Self> {
        config.validate()?;
        let alerts = AlertManager::from_rules(config.alerts.rules.clone())?;
        Ok(Self {
            config,
            sensor,
            classifier: None,
            alerts,
            logger: None,
            state: MonitorState::Idle,
            stats: MonitorStats::default(),
            started: None,
            summary: None,
            on_status: None,
        })
    }

    /// Creates the classifier and logger, wires the built-in alert handlers
    /// and starts the logger worker. On failure the monitor stays idle.
    pub fn initialize(&mut self) -> MonitorResult<()> {
        if self.state != MonitorState::Idle {
            return Err(MonitorError::InvalidState {
                actual: self.state,
                expected: MonitorState::Idle,
            });
        }
        if self.is_initialized() {
            return Ok(());
        }

        let classifier = OdorClassifier::new(self.config.classifier.clone())?;
        let mut logger = DataLogger::new(self.config.logger.clone())?;
        logger.start()?;

        self.alerts.register_handler(AlertAction::LogOnly, LogHandler);
        if self.config.alerts.console_enabled {
            self.alerts
                .register_handler(AlertAction::NotifyDisplay, ConsoleHandler::stdout());
            self.alerts
                .register_handler(AlertAction::NotifySound, ConsoleHandler::stdout());
        }
        if self.config.alerts.hvac_enabled {
            self.alerts.register_handler(
                AlertAction::ActivateHvac,
                hvac_handler(|level| {
                    info!("HVAC ventilation request: {}%", level);
                    Ok::<(), std::convert::Infallible>(())
                }),
            );
        }

        info!(
            "Monitor initialized: sensor {}, {} alert rules, interval {}s",
            self.sensor.describe(),
            self.alerts.rules().len(),
            self.config.monitor.interval_seconds
        );
        self.classifier = Some(classifier);
        self.logger = Some(logger);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.classifier.is_some() && self.logger.is_some()
    }

    /// Receives the status line after every successful tick.
    pub fn set_status_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.on_status = Some(Box::new(callback));
    }

    /// Reads and processes one sample.
    pub fn step(&mut self) -> MonitorResult<Tick> {
        let runtime = self.runtime_seconds();
        let (Some(classifier), Some(logger)) = (self.classifier.as_mut(), self.logger.as_ref())
        else {
            return Err(MonitorError::NotInitialized);
        };

        let reading = self.sensor.read()?;
        self.stats.samples_total += 1;
        logger.log_reading(&reading);

        let event = classifier.process_reading(
            reading.gas_resistance,
            reading.temperature,
            reading.humidity,
            reading.timestamp,
        );
        if event.is_notable() {
            logger.log_event(&event);
            self.stats.samples_with_odor += 1;
        }

        let alerts = self.alerts.process_event(&event);
        self.stats.alerts_generated += alerts.len() as u64;

        let calibration = classifier
            .is_calibrating()
            .then(|| classifier.calibration_progress());
        let line = status_line(runtime, &reading, &event, calibration);
        match self.on_status.as_mut() {
            Some(callback) => callback(&line),
            None => debug!("{}", line),
        }

        Ok(Tick {
            reading,
            event,
            alerts,
        })
    }

    /// Runs ticks until `running` is cleared, the duration cap is hit or the
    /// sensor is exhausted, then shuts down and returns the summary.
    pub fn run(&mut self, running: &AtomicBool) -> MonitorResult<SessionSummary> {
        if self.state != MonitorState::Idle {
            return Err(MonitorError::InvalidState {
                actual: self.state,
                expected: MonitorState::Idle,
            });
        }
        self.initialize()?;

        self.state = MonitorState::Running;
        self.started = Some(Instant::now());
        let interval = Duration::from_secs_f64(self.config.monitor.interval_seconds);
        let max_duration = self
            .config
            .monitor
            .max_duration_seconds
            .map(Duration::from_secs_f64);
        info!("Starting air quality monitoring (interval {:?})", interval);

        while running.load(Ordering::SeqCst) {
            if let (Some(max), Some(started)) = (max_duration, self.started)
                && started.elapsed() >= max
            {
                info!("Reached configured duration of {:?}", max);
                break;
            }

            let tick_start = Instant::now();
            match self.step() {
                Ok(_) => {}
                Err(MonitorError::Sensor(SensorError::Exhausted)) => {
                    info!("Sensor source exhausted");
                    break;
                }
                Err(MonitorError::Sensor(SensorError::Closed)) => {
                    warn!("Sensor closed, stopping");
                    break;
                }
                Err(e) => {
                    self.stats.errors += 1;
                    error!("Error in sampling loop: {}", e);
                }
            }

            let remaining = interval.saturating_sub(tick_start.elapsed());
            sleep_while_running(remaining, running);
        }

        Ok(self.shutdown())
    }

    /// Writes the `session_end` record, stops the logger and closes the
    /// sensor. Only the first call does the work; later calls return the
    /// same summary.
    pub fn shutdown(&mut self) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        info!("Shutting down monitor");

        let summary = SessionSummary {
            runtime_seconds: self.runtime_seconds(),
            stats: self.stats,
            baseline_resistance: self.classifier.as_ref().and_then(|c| c.baseline()),
        };

        if let Some(logger) = self.logger.as_mut() {
            logger.log_custom(session_end_record(&summary));
            logger.stop();
        }
        self.sensor.close();
        self.state = MonitorState::Stopped;
        self.summary = Some(summary.clone());
        summary
    }

    fn runtime_seconds(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn classifier(&self) -> Option<&OdorClassifier> {
        self.classifier.as_ref()
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// For registering extra handlers before `run`.
    pub fn alerts_mut(&mut self) -> &mut AlertManager {
        &mut self.alerts
    }

    pub fn logger(&self) -> Option<&DataLogger> {
        self.logger.as_ref()
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Full status snapshot of every component.
    pub fn status(&self) -> Value {
        json!({
            "state": self.state,
            "runtime": self.runtime_seconds(),
            "stats": self.stats,
            "classifier": self.classifier.as_ref().map(|c| c.get_statistics()),
            "alerts": self.alerts.get_statistics(),
            "logging": self.logger.as_ref().map(|l| l.get_statistics()),
        })
    }
}

impl<S: SensorSource> Drop for Monitor<S> {
    fn drop(&mut self) {
        if self.state == MonitorState::Running {
            self.shutdown();
        }
    }
}

fn session_end_record(summary: &SessionSummary) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("event".into(), "session_end".into());
    data.insert("runtime_seconds".into(), summary.runtime_seconds.into());
    data.insert("samples_total".into(), summary.stats.samples_total.into());
    data.insert(
        "samples_with_odor".into(),
        summary.stats.samples_with_odor.into(),
    );
    data.insert(
        "alerts_generated".into(),
        summary.stats.alerts_generated.into(),
    );
    data.insert("errors".into(), summary.stats.errors.into());
    data.insert(
        "baseline_resistance".into(),
        summary.baseline_resistance.into(),
    );
    data
}

/// Sleeps for `duration` in short slices, returning early once `running` is cleared.
fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// One-line status for a tick. `calibration` is the progress (0..=1) while
/// the classifier is still calibrating.
pub fn status_line(
    runtime_secs: f64,
    reading: &SensorReading,
    event: &OdorEvent,
    calibration: Option<f64>,
) -> String {
    let state = match calibration {
        Some(progress) => format!("[Calibrating {:.0}%]", progress * 100.0),
        None if event.severity != SeverityLevel::None => format!(
            "[{}: {}]",
            title_case(event.odor_class.name()),
            event.severity
        ),
        None => "[Air: OK]".to_string(),
    };
    format!(
        "[{:6.0}s] T:{:5.1}°C | H:{:5.1}% | P:{:7.1}hPa | Gas:{:8.0}Ω | {}",
        runtime_secs,
        reading.temperature,
        reading.humidity,
        reading.pressure,
        reading.gas_resistance,
        state
    )
}
