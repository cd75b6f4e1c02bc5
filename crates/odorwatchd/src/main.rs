//! odorwatchd - cabin air quality monitoring daemon.
//!
//! Samples the gas sensor at a fixed interval, classifies odors, fires alert
//! rules and writes CSV / JSON-Lines data logs with rotation.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use odorwatch_core::alerts::Alert;
use odorwatch_core::error::AlertResult;
use odorwatch_core::logger::export_session;
use odorwatch_core::sensor::{ReplaySensor, SimulatedSensor};
use odorwatch_core::{AlertAction, AppConfig, Monitor, SensorSource};

/// Cabin air quality monitoring daemon.
#[derive(Parser)]
#[command(name = "odorwatchd", about = "Cabin air quality monitoring daemon", version)]
struct Args {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Sampling interval in seconds.
    #[arg(short, long)]
    interval: Option<f64>,

    /// Directory for CSV / JSON-Lines data logs.
    #[arg(short, long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Stop after this many seconds instead of running until interrupted.
    #[arg(short, long)]
    duration: Option<f64>,

    /// Disable the CSV sink.
    #[arg(long)]
    no_csv: bool,

    /// Disable the JSON-Lines sink.
    #[arg(long)]
    no_json: bool,

    /// Session metadata attached to every record (repeatable).
    #[arg(long = "session", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    session: Vec<(String, String)>,

    /// Replay readings from a JSON-Lines data log instead of simulating.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Seed for the simulated sensor.
    #[arg(long)]
    seed: Option<u64>,

    /// Merge the JSON-Lines logs in the log directory into FILE and exit.
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses a `KEY=VALUE` pair. The key must be non-empty; the value may be.
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["odorwatchd", "odorwatch_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the config file (if any) and applies command-line overrides.
fn build_config(args: &Args) -> Result<AppConfig, String> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path).map_err(|e| e.to_string())?,
        None => AppConfig::default(),
    };

    if let Some(interval) = args.interval {
        config.monitor.interval_seconds = interval;
    }
    if let Some(duration) = args.duration {
        config.monitor.max_duration_seconds = Some(duration);
    }
    if let Some(dir) = &args.log_dir {
        config.logger.log_directory = dir.clone();
    }
    if args.no_csv {
        config.logger.csv_enabled = false;
    }
    if args.no_json {
        config.logger.json_enabled = false;
    }
    config
        .logger
        .session_metadata
        .extend(args.session.iter().cloned());

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn open_sensor(args: &Args) -> Result<Box<dyn SensorSource>, String> {
    if let Some(path) = &args.replay {
        let sensor = ReplaySensor::open(path)
            .map_err(|e| format!("cannot open replay file {}: {}", path.display(), e))?;
        return Ok(Box::new(sensor));
    }
    Ok(match args.seed {
        Some(seed) => Box::new(SimulatedSensor::new(seed)),
        None => Box::new(SimulatedSensor::from_entropy()),
    })
}

/// Fleet notifications have no transport in the daemon; the payload is logged
/// so an external shipper can pick it up.
fn fleet_handler(alert: &Alert) -> AlertResult<()> {
    info!(payload = %alert.to_payload(), "Fleet notification");
    Ok(())
}

fn emergency_handler(alert: &Alert) -> AlertResult<()> {
    error!(
        rule = %alert.rule_name,
        "EMERGENCY STOP requested: {}", alert.message
    );
    Ok(())
}

fn describe_session(metadata: &BTreeMap<String, String>) -> String {
    if metadata.is_empty() {
        return "none".to_string();
    }
    metadata
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    if let Some(output) = &args.export {
        match export_session(&config.logger.log_directory, output, None, None) {
            Ok(count) => info!("Exported {} records to {}", count, output.display()),
            Err(e) => {
                error!("Export failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    info!("odorwatchd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, log_dir={}, csv={}, json={}",
        config.monitor.interval_seconds,
        config.logger.log_directory.display(),
        config.logger.csv_enabled,
        config.logger.json_enabled
    );
    info!(
        "Session metadata: {}",
        describe_session(&config.logger.session_metadata)
    );

    let sensor = match open_sensor(&args) {
        Ok(sensor) => sensor,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let mut monitor = match Monitor::new(config, sensor) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Failed to create monitor: {}", e);
            process::exit(1);
        }
    };
    monitor
        .alerts_mut()
        .register_handler(AlertAction::NotifyFleet, fleet_handler);
    monitor
        .alerts_mut()
        .register_handler(AlertAction::EmergencyStop, emergency_handler);
    monitor.set_status_callback(|line| info!("{}", line));

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let summary = match monitor.run(&running) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Monitor failed: {}", e);
            process::exit(1);
        }
    };

    debug!("Final status: {}", monitor.status());
    println!("{}", summary);
    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["odorwatchd"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn parse_key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("vehicle=bus-12").unwrap(),
            ("vehicle".to_string(), "bus-12".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("driver=").unwrap(),
            ("driver".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let a = args(&[
            "--interval",
            "0.5",
            "--duration",
            "60",
            "--log-dir",
            "/tmp/odorwatch-test",
            "--no-csv",
            "--session",
            "vehicle=bus-12",
            "--session",
            "route=7",
        ]);
        let config = build_config(&a).unwrap();
        assert_eq!(config.monitor.interval_seconds, 0.5);
        assert_eq!(config.monitor.max_duration_seconds, Some(60.0));
        assert_eq!(
            config.logger.log_directory,
            PathBuf::from("/tmp/odorwatch-test")
        );
        assert!(!config.logger.csv_enabled);
        assert!(config.logger.json_enabled);
        assert_eq!(config.logger.session_metadata.len(), 2);
        assert_eq!(config.logger.session_metadata["route"], "7");
    }

    #[test]
    fn invalid_override_is_rejected() {
        let a = args(&["--interval", "0"]);
        assert!(build_config(&a).is_err());
    }

    #[test]
    fn describe_session_lists_pairs() {
        let mut metadata = BTreeMap::new();
        assert_eq!(describe_session(&metadata), "none");
        metadata.insert("vehicle".to_string(), "bus-12".to_string());
        metadata.insert("driver".to_string(), "d1".to_string());
        assert_eq!(describe_session(&metadata), "driver=d1, vehicle=bus-12");
    }
}
