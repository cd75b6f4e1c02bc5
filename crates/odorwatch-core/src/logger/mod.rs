//! Asynchronous data logger.
//!
//! Producers call [`DataLogger::log_reading`], [`DataLogger::log_event`] or
//! [`DataLogger::log_custom`]; each call only pushes onto a channel. A single
//! worker thread turns items into records, buffers them, and writes them to
//! the CSV and JSON-Lines shards.
//!
//! Flushing happens when the buffer reaches `buffer_size` or when
//! `flush_interval_seconds` has passed since the last flush. The worker waits
//! on the channel for at most `poll_interval_seconds`, so the interval flush
//! also fires when traffic stops.
//!
//! Before each item is processed the worker checks for rotation: a new
//! calendar day always opens fresh files; otherwise reaching
//! `max_file_size_mb` closes the shard, optionally gzips it, opens a new one
//! and trims the directory to `max_files`.
//!
//! [`DataLogger::stop`] sends a shutdown sentinel and waits up to
//! `join_timeout_seconds`. The worker performs the final flush and closes
//! the files before signalling completion, so every record enqueued before
//! `stop` is on disk when `stop` returns within the timeout.

mod export;
mod files;
mod record;

pub use export::export_session;
pub(crate) use export::open_shard;
pub use record::CSV_COLUMNS;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ConfigResult, LoggerError, LoggerResult};
use crate::model::{OdorEvent, SensorReading};
use crate::fmt::format_bytes;
use files::{LogFiles, Rotation};
use record::{LogItem, LogRecord, RecordBody};

/// Data logger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub log_directory: PathBuf,
    pub csv_enabled: bool,
    pub json_enabled: bool,
    pub max_file_size_mb: f64,
    pub max_files: usize,
    pub compress_old_files: bool,
    pub flush_interval_seconds: f64,
    pub buffer_size: usize,
    /// Upper bound on one idle wait of the worker.
    pub poll_interval_seconds: f64,
    /// How long `stop` waits for the worker to drain.
    pub join_timeout_seconds: f64,
    /// Attached to every record (extra CSV columns, extra JSONL fields).
    pub session_metadata: BTreeMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
            csv_enabled: true,
            json_enabled: true,
            max_file_size_mb: 10.0,
            max_files: 100,
            compress_old_files: true,
            flush_interval_seconds: 5.0,
            buffer_size: 100,
            poll_interval_seconds: 1.0,
            join_timeout_seconds: 5.0,
            session_metadata: BTreeMap::new(),
        }
    }
}

impl LoggerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::InvalidLogger(msg.to_string()));

        if self.buffer_size == 0 {
            return invalid("buffer_size must be at least 1");
        }
        if self.max_files == 0 {
            return invalid("max_files must be at least 1");
        }
        for (name, value) in [
            ("max_file_size_mb", self.max_file_size_mb),
            ("flush_interval_seconds", self.flush_interval_seconds),
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("join_timeout_seconds", self.join_timeout_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidLogger(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("flush_interval_seconds", self.flush_interval_seconds),
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("join_timeout_seconds", self.join_timeout_seconds),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::InvalidLogger(format!(
                    "{name} is too large, got {value}"
                )));
            }
        }
        if self.log_directory.as_os_str().is_empty() {
            return invalid("log_directory must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    readings_logged: AtomicU64,
    events_logged: AtomicU64,
    custom_logged: AtomicU64,
    files_rotated: AtomicU64,
    errors: AtomicU64,
    /// Items sent but not yet taken off the channel by the worker.
    pending: AtomicU64,
}

/// Logger counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoggerStats {
    pub readings_logged: u64,
    pub events_logged: u64,
    pub custom_logged: u64,
    pub files_rotated: u64,
    pub errors: u64,
    pub queue_len: u64,
}

struct Worker {
    tx: Sender<LogItem>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct DataLogger {
    config: LoggerConfig,
    counters: Arc<Counters>,
    worker: Option<Worker>,
}

impl DataLogger {
    /// Validates the configuration and creates the log directory.
    pub fn new(config: LoggerConfig) -> LoggerResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_directory)?;
        Ok(Self {
            config,
            counters: Arc::new(Counters::default()),
            worker: None,
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn log_directory(&self) -> &Path {
        &self.config.log_directory
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Opens the first shard set and spawns the worker. Calling it while
    /// already running does nothing.
    pub fn start(&mut self) -> LoggerResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let mut files = LogFiles::new(&self.config);
        files.open(Local::now().date_naive())?;

        let (tx, rx) = mpsc::channel();
        let (done_tx, done) = mpsc::channel();
        let state = WorkerState {
            rx,
            files,
            counters: Arc::clone(&self.counters),
            buffer: Vec::with_capacity(self.config.buffer_size),
            buffer_size: self.config.buffer_size,
            flush_interval: Duration::from_secs_f64(self.config.flush_interval_seconds),
            poll_interval: Duration::from_secs_f64(self.config.poll_interval_seconds),
            last_flush: Instant::now(),
        };

        let handle = thread::Builder::new()
            .name("odorwatch-logger".to_string())
            .spawn(move || {
                state.run();
                let _ = done_tx.send(());
            })
            .map_err(LoggerError::Spawn)?;

        self.worker = Some(Worker { tx, done, handle });
        info!(
            "Data logger started in {}",
            self.config.log_directory.display()
        );
        Ok(())
    }

    fn enqueue(&self, item: LogItem) {
        let Some(worker) = &self.worker else {
            return;
        };
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if worker.tx.send(item).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn log_reading(&self, reading: &SensorReading) {
        self.enqueue(LogItem::Reading(*reading));
    }

    pub fn log_event(&self, event: &OdorEvent) {
        self.enqueue(LogItem::Event(*event));
    }

    /// Logs an arbitrary JSON object stamped with the current time. The
    /// `type`, `timestamp` and `datetime` keys are reserved and ignored.
    pub fn log_custom(&self, data: Map<String, Value>) {
        let timestamp = Local::now().timestamp_micros() as f64 / 1_000_000.0;
        self.enqueue(LogItem::Custom { data, timestamp });
    }

    /// Asks the worker to write out its buffer and waits up to the join
    /// timeout for it to do so. Returns whether the flush was confirmed.
    pub fn flush(&self) -> bool {
        let Some(worker) = &self.worker else {
            return false;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if worker.tx.send(LogItem::Flush(ack_tx)).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        ack_rx.recv_timeout(self.join_timeout()).is_ok()
    }

    fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.join_timeout_seconds)
    }

    /// Stops the worker. Everything enqueued before this call is flushed and
    /// the files are closed, unless the worker misses the join timeout.
    /// Calling it again does nothing.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if worker.tx.send(LogItem::Shutdown).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            warn!("Logger worker already gone");
        }
        match worker.done.recv_timeout(self.join_timeout()) {
            Ok(()) => {
                if worker.handle.join().is_err() {
                    error!("Logger worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Logger worker did not finish within {:.1}s, queued records may be lost",
                    self.config.join_timeout_seconds
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Logger worker exited without completing shutdown");
                let _ = worker.handle.join();
            }
        }

        let stats = self.get_statistics();
        info!(
            "Data logger stopped: {} readings, {} events, {} custom, {} rotations, {} errors",
            stats.readings_logged,
            stats.events_logged,
            stats.custom_logged,
            stats.files_rotated,
            stats.errors
        );
    }

    pub fn get_statistics(&self) -> LoggerStats {
        let c = &self.counters;
        LoggerStats {
            readings_logged: c.readings_logged.load(Ordering::Relaxed),
            events_logged: c.events_logged.load(Ordering::Relaxed),
            custom_logged: c.custom_logged.load(Ordering::Relaxed),
            files_rotated: c.files_rotated.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            queue_len: c.pending.load(Ordering::Relaxed),
        }
    }

    /// Flushes pending records, then merges this logger's JSON-Lines shards
    /// into `output`. See [`export_session`].
    pub fn export_session(
        &self,
        output: &Path,
        start: Option<f64>,
        end: Option<f64>,
    ) -> LoggerResult<usize> {
        if self.is_running() && !self.flush() {
            warn!("Flush before export was not confirmed");
        }
        export_session(&self.config.log_directory, output, start, end)
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerState {
    rx: Receiver<LogItem>,
    files: LogFiles,
    counters: Arc<Counters>,
    buffer: Vec<LogRecord>,
    buffer_size: usize,
    flush_interval: Duration,
    poll_interval: Duration,
    last_flush: Instant,
}

impl WorkerState {
    fn run(mut self) {
        debug!("Logger worker running");
        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(item) => {
                    self.counters.pending.fetch_sub(1, Ordering::Relaxed);
                    match item {
                        LogItem::Shutdown => break,
                        LogItem::Flush(ack) => {
                            self.flush();
                            let _ = ack.send(());
                        }
                        item => {
                            self.process(item);
                            if self.buffer.len() >= self.buffer_size || self.flush_due() {
                                self.flush();
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.flush_due() {
                        self.flush();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.flush();
        if let Err(e) = self.files.close() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            error!("Failed to close log files: {}", e);
        }
        debug!("Logger worker finished");
    }

    fn flush_due(&self) -> bool {
        !self.buffer.is_empty() && self.last_flush.elapsed() >= self.flush_interval
    }

    fn process(&mut self, item: LogItem) {
        let today = Local::now().date_naive();
        if let Some(kind) = self.files.rotation_due(today) {
            // Buffered records belong to the shard being closed.
            self.flush();
            match self.files.rotate(kind, today) {
                Ok(()) => {
                    self.counters.files_rotated.fetch_add(1, Ordering::Relaxed);
                    debug!("Log rotation ({:?})", kind);
                    if kind == Rotation::Size {
                        self.apply_retention();
                    }
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!("Log rotation failed: {}", e);
                }
            }
        }

        let record = match item {
            LogItem::Reading(r) => {
                self.counters.readings_logged.fetch_add(1, Ordering::Relaxed);
                LogRecord::new(r.timestamp, RecordBody::Reading(r))
            }
            LogItem::Event(e) => {
                self.counters.events_logged.fetch_add(1, Ordering::Relaxed);
                LogRecord::new(e.timestamp, RecordBody::Event(e))
            }
            LogItem::Custom { data, timestamp } => {
                self.counters.custom_logged.fetch_add(1, Ordering::Relaxed);
                LogRecord::new(timestamp, RecordBody::Custom(data))
            }
            LogItem::Flush(_) | LogItem::Shutdown => return,
        };
        self.buffer.push(record);
    }

    fn apply_retention(&self) {
        match self.files.apply_retention() {
            Ok(result) if result.files_removed > 0 => info!(
                "Retention: removed {} files, freed {}, {} files remaining",
                result.files_removed,
                format_bytes(result.bytes_freed),
                result.files_remaining
            ),
            Ok(_) => {}
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Log retention failed: {}", e);
            }
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if !self.files.is_open() {
            if let Err(e) = self.files.open(Local::now().date_naive()) {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to open log files: {}", e);
                return;
            }
        }
        match self.files.write(&self.buffer) {
            Ok(()) => debug!("Flushed {} records", self.buffer.len()),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to write {} records: {}", self.buffer.len(), e);
            }
        }
        self.buffer.clear();
        self.last_flush = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::model::{OdorClass, SeverityLevel};

    fn config(dir: &Path) -> LoggerConfig {
        LoggerConfig {
            log_directory: dir.to_path_buf(),
            ..LoggerConfig::default()
        }
    }

    fn reading(ts: f64) -> SensorReading {
        SensorReading {
            temperature: 22.0,
            humidity: 45.0,
            pressure: 1013.25,
            gas_resistance: 50_000.0,
            timestamp: ts,
        }
    }

    fn event(ts: f64) -> OdorEvent {
        OdorEvent {
            odor_class: OdorClass::BodyOdor,
            severity: SeverityLevel::Moderate,
            confidence: 0.8,
            gas_resistance: 30_000.0,
            timestamp: ts,
            temperature: 22.0,
            humidity: 45.0,
        }
    }

    fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(suffix))
            .collect();
        files.sort();
        files
    }

    fn line_count(path: &Path) -> usize {
        std::io::BufReader::new(fs::File::open(path).unwrap())
            .lines()
            .count()
    }

    #[test]
    fn test_no_loss_on_clean_shutdown() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(config(dir.path())).unwrap();
        logger.start().unwrap();

        for i in 0..25 {
            logger.log_reading(&reading(i as f64));
            if i % 5 == 0 {
                logger.log_event(&event(i as f64));
            }
        }
        logger.log_custom(json!({"note": "door opened"}).as_object().unwrap().clone());
        logger.stop();

        // 25 readings + 5 events + 1 custom
        let jsonl = files_with_suffix(dir.path(), ".jsonl");
        let csv = files_with_suffix(dir.path(), ".csv");
        assert_eq!(jsonl.len(), 1);
        assert_eq!(csv.len(), 1);
        assert_eq!(line_count(&jsonl[0]), 31);
        assert_eq!(line_count(&csv[0]), 32);

        let stats = logger.get_statistics();
        assert_eq!(stats.readings_logged, 25);
        assert_eq!(stats.events_logged, 5);
        assert_eq!(stats.custom_logged, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.queue_len, 0);
    }

    #[test]
    fn test_logging_before_start_is_ignored() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(config(dir.path())).unwrap();
        logger.log_reading(&reading(1.0));
        assert!(!logger.flush());
        assert_eq!(logger.get_statistics().queue_len, 0);

        logger.start().unwrap();
        logger.start().unwrap();
        logger.stop();
        logger.stop();
        logger.log_reading(&reading(2.0));

        let jsonl = files_with_suffix(dir.path(), ".jsonl");
        assert_eq!(jsonl.len(), 1);
        assert_eq!(line_count(&jsonl[0]), 0);
    }

    #[test]
    fn test_flush_writes_buffer() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(config(dir.path())).unwrap();
        logger.start().unwrap();
        logger.log_reading(&reading(1.0));
        logger.log_reading(&reading(2.0));
        assert!(logger.flush());

        let jsonl = files_with_suffix(dir.path(), ".jsonl");
        assert_eq!(line_count(&jsonl[0]), 2);
        logger.stop();
    }

    #[test]
    fn test_interval_flush_without_traffic() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(LoggerConfig {
            flush_interval_seconds: 0.05,
            poll_interval_seconds: 0.02,
            ..config(dir.path())
        })
        .unwrap();
        logger.start().unwrap();
        logger.log_reading(&reading(1.0));

        let jsonl = files_with_suffix(dir.path(), ".jsonl");
        let deadline = Instant::now() + Duration::from_secs(5);
        while line_count(&jsonl[0]) < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(line_count(&jsonl[0]), 1);
        logger.stop();
    }

    #[test]
    fn test_session_metadata_in_both_sinks() {
        let dir = tempdir().unwrap();
        let session = BTreeMap::from([
            ("session_id".to_string(), "session_002".to_string()),
            ("session_mode".to_string(), "baseline".to_string()),
            ("test_type".to_string(), "clean_air".to_string()),
        ]);
        let mut logger = DataLogger::new(LoggerConfig {
            session_metadata: session,
            ..config(dir.path())
        })
        .unwrap();
        logger.start().unwrap();
        logger.log_reading(&reading(1.0));
        logger.stop();

        let csv = fs::read_to_string(&files_with_suffix(dir.path(), ".csv")[0]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "type,timestamp,datetime,temperature,humidity,pressure,gas_resistance,\
             odor_class,severity,confidence,session_id,session_mode,test_type"
        );
        assert!(lines.next().unwrap().ends_with(",session_002,baseline,clean_air"));

        let jsonl = fs::read_to_string(&files_with_suffix(dir.path(), ".jsonl")[0]).unwrap();
        let record: Value = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
        assert_eq!(record["session_id"], "session_002");
        assert_eq!(record["test_type"], "clean_air");
    }

    #[test]
    fn test_size_rotation_compresses_old_shard() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(LoggerConfig {
            max_file_size_mb: 0.0001,
            buffer_size: 1,
            compress_old_files: true,
            ..config(dir.path())
        })
        .unwrap();
        logger.start().unwrap();
        // The 100-byte header is under the ~105-byte limit; after one flushed
        // row the second record triggers rotation.
        logger.log_reading(&reading(1.0));
        logger.log_reading(&reading(2.0));
        logger.stop();

        let plain = files_with_suffix(dir.path(), ".csv");
        let compressed = files_with_suffix(dir.path(), ".csv.gz");
        assert_eq!(plain.len(), 1);
        assert_eq!(compressed.len(), 1);

        let stem = |p: &PathBuf, ext: &str| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches(ext)
                .to_string()
        };
        assert_ne!(stem(&plain[0], ".csv"), stem(&compressed[0], ".csv.gz"));
        assert_eq!(files_with_suffix(dir.path(), ".jsonl.gz").len(), 1);
        assert_eq!(logger.get_statistics().files_rotated, 1);
    }

    #[test]
    fn test_export_session_through_logger() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(config(dir.path())).unwrap();
        logger.start().unwrap();
        for i in 0..10 {
            logger.log_reading(&reading(100.0 + i as f64));
        }
        let output = dir.path().join("export.json");
        let count = logger
            .export_session(&output, Some(103.0), Some(106.0))
            .unwrap();
        assert_eq!(count, 4);
        logger.stop();
    }

    #[test]
    fn test_retention_keeps_live_shards() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(LoggerConfig {
            max_file_size_mb: 0.0001,
            buffer_size: 1,
            max_files: 1,
            ..config(dir.path())
        })
        .unwrap();
        logger.start().unwrap();
        // Every reading after the first rotates the shard set.
        for i in 0..5 {
            logger.log_reading(&reading(i as f64));
        }
        logger.stop();

        let csv = files_with_suffix(dir.path(), ".csv");
        let jsonl = files_with_suffix(dir.path(), ".jsonl");
        assert_eq!(csv.len(), 1);
        assert_eq!(jsonl.len(), 1);
        assert!(files_with_suffix(dir.path(), ".gz").is_empty());
        // Header plus the last reading.
        assert_eq!(line_count(&csv[0]), 2);
        assert_eq!(line_count(&jsonl[0]), 1);

        let stats = logger.get_statistics();
        assert_eq!(stats.readings_logged, 5);
        assert_eq!(stats.files_rotated, 4);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_queue_len_settles_after_stop() {
        let dir = tempdir().unwrap();
        let mut logger = DataLogger::new(config(dir.path())).unwrap();
        logger.start().unwrap();
        logger.log_reading(&reading(1.0));
        logger.stop();
        assert_eq!(logger.get_statistics().queue_len, 0);
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let dir = tempdir().unwrap();
        for config in [
            LoggerConfig {
                join_timeout_seconds: 1e20,
                ..config(dir.path())
            },
            LoggerConfig {
                poll_interval_seconds: 1e20,
                ..config(dir.path())
            },
            LoggerConfig {
                flush_interval_seconds: 1e20,
                ..config(dir.path())
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidLogger(_))
            ));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let result = DataLogger::new(LoggerConfig {
            buffer_size: 0,
            ..config(dir.path())
        });
        assert!(result.is_err());
    }
}
