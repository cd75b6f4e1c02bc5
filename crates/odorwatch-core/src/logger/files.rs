//! On-disk shard management: naming, size and daily rotation, gzip, retention.
//!
//! Shards are named `readings_YYYYMMDD_HHMMSS.{csv,jsonl}`. A rotation that
//! lands in the same second as the previous one gets a `_NNN` suffix so that
//! the two file sets stay distinct.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use super::LoggerConfig;
use super::record::{LogRecord, csv_header};
use crate::error::LoggerResult;
use crate::fmt::format_bytes;

pub(crate) const FILE_PREFIX: &str = "readings_";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

struct Sink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Sink {
    fn create(path: PathBuf) -> io::Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

/// Result of one retention pass.
#[derive(Debug, Default)]
pub(crate) struct RetentionResult {
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub files_remaining: usize,
}

/// Why the current shard set was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rotation {
    Daily,
    Size,
}

/// The currently open CSV / JSONL pair.
pub(crate) struct LogFiles {
    dir: PathBuf,
    csv_enabled: bool,
    json_enabled: bool,
    max_file_size_mb: f64,
    max_files: usize,
    compress: bool,
    session: BTreeMap<String, String>,
    header: Vec<String>,
    csv: Option<Sink>,
    json: Option<Sink>,
    opened_on: Option<NaiveDate>,
}

impl LogFiles {
    pub fn new(config: &LoggerConfig) -> Self {
        Self {
            dir: config.log_directory.clone(),
            csv_enabled: config.csv_enabled,
            json_enabled: config.json_enabled,
            max_file_size_mb: config.max_file_size_mb,
            max_files: config.max_files,
            compress: config.compress_old_files,
            header: csv_header(&config.session_metadata),
            session: config.session_metadata.clone(),
            csv: None,
            json: None,
            opened_on: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_on.is_some()
    }

    pub fn csv_path(&self) -> Option<&Path> {
        self.csv.as_ref().map(|s| s.path.as_path())
    }

    pub fn json_path(&self) -> Option<&Path> {
        self.json.as_ref().map(|s| s.path.as_path())
    }

    /// Opens a fresh shard set dated `date`. The CSV header is written immediately.
    pub fn open(&mut self, date: NaiveDate) -> io::Result<()> {
        let stem = self.next_stem();

        if self.csv_enabled {
            let mut sink = Sink::create(self.dir.join(format!("{stem}.csv")))?;
            writeln!(sink.writer, "{}", self.header.join(","))?;
            sink.writer.flush()?;
            self.csv = Some(sink);
        }
        if self.json_enabled {
            self.json = Some(Sink::create(self.dir.join(format!("{stem}.jsonl")))?);
        }

        self.opened_on = Some(date);
        debug!("Opened log shard {}", stem);
        Ok(())
    }

    /// Picks a stem that does not collide with any existing shard, compressed or not.
    fn next_stem(&self) -> String {
        let base = format!("{FILE_PREFIX}{}", Local::now().format("%Y%m%d_%H%M%S"));
        let taken = |stem: &str| {
            ["csv", "csv.gz", "jsonl", "jsonl.gz"]
                .iter()
                .any(|ext| self.dir.join(format!("{stem}.{ext}")).exists())
        };

        if !taken(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n:03}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Appends records to the open sinks and flushes them to the OS.
    pub fn write(&mut self, records: &[LogRecord]) -> LoggerResult<()> {
        if let Some(csv) = self.csv.as_mut() {
            for record in records {
                writeln!(csv.writer, "{}", record.csv_row(&self.header, &self.session))?;
            }
            csv.writer.flush()?;
        }
        if let Some(json) = self.json.as_mut() {
            for record in records {
                let line = serde_json::to_string(&record.to_json(&self.session))?;
                writeln!(json.writer, "{line}")?;
            }
            json.writer.flush()?;
        }
        Ok(())
    }

    /// Whether the open shard set has to be replaced before the next record
    /// is processed. A new calendar day takes precedence over the size limit.
    pub fn rotation_due(&self, today: NaiveDate) -> Option<Rotation> {
        let opened_on = self.opened_on?;
        if opened_on != today {
            return Some(Rotation::Daily);
        }
        let size = self.current_size()?;
        if (size as f64) / BYTES_PER_MB >= self.max_file_size_mb {
            Some(Rotation::Size)
        } else {
            None
        }
    }

    /// Replaces the open shard set. Size rotation also compresses the closed
    /// files when enabled. Retention is a separate step, see
    /// [`LogFiles::apply_retention`].
    pub fn rotate(&mut self, kind: Rotation, today: NaiveDate) -> io::Result<()> {
        if kind == Rotation::Daily {
            self.close()?;
            return self.open(today);
        }

        if let Some(size) = self.current_size() {
            info!(
                "Log shard reached {} (limit {:.2} MB), rotating",
                format_bytes(size),
                self.max_file_size_mb
            );
        }
        let closed = self.close()?;
        if self.compress {
            for path in &closed {
                if let Err(e) = compress_file(path) {
                    warn!("Failed to compress {}: {}", path.display(), e);
                }
            }
        }
        self.open(today)
    }

    /// Trims the directory to `max_files`. The open shards count towards the
    /// limit but are never removed.
    pub fn apply_retention(&self) -> io::Result<RetentionResult> {
        let live: Vec<&Path> = [self.csv_path(), self.json_path()]
            .into_iter()
            .flatten()
            .collect();
        enforce_retention(&self.dir, self.max_files, &live)
    }

    /// Size of the shard that drives size rotation: the CSV file, or the
    /// JSONL file when CSV output is disabled.
    fn current_size(&self) -> Option<u64> {
        let sink = self.csv.as_ref().or(self.json.as_ref())?;
        fs::metadata(&sink.path).ok().map(|m| m.len())
    }

    /// Flushes and closes the open sinks. Returns the paths that were closed.
    pub fn close(&mut self) -> io::Result<Vec<PathBuf>> {
        let mut closed = Vec::new();
        for sink in [self.csv.take(), self.json.take()].into_iter().flatten() {
            let Sink { path, mut writer } = sink;
            writer.flush()?;
            closed.push(path);
        }
        self.opened_on = None;
        Ok(closed)
    }
}

/// Gzips `path` into `path.gz` and removes the original.
pub(crate) fn compress_file(path: &Path) -> io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let mut input = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(gz_path)
}

/// Deletes the oldest `readings_*` files (by modification time, then name)
/// until at most `max_files` remain. Paths in `keep` are counted but never
/// deleted, so fewer than `max_files` may be impossible to reach.
pub(crate) fn enforce_retention(
    dir: &Path,
    max_files: usize,
    keep: &[&Path],
) -> io::Result<RetentionResult> {
    let mut result = RetentionResult::default();

    let mut total: usize = 0;
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(FILE_PREFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        total += 1;
        let path = entry.path();
        if keep.contains(&path.as_path()) {
            continue;
        }
        candidates.push((metadata.modified()?, path, metadata.len()));
    }

    candidates.sort();

    let excess = total.saturating_sub(max_files).min(candidates.len());
    for (_, path, size) in candidates.drain(..excess) {
        fs::remove_file(&path)?;
        debug!("Removed old log file {}", path.display());
        result.files_removed += 1;
        result.bytes_freed += size;
    }
    result.files_remaining = total - result.files_removed;
    Ok(result)
}
