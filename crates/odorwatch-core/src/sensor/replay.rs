use std::io::BufRead;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::SensorSource;
use crate::error::{SensorError, SensorResult};
use crate::logger::open_shard;
use crate::model::SensorReading;

/// Replays `reading` records from a JSON-Lines data log (plain or `.gz`).
///
/// Event and custom records are skipped. A line that is not valid JSON is
/// reported as a parse error for that read; the next read continues with the
/// following line.
pub struct ReplaySensor {
    path: PathBuf,
    reader: Option<Box<dyn BufRead + Send>>,
    line_no: usize,
    replayed: usize,
}

impl ReplaySensor {
    pub fn open(path: impl AsRef<Path>) -> SensorResult<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = open_shard(&path)?;
        Ok(Self {
            path,
            reader: Some(reader),
            line_no: 0,
            replayed: 0,
        })
    }

    pub fn replayed(&self) -> usize {
        self.replayed
    }
}

impl SensorSource for ReplaySensor {
    fn read(&mut self) -> SensorResult<SensorReading> {
        let reader = self.reader.as_mut().ok_or(SensorError::Closed)?;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                debug!(
                    "Replay of {} finished after {} readings",
                    self.path.display(),
                    self.replayed
                );
                return Err(SensorError::Exhausted);
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(trimmed).map_err(|e| {
                SensorError::Parse(format!("{}:{}: {}", self.path.display(), self.line_no, e))
            })?;
            if record.get("type").and_then(Value::as_str) != Some("reading") {
                continue;
            }
            let reading: SensorReading = serde_json::from_value(record).map_err(|e| {
                SensorError::Parse(format!("{}:{}: {}", self.path.display(), self.line_no, e))
            })?;
            self.replayed += 1;
            return Ok(reading);
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.path.display())
    }
}
