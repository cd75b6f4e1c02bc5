use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use flate2::read::GzDecoder;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::files::FILE_PREFIX;
use crate::error::LoggerResult;

/// Merges the JSON-Lines shards under `log_dir` into one JSON document at `output`.
///
/// Shards (plain and gzipped) are read in filename order and lines in file
/// order; records are not re-sorted by time. Records whose `timestamp` falls
/// outside `[start, end]` are skipped, as are unparsable lines. Returns the
/// number of exported records.
pub fn export_session(
    log_dir: &Path,
    output: &Path,
    start: Option<f64>,
    end: Option<f64>,
) -> LoggerResult<usize> {
    let mut records = Vec::new();

    for path in jsonl_shards(log_dir)? {
        let reader = match open_shard(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unreadable shard {}: {}", path.display(), e);
                continue;
            }
        };

        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            let Ok(record) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let ts = record.get("timestamp").and_then(Value::as_f64).unwrap_or(0.0);
            if start.is_some_and(|s| ts < s) || end.is_some_and(|e| ts > e) {
                continue;
            }
            records.push(record);
        }
    }

    let count = records.len();
    let document = json!({
        "export_time": Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        "record_count": count,
        "order": "file_then_line",
        "data": records,
    });

    let mut writer = BufWriter::new(File::create(output)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;

    debug!("Exported {} records to {}", count, output.display());
    Ok(count)
}

fn jsonl_shards(log_dir: &Path) -> LoggerResult<Vec<PathBuf>> {
    let mut shards: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    n.starts_with(FILE_PREFIX) && (n.ends_with(".jsonl") || n.ends_with(".jsonl.gz"))
                })
        })
        .collect();
    shards.sort();
    Ok(shards)
}

/// Opens a shard, transparently decompressing `.gz` files.
pub(crate) fn open_shard(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let inner: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(inner)))
}
