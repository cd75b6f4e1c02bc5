//! Queue items and the canonical record written to both sinks.

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use crate::fmt::round_to;
use crate::model::{OdorEvent, SensorReading};

/// Fixed CSV columns. Session metadata columns follow in sorted key order.
pub const CSV_COLUMNS: [&str; 10] = [
    "type",
    "timestamp",
    "datetime",
    "temperature",
    "humidity",
    "pressure",
    "gas_resistance",
    "odor_class",
    "severity",
    "confidence",
];

const RESERVED_KEYS: [&str; 3] = ["type", "timestamp", "datetime"];

/// What producers push onto the worker queue.
pub(crate) enum LogItem {
    Reading(SensorReading),
    Event(OdorEvent),
    Custom { data: Map<String, Value>, timestamp: f64 },
    /// Flush the buffer now and acknowledge on the sender.
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RecordBody {
    Reading(SensorReading),
    Event(OdorEvent),
    Custom(Map<String, Value>),
}

impl RecordBody {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordBody::Reading(_) => "reading",
            RecordBody::Event(_) => "event",
            RecordBody::Custom(_) => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogRecord {
    pub timestamp: f64,
    pub datetime: String,
    pub body: RecordBody,
}

impl LogRecord {
    pub fn new(timestamp: f64, body: RecordBody) -> Self {
        Self {
            timestamp,
            datetime: iso_datetime(timestamp),
            body,
        }
    }

    /// JSON-Lines form. Session metadata is added after the record's own
    /// fields and never overrides them.
    pub fn to_json(&self, session: &BTreeMap<String, String>) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), self.body.kind().into());
        map.insert("timestamp".into(), self.timestamp.into());
        map.insert("datetime".into(), self.datetime.clone().into());

        match &self.body {
            RecordBody::Reading(r) => {
                map.insert("temperature".into(), round_to(r.temperature, 2).into());
                map.insert("humidity".into(), round_to(r.humidity, 2).into());
                map.insert("pressure".into(), round_to(r.pressure, 2).into());
                map.insert("gas_resistance".into(), round_to(r.gas_resistance, 2).into());
            }
            RecordBody::Event(e) => {
                map.insert("odor_class".into(), e.odor_class.name().into());
                map.insert("severity".into(), e.severity.name().into());
                map.insert("confidence".into(), round_to(e.confidence, 3).into());
                map.insert("gas_resistance".into(), round_to(e.gas_resistance, 2).into());
                map.insert("temperature".into(), round_to(e.temperature, 2).into());
                map.insert("humidity".into(), round_to(e.humidity, 2).into());
            }
            RecordBody::Custom(data) => {
                for (key, value) in data {
                    if !RESERVED_KEYS.contains(&key.as_str()) {
                        map.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        for (key, value) in session {
            if !map.contains_key(key) {
                map.insert(key.clone(), value.clone().into());
            }
        }
        map
    }

    /// CSV row matching `header`. Nested objects are flattened one level to
    /// `parent_child`; fields not in the header are dropped.
    pub fn csv_row(&self, header: &[String], session: &BTreeMap<String, String>) -> String {
        let flat = flatten(self.to_json(session));
        header
            .iter()
            .map(|column| csv_field(flat.get(column)))
            .collect::<Vec<String>>()
            .join(",")
    }
}

/// CSV header for the given session metadata.
pub(crate) fn csv_header(session: &BTreeMap<String, String>) -> Vec<String> {
    CSV_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(
            session
                .keys()
                .filter(|k| !CSV_COLUMNS.contains(&k.as_str()))
                .cloned(),
        )
        .collect()
}

fn flatten(map: Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in map {
        match value {
            Value::Object(inner) => {
                for (sub_key, sub_value) in inner {
                    flat.insert(format!("{key}_{sub_key}"), sub_value);
                }
            }
            other => {
                flat.insert(key, other);
            }
        }
    }
    flat
}

fn csv_field(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

/// Local-time ISO 8601 with microseconds and no offset.
pub(crate) fn iso_datetime(timestamp: f64) -> String {
    let micros = (timestamp * 1_000_000.0).round() as i64;
    match DateTime::from_timestamp_micros(micros) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{OdorClass, SeverityLevel};

    fn reading() -> SensorReading {
        SensorReading {
            temperature: 22.456,
            humidity: 45.0,
            pressure: 1013.251,
            gas_resistance: 50_000.129,
            timestamp: 1_700_000_000.25,
        }
    }

    #[test]
    fn test_reading_json_is_rounded() {
        let record = LogRecord::new(1_700_000_000.25, RecordBody::Reading(reading()));
        let json = record.to_json(&BTreeMap::new());
        assert_eq!(json["type"], "reading");
        assert_eq!(json["timestamp"], 1_700_000_000.25);
        assert_eq!(json["temperature"], 22.46);
        assert_eq!(json["pressure"], 1013.25);
        assert_eq!(json["gas_resistance"], 50_000.13);
        assert!(json["datetime"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_event_csv_row() {
        let event = OdorEvent {
            odor_class: OdorClass::Smoke,
            severity: SeverityLevel::High,
            confidence: 0.87654,
            gas_resistance: 12_000.0,
            timestamp: 10.0,
            temperature: 25.0,
            humidity: 40.0,
        };
        let record = LogRecord::new(10.0, RecordBody::Event(event));
        let session = BTreeMap::new();
        let row = record.csv_row(&csv_header(&session), &session);
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), CSV_COLUMNS.len());
        assert_eq!(fields[0], "event");
        assert_eq!(fields[5], "");
        assert_eq!(fields[7], "SMOKE");
        assert_eq!(fields[8], "HIGH");
        assert_eq!(fields[9], "0.877");
    }

    #[test]
    fn test_custom_reserved_keys_and_session() {
        let data = json!({"type": "bogus", "note": "door, open", "session_id": "mine"});
        let Value::Object(data) = data else {
            unreachable!()
        };
        let record = LogRecord::new(5.0, RecordBody::Custom(data));
        let session = BTreeMap::from([
            ("session_id".to_string(), "s1".to_string()),
            ("session_mode".to_string(), "baseline".to_string()),
        ]);

        let json = record.to_json(&session);
        assert_eq!(json["type"], "custom");
        assert_eq!(json["session_id"], "mine");
        assert_eq!(json["session_mode"], "baseline");

        let header = csv_header(&session);
        assert_eq!(&header[10..], &["session_id", "session_mode"]);
        let row = record.csv_row(&header, &session);
        assert!(row.ends_with(",mine,baseline"));
    }

    #[test]
    fn test_nested_custom_fields_flatten_for_csv() {
        let Value::Object(data) = json!({"stats": {"temperature": 30.5}}) else {
            unreachable!()
        };
        let record = LogRecord::new(5.0, RecordBody::Custom(data));
        let header = vec!["type".to_string(), "stats_temperature".to_string()];
        assert_eq!(record.csv_row(&header, &BTreeMap::new()), "custom,30.5");
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field(Some(&json!("a,b"))), "\"a,b\"");
        assert_eq!(csv_field(Some(&json!("say \"hi\""))), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field(Some(&json!(1.5))), "1.5");
        assert_eq!(csv_field(None), "");
    }
}
