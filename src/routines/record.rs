//! Record payload export: JSON lines and CSV appenders, plus a raw blob
//! writer.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::error::RoutineError;
use crate::message::{Message, PayloadKind};
use crate::registry::{ExportMode, Registry};

pub fn register(reg: &mut Registry) {
    reg.register_routine(
        PayloadKind::Record,
        &["text/json"],
        ExportMode::SingleFile,
        Arc::new(export_json),
    )
    .expect("builtin routine registration");
    reg.register_routine(
        PayloadKind::Record,
        &["text/csv"],
        ExportMode::SingleFile,
        Arc::new(export_csv),
    )
    .expect("builtin routine registration");
    reg.register_routine(
        PayloadKind::Blob,
        &["application/octet-stream"],
        ExportMode::MultiFile,
        Arc::new(export_blob),
    )
    .expect("builtin routine registration");
}

fn open_shared(path: &Path, ext: &str, is_first: bool) -> Result<std::fs::File, RoutineError> {
    let path = path.with_extension(ext);
    let mut opts = OpenOptions::new();
    if is_first {
        opts.write(true).create(true).truncate(true);
    } else {
        opts.append(true).create(true);
    }
    Ok(opts.open(path)?)
}

fn record_of(msg: &Message) -> Result<&serde_json::Value, RoutineError> {
    msg.payload.as_record().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::Record,
        actual: msg.payload.kind(),
    })
}

/// One JSON object per line, keyed by the source timestamp.
fn export_json(msg: &Message, path: &Path, _fmt: &str, is_first: bool) -> Result<(), RoutineError> {
    let record = record_of(msg)?;
    let line = serde_json::json!({ format!("{:.9}", msg.timestamp): record });
    let mut file = open_shared(path, "json", is_first)?;
    serde_json::to_writer(&mut file, &line)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// CSV with a `timestamp` column plus the record's flattened fields. The
/// header row is written by the initializing call.
fn export_csv(msg: &Message, path: &Path, _fmt: &str, is_first: bool) -> Result<(), RoutineError> {
    let record = record_of(msg)?;
    let mut flat = Vec::new();
    flatten(record, String::new(), &mut flat);

    let mut file = open_shared(path, "csv", is_first)?;
    if is_first {
        let header: Vec<&str> =
            std::iter::once("timestamp").chain(flat.iter().map(|(k, _)| k.as_str())).collect();
        writeln!(file, "{}", header.join(","))?;
    }
    let mut row = vec![format!("{:.9}", msg.timestamp)];
    row.extend(flat.into_iter().map(|(_, v)| csv_cell(&v)));
    writeln!(file, "{}", row.join(","))?;
    Ok(())
}

/// One complete file per message, raw payload bytes.
fn export_blob(msg: &Message, path: &Path, _fmt: &str, _is_first: bool) -> Result<(), RoutineError> {
    let bytes = msg.payload.as_blob().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::Blob,
        actual: msg.payload.kind(),
    })?;
    std::fs::write(path.with_extension("bin"), bytes)?;
    Ok(())
}

/// Flatten nested objects into dot-separated keys, depth first.
fn flatten(value: &serde_json::Value, prefix: String, out: &mut Vec<(String, serde_json::Value)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(v, key, out);
            }
        }
        other => out.push((prefix, other.clone())),
    }
}

fn csv_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            if s.contains(',') || s.contains('"') {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.clone()
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use serde_json::json;

    #[test]
    fn json_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("imu");
        let m1 = Message::new("/imu", 1.0, Payload::Record(json!({"ax": 1.0})));
        let m2 = Message::new("/imu", 2.0, Payload::Record(json!({"ax": 2.0})));
        export_json(&m1, &base, "text/json", true).unwrap();
        export_json(&m2, &base, "text/json", false).unwrap();
        let content = std::fs::read_to_string(base.with_extension("json")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("1.000000000"));
        assert!(lines[1].contains("2.000000000"));
    }

    #[test]
    fn first_call_truncates_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("imu");
        std::fs::write(base.with_extension("json"), "stale\n").unwrap();
        let m = Message::new("/imu", 1.0, Payload::Record(json!({"ax": 1.0})));
        export_json(&m, &base, "text/json", true).unwrap();
        let content = std::fs::read_to_string(base.with_extension("json")).unwrap();
        assert!(!content.contains("stale"));
    }

    #[test]
    fn csv_writes_header_and_flattens() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("gps");
        let m = Message::new(
            "/gps",
            1.5,
            Payload::Record(json!({"pos": {"lat": 48.1, "lon": 11.5}, "fix": true})),
        );
        export_csv(&m, &base, "text/csv", true).unwrap();
        let content = std::fs::read_to_string(base.with_extension("csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "timestamp,fix,pos.lat,pos.lon");
        assert_eq!(lines.next().unwrap(), "1.500000000,true,48.1,11.5");
    }

    #[test]
    fn csv_quotes_commas() {
        assert_eq!(csv_cell(&json!("a,b")), "\"a,b\"");
        assert_eq!(csv_cell(&json!("plain")), "plain");
        assert_eq!(csv_cell(&json!(3.5)), "3.5");
    }

    #[test]
    fn blob_writes_one_file_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("raw_0");
        let m = Message::new("/raw", 1.0, Payload::Blob(vec![1, 2, 3]));
        export_blob(&m, &base, "application/octet-stream", true).unwrap();
        assert_eq!(std::fs::read(base.with_extension("bin")).unwrap(), vec![1, 2, 3]);
    }
}
