//! Dump-log command implementation.

use serde::Serialize;
use std::path::Path;

use tessera_core::log::{CommitLog, LogRecord, RowOp};
use tessera_storage::FileBackend;

/// Commit log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Version the record produces.
    pub version: u64,
    /// Key counter after the record.
    pub next_key: u64,
    /// Schema version (snapshots only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u64>,
    /// One line per row op, or per table for snapshots.
    pub entries: Vec<String>,
}

impl LogRecordInfo {
    fn new(offset: u64, record: &LogRecord) -> Self {
        match record {
            LogRecord::Commit {
                version,
                next_key,
                ops,
            } => Self {
                offset,
                record_type: "commit".into(),
                version: version.as_u64(),
                next_key: *next_key,
                schema_version: None,
                entries: ops.iter().map(describe_op).collect(),
            },
            LogRecord::Snapshot {
                version,
                schema_version,
                next_key,
                tables,
                ..
            } => Self {
                offset,
                record_type: "snapshot".into(),
                version: version.as_u64(),
                next_key: *next_key,
                schema_version: Some(*schema_version),
                entries: tables
                    .iter()
                    .map(|t| format!("{}: {} rows", t.class, t.rows.len()))
                    .collect(),
            },
        }
    }
}

fn describe_op(op: &RowOp) -> String {
    match op {
        RowOp::Clear { class } => format!("clear {class}"),
        RowOp::Put { class, key, values } => {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            format!("put {class}#{} [{}]", key.as_u64(), values.join(", "))
        }
        RowOp::Delete { class, key } => format!("delete {class}#{}", key.as_u64()),
    }
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = path.join("commit.log");

    if !log_path.exists() {
        return Err("Commit log not found".into());
    }

    let log = CommitLog::new(Box::new(FileBackend::open(&log_path)?), false);
    let records = read_records(&log, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

fn read_records(
    log: &CommitLog,
    limit: Option<usize>,
) -> Result<Vec<LogRecordInfo>, Box<dyn std::error::Error>> {
    let mut records = Vec::new();
    for item in log.iter()?.take(limit.unwrap_or(usize::MAX)) {
        let (offset, record) = item?;
        records.push(LogRecordInfo::new(offset, &record));
    }
    Ok(records)
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("Commit Log Records");
    println!("==================");
    println!();

    for record in records {
        print!(
            "[{:>8}] {:<8} version={} next_key={}",
            record.offset, record.record_type, record.version, record.next_key
        );
        if let Some(v) = record.schema_version {
            print!(" schema_version={v}");
        }
        println!();
        for entry in &record.entries {
            println!("           {entry}");
        }
    }

    println!();
    println!("Total: {} records", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::log::TableImage;
    use tessera_core::{ObjKey, Value, Version};

    #[test]
    fn describes_commits_and_snapshots() {
        let commit = LogRecord::Commit {
            version: Version(3),
            next_key: 9,
            ops: vec![
                RowOp::Put {
                    class: "Dog".into(),
                    key: ObjKey::new(8),
                    values: vec![Value::from("Rex"), Value::Int(3)],
                },
                RowOp::Delete {
                    class: "Dog".into(),
                    key: ObjKey::new(2),
                },
            ],
        };
        let info = LogRecordInfo::new(40, &commit);
        assert_eq!(info.record_type, "commit");
        assert_eq!(info.entries, ["put Dog#8 [Rex, 3]", "delete Dog#2"]);

        let snapshot = LogRecord::Snapshot {
            version: Version(3),
            schema_version: 2,
            schema_json: "[]".into(),
            next_key: 9,
            tables: vec![TableImage {
                class: "Dog".into(),
                rows: vec![(ObjKey::new(8), vec![Value::from("Rex")])],
            }],
        };
        let info = LogRecordInfo::new(0, &snapshot);
        assert_eq!(info.schema_version, Some(2));
        assert_eq!(info.entries, ["Dog: 1 rows"]);
    }
}
