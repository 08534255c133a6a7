//! Crash recovery.
//!
//! The committed state is rebuilt by replaying the commit log over the
//! state described by the manifest. A `Snapshot` record replaces the state
//! wholesale; a `Commit` record applies its row ops in log order. Replay
//! stops at the first torn record, which is cut off so the next append
//! starts on a record boundary.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::log::{CommitLog, LogRecord, RowOp};
use crate::schema::Schema;
use crate::storage::{Row, State};

/// Replays `log` on top of `base`.
///
/// When `repair` is set a torn tail is truncated; read-only stores leave
/// the file untouched.
///
/// # Errors
///
/// Fails on corruption (bad magic, checksum mismatch, undecodable
/// payload) or when a record does not fit the schema.
pub(crate) fn replay(log: &CommitLog, base: State, repair: bool) -> CoreResult<State> {
    let mut state = base;
    let mut records = 0usize;
    let end = {
        let mut iter = log.iter()?;
        for item in iter.by_ref() {
            let (offset, record) = item?;
            apply(&mut state, record).map_err(|e| {
                CoreError::log_corruption(format!("cannot replay record at offset {offset}: {e}"))
            })?;
            records += 1;
        }
        iter.position()
    };
    // The iterator held the backend lock until here.
    let size = log.size()?;
    if end < size {
        tracing::warn!(valid = end, size, "discarding torn commit log tail");
        if repair {
            log.truncate(end)?;
        }
    }
    tracing::debug!(records, version = state.version().as_u64(), "commit log replayed");
    Ok(state)
}

/// Applies one record to `state`.
pub(crate) fn apply(state: &mut State, record: LogRecord) -> CoreResult<()> {
    match record {
        LogRecord::Snapshot {
            version,
            schema_version,
            schema_json,
            next_key,
            tables,
        } => {
            let schema = Arc::new(Schema::from_json(&schema_json)?);
            let mut fresh = State::new(schema, schema_version);
            for image in tables {
                let table = fresh.table_mut(&image.class)?;
                for (key, values) in image.rows {
                    table
                        .put(key, Row::new(values, version))
                        .map_err(|_| duplicate_on_replay(&image.class))?;
                }
            }
            fresh.set_version(version);
            fresh.set_next_key(next_key);
            *state = fresh;
        }
        LogRecord::Commit {
            version,
            next_key,
            ops,
        } => {
            let (clears, rest): (Vec<_>, Vec<_>) =
                ops.into_iter().partition(|op| matches!(op, RowOp::Clear { .. }));
            let (deletes, puts): (Vec<_>, Vec<_>) =
                rest.into_iter().partition(|op| matches!(op, RowOp::Delete { .. }));
            for op in clears.into_iter().chain(deletes).chain(puts) {
                match op {
                    RowOp::Clear { class } => {
                        state.table_mut(&class)?.clear();
                    }
                    RowOp::Delete { class, key } => {
                        state.table_mut(&class)?.remove(key);
                    }
                    RowOp::Put { class, key, values } => {
                        state
                            .table_mut(&class)?
                            .put(key, Row::new(values, version))
                            .map_err(|_| duplicate_on_replay(&class))?;
                    }
                }
            }
            state.set_version(version);
            state.set_next_key(next_key);
        }
    }
    Ok(())
}

fn duplicate_on_replay(class: &str) -> CoreError {
    CoreError::log_corruption(format!("duplicate primary key in '{class}' during replay"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::TableImage;
    use crate::schema::ObjectSchemaDef;
    use crate::types::Version;
    use tessera_codec::{ObjKey, ObjLink, Value};
    use tessera_storage::InMemoryBackend;

    fn schema() -> Schema {
        Schema::new(vec![ObjectSchemaDef::new("T").property("v", "int")]).unwrap()
    }

    fn snapshot() -> LogRecord {
        LogRecord::Snapshot {
            version: Version::new(1),
            schema_version: 2,
            schema_json: schema().to_json(),
            next_key: 2,
            tables: vec![TableImage {
                class: "T".into(),
                rows: vec![(ObjKey(1), vec![Value::Int(10)])],
            }],
        }
    }

    fn put(version: u64, key: u64, v: i64) -> LogRecord {
        LogRecord::Commit {
            version: Version::new(version),
            next_key: key + 1,
            ops: vec![RowOp::Put {
                class: "T".into(),
                key: ObjKey(key),
                values: vec![Value::Int(v)],
            }],
        }
    }

    fn empty_base() -> State {
        State::new(Arc::new(Schema::empty()), 0)
    }

    #[test]
    fn snapshot_then_commits() {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        log.append(&snapshot()).unwrap();
        log.append(&put(2, 2, 20)).unwrap();
        log.append(&LogRecord::Commit {
            version: Version::new(3),
            next_key: 3,
            ops: vec![RowOp::Delete {
                class: "T".into(),
                key: ObjKey(1),
            }],
        })
        .unwrap();

        let state = replay(&log, empty_base(), true).unwrap();
        assert_eq!(state.version(), Version::new(3));
        assert_eq!(state.schema_version(), 2);
        assert_eq!(state.next_key(), 3);
        let table = state.table("T").unwrap();
        assert_eq!(table.len(), 1);
        let row = state.row(&ObjLink::new("T", ObjKey(2))).unwrap();
        assert_eq!(row.values, vec![Value::Int(20)]);
        assert_eq!(row.modified, Version::new(2));
    }

    #[test]
    fn clear_applies_before_puts() {
        let mut state = empty_base();
        apply(&mut state, snapshot()).unwrap();
        apply(
            &mut state,
            LogRecord::Commit {
                version: Version::new(2),
                next_key: 3,
                ops: vec![
                    RowOp::Put {
                        class: "T".into(),
                        key: ObjKey(2),
                        values: vec![Value::Int(5)],
                    },
                    RowOp::Clear { class: "T".into() },
                ],
            },
        )
        .unwrap();
        let keys: Vec<ObjKey> = state.table("T").unwrap().keys().collect();
        assert_eq!(keys, vec![ObjKey(2)]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        log.append(&snapshot()).unwrap();
        let good = log.size().unwrap();
        log.append(&put(2, 2, 20)).unwrap();
        log.truncate(log.size().unwrap() - 2).unwrap();

        let state = replay(&log, empty_base(), true).unwrap();
        assert_eq!(state.version(), Version::new(1));
        assert_eq!(log.size().unwrap(), good);
    }

    #[test]
    fn read_only_replay_keeps_torn_tail() {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        log.append(&snapshot()).unwrap();
        log.append(&put(2, 2, 20)).unwrap();
        let torn = log.size().unwrap() - 2;
        log.truncate(torn).unwrap();

        replay(&log, empty_base(), false).unwrap();
        assert_eq!(log.size().unwrap(), torn);
    }

    #[test]
    fn unknown_class_is_corruption() {
        let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
        log.append(&put(1, 1, 1)).unwrap();
        let err = replay(&log, empty_base(), true).unwrap_err();
        assert!(err.to_string().contains("cannot replay record at offset 0"));
    }
}
