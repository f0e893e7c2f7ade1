//! Versioned JSON snapshot persistence.
//!
//! One snapshot document per installation: the full record list plus the
//! statistics buckets. Writes go to a temp sibling first and are renamed
//! into place, so a crash mid-write leaves the previous snapshot intact.
//! Loading is forgiving: a missing file is an empty initial state, and a
//! corrupt one is logged and treated the same, so the service can always
//! start.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{LensError, Result};
use crate::stats::{StatsBucket, Statistics};
use crate::types::{Category, CommandExecution, ExecutorKind};

pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE: &str = "commands.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub command_executions: Vec<SnapshotRecord>,
    pub statistics: SnapshotStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub data: CommandExecution,
}

/// Bucket maps are persisted as entry lists so non-string keys survive
/// the JSON round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub global: StatsBucket,
    pub by_terminal: Vec<(String, StatsBucket)>,
    pub by_executor: Vec<(ExecutorKind, StatsBucket)>,
    pub by_category: Vec<(Category, StatsBucket)>,
}

impl Snapshot {
    pub fn build(records: &[CommandExecution], stats: &Statistics) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            command_executions: records
                .iter()
                .map(|record| SnapshotRecord {
                    id: record.id.clone(),
                    data: record.clone(),
                })
                .collect(),
            statistics: SnapshotStats {
                global: stats.global.clone(),
                by_terminal: stats
                    .by_terminal
                    .iter()
                    .map(|(key, bucket)| (key.clone(), bucket.clone()))
                    .collect(),
                by_executor: stats
                    .by_executor
                    .iter()
                    .map(|(key, bucket)| (*key, bucket.clone()))
                    .collect(),
                by_category: stats
                    .by_category
                    .iter()
                    .map(|(key, bucket)| (*key, bucket.clone()))
                    .collect(),
            },
        }
    }

    pub fn into_state(self) -> (Vec<CommandExecution>, Statistics) {
        let records = self
            .command_executions
            .into_iter()
            .map(|entry| entry.data)
            .collect();
        let stats = Statistics {
            global: self.statistics.global,
            by_terminal: self.statistics.by_terminal.into_iter().collect(),
            by_executor: self.statistics.by_executor.into_iter().collect(),
            by_category: self.statistics.by_category.into_iter().collect(),
        };
        (records, stats)
    }
}

/// Serializes and durably writes a snapshot.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| LensError::io("creating snapshot directory", err))?;
    }

    let body = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| LensError::json("serializing snapshot", err))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &body).map_err(|err| LensError::io("writing snapshot temp file", err))?;
    fs::rename(&tmp, path).map_err(|err| LensError::io("renaming snapshot into place", err))?;
    Ok(())
}

/// Reads the snapshot, degrading to empty state on any failure.
pub fn load_snapshot(path: &Path) -> Snapshot {
    let empty = || Snapshot {
        version: SNAPSHOT_VERSION,
        timestamp: Utc::now(),
        command_executions: Vec::new(),
        statistics: SnapshotStats::default(),
    };

    if !path.exists() {
        return empty();
    }

    let body = match fs::read(path) {
        Ok(body) => body,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to read snapshot; starting empty");
            return empty();
        }
    };

    let snapshot: Snapshot = match serde_json::from_slice(&body) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Snapshot is corrupt; starting empty");
            return empty();
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            version = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "Unsupported snapshot version; starting empty"
        );
        return empty();
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionContext;
    use tempfile::tempdir;

    fn sample_state() -> (Vec<CommandExecution>, Statistics) {
        let mut stats = Statistics::default();
        let mut records = Vec::new();
        for (raw, code) in [("ls -la", 0), ("make test", 1), ("git status", 0)] {
            let mut record =
                CommandExecution::begin(ExecutionContext::default(), "/repo".into(), 0);
            record.command.raw = raw.to_string();
            record.finish(code, 1);
            stats.record(&record);
            records.push(record);
        }
        (records, stats)
    }

    #[test]
    fn round_trip_preserves_records_and_stats() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(SNAPSHOT_FILE);
        let (records, stats) = sample_state();

        save_snapshot(&path, &Snapshot::build(&records, &stats)).expect("save");
        let (loaded_records, loaded_stats) = load_snapshot(&path).into_state();

        assert_eq!(loaded_records.len(), records.len());
        // Order-preserving round trip.
        let ids: Vec<_> = records.iter().map(|record| record.id.clone()).collect();
        let loaded_ids: Vec<_> = loaded_records
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(ids, loaded_ids);
        assert_eq!(loaded_stats, stats);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().expect("temp dir");
        let snapshot = load_snapshot(&dir.path().join("nope.json"));
        assert!(snapshot.command_executions.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(SNAPSHOT_FILE);
        fs::write(&path, b"{not json").expect("write");
        let snapshot = load_snapshot(&path);
        assert!(snapshot.command_executions.is_empty());
    }

    #[test]
    fn future_version_loads_empty() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(SNAPSHOT_FILE);
        let (records, stats) = sample_state();
        let mut snapshot = Snapshot::build(&records, &stats);
        snapshot.version = SNAPSHOT_VERSION + 1;
        save_snapshot(&path, &snapshot).expect("save");

        assert!(load_snapshot(&path).command_executions.is_empty());
    }

    #[test]
    fn snapshot_schema_has_expected_shape() {
        let (records, stats) = sample_state();
        let snapshot = Snapshot::build(&records, &stats);
        let value = serde_json::to_value(&snapshot).expect("to value");

        assert_eq!(value["version"], SNAPSHOT_VERSION);
        assert!(value["command_executions"][0]["id"].is_string());
        assert!(value["command_executions"][0]["data"]["command"]["raw"].is_string());
        // Entry-list encoding for keyed buckets.
        assert!(value["statistics"]["by_executor"][0].is_array());
    }
}
