//! Aggregate statistics over finalized command records.
//!
//! Four independent bucket maps: one global bucket, plus buckets keyed by
//! terminal, executor kind, and category. Buckets are created lazily on
//! the first record that touches a key and are only ever removed by a
//! global clear.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Category, CommandExecution, ExecStatus, ExecutorKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsBucket {
    pub total_commands: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration_ms: i64,
}

impl StatsBucket {
    fn record(&mut self, record: &CommandExecution) {
        self.total_commands += 1;
        match record.execution.status {
            ExecStatus::Success => self.success_count += 1,
            ExecStatus::Error => self.error_count += 1,
            _ => {}
        }
        self.total_duration_ms += record.execution.duration_ms.unwrap_or(0);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub global: StatsBucket,
    pub by_terminal: BTreeMap<String, StatsBucket>,
    pub by_executor: BTreeMap<ExecutorKind, StatsBucket>,
    pub by_category: BTreeMap<Category, StatsBucket>,
}

impl Statistics {
    /// Folds one finalized record into all four bucket maps.
    pub fn record(&mut self, record: &CommandExecution) {
        self.global.record(record);
        self.by_terminal
            .entry(record.context.terminal.id.clone())
            .or_default()
            .record(record);
        self.by_executor
            .entry(record.executor.kind)
            .or_default()
            .record(record);
        self.by_category
            .entry(record.command.category)
            .or_default()
            .record(record);
    }

    pub fn reset(&mut self) {
        *self = Statistics::default();
    }
}
