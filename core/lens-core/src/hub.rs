//! Aggregation and persistence service for finalized command records.
//!
//! The hub is the only cross-terminal shared state: a record store in
//! insertion order, the four statistics bucket maps, and the snapshot
//! cycle. All of it sits behind one lock, which gives every bucket the
//! single-writer discipline the statistics need: concurrent finalizes from
//! different terminals serialize here and never lose an update.
//!
//! Persistence is coalesced, not queued: registrations mark the snapshot
//! dirty and nudge the persist worker; the worker also wakes on its own
//! periodic timer. A slow or failing disk write degrades durability, never
//! liveness; the registration path only ever flips a flag.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};

use crate::notify::{emit, evaluate, Notifier, NotifyConfig};
use crate::persist::{load_snapshot, save_snapshot, Snapshot, SNAPSHOT_FILE};
use crate::stats::Statistics;
use crate::types::{Category, CommandExecution, ExecStatus, ExecutorKind};

// ═══════════════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    StartTime,
    EndTime,
    DurationMs,
    ExitCode,
    Raw,
    Category,
    Executor,
    Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilter {
    pub window_id: Option<String>,
    pub terminal_id: Option<String>,
    pub executor: Option<ExecutorKind>,
    pub status: Option<ExecStatus>,
    pub category: Option<Category>,
    /// Inclusive bounds on the record's start time.
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on the raw command.
    pub search: Option<String>,
    pub sort_by: Option<SortKey>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl QueryFilter {
    fn matches(&self, record: &CommandExecution) -> bool {
        if let Some(window_id) = &self.window_id {
            if record.context.window.id != *window_id {
                return false;
            }
        }
        if let Some(terminal_id) = &self.terminal_id {
            if record.context.terminal.id != *terminal_id {
                return false;
            }
        }
        if let Some(executor) = self.executor {
            if record.executor.kind != executor {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.execution.status != status {
                return false;
            }
        }
        if let Some(category) = self.category {
            if record.command.category != category {
                return false;
            }
        }
        if let Some(after) = self.started_after {
            if record.execution.start_time < after {
                return false;
            }
        }
        if let Some(before) = self.started_before {
            if record.execution.start_time > before {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !record.command.raw.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// The Hub
// ═══════════════════════════════════════════════════════════════════════════════

struct HubState {
    records: Vec<CommandExecution>,
    stats: Statistics,
}

struct PersistSignal {
    dirty: Mutex<bool>,
    wake: Condvar,
    shutdown: AtomicBool,
}

pub struct CommandHub {
    state: Mutex<HubState>,
    snapshot_path: PathBuf,
    notify_config: NotifyConfig,
    notifier: Arc<dyn Notifier>,
    signal: Arc<PersistSignal>,
}

impl CommandHub {
    /// Opens the hub, loading any existing snapshot. Missing or corrupt
    /// snapshots start empty; the hub can always open.
    pub fn open(data_dir: &std::path::Path, notify_config: NotifyConfig, notifier: Arc<dyn Notifier>) -> Self {
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let (records, stats) = load_snapshot(&snapshot_path).into_state();
        if !records.is_empty() {
            info!(records = records.len(), "Loaded command snapshot");
        }
        Self {
            state: Mutex::new(HubState { records, stats }),
            snapshot_path,
            notify_config,
            notifier,
            signal: Arc::new(PersistSignal {
                dirty: Mutex::new(false),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Validates and stores a finalized record, updates the statistics
    /// buckets, schedules a coalesced persist, and evaluates the
    /// notification policy. Validation failures are data, not errors the
    /// caller must catch.
    pub fn register_execution(
        &self,
        record: CommandExecution,
    ) -> std::result::Result<String, Vec<String>> {
        let errors = validate(&record);
        if !errors.is_empty() {
            return Err(errors);
        }

        let id = record.id.clone();
        let notification = evaluate(&self.notify_config, &record);
        {
            let mut state = self.state.lock().expect("hub state lock");
            state.stats.record(&record);
            state.records.push(record);
        }
        debug!(id = %id, "Registered command execution");

        self.mark_dirty();

        if let Some(notification) = notification {
            emit(self.notifier.as_ref(), &notification);
        }

        Ok(id)
    }

    pub fn query(&self, filter: &QueryFilter) -> Vec<CommandExecution> {
        let state = self.state.lock().expect("hub state lock");
        let mut matched: Vec<CommandExecution> = state
            .records
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        drop(state);

        if let Some(key) = filter.sort_by {
            // Stable sort: equal keys keep insertion order either way.
            matched.sort_by(|a, b| {
                let ordering = compare(key, a, b);
                if filter.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    pub fn statistics(&self) -> Statistics {
        self.state.lock().expect("hub state lock").stats.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("hub state lock").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all records, zeroes every bucket, and persists immediately.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock().expect("hub state lock");
            state.records.clear();
            state.stats.reset();
        }
        if let Err(err) = self.persist_now() {
            warn!(error = %err, "Failed to persist after clear");
            self.mark_dirty();
        }
    }

    /// Writes the snapshot synchronously. The state lock is held only
    /// while cloning, never across the disk write.
    pub fn persist_now(&self) -> crate::error::Result<()> {
        let snapshot = {
            let state = self.state.lock().expect("hub state lock");
            Snapshot::build(&state.records, &state.stats)
        };
        save_snapshot(&self.snapshot_path, &snapshot)
    }

    fn mark_dirty(&self) {
        let mut dirty = self.signal.dirty.lock().expect("persist signal lock");
        *dirty = true;
        self.signal.wake.notify_one();
    }

    /// Spawns the persist worker: wakes on registration nudges and on the
    /// periodic interval, writing at most one snapshot per wake. Failed
    /// writes stay dirty and retry on the next cycle.
    pub fn spawn_persister(self: Arc<Self>, interval: Duration) -> PersistHandle {
        let hub = Arc::clone(&self);
        let signal = Arc::clone(&self.signal);
        let thread = std::thread::spawn(move || loop {
            let was_dirty = {
                let mut dirty = signal.dirty.lock().expect("persist signal lock");
                if !*dirty && !signal.shutdown.load(Ordering::SeqCst) {
                    let (guard, _timeout) = signal
                        .wake
                        .wait_timeout(dirty, interval)
                        .expect("persist signal lock");
                    dirty = guard;
                }
                std::mem::replace(&mut *dirty, false)
            };

            if signal.shutdown.load(Ordering::SeqCst) {
                if was_dirty {
                    if let Err(err) = hub.persist_now() {
                        warn!(error = %err, "Final persist failed during shutdown");
                    }
                }
                break;
            }

            if was_dirty {
                if let Err(err) = hub.persist_now() {
                    warn!(error = %err, "Snapshot write failed; will retry");
                    let mut dirty = signal.dirty.lock().expect("persist signal lock");
                    *dirty = true;
                }
            }
        });

        PersistHandle {
            signal: Arc::clone(&self.signal),
            thread: Some(thread),
        }
    }
}

fn validate(record: &CommandExecution) -> Vec<String> {
    let mut errors = Vec::new();
    if record.command.raw.trim().is_empty() {
        errors.push("raw command required".to_string());
    }
    if record.context.terminal.id.trim().is_empty() {
        errors.push("terminal id required".to_string());
    }
    if record.context.window.id.trim().is_empty() {
        errors.push("window id required".to_string());
    }
    errors
}

fn compare(key: SortKey, a: &CommandExecution, b: &CommandExecution) -> std::cmp::Ordering {
    match key {
        SortKey::StartTime => a.execution.start_time.cmp(&b.execution.start_time),
        SortKey::EndTime => a.execution.end_time.cmp(&b.execution.end_time),
        SortKey::DurationMs => a.execution.duration_ms.cmp(&b.execution.duration_ms),
        SortKey::ExitCode => a.execution.exit_code.cmp(&b.execution.exit_code),
        SortKey::Raw => a.command.raw.cmp(&b.command.raw),
        SortKey::Category => a.command.category.cmp(&b.command.category),
        SortKey::Executor => a.executor.kind.cmp(&b.executor.kind),
        SortKey::Status => a.execution.status.cmp(&b.execution.status),
    }
}

/// Owns the persist worker thread; stopping it flushes a final dirty
/// snapshot.
pub struct PersistHandle {
    signal: Arc<PersistSignal>,
    thread: Option<JoinHandle<()>>,
}

impl PersistHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.shutdown.store(true, Ordering::SeqCst);
        self.signal.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PersistHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
