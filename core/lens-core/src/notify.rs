//! Notification policy for finalized commands.
//!
//! Long-running commands surface a notification when their duration
//! crosses a threshold; executor kinds can override the threshold (agents
//! run long on purpose), and a configured CLI prefix list is always
//! surfaced regardless of duration. Evaluation and emission are
//! best-effort: a failing notifier is logged and forgotten, it can never
//! disturb command tracking.

use std::collections::BTreeMap;
use tracing::warn;

use crate::types::{CommandExecution, ExecStatus, ExecutorKind};

/// Destination for emitted notifications (an OS notifier, a message
/// center, a test probe).
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

/// A notifier that only writes to the log. Used when no UI is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        tracing::info!(title, body, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Default duration threshold in milliseconds.
    pub long_command_threshold_ms: i64,
    /// Per-executor threshold overrides.
    pub executor_thresholds: BTreeMap<ExecutorKind, i64>,
    /// Command prefixes that are always surfaced, regardless of duration.
    pub passthrough_prefixes: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let mut executor_thresholds = BTreeMap::new();
        executor_thresholds.insert(ExecutorKind::ClaudeCode, 15_000);
        executor_thresholds.insert(ExecutorKind::GeminiCli, 15_000);
        Self {
            enabled: true,
            long_command_threshold_ms: 5_000,
            executor_thresholds,
            passthrough_prefixes: vec!["termlens".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Applies the policy to a finalized record.
pub fn evaluate(config: &NotifyConfig, record: &CommandExecution) -> Option<Notification> {
    if !config.enabled {
        return None;
    }

    let duration_ms = record.execution.duration_ms.unwrap_or(0);
    let passthrough = is_passthrough(config, &record.command.raw);
    if !passthrough {
        let threshold = config
            .executor_thresholds
            .get(&record.executor.kind)
            .copied()
            .unwrap_or(config.long_command_threshold_ms);
        if duration_ms < threshold {
            return None;
        }
    }

    let title = match record.execution.status {
        ExecStatus::Error => format!(
            "Command failed (exit {})",
            record.execution.exit_code.unwrap_or(-1)
        ),
        _ => "Command finished".to_string(),
    };
    let body = format!(
        "{} ({})",
        summarize_command(&record.command.raw),
        format_duration(duration_ms)
    );
    Some(Notification { title, body })
}

/// Emits through the notifier, swallowing its failures.
pub fn emit(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(err) = notifier.notify(&notification.title, &notification.body) {
        warn!(error = %err, "Notifier failed; dropping notification");
    }
}

fn is_passthrough(config: &NotifyConfig, raw: &str) -> bool {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix("./").unwrap_or(trimmed);
    config.passthrough_prefixes.iter().any(|prefix| {
        bare == prefix || bare.starts_with(&format!("{} ", prefix))
    })
}

fn summarize_command(raw: &str) -> &str {
    if raw.is_empty() {
        "Unknown command"
    } else {
        raw
    }
}

fn format_duration(ms: i64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }
    if ms < 60_000 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{}m {}s", minutes, seconds)
}
