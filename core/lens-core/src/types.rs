//! Core record types for command tracking.
//!
//! A `CommandExecution` is the central entity: one record per observed
//! command, created when the shell signals a command start and finalized
//! (then immutable) when the matching end marker arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output samples are capped at the first 1000 characters per stream.
pub const OUTPUT_SAMPLE_LIMIT: usize = 1000;

// ═══════════════════════════════════════════════════════════════════════════════
// Classification Enums
// ═══════════════════════════════════════════════════════════════════════════════

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    Human,
    ClaudeCode,
    GeminiCli,
    ShellScript,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Human => "human",
            ExecutorKind::ClaudeCode => "claude-code",
            ExecutorKind::GeminiCli => "gemini-cli",
            ExecutorKind::ShellScript => "shell-script",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExecutorKind::Human => "Human",
            ExecutorKind::ClaudeCode => "Claude Code",
            ExecutorKind::GeminiCli => "Gemini CLI",
            ExecutorKind::ShellScript => "Shell Script",
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, ExecutorKind::ClaudeCode | ExecutorKind::GeminiCli)
    }
}

/// What triggered a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    UserRequest,
    AiResponse,
    Scheduled,
    ChainExecution,
}

/// Coarse command category. Assigned by the first matching rule in an
/// ordered table; `Other` when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Build,
    Test,
    Deploy,
    VersionControl,
    FileSystem,
    System,
    Install,
    ToolSpecific,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Build => "build",
            Category::Test => "test",
            Category::Deploy => "deploy",
            Category::VersionControl => "version-control",
            Category::FileSystem => "file-system",
            Category::System => "system",
            Category::Install => "install",
            Category::ToolSpecific => "tool-specific",
            Category::Other => "other",
        }
    }
}

/// Security sensitivity. Variant order is severity order, so the derived
/// `Ord` gives `Dangerous > Sensitive > Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Normal,
    Sensitive,
    Dangerous,
}

/// Execution status. Transitions only move forward: a terminal status is
/// never regressed back to `Pending` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
    Timeout,
}

impl ExecStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecStatus::Success | ExecStatus::Error | ExecStatus::Cancelled | ExecStatus::Timeout
        )
    }

    pub fn can_transition(&self, next: ExecStatus) -> bool {
        match self {
            ExecStatus::Pending => next != ExecStatus::Pending,
            ExecStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Structure
// ═══════════════════════════════════════════════════════════════════════════════

/// A flag value: bare flags are `Bool(true)`, flags that consumed the
/// following token carry it as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, FlagValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDetail {
    pub raw: String,
    pub parsed: ParsedCommand,
    pub category: Category,
    pub sensitivity: Sensitivity,
}

impl Default for CommandDetail {
    fn default() -> Self {
        Self {
            raw: String::new(),
            parsed: ParsedCommand::default(),
            category: Category::Other,
            sensitivity: Sensitivity::Normal,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowContext {
    pub id: String,
    pub index: u32,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalContext {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub shell: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub window: WindowContext,
    pub terminal: TerminalContext,
    pub session: SessionInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    pub kind: ExecutorKind,
    pub name: String,
    pub trigger: Trigger,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::Human,
            name: ExecutorKind::Human.display_name().to_string(),
            trigger: Trigger::UserRequest,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Execution Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Resource usage placeholders. Upstream does not report these yet; the
/// fields exist so persisted snapshots keep a stable schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub memory_bytes: u64,
    pub output_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub status: ExecStatus,
    pub cwd: String,
    pub start_line: u32,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub resources: ResourceUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub lines: u64,
    pub bytes: u64,
    pub sample: String,
    pub has_more: bool,
}

impl StreamSummary {
    /// Accumulates a chunk of output, keeping only the first
    /// `OUTPUT_SAMPLE_LIMIT` characters as the sample.
    pub fn append(&mut self, data: &str) {
        self.lines += data.split('\n').count() as u64;
        self.bytes += data.len() as u64;

        let remaining = OUTPUT_SAMPLE_LIMIT.saturating_sub(self.sample.chars().count());
        if remaining > 0 {
            self.sample.extend(data.chars().take(remaining));
        }
        self.has_more = self.bytes as usize > OUTPUT_SAMPLE_LIMIT;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub stdout: StreamSummary,
    pub stderr: StreamSummary,
}

impl OutputSummary {
    pub fn stream_mut(&mut self, stream: OutputStream) -> &mut StreamSummary {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub tags: Vec<String>,
    pub related_ids: Vec<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    pub user_vars: BTreeMap<String, String>,
    pub marks: Vec<u32>,
    pub badges: Vec<String>,
    pub hyperlinks: Vec<String>,
    #[serde(default)]
    pub remote_host: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// The Record
// ═══════════════════════════════════════════════════════════════════════════════

/// One observed command execution.
///
/// Created by the lifecycle tracker on a command-start marker, optionally
/// mutated while running (late command text, output accumulation), and
/// immutable once finalized and handed to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandExecution {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub context: ExecutionContext,
    pub executor: Executor,
    pub command: CommandDetail,
    pub execution: ExecutionInfo,
    pub output: OutputSummary,
    pub metadata: RecordMetadata,
}

impl CommandExecution {
    /// Allocates a fresh record in the `Running` state.
    pub fn begin(context: ExecutionContext, cwd: String, start_line: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            timestamp: now,
            context,
            executor: Executor::default(),
            command: CommandDetail::default(),
            execution: ExecutionInfo {
                start_time: now,
                end_time: None,
                duration_ms: None,
                exit_code: None,
                status: ExecStatus::Running,
                cwd,
                start_line,
                end_line: None,
                resources: ResourceUsage::default(),
            },
            output: OutputSummary::default(),
            metadata: RecordMetadata::default(),
        }
    }

    /// Applies a status change, refusing backward transitions.
    pub fn transition(&mut self, next: ExecStatus) -> bool {
        if self.execution.status.can_transition(next) {
            self.execution.status = next;
            true
        } else {
            false
        }
    }

    /// Stamps end time, exit code, and derived duration. The end time is
    /// clamped so `end_time >= start_time` always holds.
    pub fn finish(&mut self, exit_code: i32, end_line: u32) {
        let end = Utc::now().max(self.execution.start_time);
        self.execution.end_time = Some(end);
        self.execution.duration_ms =
            Some((end - self.execution.start_time).num_milliseconds());
        self.execution.exit_code = Some(exit_code);
        self.execution.end_line = Some(end_line);
        let status = if exit_code == 0 {
            ExecStatus::Success
        } else {
            ExecStatus::Error
        };
        self.transition(status);
    }
}

fn new_record_id() -> String {
    format!("cmd-{}", ulid::Ulid::new())
}
