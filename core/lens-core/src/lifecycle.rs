//! Per-terminal command lifecycle tracking.
//!
//! Each terminal owns one `CommandTracker`, a state machine driven by the
//! shell-integration markers: `Idle -> PromptActive -> CommandRunning ->
//! Idle`. Finalize returns to `Idle`, not `PromptActive`; the next prompt
//! marker re-enters `PromptActive` on its own. Events for one terminal are
//! applied strictly in arrival order under that terminal's lock; trackers
//! for different terminals are independent.

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::classify::classify;
use crate::context::SessionContext;
use crate::recovery::{recover, ScreenBuffer};
use crate::types::{CommandExecution, ExecutionContext, OutputStream, RecordMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    PromptActive,
    CommandRunning,
}

pub struct CommandTracker {
    /// Window/terminal/session identity, fixed at registration.
    base: ExecutionContext,
    state: TrackerState,
    prompt_line: Option<u32>,
    current: Option<CommandExecution>,
    finalized: Vec<CommandExecution>,
    /// In-flight records dropped by a second command-start marker.
    orphaned: u64,
}

impl CommandTracker {
    pub fn new(base: ExecutionContext) -> Self {
        Self {
            base,
            state: TrackerState::Idle,
            prompt_line: None,
            current: None,
            finalized: Vec::new(),
            orphaned: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TrackerState::CommandRunning
    }

    pub fn orphaned(&self) -> u64 {
        self.orphaned
    }

    /// Prompt start (`A`). Records the prompt origin row. Never finalizes a
    /// running command.
    pub fn prompt_start(&mut self, cursor_row: u32) {
        self.prompt_line = Some(cursor_row);
        if self.state != TrackerState::CommandRunning {
            self.state = TrackerState::PromptActive;
        }
    }

    /// Command start (`C`, or `B` on the extension channel). Allocates a
    /// fresh record. Buffered out-of-band command text takes priority;
    /// otherwise the screen is consulted synchronously.
    pub fn command_start(
        &mut self,
        context: &mut SessionContext,
        screen: Option<&dyn ScreenBuffer>,
        cursor_row: u32,
    ) {
        if let Some(previous) = self.current.take() {
            // Replace policy for overlapping starts: the old record is
            // dropped unfinalized. Counted so the loss is observable.
            self.orphaned += 1;
            warn!(
                terminal_id = %self.base.terminal.id,
                orphaned_id = %previous.id,
                command = %previous.command.raw,
                "Command start while already running; replacing in-flight record"
            );
        }

        let mut record_context = self.base.clone();
        if !context.window_title.is_empty() {
            record_context.window.title = context.window_title.clone();
        }

        let mut record = CommandExecution::begin(record_context, context.cwd.clone(), cursor_row);
        record.command.raw = match context.pending_command_text.take() {
            Some(text) => text,
            None => match screen {
                Some(buffer) => recover(buffer, cursor_row),
                None => String::new(),
            },
        };

        debug!(
            terminal_id = %self.base.terminal.id,
            id = %record.id,
            command = %record.command.raw,
            start_line = cursor_row,
            "Command started"
        );

        self.current = Some(record);
        self.state = TrackerState::CommandRunning;
    }

    /// Late-arriving command text overwrites the in-flight record directly.
    /// With no record running the text is buffered as pending instead.
    pub fn command_text(&mut self, context: &mut SessionContext, text: String) {
        match self.current.as_mut() {
            Some(record) => record.command.raw = text,
            None => context.pending_command_text = Some(text),
        }
    }

    /// `CommandTime` extension key: the shell's own start-of-command clock.
    pub fn command_timestamp(&mut self, epoch_ms: i64) {
        if let Some(record) = self.current.as_mut() {
            if let Some(stamp) = Utc.timestamp_millis_opt(epoch_ms).single() {
                record.timestamp = stamp;
            }
        }
    }

    /// Command end (`D[;exitcode]`). A missing or unparsable exit code
    /// defaults to 0. In `Idle` this is a logged no-op.
    pub fn command_end(&mut self, context: &SessionContext, exit_code: Option<i32>, cursor_row: u32) {
        let Some(mut record) = self.current.take() else {
            debug!(
                terminal_id = %self.base.terminal.id,
                "Command end without active record; ignoring"
            );
            self.state = TrackerState::Idle;
            return;
        };

        record.finish(exit_code.unwrap_or(0), cursor_row);

        let classification = classify(&record.command.raw, context);
        record.command.parsed = classification.parsed;
        record.command.category = classification.category;
        record.command.sensitivity = classification.sensitivity;
        record.executor = classification.executor;
        if record.execution.cwd.is_empty() {
            record.execution.cwd = context.cwd.clone();
        }
        record.metadata = metadata_snapshot(context);

        debug!(
            terminal_id = %self.base.terminal.id,
            id = %record.id,
            exit_code = record.execution.exit_code,
            status = ?record.execution.status,
            "Command finalized"
        );

        self.finalized.push(record);
        self.state = TrackerState::Idle;
    }

    /// Accumulates observed output into the in-flight record's summary.
    pub fn append_output(&mut self, stream: OutputStream, data: &str) {
        if let Some(record) = self.current.as_mut() {
            record.output.stream_mut(stream).append(data);
            record.execution.resources.output_bytes += data.len() as u64;
        }
    }

    /// Drains finalized records for hand-off to the hub.
    pub fn take_finalized(&mut self) -> Vec<CommandExecution> {
        std::mem::take(&mut self.finalized)
    }

    pub fn prompt_line(&self) -> Option<u32> {
        self.prompt_line
    }

    pub fn current_started_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().map(|record| record.execution.start_time)
    }
}

fn metadata_snapshot(context: &SessionContext) -> RecordMetadata {
    RecordMetadata {
        tags: Vec::new(),
        related_ids: Vec::new(),
        git_branch: context.git_branch.clone(),
        user_vars: context.user_vars.clone(),
        marks: context.marks.clone(),
        badges: context.badges.clone(),
        hyperlinks: context.hyperlinks.clone(),
        remote_host: context.remote_host.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::SliceScreen;
    use crate::types::{Category, ExecStatus, ExecutorKind, Sensitivity, TerminalContext, WindowContext};

    fn base_context() -> ExecutionContext {
        ExecutionContext {
            window: WindowContext {
                id: "win-1".to_string(),
                index: 0,
                title: String::new(),
            },
            terminal: TerminalContext {
                id: "term-1".to_string(),
                label: "Terminal 1".to_string(),
            },
            session: Default::default(),
        }
    }

    fn tracker() -> (CommandTracker, SessionContext) {
        (CommandTracker::new(base_context()), SessionContext::default())
    }

    #[test]
    fn full_lifecycle_produces_finalized_record() {
        let (mut tracker, mut ctx) = tracker();

        tracker.prompt_start(3);
        assert_eq!(tracker.state(), TrackerState::PromptActive);

        ctx.pending_command_text = Some("ls -la".to_string());
        tracker.command_start(&mut ctx, None, 4);
        assert!(tracker.is_running());
        assert_eq!(ctx.pending_command_text, None);

        tracker.command_end(&ctx, Some(0), 9);
        assert_eq!(tracker.state(), TrackerState::Idle);

        let records = tracker.take_finalized();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.command.raw, "ls -la");
        assert_eq!(record.execution.exit_code, Some(0));
        assert_eq!(record.execution.status, ExecStatus::Success);
        assert_eq!(record.execution.start_line, 4);
        assert_eq!(record.execution.end_line, Some(9));
        assert_eq!(record.command.category, Category::FileSystem);
    }

    #[test]
    fn missing_exit_code_defaults_to_zero() {
        let (mut tracker, mut ctx) = tracker();
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_end(&ctx, None, 1);

        let records = tracker.take_finalized();
        assert_eq!(records[0].execution.exit_code, Some(0));
        assert_eq!(records[0].execution.status, ExecStatus::Success);
    }

    #[test]
    fn nonzero_exit_code_marks_error() {
        let (mut tracker, mut ctx) = tracker();
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_end(&ctx, Some(1), 1);

        let records = tracker.take_finalized();
        assert_eq!(records[0].execution.status, ExecStatus::Error);
    }

    #[test]
    fn command_end_in_idle_is_a_noop() {
        let (mut tracker, ctx) = tracker();
        tracker.command_end(&ctx, Some(1), 0);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.take_finalized().is_empty());
    }

    #[test]
    fn second_start_replaces_and_orphans_first() {
        let (mut tracker, mut ctx) = tracker();

        ctx.pending_command_text = Some("sleep 100".to_string());
        tracker.command_start(&mut ctx, None, 0);

        ctx.pending_command_text = Some("echo second".to_string());
        tracker.command_start(&mut ctx, None, 5);
        assert_eq!(tracker.orphaned(), 1);

        tracker.command_end(&ctx, Some(0), 6);
        let records = tracker.take_finalized();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command.raw, "echo second");
    }

    #[test]
    fn prompt_start_does_not_finalize_running_command() {
        let (mut tracker, mut ctx) = tracker();
        ctx.pending_command_text = Some("make".to_string());
        tracker.command_start(&mut ctx, None, 0);

        tracker.prompt_start(2);
        assert!(tracker.is_running());
        assert!(tracker.take_finalized().is_empty());
    }

    #[test]
    fn late_command_text_overwrites_running_record() {
        let (mut tracker, mut ctx) = tracker();
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_text(&mut ctx, "npm run build".to_string());
        tracker.command_end(&ctx, Some(0), 3);

        let records = tracker.take_finalized();
        assert_eq!(records[0].command.raw, "npm run build");
        assert_eq!(records[0].command.category, Category::Build);
    }

    #[test]
    fn command_text_in_idle_buffers_as_pending() {
        let (mut tracker, mut ctx) = tracker();
        tracker.command_text(&mut ctx, "cargo test".to_string());
        assert_eq!(ctx.pending_command_text.as_deref(), Some("cargo test"));
    }

    #[test]
    fn falls_back_to_screen_recovery() {
        let (mut tracker, mut ctx) = tracker();
        let rows: Vec<String> = vec!["user@host:~$ git status".to_string(), String::new()];
        let screen = SliceScreen::new(&rows);

        tracker.command_start(&mut ctx, Some(&screen), 1);
        tracker.command_end(&ctx, Some(0), 2);

        let records = tracker.take_finalized();
        assert_eq!(records[0].command.raw, "git status");
    }

    #[test]
    fn finalize_copies_context_into_record() {
        let (mut tracker, mut ctx) = tracker();
        ctx.cwd = "/home/user/repo".to_string();
        ctx.git_branch = Some("main".to_string());
        ctx.badges = vec!["ci".to_string()];
        ctx.user_vars.insert("ROLE".to_string(), "dev".to_string());

        ctx.pending_command_text = Some("git status".to_string());
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_end(&ctx, Some(0), 1);

        let record = &tracker.take_finalized()[0];
        assert_eq!(record.execution.cwd, "/home/user/repo");
        assert_eq!(record.metadata.git_branch.as_deref(), Some("main"));
        assert_eq!(record.metadata.badges, vec!["ci"]);
        assert_eq!(record.metadata.user_vars.get("ROLE").map(String::as_str), Some("dev"));
    }

    #[test]
    fn agent_session_attributes_executor_at_finalize() {
        let (mut tracker, mut ctx) = tracker();
        ctx.agent = Some(ExecutorKind::ClaudeCode);

        ctx.pending_command_text = Some("cargo build".to_string());
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_end(&ctx, Some(0), 1);

        let record = &tracker.take_finalized()[0];
        assert_eq!(record.executor.kind, ExecutorKind::ClaudeCode);
    }

    #[test]
    fn output_accumulates_only_while_running() {
        let (mut tracker, mut ctx) = tracker();
        tracker.append_output(OutputStream::Stdout, "dropped\n");

        tracker.command_start(&mut ctx, None, 0);
        tracker.append_output(OutputStream::Stdout, "hello\n");
        tracker.append_output(OutputStream::Stderr, "oops\n");
        tracker.command_end(&ctx, Some(0), 1);

        let record = &tracker.take_finalized()[0];
        assert_eq!(record.output.stdout.sample, "hello\n");
        assert_eq!(record.output.stderr.sample, "oops\n");
        assert_eq!(record.execution.resources.output_bytes, 11);
    }

    #[test]
    fn dangerous_command_classified_at_finalize() {
        let (mut tracker, mut ctx) = tracker();
        ctx.pending_command_text = Some("rm -rf /".to_string());
        tracker.command_start(&mut ctx, None, 0);
        tracker.command_end(&ctx, Some(0), 1);

        let record = &tracker.take_finalized()[0];
        assert_eq!(record.command.sensitivity, Sensitivity::Dangerous);
    }
}
