//! Control-channel demultiplexer.
//!
//! Numbered out-of-band payloads arrive from the terminal renderer already
//! stripped of their escape framing; this module routes each `(channel,
//! payload)` pair to a registered handler. Handlers are a fixed table of
//! capability variants keyed by channel code, so routing is testable
//! without the state machine behind it.
//!
//! Fault isolation: a malformed payload is rejected inside its own
//! handler, logged, and discarded. It never unregisters the channel,
//! never corrupts another channel's state, and never reaches the caller
//! as an error. Dispatch to an unregistered channel is a silent no-op.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::context::{AgentIo, IoDirection, SessionContext, SessionNotification};
use crate::error::{LensError, Result};
use crate::lifecycle::CommandTracker;
use crate::patterns::{RE_FILE_URL, RE_KEY_VALUE};
use crate::recovery::ScreenBuffer;
use crate::types::ExecutorKind;

// Channel codes, as emitted by shell integration and compatible tools.
pub const CH_ICON_AND_TITLE: u16 = 0;
pub const CH_ICON: u16 = 1;
pub const CH_TITLE: u16 = 2;
pub const CH_CWD: u16 = 7;
pub const CH_HYPERLINK: u16 = 8;
pub const CH_NOTIFY: u16 = 9;
pub const CH_CLIPBOARD: u16 = 52;
pub const CH_SHELL_MARKER: u16 = 133;
pub const CH_EXTENSION: u16 = 633;
pub const CH_NOTIFY_EXTENDED: u16 = 777;
pub const CH_VENDOR: u16 = 1337;

/// Everything a handler may touch for one terminal. Both references come
/// from the same terminal's session, locked by the caller, so one
/// terminal's events are applied strictly in arrival order.
pub struct DispatchTarget<'a> {
    pub context: &'a mut SessionContext,
    pub tracker: &'a mut CommandTracker,
    pub screen: Option<&'a dyn ScreenBuffer>,
    pub cursor_row: u32,
}

/// Handler capabilities, one per channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Title,
    WorkingDir,
    Hyperlink,
    Notify,
    NotifyExtended,
    Clipboard,
    ShellMarker,
    Extension,
    Vendor,
}

pub struct OscDemux {
    handlers: HashMap<u16, HandlerKind>,
}

impl OscDemux {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The full channel wiring used in production.
    pub fn with_default_channels() -> Self {
        let mut demux = Self::new();
        demux.register(CH_ICON_AND_TITLE, HandlerKind::Title);
        demux.register(CH_ICON, HandlerKind::Title);
        demux.register(CH_TITLE, HandlerKind::Title);
        demux.register(CH_CWD, HandlerKind::WorkingDir);
        demux.register(CH_HYPERLINK, HandlerKind::Hyperlink);
        demux.register(CH_NOTIFY, HandlerKind::Notify);
        demux.register(CH_CLIPBOARD, HandlerKind::Clipboard);
        demux.register(CH_SHELL_MARKER, HandlerKind::ShellMarker);
        demux.register(CH_EXTENSION, HandlerKind::Extension);
        demux.register(CH_NOTIFY_EXTENDED, HandlerKind::NotifyExtended);
        demux.register(CH_VENDOR, HandlerKind::Vendor);
        demux
    }

    pub fn register(&mut self, channel: u16, handler: HandlerKind) {
        self.handlers.insert(channel, handler);
    }

    /// Routes one payload. Returns whether a handler was registered for
    /// the channel; handler failures are logged and swallowed here.
    pub fn dispatch(&self, channel: u16, payload: &str, target: &mut DispatchTarget) -> bool {
        let Some(handler) = self.handlers.get(&channel) else {
            return false;
        };

        if let Err(err) = apply(*handler, channel, payload, target) {
            warn!(channel, error = %err, "Discarding control-channel payload");
        }
        true
    }
}

impl Default for OscDemux {
    fn default() -> Self {
        Self::with_default_channels()
    }
}

fn apply(
    handler: HandlerKind,
    channel: u16,
    payload: &str,
    target: &mut DispatchTarget,
) -> Result<()> {
    match handler {
        HandlerKind::Title => handle_title(channel, payload, target),
        HandlerKind::WorkingDir => handle_working_dir(channel, payload, target),
        HandlerKind::Hyperlink => handle_hyperlink(channel, payload, target),
        HandlerKind::Notify => handle_notify(payload, target),
        HandlerKind::NotifyExtended => handle_notify_extended(payload, target),
        HandlerKind::Clipboard => handle_clipboard(payload, target),
        HandlerKind::ShellMarker => handle_shell_marker(channel, payload, target),
        HandlerKind::Extension => handle_extension(channel, payload, target),
        HandlerKind::Vendor => handle_vendor(payload, target),
    }
}

/// Channels 0/2 carry the window title; channel 1 (icon only) is accepted
/// and ignored.
fn handle_title(channel: u16, payload: &str, target: &mut DispatchTarget) -> Result<()> {
    if channel != CH_ICON {
        target.context.window_title = payload.to_string();
    }
    Ok(())
}

/// Channel 7: `file://host/path`, percent-encoded.
fn handle_working_dir(channel: u16, payload: &str, target: &mut DispatchTarget) -> Result<()> {
    let caps = RE_FILE_URL
        .captures(payload)
        .ok_or_else(|| LensError::payload(channel, "expected a file:// URL"))?;
    let decoded = urlencoding::decode(&caps[1])
        .map_err(|err| LensError::payload(channel, format!("bad percent-encoding: {}", err)))?;
    target.context.cwd = decoded.into_owned();
    Ok(())
}

/// Channel 8: `params;uri`. An empty uri terminates a link and carries no
/// information worth keeping.
fn handle_hyperlink(channel: u16, payload: &str, target: &mut DispatchTarget) -> Result<()> {
    let (_params, uri) = payload
        .split_once(';')
        .ok_or_else(|| LensError::payload(channel, "expected params;uri"))?;
    if !uri.is_empty() {
        target.context.hyperlinks.push(uri.to_string());
    }
    Ok(())
}

/// Channel 9: the whole payload is the notification body.
fn handle_notify(payload: &str, target: &mut DispatchTarget) -> Result<()> {
    target.context.notifications.push(SessionNotification {
        title: "Terminal".to_string(),
        body: payload.to_string(),
    });
    Ok(())
}

/// Channel 777: `type;title;body`. Only `notify` is understood; other
/// types are discarded without error.
fn handle_notify_extended(payload: &str, target: &mut DispatchTarget) -> Result<()> {
    let mut parts = payload.splitn(3, ';');
    let kind = parts.next().unwrap_or_default();
    if kind != "notify" {
        debug!(kind, "Ignoring unknown extended notification type");
        return Ok(());
    }
    let title = parts.next().unwrap_or_default().to_string();
    let body = parts.next().unwrap_or_default().to_string();
    target
        .context
        .notifications
        .push(SessionNotification { title, body });
    Ok(())
}

/// Channel 52: `selection;base64data`. Decode failures are swallowed and
/// the clipboard simply does not update.
fn handle_clipboard(payload: &str, target: &mut DispatchTarget) -> Result<()> {
    let Some((_selection, data)) = payload.split_once(';') else {
        return Ok(());
    };
    if data == "?" {
        // Clipboard query, nothing to store.
        return Ok(());
    }
    match BASE64.decode(data) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => target.context.clipboard = Some(text),
            Err(_) => debug!("Clipboard payload was not UTF-8; ignoring"),
        },
        Err(_) => debug!("Clipboard payload was not valid base64; ignoring"),
    }
    Ok(())
}

/// Channel 133: single-letter lifecycle markers.
fn handle_shell_marker(channel: u16, payload: &str, target: &mut DispatchTarget) -> Result<()> {
    let mut parts = payload.split(';');
    match parts.next().unwrap_or_default() {
        "A" => target.tracker.prompt_start(target.cursor_row),
        "B" => {} // Prompt end: ready for input, nothing to record.
        "C" => target
            .tracker
            .command_start(target.context, target.screen, target.cursor_row),
        "D" => {
            let exit_code = parts.next().and_then(|code| code.trim().parse::<i32>().ok());
            target
                .tracker
                .command_end(target.context, exit_code, target.cursor_row);
        }
        other => {
            return Err(LensError::payload(
                channel,
                format!("unknown marker {:?}", other),
            ))
        }
    }
    Ok(())
}

/// Channel 633: `key=value` extension payloads, plus a marker dialect
/// where `B` opens the command and `C`/`D` close it.
fn handle_extension(channel: u16, payload: &str, target: &mut DispatchTarget) -> Result<()> {
    if let Some(caps) = RE_KEY_VALUE.captures(payload) {
        return handle_extension_kv(channel, &caps[1], &caps[2], target);
    }

    let mut parts = payload.split(';');
    match parts.next().unwrap_or_default() {
        "A" => target.tracker.prompt_start(target.cursor_row),
        "B" => target
            .tracker
            .command_start(target.context, target.screen, target.cursor_row),
        "C" => target.tracker.command_end(target.context, None, target.cursor_row),
        "D" => {
            let exit_code = parts.next().and_then(|code| code.trim().parse::<i32>().ok());
            target
                .tracker
                .command_end(target.context, exit_code, target.cursor_row);
        }
        other => {
            return Err(LensError::payload(
                channel,
                format!("unknown extension payload {:?}", other),
            ))
        }
    }
    Ok(())
}

fn handle_extension_kv(
    channel: u16,
    key: &str,
    value: &str,
    target: &mut DispatchTarget,
) -> Result<()> {
    match key {
        "CommandLine" => {
            let text = percent_decode(channel, value)?;
            target.tracker.command_text(target.context, text);
        }
        "CommandTime" => {
            let epoch_ms = value
                .parse::<i64>()
                .map_err(|_| LensError::payload(channel, "CommandTime must be epoch millis"))?;
            target.tracker.command_timestamp(epoch_ms);
        }
        "GitBranch" => {
            target.context.git_branch = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        "AgentSession" => match value {
            "end" => target.context.agent = None,
            other => match agent_kind(other) {
                Some(kind) => target.context.agent = Some(kind),
                None => debug!(agent = other, "Ignoring unknown agent session kind"),
            },
        },
        "AgentInput" | "AgentOutput" => {
            let text = percent_decode(channel, value)?;
            let direction = if key == "AgentInput" {
                IoDirection::Input
            } else {
                IoDirection::Output
            };
            // Captured agent traffic implies an active agent session.
            if target.context.agent.is_none() {
                target.context.agent = Some(ExecutorKind::ClaudeCode);
            }
            target.context.agent_transcript.push(AgentIo { direction, text });
        }
        other => debug!(key = other, "Ignoring unknown extension key"),
    }
    Ok(())
}

/// Channel 1337: vendor sub-commands.
fn handle_vendor(payload: &str, target: &mut DispatchTarget) -> Result<()> {
    if payload == "SetMark" {
        target.context.marks.push(target.cursor_row);
    } else if let Some(dir) = payload.strip_prefix("CurrentDir=") {
        target.context.cwd = dir.to_string();
    } else if let Some(pair) = payload.strip_prefix("SetUserVar=") {
        if let Some((key, value)) = pair.split_once('=') {
            target
                .context
                .user_vars
                .insert(key.to_string(), value.to_string());
        }
    } else if let Some(badge) = payload.strip_prefix("Badge=") {
        target.context.badges.push(badge.to_string());
    } else if let Some(host) = payload.strip_prefix("RemoteHost=") {
        if host.contains('@') {
            target.context.remote_host = Some(host.to_string());
        }
    } else {
        debug!(payload, "Ignoring unknown vendor sub-command");
    }
    Ok(())
}

fn agent_kind(value: &str) -> Option<ExecutorKind> {
    match value {
        "claude-code" | "claude" => Some(ExecutorKind::ClaudeCode),
        "gemini-cli" | "gemini" => Some(ExecutorKind::GeminiCli),
        _ => None,
    }
}

fn percent_decode(channel: u16, value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| LensError::payload(channel, format!("bad percent-encoding: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TrackerState;
    use crate::types::ExecutionContext;

    struct Fixture {
        context: SessionContext,
        tracker: CommandTracker,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                context: SessionContext::default(),
                tracker: CommandTracker::new(ExecutionContext::default()),
            }
        }

        fn dispatch(&mut self, demux: &OscDemux, channel: u16, payload: &str) -> bool {
            let mut target = DispatchTarget {
                context: &mut self.context,
                tracker: &mut self.tracker,
                screen: None,
                cursor_row: 0,
            };
            demux.dispatch(channel, payload, &mut target)
        }
    }

    #[test]
    fn unregistered_channel_is_silently_unhandled() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        assert!(!fx.dispatch(&demux, 4242, "anything"));
        assert_eq!(fx.tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn malformed_payload_does_not_mutate_tracker() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        assert!(fx.dispatch(&demux, CH_SHELL_MARKER, "Z;bogus"));
        assert_eq!(fx.tracker.state(), TrackerState::Idle);
        assert!(fx.tracker.take_finalized().is_empty());
    }

    #[test]
    fn title_channels_update_context() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_TITLE, "vim src/main.rs");
        assert_eq!(fx.context.window_title, "vim src/main.rs");

        // Icon-only channel is accepted but changes nothing.
        fx.dispatch(&demux, CH_ICON, "icon-name");
        assert_eq!(fx.context.window_title, "vim src/main.rs");
    }

    #[test]
    fn cwd_channel_percent_decodes_file_url() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_CWD, "file://localhost/home/user/my%20repo");
        assert_eq!(fx.context.cwd, "/home/user/my repo");
    }

    #[test]
    fn malformed_cwd_is_discarded() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.context.cwd = "/start".to_string();
        fx.dispatch(&demux, CH_CWD, "not-a-url");
        assert_eq!(fx.context.cwd, "/start");
    }

    #[test]
    fn hyperlink_channel_collects_uri() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_HYPERLINK, "id=1;https://example.com/build/123");
        fx.dispatch(&demux, CH_HYPERLINK, ";"); // link close
        assert_eq!(fx.context.hyperlinks, vec!["https://example.com/build/123"]);
    }

    #[test]
    fn notify_channels_collect_notifications() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_NOTIFY, "build finished");
        fx.dispatch(&demux, CH_NOTIFY_EXTENDED, "notify;CI;tests green");
        fx.dispatch(&demux, CH_NOTIFY_EXTENDED, "progress;50");

        assert_eq!(fx.context.notifications.len(), 2);
        assert_eq!(fx.context.notifications[0].body, "build finished");
        assert_eq!(fx.context.notifications[1].title, "CI");
        assert_eq!(fx.context.notifications[1].body, "tests green");
    }

    #[test]
    fn clipboard_decodes_base64_and_swallows_garbage() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_CLIPBOARD, "c;aGVsbG8=");
        assert_eq!(fx.context.clipboard.as_deref(), Some("hello"));

        fx.dispatch(&demux, CH_CLIPBOARD, "c;!!!not-base64!!!");
        assert_eq!(fx.context.clipboard.as_deref(), Some("hello"));
    }

    #[test]
    fn shell_marker_lifecycle_round_trip() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();

        fx.dispatch(&demux, CH_SHELL_MARKER, "A");
        assert_eq!(fx.tracker.state(), TrackerState::PromptActive);

        fx.dispatch(&demux, CH_EXTENSION, "CommandLine=ls%20-la");
        fx.dispatch(&demux, CH_SHELL_MARKER, "C");
        assert_eq!(fx.tracker.state(), TrackerState::CommandRunning);

        fx.dispatch(&demux, CH_SHELL_MARKER, "D;0");
        assert_eq!(fx.tracker.state(), TrackerState::Idle);

        let records = fx.tracker.take_finalized();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command.raw, "ls -la");
        assert_eq!(records[0].execution.exit_code, Some(0));
    }

    #[test]
    fn unparsable_exit_code_defaults_to_zero() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_SHELL_MARKER, "C");
        fx.dispatch(&demux, CH_SHELL_MARKER, "D;banana");

        let records = fx.tracker.take_finalized();
        assert_eq!(records[0].execution.exit_code, Some(0));
    }

    #[test]
    fn extension_marker_dialect_tracks_commands() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_EXTENSION, "A");
        fx.dispatch(&demux, CH_EXTENSION, "B");
        assert_eq!(fx.tracker.state(), TrackerState::CommandRunning);
        fx.dispatch(&demux, CH_EXTENSION, "D;2");

        let records = fx.tracker.take_finalized();
        assert_eq!(records[0].execution.exit_code, Some(2));
    }

    #[test]
    fn agent_keys_mark_session_and_capture_transcript() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_EXTENSION, "AgentSession=claude-code");
        assert_eq!(fx.context.agent, Some(ExecutorKind::ClaudeCode));

        fx.dispatch(&demux, CH_EXTENSION, "AgentOutput=running%20tests");
        assert_eq!(fx.context.agent_transcript.len(), 1);
        assert_eq!(fx.context.agent_transcript[0].text, "running tests");

        fx.dispatch(&demux, CH_EXTENSION, "AgentSession=end");
        assert_eq!(fx.context.agent, None);
    }

    #[test]
    fn git_branch_key_updates_context() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_EXTENSION, "GitBranch=feature/login");
        assert_eq!(fx.context.git_branch.as_deref(), Some("feature/login"));

        fx.dispatch(&demux, CH_EXTENSION, "GitBranch=");
        assert_eq!(fx.context.git_branch, None);
    }

    #[test]
    fn vendor_subcommands_update_context() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_VENDOR, "SetMark");
        fx.dispatch(&demux, CH_VENDOR, "CurrentDir=/srv/app");
        fx.dispatch(&demux, CH_VENDOR, "SetUserVar=role=ops");
        fx.dispatch(&demux, CH_VENDOR, "Badge=prod");
        fx.dispatch(&demux, CH_VENDOR, "RemoteHost=deploy@web-1");

        assert_eq!(fx.context.marks, vec![0]);
        assert_eq!(fx.context.cwd, "/srv/app");
        assert_eq!(fx.context.user_vars.get("role").map(String::as_str), Some("ops"));
        assert_eq!(fx.context.badges, vec!["prod"]);
        assert_eq!(fx.context.remote_host.as_deref(), Some("deploy@web-1"));
    }

    #[test]
    fn handler_failure_does_not_poison_later_dispatch() {
        let demux = OscDemux::with_default_channels();
        let mut fx = Fixture::new();
        fx.dispatch(&demux, CH_CWD, "garbage");
        fx.dispatch(&demux, CH_SHELL_MARKER, "C");
        fx.dispatch(&demux, CH_SHELL_MARKER, "D;0");
        assert_eq!(fx.tracker.take_finalized().len(), 1);
    }
}
