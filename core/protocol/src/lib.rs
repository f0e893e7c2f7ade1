//! IPC protocol types and validation for termlens-daemon.
//!
//! This crate is shared by the daemon and its clients (the terminal
//! renderer that forwards control-channel payloads) to prevent schema
//! drift. The daemon remains the authority on validation, but clients can
//! reuse the same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Longest accepted terminal/window identifier.
const MAX_ID_LEN: usize = 128;
/// Longest accepted control-channel payload. Anything larger is not a
/// plausible OSC payload and is rejected before it reaches the engine.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    RegisterTerminal,
    CloseTerminal,
    Event,
    Output,
    GetExecutions,
    GetStatistics,
    Clear,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// A demultiplexed control-channel payload, delivered in stream order by
/// the terminal renderer. `screen` is the renderer's read-only view of the
/// visible buffer rows, used only for command-text recovery; `cursor_row`
/// indexes into it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelEvent {
    pub terminal_id: String,
    pub channel: u16,
    pub payload: String,
    #[serde(default)]
    pub cursor_row: Option<u32>,
    #[serde(default)]
    pub screen: Option<Vec<String>>,
}

impl ChannelEvent {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.terminal_id, "terminal_id")?;
        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ErrorInfo::new(
                "payload_too_large",
                format!("payload must be {} bytes or fewer", MAX_PAYLOAD_BYTES),
            ));
        }
        Ok(())
    }
}

/// Descriptor sent when the renderer opens a terminal.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalSpec {
    pub terminal_id: String,
    #[serde(default)]
    pub label: String,
    pub window_id: String,
    #[serde(default)]
    pub window_index: u32,
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub shell: String,
}

impl TerminalSpec {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.terminal_id, "terminal_id")?;
        require_id(&self.window_id, "window_id")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A chunk of observed command output, attributed to one stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputChunk {
    pub terminal_id: String,
    pub stream: StreamKind,
    pub data: String,
}

impl OutputChunk {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.terminal_id, "terminal_id")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CloseTerminalParams {
    pub terminal_id: String,
}

pub fn parse_event(params: Value) -> Result<ChannelEvent, ErrorInfo> {
    let event: ChannelEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

pub fn parse_terminal(params: Value) -> Result<TerminalSpec, ErrorInfo> {
    let spec: TerminalSpec = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("terminal spec is invalid JSON: {}", err),
        )
    })?;
    spec.validate()?;
    Ok(spec)
}

pub fn parse_output(params: Value) -> Result<OutputChunk, ErrorInfo> {
    let chunk: OutputChunk = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("output chunk is invalid JSON: {}", err),
        )
    })?;
    chunk.validate()?;
    Ok(chunk)
}

pub fn parse_close(params: Value) -> Result<CloseTerminalParams, ErrorInfo> {
    let close: CloseTerminalParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("close params are invalid JSON: {}", err),
        )
    })?;
    require_id(&close.terminal_id, "terminal_id")?;
    Ok(close)
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_id",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}
