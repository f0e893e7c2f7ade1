//! Error types for lens-core operations.

/// All errors that can occur in lens-core operations.
///
/// Parse failures on individual control-channel payloads never surface
/// through this type; they are logged and swallowed at the dispatch
/// boundary so one bad payload cannot poison other channels.
#[derive(Debug, thiserror::Error)]
pub enum LensError {
    #[error("terminal not registered: {0}")]
    TerminalNotFound(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed payload on channel {channel}: {details}")]
    Payload { channel: u16, details: String },
}

impl LensError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LensError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        LensError::Json {
            context: context.into(),
            source,
        }
    }

    pub fn payload(channel: u16, details: impl Into<String>) -> Self {
        LensError::Payload {
            channel,
            details: details.into(),
        }
    }
}

/// Convenience type alias for Results using LensError.
pub type Result<T> = std::result::Result<T, LensError>;
