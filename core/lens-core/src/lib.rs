//! # termlens-core
//!
//! Core library for termlens: reconstructs a structured, classified record
//! of every command run in an observed terminal session from the session's
//! out-of-band control channel, and maintains durable aggregate statistics
//! over those records.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime dependency. The daemon provides
//!   threads; the library provides locks only where single-writer
//!   discipline is required (the hub, each terminal's session).
//! - **Passive observer**: never spawns processes, never renders, never
//!   blocks or cancels the commands it watches.
//! - **Graceful degradation**: malformed payloads are logged and dropped,
//!   unrecoverable command text degrades to an empty string, and a missing
//!   or corrupt snapshot starts the service empty rather than failing it.
//! - **Data over control flow**: classification rules live in regex tables
//!   and channel routing in a fixed handler table, both testable without
//!   the state machine.

// Public modules
pub mod classify;
pub mod context;
pub mod demux;
pub mod engine;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod notify;
pub mod patterns;
pub mod persist;
pub mod recovery;
pub mod stats;
pub mod types;

// Re-export commonly used items at crate root
pub use classify::{classify, Classification};
pub use context::{ContextStore, SessionContext};
pub use demux::{DispatchTarget, HandlerKind, OscDemux};
pub use engine::{LensEngine, TerminalDescriptor};
pub use error::{LensError, Result};
pub use hub::{CommandHub, PersistHandle, QueryFilter, SortKey};
pub use lifecycle::{CommandTracker, TrackerState};
pub use notify::{LogNotifier, Notifier, NotifyConfig};
pub use recovery::{recover, ScreenBuffer, SliceScreen};
pub use stats::{StatsBucket, Statistics};
pub use types::*;
