//! Per-terminal session context.
//!
//! The context is a pure data holder fed by control-channel events:
//! working directory, titles, user variables, collected marks and badges,
//! and whether an AI coding agent is currently active in the terminal.
//! Contexts are created when a terminal registers and removed only by an
//! explicit teardown, never collected implicitly, since in-flight records may
//! still reference them.

use crate::types::ExecutorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoDirection {
    Input,
    Output,
}

/// One captured line of AI-agent input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIo {
    pub direction: IoDirection,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionNotification {
    pub title: String,
    pub body: String,
}

/// Ephemeral, mutable state for one terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub cwd: String,
    pub shell: String,
    pub window_title: String,
    pub user_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Set while an AI coding agent's session is detected as active.
    #[serde(default)]
    pub agent: Option<ExecutorKind>,
    pub agent_transcript: Vec<AgentIo>,
    pub marks: Vec<u32>,
    pub badges: Vec<String>,
    pub hyperlinks: Vec<String>,
    pub notifications: Vec<SessionNotification>,
    #[serde(default)]
    pub clipboard: Option<String>,
    #[serde(default)]
    pub remote_host: Option<String>,
    /// Command text received out-of-band before the matching command-start
    /// marker; consumed by the tracker when the command begins.
    #[serde(default)]
    pub pending_command_text: Option<String>,
}

impl SessionContext {
    pub fn agent_active(&self) -> bool {
        self.agent.is_some()
    }
}

/// Registry of session contexts keyed by terminal id.
///
/// `get` default-initializes missing entries; `remove` is the only way an
/// entry disappears. The returned handles are shared, so a context stays
/// alive for any holder even after removal from the registry.
#[derive(Default)]
pub struct ContextStore {
    inner: Mutex<HashMap<String, Arc<Mutex<SessionContext>>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, terminal_id: &str) -> Arc<Mutex<SessionContext>> {
        let mut map = self.inner.lock().expect("context store lock");
        map.entry(terminal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionContext::default())))
            .clone()
    }

    pub fn update<F>(&self, terminal_id: &str, mutate: F)
    where
        F: FnOnce(&mut SessionContext),
    {
        let handle = self.get(terminal_id);
        let mut context = handle.lock().expect("session context lock");
        mutate(&mut context);
    }

    pub fn remove(&self, terminal_id: &str) {
        let mut map = self.inner.lock().expect("context store lock");
        map.remove(terminal_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("context store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_creates_default_context() {
        let store = ContextStore::new();
        let handle = store.get("term-1");
        assert_eq!(handle.lock().unwrap().cwd, "");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_mutates_in_place() {
        let store = ContextStore::new();
        store.update("term-1", |ctx| ctx.cwd = "/repo".to_string());
        assert_eq!(store.get("term-1").lock().unwrap().cwd, "/repo");
    }

    #[test]
    fn remove_is_explicit_and_handles_survive() {
        let store = ContextStore::new();
        let handle = store.get("term-1");
        store.update("term-1", |ctx| ctx.window_title = "build".to_string());
        store.remove("term-1");
        assert!(store.is_empty());
        // A holder of the old handle still sees the context.
        assert_eq!(handle.lock().unwrap().window_title, "build");
        // Re-registering starts from a fresh default.
        assert_eq!(store.get("term-1").lock().unwrap().window_title, "");
    }

    #[test]
    fn agent_flag_tracks_activity() {
        let mut ctx = SessionContext::default();
        assert!(!ctx.agent_active());
        ctx.agent = Some(ExecutorKind::ClaudeCode);
        assert!(ctx.agent_active());
    }
}
