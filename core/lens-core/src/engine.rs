//! Composition root: the terminal registry and the wiring between the
//! demultiplexer, per-terminal trackers, and the hub.
//!
//! There is no hidden process-wide state: every cache hangs off the
//! engine. Each registered terminal owns one session (context + tracker)
//! behind its own lock, so events for one terminal apply strictly in
//! arrival order while different terminals proceed in parallel. The hub is
//! the only resource shared across terminals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::context::{ContextStore, SessionContext};
use crate::demux::{DispatchTarget, OscDemux};
use crate::error::{LensError, Result};
use crate::hub::{CommandHub, QueryFilter};
use crate::lifecycle::CommandTracker;
use crate::notify::{Notifier, NotifyConfig};
use crate::recovery::SliceScreen;
use crate::stats::Statistics;
use crate::types::{
    CommandExecution, ExecutionContext, OutputStream, SessionInfo, TerminalContext, WindowContext,
};

/// Identity of a terminal at registration time.
#[derive(Debug, Clone, Default)]
pub struct TerminalDescriptor {
    pub terminal_id: String,
    pub label: String,
    pub window_id: String,
    pub window_index: u32,
    pub window_title: String,
    pub session_id: String,
    pub shell: String,
}

impl TerminalDescriptor {
    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            window: WindowContext {
                id: self.window_id.clone(),
                index: self.window_index,
                title: self.window_title.clone(),
            },
            terminal: TerminalContext {
                id: self.terminal_id.clone(),
                label: self.label.clone(),
            },
            session: SessionInfo {
                id: self.session_id.clone(),
                shell: self.shell.clone(),
            },
        }
    }
}

struct TerminalSession {
    context: Arc<Mutex<SessionContext>>,
    tracker: CommandTracker,
    last_cursor_row: u32,
}

pub struct LensEngine {
    contexts: ContextStore,
    terminals: Mutex<HashMap<String, Arc<Mutex<TerminalSession>>>>,
    demux: OscDemux,
    hub: Arc<CommandHub>,
}

impl LensEngine {
    pub fn new(
        data_dir: &std::path::Path,
        notify_config: NotifyConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            contexts: ContextStore::new(),
            terminals: Mutex::new(HashMap::new()),
            demux: OscDemux::with_default_channels(),
            hub: Arc::new(CommandHub::open(data_dir, notify_config, notifier)),
        }
    }

    pub fn hub(&self) -> Arc<CommandHub> {
        Arc::clone(&self.hub)
    }

    /// Registers (or re-registers) a terminal. Re-registration starts a
    /// fresh tracker; the previous session's unfinalized state is gone.
    pub fn register_terminal(&self, descriptor: TerminalDescriptor) {
        let terminal_id = descriptor.terminal_id.clone();
        let context = self.contexts.get(&terminal_id);
        {
            let mut ctx = context.lock().expect("session context lock");
            ctx.shell = descriptor.shell.clone();
            ctx.window_title = descriptor.window_title.clone();
        }

        let session = TerminalSession {
            context,
            tracker: CommandTracker::new(descriptor.execution_context()),
            last_cursor_row: 0,
        };

        let mut terminals = self.terminals.lock().expect("terminal registry lock");
        if terminals
            .insert(terminal_id.clone(), Arc::new(Mutex::new(session)))
            .is_some()
        {
            warn!(terminal_id = %terminal_id, "Terminal re-registered; tracker reset");
        } else {
            debug!(terminal_id = %terminal_id, "Terminal registered");
        }
    }

    /// Tears a terminal down, discarding its context explicitly. Records
    /// already finalized are unaffected.
    pub fn close_terminal(&self, terminal_id: &str) -> bool {
        let removed = self
            .terminals
            .lock()
            .expect("terminal registry lock")
            .remove(terminal_id)
            .is_some();
        if removed {
            self.contexts.remove(terminal_id);
            debug!(terminal_id = %terminal_id, "Terminal closed");
        }
        removed
    }

    /// Routes one control-channel payload to the terminal's session.
    /// Returns whether a handler was registered for the channel. Finalized
    /// records are handed to the hub before this returns.
    pub fn handle_event(
        &self,
        terminal_id: &str,
        channel: u16,
        payload: &str,
        cursor_row: Option<u32>,
        screen: Option<&[String]>,
    ) -> Result<bool> {
        let session = self.session(terminal_id)?;
        let mut session = session.lock().expect("terminal session lock");

        if let Some(row) = cursor_row {
            session.last_cursor_row = row;
        }
        let row = session.last_cursor_row;

        let context = Arc::clone(&session.context);
        let mut context = context.lock().expect("session context lock");

        let screen_view = screen.map(SliceScreen::new);
        let handled = {
            let mut target = DispatchTarget {
                context: &mut context,
                tracker: &mut session.tracker,
                screen: screen_view
                    .as_ref()
                    .map(|view| view as &dyn crate::recovery::ScreenBuffer),
                cursor_row: row,
            };
            self.demux.dispatch(channel, payload, &mut target)
        };
        drop(context);

        for record in session.tracker.take_finalized() {
            if let Err(errors) = self.hub.register_execution(record) {
                warn!(terminal_id = %terminal_id, ?errors, "Finalized record failed validation");
            }
        }

        Ok(handled)
    }

    /// Feeds observed command output into the in-flight record, if any.
    pub fn record_output(&self, terminal_id: &str, stream: OutputStream, data: &str) -> Result<()> {
        let session = self.session(terminal_id)?;
        let mut session = session.lock().expect("terminal session lock");
        session.tracker.append_output(stream, data);
        Ok(())
    }

    pub fn query(&self, filter: &QueryFilter) -> Vec<CommandExecution> {
        self.hub.query(filter)
    }

    pub fn statistics(&self) -> Statistics {
        self.hub.statistics()
    }

    pub fn clear(&self) {
        self.hub.clear();
    }

    pub fn persist(&self) -> Result<()> {
        self.hub.persist_now()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.lock().expect("terminal registry lock").len()
    }

    fn session(&self, terminal_id: &str) -> Result<Arc<Mutex<TerminalSession>>> {
        self.terminals
            .lock()
            .expect("terminal registry lock")
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| LensError::TerminalNotFound(terminal_id.to_string()))
    }
}
