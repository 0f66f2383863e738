//! Stepping engine for diagram execution
//!
//! The execution engine reports every socket it reaches through
//! [`DiagramDebugger::on_socket_reached`] and must not advance past a socket
//! for which the debugger answers [`SocketDecision::Suspend`] until one of
//! the resume commands (`continue_execution`, `step_*`, or disabling) has
//! run. [`DiagramDebugger::wait_until_resumed`] is provided for engines that
//! want to block on that.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::DebuggerSettings;
use crate::engine::breakpoint::BreakpointSet;
use crate::engine::cursor::{DebuggerState, ExecutionCursor, StepMode, SuspendReason};
use crate::graph::{CompositionDiagramElement, DiagramElement, DiagramSocket, GraphError, SocketId};

/// Capacity of the outbound event channel
const EVENT_CAPACITY: usize = 256;

/// Errors specific to debugger operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebuggerError {
    /// A step or continue command was issued while its guard was false
    #[error("Invalid debugger state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    NotFound(#[from] GraphError),
}

/// Answer to the execution engine for a reached socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDecision {
    /// Keep propagating
    Proceed,

    /// Halt before propagating past this socket until resumed
    Suspend,
}

/// Notifications for the UI side
#[derive(Debug, Clone)]
pub enum DebuggerEvent {
    /// Execution suspended on a socket
    Break {
        socket: SocketId,
        reason: SuspendReason,
    },

    /// The composition focused for stepping changed
    CompositionChanged(Arc<CompositionDiagramElement>),
}

/// Breakpoint and stepping controller bound to one root composition
pub struct DiagramDebugger {
    root: Arc<CompositionDiagramElement>,
    breakpoints: BreakpointSet,
    cursor: Mutex<ExecutionCursor>,
    events: broadcast::Sender<DebuggerEvent>,

    /// Bumped whenever a suspension is released
    resume: watch::Sender<u64>,
}

impl DiagramDebugger {
    /// Create a disabled debugger for a composition
    pub fn new(root: Arc<CompositionDiagramElement>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (resume, _) = watch::channel(0);

        Self {
            cursor: Mutex::new(ExecutionCursor::new(root.clone())),
            root,
            breakpoints: BreakpointSet::new(),
            events,
            resume,
        }
    }

    /// Root composition being debugged
    pub fn root(&self) -> &Arc<CompositionDiagramElement> {
        &self.root
    }

    /// Breakpoints
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// Subscribe to break and composition-changed notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DebuggerEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> DebuggerState {
        self.cursor.lock().state()
    }

    pub fn is_enabled(&self) -> bool {
        self.cursor.lock().is_enabled()
    }

    pub fn is_waiting(&self) -> bool {
        self.cursor.lock().is_waiting()
    }

    pub fn is_waiting_on_input(&self) -> bool {
        self.cursor.lock().is_waiting_on_input()
    }

    /// Socket execution is suspended on
    pub fn suspended_socket(&self) -> Option<DiagramSocket> {
        self.cursor.lock().suspended_socket().cloned()
    }

    /// Composition focused for stepping
    pub fn current_composition(&self) -> Arc<CompositionDiagramElement> {
        self.cursor.lock().current_composition().clone()
    }

    /// Element most recently entered by the execution engine
    pub fn current_element(&self) -> Option<crate::graph::ElementId> {
        self.cursor.lock().current_element()
    }

    /// Suspended on an input socket of a composite element
    pub fn can_step_into(&self) -> bool {
        let cursor = self.cursor.lock();
        self.can_step_into_locked(&cursor)
    }

    fn can_step_into_locked(&self, cursor: &ExecutionCursor) -> bool {
        if !cursor.is_waiting_on_input() {
            return false;
        }
        cursor
            .suspended_socket()
            .and_then(|socket| self.root.element_by_socket(&socket.id).ok())
            .is_some_and(|element| element.is_composite())
    }

    /// A nested composition is focused
    pub fn can_step_out(&self) -> bool {
        self.cursor.lock().depth() > 0
    }

    /// Enable or disable the debugger. Disabling releases any suspension
    /// and returns focus to the root composition.
    pub fn set_enabled(&self, enabled: bool) {
        let mut cursor = self.cursor.lock();

        if enabled {
            if cursor.enable() {
                info!(composition = %self.root.name(), "Debugger enabled");
            }
            return;
        }

        if !cursor.is_enabled() {
            return;
        }

        let was_waiting = cursor.is_waiting();
        if cursor.reset() {
            self.emit(DebuggerEvent::CompositionChanged(self.root.clone()));
        }
        self.signal_resume();

        info!(
            composition = %self.root.name(),
            released = was_waiting,
            "Debugger disabled"
        );
    }

    /// Forget the position of the previous run: release any suspension,
    /// drop an armed step and focus the root. Enablement and breakpoints
    /// are kept.
    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        let enabled = cursor.is_enabled();

        if cursor.reset() {
            self.emit(DebuggerEvent::CompositionChanged(self.root.clone()));
        }
        if enabled {
            cursor.enable();
        }
        self.signal_resume();
        debug!(composition = %self.root.name(), "Debugger reset");
    }

    /// Set a breakpoint on a socket of the bound composition. Returns false
    /// if the socket already had one.
    pub fn add_breakpoint(&self, socket: &SocketId) -> Result<bool, DebuggerError> {
        self.root.socket(socket)?;
        let added = self.breakpoints.add(socket.clone());
        if added {
            debug!(%socket, "Breakpoint added");
        }
        Ok(added)
    }

    /// Remove a breakpoint. Does not resume if execution is suspended on it.
    pub fn remove_breakpoint(&self, socket: &SocketId) -> bool {
        let removed = self.breakpoints.remove(socket);
        if removed {
            debug!(%socket, "Breakpoint removed");
        }
        removed
    }

    pub fn is_breakpoint(&self, socket: &SocketId) -> bool {
        self.breakpoints.contains(socket)
    }

    /// Decide whether the execution engine may propagate past `socket`.
    ///
    /// Decisions are serialized, so they are taken strictly in the order
    /// sockets are reported.
    pub fn on_socket_reached(&self, socket: &DiagramSocket) -> SocketDecision {
        let mut cursor = self.cursor.lock();

        if !cursor.is_enabled() {
            return SocketDecision::Proceed;
        }

        if cursor.is_waiting() {
            warn!(
                %socket.id,
                suspended = ?cursor.suspended_socket().map(|s| &s.id),
                "Socket reached while suspended; engine advanced past a suspension point"
            );
            return SocketDecision::Suspend;
        }

        let stepped = match &cursor.step {
            StepMode::None => false,
            StepMode::Next => true,
            StepMode::Into { target, element } => {
                let owner = socket.parent();
                target.contains_element(owner)
                    || (owner == *element && !socket.is_input())
                    || (owner != *element && target.element(owner).is_none())
            }
            StepMode::Out { target } => target.contains_element(socket.parent()),
        };

        let reason = if stepped {
            SuspendReason::Step
        } else if self.breakpoints.contains(&socket.id) {
            self.breakpoints.record_hit(&socket.id);
            SuspendReason::Breakpoint
        } else {
            return SocketDecision::Proceed;
        };

        cursor.suspend(socket.clone(), reason);
        if let Some(path) = self.root.path_to(socket.parent()) {
            if cursor.focus(path) {
                self.emit(DebuggerEvent::CompositionChanged(cursor.current_composition().clone()));
            }
        }
        info!(socket = %socket.id, ?reason, "Execution suspended");
        self.emit(DebuggerEvent::Break {
            socket: socket.id.clone(),
            reason,
        });

        SocketDecision::Suspend
    }

    /// Track the element the execution engine is evaluating
    pub fn on_element_entered(&self, element: &DiagramElement) {
        let mut cursor = self.cursor.lock();
        if cursor.is_enabled() {
            cursor.enter_element(element.id());
        }
    }

    /// Resume free-running execution. Returns false if not suspended.
    pub fn continue_execution(&self) -> bool {
        let mut cursor = self.cursor.lock();
        if !cursor.is_waiting() {
            return false;
        }

        cursor.release(StepMode::None);
        self.signal_resume();
        debug!("Continue");
        true
    }

    /// Advance to the next reached socket, ignoring breakpoints for that
    /// single step. Returns false if not suspended.
    pub fn step_next(&self) -> bool {
        let mut cursor = self.cursor.lock();
        if !cursor.is_waiting() {
            return false;
        }

        cursor.release(StepMode::Next);
        self.signal_resume();
        debug!("Step next");
        true
    }

    /// Focus the nested composition of `element`.
    ///
    /// When suspended on an input of that element, execution resumes and
    /// suspends again on the first socket reached inside it. Otherwise this
    /// only navigates. Returns false if `element` is not a composite child of
    /// the focused composition.
    pub fn step_into(&self, element: &DiagramElement) -> bool {
        let Some(nested) = element.composition() else {
            return false;
        };

        let mut cursor = self.cursor.lock();
        if !cursor.current_composition().contains_element(element.id()) {
            return false;
        }

        let suspended_here = self.can_step_into_locked(&cursor)
            && cursor
                .suspended_socket()
                .is_some_and(|socket| socket.parent() == element.id());

        cursor.push_composition(nested.clone());
        self.emit(DebuggerEvent::CompositionChanged(nested.clone()));

        if suspended_here {
            cursor.release(StepMode::Into {
                target: nested.clone(),
                element: element.id(),
            });
            self.signal_resume();
            debug!(element = %element.id(), "Step into");
        } else {
            debug!(element = %element.id(), "Navigated into composition");
        }
        true
    }

    /// Leave `composition`, which must be the focused one, for its parent.
    ///
    /// When suspended, execution resumes and suspends again on the next
    /// socket reached in the parent. Returns false at the root.
    pub fn step_out(&self, composition: &Arc<CompositionDiagramElement>) -> bool {
        let mut cursor = self.cursor.lock();
        if cursor.depth() == 0 || !Arc::ptr_eq(cursor.current_composition(), composition) {
            return false;
        }

        cursor.pop_composition();
        let parent = cursor.current_composition().clone();
        self.emit(DebuggerEvent::CompositionChanged(parent.clone()));

        if cursor.is_waiting() {
            cursor.release(StepMode::Out { target: parent });
            self.signal_resume();
            debug!("Step out");
        } else {
            debug!("Navigated out of composition");
        }
        true
    }

    /// Wait until the debugger is not suspended
    pub async fn wait_until_resumed(&self) {
        let mut resumed = self.resume.subscribe();
        loop {
            if !self.is_waiting() {
                return;
            }
            if resumed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Snapshot of breakpoints and enablement
    pub fn save(&self) -> DebuggerSettings {
        DebuggerSettings {
            is_enabled: self.is_enabled(),
            breakpoints: self.breakpoints.sockets(),
        }
    }

    /// Restore a snapshot. Breakpoints whose socket no longer resolves in
    /// the bound composition are dropped.
    pub fn load(&self, settings: &DebuggerSettings) {
        self.breakpoints.clear();

        for socket in &settings.breakpoints {
            match self.root.socket(socket) {
                Ok(_) => {
                    self.breakpoints.add(socket.clone());
                }
                Err(err) => debug!(%err, "Dropping unresolved breakpoint"),
            }
        }

        self.set_enabled(settings.is_enabled);
    }

    fn emit(&self, event: DebuggerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn signal_resume(&self) {
        self.resume.send_modify(|generation| *generation += 1);
    }
}

impl std::fmt::Debug for DiagramDebugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramDebugger")
            .field("composition", &self.root.name())
            .field("state", &self.state())
            .field("breakpoints", &self.breakpoints.len())
            .finish()
    }
}
