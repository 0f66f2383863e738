//! Control-level debugger binding
//!
//! A [`DebuggerSession`] is what a run control owns: it creates a
//! [`DiagramDebugger`] for the bound strategy, tracks the editor selection,
//! answers debugger commands sent to its scope and persists the debugger
//! snapshot.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{CommandBus, CommandKind, ScopeToken, StudioCommand};
use crate::config::{DebuggerSettings, SettingsStore, DEBUGGER_SETTINGS_KEY};
use crate::control::ControlKind;
use crate::engine::{DebuggerEvent, DiagramDebugger};
use crate::graph::{CompositionDiagramElement, DiagramElement, ElementId, SocketId};
use crate::strategy::DiagramStrategy;
use crate::Result;

/// What the editor has selected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub element: Option<ElementId>,
    pub socket: Option<SocketId>,
}

/// Debugger binding of one designer control
pub struct DebuggerSession {
    control: ControlKind,
    scope: ScopeToken,
    bus: Arc<CommandBus>,
    store: Option<Arc<SettingsStore>>,

    strategy: RwLock<Option<Arc<dyn DiagramStrategy>>>,
    debugger: RwLock<Option<Arc<DiagramDebugger>>>,
    selection: Mutex<Selection>,

    /// Composition shown in the editor; follows the debugger's focus
    displayed: RwLock<Arc<CompositionDiagramElement>>,

    /// Last snapshot saved or loaded, applied to every new debugger
    saved: Mutex<Option<DebuggerSettings>>,

    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DebuggerSession {
    /// Create a session and register its command handlers in a fresh scope
    pub fn new(control: ControlKind, bus: Arc<CommandBus>, store: Option<Arc<SettingsStore>>) -> Arc<Self> {
        Self::with_scope(control, ScopeToken::new(), bus, store)
    }

    /// Create a session in a given scope, e.g. one shared with an orchestrator
    pub fn with_scope(
        control: ControlKind,
        scope: ScopeToken,
        bus: Arc<CommandBus>,
        store: Option<Arc<SettingsStore>>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            control,
            scope,
            bus,
            store,
            strategy: RwLock::new(None),
            debugger: RwLock::new(None),
            selection: Mutex::new(Selection::default()),
            displayed: RwLock::new(Self::placeholder()),
            saved: Mutex::new(None),
            listener: Mutex::new(None),
        });
        session.register_handlers();
        session
    }

    fn placeholder() -> Arc<CompositionDiagramElement> {
        let composition = CompositionDiagramElement::new("");
        composition.set_modifiable(false);
        Arc::new(composition)
    }

    pub fn control(&self) -> ControlKind {
        self.control
    }

    /// Scope the session's handlers are registered under
    pub fn scope(&self) -> ScopeToken {
        self.scope
    }

    pub fn strategy(&self) -> Option<Arc<dyn DiagramStrategy>> {
        self.strategy.read().clone()
    }

    /// Debugger of the bound strategy
    pub fn debugger(&self) -> Option<Arc<DiagramDebugger>> {
        self.debugger.read().clone()
    }

    pub fn selection(&self) -> Selection {
        self.selection.lock().clone()
    }

    /// Composition currently shown
    pub fn displayed_composition(&self) -> Arc<CompositionDiagramElement> {
        self.displayed.read().clone()
    }

    /// Select an element, clearing any socket selection
    pub fn select_element(&self, element: Option<ElementId>) {
        *self.selection.lock() = Selection { element, socket: None };
    }

    /// Select a socket and its element
    pub fn select_socket(&self, socket: Option<SocketId>) {
        let mut selection = self.selection.lock();
        if let Some(socket) = &socket {
            selection.element = Some(socket.element);
        }
        selection.socket = socket;
    }

    /// Attach a strategy, or detach with `None`.
    ///
    /// A new debugger is created over the strategy's composition and the
    /// last saved snapshot is applied to it. The displayed composition is
    /// read-only either way.
    pub fn bind_strategy(self: &Arc<Self>, strategy: Option<Arc<dyn DiagramStrategy>>) {
        self.stop_listener();
        self.release_debugger();
        *self.selection.lock() = Selection::default();

        let displayed = match &strategy {
            Some(strategy) => {
                let composition = strategy.composition();
                let debugger = Arc::new(DiagramDebugger::new(composition.clone()));

                if let Some(settings) = self.saved.lock().clone() {
                    debugger.load(&settings);
                }
                self.spawn_listener(debugger.subscribe());

                *self.debugger.write() = Some(debugger);
                info!(strategy = strategy.name(), control = %self.control, "Strategy bound");
                composition
            }
            None => {
                *self.debugger.write() = None;
                debug!(control = %self.control, "Strategy unbound");
                Self::placeholder()
            }
        };

        displayed.set_modifiable(false);
        *self.displayed.write() = displayed;
        *self.strategy.write() = strategy;
    }

    fn spawn_listener(self: &Arc<Self>, mut events: broadcast::Receiver<DebuggerEvent>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime; debugger events are not tracked");
            return;
        };

        let session = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Debugger events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(session) = session.upgrade() else { break };
                session.apply_event(event);
            }
        });

        *self.listener.lock() = Some(task);
    }

    /// Detach the current debugger, releasing a run parked on it
    fn release_debugger(&self) {
        let previous = self.debugger.write().take();
        if let Some(debugger) = previous {
            debugger.set_enabled(false);
        }
    }

    fn stop_listener(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }

    /// Move the selection to a suspended element, or the view to a newly
    /// focused composition
    pub fn apply_event(&self, event: DebuggerEvent) {
        match event {
            DebuggerEvent::Break { socket, .. } => self.select_element(Some(socket.element)),
            DebuggerEvent::CompositionChanged(composition) => {
                composition.set_modifiable(false);
                *self.displayed.write() = composition;
            }
        }
    }

    /// Snapshot the debugger and write it to the settings store
    pub fn save(&self) -> Result<Option<DebuggerSettings>> {
        let Some(debugger) = self.debugger() else {
            return Ok(None);
        };

        let settings = debugger.save();
        *self.saved.lock() = Some(settings.clone());
        if let Some(store) = &self.store {
            store.set(DEBUGGER_SETTINGS_KEY, &settings)?;
        }
        Ok(Some(settings))
    }

    /// Read the snapshot from the settings store and apply it
    pub fn load(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if let Some(settings) = store.get::<DebuggerSettings>(DEBUGGER_SETTINGS_KEY)? {
            self.load_settings(settings);
        }
        Ok(())
    }

    /// Apply a snapshot now and to every debugger created later
    pub fn load_settings(&self, settings: DebuggerSettings) {
        if let Some(debugger) = self.debugger() {
            debugger.load(&settings);
        }
        *self.saved.lock() = Some(settings);
    }

    /// Unregister every handler, stop tracking debugger events and release
    /// any suspended run
    pub fn dispose(&self) {
        let removed = self.bus.unregister_scope(self.scope);
        self.stop_listener();
        self.release_debugger();
        debug!(scope = %self.scope, removed, "Session disposed");
    }

    fn changed(&self) -> Result<()> {
        self.save()?;
        self.bus.broadcast(&StudioCommand::ControlChanged)?;
        Ok(())
    }

    fn selected_socket(&self) -> Option<SocketId> {
        self.selection.lock().socket.clone()
    }

    fn selected_element(&self) -> Option<Arc<DiagramElement>> {
        let id = self.selection.lock().element?;
        self.debugger()?.root().element(id).cloned()
    }

    fn check_selected_socket(&self, check: impl Fn(&DiagramDebugger, &SocketId) -> bool) -> bool {
        match (self.debugger(), self.selected_socket()) {
            (Some(debugger), Some(socket)) => check(&debugger, &socket),
            _ => false,
        }
    }

    fn check_debugger(&self, check: impl Fn(&DiagramDebugger) -> bool) -> bool {
        self.debugger().is_some_and(|debugger| check(&debugger))
    }

    fn can_step_into(&self) -> bool {
        self.check_debugger(|d| d.is_waiting_on_input() && d.can_step_into())
            || self.selected_element().is_some_and(|e| e.is_composite())
    }

    fn step_into(&self) -> Result<()> {
        let Some(debugger) = self.debugger() else {
            return Ok(());
        };

        let target = self
            .selected_element()
            .filter(|e| e.is_composite())
            .or_else(|| {
                let socket = debugger.suspended_socket()?;
                debugger.root().element_by_socket(&socket.id).ok().cloned()
            });

        if let Some(element) = target {
            if !debugger.step_into(&element) {
                debug!(element = %element.id(), "Step into ignored");
            }
        }
        Ok(())
    }

    fn register_handlers(self: &Arc<Self>) {
        let kinds = [
            CommandKind::BindStrategy,
            CommandKind::DebuggerState,
            CommandKind::AddBreakpoint,
            CommandKind::RemoveBreakpoint,
            CommandKind::StepNext,
            CommandKind::StepInto,
            CommandKind::StepOut,
            CommandKind::Continue,
            CommandKind::Reset,
            CommandKind::CompositionChanged,
        ];

        for kind in kinds.into_iter().filter(|k| self.control.supports(*k)) {
            let handler = Arc::downgrade(self);
            let guard = Arc::downgrade(self);

            self.bus.register_guarded(
                kind,
                self.scope,
                move |command| match handler.upgrade() {
                    Some(session) => session.handle(command),
                    None => Ok(()),
                },
                move |command| guard.upgrade().is_some_and(|s| s.can_handle(command)),
            );
        }
    }

    fn can_handle(&self, command: &StudioCommand) -> bool {
        match command {
            StudioCommand::BindStrategy(_)
            | StudioCommand::DebuggerState(_)
            | StudioCommand::Reset
            | StudioCommand::CompositionChanged(_) => true,
            StudioCommand::AddBreakpoint => self.check_selected_socket(|d, s| !d.is_breakpoint(s)),
            StudioCommand::RemoveBreakpoint => self.check_selected_socket(|d, s| d.is_breakpoint(s)),
            StudioCommand::StepNext | StudioCommand::Continue => self.check_debugger(|d| d.is_waiting()),
            StudioCommand::StepInto => self.can_step_into(),
            StudioCommand::StepOut => self.check_debugger(|d| d.can_step_out()),
            StudioCommand::ControlChanged
            | StudioCommand::StartEmulation
            | StudioCommand::StopEmulation => false,
        }
    }

    fn handle(self: &Arc<Self>, command: &StudioCommand) -> Result<()> {
        match command {
            StudioCommand::BindStrategy(strategy) => self.bind_strategy(strategy.clone()),
            StudioCommand::DebuggerState(enabled) => {
                if let Some(debugger) = self.debugger() {
                    debugger.set_enabled(*enabled);
                }
            }
            StudioCommand::AddBreakpoint | StudioCommand::RemoveBreakpoint => {
                let (Some(debugger), Some(socket)) = (self.debugger(), self.selected_socket()) else {
                    return Ok(());
                };
                if matches!(command, StudioCommand::AddBreakpoint) {
                    debugger.add_breakpoint(&socket)?;
                } else {
                    debugger.remove_breakpoint(&socket);
                }
                self.changed()?;
            }
            StudioCommand::StepNext => {
                if let Some(debugger) = self.debugger() {
                    debugger.step_next();
                }
            }
            StudioCommand::StepInto => self.step_into()?,
            StudioCommand::StepOut => {
                if let Some(debugger) = self.debugger() {
                    debugger.step_out(&debugger.current_composition());
                }
            }
            StudioCommand::Continue => {
                if let Some(debugger) = self.debugger() {
                    debugger.continue_execution();
                }
            }
            StudioCommand::Reset => {
                self.select_element(None);
                if let Some(debugger) = self.debugger() {
                    debugger.reset();
                }
            }
            StudioCommand::CompositionChanged(composition) => {
                *self.displayed.write() = composition.clone();
            }
            StudioCommand::ControlChanged
            | StudioCommand::StartEmulation
            | StudioCommand::StopEmulation => {}
        }
        Ok(())
    }
}

impl Drop for DebuggerSession {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

impl std::fmt::Debug for DebuggerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerSession")
            .field("control", &self.control)
            .field("scope", &self.scope)
            .field("strategy", &self.strategy.read().as_ref().map(|s| s.name().to_string()))
            .field("selection", &*self.selection.lock())
            .finish()
    }
}
