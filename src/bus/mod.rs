//! Typed command bus
//!
//! Controls register a handler per [`CommandKind`] under their
//! [`ScopeToken`]. A command is either sent to one scope with
//! [`CommandBus::process`] or to every scope with [`CommandBus::broadcast`].
//! A registration may carry a can-execute predicate; a command sent to a
//! handler whose predicate is false is rejected with an invalid-state error.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::engine::DebuggerError;
use crate::Result;

pub mod command;

pub use command::{CommandKind, StudioCommand};

/// Identifies the control that owns a set of registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeToken(Uuid);

impl ScopeToken {
    /// Create a fresh scope
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScopeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Command handler
pub type Handler = Arc<dyn Fn(&StudioCommand) -> Result<()> + Send + Sync>;

/// Can-execute predicate
pub type Predicate = Arc<dyn Fn(&StudioCommand) -> bool + Send + Sync>;

#[derive(Clone)]
struct Registration {
    handler: Handler,
    can_execute: Option<Predicate>,
}

impl Registration {
    fn can_execute(&self, command: &StudioCommand) -> bool {
        self.can_execute.as_ref().map_or(true, |predicate| predicate(command))
    }
}

/// Registry of command handlers keyed by command kind and scope
#[derive(Default)]
pub struct CommandBus {
    registrations: DashMap<(CommandKind, ScopeToken), Registration>,
}

impl CommandBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unconditional handler, replacing any previous one
    pub fn register<F>(&self, kind: CommandKind, scope: ScopeToken, handler: F)
    where
        F: Fn(&StudioCommand) -> Result<()> + Send + Sync + 'static,
    {
        self.insert(kind, scope, Arc::new(handler), None);
    }

    /// Register a handler that only runs while `can_execute` holds
    pub fn register_guarded<F, P>(&self, kind: CommandKind, scope: ScopeToken, handler: F, can_execute: P)
    where
        F: Fn(&StudioCommand) -> Result<()> + Send + Sync + 'static,
        P: Fn(&StudioCommand) -> bool + Send + Sync + 'static,
    {
        self.insert(kind, scope, Arc::new(handler), Some(Arc::new(can_execute)));
    }

    fn insert(&self, kind: CommandKind, scope: ScopeToken, handler: Handler, can_execute: Option<Predicate>) {
        trace!(?kind, %scope, "Handler registered");
        self.registrations
            .insert((kind, scope), Registration { handler, can_execute });
    }

    /// Remove one registration. Returns false if there was none.
    pub fn unregister(&self, kind: CommandKind, scope: ScopeToken) -> bool {
        self.registrations.remove(&(kind, scope)).is_some()
    }

    /// Remove every registration of a scope. Returns how many were removed.
    pub fn unregister_scope(&self, scope: ScopeToken) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|(_, owner), _| *owner != scope);
        let removed = before.saturating_sub(self.registrations.len());
        debug!(%scope, removed, "Scope unregistered");
        removed
    }

    /// True if a handler exists for the command kind in `scope`
    pub fn is_registered(&self, kind: CommandKind, scope: ScopeToken) -> bool {
        self.registrations.contains_key(&(kind, scope))
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    // clone out so handlers may use the bus without holding a shard lock
    fn registration(&self, kind: CommandKind, scope: ScopeToken) -> Option<Registration> {
        self.registrations
            .get(&(kind, scope))
            .map(|entry| entry.value().clone())
    }

    /// True if `scope` has a handler for the command and its predicate holds
    pub fn can_process(&self, scope: ScopeToken, command: &StudioCommand) -> bool {
        self.registration(command.kind(), scope)
            .is_some_and(|registration| registration.can_execute(command))
    }

    /// Send a command to one scope.
    ///
    /// Returns `Ok(false)` when the scope has no handler for it and an
    /// invalid-state error when the handler's predicate is false.
    pub fn process(&self, scope: ScopeToken, command: &StudioCommand) -> Result<bool> {
        let Some(registration) = self.registration(command.kind(), scope) else {
            trace!(?command, %scope, "No handler");
            return Ok(false);
        };

        if !registration.can_execute(command) {
            return Err(DebuggerError::InvalidState(format!("{command:?} cannot execute now")).into());
        }

        debug!(?command, %scope, "Processing command");
        (registration.handler)(command)?;
        Ok(true)
    }

    /// Send a command to every scope whose predicate holds. Returns how many
    /// handlers ran.
    pub fn broadcast(&self, command: &StudioCommand) -> Result<usize> {
        let kind = command.kind();
        let targets: Vec<Registration> = self
            .registrations
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().clone())
            .collect();

        let mut handled = 0;
        for registration in targets {
            if registration.can_execute(command) {
                (registration.handler)(command)?;
                handled += 1;
            }
        }

        debug!(?command, handled, "Broadcast command");
        Ok(handled)
    }
}

impl fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBus")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DesignerError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_missing_handler_is_not_an_error() {
        let bus = CommandBus::new();
        assert!(!bus.process(ScopeToken::new(), &StudioCommand::StepNext).unwrap());
        assert!(!bus.can_process(ScopeToken::new(), &StudioCommand::StepNext));
    }

    #[test]
    fn test_process_runs_handler_of_scope_only() {
        let bus = CommandBus::new();
        let (mine, other) = (ScopeToken::new(), ScopeToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        bus.register(CommandKind::Continue, mine, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.process(mine, &StudioCommand::Continue).unwrap());
        assert!(!bus.process(other, &StudioCommand::Continue).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_false_predicate_is_invalid_state() {
        let bus = CommandBus::new();
        let scope = ScopeToken::new();
        let allowed = Arc::new(AtomicBool::new(false));

        let guard = allowed.clone();
        bus.register_guarded(
            CommandKind::StepNext,
            scope,
            |_| Ok(()),
            move |_| guard.load(Ordering::SeqCst),
        );

        assert!(!bus.can_process(scope, &StudioCommand::StepNext));
        assert!(matches!(
            bus.process(scope, &StudioCommand::StepNext),
            Err(DesignerError::Debugger(DebuggerError::InvalidState(_)))
        ));

        allowed.store(true, Ordering::SeqCst);
        assert!(bus.process(scope, &StudioCommand::StepNext).unwrap());
    }

    #[test]
    fn test_broadcast_skips_guarded_out_handlers() {
        let bus = CommandBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for enabled in [true, true, false] {
            let counter = calls.clone();
            bus.register_guarded(
                CommandKind::ControlChanged,
                ScopeToken::new(),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                move |_| enabled,
            );
        }

        assert_eq!(bus.broadcast(&StudioCommand::ControlChanged).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_scope() {
        let bus = CommandBus::new();
        let (scope, other) = (ScopeToken::new(), ScopeToken::new());
        bus.register(CommandKind::StepNext, scope, |_| Ok(()));
        bus.register(CommandKind::Continue, scope, |_| Ok(()));
        bus.register(CommandKind::Continue, other, |_| Ok(()));

        assert_eq!(bus.unregister_scope(scope), 2);
        assert!(!bus.is_registered(CommandKind::StepNext, scope));
        assert!(bus.is_registered(CommandKind::Continue, other));
        assert!(!bus.unregister(CommandKind::Continue, scope));
    }
}
