//! Commands exchanged between designer controls

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::CompositionDiagramElement;
use crate::strategy::DiagramStrategy;

/// A command routed through the [`CommandBus`](crate::bus::CommandBus)
#[derive(Clone)]
pub enum StudioCommand {
    /// Attach a strategy to a control, or detach with `None`
    BindStrategy(Option<Arc<dyn DiagramStrategy>>),

    /// Enable or disable the debugger
    DebuggerState(bool),

    /// Breakpoint on the socket selected in the editor
    AddBreakpoint,
    RemoveBreakpoint,

    StepNext,

    /// Step into the composite element selected in the editor
    StepInto,

    /// Step out of the composition the debugger is focused on
    StepOut,

    Continue,

    /// The bound strategy was reset for a new run
    Reset,

    /// The composition shown for debugging changed
    CompositionChanged(Arc<CompositionDiagramElement>),

    /// A control's persisted state changed
    ControlChanged,

    StartEmulation,
    StopEmulation,
}

impl StudioCommand {
    /// Routing key of this command
    pub fn kind(&self) -> CommandKind {
        match self {
            StudioCommand::BindStrategy(_) => CommandKind::BindStrategy,
            StudioCommand::DebuggerState(_) => CommandKind::DebuggerState,
            StudioCommand::AddBreakpoint => CommandKind::AddBreakpoint,
            StudioCommand::RemoveBreakpoint => CommandKind::RemoveBreakpoint,
            StudioCommand::StepNext => CommandKind::StepNext,
            StudioCommand::StepInto => CommandKind::StepInto,
            StudioCommand::StepOut => CommandKind::StepOut,
            StudioCommand::Continue => CommandKind::Continue,
            StudioCommand::Reset => CommandKind::Reset,
            StudioCommand::CompositionChanged(_) => CommandKind::CompositionChanged,
            StudioCommand::ControlChanged => CommandKind::ControlChanged,
            StudioCommand::StartEmulation => CommandKind::StartEmulation,
            StudioCommand::StopEmulation => CommandKind::StopEmulation,
        }
    }
}

impl fmt::Debug for StudioCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudioCommand::BindStrategy(strategy) => f
                .debug_tuple("BindStrategy")
                .field(&strategy.as_ref().map(|s| s.name().to_string()))
                .finish(),
            StudioCommand::DebuggerState(enabled) => {
                f.debug_tuple("DebuggerState").field(enabled).finish()
            }
            StudioCommand::CompositionChanged(composition) => f
                .debug_tuple("CompositionChanged")
                .field(&composition.name())
                .finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Discriminant of [`StudioCommand`], used as the registration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    BindStrategy,
    DebuggerState,
    AddBreakpoint,
    RemoveBreakpoint,
    StepNext,
    StepInto,
    StepOut,
    Continue,
    Reset,
    CompositionChanged,
    ControlChanged,
    StartEmulation,
    StopEmulation,
}

impl CommandKind {
    /// Commands that drive the debugger
    pub const DEBUGGER: [CommandKind; 8] = [
        CommandKind::DebuggerState,
        CommandKind::AddBreakpoint,
        CommandKind::RemoveBreakpoint,
        CommandKind::StepNext,
        CommandKind::StepInto,
        CommandKind::StepOut,
        CommandKind::Continue,
        CommandKind::Reset,
    ];
}
