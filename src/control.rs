//! Kinds of designer controls and the commands each one handles

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bus::CommandKind;

/// A designer control that can own a strategy binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Editing a composition, no execution
    DiagramEditor,

    /// Backtest against historical data
    EmulationRun,

    /// Trading against a live connection
    LiveRun,

    SolutionExplorer,
}

impl ControlKind {
    /// Whether a control of this kind handles `command`
    pub fn supports(&self, command: CommandKind) -> bool {
        match command {
            CommandKind::BindStrategy | CommandKind::ControlChanged => true,
            CommandKind::CompositionChanged => !matches!(self, ControlKind::SolutionExplorer),
            CommandKind::StartEmulation | CommandKind::StopEmulation => {
                matches!(self, ControlKind::EmulationRun)
            }
            CommandKind::DebuggerState
            | CommandKind::AddBreakpoint
            | CommandKind::RemoveBreakpoint
            | CommandKind::StepNext
            | CommandKind::StepInto
            | CommandKind::StepOut
            | CommandKind::Continue
            | CommandKind::Reset => self.runs_strategy(),
        }
    }

    /// Controls that execute the bound strategy
    pub fn runs_strategy(&self) -> bool {
        matches!(self, ControlKind::EmulationRun | ControlKind::LiveRun)
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::DiagramEditor => write!(f, "Diagram editor"),
            ControlKind::EmulationRun => write!(f, "Emulation"),
            ControlKind::LiveRun => write!(f, "Live trading"),
            ControlKind::SolutionExplorer => write!(f, "Solution explorer"),
        }
    }
}
