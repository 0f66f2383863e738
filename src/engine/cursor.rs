//! Execution cursor: where a debugged run is and whether it is suspended

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::{CompositionDiagramElement, DiagramSocket, ElementId, SocketDirection};

/// State of the stepping engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerState {
    /// Debugger inactive; every socket proceeds
    Disabled,

    /// Enabled and free-running until a breakpoint or armed step
    Running,

    /// Halted on a socket carrying a breakpoint
    SuspendedAtBreakpoint,

    /// Halted after a step command
    SuspendedForStep,
}

impl fmt::Display for DebuggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebuggerState::Disabled => write!(f, "Disabled"),
            DebuggerState::Running => write!(f, "Running"),
            DebuggerState::SuspendedAtBreakpoint => write!(f, "Suspended at breakpoint"),
            DebuggerState::SuspendedForStep => write!(f, "Suspended for step"),
        }
    }
}

impl DebuggerState {
    /// Check if execution is halted
    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            DebuggerState::SuspendedAtBreakpoint | DebuggerState::SuspendedForStep
        )
    }
}

/// Why execution suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    Breakpoint,
    Step,
}

/// Step armed by a step command, consumed by the next matching socket
#[derive(Debug, Clone, Default)]
pub(crate) enum StepMode {
    #[default]
    None,

    /// Suspend on the very next socket reached
    Next,

    /// Suspend on the next socket owned by a direct child of `target`, on an
    /// output of `element`, or on the first socket reached outside `element`
    /// when neither reports anything
    Into {
        target: Arc<CompositionDiagramElement>,
        element: ElementId,
    },

    /// Suspend on the next socket owned by a direct child of `target`
    Out {
        target: Arc<CompositionDiagramElement>,
    },
}

/// Mutable debugger state guarded by the stepping engine
#[derive(Debug)]
pub struct ExecutionCursor {
    state: DebuggerState,
    suspended_at: Option<DiagramSocket>,
    pub(crate) step: StepMode,

    /// Navigation stack, root composition first
    compositions: Vec<Arc<CompositionDiagramElement>>,

    current_element: Option<ElementId>,
}

impl ExecutionCursor {
    /// Create a disabled cursor positioned at the root composition
    pub fn new(root: Arc<CompositionDiagramElement>) -> Self {
        Self {
            state: DebuggerState::Disabled,
            suspended_at: None,
            step: StepMode::None,
            compositions: vec![root],
            current_element: None,
        }
    }

    /// Current state
    pub fn state(&self) -> DebuggerState {
        self.state
    }

    /// Debugger active
    pub fn is_enabled(&self) -> bool {
        self.state != DebuggerState::Disabled
    }

    /// Currently suspended
    pub fn is_waiting(&self) -> bool {
        self.state.is_suspended()
    }

    /// Suspended at an input socket
    pub fn is_waiting_on_input(&self) -> bool {
        self.is_waiting()
            && self
                .suspended_at
                .as_ref()
                .is_some_and(|s| s.direction == SocketDirection::Input)
    }

    /// Socket execution is halted on
    pub fn suspended_socket(&self) -> Option<&DiagramSocket> {
        self.suspended_at.as_ref()
    }

    /// Composition currently focused for stepping
    pub fn current_composition(&self) -> &Arc<CompositionDiagramElement> {
        // the root is never popped
        &self.compositions[self.compositions.len() - 1]
    }

    /// Root composition
    pub fn root(&self) -> &Arc<CompositionDiagramElement> {
        &self.compositions[0]
    }

    /// Nesting depth of the focused composition, root is 0
    pub fn depth(&self) -> usize {
        self.compositions.len() - 1
    }

    /// Element most recently entered by the execution engine
    pub fn current_element(&self) -> Option<ElementId> {
        self.current_element
    }

    pub(crate) fn enter_element(&mut self, element: ElementId) {
        self.current_element = Some(element);
    }

    pub(crate) fn enable(&mut self) -> bool {
        if self.state == DebuggerState::Disabled {
            self.state = DebuggerState::Running;
            return true;
        }
        false
    }

    pub(crate) fn suspend(&mut self, socket: DiagramSocket, reason: SuspendReason) {
        self.state = match reason {
            SuspendReason::Breakpoint => DebuggerState::SuspendedAtBreakpoint,
            SuspendReason::Step => DebuggerState::SuspendedForStep,
        };
        self.suspended_at = Some(socket);
        self.step = StepMode::None;
    }

    /// Leave suspension with the given step armed
    pub(crate) fn release(&mut self, step: StepMode) {
        self.state = DebuggerState::Running;
        self.suspended_at = None;
        self.step = step;
    }

    pub(crate) fn push_composition(&mut self, composition: Arc<CompositionDiagramElement>) {
        self.compositions.push(composition);
    }

    pub(crate) fn pop_composition(&mut self) -> Option<Arc<CompositionDiagramElement>> {
        if self.compositions.len() > 1 {
            self.compositions.pop()
        } else {
            None
        }
    }

    /// Replace the navigation stack below the root with `path`. Returns true
    /// if the focused composition changed.
    pub(crate) fn focus(&mut self, path: Vec<Arc<CompositionDiagramElement>>) -> bool {
        let unchanged = path.len() == self.depth()
            && path
                .iter()
                .zip(&self.compositions[1..])
                .all(|(wanted, current)| Arc::ptr_eq(wanted, current));
        if unchanged {
            return false;
        }

        self.compositions.truncate(1);
        self.compositions.extend(path);
        true
    }

    /// Back to a disabled cursor at the root. Returns true if the focused
    /// composition changed.
    pub(crate) fn reset(&mut self) -> bool {
        let navigated = self.compositions.len() > 1;
        self.compositions.truncate(1);
        self.state = DebuggerState::Disabled;
        self.suspended_at = None;
        self.step = StepMode::None;
        self.current_element = None;
        navigated
    }
}
