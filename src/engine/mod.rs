//! Diagram debugging engine
//!
//! Breakpoints, the execution cursor, the stepping engine that decides at
//! every socket whether evaluation may continue, and a reference runner that
//! drives a composition through it.

pub mod breakpoint;
pub mod cursor;
pub mod debugger;
pub mod runner;

pub use breakpoint::{Breakpoint, BreakpointSet};
pub use cursor::{DebuggerState, ExecutionCursor, SuspendReason};
pub use debugger::{DebuggerError, DebuggerEvent, DiagramDebugger, SocketDecision};
pub use runner::{DiagramRunner, RunSummary, StepController};
