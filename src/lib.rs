//! # Diagram Debugger
//!
//! Breakpoint and stepping engine for trading strategies expressed as
//! composition diagrams, plus the orchestration that runs such a strategy
//! through historical data.
//!
//! ## Overview
//!
//! An execution engine evaluates a [`graph::CompositionDiagramElement`] and
//! reports every socket it reaches to a [`engine::DiagramDebugger`], which
//! answers whether evaluation may continue. Suspensions are released by the
//! step and continue commands, issued directly or through the typed
//! [`bus::CommandBus`]. An [`emulation::EmulationOrchestrator`] drives a
//! backtest and keeps the debugger in step with it.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use diagram_debugger::engine::{DiagramDebugger, SocketDecision};
//! use diagram_debugger::graph::{CompositionBuilder, DiagramElement};
//! use uuid::Uuid;
//!
//! # fn example() -> diagram_debugger::Result<()> {
//! let sma = DiagramElement::new("Sma", Uuid::new_v4()).with_input("Price");
//! let price = sma.socket("Price").cloned().expect("declared above");
//! let root = CompositionBuilder::new("strategy").add_element(sma).build()?;
//!
//! let debugger = DiagramDebugger::new(Arc::new(root));
//! debugger.set_enabled(true);
//! debugger.add_breakpoint(&price.id)?;
//!
//! assert_eq!(debugger.on_socket_reached(&price), SocketDecision::Suspend);
//! assert!(debugger.continue_execution());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: Compositions, elements and sockets
//! - [`engine`]: Breakpoints, the stepping engine and a reference runner
//! - [`emulation`]: Backtest orchestration and progress
//! - [`bus`]: Command routing between controls
//! - [`session`]: Debugger binding of a control
//! - [`config`]: Settings and their persistence

#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

pub mod bus;
pub mod config;
pub mod control;
pub mod emulation;
pub mod engine;
pub mod graph;
pub mod session;
pub mod strategy;

/// Result type for designer operations
pub type Result<T> = std::result::Result<T, DesignerError>;

/// Main error type
#[derive(Error, Debug)]
pub enum DesignerError {
    /// Composition structure error
    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    #[error("Debugger error: {0}")]
    Debugger(#[from] engine::DebuggerError),

    #[error("Emulation error: {0}")]
    Emulation(#[from] emulation::EmulationError),

    #[error("Settings error: {0}")]
    Settings(#[from] config::SettingsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub use bus::{CommandBus, CommandKind, ScopeToken, StudioCommand};
pub use control::ControlKind;
pub use emulation::{EmulationOrchestrator, EmulationState};
pub use engine::{DebuggerEvent, DebuggerState, DiagramDebugger, SocketDecision};
pub use graph::{CompositionBuilder, CompositionDiagramElement, DiagramElement, DiagramSocket};
pub use session::DebuggerSession;
pub use strategy::{DiagramStrategy, ProcessState};
