//! Composition graph for strategy diagrams
//!
//! This module provides the read-only model the debugger navigates: elements,
//! their sockets, and (possibly nested) compositions, along with a builder
//! for assembling them and the evaluation order used by the runner.

use thiserror::Error;

pub mod builder;
pub mod composition;
pub mod element;
pub mod socket;

pub use builder::CompositionBuilder;
pub use composition::{CompositionDiagramElement, CompositionParameter, ParameterKind};
pub use element::{DiagramElement, ElementId};
pub use socket::{DiagramSocket, SocketDirection, SocketId};

/// Errors specific to composition graph operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Socket not found: {0}")]
    SocketNotFound(SocketId),

    #[error("Duplicate element: {0}")]
    DuplicateElement(ElementId),

    #[error("Invalid connection from {from} to {to}: {reason}")]
    InvalidConnection {
        from: SocketId,
        to: SocketId,
        reason: String,
    },

    #[error("Cycle detected in composition {0}")]
    CycleDetected(String),
}
