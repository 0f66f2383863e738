//! Builder pattern for constructing compositions

use uuid::Uuid;

use crate::graph::{
    CompositionDiagramElement, CompositionParameter, DiagramElement, GraphError, SocketDirection,
    SocketId,
};

/// Builder for constructing a CompositionDiagramElement
pub struct CompositionBuilder {
    type_id: Uuid,
    name: String,
    parameters: Vec<CompositionParameter>,
    elements: Vec<DiagramElement>,
    pending_connections: Vec<PendingConnection>,
}

/// Represents a wire to be added
struct PendingConnection {
    from: SocketId,
    to: SocketId,
}

impl CompositionBuilder {
    /// Create a new composition builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            type_id: Uuid::new_v4(),
            name: name.into(),
            parameters: Vec::new(),
            elements: Vec::new(),
            pending_connections: Vec::new(),
        }
    }

    /// Add a composition parameter
    pub fn add_parameter(mut self, parameter: CompositionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Add a child element
    pub fn add_element(mut self, element: DiagramElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Wire an output socket to an input socket
    pub fn connect(mut self, from: SocketId, to: SocketId) -> Self {
        self.pending_connections.push(PendingConnection { from, to });
        self
    }

    fn direction_of(&self, socket: &SocketId) -> Result<SocketDirection, GraphError> {
        self.elements
            .iter()
            .find(|e| e.id() == socket.element)
            .and_then(|e| e.socket(&socket.name))
            .map(|s| s.direction)
            .ok_or_else(|| GraphError::SocketNotFound(socket.clone()))
    }

    fn set_peer(&mut self, socket: &SocketId, peer: &SocketId) {
        if let Some(target) = self
            .elements
            .iter_mut()
            .find(|e| e.id() == socket.element)
            .and_then(|e| e.socket_mut(&socket.name))
        {
            target.peer = Some(peer.clone());
        }
    }

    /// Build the composition
    pub fn build(mut self) -> Result<CompositionDiagramElement, GraphError> {
        let connections = std::mem::take(&mut self.pending_connections);

        for PendingConnection { from, to } in connections {
            if self.direction_of(&from)? != SocketDirection::Output {
                return Err(GraphError::InvalidConnection {
                    from,
                    to,
                    reason: "source is not an output socket".to_string(),
                });
            }
            if self.direction_of(&to)? != SocketDirection::Input {
                return Err(GraphError::InvalidConnection {
                    from,
                    to,
                    reason: "target is not an input socket".to_string(),
                });
            }

            self.set_peer(&from, &to);
            self.set_peer(&to, &from);
        }

        CompositionDiagramElement::from_parts(self.type_id, self.name, self.parameters, self.elements)
    }
}
