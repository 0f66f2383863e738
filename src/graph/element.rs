//! Diagram elements, the nodes of a composition

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{CompositionDiagramElement, DiagramSocket, SocketDirection, SocketId};

/// Stable identity of an element: what kind of element it is plus which instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId {
    /// Identifies the element kind (indicator, order placer, sub-composition, ...)
    pub type_id: Uuid,

    /// Identifies this particular instance inside a composition
    pub instance_id: Uuid,
}

impl ElementId {
    /// Create an id for a new instance of the given element kind
    pub fn new(type_id: Uuid) -> Self {
        Self {
            type_id,
            instance_id: Uuid::new_v4(),
        }
    }

    /// Create an id with both parts random
    pub fn random() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_id.simple(), self.instance_id.simple())
    }
}

/// A node in the composition graph
#[derive(Debug, Serialize, Deserialize)]
pub struct DiagramElement {
    id: ElementId,

    /// Display name
    pub name: String,

    sockets: Vec<DiagramSocket>,

    /// Present when this element is itself a sub-graph
    composition: Option<Arc<CompositionDiagramElement>>,
}

impl DiagramElement {
    /// Create an element of the given kind with no sockets
    pub fn new(name: impl Into<String>, type_id: Uuid) -> Self {
        Self {
            id: ElementId::new(type_id),
            name: name.into(),
            sockets: Vec::new(),
            composition: None,
        }
    }

    /// Create an element wrapping a nested composition. The element kind is
    /// the composition's type id.
    pub fn composite(name: impl Into<String>, composition: CompositionDiagramElement) -> Self {
        let mut element = Self::new(name, composition.type_id());
        element.composition = Some(Arc::new(composition));
        element
    }

    /// Add an input socket
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.sockets
            .push(DiagramSocket::new(self.id, name, SocketDirection::Input));
        self
    }

    /// Add an output socket
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.sockets
            .push(DiagramSocket::new(self.id, name, SocketDirection::Output));
        self
    }

    /// Element identity
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// All sockets in declaration order
    pub fn sockets(&self) -> &[DiagramSocket] {
        &self.sockets
    }

    /// Input sockets in declaration order
    pub fn inputs(&self) -> impl Iterator<Item = &DiagramSocket> {
        self.sockets.iter().filter(|s| s.direction == SocketDirection::Input)
    }

    /// Output sockets in declaration order
    pub fn outputs(&self) -> impl Iterator<Item = &DiagramSocket> {
        self.sockets.iter().filter(|s| s.direction == SocketDirection::Output)
    }

    /// Look up a socket by name
    pub fn socket(&self, name: &str) -> Option<&DiagramSocket> {
        self.sockets.iter().find(|s| s.name() == name)
    }

    /// Id of the named socket, whether or not it exists
    pub fn socket_id(&self, name: &str) -> SocketId {
        SocketId::new(self.id, name)
    }

    pub(crate) fn socket_mut(&mut self, name: &str) -> Option<&mut DiagramSocket> {
        self.sockets.iter_mut().find(|s| s.name() == name)
    }

    /// True if the element owns a nested composition
    pub fn is_composite(&self) -> bool {
        self.composition.is_some()
    }

    /// The nested composition, if any
    pub fn composition(&self) -> Option<&Arc<CompositionDiagramElement>> {
        self.composition.as_ref()
    }
}
