//! Sockets: the connection points of diagram elements

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::ElementId;

/// Direction of a socket relative to its element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketDirection {
    /// Values flow into the element through this socket
    Input,

    /// Values flow out of the element through this socket
    Output,
}

/// Structural identity of a socket: the owning element plus the socket name.
///
/// Element ids survive save/load, so a `SocketId` persisted in debugger
/// settings resolves against a reopened composition as long as the element
/// and socket still exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId {
    /// Owning element
    pub element: ElementId,

    /// Socket name, unique within the element
    pub name: String,
}

impl SocketId {
    /// Create a socket identity
    pub fn new(element: ElementId, name: impl Into<String>) -> Self {
        Self {
            element,
            name: name.into(),
        }
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.element, self.name)
    }
}

/// A named connection point on a diagram element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramSocket {
    /// Identity, including the back-reference to the parent element
    pub id: SocketId,

    /// Input or output
    pub direction: SocketDirection,

    /// Connected peer socket, if wired
    pub peer: Option<SocketId>,
}

impl DiagramSocket {
    /// Create an unconnected socket
    pub fn new(element: ElementId, name: impl Into<String>, direction: SocketDirection) -> Self {
        Self {
            id: SocketId::new(element, name),
            direction,
            peer: None,
        }
    }

    /// Id of the element owning this socket
    pub fn parent(&self) -> ElementId {
        self.id.element
    }

    /// Socket name
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Whether this is an input socket
    pub fn is_input(&self) -> bool {
        self.direction == SocketDirection::Input
    }

    /// Whether the socket is wired to a peer
    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_identity_is_structural() {
        let element = ElementId::random();
        let a = DiagramSocket::new(element, "In", SocketDirection::Input);
        let b = DiagramSocket::new(element, "In", SocketDirection::Input);

        assert_eq!(a.id, b.id);
        assert_eq!(a.parent(), element);
        assert!(a.is_input());
        assert!(!a.is_connected());
    }

    #[test]
    fn test_socket_id_serialization() {
        let id = SocketId::new(ElementId::random(), "Out");
        let json = serde_json::to_string(&id).unwrap();
        let restored: SocketId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }
}
