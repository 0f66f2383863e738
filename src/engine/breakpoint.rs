//! Breakpoint set for debugging diagram execution

use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::graph::SocketId;

/// Represents a single breakpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Socket at which execution suspends
    pub socket: SocketId,

    /// Number of times this breakpoint has been hit
    pub hit_count: usize,

    /// When the breakpoint was created
    pub created_at: SystemTime,
}

impl Breakpoint {
    /// Create a new breakpoint
    pub fn new(socket: SocketId) -> Self {
        Self {
            socket,
            hit_count: 0,
            created_at: SystemTime::now(),
        }
    }
}

/// Set of sockets marked for suspension.
///
/// Membership is unique per socket and every mutation is idempotent. Safe to
/// mutate from the UI side while the execution side queries it.
#[derive(Debug, Default)]
pub struct BreakpointSet {
    breakpoints: DashMap<SocketId, Breakpoint>,
}

impl BreakpointSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint. Returns false if the socket already had one.
    pub fn add(&self, socket: SocketId) -> bool {
        match self.breakpoints.entry(socket) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let socket = entry.key().clone();
                entry.insert(Breakpoint::new(socket));
                true
            }
        }
    }

    /// Remove a breakpoint. Returns false if there was none.
    pub fn remove(&self, socket: &SocketId) -> bool {
        self.breakpoints.remove(socket).is_some()
    }

    /// Check membership
    pub fn contains(&self, socket: &SocketId) -> bool {
        self.breakpoints.contains_key(socket)
    }

    /// Remove every breakpoint
    pub fn clear(&self) {
        self.breakpoints.clear();
    }

    /// Number of breakpoints
    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    /// True when no breakpoints are set
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// All breakpoints, ordered by socket for stable output
    pub fn list(&self) -> Vec<Breakpoint> {
        let mut breakpoints: Vec<Breakpoint> =
            self.breakpoints.iter().map(|entry| entry.value().clone()).collect();
        breakpoints.sort_by(|a, b| a.socket.cmp(&b.socket));
        breakpoints
    }

    /// Socket identities of all breakpoints
    pub fn sockets(&self) -> Vec<SocketId> {
        self.list().into_iter().map(|bp| bp.socket).collect()
    }

    /// Record that execution suspended on a breakpoint
    pub fn record_hit(&self, socket: &SocketId) {
        if let Some(mut bp) = self.breakpoints.get_mut(socket) {
            bp.hit_count += 1;
        }
    }

    /// Times the breakpoint on a socket was hit
    pub fn hit_count(&self, socket: &SocketId) -> Option<usize> {
        self.breakpoints.get(socket).map(|bp| bp.hit_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ElementId;

    #[test]
    fn test_breakpoint_creation() {
        let socket = SocketId::new(ElementId::random(), "In");
        let bp = Breakpoint::new(socket.clone());
        assert_eq!(bp.socket, socket);
        assert_eq!(bp.hit_count, 0);
    }

    #[test]
    fn test_add_is_idempotent() {
        let set = BreakpointSet::new();
        let socket = SocketId::new(ElementId::random(), "In");

        assert!(set.add(socket.clone()));
        assert!(!set.add(socket.clone()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let set = BreakpointSet::new();
        let socket = SocketId::new(ElementId::random(), "In");

        assert!(!set.remove(&socket));
        set.add(socket.clone());
        assert!(set.remove(&socket));
        assert!(!set.remove(&socket));
        assert!(set.is_empty());
    }

    #[test]
    fn test_hit_counting() {
        let set = BreakpointSet::new();
        let socket = SocketId::new(ElementId::random(), "Out");
        set.add(socket.clone());

        set.record_hit(&socket);
        set.record_hit(&socket);
        assert_eq!(set.hit_count(&socket), Some(2));

        // re-adding keeps the counter
        set.add(socket.clone());
        assert_eq!(set.hit_count(&socket), Some(2));
    }

    #[test]
    fn test_clear() {
        let set = BreakpointSet::new();
        let element = ElementId::random();
        set.add(SocketId::new(element, "A"));
        set.add(SocketId::new(element, "B"));

        set.clear();
        assert!(set.is_empty());
        assert!(set.sockets().is_empty());
    }
}
