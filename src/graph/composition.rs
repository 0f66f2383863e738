//! Compositions: the root strategy diagram and the sub-graphs nested inside it

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{DiagramElement, DiagramSocket, ElementId, GraphError, SocketId};

/// Kind of value a composition parameter holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Instrument the strategy trades
    Security,
    Number,
    Text,
    Bool,
}

/// A user-editable parameter exposed by a composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub value: Option<serde_json::Value>,
}

impl CompositionParameter {
    /// Create a parameter without a value
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: None,
        }
    }

    /// Set the parameter value
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Serialized form of a composition; indexes are rebuilt on load.
#[derive(Deserialize)]
struct CompositionData {
    type_id: Uuid,
    name: String,
    #[serde(default = "default_modifiable")]
    is_modifiable: bool,
    #[serde(default)]
    parameters: Vec<CompositionParameter>,
    elements: Vec<Arc<DiagramElement>>,
}

fn default_modifiable() -> bool {
    true
}

impl From<CompositionData> for CompositionDiagramElement {
    fn from(data: CompositionData) -> Self {
        let mut composition = Self {
            type_id: data.type_id,
            name: data.name,
            is_modifiable: AtomicBool::new(data.is_modifiable),
            parameters: data.parameters,
            elements: data.elements,
            children: HashMap::new(),
            index: HashMap::new(),
        };
        composition.reindex();
        composition
    }
}

/// Root or nested graph container
#[derive(Debug, Serialize, Deserialize)]
#[serde(from = "CompositionData")]
pub struct CompositionDiagramElement {
    type_id: Uuid,
    name: String,

    /// Cleared while a run is bound so the editor treats the diagram as read-only
    is_modifiable: AtomicBool,

    parameters: Vec<CompositionParameter>,
    elements: Vec<Arc<DiagramElement>>,

    /// Direct children: element id to position in `elements`
    #[serde(skip)]
    children: HashMap<ElementId, usize>,

    /// Every element at any nesting depth
    #[serde(skip)]
    index: HashMap<ElementId, Arc<DiagramElement>>,
}

impl CompositionDiagramElement {
    /// Create an empty composition with a fresh type id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            type_id: Uuid::new_v4(),
            name: name.into(),
            is_modifiable: AtomicBool::new(true),
            parameters: Vec::new(),
            elements: Vec::new(),
            children: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn from_parts(
        type_id: Uuid,
        name: String,
        parameters: Vec<CompositionParameter>,
        elements: Vec<DiagramElement>,
    ) -> Result<Self, GraphError> {
        let mut seen = HashMap::new();
        for element in &elements {
            if seen.insert(element.id(), ()).is_some() {
                return Err(GraphError::DuplicateElement(element.id()));
            }
        }

        let mut composition = Self {
            type_id,
            name,
            is_modifiable: AtomicBool::new(true),
            parameters,
            elements: elements.into_iter().map(Arc::new).collect(),
            children: HashMap::new(),
            index: HashMap::new(),
        };
        composition.reindex();
        Ok(composition)
    }

    fn reindex(&mut self) {
        self.children.clear();
        self.index.clear();

        for (position, element) in self.elements.iter().enumerate() {
            self.children.insert(element.id(), position);
            self.index.insert(element.id(), element.clone());

            if let Some(nested) = element.composition() {
                for (id, inner) in &nested.index {
                    self.index.insert(*id, inner.clone());
                }
            }
        }
    }

    /// Identifies the composition kind; shared by every instance of it
    pub fn type_id(&self) -> Uuid {
        self.type_id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the editor may change this composition
    pub fn is_modifiable(&self) -> bool {
        self.is_modifiable.load(Ordering::Acquire)
    }

    /// Allow or forbid editing
    pub fn set_modifiable(&self, modifiable: bool) {
        self.is_modifiable.store(modifiable, Ordering::Release);
    }

    /// Parameters exposed by the composition
    pub fn parameters(&self) -> &[CompositionParameter] {
        &self.parameters
    }

    /// Direct child elements in insertion order
    pub fn elements(&self) -> &[Arc<DiagramElement>] {
        &self.elements
    }

    /// True if the element is a direct child of this composition
    pub fn contains_element(&self, id: ElementId) -> bool {
        self.children.contains_key(&id)
    }

    /// Find an element at any nesting depth
    pub fn element(&self, id: ElementId) -> Option<&Arc<DiagramElement>> {
        self.index.get(&id)
    }

    /// Resolve the element owning a socket through the socket's back-reference
    pub fn element_by_socket(&self, socket: &SocketId) -> Result<&Arc<DiagramElement>, GraphError> {
        self.index
            .get(&socket.element)
            .ok_or_else(|| GraphError::SocketNotFound(socket.clone()))
    }

    /// Resolve a socket identity to the socket itself
    pub fn socket(&self, socket: &SocketId) -> Result<&DiagramSocket, GraphError> {
        self.element_by_socket(socket)?
            .socket(&socket.name)
            .ok_or_else(|| GraphError::SocketNotFound(socket.clone()))
    }

    /// True if the element owns a nested composition
    pub fn is_composite(element: &DiagramElement) -> bool {
        element.is_composite()
    }

    /// Find the composition that directly contains `nested`, searching this
    /// composition and everything below it. `None` for `self` or a foreign
    /// composition.
    pub fn parent_of(&self, nested: &CompositionDiagramElement) -> Option<&CompositionDiagramElement> {
        for element in &self.elements {
            let Some(child) = element.composition() else { continue };
            if std::ptr::eq(child.as_ref(), nested) {
                return Some(self);
            }
            if let Some(parent) = child.parent_of(nested) {
                return Some(parent);
            }
        }
        None
    }

    /// Nested compositions leading from this one down to the composition
    /// that directly contains `id`. Empty for a direct child, `None` if the
    /// element is not found at any depth.
    pub fn path_to(&self, id: ElementId) -> Option<Vec<Arc<CompositionDiagramElement>>> {
        if self.contains_element(id) {
            return Some(Vec::new());
        }

        for element in &self.elements {
            let Some(child) = element.composition() else { continue };
            if child.element(id).is_some() {
                let mut path = vec![child.clone()];
                path.extend(child.path_to(id)?);
                return Some(path);
            }
        }
        None
    }

    /// Direct children ordered so that every element comes after the
    /// elements feeding its inputs. Unconnected elements keep insertion order.
    pub fn evaluation_order(&self) -> Result<Vec<Arc<DiagramElement>>, GraphError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.elements.len()).map(|i| graph.add_node(i)).collect();

        for (from, element) in self.elements.iter().enumerate() {
            for socket in element.outputs() {
                let Some(peer) = &socket.peer else { continue };
                if let Some(&to) = self.children.get(&peer.element) {
                    if to != from {
                        graph.update_edge(nodes[from], nodes[to], ());
                    }
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(GraphError::CycleDetected(self.name.clone()));
        }

        let mut in_degree: Vec<usize> = nodes
            .iter()
            .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.elements.len());
        while let Some(next) = ready.pop_first() {
            order.push(self.elements[next].clone());
            for successor in graph.neighbors_directed(nodes[next], Direction::Outgoing) {
                let position = graph[successor];
                in_degree[position] -= 1;
                if in_degree[position] == 0 {
                    ready.insert(position);
                }
            }
        }

        Ok(order)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON, rebuilding lookup indexes
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CompositionBuilder;

    fn chain() -> (CompositionDiagramElement, ElementId, ElementId) {
        let kind = Uuid::new_v4();
        let source = DiagramElement::new("Source", kind).with_output("Out");
        let sink = DiagramElement::new("Sink", kind).with_input("In");
        let (source_id, sink_id) = (source.id(), sink.id());

        // sink added first so ordering has to follow the wiring
        let composition = CompositionBuilder::new("chain")
            .add_element(sink)
            .add_element(source)
            .connect(SocketId::new(source_id, "Out"), SocketId::new(sink_id, "In"))
            .build()
            .unwrap();

        (composition, source_id, sink_id)
    }

    #[test]
    fn test_element_by_socket() {
        let (composition, source_id, _) = chain();
        let socket = SocketId::new(source_id, "Out");

        let element = composition.element_by_socket(&socket).unwrap();
        assert_eq!(element.id(), source_id);
        assert!(composition.socket(&socket).unwrap().is_connected());
    }

    #[test]
    fn test_detached_socket_not_found() {
        let (composition, _, _) = chain();
        let detached = SocketId::new(ElementId::random(), "Out");

        assert_eq!(
            composition.element_by_socket(&detached).unwrap_err(),
            GraphError::SocketNotFound(detached)
        );
    }

    #[test]
    fn test_evaluation_order_follows_wiring() {
        let (composition, source_id, sink_id) = chain();
        let order: Vec<ElementId> = composition
            .evaluation_order()
            .unwrap()
            .iter()
            .map(|e| e.id())
            .collect();

        assert_eq!(order, vec![source_id, sink_id]);
    }

    #[test]
    fn test_nested_elements_are_indexed() {
        let inner_element = DiagramElement::new("Inner", Uuid::new_v4()).with_input("In");
        let inner_id = inner_element.id();
        let inner = CompositionBuilder::new("inner")
            .add_element(inner_element)
            .build()
            .unwrap();

        let wrapper = DiagramElement::composite("Wrapper", inner);
        let wrapper_id = wrapper.id();
        let root = CompositionBuilder::new("root").add_element(wrapper).build().unwrap();

        assert!(root.contains_element(wrapper_id));
        assert!(!root.contains_element(inner_id));
        assert!(root.element(inner_id).is_some());
        assert!(root.socket(&SocketId::new(inner_id, "In")).is_ok());

        let nested = root.element(wrapper_id).unwrap().composition().unwrap();
        assert!(std::ptr::eq(root.parent_of(nested).unwrap(), &root));
        assert!(root.parent_of(&root).is_none());
    }

    #[test]
    fn test_identity_survives_reload() {
        let (composition, source_id, sink_id) = chain();
        composition.set_modifiable(false);

        let json = composition.to_json().unwrap();
        let reloaded = CompositionDiagramElement::from_json(&json).unwrap();

        assert_eq!(reloaded.type_id(), composition.type_id());
        assert!(!reloaded.is_modifiable());
        assert!(reloaded.socket(&SocketId::new(source_id, "Out")).is_ok());
        assert!(reloaded.socket(&SocketId::new(sink_id, "In")).is_ok());
    }
}
