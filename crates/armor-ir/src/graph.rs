//! Arena-backed instruction graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. The emission order
//! is a doubly linked list threaded through the arena by index, so splicing a
//! node in is O(1) and never moves existing nodes. Jump edges are keyed by the
//! jumping node and name their target by id, which keeps them valid across
//! any number of insertions.

use crate::instruction::Instruction;
use crate::opcode::JumpKind;
use armor_core::MutatorError;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Stable identity of a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    graph: Uuid,
    index: u32,
}

impl NodeId {
    /// Arena slot, in allocation order
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.index)
    }
}

/// A jump from `source` to `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: JumpKind,
}

/// Where a graph is in its lifecycle.
///
/// Linearizing consumes the graph, so the terminal state is the
/// `Linearized` value produced by the encoder rather than a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Freshly decoded
    Built,
    /// At least one node has been inserted
    Mutating,
}

#[derive(Debug)]
struct Slot {
    instruction: Instruction,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    target: u32,
    kind: JumpKind,
}

#[derive(Debug)]
pub struct Graph {
    id: Uuid,
    slots: Vec<Slot>,
    head: Option<u32>,
    tail: Option<u32>,
    edges: BTreeMap<u32, Edge>,
    state: GraphState,
}

impl Graph {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            slots: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            edges: BTreeMap::new(),
            state: GraphState::Built,
        }
    }

    fn node_id(&self, index: u32) -> NodeId {
        NodeId {
            graph: self.id,
            index,
        }
    }

    /// Append a node at the end of the sequence
    pub(crate) fn push_back(&mut self, instruction: Instruction) -> NodeId {
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            instruction,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.node_id(index)
    }

    pub(crate) fn add_edge(&mut self, source: NodeId, target: NodeId, kind: JumpKind) {
        self.edges.insert(
            source.index,
            Edge {
                target: target.index,
                kind,
            },
        );
    }

    /// Splice a new node directly after `reference`
    pub(crate) fn splice_after(
        &mut self,
        reference: NodeId,
        instruction: Instruction,
    ) -> Result<NodeId, MutatorError> {
        if !self.contains(reference) {
            return Err(MutatorError::UnknownNode(reference.to_string()));
        }

        let index = self.slots.len() as u32;
        let next = self.slots[reference.index as usize].next;
        self.slots.push(Slot {
            instruction,
            prev: Some(reference.index),
            next,
        });
        self.slots[reference.index as usize].next = Some(index);
        match next {
            Some(next) => self.slots[next as usize].prev = Some(index),
            None => self.tail = Some(index),
        }

        self.state = GraphState::Mutating;
        Ok(self.node_id(index))
    }

    /// Identity shared by every node id this graph hands out
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.graph == self.id && (node.index as usize) < self.slots.len()
    }

    pub fn instruction(&self, node: NodeId) -> Option<&Instruction> {
        if !self.contains(node) {
            return None;
        }
        Some(&self.slots[node.index as usize].instruction)
    }

    pub fn first(&self) -> Option<NodeId> {
        self.head.map(|index| self.node_id(index))
    }

    pub fn last(&self) -> Option<NodeId> {
        self.tail.map(|index| self.node_id(index))
    }

    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        if !self.contains(node) {
            return None;
        }
        self.slots[node.index as usize]
            .next
            .map(|index| self.node_id(index))
    }

    pub fn prev(&self, node: NodeId) -> Option<NodeId> {
        if !self.contains(node) {
            return None;
        }
        self.slots[node.index as usize]
            .prev
            .map(|index| self.node_id(index))
    }

    /// Node at a sequence position
    pub fn nth(&self, position: usize) -> Option<NodeId> {
        self.nodes().nth(position)
    }

    /// Nodes in emission order
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            graph: self,
            cursor: self.head,
        }
    }

    /// Nodes paired with their instructions, in emission order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Instruction)> + '_ {
        self.nodes()
            .map(move |node| (node, &self.slots[node.index as usize].instruction))
    }

    /// Instructions in emission order
    pub fn instructions(&self) -> Vec<Instruction> {
        self.nodes()
            .map(|node| self.slots[node.index as usize].instruction)
            .collect()
    }

    pub fn jump_target(&self, source: NodeId) -> Option<NodeId> {
        if !self.contains(source) {
            return None;
        }
        self.edges
            .get(&source.index)
            .map(|edge| self.node_id(edge.target))
    }

    /// Every jump edge, ordered by the allocation order of its source
    pub fn edges(&self) -> impl Iterator<Item = JumpEdge> + '_ {
        self.edges.iter().map(move |(&source, edge)| JumpEdge {
            source: self.node_id(source),
            target: self.node_id(edge.target),
            kind: edge.kind,
        })
    }

    /// Nodes whose jumps land on `target`
    pub fn jump_sources(&self, target: NodeId) -> Vec<NodeId> {
        if !self.contains(target) {
            return Vec::new();
        }
        self.edges()
            .filter(|edge| edge.target == target)
            .map(|edge| edge.source)
            .collect()
    }
}

/// Iterator over a graph's nodes in emission order
pub struct Nodes<'a> {
    graph: &'a Graph,
    cursor: Option<u32>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let index = self.cursor?;
        self.cursor = self.graph.slots[index as usize].next;
        Some(self.graph.node_id(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(opcodes: &[u8]) -> (Graph, Vec<NodeId>) {
        let mut graph = Graph::with_capacity(opcodes.len());
        let ids = opcodes
            .iter()
            .map(|&op| graph.push_back(Instruction::simple(op)))
            .collect();
        (graph, ids)
    }

    #[test]
    fn test_push_back_order() {
        let (graph, ids) = chain(&[1, 2, 3]);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.nodes().collect::<Vec<_>>(), ids);
        assert_eq!(graph.first(), Some(ids[0]));
        assert_eq!(graph.last(), Some(ids[2]));
        assert_eq!(graph.prev(ids[1]), Some(ids[0]));
        assert_eq!(graph.next(ids[2]), None);
        assert_eq!(graph.state(), GraphState::Built);
    }

    #[test]
    fn test_splice_in_middle_and_at_tail() {
        let (mut graph, ids) = chain(&[1, 2]);

        let middle = graph.splice_after(ids[0], Instruction::simple(9)).unwrap();
        let tail = graph.splice_after(ids[1], Instruction::simple(4)).unwrap();

        let order: Vec<u8> = graph.instructions().iter().map(|i| i.opcode()).collect();
        assert_eq!(order, vec![1, 9, 2, 4]);
        assert_eq!(graph.prev(ids[1]), Some(middle));
        assert_eq!(graph.last(), Some(tail));
        assert_eq!(graph.nth(1), Some(middle));
        assert_eq!(graph.state(), GraphState::Mutating);
    }

    #[test]
    fn test_foreign_node_is_rejected() {
        let (mut graph, _) = chain(&[1]);
        let (other, other_ids) = chain(&[1]);

        assert!(!graph.contains(other_ids[0]));
        assert!(graph.instruction(other_ids[0]).is_none());
        assert!(matches!(
            graph.splice_after(other_ids[0], Instruction::simple(9)),
            Err(MutatorError::UnknownNode(_))
        ));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_edges_follow_identity() {
        let (mut graph, ids) = chain(&[113, 9, 83]);
        graph.add_edge(ids[0], ids[2], JumpKind::Absolute);

        graph.splice_after(ids[1], Instruction::simple(9)).unwrap();

        assert_eq!(graph.jump_target(ids[0]), Some(ids[2]));
        assert_eq!(graph.jump_sources(ids[2]), vec![ids[0]]);
        assert!(graph.jump_sources(ids[1]).is_empty());
        assert_eq!(graph.edges().count(), 1);
    }
}
