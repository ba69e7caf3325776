//! The node arena.

use crate::frame_state::{FrameState, FrameStateId};
use crate::node::{Node, NodeId, NodeKind};
use strata_core::{Constant, Kind, PrimaryMap, SecondaryMap};

/// A method's IR graph: nodes, frame states, and the phi lists of its merges.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    nodes: PrimaryMap<NodeId, Node>,
    frame_states: PrimaryMap<FrameStateId, FrameState>,
    phis: SecondaryMap<NodeId, Vec<NodeId>>,
    parameter_kinds: Vec<Kind>,
    start: NodeId,
}

impl Graph {
    /// Creates a graph with its start node for a method taking `parameter_kinds`.
    pub fn new(name: impl Into<String>, parameter_kinds: Vec<Kind>) -> Self {
        let mut nodes = PrimaryMap::new();
        let start = nodes.push(Node {
            kind: NodeKind::Start,
            value_kind: Kind::Void,
            state_after: None,
        });
        Graph {
            name: name.into(),
            nodes,
            frame_states: PrimaryMap::new(),
            phis: SecondaryMap::new(),
            parameter_kinds,
            start,
        }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn parameter_kinds(&self) -> &[Kind] {
        &self.parameter_kinds
    }

    pub fn add(&mut self, kind: NodeKind, value_kind: Kind) -> NodeId {
        self.nodes.push(Node {
            kind,
            value_kind,
            state_after: None,
        })
    }

    /// Adds a control or logic node (no value).
    pub fn add_void(&mut self, kind: NodeKind) -> NodeId {
        self.add(kind, Kind::Void)
    }

    pub fn begin(&mut self) -> NodeId {
        self.add_void(NodeKind::Begin)
    }

    pub fn parameter(&mut self, index: usize) -> NodeId {
        let kind = self
            .parameter_kinds
            .get(index)
            .map(|k| k.stack_kind())
            .unwrap_or(Kind::Illegal);
        self.add(NodeKind::Parameter { index }, kind)
    }

    pub fn constant(&mut self, value: Constant) -> NodeId {
        self.add(NodeKind::Constant(value), value.kind().stack_kind())
    }

    pub fn merge(&mut self) -> NodeId {
        self.add_void(NodeKind::Merge {
            ends: Vec::new(),
            loop_header: false,
        })
    }

    pub fn loop_begin(&mut self) -> NodeId {
        self.add_void(NodeKind::Merge {
            ends: Vec::new(),
            loop_header: true,
        })
    }

    /// Adds a forward end into `merge`, appended to its phi-input order.
    pub fn end(&mut self, merge: NodeId) -> NodeId {
        let end = self.add_void(NodeKind::End { merge });
        self.push_end(merge, end);
        end
    }

    /// Adds a back edge into the loop header `merge`.
    pub fn loop_end(&mut self, merge: NodeId) -> NodeId {
        let end = self.add_void(NodeKind::LoopEnd { merge });
        self.push_end(merge, end);
        end
    }

    fn push_end(&mut self, merge: NodeId, end: NodeId) {
        if let NodeKind::Merge { ends, .. } = &mut self.nodes[merge].kind {
            ends.push(end);
        }
    }

    /// Adds a phi of `merge`. `values` are in the merge's end order and may be
    /// completed later with [`Graph::push_phi_value`].
    pub fn phi(&mut self, merge: NodeId, kind: Kind, values: Vec<NodeId>) -> NodeId {
        let phi = self.add(NodeKind::Phi { merge, values }, kind.stack_kind());
        match self.phis.get_mut(merge) {
            Some(list) => list.push(phi),
            None => {
                self.phis.insert(merge, vec![phi]);
            }
        }
        phi
    }

    pub fn push_phi_value(&mut self, phi: NodeId, value: NodeId) {
        if let NodeKind::Phi { values, .. } = &mut self.nodes[phi].kind {
            values.push(value);
        }
    }

    /// Phis of `merge` in creation order.
    pub fn phis(&self, merge: NodeId) -> &[NodeId] {
        self.phis.get(merge).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position of `end` among the ends of `merge`.
    pub fn phi_predecessor_index(&self, merge: NodeId, end: NodeId) -> Option<usize> {
        match &self.nodes.get(merge)?.kind {
            NodeKind::Merge { ends, .. } => ends.iter().position(|e| *e == end),
            _ => None,
        }
    }

    pub fn add_frame_state(&mut self, state: FrameState) -> FrameStateId {
        self.frame_states.push(state)
    }

    pub fn frame_state(&self, id: FrameStateId) -> &FrameState {
        &self.frame_states[id]
    }

    pub fn try_frame_state(&self, id: FrameStateId) -> Option<&FrameState> {
        self.frame_states.get(id)
    }

    pub fn set_state_after(&mut self, node: NodeId, state: FrameStateId) {
        self.nodes[node].state_after = Some(state);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Short description used in diagnostics, e.g. `n7|Arithmetic`.
    pub fn describe(&self, id: NodeId) -> String {
        match self.nodes.get(id) {
            Some(node) => format!("{}|{}", id, node.kind.name()),
            None => format!("{}|<missing>", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ArithOp;

    #[test]
    fn test_merge_ends_follow_creation_order() {
        let mut graph = Graph::new("m", vec![Kind::Int]);
        let merge = graph.merge();
        let e0 = graph.end(merge);
        let e1 = graph.end(merge);
        assert_eq!(graph.phi_predecessor_index(merge, e0), Some(0));
        assert_eq!(graph.phi_predecessor_index(merge, e1), Some(1));
    }

    #[test]
    fn test_phi_registration() {
        let mut graph = Graph::new("m", vec![Kind::Byte]);
        let p = graph.parameter(0);
        assert_eq!(graph.node(p).value_kind, Kind::Int);
        let header = graph.loop_begin();
        let phi = graph.phi(header, Kind::Int, vec![p]);
        let one = graph.constant(Constant::Int(1));
        let next = graph.add(
            NodeKind::Arithmetic {
                op: ArithOp::Add,
                x: phi,
                y: one,
            },
            Kind::Int,
        );
        graph.push_phi_value(phi, next);
        assert_eq!(graph.phis(header), &[phi]);
        assert_eq!(graph.kind(phi).inputs(), vec![p, next]);
        assert!(graph.describe(phi).ends_with("|Phi"));
    }
}
