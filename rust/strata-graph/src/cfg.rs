//! Control-flow graph over scheduled blocks.
//!
//! Blocks are handed over by the scheduler as [`BlockSpec`]s: the node order of
//! each block plus the indices of its successors. Construction derives the
//! predecessor lists, the dominator tree (Cooper, Harvey and Kennedy's iterative
//! algorithm over reverse postorder) and the loop nesting depth of every block.

use crate::node::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};
use strata_core::{EntityRef, PrimaryMap};
use thiserror::Error;

strata_core::define_entity!(BlockId, "B");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CfgError {
    #[error("control-flow graph has no blocks")]
    Empty,
    #[error("block {0} has no nodes")]
    EmptyBlock(usize),
    #[error("block {block} names successor {successor} which does not exist")]
    BadSuccessor { block: usize, successor: usize },
    #[error("node {node} begins both block {first} and block {second}")]
    SharedBegin {
        node: NodeId,
        first: usize,
        second: usize,
    },
}

/// Scheduler output for one block. The first node begins the block.
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub nodes: Vec<NodeId>,
    pub successors: Vec<usize>,
}

impl BlockSpec {
    pub fn new(nodes: Vec<NodeId>, successors: Vec<usize>) -> Self {
        BlockSpec { nodes, successors }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub nodes: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub dominator: Option<BlockId>,
    pub loop_depth: u32,
    pub is_loop_header: bool,
    /// Position in the linear order.
    pub order: usize,
}

impl Block {
    pub fn begin(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn end_node(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: PrimaryMap<BlockId, Block>,
    linear_order: Vec<BlockId>,
    reachable: usize,
    block_of_begin: HashMap<NodeId, BlockId>,
}

impl ControlFlowGraph {
    /// Builds the CFG. Block 0 is the entry.
    pub fn new(specs: Vec<BlockSpec>) -> Result<Self, CfgError> {
        if specs.is_empty() {
            return Err(CfgError::Empty);
        }
        let count = specs.len();
        let mut blocks: PrimaryMap<BlockId, Block> = PrimaryMap::new();
        let mut block_of_begin = HashMap::new();

        for (index, spec) in specs.iter().enumerate() {
            let Some(&begin) = spec.nodes.first() else {
                return Err(CfgError::EmptyBlock(index));
            };
            if let Some(&successor) = spec.successors.iter().find(|&&s| s >= count) {
                return Err(CfgError::BadSuccessor {
                    block: index,
                    successor,
                });
            }
            if let Some(first) = block_of_begin.insert(begin, BlockId::new(index as u32)) {
                return Err(CfgError::SharedBegin {
                    node: begin,
                    first: first.index() as usize,
                    second: index,
                });
            }
        }

        for (index, spec) in specs.into_iter().enumerate() {
            blocks.push(Block {
                id: BlockId::new(index as u32),
                nodes: spec.nodes,
                predecessors: Vec::new(),
                successors: spec
                    .successors
                    .iter()
                    .map(|&s| BlockId::new(s as u32))
                    .collect(),
                dominator: None,
                loop_depth: 0,
                is_loop_header: false,
                order: 0,
            });
        }
        let edges: Vec<(BlockId, BlockId)> = blocks
            .iter()
            .flat_map(|(id, b)| b.successors.iter().map(move |&s| (id, s)))
            .collect();
        for (from, to) in edges {
            blocks[to].predecessors.push(from);
        }

        let mut cfg = ControlFlowGraph {
            blocks,
            linear_order: Vec::new(),
            reachable: 0,
            block_of_begin,
        };
        let rpo = cfg.reverse_postorder();
        cfg.compute_dominators(&rpo);
        cfg.compute_loops();

        let reachable: HashSet<BlockId> = rpo.iter().copied().collect();
        cfg.reachable = rpo.len();
        let mut order = rpo;
        order.extend(cfg.blocks.keys().filter(|b| !reachable.contains(b)));
        for (position, &block) in order.iter().enumerate() {
            cfg.blocks[block].order = position;
        }
        cfg.linear_order = order;
        Ok(cfg)
    }

    fn reverse_postorder(&self) -> Vec<BlockId> {
        let entry = self.start_block();
        let mut visited = HashSet::new();
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // (block, next successor to visit)
        let mut stack = vec![(entry, 0usize)];
        visited.insert(entry);
        while let Some((block, next)) = stack.last_mut() {
            let successors = &self.blocks[*block].successors;
            if *next < successors.len() {
                let succ = successors[*next];
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }

    fn compute_dominators(&mut self, rpo: &[BlockId]) {
        let entry = self.start_block();
        let rpo_number: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let intersect = |mut a: BlockId, mut b: BlockId, idom: &HashMap<BlockId, BlockId>| {
            while a != b {
                while rpo_number[&a] > rpo_number[&b] {
                    a = idom[&a];
                }
                while rpo_number[&b] > rpo_number[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &self.blocks[b].predecessors {
                    if !idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(p, current, &idom),
                    });
                }
                if let Some(new) = new_idom {
                    if idom.get(&b) != Some(&new) {
                        idom.insert(b, new);
                        changed = true;
                    }
                }
            }
        }

        for (block, dom) in idom {
            if block != entry {
                self.blocks[block].dominator = Some(dom);
            }
        }
    }

    fn compute_loops(&mut self) {
        let mut headers = Vec::new();
        let mut depth: HashMap<BlockId, u32> = HashMap::new();
        for (block, data) in self.blocks.iter() {
            for &target in &data.successors {
                if !self.dominates(target, block) {
                    continue;
                }
                // Back edge block -> target; walk predecessors up to the header.
                headers.push(target);
                let mut body = HashSet::from([target]);
                let mut queue = VecDeque::new();
                if body.insert(block) {
                    queue.push_back(block);
                }
                while let Some(cur) = queue.pop_front() {
                    for &pred in &self.blocks[cur].predecessors {
                        if body.insert(pred) {
                            queue.push_back(pred);
                        }
                    }
                }
                for member in body {
                    *depth.entry(member).or_default() += 1;
                }
            }
        }
        headers.sort();
        headers.dedup();
        for header in headers {
            self.blocks[header].is_loop_header = true;
        }
        for (block, d) in depth {
            self.blocks[block].loop_depth = d;
        }
    }

    pub fn start_block(&self) -> BlockId {
        BlockId::new(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reachable blocks in reverse postorder, then unreachable blocks by index.
    pub fn linear_order(&self) -> &[BlockId] {
        &self.linear_order
    }

    /// Blocks reachable from the entry, in reverse postorder.
    pub fn reachable_order(&self) -> &[BlockId] {
        &self.linear_order[..self.reachable]
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.blocks[block].order < self.reachable
    }

    /// The block whose first node is `begin`.
    pub fn block_for(&self, begin: NodeId) -> Option<BlockId> {
        self.block_of_begin.get(&begin).copied()
    }

    pub fn dominator(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block].dominator
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = Some(b);
        while let Some(block) = cur {
            if block == a {
                return true;
            }
            cur = self.blocks[block].dominator;
        }
        false
    }

    /// Nearest block dominating both `a` and `b`. Blocks outside the dominator
    /// tree meet at the entry.
    pub fn common_dominator(&self, a: BlockId, b: BlockId) -> BlockId {
        let mut ancestors = HashSet::new();
        let mut cur = Some(a);
        while let Some(block) = cur {
            ancestors.insert(block);
            cur = self.blocks[block].dominator;
        }
        let mut cur = Some(b);
        while let Some(block) = cur {
            if ancestors.contains(&block) {
                return block;
            }
            cur = self.blocks[block].dominator;
        }
        self.start_block()
    }

    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.blocks[block].loop_depth > 0
    }

    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.blocks[block].loop_depth
    }
}
