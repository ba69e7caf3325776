//! Phi resolution: turning the parallel moves at a join into sequential ones.
//!
//! Each variable that appears in a move gets one node in a small arena; a move
//! `dest := src` is an edge `src -> dest`. Because every destination has exactly
//! one source, each variable has at most one incoming edge, so any cycle reached
//! from a traversal root passes through that root. Roots are the variables that
//! act as sources, processed in reverse order of their first appearance.
//!
//! A depth-first walk emits a node's own move only after the moves out of it
//! (which read its old value) have been emitted. Reaching a node that is still
//! on the walk's stack closes a cycle: the value flowing into it is saved in the
//! single temporary, and the root is finally assigned from the temporary.
//! Moves whose source is not a variable (constants, fixed registers, stack
//! slots) cannot take part in a cycle and are emitted last.

use crate::error::LowerError;
use std::collections::HashMap;
use strata_core::{Kind, Value, Variable};
use tracing::trace;

/// A single move `dest := src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub dest: Value,
    pub src: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not reached yet.
    White,
    /// On the current walk's stack.
    Gray,
    /// Finished.
    Black,
}

#[derive(Debug)]
struct ResolverNode {
    operand: Value,
    destinations: Vec<usize>,
    color: Color,
    assigned: bool,
    has_source: bool,
}

/// The temporary holding the entry value of the cycle being broken.
#[derive(Debug, Clone, Copy)]
struct CycleBreak {
    entry: usize,
    temp: Variable,
}

struct WalkFrame {
    node: usize,
    source: Option<usize>,
    next: usize,
}

/// Collects the moves of one join and orders them.
#[derive(Debug, Default)]
pub struct PhiResolver {
    nodes: Vec<ResolverNode>,
    variable_nodes: HashMap<Variable, usize>,
    /// Variable nodes that are sources, in order of first appearance.
    roots: Vec<usize>,
    /// Nodes for non-variable sources, in order of appearance.
    others: Vec<usize>,
    cycle: Option<CycleBreak>,
    moves: Vec<Move>,
}

impl PhiResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `dest := src`. `dest` must be a variable that has no other source.
    pub fn add_move(&mut self, dest: Value, src: Value) -> Result<(), LowerError> {
        if !src.is_legal() {
            return Err(LowerError::structural(format!(
                "illegal source for phi move into {}",
                dest
            )));
        }
        let Some(dest_var) = dest.as_variable() else {
            return Err(LowerError::structural(format!(
                "phi move destination {} is not a variable",
                dest
            )));
        };
        if src == dest {
            let node = self.variable_node(dest_var);
            return self.claim_destination(node, dest);
        }
        let src_node = match src.as_variable() {
            Some(var) => {
                let node = self.variable_node(var);
                if !self.roots.contains(&node) {
                    self.roots.push(node);
                }
                node
            }
            None => {
                let node = self.push_node(src);
                self.others.push(node);
                node
            }
        };
        let dest_node = self.variable_node(dest_var);
        self.claim_destination(dest_node, dest)?;
        self.nodes[src_node].destinations.push(dest_node);
        Ok(())
    }

    fn claim_destination(&mut self, node: usize, dest: Value) -> Result<(), LowerError> {
        if self.nodes[node].has_source {
            return Err(LowerError::structural(format!(
                "phi destination {} assigned twice",
                dest
            )));
        }
        self.nodes[node].has_source = true;
        Ok(())
    }

    fn push_node(&mut self, operand: Value) -> usize {
        self.nodes.push(ResolverNode {
            operand,
            destinations: Vec::new(),
            color: Color::White,
            assigned: false,
            has_source: false,
        });
        self.nodes.len() - 1
    }

    fn variable_node(&mut self, var: Variable) -> usize {
        if let Some(&node) = self.variable_nodes.get(&var) {
            return node;
        }
        let node = self.push_node(Value::Variable(var));
        self.variable_nodes.insert(var, node);
        node
    }

    /// Orders the recorded moves. `new_temp` supplies the temporary for a cycle.
    pub fn resolve(
        mut self,
        mut new_temp: impl FnMut(Kind) -> Variable,
    ) -> Result<Vec<Move>, LowerError> {
        for i in (0..self.roots.len()).rev() {
            let root = self.roots[i];
            if self.nodes[root].color == Color::White {
                self.walk(root, &mut new_temp)?;
                if self.cycle.is_some() {
                    return Err(LowerError::structural(
                        "phi cycle left without restoring its temporary",
                    ));
                }
            }
        }
        for i in (0..self.others.len()).rev() {
            let node = self.others[i];
            let src = self.nodes[node].operand;
            for j in (0..self.nodes[node].destinations.len()).rev() {
                let dest = self.nodes[node].destinations[j];
                self.emit(self.nodes[dest].operand, src);
            }
        }
        Ok(self.moves)
    }

    fn walk(
        &mut self,
        root: usize,
        new_temp: &mut impl FnMut(Kind) -> Variable,
    ) -> Result<(), LowerError> {
        self.nodes[root].color = Color::Gray;
        let mut stack = vec![WalkFrame {
            node: root,
            source: None,
            next: self.nodes[root].destinations.len(),
        }];
        while let Some(frame) = stack.last_mut() {
            if frame.next == 0 {
                let WalkFrame { node, source, .. } = *frame;
                stack.pop();
                self.nodes[node].color = Color::Black;
                self.assign(node, source);
                continue;
            }
            frame.next -= 1;
            let node = frame.node;
            let dest = self.nodes[node].destinations[frame.next];
            match self.nodes[dest].color {
                Color::White => {
                    self.nodes[dest].color = Color::Gray;
                    stack.push(WalkFrame {
                        node: dest,
                        source: Some(node),
                        next: self.nodes[dest].destinations.len(),
                    });
                }
                Color::Gray => self.break_cycle(dest, node, new_temp)?,
                Color::Black => self.assign(dest, Some(node)),
            }
        }
        Ok(())
    }

    /// `entry` is on the stack and `source` flows into it: save `source`.
    fn break_cycle(
        &mut self,
        entry: usize,
        source: usize,
        new_temp: &mut impl FnMut(Kind) -> Variable,
    ) -> Result<(), LowerError> {
        if let Some(active) = self.cycle {
            return Err(LowerError::structural(format!(
                "second phi cycle through {} while {} still holds {}",
                self.nodes[entry].operand, active.temp.index, self.nodes[active.entry].operand
            )));
        }
        let src = self.nodes[source].operand;
        let temp = new_temp(src.kind());
        trace!(temp = temp.index, entry = %self.nodes[entry].operand, "breaking phi cycle");
        self.emit(Value::Variable(temp), src);
        self.cycle = Some(CycleBreak { entry, temp });
        Ok(())
    }

    fn assign(&mut self, dest: usize, source: Option<usize>) {
        if self.nodes[dest].assigned {
            return;
        }
        match self.cycle {
            Some(cycle) if cycle.entry == dest => {
                self.cycle = None;
                self.emit(self.nodes[dest].operand, Value::Variable(cycle.temp));
                self.nodes[dest].assigned = true;
            }
            _ => {
                if let Some(source) = source {
                    self.emit(self.nodes[dest].operand, self.nodes[source].operand);
                    self.nodes[dest].assigned = true;
                }
            }
        }
    }

    fn emit(&mut self, dest: Value, src: Value) {
        self.moves.push(Move { dest, src });
    }
}
