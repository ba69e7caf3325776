//! Per-node lowering.
//!
//! The driver calls [`NodeLowering::peephole`] first, giving a lowering the
//! chance to fuse a node with the nodes scheduled after it, and falls back to
//! [`NodeLowering::lower`]. [`StandardLowering`] handles every [`NodeKind`].

use crate::error::LowerError;
use crate::generator::LirGenerator;
use crate::lir::LirOp;
use strata_core::{Constant, Kind, Value};
use strata_graph::{Condition, NodeId, NodeKind};

pub trait NodeLowering {
    /// Lowers `node` together with some of `following`, the nodes scheduled
    /// after it in the same block. Returns `false` if nothing was done.
    fn peephole(
        &mut self,
        _gen: &mut LirGenerator<'_>,
        _node: NodeId,
        _following: &[NodeId],
    ) -> Result<bool, LowerError> {
        Ok(false)
    }

    /// Emits the instructions for `node` and binds its operand if it produces a
    /// value.
    fn lower(&mut self, gen: &mut LirGenerator<'_>, node: NodeId) -> Result<(), LowerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardLowering;

impl NodeLowering for StandardLowering {
    fn peephole(
        &mut self,
        gen: &mut LirGenerator<'_>,
        node: NodeId,
        following: &[NodeId],
    ) -> Result<bool, LowerError> {
        if !gen.options().implicit_null_checks {
            return Ok(false);
        }
        let graph = gen.graph();
        let NodeKind::Guard {
            condition,
            negated: true,
            ..
        } = graph.kind(node)
        else {
            return Ok(false);
        };
        let NodeKind::IsNull { object } = graph.kind(*condition) else {
            return Ok(false);
        };
        let Some(&access) = following.first() else {
            return Ok(false);
        };
        let (accessed, displacement) = match graph.kind(access) {
            NodeKind::Read {
                object,
                displacement,
            }
            | NodeKind::Write {
                object,
                displacement,
                ..
            } => (*object, *displacement),
            _ => return Ok(false),
        };
        if accessed != *object || !gen.target().is_implicit_null_check_offset(displacement) {
            return Ok(false);
        }
        let state = gen.require_state(None, None)?;
        tracing::trace!(guard = %node, access = %access, "fusing null check into access");
        gen.fuse_null_check(access, state);
        Ok(true)
    }

    fn lower(&mut self, gen: &mut LirGenerator<'_>, node: NodeId) -> Result<(), LowerError> {
        let graph = gen.graph();
        let data = graph.node(node);
        match &data.kind {
            NodeKind::Start
            | NodeKind::Begin
            | NodeKind::Merge { .. }
            | NodeKind::Constant(_)
            | NodeKind::Compare { .. }
            | NodeKind::IsNull { .. }
            | NodeKind::VirtualObject { .. } => Ok(()),

            NodeKind::Parameter { index } => Err(LowerError::structural(format!(
                "parameter {} was not bound by the prologue",
                index
            ))),

            NodeKind::Phi { .. } => gen.operand_for_phi(node).map(|_| ()),

            NodeKind::End { merge } => {
                gen.move_to_phi(*merge, node)?;
                let target = gen.label_for(*merge)?;
                gen.emit(LirOp::Jump { target });
                Ok(())
            }
            NodeKind::LoopEnd { merge } => {
                gen.check_loop_end_locks(*merge)?;
                gen.move_to_phi(*merge, node)?;
                let target = gen.label_for(*merge)?;
                gen.emit(LirOp::Jump { target });
                Ok(())
            }

            NodeKind::Arithmetic { op, x, y } => {
                let x = gen.operand(*x)?;
                let x = gen.load(x);
                let y = gen.operand(*y)?;
                let y = gen.load_non_constant(y);
                let result = Value::Variable(gen.new_variable(data.value_kind));
                gen.emit(LirOp::Arithmetic {
                    op: *op,
                    result,
                    x,
                    y,
                });
                gen.set_result(node, result)
            }
            NodeKind::Negate { value } => {
                let input = gen.operand(*value)?;
                let input = gen.load(input);
                let result = Value::Variable(gen.new_variable(data.value_kind));
                gen.emit(LirOp::Negate { result, input });
                gen.set_result(node, result)
            }
            NodeKind::Conditional {
                condition,
                true_value,
                false_value,
            } => gen.emit_conditional(node, *condition, *true_value, *false_value),

            NodeKind::If {
                condition,
                true_successor,
                false_successor,
                ..
            } => {
                let true_target = gen.label_for(*true_successor)?;
                let false_target = gen.label_for(*false_successor)?;
                gen.emit_branch(*condition, true_target, false_target)
            }
            NodeKind::Switch {
                value,
                keys,
                key_successors,
                key_probabilities,
                default_successor,
                successors,
            } => {
                let labels = successors
                    .iter()
                    .map(|s| gen.label_for(*s))
                    .collect::<Result<Vec<_>, _>>()?;
                let label = |index: usize| {
                    labels.get(index).copied().ok_or_else(|| {
                        LowerError::structural(format!(
                            "switch successor {} out of {}",
                            index,
                            labels.len()
                        ))
                    })
                };
                let key_targets = key_successors
                    .iter()
                    .map(|&i| label(i))
                    .collect::<Result<Vec<_>, _>>()?;
                let default = label(*default_successor)?;
                gen.emit_switch(*value, keys, &key_targets, key_probabilities, default)
            }
            NodeKind::Return { result } => {
                if !gen.held_locks().is_empty() {
                    return Err(LowerError::UnbalancedMonitors(format!(
                        "return with {} locks held",
                        gen.held_locks().len()
                    )));
                }
                let input = match result {
                    Some(value) => {
                        let value_kind = graph.node(*value).value_kind;
                        let location = gen.target().return_location(value_kind);
                        let operand = gen.operand(*value)?;
                        gen.emit_move(location, operand);
                        location
                    }
                    None => Value::Illegal,
                };
                gen.emit(LirOp::Return { input });
                Ok(())
            }

            NodeKind::Invoke {
                target,
                arguments,
                state_during,
                next,
                exception_edge,
            } => {
                let mut values = Vec::with_capacity(arguments.len());
                for &argument in arguments {
                    values.push(gen.operand(argument)?);
                }
                let kinds: Vec<_> = values.iter().map(|v| v.kind()).collect();
                let cc = gen.target().calling_convention(&kinds, false);
                gen.reserve_outgoing(cc.stack_size);
                for (location, value) in cc.arguments.iter().zip(values) {
                    gen.emit_move(*location, value);
                }
                let exception_label = exception_edge.map(|e| gen.label_for(e)).transpose()?;
                let state = match gen.state_for(*state_during) {
                    Some(state) => Some(gen.debug_state(state, exception_label)?),
                    None if exception_label.is_some() => {
                        return Err(LowerError::structural(
                            "invoke with an exception edge has no frame state",
                        ))
                    }
                    None => None,
                };
                let result = gen.target().return_location(data.value_kind);
                gen.emit_with_state(
                    LirOp::Call {
                        target: target.clone(),
                        result,
                        arguments: cc.arguments,
                    },
                    state,
                );
                if result.is_legal() {
                    let variable = gen.new_variable(data.value_kind);
                    gen.emit_move(variable, result);
                    gen.set_result(node, variable)?;
                }
                if exception_edge.is_some() {
                    let Some(next) = next else {
                        return Err(LowerError::structural(
                            "invoke with an exception edge has no normal successor",
                        ));
                    };
                    let target = gen.label_for(*next)?;
                    gen.emit(LirOp::Jump { target });
                }
                Ok(())
            }

            NodeKind::Guard {
                condition,
                negated,
                reason,
            } => {
                let (negated, reason) = (*negated, *reason);
                match graph.kind(*condition) {
                    NodeKind::IsNull { object } if negated => {
                        let state = gen.require_state(None, None)?;
                        let object = gen.operand(*object)?;
                        let object = gen.load(object);
                        gen.emit_with_state(LirOp::NullCheck { object }, Some(state));
                    }
                    NodeKind::IsNull { object } => {
                        let state = gen.require_state(None, None)?;
                        let object = gen.operand(*object)?;
                        let object = gen.load(object);
                        gen.emit_with_state(
                            LirOp::DeoptimizeIf {
                                condition: Condition::Ne,
                                unordered_is_true: false,
                                x: object,
                                y: Value::Constant(Constant::Null),
                                reason,
                            },
                            Some(state),
                        );
                    }
                    NodeKind::Compare {
                        condition: cond,
                        x,
                        y,
                        unordered_is_true,
                    } => {
                        let state = gen.require_state(None, None)?;
                        let x = gen.operand(*x)?;
                        let x = gen.load(x);
                        let y = gen.operand(*y)?;
                        let y = gen.load_non_constant(y);
                        // Deoptimize when the guarded condition fails.
                        let (condition, unordered_is_true) = if negated {
                            (*cond, *unordered_is_true)
                        } else {
                            (cond.negate(), !*unordered_is_true)
                        };
                        gen.emit_with_state(
                            LirOp::DeoptimizeIf {
                                condition,
                                unordered_is_true,
                                x,
                                y,
                                reason,
                            },
                            Some(state),
                        );
                    }
                    NodeKind::Constant(constant) => {
                        let holds = constant
                            .as_boolean()
                            .or_else(|| constant.as_long().map(|v| v != 0))
                            .ok_or_else(|| {
                                LowerError::unsupported(format!("guard on {}", constant))
                            })?;
                        if holds == negated {
                            let state = gen.require_state(None, None)?;
                            gen.emit_with_state(LirOp::Deoptimize { reason }, Some(state));
                        }
                    }
                    _ => {
                        return Err(LowerError::unsupported(format!(
                            "guard on {}",
                            graph.describe(*condition)
                        )))
                    }
                }
                Ok(())
            }
            NodeKind::Deoptimize { reason } => {
                let state = gen.require_state(data.state_after, None)?;
                gen.emit_with_state(LirOp::Deoptimize { reason: *reason }, Some(state));
                Ok(())
            }

            NodeKind::MonitorEnter { object, eliminated } => {
                let slot = gen.enter_lock(*object, *eliminated);
                if !*eliminated {
                    let owner = gen.operand(*object)?;
                    let owner = gen.load(owner);
                    let lock = Value::Variable(gen.new_variable(Kind::Long));
                    gen.emit(LirOp::LockAddress { result: lock, slot });
                    let state = match gen.state_for(None) {
                        Some(state) => Some(gen.debug_state(state, None)?),
                        None => None,
                    };
                    gen.emit_with_state(
                        LirOp::MonitorEnter {
                            object: owner,
                            lock,
                        },
                        state,
                    );
                }
                Ok(())
            }
            NodeKind::MonitorExit { object, eliminated } => {
                let slot = gen.exit_lock(*object)?;
                if !*eliminated {
                    let owner = gen.operand(*object)?;
                    let owner = gen.load(owner);
                    let lock = Value::Variable(gen.new_variable(Kind::Long));
                    gen.emit(LirOp::LockAddress { result: lock, slot });
                    gen.emit(LirOp::MonitorExit {
                        object: owner,
                        lock,
                    });
                }
                Ok(())
            }

            NodeKind::Read {
                object,
                displacement,
            } => {
                let state = gen.take_null_check(node);
                let base = gen.operand(*object)?;
                let base = gen.load(base);
                let result = Value::Variable(gen.new_variable(data.value_kind));
                gen.emit_with_state(
                    LirOp::Load {
                        result,
                        base,
                        displacement: *displacement,
                        null_check: state.is_some(),
                    },
                    state,
                );
                gen.set_result(node, result)
            }
            NodeKind::Write {
                object,
                displacement,
                value,
            } => {
                let state = gen.take_null_check(node);
                let base = gen.operand(*object)?;
                let base = gen.load(base);
                let input = gen.operand(*value)?;
                let input = gen.load_non_constant(input);
                gen.emit_with_state(
                    LirOp::Store {
                        base,
                        displacement: *displacement,
                        input,
                        null_check: state.is_some(),
                    },
                    state,
                );
                Ok(())
            }
        }
    }
}
