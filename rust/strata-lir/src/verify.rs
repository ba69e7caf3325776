//! Structural checks on finished LIR.

use crate::error::LowerError;
use crate::lir::{LabelRef, Lir, LirOp};
use strata_graph::{BlockId, ControlFlowGraph};

/// Checks that every operand is legal, every block ends in a control transfer
/// and every label refers to a successor of the block it appears in.
pub fn verify_lir(lir: &Lir, cfg: &ControlFlowGraph) -> Result<(), LowerError> {
    for block in &lir.blocks {
        match block.instructions.first().map(|i| &i.op) {
            Some(LirOp::Label { block: id }) if *id == block.id => {}
            _ => {
                return Err(LowerError::structural(format!(
                    "block {} does not start with its label",
                    block.id
                )))
            }
        }
        if !block
            .instructions
            .last()
            .is_some_and(|i| i.op.is_control_transfer())
        {
            return Err(LowerError::structural(format!(
                "block {} does not end in a control transfer",
                block.id
            )));
        }
        for inst in &block.instructions {
            for value in inst.op.inputs() {
                if !value.is_legal() {
                    return Err(LowerError::structural(format!(
                        "illegal input in {} of block {}: {}",
                        inst.slot, block.id, inst.op
                    )));
                }
            }
            let void_call = matches!(inst.op, LirOp::Call { .. });
            for value in inst.op.outputs() {
                if !value.is_legal() && !void_call {
                    return Err(LowerError::structural(format!(
                        "illegal output in {} of block {}: {}",
                        inst.slot, block.id, inst.op
                    )));
                }
            }
            for label in inst.op.targets() {
                check_label(cfg, block.id, label)?;
            }
            if let Some(edge) = inst.state.as_ref().and_then(|s| s.exception_edge) {
                check_label(cfg, block.id, edge)?;
            }
        }
    }
    Ok(())
}

fn check_label(cfg: &ControlFlowGraph, block: BlockId, label: LabelRef) -> Result<(), LowerError> {
    let successors = &cfg.block(block).successors;
    if label.from != block || successors.get(label.successor_index) != Some(&label.target) {
        return Err(LowerError::structural(format!(
            "label {} in block {} is not successor {} of the block",
            label.target, block, label.successor_index
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{LirBlock, LirInstruction, SlotId};
    use strata_core::{EntityRef, Kind, Value, Variable};
    use strata_graph::{BlockSpec, NodeId};

    fn cfg() -> ControlFlowGraph {
        ControlFlowGraph::new(vec![
            BlockSpec::new(vec![NodeId::new(0)], vec![1]),
            BlockSpec::new(vec![NodeId::new(1)], vec![]),
        ])
        .unwrap()
    }

    fn lir(ops: Vec<Vec<LirOp>>) -> Lir {
        let mut slot = 0;
        let blocks = ops
            .into_iter()
            .enumerate()
            .map(|(i, ops)| LirBlock {
                id: BlockId::new(i as u32),
                instructions: ops
                    .into_iter()
                    .map(|op| {
                        slot += 1;
                        LirInstruction {
                            slot: SlotId::new(slot),
                            op,
                            state: None,
                        }
                    })
                    .collect(),
            })
            .collect();
        Lir {
            method: "m".into(),
            blocks,
            has_arg_in_caller_frame: false,
            variable_count: 1,
            frame_size: 0,
            constant_loads: vec![],
        }
    }

    fn b(i: u32) -> BlockId {
        BlockId::new(i)
    }

    #[test]
    fn test_well_formed_lir_passes() {
        let jump = LirOp::Jump {
            target: LabelRef {
                from: b(0),
                successor_index: 0,
                target: b(1),
            },
        };
        let lir = lir(vec![
            vec![LirOp::Label { block: b(0) }, jump],
            vec![
                LirOp::Label { block: b(1) },
                LirOp::Return {
                    input: Value::Illegal,
                },
            ],
        ]);
        verify_lir(&lir, &cfg()).unwrap();
    }

    #[test]
    fn test_missing_terminator_fails() {
        let v = Value::Variable(Variable {
            index: 0,
            kind: Kind::Int,
        });
        let lir = lir(vec![vec![
            LirOp::Label { block: b(0) },
            LirOp::Move {
                result: v,
                input: Value::Constant(strata_core::Constant::Int(1)),
            },
        ]]);
        assert!(verify_lir(&lir, &cfg()).is_err());
    }

    #[test]
    fn test_jump_to_non_successor_fails() {
        let lir = lir(vec![
            vec![LirOp::Label { block: b(0) }, LirOp::Jump {
                target: LabelRef {
                    from: b(0),
                    successor_index: 0,
                    target: b(0),
                },
            }],
        ]);
        assert!(verify_lir(&lir, &cfg()).is_err());
    }

    #[test]
    fn test_illegal_input_fails() {
        let lir = lir(vec![vec![
            LirOp::Label { block: b(0) },
            LirOp::NullCheck {
                object: Value::Illegal,
            },
            LirOp::Return {
                input: Value::Illegal,
            },
        ]]);
        let err = verify_lir(&lir, &cfg()).unwrap_err();
        assert!(err.to_string().contains("illegal input"));
    }
}
