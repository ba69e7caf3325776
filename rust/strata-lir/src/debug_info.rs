//! Deoptimization state.
//!
//! [`DebugInfoBuilder::build`] turns a frame-state chain into a [`LirFrameState`]:
//! one [`FrameDescriptor`] per logical frame, innermost first with callers linked
//! through `caller`, plus descriptors for every escape-analyzed object the
//! frames reference. Virtual-object indices are local to one build.

use crate::error::LowerError;
use crate::lir::LabelRef;
use crate::variables::FrameMap;
use serde::Serialize;
use std::collections::HashMap;
use strata_core::{Constant, Kind, SecondaryMap, StackSlot, Value};
use strata_graph::{
    EscapeObjectState, FrameState, FrameStateId, Graph, NodeId, NodeKind, ObjectType,
};

/// The value of one slot in a frame or virtual object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "value", rename_all = "snake_case")]
pub enum DebugValue {
    /// Unused slot, e.g. the upper half of a two-slot local.
    Illegal,
    Constant { constant: Constant },
    Operand { operand: Value },
    /// Index into [`LirFrameState::virtual_objects`].
    VirtualObject { index: usize },
    Monitor {
        owner: Box<DebugValue>,
        lock_slot: StackSlot,
        eliminated: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameDescriptor {
    pub method: String,
    pub bci: i32,
    /// Locals, then stack slots, then locks.
    pub values: Vec<DebugValue>,
    pub num_locals: usize,
    pub num_stack: usize,
    pub num_locks: usize,
    pub rethrow_exception: bool,
    pub during_call: bool,
    pub caller: Option<Box<FrameDescriptor>>,
}

impl FrameDescriptor {
    pub fn local(&self, index: usize) -> Option<&DebugValue> {
        (index < self.num_locals).then(|| &self.values[index])
    }

    pub fn stack(&self, index: usize) -> Option<&DebugValue> {
        (index < self.num_stack).then(|| &self.values[self.num_locals + index])
    }

    pub fn lock(&self, index: usize) -> Option<&DebugValue> {
        (index < self.num_locks).then(|| &self.values[self.num_locals + self.num_stack + index])
    }

    /// Number of frames in the chain starting here.
    pub fn depth(&self) -> usize {
        1 + self.caller.as_ref().map(|c| c.depth()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualObjectDescriptor {
    pub id: usize,
    pub ty: ObjectType,
    pub values: Vec<DebugValue>,
    /// Kind of each entry of `values`.
    pub slot_kinds: Vec<Kind>,
}

/// Everything needed to deoptimize at one instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LirFrameState {
    pub frame: FrameDescriptor,
    pub virtual_objects: Vec<VirtualObjectDescriptor>,
    pub exception_edge: Option<LabelRef>,
}

/// Inputs of a build that belong to the lowering in progress.
pub struct StateContext<'a> {
    pub graph: &'a Graph,
    pub operands: &'a SecondaryMap<NodeId, Value>,
    pub frame_map: &'a mut FrameMap,
}

/// Scratch state for building frame descriptors. Cleared after every build.
#[derive(Debug, Default)]
pub struct DebugInfoBuilder {
    verify: bool,
    object_states: HashMap<NodeId, EscapeObjectState>,
    virtual_objects: HashMap<NodeId, usize>,
    /// Virtual-object nodes in index order.
    pending: Vec<NodeId>,
}

impl DebugInfoBuilder {
    pub fn new(verify: bool) -> Self {
        Self {
            verify,
            ..Self::default()
        }
    }

    pub fn build(
        &mut self,
        ctx: &mut StateContext<'_>,
        top: FrameStateId,
        exception_edge: Option<LabelRef>,
    ) -> Result<LirFrameState, LowerError> {
        let result = self.build_inner(ctx, top, exception_edge);
        self.object_states.clear();
        self.virtual_objects.clear();
        self.pending.clear();
        result
    }

    fn build_inner(
        &mut self,
        ctx: &mut StateContext<'_>,
        top: FrameStateId,
        exception_edge: Option<LabelRef>,
    ) -> Result<LirFrameState, LowerError> {
        let graph = ctx.graph;
        let chain = state_chain(graph, top)?;

        for &id in &chain {
            for mapping in &graph.frame_state(id).virtual_mappings {
                let object = mapping.object();
                if self.object_states.contains_key(&object) {
                    continue;
                }
                let self_materialized = matches!(
                    mapping,
                    EscapeObjectState::Materialized { materialized_value, .. } if *materialized_value == object
                );
                if !self_materialized {
                    self.object_states.insert(object, mapping.clone());
                }
            }
        }

        // Locks are numbered across the whole chain, outermost frame first.
        let mut lock_base = vec![0; chain.len()];
        let mut depth = 0;
        for (position, &id) in chain.iter().enumerate().rev() {
            lock_base[position] = depth;
            depth += graph.frame_state(id).locks.len();
        }

        let mut caller: Option<Box<FrameDescriptor>> = None;
        for (position, &id) in chain.iter().enumerate().rev() {
            let state = graph.frame_state(id);
            let frame = self
                .compute_frame(ctx, state, lock_base[position], caller.take())
                .map_err(|e| e.in_frame_state(id, &state.method.name, state.bci))?;
            caller = Some(Box::new(frame));
        }
        let frame = match caller {
            Some(frame) => *frame,
            None => return Err(LowerError::debug_state("empty frame-state chain")),
        };

        let virtual_objects = self.populate_virtual_objects(ctx)?;
        Ok(LirFrameState {
            frame,
            virtual_objects,
            exception_edge,
        })
    }

    fn compute_frame(
        &mut self,
        ctx: &mut StateContext<'_>,
        state: &FrameState,
        lock_base: usize,
        caller: Option<Box<FrameDescriptor>>,
    ) -> Result<FrameDescriptor, LowerError> {
        if !state.method.is_valid_bci(state.bci) {
            return Err(LowerError::debug_state(format!(
                "bci {} out of range for {} (code size {})",
                state.bci, state.method.name, state.method.code_size
            )));
        }
        let mut values =
            Vec::with_capacity(state.locals.len() + state.stack.len() + state.locks.len());
        for slot in state.locals.iter().chain(state.stack.iter()) {
            let value = match slot {
                Some(node) => self.to_value(ctx, *node)?,
                None => DebugValue::Illegal,
            };
            values.push(value);
        }
        for (i, lock) in state.locks.iter().enumerate() {
            let owner = self.to_value(ctx, lock.object)?;
            values.push(DebugValue::Monitor {
                owner: Box::new(owner),
                lock_slot: ctx.frame_map.lock_slot(lock_base + i),
                eliminated: lock.eliminated,
            });
        }
        Ok(FrameDescriptor {
            method: state.method.name.clone(),
            bci: state.bci,
            values,
            num_locals: state.locals.len(),
            num_stack: state.stack.len(),
            num_locks: state.locks.len(),
            rethrow_exception: state.rethrow_exception,
            during_call: state.during_call,
            caller,
        })
    }

    fn to_value(&mut self, ctx: &StateContext<'_>, node: NodeId) -> Result<DebugValue, LowerError> {
        let graph = ctx.graph;
        let Some(data) = graph.try_node(node) else {
            return Err(LowerError::debug_state(format!("unknown node {} in frame state", node)));
        };
        match &data.kind {
            NodeKind::VirtualObject { ty } => match self.object_states.get(&node) {
                Some(EscapeObjectState::Materialized {
                    materialized_value, ..
                }) => {
                    let value = *materialized_value;
                    self.to_value(ctx, value)
                }
                None if ty.entry_count() > 0 => Err(LowerError::debug_state(format!(
                    "no mapping found for virtual object {}",
                    graph.describe(node)
                ))),
                _ => {
                    let index = match self.virtual_objects.get(&node) {
                        Some(&index) => index,
                        None => {
                            let index = self.pending.len();
                            self.virtual_objects.insert(node, index);
                            self.pending.push(node);
                            index
                        }
                    };
                    Ok(DebugValue::VirtualObject { index })
                }
            },
            NodeKind::Constant(constant) => Ok(DebugValue::Constant {
                constant: *constant,
            }),
            _ => match ctx.operands.get(node) {
                Some(Value::Constant(constant)) => Ok(DebugValue::Constant {
                    constant: *constant,
                }),
                Some(operand) if operand.is_legal() => Ok(DebugValue::Operand { operand: *operand }),
                _ => Err(LowerError::debug_state(format!(
                    "{} has no operand",
                    graph.describe(node)
                ))),
            },
        }
    }

    /// Fills in the fields of every virtual object reached so far. Resolving a
    /// field can reach further virtual objects, which are appended and
    /// processed in turn.
    fn populate_virtual_objects(
        &mut self,
        ctx: &StateContext<'_>,
    ) -> Result<Vec<VirtualObjectDescriptor>, LowerError> {
        let mut descriptors = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let node = self.pending[index];
            let NodeKind::VirtualObject { ty } = ctx.graph.kind(node) else {
                return Err(LowerError::debug_state(format!(
                    "{} is not a virtual object",
                    ctx.graph.describe(node)
                )));
            };
            let fields = match self.object_states.get(&node) {
                Some(EscapeObjectState::Virtual { field_values, .. }) => field_values.clone(),
                _ => Vec::new(),
            };
            if fields.len() != ty.entry_count() {
                return Err(LowerError::debug_state(format!(
                    "virtual object {} of type {} has {} field values for {} entries",
                    ctx.graph.describe(node),
                    ty.name(),
                    fields.len(),
                    ty.entry_count()
                )));
            }

            let mut values = Vec::with_capacity(fields.len());
            let mut slot_kinds = Vec::with_capacity(fields.len());
            let mut previous_two_slot = false;
            for (i, field) in fields.iter().enumerate() {
                match field {
                    Some(value) => {
                        let kind = slot_kind(ctx.graph, *value);
                        values.push(self.to_value(ctx, *value)?);
                        slot_kinds.push(kind);
                        previous_two_slot = kind.needs_two_slots();
                    }
                    None if previous_two_slot => {
                        // Upper half of the preceding value.
                        previous_two_slot = false;
                    }
                    None => {
                        return Err(LowerError::debug_state(format!(
                            "entry {} of virtual object {} is missing and does not follow a two-slot value",
                            i,
                            ctx.graph.describe(node)
                        )));
                    }
                }
            }
            if self.verify {
                check_values(ty, &slot_kinds)?;
            }
            descriptors.push(VirtualObjectDescriptor {
                id: index,
                ty: ty.clone(),
                values,
                slot_kinds,
            });
            index += 1;
        }
        Ok(descriptors)
    }
}

/// The chain from `top` outwards. Cycles in `outer` links are rejected.
fn state_chain(graph: &Graph, top: FrameStateId) -> Result<Vec<FrameStateId>, LowerError> {
    let mut chain = Vec::new();
    let mut current = Some(top);
    while let Some(id) = current {
        if graph.try_frame_state(id).is_none() {
            return Err(LowerError::debug_state(format!("unknown frame state {}", id)));
        }
        if chain.contains(&id) {
            return Err(LowerError::debug_state(format!(
                "frame state {} is its own caller",
                id
            )));
        }
        chain.push(id);
        current = graph.frame_state(id).outer;
    }
    Ok(chain)
}

fn slot_kind(graph: &Graph, node: NodeId) -> Kind {
    match &graph.node(node).kind {
        NodeKind::Constant(constant) => constant.kind().stack_kind(),
        NodeKind::VirtualObject { .. } => Kind::Object,
        _ => graph.node(node).value_kind.stack_kind(),
    }
}

/// Checks entry kinds against the declared type, modulo stack-kind widening.
/// A two-slot value may fill two consecutive `int` fields.
fn check_values(ty: &ObjectType, slot_kinds: &[Kind]) -> Result<(), LowerError> {
    match ty {
        ObjectType::Instance { name, fields } => {
            let mut field_index = 0;
            for (value_index, kind) in slot_kinds.iter().enumerate() {
                let Some(field) = fields.get(field_index) else {
                    return Err(LowerError::debug_state(format!(
                        "{}: value {} has no field",
                        name, value_index
                    )));
                };
                let value_kind = kind.stack_kind();
                let field_kind = field.stack_kind();
                if value_kind.needs_two_slots() && field_kind == Kind::Int {
                    if fields.get(field_index + 1).map(|k| k.stack_kind()) != Some(Kind::Int) {
                        return Err(LowerError::debug_state(format!(
                            "{}: {} value {} spans a non-int field",
                            name, value_kind, value_index
                        )));
                    }
                    field_index += 2;
                } else if value_kind != field_kind {
                    return Err(LowerError::debug_state(format!(
                        "{}: field {} is {} but holds {}",
                        name, field_index, field_kind, value_kind
                    )));
                } else {
                    field_index += 1;
                }
            }
            if field_index != fields.len() {
                return Err(LowerError::debug_state(format!(
                    "{}: {} fields but values cover {}",
                    name,
                    fields.len(),
                    field_index
                )));
            }
        }
        ObjectType::Array { component, .. } => {
            let component_kind = component.stack_kind();
            for kind in slot_kinds {
                let ok = if component_kind == Kind::Object {
                    kind.is_object()
                } else {
                    kind.stack_kind() == component_kind
                        || (component_kind == Kind::Int && kind.needs_two_slots())
                        || (*component == Kind::Byte && kind.is_primitive())
                };
                if !ok {
                    return Err(LowerError::debug_state(format!(
                        "{}[] holds a {} entry",
                        component, kind
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Variable;
    use strata_graph::{LockEntry, MethodRef};

    struct Fixture {
        graph: Graph,
        operands: SecondaryMap<NodeId, Value>,
        frame_map: FrameMap,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                graph: Graph::new("f", vec![Kind::Int, Kind::Object]),
                operands: SecondaryMap::new(),
                frame_map: FrameMap::new(),
            }
        }

        fn bound(&mut self, kind: Kind, index: u32) -> NodeId {
            let node = self.graph.parameter(index as usize);
            self.operands
                .insert(node, Value::Variable(Variable { index, kind }));
            node
        }

        fn build(&mut self, verify: bool, top: FrameStateId) -> Result<LirFrameState, LowerError> {
            let mut ctx = StateContext {
                graph: &self.graph,
                operands: &self.operands,
                frame_map: &mut self.frame_map,
            };
            DebugInfoBuilder::new(verify).build(&mut ctx, top, None)
        }
    }

    #[test]
    fn test_counts_and_chain_depth() {
        let mut fx = Fixture::new();
        let x = fx.bound(Kind::Int, 0);
        let obj = fx.bound(Kind::Object, 1);
        let c = fx.graph.constant(Constant::Int(3));
        let outer = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("caller", 20), 5)
                .with_locals(vec![Some(obj)])
                .with_locks(vec![LockEntry {
                    object: obj,
                    eliminated: false,
                }])
                .during_call(),
        );
        let inner = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("callee", 8), 2)
                .with_locals(vec![Some(x), None, Some(c)])
                .with_stack(vec![Some(x), Some(c)])
                .with_locks(vec![LockEntry {
                    object: obj,
                    eliminated: true,
                }])
                .with_outer(outer),
        );
        let state = fx.build(true, inner).unwrap();
        let frame = &state.frame;
        assert_eq!(
            (frame.num_locals, frame.num_stack, frame.num_locks),
            (3, 2, 1)
        );
        assert_eq!(frame.depth(), 2);
        assert_eq!(frame.local(1), Some(&DebugValue::Illegal));
        assert_eq!(
            frame.local(2),
            Some(&DebugValue::Constant {
                constant: Constant::Int(3)
            })
        );
        let caller = frame.caller.as_ref().unwrap();
        assert_eq!(caller.method, "caller");
        assert!(caller.during_call);
        // The caller's lock is outermost, so it takes lock slot 0.
        match (caller.lock(0), frame.lock(0)) {
            (
                Some(DebugValue::Monitor { lock_slot: outer_slot, .. }),
                Some(DebugValue::Monitor {
                    lock_slot: inner_slot,
                    eliminated,
                    ..
                }),
            ) => {
                assert_eq!(outer_slot.offset, 0);
                assert!(inner_slot.offset > outer_slot.offset);
                assert!(*eliminated);
            }
            other => panic!("unexpected locks {:?}", other),
        }
    }

    #[test]
    fn test_virtual_objects_are_shared_and_nested() {
        let mut fx = Fixture::new();
        let x = fx.bound(Kind::Int, 0);
        let inner_obj = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Instance {
                    name: "Box".into(),
                    fields: vec![Kind::Int],
                },
            },
            Kind::Object,
        );
        let outer_obj = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Instance {
                    name: "Pair".into(),
                    fields: vec![Kind::Object, Kind::Long],
                },
            },
            Kind::Object,
        );
        let long = fx.graph.constant(Constant::Long(1 << 40));
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 0)
                .with_locals(vec![Some(outer_obj), Some(outer_obj)])
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: outer_obj,
                    field_values: vec![Some(inner_obj), Some(long)],
                })
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: inner_obj,
                    field_values: vec![Some(x)],
                }),
        );
        let built = fx.build(true, state).unwrap();
        assert_eq!(built.virtual_objects.len(), 2);
        assert_eq!(built.frame.local(0), built.frame.local(1));
        assert_eq!(
            built.virtual_objects[0].values[0],
            DebugValue::VirtualObject { index: 1 }
        );
        assert_eq!(built.virtual_objects[1].slot_kinds, vec![Kind::Int]);
    }

    #[test]
    fn test_materialized_object_resolves_to_value() {
        let mut fx = Fixture::new();
        let obj = fx.bound(Kind::Object, 1);
        let virt = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Instance {
                    name: "Box".into(),
                    fields: vec![Kind::Int],
                },
            },
            Kind::Object,
        );
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 3)
                .with_stack(vec![Some(virt)])
                .with_virtual_mapping(EscapeObjectState::Materialized {
                    object: virt,
                    materialized_value: obj,
                }),
        );
        let built = fx.build(true, state).unwrap();
        assert!(built.virtual_objects.is_empty());
        assert!(matches!(
            built.frame.stack(0),
            Some(DebugValue::Operand { .. })
        ));
    }

    #[test]
    fn test_two_slot_padding_is_compacted() {
        let mut fx = Fixture::new();
        let long = fx.graph.constant(Constant::Long(7));
        let small = fx.graph.constant(Constant::Int(1));
        let array = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Array {
                    component: Kind::Int,
                    length: 3,
                },
            },
            Kind::Object,
        );
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 1)
                .with_locals(vec![Some(array)])
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: array,
                    field_values: vec![Some(long), None, Some(small)],
                }),
        );
        let built = fx.build(true, state).unwrap();
        assert_eq!(built.virtual_objects[0].values.len(), 2);
        assert_eq!(
            built.virtual_objects[0].slot_kinds,
            vec![Kind::Long, Kind::Int]
        );
    }

    #[test]
    fn test_missing_entry_without_two_slot_predecessor_fails() {
        let mut fx = Fixture::new();
        let small = fx.graph.constant(Constant::Int(1));
        let array = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Array {
                    component: Kind::Int,
                    length: 2,
                },
            },
            Kind::Object,
        );
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 1)
                .with_locals(vec![Some(array)])
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: array,
                    field_values: vec![Some(small), None],
                }),
        );
        assert!(matches!(
            fx.build(false, state).unwrap_err(),
            LowerError::DebugState(_)
        ));
    }

    #[test]
    fn test_field_kind_mismatch_is_reported_when_verifying() {
        let mut fx = Fixture::new();
        let d = fx.graph.constant(Constant::double(1.0));
        let obj = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Instance {
                    name: "Counter".into(),
                    fields: vec![Kind::Short],
                },
            },
            Kind::Object,
        );
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 1)
                .with_locals(vec![Some(obj)])
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: obj,
                    field_values: vec![Some(d)],
                }),
        );
        assert!(fx.build(false, state).is_ok());
        assert!(matches!(
            fx.build(true, state).unwrap_err(),
            LowerError::DebugState(_)
        ));
    }

    #[test]
    fn test_sub_word_fields_unify_with_int() {
        let mut fx = Fixture::new();
        let c = fx.graph.constant(Constant::Int(9));
        let obj = fx.graph.add(
            NodeKind::VirtualObject {
                ty: ObjectType::Instance {
                    name: "Flags".into(),
                    fields: vec![Kind::Byte, Kind::Char],
                },
            },
            Kind::Object,
        );
        let state = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("m", 10), 1)
                .with_locals(vec![Some(obj)])
                .with_virtual_mapping(EscapeObjectState::Virtual {
                    object: obj,
                    field_values: vec![Some(c), Some(c)],
                }),
        );
        assert!(fx.build(true, state).is_ok());
    }

    #[test]
    fn test_bad_outer_bci_is_fatal_with_context() {
        let mut fx = Fixture::new();
        let x = fx.bound(Kind::Int, 0);
        let outer = fx
            .graph
            .add_frame_state(FrameState::new(MethodRef::new("caller", 4), 99));
        let inner = fx.graph.add_frame_state(
            FrameState::new(MethodRef::new("callee", 4), 0)
                .with_locals(vec![Some(x)])
                .with_outer(outer),
        );
        let err = fx.build(true, inner).unwrap_err();
        match &err {
            LowerError::InFrameState { state, method, .. } => {
                assert_eq!(*state, outer);
                assert_eq!(method, "caller");
            }
            other => panic!("expected frame-state context, got {:?}", other),
        }
        assert!(matches!(err.root(), LowerError::DebugState(_)));
    }

    #[test]
    fn test_unbound_value_is_reported() {
        let mut fx = Fixture::new();
        let p = fx.graph.parameter(0);
        let state = fx
            .graph
            .add_frame_state(FrameState::new(MethodRef::new("m", 4), 0).with_locals(vec![Some(p)]));
        assert!(fx.build(true, state).is_err());
    }
}
