//! Property-based tests for phi move ordering and switch lowering.
//!
//! Phi moves are checked by replaying the sequential moves and comparing with
//! the parallel assignment they implement. Switch plans are checked by
//! dispatching every value around the key range.

use proptest::prelude::*;
use std::collections::HashMap;
use strata_core::{Constant, Kind, Value, Variable};
use strata_lir::switch::{self, SwitchPlan};
use strata_lir::{Move, PhiResolver};

fn var(index: u32) -> Value {
    Value::Variable(Variable {
        index,
        kind: Kind::Int,
    })
}

/// Source of each destination variable `i`: another variable, a constant, or
/// nothing.
#[derive(Debug, Clone)]
enum Source {
    Variable(u32),
    Constant(i32),
}

fn parallel_moves() -> impl Strategy<Value = Vec<(Value, Value)>> {
    prop::collection::vec(
        prop::option::of(prop_oneof![
            4 => (0u32..8).prop_map(Source::Variable),
            1 => any::<i32>().prop_map(Source::Constant),
        ]),
        1..8,
    )
    .prop_map(|sources| {
        sources
            .into_iter()
            .enumerate()
            .filter_map(|(dest, source)| {
                let src = match source? {
                    Source::Variable(v) => var(v),
                    Source::Constant(c) => Value::Constant(Constant::Int(c)),
                };
                Some((var(dest as u32), src))
            })
            .collect()
    })
}

fn replay(moves: &[Move]) -> HashMap<Value, Value> {
    let mut state: HashMap<Value, Value> = HashMap::new();
    for m in moves {
        let value = state.get(&m.src).copied().unwrap_or(m.src);
        state.insert(m.dest, value);
    }
    state
}

fn dispatch(plan: &SwitchPlan, value: i32) -> Option<usize> {
    match plan {
        SwitchPlan::Table { low_key, slots } => {
            let index = value as i64 - *low_key as i64;
            if (0..slots.len() as i64).contains(&index) {
                slots[index as usize]
            } else {
                None
            }
        }
        SwitchPlan::Strategy(strategy) => strategy.evaluate(Constant::Int(value)),
    }
}

proptest! {
    #[test]
    fn phi_moves_implement_the_parallel_assignment(pairs in parallel_moves()) {
        let mut resolver = PhiResolver::new();
        for &(dest, src) in &pairs {
            resolver.add_move(dest, src).unwrap();
        }
        let mut temps = Vec::new();
        let moves = resolver
            .resolve(|kind| {
                let temp = Variable { index: 100 + temps.len() as u32, kind };
                temps.push(temp);
                temp
            })
            .unwrap();

        let state = replay(&moves);
        for &(dest, src) in &pairs {
            prop_assert_eq!(state.get(&dest).copied().unwrap_or(dest), src);
        }
        // Only destinations and temporaries are written.
        for m in &moves {
            let is_temp = m.dest.as_variable().is_some_and(|v| temps.contains(&v));
            prop_assert!(is_temp || pairs.iter().any(|(d, _)| *d == m.dest));
        }
        let real_moves = pairs.iter().filter(|(d, s)| d != s).count();
        prop_assert!(moves.len() <= real_moves + 2 * temps.len());
    }

    #[test]
    fn switch_plans_dispatch_like_a_lookup(
        keys in prop::collection::btree_set(-60i32..60, 2..24),
        target_seed in prop::collection::vec(0usize..4, 24),
        threshold in prop_oneof![Just(0.0f64), Just(4.0), Just(100.0)],
    ) {
        let keys: Vec<i32> = keys.into_iter().collect();
        let constants: Vec<Constant> = keys.iter().map(|&k| Constant::Int(k)).collect();
        let targets: Vec<usize> = target_seed[..keys.len()].to_vec();
        let plan = switch::choose(&constants, &[], &targets, threshold, 1 << 16);

        for value in -64..64 {
            let expected = keys.iter().position(|&k| k == value).map(|i| targets[i]);
            let actual = dispatch(&plan, value).map(|i| targets[i]);
            prop_assert_eq!(actual, expected, "value {}", value);
        }
    }
}
