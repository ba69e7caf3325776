//! Switch strategies.
//!
//! A multi-way branch over more than one key is lowered either to a dense jump
//! table or to a tree of compare-and-branch instructions. Three tree shapes are
//! considered:
//!
//! - *sequential*: one equality test per key, most probable key first;
//! - *ranges*: over sorted keys, runs of consecutive keys sharing a target are
//!   tested with a single range check;
//! - *binary*: binary search over sorted keys.
//!
//! Each shape is scored by its average effort, the expected number of
//! comparisons weighted by key probability. [`choose`] then weighs the best
//! tree against a jump table using the key density.

use serde::Serialize;
use strata_core::Constant;
use strata_graph::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sequential,
    Ranges,
    Binary,
}

/// One step of a lowered decision tree. Key indices refer to the strategy's
/// key list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Decision {
    Key(usize),
    Default,
    /// `if value condition keys[key] { then } else { otherwise }`
    Test {
        condition: Condition,
        key: usize,
        then: Box<Decision>,
        otherwise: Box<Decision>,
    },
}

impl Decision {
    fn test(condition: Condition, key: usize, then: Decision, otherwise: Decision) -> Decision {
        Decision::Test {
            condition,
            key,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Follows the tree for `value`: `Some(i)` selects key `i`'s target, `None`
    /// the default.
    pub fn evaluate(&self, keys: &[Constant], value: Constant) -> Option<usize> {
        let mut node = self;
        loop {
            match node {
                Decision::Key(index) => return Some(*index),
                Decision::Default => return None,
                Decision::Test {
                    condition,
                    key,
                    then,
                    otherwise,
                } => {
                    node = if compare(*condition, value, keys[*key]) {
                        then
                    } else {
                        otherwise
                    };
                }
            }
        }
    }

    /// Comparisons needed to reach key `index`.
    fn effort_for_key(&self, keys: &[Constant], index: usize) -> usize {
        let mut node = self;
        let mut effort = 0;
        loop {
            match node {
                Decision::Key(_) | Decision::Default => return effort,
                Decision::Test {
                    condition,
                    key,
                    then,
                    otherwise,
                } => {
                    effort += 1;
                    node = if compare(*condition, keys[index], keys[*key]) {
                        then
                    } else {
                        otherwise
                    };
                }
            }
        }
    }

    /// Mean number of comparisons over all paths ending in the default.
    fn default_effort(&self) -> f64 {
        fn walk(node: &Decision, depth: usize, total: &mut usize, count: &mut usize) {
            match node {
                Decision::Default => {
                    *total += depth;
                    *count += 1;
                }
                Decision::Key(_) => {}
                Decision::Test {
                    then, otherwise, ..
                } => {
                    walk(then, depth + 1, total, count);
                    walk(otherwise, depth + 1, total, count);
                }
            }
        }
        let (mut total, mut count) = (0, 0);
        walk(self, 0, &mut total, &mut count);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }
}

fn compare(condition: Condition, value: Constant, key: Constant) -> bool {
    match (value.as_long(), key.as_long()) {
        (Some(x), Some(y)) => condition.fold(x, y),
        _ => match condition {
            Condition::Eq => value == key,
            Condition::Ne => value != key,
            _ => false,
        },
    }
}

/// A decision tree for a switch, with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchStrategy {
    pub kind: StrategyKind,
    pub keys: Vec<Constant>,
    pub decision: Decision,
    pub average_effort: f64,
}

impl SwitchStrategy {
    /// Equality tests in order of decreasing probability. Works for any keys.
    pub fn sequential(keys: &[Constant], probabilities: &[f64]) -> Self {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|&a, &b| {
            probability(probabilities, b)
                .partial_cmp(&probability(probabilities, a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let decision = order.iter().rev().fold(Decision::Default, |rest, &key| {
            Decision::test(Condition::Eq, key, Decision::Key(key), rest)
        });
        Self::scored(StrategyKind::Sequential, keys, probabilities, decision)
    }

    /// Range checks over sorted integer keys. `targets[i]` identifies key `i`'s
    /// destination; adjacent keys with equal targets share one check.
    pub fn ranges(keys: &[Constant], probabilities: &[f64], targets: &[usize]) -> Self {
        let mut runs: Vec<(usize, usize)> = Vec::new();
        for index in 0..keys.len() {
            match runs.last_mut() {
                Some((_, hi))
                    if targets.get(*hi) == targets.get(index)
                        && next_key(keys[*hi]) == keys[index].as_long() =>
                {
                    *hi = index;
                }
                _ => runs.push((index, index)),
            }
        }
        let mut decision = Decision::Default;
        for (position, &(lo, hi)) in runs.iter().enumerate().rev() {
            let contiguous = position > 0 && next_key(keys[runs[position - 1].1]) == keys[lo].as_long();
            let upper = if lo == hi {
                Decision::test(Condition::Eq, lo, Decision::Key(lo), decision)
            } else {
                Decision::test(Condition::Le, hi, Decision::Key(lo), decision)
            };
            decision = if position == 0 || !contiguous {
                Decision::test(Condition::Lt, lo, Decision::Default, upper)
            } else {
                upper
            };
        }
        Self::scored(StrategyKind::Ranges, keys, probabilities, decision)
    }

    /// Binary search over sorted integer keys.
    pub fn binary(keys: &[Constant], probabilities: &[f64]) -> Self {
        fn build(lo: usize, hi: usize) -> Decision {
            if lo >= hi {
                return Decision::Default;
            }
            let mid = lo + (hi - lo) / 2;
            Decision::test(
                Condition::Eq,
                mid,
                Decision::Key(mid),
                Decision::test(Condition::Lt, mid, build(lo, mid), build(mid + 1, hi)),
            )
        }
        let decision = build(0, keys.len());
        Self::scored(StrategyKind::Binary, keys, probabilities, decision)
    }

    fn scored(kind: StrategyKind, keys: &[Constant], probabilities: &[f64], decision: Decision) -> Self {
        let key_total: f64 = (0..keys.len()).map(|i| probability(probabilities, i)).sum();
        let (key_weights, default_weight) = if key_total <= 0.0 {
            // No profile: every key and the default are equally likely.
            (vec![1.0; keys.len()], 1.0)
        } else {
            (
                (0..keys.len()).map(|i| probability(probabilities, i)).collect(),
                (1.0 - key_total).max(0.0),
            )
        };
        let mut effort = 0.0;
        for (index, weight) in key_weights.iter().enumerate() {
            effort += weight * decision.effort_for_key(keys, index) as f64;
        }
        effort += default_weight * decision.default_effort();
        let total: f64 = key_weights.iter().sum::<f64>() + default_weight;
        SwitchStrategy {
            kind,
            keys: keys.to_vec(),
            decision,
            average_effort: if total > 0.0 { effort / total } else { 0.0 },
        }
    }

    /// The strategy with the lowest average effort for sorted integer keys.
    pub fn best(keys: &[Constant], probabilities: &[f64], targets: &[usize]) -> Self {
        [
            Self::sequential(keys, probabilities),
            Self::ranges(keys, probabilities, targets),
            Self::binary(keys, probabilities),
        ]
        .into_iter()
        .fold(None::<SwitchStrategy>, |best, s| match best {
            Some(b) if b.average_effort <= s.average_effort => Some(b),
            _ => Some(s),
        })
        .unwrap_or_else(|| Self::sequential(keys, probabilities))
    }

    pub fn evaluate(&self, value: Constant) -> Option<usize> {
        self.decision.evaluate(&self.keys, value)
    }
}

fn probability(probabilities: &[f64], index: usize) -> f64 {
    probabilities.get(index).copied().unwrap_or(0.0).max(0.0)
}

fn next_key(key: Constant) -> Option<i64> {
    key.as_long().and_then(|k| k.checked_add(1))
}

/// Whether keys are integral and strictly ascending.
pub fn is_sorted_integral(keys: &[Constant]) -> bool {
    let mut previous: Option<i64> = None;
    for key in keys {
        let Some(value) = key.as_long() else {
            return false;
        };
        if previous.is_some_and(|p| p >= value) {
            return false;
        }
        previous = Some(value);
    }
    true
}

/// Lowering decision for a switch over at least two keys.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchPlan {
    Strategy(SwitchStrategy),
    /// Jump table starting at `low_key`; `slots[i]` is the key index for
    /// `low_key + i`, `None` for the default.
    Table {
        low_key: i32,
        slots: Vec<Option<usize>>,
    },
}

/// Picks between a decision tree and a jump table.
///
/// A table is chosen only for sorted `int`-range keys when the best tree costs at
/// least `effort_threshold` comparisons on average and the keys are at least
/// `1 / sqrt(effort)` dense.
pub fn choose(
    keys: &[Constant],
    probabilities: &[f64],
    targets: &[usize],
    effort_threshold: f64,
    max_table_range: u64,
) -> SwitchPlan {
    if !is_sorted_integral(keys) {
        return SwitchPlan::Strategy(SwitchStrategy::sequential(keys, probabilities));
    }
    let strategy = SwitchStrategy::best(keys, probabilities, targets);
    let (Some(min), Some(max)) = (
        keys.first().and_then(|k| k.as_int()),
        keys.last().and_then(|k| k.as_int()),
    ) else {
        return SwitchPlan::Strategy(strategy);
    };
    let range = (max as i64 - min as i64 + 1) as u64;
    let density = keys.len() as f64 / range as f64;
    let effort = strategy.average_effort;
    if effort < effort_threshold || density < 1.0 / effort.sqrt() || range > max_table_range {
        return SwitchPlan::Strategy(strategy);
    }
    let mut slots = vec![None; range as usize];
    for (index, key) in keys.iter().enumerate() {
        if let Some(value) = key.as_int() {
            slots[(value as i64 - min as i64) as usize] = Some(index);
        }
    }
    SwitchPlan::Table {
        low_key: min,
        slots,
    }
}
