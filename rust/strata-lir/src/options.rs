//! Lowering options.
//!
//! Options are plain data with serde defaults so that a partial TOML table
//! overrides only what it names:
//!
//! ```toml
//! switch_effort_threshold = 3.0
//! place_constant_loads_outside_loops = false
//! ```

use crate::error::LowerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringOptions {
    /// Hoist relocated constant loads to the closest dominator outside any loop.
    pub place_constant_loads_outside_loops: bool,
    /// How many instructions before the end of a block are searched for an
    /// instruction with an exception edge when placing constant loads.
    pub exception_edge_lookback: usize,
    /// Average number of comparisons below which a decision tree always beats a
    /// jump table.
    pub switch_effort_threshold: f64,
    /// Largest key range a jump table may cover.
    pub max_table_switch_range: u64,
    /// Fuse a null-check guard into the memory access that follows it.
    pub implicit_null_checks: bool,
    /// Check virtual-object field kinds against their declared types.
    pub verify_debug_info: bool,
    /// Run the LIR verifier on the finished method.
    pub verify_lir: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            place_constant_loads_outside_loops: true,
            exception_edge_lookback: 3,
            switch_effort_threshold: 4.0,
            max_table_switch_range: 1 << 16,
            implicit_null_checks: true,
            verify_debug_info: cfg!(debug_assertions),
            verify_lir: cfg!(debug_assertions),
        }
    }
}

impl LoweringOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, LowerError> {
        Ok(toml::from_str(s)?)
    }
}
