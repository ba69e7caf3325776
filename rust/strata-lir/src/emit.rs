//! LIR serialization to JSON for tooling and golden tests.

use crate::lir::Lir;

/// Pretty-printed JSON.
pub fn emit_json(lir: &Lir) -> serde_json::Result<String> {
    serde_json::to_string_pretty(lir)
}

/// Compact JSON, stable across runs for the same input.
pub fn emit_canonical_json(lir: &Lir) -> serde_json::Result<String> {
    serde_json::to_string(lir)
}
