//! Lowering errors.
//!
//! Every failure is fatal for the compilation: there is no local recovery. Errors
//! pick up context (node, block, frame state) as they propagate outwards.

use strata_graph::{BlockId, FrameStateId, NodeId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LowerError {
    /// An invariant of the input graph or of the engine itself does not hold.
    #[error("structural violation: {0}")]
    Structural(String),

    /// A node or construct the active lowering does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed frame-state chain or virtual-object description.
    #[error("debug-state inconsistency: {0}")]
    DebugState(String),

    /// Locking that cannot be described by the lock stack. The method should be
    /// excluded from optimized compilation.
    #[error("unbalanced monitors: {0}")]
    UnbalancedMonitors(String),

    #[error("invalid lowering options: {0}")]
    Config(#[from] toml::de::Error),

    #[error("while lowering {description}: {source}")]
    InNode {
        node: NodeId,
        description: String,
        source: Box<LowerError>,
    },

    #[error("in block {block}: {source}")]
    InBlock {
        block: BlockId,
        source: Box<LowerError>,
    },

    #[error("in frame state {state} ({method} @ {bci}): {source}")]
    InFrameState {
        state: FrameStateId,
        method: String,
        bci: i32,
        source: Box<LowerError>,
    },
}

impl LowerError {
    pub fn structural(message: impl Into<String>) -> Self {
        LowerError::Structural(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        LowerError::Unsupported(message.into())
    }

    pub fn debug_state(message: impl Into<String>) -> Self {
        LowerError::DebugState(message.into())
    }

    pub fn in_node(self, node: NodeId, description: impl Into<String>) -> Self {
        LowerError::InNode {
            node,
            description: description.into(),
            source: Box::new(self),
        }
    }

    pub fn in_block(self, block: BlockId) -> Self {
        LowerError::InBlock {
            block,
            source: Box::new(self),
        }
    }

    pub fn in_frame_state(self, state: FrameStateId, method: &str, bci: i32) -> Self {
        LowerError::InFrameState {
            state,
            method: method.to_string(),
            bci,
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed.
    pub fn root(&self) -> &LowerError {
        match self {
            LowerError::InNode { source, .. }
            | LowerError::InBlock { source, .. }
            | LowerError::InFrameState { source, .. } => source.root(),
            other => other,
        }
    }

    /// The innermost node this error was attributed to.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            LowerError::InNode { node, source, .. } => source.node().or(Some(*node)),
            LowerError::InBlock { source, .. } | LowerError::InFrameState { source, .. } => {
                source.node()
            }
            _ => None,
        }
    }

    /// Whether the failure excludes the method from optimization rather than
    /// indicating a bug in an upstream stage.
    pub fn is_bailout(&self) -> bool {
        matches!(self.root(), LowerError::UnbalancedMonitors(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::EntityRef;

    #[test]
    fn test_context_layers_unwrap_to_root() {
        let err = LowerError::structural("operand cannot be set twice")
            .in_node(NodeId::new(4), "n4|Arithmetic")
            .in_block(BlockId::new(2));
        assert!(matches!(err.root(), LowerError::Structural(_)));
        assert_eq!(err.node(), Some(NodeId::new(4)));
        let text = err.to_string();
        assert!(text.contains("B2"), "{}", text);
        assert!(text.contains("n4|Arithmetic"), "{}", text);
        assert!(!err.is_bailout());
    }

    #[test]
    fn test_bailout_classification() {
        let err = LowerError::UnbalancedMonitors("exit without enter".into())
            .in_block(BlockId::new(0));
        assert!(err.is_bailout());
    }
}
