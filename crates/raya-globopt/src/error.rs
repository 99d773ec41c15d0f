//! Optimizer errors

use serde::Serialize;

use crate::func::phase::CompilePhase;

/// Why a compilation was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum AbandonReason {
    #[error("too many instructions ({count} > {limit})")]
    TooManyInstructions { count: usize, limit: usize },
    #[error("too many loops")]
    TooManyLoops,
    #[error("unwind info too large ({size} bytes)")]
    UnwindInfoTooLarge { size: usize },
}

/// Errors from the global optimizer
#[derive(Debug, thiserror::Error)]
pub enum GlobOptError {
    /// The function runs unoptimized instead
    #[error("Compilation abandoned: {reason}")]
    AbandonCompilation { reason: AbandonReason },
    #[error("Inlinee slot {slot} read while the inline-args optimization is on")]
    InlineArgsOptEnabled { slot: &'static str },
    #[error("Policy {policy} read before it was decided")]
    PolicyNotDecided { policy: &'static str },
    #[error("Phase order violated: at {expected}, asked for {found}")]
    PhaseOrder { expected: CompilePhase, found: CompilePhase },
    #[error("Malformed flow graph: {0}")]
    MalformedFlowGraph(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl GlobOptError {
    pub fn abandon(reason: AbandonReason) -> Self {
        GlobOptError::AbandonCompilation { reason }
    }

    /// Whether the caller should fall back to unoptimized execution
    pub fn is_abandon(&self) -> bool {
        matches!(self, GlobOptError::AbandonCompilation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = GlobOptError::abandon(AbandonReason::TooManyInstructions { count: 10, limit: 5 });
        assert!(err.is_abandon());
        assert_eq!(
            err.to_string(),
            "Compilation abandoned: too many instructions (10 > 5)"
        );
        let err = GlobOptError::PhaseOrder {
            expected: CompilePhase::Lowered,
            found: CompilePhase::Built,
        };
        assert!(!err.is_abandon());
        assert_eq!(err.to_string(), "Phase order violated: at Lowered, asked for Built");
    }
}
