//! Compile phases
//!
//! A function moves through the backend phases in order. Several queries
//! (is the flow graph still valid, has lowering happened) follow from the
//! current phase instead of being tracked separately.

use serde::{Deserialize, Serialize};

use crate::error::GlobOptError;

/// Backend phase a function has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompilePhase {
    Built,
    FlowGraphBuilt,
    GlobOptDone,
    Lowered,
    RegAllocated,
    Peeped,
    LaidOut,
    FinalLowered,
}

impl CompilePhase {
    /// The flow graph is only maintained until lowering
    pub fn is_flow_graph_valid(&self) -> bool {
        matches!(self, CompilePhase::FlowGraphBuilt | CompilePhase::GlobOptDone)
    }

    pub fn is_post_glob_opt(&self) -> bool {
        *self >= CompilePhase::GlobOptDone
    }

    pub fn is_post_lower(&self) -> bool {
        *self >= CompilePhase::Lowered
    }

    pub fn is_post_reg_alloc(&self) -> bool {
        *self >= CompilePhase::RegAllocated
    }

    pub fn is_post_layout(&self) -> bool {
        *self >= CompilePhase::LaidOut
    }
}

impl std::fmt::Display for CompilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Move from `current` to `next`; staying put is allowed
pub fn advance(current: CompilePhase, next: CompilePhase) -> Result<CompilePhase, GlobOptError> {
    if next < current {
        return Err(GlobOptError::PhaseOrder {
            expected: current,
            found: next,
        });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_queries() {
        assert!(!CompilePhase::Built.is_flow_graph_valid());
        assert!(CompilePhase::FlowGraphBuilt.is_flow_graph_valid());
        assert!(CompilePhase::GlobOptDone.is_flow_graph_valid());
        assert!(!CompilePhase::Lowered.is_flow_graph_valid());
        assert!(CompilePhase::Lowered.is_post_lower());
        assert!(!CompilePhase::GlobOptDone.is_post_lower());
        assert!(CompilePhase::FinalLowered.is_post_layout());
    }

    #[test]
    fn test_advance_rejects_going_back() {
        assert_eq!(
            advance(CompilePhase::Built, CompilePhase::GlobOptDone).unwrap(),
            CompilePhase::GlobOptDone
        );
        assert_eq!(
            advance(CompilePhase::Lowered, CompilePhase::Lowered).unwrap(),
            CompilePhase::Lowered
        );
        assert!(matches!(
            advance(CompilePhase::Lowered, CompilePhase::GlobOptDone),
            Err(GlobOptError::PhaseOrder {
                expected: CompilePhase::Lowered,
                found: CompilePhase::GlobOptDone
            })
        ));
    }
}
