//! The function being compiled
//!
//! `Func` owns everything one compilation works on: the symbol table, the
//! flow graph, the constant and bailout tables, guard and cache tables,
//! and the stack layout. Inlined callees share those tables and are
//! described by frames in a [`FuncTree`] rooted at the top function.

pub mod phase;
pub mod policy;
pub mod tables;

use bitflags::bitflags;
use tracing::debug;

use crate::analysis::flow_graph::FlowGraph;
use crate::config::GlobOptConfig;
use crate::error::{AbandonReason, GlobOptError};
use crate::globopt::bailout::BailOutTable;
use crate::ir::sym::{SymId, SymTable};
use crate::value::ValueType;

use self::phase::CompilePhase;
use self::policy::{FuncPolicies, FuncTraits};
use self::tables::{ConstantTable, GuardTables, StackLayout};

/// Index of a frame in the [`FuncTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl FuncId {
    /// The function being compiled
    pub const TOP: FuncId = FuncId(0);
}

impl std::fmt::Display for FuncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

bitflags! {
    /// Facts recorded about a frame while optimizing
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FuncFlags: u16 {
        const HAS_CALLS = 1 << 0;
        const HAS_IMPLICIT_CALLS = 1 << 1;
        const HAS_UNOPTIMIZED_ARGUMENTS_ACCESS = 1 << 2;
        const HAS_BAILOUT = 1 << 3;
        const HAS_TEMP_OBJECT_PRODUCING_INSTR = 1 << 4;
        /// The frame's function reads `arguments`
        const HAS_ARGUMENTS = 1 << 5;
        const THIS_OR_PARENT_INLINER_HAS_ARGUMENTS = 1 << 6;
        /// Inlinee meta slots are only written on demand
        const HAS_INLINE_ARGS_OPT = 1 << 7;
    }
}

/// Pointer-sized slot width of the inlinee frame layout
const MACH_PTR: i32 = 8;

/// Meta arguments stored at the start of an inlinee frame
mod inlinee_meta {
    pub const ARGC: i32 = 0;
    pub const FUNCTION_OBJECT: i32 = 1;
    pub const ARGUMENTS_OBJECT: i32 = 2;
    pub const ARGV: i32 = 3;
    pub const COUNT: i32 = 4;
}

/// Stack slot in an inlinee frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineeSlot {
    pub frame: FuncId,
    /// Byte offset from the top function's frame base
    pub offset: i32,
}

/// One function of the compilation: the top function or an inlinee
#[derive(Debug, Clone)]
pub struct FuncFrame {
    pub id: FuncId,
    pub parent: Option<FuncId>,
    pub name: String,
    /// Arguments passed at the inlined call site
    pub actual_arg_count: u32,
    /// Offset of the frame's meta slots, assigned by the optimizer
    pub frame_start_offset: Option<i32>,
    pub flags: FuncFlags,
}

/// Every frame of a compilation, with parent links
#[derive(Debug, Clone)]
pub struct FuncTree {
    frames: Vec<FuncFrame>,
}

impl FuncTree {
    pub fn new(name: impl Into<String>) -> Self {
        FuncTree {
            frames: vec![FuncFrame {
                id: FuncId::TOP,
                parent: None,
                name: name.into(),
                actual_arg_count: 0,
                frame_start_offset: None,
                flags: FuncFlags::empty(),
            }],
        }
    }

    /// Add the frame of a callee inlined into `parent`
    pub fn add_inlinee(
        &mut self,
        parent: FuncId,
        name: impl Into<String>,
        actual_arg_count: u32,
        has_arguments: bool,
    ) -> FuncId {
        let id = FuncId(self.frames.len() as u32);
        let parent_has_arguments = self
            .frame(parent)
            .is_some_and(|p| p.flags.contains(FuncFlags::THIS_OR_PARENT_INLINER_HAS_ARGUMENTS));
        let mut flags = FuncFlags::empty();
        flags.set(FuncFlags::HAS_ARGUMENTS, has_arguments);
        flags.set(
            FuncFlags::THIS_OR_PARENT_INLINER_HAS_ARGUMENTS,
            has_arguments || parent_has_arguments,
        );
        self.frames.push(FuncFrame {
            id,
            parent: Some(parent),
            name: name.into(),
            actual_arg_count,
            frame_start_offset: None,
            flags,
        });
        id
    }

    pub fn frame(&self, id: FuncId) -> Option<&FuncFrame> {
        self.frames.get(id.0 as usize)
    }

    pub fn frame_mut(&mut self, id: FuncId) -> Option<&mut FuncFrame> {
        self.frames.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn parent_of(&self, id: FuncId) -> Option<FuncId> {
        self.frame(id)?.parent
    }

    /// Root of the tree `id` belongs to
    pub fn top_func(&self, id: FuncId) -> FuncId {
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    pub fn is_inlinee(&self, id: FuncId) -> bool {
        self.parent_of(id).is_some()
    }

    pub fn has_flag(&self, id: FuncId, flag: FuncFlags) -> bool {
        self.frame(id).is_some_and(|f| f.flags.contains(flag))
    }

    fn set_flag(&mut self, id: FuncId, flag: FuncFlags, value: bool) {
        if let Some(frame) = self.frame_mut(id) {
            frame.flags.set(flag, value);
        }
    }

    /// `id` and every frame it is inlined into
    fn self_and_parents(&self, id: FuncId) -> Vec<FuncId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    pub fn set_has_calls_on_self_and_parents(&mut self, id: FuncId) {
        for frame in self.self_and_parents(id) {
            self.set_flag(frame, FuncFlags::HAS_CALLS, true);
        }
    }

    /// Marks `id` and its inliners, stopping short of the top function
    pub fn set_has_implicit_calls_on_self_and_parents(&mut self, id: FuncId) {
        self.set_flag(id, FuncFlags::HAS_IMPLICIT_CALLS, true);
        for frame in self.self_and_parents(id).into_iter().skip(1) {
            if !self.is_inlinee(frame) {
                break;
            }
            self.set_flag(frame, FuncFlags::HAS_IMPLICIT_CALLS, true);
        }
    }

    /// Once set, the flag stays set; `true` also reaches every inliner
    pub fn set_has_unoptimized_arguments_access(&mut self, id: FuncId, value: bool) {
        if !value {
            return;
        }
        for frame in self.self_and_parents(id) {
            self.set_flag(frame, FuncFlags::HAS_UNOPTIMIZED_ARGUMENTS_ACCESS, true);
        }
    }

    pub fn has_unoptimized_arguments_access(&self, id: FuncId) -> bool {
        self.has_flag(id, FuncFlags::HAS_UNOPTIMIZED_ARGUMENTS_ACCESS)
    }

    pub fn this_or_parent_inliner_has_arguments(&self, id: FuncId) -> bool {
        self.has_flag(id, FuncFlags::THIS_OR_PARENT_INLINER_HAS_ARGUMENTS)
    }

    pub fn set_has_inline_args_opt(&mut self, id: FuncId, value: bool) {
        self.set_flag(id, FuncFlags::HAS_INLINE_ARGS_OPT, value);
    }

    /// Turn the inline-args optimization off for `id` and its inliners
    pub fn disable_inline_args_opt(&mut self, id: FuncId) {
        for frame in self.self_and_parents(id) {
            self.set_flag(frame, FuncFlags::HAS_INLINE_ARGS_OPT, false);
        }
    }

    pub fn set_inlinee_frame_start(&mut self, id: FuncId, offset: i32) {
        if let Some(frame) = self.frame_mut(id) {
            frame.frame_start_offset = Some(offset);
        }
    }

    // ===== Inlinee meta slots =====

    fn inlinee_slot_at(&self, id: FuncId, offset: i32) -> Result<InlineeSlot, GlobOptError> {
        let frame = self
            .frame(id)
            .filter(|f| f.parent.is_some())
            .ok_or_else(|| GlobOptError::Internal(format!("{} is not an inlinee", id)))?;
        let start = frame
            .frame_start_offset
            .ok_or_else(|| GlobOptError::Internal(format!("{} has no frame start", id)))?;
        Ok(InlineeSlot {
            frame: id,
            offset: start + offset,
        })
    }

    fn require_no_inline_args_opt(&self, id: FuncId, slot: &'static str) -> Result<(), GlobOptError> {
        if self.has_flag(id, FuncFlags::HAS_INLINE_ARGS_OPT) {
            return Err(GlobOptError::InlineArgsOptEnabled { slot });
        }
        Ok(())
    }

    pub fn inlinee_arg_count_slot(&self, id: FuncId) -> Result<InlineeSlot, GlobOptError> {
        self.inlinee_slot_at(id, inlinee_meta::ARGC * MACH_PTR)
    }

    pub fn inlinee_arguments_object_slot(&self, id: FuncId) -> Result<InlineeSlot, GlobOptError> {
        self.inlinee_slot_at(id, inlinee_meta::ARGUMENTS_OBJECT * MACH_PTR)
    }

    /// Arg count slot of a frame inlined right after this one's arguments
    pub fn next_inlinee_frame_arg_count_slot(&self, id: FuncId) -> Result<InlineeSlot, GlobOptError> {
        self.require_no_inline_args_opt(id, "next frame arg count")?;
        let actual = self.frame(id).map(|f| f.actual_arg_count as i32).unwrap_or(0);
        self.inlinee_slot_at(id, (inlinee_meta::COUNT + actual) * MACH_PTR)
    }

    pub fn inlinee_function_object_slot(&self, id: FuncId) -> Result<InlineeSlot, GlobOptError> {
        self.require_no_inline_args_opt(id, "function object")?;
        self.inlinee_slot_at(id, inlinee_meta::FUNCTION_OBJECT * MACH_PTR)
    }

    pub fn inlinee_argv_slot(&self, id: FuncId) -> Result<InlineeSlot, GlobOptError> {
        self.require_no_inline_args_opt(id, "argv")?;
        self.inlinee_slot_at(id, inlinee_meta::ARGV * MACH_PTR)
    }
}

/// A function under compilation
#[derive(Debug)]
pub struct Func {
    pub name: String,
    pub syms: SymTable,
    pub graph: FlowGraph,
    pub constants: ConstantTable,
    pub bailouts: BailOutTable,
    pub tree: FuncTree,
    pub guards: GuardTables,
    pub stack: StackLayout,
    pub traits: FuncTraits,
    phase: CompilePhase,
    policies: Option<FuncPolicies>,
    param_types: Vec<(SymId, ValueType)>,
}

impl Func {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Func {
            tree: FuncTree::new(name.clone()),
            name,
            syms: SymTable::new(),
            graph: FlowGraph::new(),
            constants: ConstantTable::new(),
            bailouts: BailOutTable::new(),
            guards: GuardTables::new(),
            stack: StackLayout::default(),
            traits: FuncTraits::default(),
            phase: CompilePhase::Built,
            policies: None,
            param_types: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Func::new("test")
    }

    // ===== Phases =====

    pub fn phase(&self) -> CompilePhase {
        self.phase
    }

    pub fn advance_to(&mut self, next: CompilePhase) -> Result<(), GlobOptError> {
        self.phase = phase::advance(self.phase, next)?;
        debug!(target: "raya_globopt::func", func = %self.name, phase = %self.phase, "phase");
        Ok(())
    }

    pub fn is_flow_graph_valid(&self) -> bool {
        self.phase.is_flow_graph_valid()
    }

    pub fn is_post_lower(&self) -> bool {
        self.phase.is_post_lower()
    }

    // ===== Policies =====

    pub fn decide_policies(&mut self, config: &GlobOptConfig) -> FuncPolicies {
        let policies = FuncPolicies::decide(config, &self.traits);
        self.policies = Some(policies);
        policies
    }

    pub fn policies(&self) -> Option<&FuncPolicies> {
        self.policies.as_ref()
    }

    pub fn do_fast_paths(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "do_fast_paths", |p| p.do_fast_paths)
    }

    pub fn do_loop_fast_paths(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "do_loop_fast_paths", |p| p.do_loop_fast_paths)
    }

    pub fn do_glob_opt(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "do_glob_opt", |p| p.do_glob_opt)
    }

    pub fn do_inline(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "do_inline", |p| p.do_inline)
    }

    pub fn do_optimize_try(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "do_optimize_try", |p| p.do_optimize_try)
    }

    pub fn is_loop_body(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "is_loop_body", |p| p.is_loop_body)
    }

    pub fn is_simple_jit(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "is_simple_jit", |p| p.is_simple_jit)
    }

    pub fn is_array_check_hoist_disabled(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "is_array_check_hoist_disabled", |p| {
            p.is_array_check_hoist_disabled
        })
    }

    pub fn is_aggressive_int_type_spec_disabled(&self) -> Result<bool, GlobOptError> {
        policy::read(self.policies(), "is_aggressive_int_type_spec_disabled", |p| {
            p.is_aggressive_int_type_spec_disabled
        })
    }

    // ===== Flags =====

    pub fn set_has_bailout(&mut self) {
        if let Some(frame) = self.tree.frame_mut(FuncId::TOP) {
            frame.flags.insert(FuncFlags::HAS_BAILOUT);
        }
    }

    pub fn has_bailout(&self) -> bool {
        self.tree.has_flag(FuncId::TOP, FuncFlags::HAS_BAILOUT)
    }

    pub fn has_calls(&self) -> bool {
        self.tree.has_flag(FuncId::TOP, FuncFlags::HAS_CALLS)
    }

    // ===== Parameters =====

    /// Profiled type of a parameter on entry
    pub fn set_param_value_type(&mut self, sym: SymId, ty: ValueType) {
        self.param_types.retain(|(s, _)| *s != sym);
        self.param_types.push((sym, ty));
    }

    pub fn param_value_types(&self) -> &[(SymId, ValueType)] {
        &self.param_types
    }

    // ===== Limits =====

    pub fn check_instr_count_limit(&self, config: &GlobOptConfig) -> Result<(), GlobOptError> {
        let count = self.graph.instr_count();
        if count > config.max_instr_count {
            debug!(target: "raya_globopt::func", func = %self.name, count, "instruction limit exceeded");
            return Err(GlobOptError::abandon(AbandonReason::TooManyInstructions {
                count,
                limit: config.max_instr_count,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::flow_graph::Terminator;
    use crate::ir::instr::{Instr, Opcode};

    #[test]
    fn test_calls_reach_every_inliner() {
        let mut tree = FuncTree::new("top");
        let a = tree.add_inlinee(FuncId::TOP, "a", 1, false);
        let b = tree.add_inlinee(a, "b", 0, false);
        tree.set_has_calls_on_self_and_parents(b);
        for id in [FuncId::TOP, a, b] {
            assert!(tree.has_flag(id, FuncFlags::HAS_CALLS));
        }
        assert_eq!(tree.top_func(b), FuncId::TOP);
        assert_eq!(tree.parent_of(b), Some(a));
    }

    #[test]
    fn test_implicit_calls_stop_at_top() {
        let mut tree = FuncTree::new("top");
        let a = tree.add_inlinee(FuncId::TOP, "a", 1, false);
        let b = tree.add_inlinee(a, "b", 0, false);
        tree.set_has_implicit_calls_on_self_and_parents(b);
        assert!(tree.has_flag(b, FuncFlags::HAS_IMPLICIT_CALLS));
        assert!(tree.has_flag(a, FuncFlags::HAS_IMPLICIT_CALLS));
        assert!(!tree.has_flag(FuncId::TOP, FuncFlags::HAS_IMPLICIT_CALLS));
    }

    #[test]
    fn test_unoptimized_arguments_access_is_sticky() {
        let mut tree = FuncTree::new("top");
        let a = tree.add_inlinee(FuncId::TOP, "a", 2, true);
        tree.set_has_unoptimized_arguments_access(a, true);
        tree.set_has_unoptimized_arguments_access(a, false);
        assert!(tree.has_unoptimized_arguments_access(a));
        assert!(tree.has_unoptimized_arguments_access(FuncId::TOP));
    }

    #[test]
    fn test_arguments_inherited_from_inliner() {
        let mut tree = FuncTree::new("top");
        let a = tree.add_inlinee(FuncId::TOP, "a", 0, true);
        let b = tree.add_inlinee(a, "b", 0, false);
        let c = tree.add_inlinee(FuncId::TOP, "c", 0, false);
        assert!(tree.this_or_parent_inliner_has_arguments(b));
        assert!(!tree.this_or_parent_inliner_has_arguments(c));
    }

    #[test]
    fn test_inlinee_slots_respect_inline_args_opt() {
        let mut tree = FuncTree::new("top");
        let a = tree.add_inlinee(FuncId::TOP, "a", 2, false);
        assert!(matches!(tree.inlinee_arg_count_slot(a), Err(GlobOptError::Internal(_))));
        tree.set_inlinee_frame_start(a, 64);
        assert_eq!(tree.inlinee_arg_count_slot(a).unwrap().offset, 64);
        assert_eq!(tree.inlinee_argv_slot(a).unwrap().offset, 64 + 3 * MACH_PTR);
        assert_eq!(tree.next_inlinee_frame_arg_count_slot(a).unwrap().offset, 64 + 6 * MACH_PTR);

        tree.set_has_inline_args_opt(a, true);
        assert!(tree.inlinee_arg_count_slot(a).is_ok());
        assert!(tree.inlinee_arguments_object_slot(a).is_ok());
        assert!(matches!(
            tree.inlinee_function_object_slot(a),
            Err(GlobOptError::InlineArgsOptEnabled { .. })
        ));
        assert!(tree.inlinee_argv_slot(a).is_err());
        tree.disable_inline_args_opt(a);
        assert!(tree.inlinee_argv_slot(a).is_ok());
        assert!(tree.inlinee_arg_count_slot(FuncId::TOP).is_err());
    }

    #[test]
    fn test_policies_must_be_decided() {
        let mut func = Func::new("f");
        assert!(func.policies().is_none());
        func.decide_policies(&GlobOptConfig::default());
        assert!(func.do_glob_opt().unwrap());
        assert!(!func.is_simple_jit().unwrap());
    }

    #[test]
    fn test_instr_count_limit() {
        let mut func = Func::new("f");
        let entry = func.graph.entry;
        for _ in 0..3 {
            func.graph.push_instr(entry, Instr::new(Opcode::Ld));
        }
        func.graph.block_mut(entry).terminator = Terminator::Return(None);
        let config = GlobOptConfig {
            max_instr_count: 2,
            ..Default::default()
        };
        let err = func.check_instr_count_limit(&config).unwrap_err();
        assert!(matches!(
            err,
            GlobOptError::AbandonCompilation {
                reason: AbandonReason::TooManyInstructions { count: 3, limit: 2 }
            }
        ));
        assert!(func.check_instr_count_limit(&GlobOptConfig::default()).is_ok());
    }

    #[test]
    fn test_phase_advance() {
        let mut func = Func::new("f");
        func.advance_to(CompilePhase::FlowGraphBuilt).unwrap();
        assert!(func.is_flow_graph_valid());
        func.advance_to(CompilePhase::Lowered).unwrap();
        assert!(func.is_post_lower());
        assert!(func.advance_to(CompilePhase::GlobOptDone).is_err());
    }
}
