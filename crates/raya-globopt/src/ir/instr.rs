//! Optimizer IR instructions
//!
//! Instructions are three-address: an optional destination and up to two
//! sources. Blocks own their instructions; everything the optimizer needs
//! to find an instruction again goes through its [`InstrId`].

use super::opnd::{Opnd, PropertySymOpnd, RegOpnd};
use super::sym::SymId;
use crate::analysis::flow_graph::BlockId;
use crate::func::FuncId;
use crate::globopt::bailout::{BailOutKind, InstrBailOut};

/// Stable instruction identifier, unique within a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    /// Not yet inserted into a flow graph
    pub const INVALID: InstrId = InstrId(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != InstrId::INVALID
    }
}

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Location of an instruction in the flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrRef {
    pub block: BlockId,
    pub id: InstrId,
}

/// Instruction opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Moves and arithmetic =====
    Ld,
    Add,
    Sub,
    Mul,

    // ===== Array operations =====
    LdElem,
    LdMethodElem,
    StElem,
    StElemC,
    LdLen,
    IsIn,
    ArrayPush,
    ArrayPop,
    DeleteElem,

    // ===== Field operations =====
    LdFld,
    LdMethodFld,
    StFld,
    InitFld,
    InitLetFld,
    DeleteFld,
    LdSlot,
    StSlot,
    ScopedStFld,

    // ===== Object creation =====
    NewScObject,
    NewScArray,
    InitClass,

    // ===== Calls =====
    ArgOut,
    Call,
    CallHelper,

    // ===== Control =====
    Yield,
    InlineeStart,
    InlineeEnd,
    LdHeapArguments,

    // ===== Conversions =====
    FromVar,
    ToVar,
    ConvPrim,

    // ===== Optimizer-emitted =====
    BailOnNotArray,
    BailOnNegative,
    BoundCheck,
    LdArrayHeadSegment,
    LdArrayHeadSegmentLength,
    LdArrayLength,
    CheckObjType,
    BailTarget,
}

impl Opcode {
    /// Element load or store through an indir operand
    pub fn is_elem_access(&self) -> bool {
        matches!(
            self,
            Opcode::LdElem | Opcode::LdMethodElem | Opcode::StElem | Opcode::StElemC
        )
    }

    /// Field access eligible for inline-cache based fast paths
    pub fn is_fast_field_op(&self) -> bool {
        matches!(
            self,
            Opcode::LdFld
                | Opcode::LdMethodFld
                | Opcode::StFld
                | Opcode::InitFld
                | Opcode::InitLetFld
                | Opcode::ScopedStFld
        )
    }

    /// Writes a property through its destination operand
    pub fn is_field_store(&self) -> bool {
        matches!(
            self,
            Opcode::StFld | Opcode::InitFld | Opcode::InitLetFld | Opcode::ScopedStFld | Opcode::StSlot
        )
    }

    /// Calls into code the optimizer cannot see
    pub fn is_call(&self) -> bool {
        matches!(self, Opcode::Call | Opcode::NewScObject)
    }

    /// Emitted by the optimizer itself
    pub fn is_optimizer_emitted(&self) -> bool {
        matches!(
            self,
            Opcode::BailOnNotArray
                | Opcode::BailOnNegative
                | Opcode::BoundCheck
                | Opcode::LdArrayHeadSegment
                | Opcode::LdArrayHeadSegmentLength
                | Opcode::LdArrayLength
                | Opcode::CheckObjType
                | Opcode::BailTarget
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Builtin helpers whose side effects the optimizer models precisely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperMethod {
    ArrayShift,
    ArraySplice,
    ArrayUnshift,
    ArrayReverse,
    ArraySlice,
    ArrayConcat,
    RegExpExec,
    RegExpReplace,
    RegExpSplit,
    RegExpSearch,
    StringMatch,
    StringSearch,
    StringSplit,
    StringReplace,
    /// Any other helper; no field or array effects
    Other(u32),
}

impl HelperMethod {
    /// Mutates the array it is called on
    pub fn mutates_array(&self) -> bool {
        matches!(
            self,
            HelperMethod::ArrayShift
                | HelperMethod::ArraySplice
                | HelperMethod::ArrayUnshift
                | HelperMethod::ArrayReverse
        )
    }

    /// Updates the `length` of the array it is called on
    pub fn updates_length(&self) -> bool {
        matches!(
            self,
            HelperMethod::ArrayShift | HelperMethod::ArraySplice | HelperMethod::ArrayUnshift
        )
    }

    /// Can write builtin properties on arbitrary objects
    pub fn writes_builtin_properties(&self) -> bool {
        matches!(
            self,
            HelperMethod::RegExpExec
                | HelperMethod::RegExpReplace
                | HelperMethod::RegExpSplit
                | HelperMethod::RegExpSearch
                | HelperMethod::StringMatch
                | HelperMethod::StringSearch
                | HelperMethod::StringSplit
                | HelperMethod::StringReplace
        )
    }
}

/// Profile data recorded by the interpreter at an instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrProfile {
    pub profile_id: u16,
    pub stores_outside_head_segment: bool,
    pub stores_outside_array_bounds: bool,
    /// A store here may convert a native array to a var array
    pub converts_native_array: bool,
}

/// A single IR instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub id: InstrId,
    pub opcode: Opcode,
    pub dst: Option<Opnd>,
    pub src1: Option<Opnd>,
    pub src2: Option<Opnd>,
    pub bailout: Option<InstrBailOut>,
    pub profile: Option<InstrProfile>,
    pub helper: Option<HelperMethod>,
    /// The access may invoke a getter or setter
    pub calls_accessor: bool,
    /// The front end saw a path that can run user code
    pub may_have_implicit_calls: bool,
    pub byte_code_offset: u32,
    /// Inlinee frame an `InlineeStart`/`InlineeEnd` opens or closes
    pub inlinee: Option<FuncId>,
}

impl Instr {
    pub fn new(opcode: Opcode) -> Self {
        Instr {
            id: InstrId::INVALID,
            opcode,
            dst: None,
            src1: None,
            src2: None,
            bailout: None,
            profile: None,
            helper: None,
            calls_accessor: false,
            may_have_implicit_calls: false,
            byte_code_offset: 0,
            inlinee: None,
        }
    }

    pub fn with_dst(mut self, dst: Opnd) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_src1(mut self, src: Opnd) -> Self {
        self.src1 = Some(src);
        self
    }

    pub fn with_src2(mut self, src: Opnd) -> Self {
        self.src2 = Some(src);
        self
    }

    pub fn with_profile(mut self, profile: InstrProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_helper(mut self, helper: HelperMethod) -> Self {
        self.helper = Some(helper);
        self
    }

    pub fn with_inlinee(mut self, inlinee: FuncId) -> Self {
        self.inlinee = Some(inlinee);
        self
    }

    pub fn at_offset(mut self, byte_code_offset: u32) -> Self {
        self.byte_code_offset = byte_code_offset;
        self
    }

    /// `Ld dst, src`
    pub fn ld(dst: Opnd, src: Opnd) -> Self {
        Instr::new(Opcode::Ld).with_dst(dst).with_src1(src)
    }

    /// `BoundCheck src1 <= src2 + offset`
    pub fn bound_check(src1: Opnd, src2: Opnd, offset: i32) -> Self {
        Instr::new(Opcode::BoundCheck)
            .with_dst(Opnd::IntConst(offset))
            .with_src1(src1)
            .with_src2(src2)
    }

    /// Offset of a `BoundCheck`
    pub fn bound_check_offset(&self) -> Option<i32> {
        match (self.opcode, &self.dst) {
            (Opcode::BoundCheck, Some(Opnd::IntConst(offset))) => Some(*offset),
            _ => None,
        }
    }

    pub fn has_bailout(&self) -> bool {
        self.bailout.is_some()
    }

    pub fn bailout_kind(&self) -> BailOutKind {
        self.bailout.map(|b| b.kind).unwrap_or(BailOutKind::empty())
    }

    /// Reads or writes every field (calls into unknown code)
    pub fn uses_all_fields(&self) -> bool {
        self.opcode.is_call() || self.calls_accessor && !self.opcode.is_fast_field_op()
    }

    /// May run user code (getters, setters, valueOf, calls)
    pub fn has_implicit_calls(&self) -> bool {
        self.opcode.is_call() || self.calls_accessor || self.may_have_implicit_calls
    }

    /// Element store the interpreter profiled
    pub fn is_profiled_array_store(&self) -> bool {
        matches!(self.opcode, Opcode::StElem | Opcode::StElemC) && self.profile.is_some()
    }

    pub fn dst_reg(&self) -> Option<&RegOpnd> {
        self.dst.as_ref().and_then(Opnd::as_reg)
    }

    pub fn dst_prop(&self) -> Option<&PropertySymOpnd> {
        self.dst.as_ref().and_then(Opnd::as_prop)
    }

    pub fn src1_reg(&self) -> Option<&RegOpnd> {
        self.src1.as_ref().and_then(Opnd::as_reg)
    }

    pub fn src2_reg(&self) -> Option<&RegOpnd> {
        self.src2.as_ref().and_then(Opnd::as_reg)
    }

    /// Sym defined by the destination (register or property)
    pub fn dst_sym(&self) -> Option<SymId> {
        match &self.dst {
            Some(Opnd::Reg(r)) => Some(r.sym),
            Some(Opnd::Prop(p)) => Some(p.sym),
            _ => None,
        }
    }

    /// Every stack sym read by the instruction
    pub fn src_syms(&self) -> Vec<SymId> {
        let mut syms = Vec::new();
        for opnd in [&self.src1, &self.src2].into_iter().flatten() {
            syms.extend(opnd.used_stack_syms());
        }
        if let Some(Opnd::Indir(indir)) = &self.dst {
            syms.extend(Opnd::Indir(indir.clone()).used_stack_syms());
        }
        syms
    }

    /// Property operand, whichever side it is on
    pub fn prop_opnd(&self) -> Option<&PropertySymOpnd> {
        self.dst_prop().or_else(|| self.src1.as_ref().and_then(Opnd::as_prop))
    }

    pub fn prop_opnd_mut(&mut self) -> Option<&mut PropertySymOpnd> {
        if matches!(self.dst, Some(Opnd::Prop(_))) {
            return self.dst.as_mut().and_then(Opnd::as_prop_mut);
        }
        self.src1.as_mut().and_then(Opnd::as_prop_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opnd::IndirOpnd;
    use crate::ir::types::IrType;

    #[test]
    fn test_src_syms_include_store_indir() {
        let store = Instr::new(Opcode::StElem)
            .with_dst(Opnd::Indir(IndirOpnd::new(
                RegOpnd::var(SymId(1)),
                Some(RegOpnd::new(SymId(2), IrType::Int32)),
                0,
            )))
            .with_src1(Opnd::reg(SymId(3)));
        assert_eq!(store.src_syms(), vec![SymId(3), SymId(1), SymId(2)]);
        assert_eq!(store.dst_sym(), None);
        assert!(!store.is_profiled_array_store());
    }

    #[test]
    fn test_bound_check_offset() {
        let check = Instr::bound_check(Opnd::IntConst(0), Opnd::reg(SymId(4)), -1);
        assert_eq!(check.bound_check_offset(), Some(-1));
        assert_eq!(Instr::new(Opcode::Ld).bound_check_offset(), None);
    }

    #[test]
    fn test_call_effects() {
        let call = Instr::new(Opcode::Call);
        assert!(call.uses_all_fields());
        assert!(call.has_implicit_calls());
        let ld = Instr::new(Opcode::LdFld);
        assert!(!ld.uses_all_fields());
        assert!(!ld.has_implicit_calls());
    }
}
