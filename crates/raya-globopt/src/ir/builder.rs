//! IR builder helpers
//!
//! Utilities for constructing optimizer IR by hand, used by front ends
//! lowering bytecode and by tests.

use super::instr::{Instr, InstrProfile, InstrRef, Opcode};
use super::opnd::{IndirOpnd, Opnd, PropertySymOpnd, RegOpnd};
use super::sym::{FieldKind, PropertyId, SymId};
use super::types::IrType;
use crate::analysis::flow_graph::{BlockId, BranchOp, Terminator};
use crate::func::Func;

/// Builder that simplifies IR construction
pub struct IrBuilder<'a> {
    func: &'a mut Func,
    current_block: BlockId,
    /// Bytecode offset given to the next instruction
    offset: u32,
}

impl<'a> IrBuilder<'a> {
    /// Create a builder appending to the function's entry block
    pub fn new(func: &'a mut Func) -> Self {
        let entry = func.graph.entry;
        let offset = func.graph.instr_count() as u32;
        IrBuilder {
            func,
            current_block: entry,
            offset,
        }
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn create_block(&mut self) -> BlockId {
        self.func.graph.add_block()
    }

    /// Var sym of an interpreter register, created on first use
    pub fn var(&mut self, slot: u32) -> SymId {
        let syms = &self.func.syms;
        let existing = (0..syms.len() as u32)
            .map(SymId)
            .find(|id| syms.stack(*id).is_some_and(|s| s.byte_code_reg_slot == Some(slot) && !s.is_type_spec()));
        match existing {
            Some(id) => id,
            None => self.func.syms.new_bytecode_sym(slot),
        }
    }

    /// Temporary with no interpreter register
    pub fn temp(&mut self, ty: IrType) -> SymId {
        self.func.syms.new_stack_sym(ty)
    }

    pub fn property(&mut self, object: SymId, property_id: PropertyId, kind: FieldKind) -> SymId {
        self.func.syms.find_or_create_property_sym(object, property_id, kind)
    }

    /// Append an instruction to the current block
    pub fn emit(&mut self, instr: Instr) -> InstrRef {
        let instr = instr.at_offset(self.offset);
        self.offset += 1;
        self.func.graph.push_instr(self.current_block, instr)
    }

    pub fn ld_const(&mut self, dst: SymId, value: i32) -> InstrRef {
        self.emit(Instr::ld(Opnd::reg(dst), Opnd::IntConst(value)))
    }

    pub fn ld(&mut self, dst: SymId, src: SymId) -> InstrRef {
        self.emit(Instr::ld(Opnd::reg(dst), Opnd::reg(src)))
    }

    pub fn add(&mut self, dst: SymId, src1: SymId, src2: SymId) -> InstrRef {
        self.arith(Opcode::Add, dst, Opnd::reg(src1), Opnd::reg(src2))
    }

    pub fn add_const(&mut self, dst: SymId, src: SymId, value: i32) -> InstrRef {
        self.arith(Opcode::Add, dst, Opnd::reg(src), Opnd::IntConst(value))
    }

    pub fn sub(&mut self, dst: SymId, src1: SymId, src2: SymId) -> InstrRef {
        self.arith(Opcode::Sub, dst, Opnd::reg(src1), Opnd::reg(src2))
    }

    fn arith(&mut self, opcode: Opcode, dst: SymId, src1: Opnd, src2: Opnd) -> InstrRef {
        self.emit(
            Instr::new(opcode)
                .with_dst(Opnd::reg(dst))
                .with_src1(src1)
                .with_src2(src2),
        )
    }

    /// `dst = base[index]`; a constant index becomes the operand's offset
    pub fn ld_elem(&mut self, dst: SymId, base: SymId, index: Opnd) -> InstrRef {
        self.emit(
            Instr::new(Opcode::LdElem)
                .with_dst(Opnd::reg(dst))
                .with_src1(element(base, index)),
        )
    }

    /// `base[index] = value`, profiled as an in-bounds store
    pub fn st_elem(&mut self, base: SymId, index: Opnd, value: Opnd) -> InstrRef {
        self.emit(
            Instr::new(Opcode::StElem)
                .with_dst(element(base, index))
                .with_src1(value)
                .with_profile(InstrProfile::default()),
        )
    }

    pub fn ld_len(&mut self, dst: SymId, base: SymId) -> InstrRef {
        self.emit(
            Instr::new(Opcode::LdLen)
                .with_dst(Opnd::reg(dst))
                .with_src1(Opnd::reg(base)),
        )
    }

    /// `dst = index in base`
    pub fn is_in(&mut self, dst: SymId, index: Opnd, base: SymId) -> InstrRef {
        self.emit(
            Instr::new(Opcode::IsIn)
                .with_dst(Opnd::reg(dst))
                .with_src1(index)
                .with_src2(Opnd::reg(base)),
        )
    }

    pub fn ld_fld(&mut self, dst: SymId, property: SymId) -> InstrRef {
        self.emit(
            Instr::new(Opcode::LdFld)
                .with_dst(Opnd::reg(dst))
                .with_src1(Opnd::Prop(PropertySymOpnd::new(property))),
        )
    }

    pub fn st_fld(&mut self, property: SymId, value: Opnd) -> InstrRef {
        self.emit(
            Instr::new(Opcode::StFld)
                .with_dst(Opnd::Prop(PropertySymOpnd::new(property)))
                .with_src1(value),
        )
    }

    /// Outgoing arguments followed by the call; the call carries its argument count
    pub fn call(&mut self, dst: Option<SymId>, callee: SymId, args: &[SymId]) -> InstrRef {
        for arg in args {
            self.emit(Instr::new(Opcode::ArgOut).with_src1(Opnd::reg(*arg)));
        }
        let mut call = Instr::new(Opcode::Call)
            .with_src1(Opnd::reg(callee))
            .with_src2(Opnd::IntConst(args.len() as i32));
        if let Some(dst) = dst {
            call = call.with_dst(Opnd::reg(dst));
        }
        self.emit(call)
    }

    /// New array; without a length it is empty and has no missing values
    pub fn new_array(&mut self, dst: SymId, length: Option<i32>) -> InstrRef {
        let mut instr = Instr::new(Opcode::NewScArray).with_dst(Opnd::reg(dst));
        if let Some(length) = length {
            instr = instr.with_src1(Opnd::IntConst(length));
        }
        self.emit(instr)
    }

    /// Set the terminator for the current block
    pub fn terminate(&mut self, terminator: Terminator) {
        self.func.graph.block_mut(self.current_block).terminator = terminator;
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch(&mut self, op: BranchOp, src1: Opnd, src2: Option<Opnd>, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            op,
            src1,
            src2,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<Opnd>) {
        self.terminate(Terminator::Return(value));
    }

    /// Access the underlying function
    pub fn func(&self) -> &Func {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut Func {
        self.func
    }
}

fn element(base: SymId, index: Opnd) -> Opnd {
    let base = RegOpnd::var(base);
    match index {
        Opnd::IntConst(offset) => Opnd::Indir(IndirOpnd::new(base, None, offset)),
        Opnd::Reg(reg) => Opnd::Indir(IndirOpnd::new(base, Some(reg), 0)),
        _ => Opnd::Indir(IndirOpnd::new(base, None, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_reuses_slot_sym() {
        let mut func = Func::new_for_test();
        let mut b = IrBuilder::new(&mut func);
        let a = b.var(3);
        let t = b.temp(IrType::Int32);
        assert_eq!(b.var(3), a);
        assert_ne!(b.var(4), a);
        assert_ne!(t, a);
    }

    #[test]
    fn test_element_operands() {
        let mut func = Func::new_for_test();
        let mut b = IrBuilder::new(&mut func);
        let (arr, i, t) = (b.var(0), b.var(1), b.var(2));
        b.ld_elem(t, arr, Opnd::IntConst(5));
        b.st_elem(arr, Opnd::reg(i), Opnd::reg(t));
        b.ret(None);

        let instrs = &func.graph.block(func.graph.entry).instrs;
        let load = instrs[0].src1.as_ref().unwrap().as_indir().unwrap();
        assert_eq!(load.offset, 5);
        assert!(load.index.is_none());
        let store = instrs[1].dst.as_ref().unwrap().as_indir().unwrap();
        assert_eq!(store.index.as_ref().unwrap().sym, i);
        assert!(instrs[1].is_profiled_array_store());
        assert!(instrs[0].byte_code_offset < instrs[1].byte_code_offset);
    }

    #[test]
    fn test_call_emits_arguments_first() {
        let mut func = Func::new_for_test();
        let mut b = IrBuilder::new(&mut func);
        let (f, x, y, r) = (b.var(0), b.var(1), b.var(2), b.var(3));
        b.call(Some(r), f, &[x, y]);
        b.ret(Some(Opnd::reg(r)));

        let opcodes: Vec<Opcode> = func
            .graph
            .block(func.graph.entry)
            .instrs
            .iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(opcodes, vec![Opcode::ArgOut, Opcode::ArgOut, Opcode::Call]);
    }
}
