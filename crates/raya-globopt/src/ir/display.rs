//! Pretty-printing for optimizer IR
//!
//! Display implementations for debugging and dump output.

use std::fmt;

use super::instr::Instr;
use super::opnd::{IndirOpnd, Opnd, PropertySymOpnd, RegOpnd};
use crate::analysis::flow_graph::{BasicBlock, BranchOp, FlowGraph, Terminator};
use crate::func::Func;
use crate::globopt::bailout::InstrBailOut;
use crate::value::ValueType;

impl fmt::Display for RegOpnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sym)?;
        if self.ty.is_type_spec() {
            write!(f, ".{}", self.ty)?;
        }
        if self.value_type != ValueType::UNINITIALIZED {
            write!(f, "<{}>", self.value_type)?;
        }
        Ok(())
    }
}

impl fmt::Display for IndirOpnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base)?;
        if let Some(index) = &self.index {
            write!(f, " + {}", index)?;
        }
        if self.offset != 0 || self.index.is_none() {
            write!(f, " + #{}", self.offset)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for PropertySymOpnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sym)?;
        if self.slot_index != u16::MAX {
            let slots = if self.uses_aux_slot { "aux" } else { "inl" };
            write!(f, "{{{}:{}}}", slots, self.slot_index)?;
        }
        Ok(())
    }
}

impl fmt::Display for Opnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opnd::Reg(reg) => write!(f, "{}", reg),
            Opnd::Prop(prop) => write!(f, "{}", prop),
            Opnd::Indir(indir) => write!(f, "{}", indir),
            Opnd::IntConst(value) => write!(f, "#{}", value),
            Opnd::FloatConst(value) => write!(f, "#{:?}", value),
            Opnd::BoolConst(value) => write!(f, "#{}", value),
        }
    }
}

impl fmt::Display for InstrBailOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.info, self.kind)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.id)?;
        if let Some(dst) = &self.dst {
            write!(f, "{} = ", dst)?;
        }
        write!(f, "{}", self.opcode)?;
        let mut sep = " ";
        for src in [&self.src1, &self.src2].into_iter().flatten() {
            write!(f, "{}{}", sep, src)?;
            sep = ", ";
        }
        if let Some(helper) = &self.helper {
            write!(f, " helper={:?}", helper)?;
        }
        if let Some(bailout) = &self.bailout {
            write!(f, " ; {}", bailout)?;
        }
        Ok(())
    }
}

fn branch_mnemonic(op: BranchOp) -> &'static str {
    match op {
        BranchOp::Lt => "blt",
        BranchOp::Le => "ble",
        BranchOp::Gt => "bgt",
        BranchOp::Ge => "bge",
        BranchOp::Eq => "beq",
        BranchOp::Ne => "bne",
        BranchOp::True => "brtrue",
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "jmp {}", target),
            Terminator::Branch {
                op,
                src1,
                src2,
                then_block,
                else_block,
            } => {
                write!(f, "{} {}", branch_mnemonic(*op), src1)?;
                if let Some(src2) = src2 {
                    write!(f, ", {}", src2)?;
                }
                write!(f, ", {}, {}", then_block, else_block)
            }
            Terminator::Return(Some(value)) => write!(f, "ret {}", value),
            Terminator::Return(None) => write!(f, "ret void"),
            Terminator::None => write!(f, "<unterminated>"),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {}:", self.id)?;
        if let Some(loop_id) = self.loop_id {
            write!(f, " ; {}", loop_id)?;
        }
        writeln!(f)?;
        if !self.preds.is_empty() {
            write!(f, "    ; preds:")?;
            for pred in &self.preds {
                write!(f, " {}", pred)?;
            }
            writeln!(f)?;
        }

        for instr in &self.instrs {
            writeln!(f, "    {}", instr)?;
        }

        writeln!(f, "    {}", self.terminator)
    }
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks() {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function @{} (blocks: {}, syms: {}) {{",
            self.name,
            self.graph.block_count(),
            self.syms.len()
        )?;
        write!(f, "{}", self.graph)?;
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::instr::Opcode;

    #[test]
    fn test_function_dump() {
        let mut func = Func::new("dump");
        let mut b = IrBuilder::new(&mut func);
        let (arr, i, t) = (b.var(0), b.var(1), b.var(2));
        b.ld_elem(t, arr, Opnd::reg(i));
        b.ret(Some(Opnd::reg(t)));

        let text = func.to_string();
        assert!(text.starts_with("function @dump"));
        assert!(text.contains(&format!("{}", Opcode::LdElem)));
        assert!(text.contains("ret "));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_operand_formatting() {
        assert_eq!(Opnd::IntConst(-3).to_string(), "#-3");
        assert_eq!(Opnd::BoolConst(true).to_string(), "#true");
        assert_eq!(Terminator::Return(None).to_string(), "ret void");
    }
}
