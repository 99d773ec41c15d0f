//! Optimizer IR: symbols, operands, instructions and their construction

pub mod bitset;
pub mod builder;
pub mod display;
pub mod instr;
pub mod opnd;
pub mod sym;
pub mod types;

pub use bitset::SymSet;
pub use builder::IrBuilder;
pub use instr::{HelperMethod, Instr, InstrId, InstrProfile, InstrRef, Opcode};
pub use opnd::{ArrayRegInfo, IndirOpnd, Opnd, PropertySymOpnd, RegOpnd};
pub use sym::{FieldKind, PropertyId, SymId, SymTable};
pub use types::IrType;
