//! Raya JIT Global Optimizer
//!
//! This crate runs the global optimization phase of the Raya JIT over a
//! function whose flow graph has already been built:
//! - **IR**: symbols, operands, instructions and a builder (`ir` module)
//! - **Flow graph**: blocks, dominators, natural loops and landing pads (`analysis` module)
//! - **Values**: the abstract value lattice and integer bounds (`value` module)
//! - **GlobOpt**: per-block dataflow, loop prepass, field and array kills,
//!   type-check sequencing, array check and bound check hoisting (`globopt` module)
//! - **Func**: the function under compilation, its inlinee tree, phases,
//!   policies and tables (`func` module)
//! - **Pipeline**: passes and the compile entry point (`pipeline` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use raya_globopt::{compile_function, Func, GlobOptConfig, IrBuilder, Opnd};
//!
//! let mut func = Func::new("sum");
//! let mut b = IrBuilder::new(&mut func);
//! let (x, y) = (b.var(0), b.var(1));
//! b.add_const(y, x, 1);
//! b.ret(Some(Opnd::reg(y)));
//!
//! let output = compile_function(&mut func, &GlobOptConfig::default())?;
//! assert!(!output.abandoned);
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::new_without_default)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod func;
pub mod globopt;
pub mod host;
pub mod ir;
pub mod pipeline;
pub mod value;

pub use analysis::{BlockId, BranchOp, FlowGraph, LoopId, Terminator};
pub use config::GlobOptConfig;
pub use error::{AbandonReason, GlobOptError};
pub use func::phase::CompilePhase;
pub use func::{Func, FuncId};
pub use globopt::bailout::BailOutKind;
pub use globopt::{GlobOpt, GlobOptSummary, Mode};
pub use host::{HostTypeInfo, StaticTypeTable, TypeHandle, TypeInfo};
pub use ir::{FieldKind, Instr, IrBuilder, IrType, Opcode, Opnd, SymId};
pub use pipeline::{compile_function, CompileError, CompileOutput, OptPass, Optimizer};
pub use value::{Value, ValueInfo, ValueNumber, ValueType};
