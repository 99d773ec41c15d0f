//! Control-flow graph, dominators and natural loops

pub mod flow_graph;

pub use flow_graph::{BasicBlock, BlockId, BranchOp, FlowGraph, Loop, LoopId, Terminator};
