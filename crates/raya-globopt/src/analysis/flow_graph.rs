//! Flow graph with loop structure
//!
//! The front end hands over blocks with terminators. [`FlowGraph::finalize`]
//! validates them and derives everything the optimizer walks: predecessors,
//! reverse post-order, dominators, natural loops with their nesting, and one
//! landing pad per loop.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::GlobOptError;
use crate::globopt::block_data::BlockData;
use crate::globopt::induction::{InductionVariable, LoopCount};
use crate::globopt::kills::JsArrayKills;
use crate::globopt::bailout::BailOutId;
use crate::globopt::liveness::TypeSpecLiveness;
use crate::ir::bitset::SymSet;
use crate::ir::instr::{Instr, InstrId, InstrRef};
use crate::ir::opnd::Opnd;
use crate::ir::sym::SymId;

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Loop identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

impl std::fmt::Display for LoopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

/// Comparison of a conditional branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Branch on the truthiness of `src1`
    True,
}

impl BranchOp {
    /// Comparison that holds on the else edge
    pub fn negate(&self) -> BranchOp {
        match self {
            BranchOp::Lt => BranchOp::Ge,
            BranchOp::Le => BranchOp::Gt,
            BranchOp::Gt => BranchOp::Le,
            BranchOp::Ge => BranchOp::Lt,
            BranchOp::Eq => BranchOp::Ne,
            BranchOp::Ne => BranchOp::Eq,
            BranchOp::True => BranchOp::True,
        }
    }
}

/// How a block ends
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        op: BranchOp,
        src1: Opnd,
        src2: Option<Opnd>,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Option<Opnd>),
    /// Not terminated yet
    None,
}

impl Terminator {
    /// Successor blocks in edge order
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            Terminator::Return(_) | Terminator::None => Vec::new(),
        }
    }

    fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Terminator::Jump(target) if *target == from => *target = to,
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                if *then_block == from {
                    *then_block = to;
                }
                if *else_block == from {
                    *else_block = to;
                }
            }
            _ => {}
        }
    }
}

/// A basic block
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
    pub preds: Vec<BlockId>,
    /// Innermost loop containing the block
    pub loop_id: Option<LoopId>,
    pub is_loop_header: bool,
    pub is_landing_pad: bool,
    /// Optimizer state at the end of the block
    pub data: Option<BlockData>,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            instrs: Vec::new(),
            terminator: Terminator::None,
            preds: Vec::new(),
            loop_id: None,
            is_loop_header: false,
            is_landing_pad: false,
            data: None,
        }
    }
}

/// A natural loop and the summaries the optimizer computes for it
#[derive(Debug)]
pub struct Loop {
    pub id: LoopId,
    pub header: BlockId,
    pub landing_pad: BlockId,
    pub parent: Option<LoopId>,
    /// Body blocks, nested loops included
    pub blocks: FxHashSet<BlockId>,
    /// Tails of the back edges into the header
    pub back_edges: Vec<BlockId>,

    // Summaries filled by the prepass
    pub syms_def_in_loop: SymSet,
    pub field_killed: SymSet,
    pub all_fields_killed: bool,
    pub js_array_kills: JsArrayKills,
    pub induction_variables: FxHashMap<SymId, InductionVariable>,
    pub syms_used_before_defined: SymSet,
    pub likely_int_syms_used_before_defined: SymSet,
    pub likely_number_syms_used_before_defined: SymSet,
    pub loop_count: Option<LoopCount>,
    pub bail_out_info: Option<BailOutId>,
    /// Representations the header starts with in the real pass
    pub header_liveness: Option<TypeSpecLiveness>,

    // Kills the real pass observed, kept for checking the prepass summary
    pub real_pass_js_array_kills: JsArrayKills,
    pub real_pass_field_killed: SymSet,
}

impl Loop {
    fn new(id: LoopId, header: BlockId) -> Self {
        Loop {
            id,
            header,
            landing_pad: header,
            parent: None,
            blocks: FxHashSet::default(),
            back_edges: Vec::new(),
            syms_def_in_loop: SymSet::new(),
            field_killed: SymSet::new(),
            all_fields_killed: false,
            js_array_kills: JsArrayKills::empty(),
            induction_variables: FxHashMap::default(),
            syms_used_before_defined: SymSet::new(),
            likely_int_syms_used_before_defined: SymSet::new(),
            likely_number_syms_used_before_defined: SymSet::new(),
            loop_count: None,
            bail_out_info: None,
            header_liveness: None,
            real_pass_js_array_kills: JsArrayKills::empty(),
            real_pass_field_killed: SymSet::new(),
        }
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Forget what a previous prepass computed
    pub fn reset_summaries(&mut self) {
        self.field_killed.clear_all();
        self.all_fields_killed = false;
        self.js_array_kills = JsArrayKills::empty();
        self.induction_variables.clear();
        self.syms_used_before_defined.clear_all();
        self.likely_int_syms_used_before_defined.clear_all();
        self.likely_number_syms_used_before_defined.clear_all();
        self.loop_count = None;
    }
}

/// Control-flow graph of one function
#[derive(Debug)]
pub struct FlowGraph {
    blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    loops: Vec<Loop>,
    rpo: Vec<BlockId>,
    idom: Vec<Option<BlockId>>,
    next_instr_id: u32,
    finalized: bool,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    /// Graph with a single empty entry block
    pub fn new() -> Self {
        FlowGraph {
            blocks: vec![BasicBlock::new(BlockId(0))],
            entry: BlockId(0),
            loops: Vec::new(),
            rpo: Vec::new(),
            idom: Vec::new(),
            next_instr_id: 0,
            finalized: false,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut BasicBlock> {
        self.blocks.iter_mut()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Total number of instructions across all blocks
    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).terminator.successors()
    }

    /// Reachable blocks in reverse post-order
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn loop_(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    pub fn loop_mut(&mut self, id: LoopId) -> &mut Loop {
        &mut self.loops[id.0 as usize]
    }

    /// Loop whose header is `block`
    pub fn loop_of_header(&self, block: BlockId) -> Option<LoopId> {
        self.loops.iter().find(|l| l.header == block).map(|l| l.id)
    }

    /// Enclosing loops of `block`, innermost first
    pub fn loop_chain(&self, block: BlockId) -> Vec<LoopId> {
        let mut chain = Vec::new();
        let mut current = self.block(block).loop_id;
        while let Some(id) = current {
            chain.push(id);
            current = self.loop_(id).parent;
        }
        chain
    }

    /// Whether `inner` is `outer` or nested in it
    pub fn is_loop_nested_in(&self, inner: LoopId, outer: LoopId) -> bool {
        let mut current = Some(inner);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.loop_(id).parent;
        }
        false
    }

    /// Whether `from -> to` closes a loop
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.loop_of_header(to)
            .is_some_and(|l| self.loop_(l).back_edges.contains(&from))
    }

    /// Immediate dominator
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.0 as usize).copied().flatten()
    }

    /// Whether `a` dominates `b`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(block) = current {
            if block == a {
                return true;
            }
            current = self.idom(block).filter(|d| *d != block);
        }
        false
    }

    // ---------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------

    /// Fresh instruction id
    pub fn alloc_instr_id(&mut self) -> InstrId {
        let id = InstrId(self.next_instr_id);
        self.next_instr_id += 1;
        id
    }

    /// Give `instr` an id if it has none
    pub fn stamp(&mut self, mut instr: Instr) -> Instr {
        if !instr.id.is_valid() {
            instr.id = self.alloc_instr_id();
        }
        instr
    }

    /// Append an instruction to a block
    pub fn push_instr(&mut self, block: BlockId, instr: Instr) -> InstrRef {
        let instr = self.stamp(instr);
        let id = instr.id;
        self.block_mut(block).instrs.push(instr);
        InstrRef { block, id }
    }

    /// Insert an instruction before position `index` of a block
    pub fn insert_instr(&mut self, block: BlockId, index: usize, instr: Instr) -> InstrRef {
        let instr = self.stamp(instr);
        let id = instr.id;
        let instrs = &mut self.block_mut(block).instrs;
        let index = index.min(instrs.len());
        instrs.insert(index, instr);
        InstrRef { block, id }
    }

    /// Position of an instruction in its block
    pub fn find_instr(&self, at: InstrRef) -> Option<usize> {
        self.block(at.block).instrs.iter().position(|i| i.id == at.id)
    }

    pub fn instr(&self, at: InstrRef) -> Option<&Instr> {
        self.block(at.block).instrs.iter().find(|i| i.id == at.id)
    }

    pub fn instr_mut(&mut self, at: InstrRef) -> Option<&mut Instr> {
        self.block_mut(at.block).instrs.iter_mut().find(|i| i.id == at.id)
    }

    // ---------------------------------------------------------------
    // Finalization
    // ---------------------------------------------------------------

    /// Validate the graph and compute loops, landing pads and orders
    pub fn finalize(&mut self) -> Result<(), GlobOptError> {
        self.validate()?;

        let mut next = self.next_instr_id;
        for block in &mut self.blocks {
            for instr in block.instrs.iter_mut().filter(|i| !i.id.is_valid()) {
                instr.id = InstrId(next);
                next += 1;
            }
        }
        self.next_instr_id = next;

        self.compute_orders();
        self.find_loops();
        self.insert_landing_pads();
        self.compute_orders();
        self.assign_innermost_loops();
        self.finalized = true;
        Ok(())
    }

    fn validate(&self) -> Result<(), GlobOptError> {
        let count = self.blocks.len() as u32;
        for block in &self.blocks {
            if block.terminator == Terminator::None {
                return Err(GlobOptError::MalformedFlowGraph(format!(
                    "{} has no terminator",
                    block.id
                )));
            }
            for succ in block.terminator.successors() {
                if succ.0 >= count {
                    return Err(GlobOptError::MalformedFlowGraph(format!(
                        "{} jumps to unknown block {}",
                        block.id, succ
                    )));
                }
            }
        }
        Ok(())
    }

    fn compute_orders(&mut self) {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .iter()
            .flat_map(|b| b.terminator.successors().into_iter().map(move |s| (b.id, s)))
            .collect();
        for (from, to) in edges {
            let preds = &mut self.block_mut(to).preds;
            if !preds.contains(&from) {
                preds.push(from);
            }
        }

        // Iterative post-order from the entry
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry.0 as usize] = true;
        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if !visited[succ.0 as usize] {
                    visited[succ.0 as usize] = true;
                    stack.push((succ, 0));
                }
            } else {
                post.push(block);
            }
        }
        post.reverse();
        self.rpo = post;

        // Drop edges from unreachable blocks
        for block in &mut self.blocks {
            block.preds.retain(|p| visited[p.0 as usize]);
        }

        self.compute_dominators();
    }

    fn compute_dominators(&mut self) {
        let mut order = vec![usize::MAX; self.blocks.len()];
        for (i, b) in self.rpo.iter().enumerate() {
            order[b.0 as usize] = i;
        }
        let mut idom: Vec<Option<BlockId>> = vec![None; self.blocks.len()];
        idom[self.entry.0 as usize] = Some(self.entry);

        let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| -> BlockId {
            while a != b {
                while order[a.0 as usize] > order[b.0 as usize] {
                    a = idom[a.0 as usize].unwrap_or(a);
                }
                while order[b.0 as usize] > order[a.0 as usize] {
                    b = idom[b.0 as usize].unwrap_or(b);
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.block(block).preds {
                    if idom[pred.0 as usize].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.0 as usize] != new_idom {
                    idom[block.0 as usize] = new_idom;
                    changed = true;
                }
            }
        }
        self.idom = idom;
    }

    fn find_loops(&mut self) {
        let mut by_header: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for &block in &self.rpo {
            for succ in self.successors(block) {
                if self.dominates(succ, block) {
                    by_header.entry(succ).or_default().push(block);
                }
            }
        }

        let mut headers: Vec<BlockId> = by_header.keys().copied().collect();
        headers.sort_by_key(|h| self.rpo.iter().position(|b| b == h));

        self.loops.clear();
        for header in headers {
            let id = LoopId(self.loops.len() as u32);
            let mut lp = Loop::new(id, header);
            lp.back_edges = by_header.remove(&header).unwrap_or_default();
            lp.blocks.insert(header);
            let mut work: Vec<BlockId> = lp.back_edges.clone();
            while let Some(block) = work.pop() {
                if lp.blocks.insert(block) {
                    work.extend(self.block(block).preds.iter().copied());
                }
            }
            self.block_mut(header).is_loop_header = true;
            self.loops.push(lp);
        }

        // Parent: the smallest other loop whose body contains the header
        let parents: Vec<Option<LoopId>> = self
            .loops
            .iter()
            .map(|inner| {
                self.loops
                    .iter()
                    .filter(|outer| outer.id != inner.id && outer.blocks.contains(&inner.header))
                    .min_by_key(|outer| outer.blocks.len())
                    .map(|outer| outer.id)
            })
            .collect();
        for (lp, parent) in self.loops.iter_mut().zip(parents) {
            lp.parent = parent;
        }
    }

    fn insert_landing_pads(&mut self) {
        // Outer loops first so inner landing pads join their enclosing bodies
        let mut order: Vec<LoopId> = self.loops.iter().map(|l| l.id).collect();
        order.sort_by_key(|id| self.loop_depth(*id));

        for id in order {
            let header = self.loop_(id).header;
            let pad = self.add_block();
            {
                let block = self.block_mut(pad);
                block.terminator = Terminator::Jump(header);
                block.is_landing_pad = true;
            }

            let entering: Vec<BlockId> = self
                .block(header)
                .preds
                .iter()
                .copied()
                .filter(|p| !self.loop_(id).contains(*p))
                .collect();
            for pred in entering {
                self.block_mut(pred).terminator.retarget(header, pad);
            }
            if self.entry == header {
                self.entry = pad;
            }

            self.loop_mut(id).landing_pad = pad;
            let mut ancestor = self.loop_(id).parent;
            while let Some(outer) = ancestor {
                self.loop_mut(outer).blocks.insert(pad);
                ancestor = self.loop_(outer).parent;
            }
        }
    }

    fn loop_depth(&self, id: LoopId) -> usize {
        let mut depth = 0;
        let mut current = self.loop_(id).parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.loop_(parent).parent;
        }
        depth
    }

    fn assign_innermost_loops(&mut self) {
        let innermost: Vec<Option<LoopId>> = self
            .blocks
            .iter()
            .map(|b| {
                self.loops
                    .iter()
                    .filter(|l| l.contains(b.id))
                    .min_by_key(|l| l.blocks.len())
                    .map(|l| l.id)
            })
            .collect();
        for (block, lp) in self.blocks.iter_mut().zip(innermost) {
            block.loop_id = lp;
        }
    }

    /// Blocks of a loop in reverse post-order
    pub fn loop_rpo(&self, id: LoopId) -> Vec<BlockId> {
        let lp = self.loop_(id);
        self.rpo.iter().copied().filter(|b| lp.contains(*b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry -> header <-> body, header -> exit
    fn make_loop_graph() -> (FlowGraph, BlockId, BlockId, BlockId) {
        let mut graph = FlowGraph::new();
        let header = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.block_mut(graph.entry).terminator = Terminator::Jump(header);
        graph.block_mut(header).terminator = Terminator::Branch {
            op: BranchOp::True,
            src1: Opnd::BoolConst(true),
            src2: None,
            then_block: body,
            else_block: exit,
        };
        graph.block_mut(body).terminator = Terminator::Jump(header);
        graph.block_mut(exit).terminator = Terminator::Return(None);
        (graph, header, body, exit)
    }

    #[test]
    fn test_finalize_finds_loop_and_inserts_landing_pad() {
        let (mut graph, header, body, exit) = make_loop_graph();
        graph.finalize().unwrap();

        assert_eq!(graph.loops().len(), 1);
        let lp = &graph.loops()[0];
        assert_eq!(lp.header, header);
        assert_eq!(lp.back_edges, vec![body]);
        assert!(lp.contains(body));
        assert!(!lp.contains(exit));

        let pad = lp.landing_pad;
        assert!(graph.block(pad).is_landing_pad);
        assert_eq!(graph.successors(graph.entry), vec![pad]);
        assert_eq!(graph.block(header).preds.len(), 2);
        assert!(graph.is_back_edge(body, header));
        assert!(!graph.is_back_edge(pad, header));
        assert_eq!(graph.block(body).loop_id, Some(lp.id));
        assert_eq!(graph.block(pad).loop_id, None);
    }

    #[test]
    fn test_rpo_visits_header_before_body() {
        let (mut graph, header, body, _) = make_loop_graph();
        graph.finalize().unwrap();
        let rpo = graph.rpo();
        let pos = |b: BlockId| rpo.iter().position(|x| *x == b).unwrap();
        assert!(pos(header) < pos(body));
        assert!(graph.dominates(header, body));
        assert!(!graph.dominates(body, header));
    }

    #[test]
    fn test_nested_loops() {
        let mut graph = FlowGraph::new();
        let outer = graph.add_block();
        let inner = graph.add_block();
        let inner_body = graph.add_block();
        let outer_latch = graph.add_block();
        let exit = graph.add_block();
        let branch = |then_block, else_block| Terminator::Branch {
            op: BranchOp::True,
            src1: Opnd::BoolConst(true),
            src2: None,
            then_block,
            else_block,
        };
        graph.block_mut(graph.entry).terminator = Terminator::Jump(outer);
        graph.block_mut(outer).terminator = branch(inner, exit);
        graph.block_mut(inner).terminator = branch(inner_body, outer_latch);
        graph.block_mut(inner_body).terminator = Terminator::Jump(inner);
        graph.block_mut(outer_latch).terminator = Terminator::Jump(outer);
        graph.block_mut(exit).terminator = Terminator::Return(None);
        graph.finalize().unwrap();

        let outer_loop = graph.loop_of_header(outer).unwrap();
        let inner_loop = graph.loop_of_header(inner).unwrap();
        assert_eq!(graph.loop_(inner_loop).parent, Some(outer_loop));
        let inner_pad = graph.loop_(inner_loop).landing_pad;
        assert!(graph.loop_(outer_loop).contains(inner_pad));
        assert_eq!(graph.loop_chain(inner_body), vec![inner_loop, outer_loop]);
        assert!(graph.is_loop_nested_in(inner_loop, outer_loop));
    }

    #[test]
    fn test_missing_terminator_is_malformed() {
        let mut graph = FlowGraph::new();
        graph.add_block();
        graph.block_mut(graph.entry).terminator = Terminator::Return(None);
        assert!(matches!(
            graph.finalize(),
            Err(GlobOptError::MalformedFlowGraph(_))
        ));
    }
}
