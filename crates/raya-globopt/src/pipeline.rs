//! Compilation pipeline: built flow graph → global optimization → lowering hand-off
//!
//! The pipeline chains the stages a function goes through before lowering:
//! 1. Decide the per-function policies
//! 2. Enforce the size limits
//! 3. Validate the flow graph and find its loops
//! 4. Run the optimization passes
//! 5. Advance the function's phase
//!
//! A function whose compilation is abandoned is reported as such; the caller
//! keeps running it unoptimized.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GlobOptConfig;
use crate::error::{AbandonReason, GlobOptError};
use crate::func::phase::CompilePhase;
use crate::func::Func;
use crate::globopt::GlobOpt;
use crate::host::HostTypeInfo;
use crate::ir::instr::Opcode;

/// Errors from the compilation pipeline
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("GlobOpt error: {0}")]
    GlobOpt(#[from] GlobOptError),
}

/// An optimization pass over a built function
pub trait OptPass: Send + Sync {
    /// Name of this pass (for diagnostics)
    fn name(&self) -> &str;
    /// Run the pass, mutating the function in place
    fn run(&self, func: &mut Func, config: &GlobOptConfig) -> Result<(), GlobOptError>;
}

/// Optimizer that runs a sequence of passes
pub struct Optimizer {
    passes: Vec<Box<dyn OptPass>>,
}

impl Optimizer {
    /// Create an optimizer with the default pass pipeline
    pub fn new() -> Self {
        Optimizer {
            passes: vec![Box::new(GlobOptPass::new())],
        }
    }

    /// Create an empty optimizer (no passes)
    pub fn empty() -> Self {
        Optimizer { passes: vec![] }
    }

    /// Add a pass to the pipeline
    pub fn add_pass(&mut self, pass: Box<dyn OptPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes in order, stopping at the first failure
    pub fn optimize(&self, func: &mut Func, config: &GlobOptConfig) -> Result<(), GlobOptError> {
        for pass in &self.passes {
            debug!(target: "raya_globopt::globopt", func = %func.name, pass = pass.name(), "running pass");
            pass.run(func, config)?;
        }
        Ok(())
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The global optimizer as a pipeline pass
#[derive(Default)]
pub struct GlobOptPass {
    host: Option<Arc<dyn HostTypeInfo>>,
}

impl GlobOptPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult the host's type table while sequencing type checks
    pub fn with_host(host: Arc<dyn HostTypeInfo>) -> Self {
        GlobOptPass { host: Some(host) }
    }
}

impl OptPass for GlobOptPass {
    fn name(&self) -> &str {
        "glob-opt"
    }

    fn run(&self, func: &mut Func, config: &GlobOptConfig) -> Result<(), GlobOptError> {
        let mut glob_opt = match &self.host {
            Some(host) => GlobOpt::with_host(config, host.as_ref()),
            None => GlobOpt::new(config),
        };
        let summary = glob_opt.optimize(func)?;
        debug!(
            target: "raya_globopt::globopt",
            func = %func.name,
            hoisted_bound_checks = summary.hoisted_bound_checks,
            eliminated_bound_checks = summary.eliminated_bound_checks,
            bailouts = summary.bailouts,
            "glob-opt done"
        );
        Ok(())
    }
}

/// Checks and loads sitting in loop landing pads after optimization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HoistedChecks {
    pub array_checks: usize,
    pub length_loads: usize,
    pub head_segment_loads: usize,
    pub head_segment_length_loads: usize,
    pub bound_checks: usize,
}

impl HoistedChecks {
    pub fn collect(func: &Func) -> Self {
        let mut hoisted = HoistedChecks::default();
        for block in func.graph.blocks().filter(|b| b.is_landing_pad) {
            for instr in &block.instrs {
                match instr.opcode {
                    Opcode::BailOnNotArray => hoisted.array_checks += 1,
                    Opcode::LdArrayLength => hoisted.length_loads += 1,
                    Opcode::LdArrayHeadSegment => hoisted.head_segment_loads += 1,
                    Opcode::LdArrayHeadSegmentLength => hoisted.head_segment_length_loads += 1,
                    Opcode::BoundCheck => hoisted.bound_checks += 1,
                    _ => {}
                }
            }
        }
        hoisted
    }

    pub fn total(&self) -> usize {
        self.array_checks
            + self.length_loads
            + self.head_segment_loads
            + self.head_segment_length_loads
            + self.bound_checks
    }
}

/// Result of running one function through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileOutput {
    pub phase: CompilePhase,
    pub bailouts: usize,
    pub hoisted: HoistedChecks,
    /// The function runs unoptimized
    pub abandoned: bool,
    pub abandon_reason: Option<AbandonReason>,
}

impl CompileOutput {
    fn optimized(func: &Func) -> Self {
        CompileOutput {
            phase: func.phase(),
            bailouts: func.bailouts.len(),
            hoisted: HoistedChecks::collect(func),
            abandoned: false,
            abandon_reason: None,
        }
    }

    fn abandoned(func: &Func, reason: AbandonReason) -> Self {
        CompileOutput {
            phase: func.phase(),
            bailouts: 0,
            hoisted: HoistedChecks::default(),
            abandoned: true,
            abandon_reason: Some(reason),
        }
    }
}

/// Compile a function with the default optimizer
pub fn compile_function(func: &mut Func, config: &GlobOptConfig) -> Result<CompileOutput, CompileError> {
    compile_function_with(&Optimizer::new(), func, config)
}

/// Compile a function with a custom optimizer
pub fn compile_function_with(
    optimizer: &Optimizer,
    func: &mut Func,
    config: &GlobOptConfig,
) -> Result<CompileOutput, CompileError> {
    func.decide_policies(config);
    match run_stages(optimizer, func, config) {
        Ok(()) => Ok(CompileOutput::optimized(func)),
        Err(GlobOptError::AbandonCompilation { reason }) => {
            warn!(target: "raya_globopt::globopt", func = %func.name, %reason, "compilation abandoned");
            Ok(CompileOutput::abandoned(func, reason))
        }
        Err(err) => Err(err.into()),
    }
}

fn run_stages(optimizer: &Optimizer, func: &mut Func, config: &GlobOptConfig) -> Result<(), GlobOptError> {
    func.check_instr_count_limit(config)?;
    if !func.graph.is_finalized() {
        func.graph.finalize()?;
    }
    func.advance_to(CompilePhase::FlowGraphBuilt)?;
    optimizer.optimize(func, config)?;
    func.advance_to(CompilePhase::GlobOptDone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::opnd::Opnd;
    use parking_lot::Mutex;

    fn straight_line(func: &mut Func) {
        let mut b = IrBuilder::new(func);
        let (x, y) = (b.var(0), b.var(1));
        b.ld_const(x, 1);
        b.add_const(y, x, 2);
        b.ret(Some(Opnd::reg(y)));
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl OptPass for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, _func: &mut Func, _config: &GlobOptConfig) -> Result<(), GlobOptError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    #[test]
    fn test_default_pipeline() {
        assert_eq!(Optimizer::new().pass_names(), vec!["glob-opt"]);
        assert!(Optimizer::empty().pass_names().is_empty());
    }

    #[test]
    fn test_compile_advances_phase() {
        let mut func = Func::new_for_test();
        straight_line(&mut func);
        let output = compile_function(&mut func, &GlobOptConfig::default()).unwrap();
        assert!(!output.abandoned);
        assert_eq!(output.phase, CompilePhase::GlobOptDone);
        assert_eq!(output.hoisted.total(), 0);
        assert_eq!(func.phase(), CompilePhase::GlobOptDone);
    }

    #[test]
    fn test_passes_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut optimizer = Optimizer::empty();
        for name in ["first", "second"] {
            optimizer.add_pass(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
            }));
        }
        let mut func = Func::new_for_test();
        straight_line(&mut func);
        compile_function_with(&optimizer, &mut func, &GlobOptConfig::default()).unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_instruction_limit_abandons() {
        let mut func = Func::new_for_test();
        straight_line(&mut func);
        let config = GlobOptConfig {
            max_instr_count: 1,
            ..GlobOptConfig::default()
        };
        let output = compile_function(&mut func, &config).unwrap();
        assert!(output.abandoned);
        assert_eq!(
            output.abandon_reason,
            Some(AbandonReason::TooManyInstructions { count: 2, limit: 1 })
        );
        assert_eq!(func.phase(), CompilePhase::Built);
    }

    #[test]
    fn test_recompiling_is_a_phase_error() {
        let mut func = Func::new_for_test();
        straight_line(&mut func);
        compile_function(&mut func, &GlobOptConfig::default()).unwrap();
        let err = compile_function(&mut func, &GlobOptConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::GlobOpt(GlobOptError::PhaseOrder { .. })
        ));
    }
}
