// pipeline.rs: Pass orchestration over a module
//
// Expands the requested pass list with the mandated shape-inference re-runs
// and runs it on every function independently. A hard failure stops the
// remaining passes for that function only; the driver marks it unsuccessful
// and moves on to the next function.
//
// Preconditions: the module was resolved (or deserialized) without errors.
// Postconditions: one `FunctionReport` per function, in module order.
// Failure modes: none at module level; per-function failures are reported.
// Side effects: rewrites functions in place; calls `on_pass_complete` after
//               every pass for immediate display.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info, info_span, warn};

use crate::diag::{has_errors, Diagnostic};
use crate::error::PassError;
use crate::ir::{Function, Module};
use crate::pass::{create_pass, plan_passes, PassId, ALL_PASSES};
use crate::unroll::UnrollOptions;

// ── Configuration ──────────────────────────────────────────────────────────

/// Driver configuration, loadable from a JSON file.
///
/// ```json
/// { "passes": ["inlining", "unrolling"],
///   "unroll": { "axis": 0, "factor": 4, "remainder": "epilogue" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Requested passes, in order. Shape-inference re-runs are inserted.
    pub passes: Vec<PassId>,
    pub unroll: UnrollOptions,
    /// Leave fresh shape annotations behind after a trailing rewrite.
    pub refresh_shapes_at_end: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            passes: ALL_PASSES.to_vec(),
            unroll: UnrollOptions::default(),
            refresh_shapes_at_end: true,
        }
    }
}

impl PipelineOptions {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ── Reports ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FunctionReport {
    pub name: String,
    pub success: bool,
    /// Passes that ran to completion, including the failing one if any.
    pub passes_run: Vec<PassId>,
    pub diagnostics: Vec<Diagnostic>,
    pub failure: Option<PassError>,
}

#[derive(Debug, Default)]
pub struct ModuleReport {
    pub functions: Vec<FunctionReport>,
}

impl ModuleReport {
    pub fn all_succeeded(&self) -> bool {
        self.functions.iter().all(|f| f.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FunctionReport> {
        self.functions.iter().filter(|f| !f.success)
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.functions.iter().flat_map(|f| f.diagnostics.iter())
    }
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, timing log.
fn finish_pass(
    report: &mut FunctionReport,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(&str, PassId, &[Diagnostic]),
) {
    on_pass_complete(&report.name, pass_id, &diags);
    report.passes_run.push(pass_id);
    report.diagnostics.extend(diags);
    debug!(
        pass = pass_id.name(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the planned passes on every function of `module`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → error check.
pub fn run_pipeline(
    module: &mut Module,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(&str, PassId, &[Diagnostic]),
) -> ModuleReport {
    let plan = plan_passes(&options.passes, options.refresh_shapes_at_end);
    info!(
        functions = module.functions.len(),
        plan = ?plan.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "running pipeline"
    );
    let mut report = ModuleReport::default();
    for func in &mut module.functions {
        report
            .functions
            .push(run_function(func, &plan, options, &mut on_pass_complete));
    }
    report
}

fn run_function(
    func: &mut Function,
    plan: &[PassId],
    options: &PipelineOptions,
    on_pass_complete: &mut impl FnMut(&str, PassId, &[Diagnostic]),
) -> FunctionReport {
    let span = info_span!("function", name = %func.name);
    let _enter = span.enter();

    let mut report = FunctionReport {
        name: func.name.clone(),
        success: true,
        passes_run: Vec::with_capacity(plan.len()),
        diagnostics: Vec::new(),
        failure: None,
    };

    for &pass_id in plan {
        let mut pass = create_pass(pass_id, &options.unroll);
        let t = Instant::now();
        let outcome = {
            let _pass_span = debug_span!("pass", name = pass.name()).entered();
            pass.run(func)
        };
        let elapsed = t.elapsed();

        match outcome {
            Ok(outcome) => {
                if outcome.changed {
                    debug!(pass = pass_id.name(), "function rewritten");
                }
                let failed = has_errors(&outcome.diagnostics);
                finish_pass(&mut report, pass_id, outcome.diagnostics, elapsed, on_pass_complete);
                if failed {
                    report.success = false;
                    break;
                }
            }
            Err(err) => {
                warn!(pass = pass_id.name(), error = %err, "pass failed; skipping remaining passes");
                let diag = err.to_diagnostic(&func.name);
                finish_pass(&mut report, pass_id, vec![diag], elapsed, on_pass_complete);
                report.success = false;
                report.failure = Some(err);
                break;
            }
        }
    }
    report
}

// ── Tests ──────────────────────────────────────────────────────────────────
