// Pipeline equivalence tests: verify that pass-driver orchestration produces
// identical IR to direct function-call chains, and that the optimized IR
// computes the same outputs as the input IR.
//
// For each demo module, optimize two ways:
// 1. Direct: infer_shapes → inline_function → infer_shapes →
//    unroll_function → infer_shapes
// 2. Orchestrated: run_pipeline(PipelineOptions::default())
//
// Assert byte-identical printed IR. This catches bugs in: pass planning,
// shape-inference re-runs between rewrites, option threading and
// per-function error handling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stencil_opt::eval::{evaluate, Evaluation, Grid};
use stencil_opt::inline::inline_function;
use stencil_opt::ir::{Function, Module};
use stencil_opt::pipeline::{run_pipeline, PipelineOptions};
use stencil_opt::resolve::load_module;
use stencil_opt::shape_infer::infer_shapes;
use stencil_opt::unroll::{unroll_function, RemainderPolicy, UnrollOptions};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_demo(name: &str) -> Module {
    let path = project_root().join("demos").join(name);
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    load_module(&source).unwrap_or_else(|d| panic!("{name}: load failed: {d:#?}"))
}

/// Optimize via direct function-call chain.
fn direct(module: &mut Module, unroll: &UnrollOptions) {
    for f in &mut module.functions {
        infer_shapes(f).unwrap_or_else(|e| panic!("{}: {e}", f.name));
        inline_function(f).unwrap();
        infer_shapes(f).unwrap();
        unroll_function(f, unroll).unwrap();
        infer_shapes(f).unwrap();
    }
}

/// Optimize via the pass driver.
fn orchestrated(module: &mut Module, unroll: &UnrollOptions) {
    let options = PipelineOptions {
        unroll: unroll.clone(),
        ..PipelineOptions::default()
    };
    let report = run_pipeline(module, &options, |_, _, _| {});
    assert!(report.all_succeeded(), "{:#?}", report.functions);
}

fn assert_equivalent(name: &str, unroll: UnrollOptions) {
    let mut a = load_demo(name);
    let mut b = a.clone();
    direct(&mut a, &unroll);
    orchestrated(&mut b, &unroll);
    assert_eq!(
        a.to_string(),
        b.to_string(),
        "{name}: direct and orchestrated IR differ"
    );
}

/// Deterministic input grids over every buffer's required box.
fn inputs_for(f: &Function) -> HashMap<String, Grid> {
    f.buffers
        .iter()
        .enumerate()
        .filter_map(|(i, b)| {
            let required = b.required.as_box()?.clone();
            let salt = i as i64 * 13 + 1;
            let grid = Grid::from_fn(required, |p| {
                p.iter().fold(salt, |acc, x| (acc * 31 + x).rem_euclid(97)) as f64 / 8.0
            });
            Some((b.name.clone(), grid))
        })
        .collect()
}

fn run(f: &Function) -> Evaluation {
    evaluate(f, &inputs_for(f)).unwrap_or_else(|e| panic!("{}: {e}", f.name))
}

// ── Direct vs orchestrated ──────────────────────────────────────────────────

#[test]
fn laplace_direct_matches_pipeline() {
    assert_equivalent("laplace.stn", UnrollOptions::default());
}

#[test]
fn diffusion_direct_matches_pipeline() {
    assert_equivalent("diffusion.stn", UnrollOptions::default());
}

#[test]
fn tail_direct_matches_pipeline_with_epilogue() {
    assert_equivalent(
        "tail.stn",
        UnrollOptions {
            factor: 2,
            remainder: RemainderPolicy::Epilogue,
            ..UnrollOptions::default()
        },
    );
}

#[test]
fn laplace_direct_matches_pipeline_second_axis() {
    assert_equivalent(
        "laplace.stn",
        UnrollOptions {
            axis: 1,
            factor: 4,
            ..UnrollOptions::default()
        },
    );
}

// ── Semantic preservation ───────────────────────────────────────────────────

fn assert_outputs_preserved(name: &str, unroll: UnrollOptions) {
    let mut original = load_demo(name);
    for f in &mut original.functions {
        infer_shapes(f).unwrap();
    }
    let mut optimized = original.clone();
    orchestrated(&mut optimized, &unroll);

    for (before, after) in original.functions.iter().zip(&optimized.functions) {
        let x = run(before);
        let y = run(after);
        assert_eq!(x.outputs, y.outputs, "{}: outputs changed", before.name);
        assert!(
            y.side_effects >= x.side_effects,
            "{}: impure calls were dropped",
            before.name
        );
    }
}

#[test]
fn optimization_preserves_laplace_outputs() {
    assert_outputs_preserved("laplace.stn", UnrollOptions::default());
}

#[test]
fn optimization_preserves_diffusion_outputs() {
    assert_outputs_preserved("diffusion.stn", UnrollOptions::default());
    assert_outputs_preserved(
        "diffusion.stn",
        UnrollOptions {
            factor: 3,
            remainder: RemainderPolicy::Epilogue,
            ..UnrollOptions::default()
        },
    );
}

#[test]
fn optimization_preserves_tail_outputs() {
    assert_outputs_preserved(
        "tail.stn",
        UnrollOptions {
            factor: 4,
            remainder: RemainderPolicy::Epilogue,
            ..UnrollOptions::default()
        },
    );
}
