// Scenario tests: end-to-end behavior of the three passes on small,
// hand-written stencil functions.
//
// Functions are written in the textual IR and loaded through the library
// API (parse → resolve), then driven pass by pass.

use stencil_opt::bbox::{BoundingBox, Offset, Shape};
use stencil_opt::diag::codes;
use stencil_opt::error::PassError;
use stencil_opt::inline::inline_function;
use stencil_opt::ir::{BodyOp, Function, Operand};
use stencil_opt::resolve::load_module;
use stencil_opt::shape_infer::infer_shapes;
use stencil_opt::unroll::{unroll_function, RemainderPolicy, UnrollOptions, UnrollRejection};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn load(source: &str) -> Function {
    let mut module = load_module(source).unwrap_or_else(|d| panic!("load failed: {d:#?}"));
    assert_eq!(module.functions.len(), 1);
    module.functions.remove(0)
}

fn b1(lb: i64, ub: i64) -> BoundingBox {
    BoundingBox::from_ranges(&[(lb, ub)])
}

fn temp_shape(f: &Function, name: &str) -> Shape {
    let id = f.find_temp(name).unwrap_or_else(|| panic!("no temporary %{name}"));
    f.temp(id).unwrap().shape.clone()
}

fn access_offsets(f: &Function, region: &str) -> Vec<(usize, Vec<i64>)> {
    let id = f.find_region(region).unwrap();
    f.region(id)
        .unwrap()
        .body
        .accesses()
        .map(|(_, slot, o)| (slot, o.0.clone()))
        .collect()
}

const THREE_POINT: &str = "
    func smooth rank 1 {
      buffer @in : f64
      %t0 = apply r0(@in) -> f64 {
        %0 = access @in [-1]
        %1 = access @in [0]
        %2 = access @in [1]
        %3 = add %0, %1
        %4 = add %3, %2
        return %4
      }
      output %t0 [0:10]
    }";

const COPY_CHAIN: &str = "
    func smooth rank 1 {
      buffer @in : f64
      %t0 = apply r0(@in) -> f64 {
        %0 = access @in [-1]
        %1 = access @in [0]
        %2 = access @in [1]
        %3 = add %0, %1
        %4 = add %3, %2
        return %4
      }
      %t1 = apply r1(%t0) -> f64 {
        %0 = access %t0 [0]
        return %0
      }
      output %t1 [0:10]
    }";

// ── Shape inference ─────────────────────────────────────────────────────────

#[test]
fn three_point_stencil_shapes() {
    let mut f = load(THREE_POINT);
    let result = infer_shapes(&mut f).unwrap();
    assert!(result.diagnostics.is_empty());
    assert_eq!(temp_shape(&f, "t0"), Shape::Known(b1(0, 10)));
    assert_eq!(f.buffers[0].required, Shape::Known(b1(-1, 11)));
    assert!(f.shapes_fresh());
}

#[test]
fn shapes_compose_through_a_chain() {
    let mut f = load(
        "func f rank 2 {
           buffer @in : f64
           %a = apply ra(@in) -> f64 { %0 = access @in [0, -1] %1 = access @in [0, 1] %2 = sub %0, %1 return %2 }
           %b = apply rb(%a) -> f64 { %0 = access %a [-2, 0] %1 = access %a [1, 0] %2 = max %0, %1 return %2 }
           output %b [0:4, 0:4]
         }",
    );
    infer_shapes(&mut f).unwrap();
    assert_eq!(
        temp_shape(&f, "a"),
        Shape::Known(BoundingBox::from_ranges(&[(-2, 5), (0, 4)]))
    );
    assert_eq!(
        f.buffers[0].required,
        Shape::Known(BoundingBox::from_ranges(&[(-2, 5), (-1, 5)]))
    );
}

#[test]
fn multiple_consumers_take_the_union() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64
           %a = apply ra(@in) -> f64 { %0 = access @in [0] return %0 }
           %l = apply rl(%a) -> f64 { %0 = access %a [-3] return %0 }
           %r = apply rr(%a) -> f64 { %0 = access %a [2] return %0 }
           output %l [0:4]
           output %r [10:12]
         }",
    );
    infer_shapes(&mut f).unwrap();
    assert_eq!(temp_shape(&f, "a"), Shape::Known(b1(-3, 14)));
}

#[test]
fn cycle_is_rejected_with_the_offending_regions() {
    let mut f = load(
        "func f rank 1 {
           %a = apply ra(%b) -> f64 { %0 = access %b [1] return %0 }
           %b = apply rb(%a) -> f64 { %0 = access %a [-1] return %0 }
           output %a [0:4]
         }",
    );
    let err = infer_shapes(&mut f).unwrap_err();
    let PassError::CyclicDependency { cycle_names, .. } = &err else {
        panic!("expected a cycle, got {err:?}");
    };
    assert!(cycle_names.contains(&"ra".to_string()));
    assert!(cycle_names.contains(&"rb".to_string()));
    assert_eq!(err.code(), codes::E0200);
    assert!(!f.shapes_fresh());
}

#[test]
fn out_of_bounds_external_access() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64 domain [0:10]
           %t = apply r(@in) -> f64 { %0 = access @in [-1] return %0 }
           output %t [0:10]
         }",
    );
    let err = infer_shapes(&mut f).unwrap_err();
    match &err {
        PassError::OutOfBoundsAccess {
            region_name,
            buffer_name,
            offset,
            accessed,
            ..
        } => {
            assert_eq!(region_name, "r");
            assert_eq!(buffer_name, "in");
            assert_eq!(offset, &Offset(vec![-1]));
            assert_eq!(accessed, &b1(-1, 9));
        }
        other => panic!("expected out-of-bounds, got {other:?}"),
    }
    let diag = err.to_diagnostic(&f.name);
    assert_eq!(diag.code, Some(codes::E0201));
}

#[test]
fn dead_region_is_reported_not_fatal() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64
           %t = apply live(@in) -> f64 { %0 = access @in [0] return %0 }
           %u = apply dead(@in) -> f64 { %0 = access @in [5] return %0 }
           output %t [0:4]
         }",
    );
    let result = infer_shapes(&mut f).unwrap();
    assert_eq!(result.dead_regions, vec![f.find_region("dead").unwrap()]);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code, Some(codes::W0300));
    assert_eq!(temp_shape(&f, "u"), Shape::Unknown);
    // The dead region's accesses do not widen the buffer.
    assert_eq!(f.buffers[0].required, Shape::Known(b1(0, 4)));
}

#[test]
fn long_chain_terminates_within_bound() {
    let mut text = String::from("func chain rank 1 {\n  buffer @in : f64\n");
    text.push_str("  %t0 = apply r0(@in) -> f64 { %0 = access @in [1] return %0 }\n");
    for i in 1..1000 {
        text.push_str(&format!(
            "  %t{i} = apply r{i}(%t{p}) -> f64 {{ %0 = access %t{p} [1] return %0 }}\n",
            p = i - 1
        ));
    }
    text.push_str("  output %t999 [0:8]\n}\n");
    let mut f = load(&text);
    let result = infer_shapes(&mut f).unwrap();
    assert!(result.stats.grow_events <= result.stats.step_bound);
    assert_eq!(result.stats.region_visits, 1000);
    assert_eq!(temp_shape(&f, "t0"), Shape::Known(b1(999, 1007)));
    assert_eq!(f.buffers[0].required, Shape::Known(b1(1000, 1008)));
}

// ── Inlining ────────────────────────────────────────────────────────────────

#[test]
fn single_use_producer_is_inlined() {
    let mut f = load(COPY_CHAIN);
    infer_shapes(&mut f).unwrap();
    let result = inline_function(&mut f).unwrap();
    assert_eq!(result.inlined.len(), 1);
    assert_eq!(result.inlined[0].producer, "r0");
    assert_eq!(result.inlined[0].consumer, "r1");

    assert!(f.find_region("r0").is_none());
    assert!(f.find_temp("t0").is_none());
    let r1 = f.region(f.find_region("r1").unwrap()).unwrap();
    assert_eq!(r1.operands, vec![Operand::Buffer(stencil_opt::id::BufferId(0))]);
    assert_eq!(
        access_offsets(&f, "r1"),
        vec![(0, vec![-1]), (0, vec![0]), (0, vec![1])]
    );
    assert!(!f.shapes_fresh());

    infer_shapes(&mut f).unwrap();
    assert_eq!(temp_shape(&f, "t1"), Shape::Known(b1(0, 10)));
    assert_eq!(f.buffers[0].required, Shape::Known(b1(-1, 11)));
}

#[test]
fn inlining_composes_consumer_offset() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64
           %p = apply prod(@in) -> f64 { %0 = access @in [-1] %1 = index 0 [0] %2 = mul %0, %1 return %2 }
           %c = apply cons(%p) -> f64 { %0 = const 2.0 %1 = access %p [3] %2 = mul %0, %1 return %2 }
           output %c [0:4]
         }",
    );
    infer_shapes(&mut f).unwrap();
    inline_function(&mut f).unwrap();
    let id = f.find_region("cons").unwrap();
    let body = &f.region(id).unwrap().body;
    assert_eq!(body.ops[1], BodyOp::Access { operand: 0, offset: Offset(vec![2]) });
    assert_eq!(body.ops[2], BodyOp::Index { dim: 0, offset: Offset(vec![3]) });
}

#[test]
fn inlining_requires_fresh_shapes() {
    let mut f = load(COPY_CHAIN);
    let err = inline_function(&mut f).unwrap_err();
    assert!(matches!(err, PassError::StaleShapes { pass: "inlining" }));
    assert_eq!(err.code(), codes::E0202);
}

#[test]
fn multi_use_and_impure_producers_stay() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64
           %a = apply shared(@in) -> f64 { %0 = access @in [0] return %0 }
           %b = apply noisy(@in) -> f64 { %0 = access @in [0] %1 = call impure trace(%0) return %1 }
           %c = apply use(%a, %b) -> f64 {
             %0 = access %a [0]
             %1 = access %a [1]
             %2 = access %b [0]
             %3 = add %0, %1
             %4 = add %3, %2
             return %4
           }
           output %c [0:4]
         }",
    );
    infer_shapes(&mut f).unwrap();
    let result = inline_function(&mut f).unwrap();
    assert!(!result.changed());
    assert_eq!(f.region_count(), 3);
    assert!(f.shapes_fresh());
}

// ── Unrolling ───────────────────────────────────────────────────────────────

#[test]
fn unroll_by_two_computes_pairs() {
    let mut f = load(THREE_POINT);
    infer_shapes(&mut f).unwrap();
    let opts = UnrollOptions {
        factor: 2,
        ..UnrollOptions::default()
    };
    let result = unroll_function(&mut f, &opts).unwrap();
    assert_eq!(result.unrolled.len(), 1);

    let id = f.find_region("r0").unwrap();
    let region = f.region(id).unwrap();
    assert_eq!(region.body.ret.values.len(), 2);
    assert_eq!(
        access_offsets(&f, "r0"),
        vec![
            (0, vec![-1]),
            (0, vec![0]),
            (0, vec![1]),
            (0, vec![0]),
            (0, vec![1]),
            (0, vec![2]),
        ]
    );

    infer_shapes(&mut f).unwrap();
    let region = f.region(id).unwrap();
    let domain = region.shape.as_box().unwrap().clone();
    assert_eq!(domain, b1(0, 10));
    let plan = region.iteration_plan(&domain);
    let bases: Vec<i64> = plan
        .main
        .unwrap()
        .points_with_step(plan.axis, plan.step)
        .map(|p| p[0])
        .collect();
    assert_eq!(bases, vec![0, 2, 4, 6, 8]);
    assert!(plan.epilogue.is_none());
    assert_eq!(f.buffers[0].required, Shape::Known(b1(-1, 11)));
}

#[test]
fn indivisible_extent_is_skipped_by_default() {
    let mut f = load(&THREE_POINT.replace("[0:10]", "[0:7]"));
    infer_shapes(&mut f).unwrap();
    let before = f.clone();
    let result = unroll_function(&mut f, &UnrollOptions::default()).unwrap();
    assert!(!result.changed());
    assert_eq!(
        result.rejected[0].1,
        UnrollRejection::NotDivisible {
            axis: 0,
            extent: 7,
            factor: 2
        }
    );
    assert_eq!(result.diagnostics[0].code, Some(codes::W0301));
    assert_eq!(f, before);
}

#[test]
fn indivisible_extent_gets_an_epilogue_when_asked() {
    let mut f = load(&THREE_POINT.replace("[0:10]", "[0:7]"));
    infer_shapes(&mut f).unwrap();
    let opts = UnrollOptions {
        remainder: RemainderPolicy::Epilogue,
        ..UnrollOptions::default()
    };
    unroll_function(&mut f, &opts).unwrap();
    infer_shapes(&mut f).unwrap();

    let region = f.region(f.find_region("r0").unwrap()).unwrap();
    assert!(region.epilogue.is_some());
    let domain = region.shape.as_box().unwrap();
    assert_eq!(domain, &b1(0, 7));
    let plan = region.iteration_plan(domain);
    assert_eq!(plan.main, Some(b1(0, 5)));
    assert_eq!(plan.epilogue, Some(b1(6, 7)));
    assert_eq!(f.buffers[0].required, Shape::Known(b1(-1, 8)));
}

#[test]
fn factor_beyond_the_extent_leaves_the_region_alone() {
    let mut f = load(&THREE_POINT.replace("[0:10]", "[0:2]"));
    infer_shapes(&mut f).unwrap();
    let before = f.clone();
    let opts = UnrollOptions {
        factor: 1000,
        remainder: RemainderPolicy::Epilogue,
        ..UnrollOptions::default()
    };
    let result = unroll_function(&mut f, &opts).unwrap();
    assert!(!result.changed());
    assert_eq!(
        result.rejected[0].1,
        UnrollRejection::ExtentTooSmall {
            axis: 0,
            extent: 2,
            factor: 1000
        }
    );
    assert_eq!(result.diagnostics[0].code, Some(codes::W0301));
    assert_eq!(f, before);
    let region = f.region(f.find_region("r0").unwrap()).unwrap();
    assert_eq!(region.body.ops.len(), 5);
}

#[test]
fn empty_output_domain_is_never_unrolled() {
    let mut f = load(&THREE_POINT.replace("[0:10]", "empty"));
    infer_shapes(&mut f).unwrap();
    let before = f.clone();
    let result = unroll_function(&mut f, &UnrollOptions::default()).unwrap();
    assert!(!result.changed());
    assert_eq!(
        result.rejected[0].1,
        UnrollRejection::ExtentTooSmall {
            axis: 0,
            extent: 0,
            factor: 2
        }
    );
    assert_eq!(result.diagnostics[0].code, Some(codes::W0301));
    assert_eq!(f, before);
}

#[test]
fn unrolled_region_without_epilogue_rounds_its_domain_up() {
    let mut f = load(
        "func f rank 1 {
           buffer @in : f64
           %t = apply r(@in) -> f64 { %0 = access @in [0] %1 = access @in [1] return %0, %1 unroll 0 by 2 }
           output %t [0:7]
         }",
    );
    infer_shapes(&mut f).unwrap();
    let region = f.region(f.find_region("r").unwrap()).unwrap();
    assert_eq!(region.shape, Shape::Known(b1(0, 8)));
    assert_eq!(temp_shape(&f, "t"), Shape::Known(b1(0, 7)));
    assert_eq!(f.buffers[0].required, Shape::Known(b1(0, 8)));
}

#[test]
fn unrolling_requires_fresh_shapes() {
    let mut f = load(THREE_POINT);
    let err = unroll_function(&mut f, &UnrollOptions::default()).unwrap_err();
    assert!(matches!(err, PassError::StaleShapes { pass: "unrolling" }));
}
