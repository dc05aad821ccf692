// eval.rs: Reference interpreter for stencil functions
//
// Executes a function over concrete f64 input grids, materializing each
// temporary over its producer's computed domain. Any read outside a
// materialized box is an error rather than a silent default, which makes the
// interpreter a direct check of shape soundness. It is the oracle for the
// equivalence tests of inlining and unrolling.
//
// Preconditions: shapes are fresh (shape-inference ran on this exact IR).
// Postconditions: every output grid covers its declared domain.
// Failure modes: EvalError.
// Side effects: none.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::bbox::BoundingBox;
use crate::graph::topo_order;
use crate::id::TempId;
use crate::ir::{Body, BodyOp, Function, Operand};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("shape information is stale; run shape-inference before evaluating")]
    StaleShapes,
    #[error("no input grid for buffer '@{0}'")]
    MissingInput(String),
    #[error("apply '{region}' reads {operand} at {point:?}, outside the materialized box")]
    OutOfBounds {
        region: String,
        operand: String,
        point: Vec<i64>,
    },
    #[error("unknown callee '{callee}' with {arity} arguments")]
    UnknownCallee { callee: String, arity: usize },
    #[error("cyclic dependency between apply regions")]
    Cyclic,
}

// ── Grid ────────────────────────────────────────────────────────────────────

/// Dense row-major f64 storage over a box.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub domain: BoundingBox,
    data: Vec<f64>,
}

impl Grid {
    pub fn new(domain: BoundingBox, fill: f64) -> Self {
        let len = domain.volume() as usize;
        Grid {
            domain,
            data: vec![fill; len],
        }
    }

    pub fn from_fn(domain: BoundingBox, mut f: impl FnMut(&[i64]) -> f64) -> Self {
        let data = domain.points().map(|p| f(&p)).collect();
        Grid { domain, data }
    }

    fn linear(&self, point: &[i64]) -> Option<usize> {
        if !self.domain.contains_point(point) {
            return None;
        }
        let mut index = 0usize;
        for (d, &p) in point.iter().enumerate() {
            index = index * self.domain.extent(d) as usize + (p - self.domain.lb[d]) as usize;
        }
        Some(index)
    }

    pub fn get(&self, point: &[i64]) -> Option<f64> {
        self.linear(point).map(|i| self.data[i])
    }

    /// Store `value` at `point`; false when the point is outside the grid.
    pub fn set(&mut self, point: &[i64], value: f64) -> bool {
        match self.linear(point) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }
}

// ── Scalar semantics ────────────────────────────────────────────────────────

fn call_builtin(callee: &str, args: &[f64]) -> Result<f64, EvalError> {
    let v = match (callee, args) {
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tanh", [x]) => x.tanh(),
        ("floor", [x]) => x.floor(),
        ("trace", [x]) => *x,
        ("pow", [x, y]) => x.powf(*y),
        ("hypot", [x, y]) => x.hypot(*y),
        _ => {
            return Err(EvalError::UnknownCallee {
                callee: callee.to_string(),
                arity: args.len(),
            })
        }
    };
    Ok(v)
}

/// Evaluate `body` at `point`, returning its return values. `read(slot, p)`
/// supplies operand values at absolute points.
pub fn eval_body_at(
    body: &Body,
    point: &[i64],
    read: &mut dyn FnMut(usize, &[i64]) -> Result<f64, EvalError>,
) -> Result<Vec<f64>, EvalError> {
    let mut values: Vec<f64> = Vec::with_capacity(body.ops.len());
    for op in &body.ops {
        let v = match op {
            BodyOp::Access { operand, offset } => {
                let at: Vec<i64> = point.iter().zip(&offset.0).map(|(p, o)| p + o).collect();
                read(*operand, &at)?
            }
            BodyOp::Index { dim, offset } => (point[*dim] + offset.0[*dim]) as f64,
            BodyOp::Constant(c) => *c,
            BodyOp::Unary { op, arg } => op.apply(values[arg.index()]),
            BodyOp::Binary { op, lhs, rhs } => op.apply(values[lhs.index()], values[rhs.index()]),
            BodyOp::Call { callee, args, .. } => {
                let args: Vec<f64> = args.iter().map(|a| values[a.index()]).collect();
                call_builtin(callee, &args)?
            }
        };
        values.push(v);
    }
    Ok(body.ret.values.iter().map(|v| values[v.index()]).collect())
}

// ── Function evaluation ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Evaluation {
    /// Output values over each mark's declared domain, keyed by temporary name.
    pub outputs: HashMap<String, Grid>,
    /// Every materialized temporary.
    pub temps: HashMap<TempId, Grid>,
    /// Number of impure calls executed.
    pub side_effects: usize,
}

/// Run `func` on `inputs` (keyed by buffer name).
pub fn evaluate(func: &Function, inputs: &HashMap<String, Grid>) -> Result<Evaluation, EvalError> {
    if !func.shapes_fresh() {
        return Err(EvalError::StaleShapes);
    }
    let order = topo_order(func).map_err(|_| EvalError::Cyclic)?;
    let mut temps: HashMap<TempId, Grid> = HashMap::new();
    let mut side_effects = 0usize;

    for id in order {
        let Some(region) = func.region(id) else { continue };
        let Some(domain) = region.shape.as_box() else {
            trace!(region = %region.name, "skipping dead region");
            continue;
        };
        let plan = region.iteration_plan(domain);
        let mut results: Vec<Grid> = region.results.iter().map(|_| Grid::new(domain.clone(), 0.0)).collect();

        let mut read = |slot: usize, at: &[i64]| -> Result<f64, EvalError> {
            let operand = region.operands.get(slot).copied();
            let value = match operand {
                Some(Operand::Temp(t)) => temps.get(&t).and_then(|g| g.get(at)),
                Some(Operand::Buffer(b)) => {
                    let name = func.buffer(b).map(|b| b.name.clone()).unwrap_or_default();
                    let grid = inputs.get(&name).ok_or(EvalError::MissingInput(name))?;
                    grid.get(at)
                }
                None => None,
            };
            value.ok_or_else(|| EvalError::OutOfBounds {
                region: region.name.clone(),
                operand: operand.map(|o| func.operand_name(o)).unwrap_or_default(),
                point: at.to_vec(),
            })
        };

        let body_calls = region.body.ops.iter().filter(|o| o.has_side_effects()).count();
        if let Some(main) = &plan.main {
            let k = region.body.ret.factor() as usize;
            for base in main.points_with_step(plan.axis, plan.step) {
                let values = eval_body_at(&region.body, &base, &mut read)?;
                side_effects += body_calls;
                for (j, grid) in results.iter_mut().enumerate() {
                    for r in 0..k {
                        let mut p = base.clone();
                        if k > 1 {
                            p[plan.axis] += r as i64;
                        }
                        grid.set(&p, values[j * k + r]);
                    }
                }
            }
        }
        if let (Some(epilogue), Some(tail)) = (&region.epilogue, &plan.epilogue) {
            let epi_calls = epilogue.ops.iter().filter(|o| o.has_side_effects()).count();
            for p in tail.points() {
                let values = eval_body_at(epilogue, &p, &mut read)?;
                side_effects += epi_calls;
                for (j, grid) in results.iter_mut().enumerate() {
                    grid.set(&p, values[j]);
                }
            }
        }

        for (t, grid) in region.results.iter().zip(results) {
            temps.insert(*t, grid);
        }
    }

    let mut outputs = HashMap::new();
    for mark in &func.outputs {
        let Some(temp) = func.temp(mark.temp) else { continue };
        let source = temps.get(&mark.temp);
        let mut missing = None;
        let grid = Grid::from_fn(mark.domain.clone(), |p| match source.and_then(|g| g.get(p)) {
            Some(v) => v,
            None => {
                missing.get_or_insert_with(|| p.to_vec());
                f64::NAN
            }
        });
        if let Some(point) = missing {
            return Err(EvalError::OutOfBounds {
                region: func.region(temp.producer).map(|r| r.name.clone()).unwrap_or_default(),
                operand: format!("%{}", temp.name),
                point,
            });
        }
        outputs.insert(temp.name.clone(), grid);
    }

    Ok(Evaluation {
        outputs,
        temps,
        side_effects,
    })
}
