// pass.rs: Pass descriptor module: metadata, factories, shape re-run planning
//
// Declares the optimizer's three function passes, what each needs and what
// each invalidates. The pipeline runner uses `plan_passes` to insert the
// shape-inference runs that the rewriting passes depend on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diag::Diagnostic;
use crate::error::PassError;
use crate::ir::Function;
use crate::unroll::UnrollOptions;

// ── Certificates ───────────────────────────────────────────────────────────

/// A set of named postconditions checked after a stage.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that do not hold.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass identifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassId {
    ShapeInference,
    Inlining,
    Unrolling,
}

/// All pass IDs in canonical execution order.
pub const ALL_PASSES: [PassId; 3] = [PassId::ShapeInference, PassId::Inlining, PassId::Unrolling];

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Registration name, used on the command line and in diagnostics.
    pub name: &'static str,
    /// The pass refuses to run unless shape data is fresh.
    pub requires_fresh_shapes: bool,
    /// A run that changes the IR leaves shape data stale.
    pub invalidates_shapes: bool,
    pub summary: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::ShapeInference => PassDescriptor {
            name: "shape-inference",
            requires_fresh_shapes: false,
            invalidates_shapes: false,
            summary: "compute the minimal required box of every temporary and apply region",
        },
        PassId::Inlining => PassDescriptor {
            name: "inlining",
            requires_fresh_shapes: true,
            invalidates_shapes: true,
            summary: "splice single-use apply regions into their consumer",
        },
        PassId::Unrolling => PassDescriptor {
            name: "unrolling",
            requires_fresh_shapes: true,
            invalidates_shapes: true,
            summary: "replicate apply bodies along an axis by a static factor",
        },
    }
}

impl PassId {
    pub fn name(self) -> &'static str {
        descriptor(self).name
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PASSES
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = ALL_PASSES.iter().map(|p| p.name()).collect();
                format!("unknown pass '{}' (known: {})", s, known.join(", "))
            })
    }
}

// ── Pass units ─────────────────────────────────────────────────────────────

/// What a successful pass run reports back to the driver.
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub changed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// A single-function transformation unit.
pub trait FunctionPass {
    fn id(&self) -> PassId;

    fn name(&self) -> &'static str {
        self.id().name()
    }

    fn run(&mut self, func: &mut Function) -> Result<PassOutcome, PassError>;
}

pub struct ShapeInferencePass;

impl FunctionPass for ShapeInferencePass {
    fn id(&self) -> PassId {
        PassId::ShapeInference
    }

    fn run(&mut self, func: &mut Function) -> Result<PassOutcome, PassError> {
        let result = crate::shape_infer::infer_shapes(func)?;
        if !result.cert.all_pass() {
            return Err(PassError::InvalidIr {
                obligation: result.cert.failed()[0],
                region: None,
                message: format!(
                    "shape inference postconditions failed: {}",
                    result.cert.failed().join(", ")
                ),
            });
        }
        Ok(PassOutcome {
            changed: false,
            diagnostics: result.diagnostics,
        })
    }
}

pub struct InliningPass;

impl FunctionPass for InliningPass {
    fn id(&self) -> PassId {
        PassId::Inlining
    }

    fn run(&mut self, func: &mut Function) -> Result<PassOutcome, PassError> {
        let result = crate::inline::inline_function(func)?;
        Ok(PassOutcome {
            changed: result.changed(),
            diagnostics: Vec::new(),
        })
    }
}

pub struct UnrollingPass {
    pub options: UnrollOptions,
}

impl FunctionPass for UnrollingPass {
    fn id(&self) -> PassId {
        PassId::Unrolling
    }

    fn run(&mut self, func: &mut Function) -> Result<PassOutcome, PassError> {
        let result = crate::unroll::unroll_function(func, &self.options)?;
        Ok(PassOutcome {
            changed: result.changed(),
            diagnostics: result.diagnostics,
        })
    }
}

/// Factory: a fresh transformation unit for `id`.
pub fn create_pass(id: PassId, unroll: &UnrollOptions) -> Box<dyn FunctionPass> {
    match id {
        PassId::ShapeInference => Box::new(ShapeInferencePass),
        PassId::Inlining => Box::new(InliningPass),
        PassId::Unrolling => Box::new(UnrollingPass {
            options: unroll.clone(),
        }),
    }
}

// ── Planning ───────────────────────────────────────────────────────────────

/// Expand a requested pass list with the shape-inference runs the rewriting
/// passes require: before any pass that needs fresh shapes, and (when
/// `refresh_at_end`) after a trailing rewrite.
pub fn plan_passes(requested: &[PassId], refresh_at_end: bool) -> Vec<PassId> {
    let mut plan = Vec::with_capacity(requested.len() * 2 + 1);
    let mut fresh = false;
    for &id in requested {
        let desc = descriptor(id);
        if desc.requires_fresh_shapes && !fresh {
            plan.push(PassId::ShapeInference);
        }
        plan.push(id);
        if id == PassId::ShapeInference {
            fresh = true;
        } else if desc.invalidates_shapes {
            fresh = false;
        }
    }
    if refresh_at_end && !fresh && !plan.is_empty() {
        plan.push(PassId::ShapeInference);
    }
    plan
}

// ── Tests ──────────────────────────────────────────────────────────────────
