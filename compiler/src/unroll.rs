// unroll.rs: Replicating apply bodies along a spatial axis
//
// Unrolling by k along axis `a` rewrites a region so that one iteration at
// base point p computes the points p, p+e_a, .., p+(k-1)e_a. Replica r is a
// copy of the body with every access and index offset displaced by r along
// `a`; the combined return yields k values per result, grouped by result.
//
// Temporaries stay point-addressed: replica r of result j is written at
// p + r e_a. Consumer accesses therefore keep their meaning and need no
// rewrite; only the producer's iteration stride changes.
//
// Preconditions: shape annotations are fresh.
// Postconditions: unrolled regions evaluate identically to the originals;
//   the shape stamp is invalidated if anything was unrolled.
// Failure modes: StaleShapes. Rejected regions are left untouched.
// Side effects: rewrites region bodies in place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::bbox::Offset;
use crate::diag::{codes, Diagnostic, Subject};
use crate::error::PassError;
use crate::graph::topo_order;
use crate::id::{ApplyId, ValueId};
use crate::ir::{Body, BodyOp, Function, ReturnOp, UnrollAttr};

// ── Configuration ───────────────────────────────────────────────────────────

/// What to do when the unroll factor does not divide the computed extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemainderPolicy {
    /// Leave the region untouched.
    #[default]
    Skip,
    /// Keep a non-unrolled copy of the body for the trailing points.
    Epilogue,
}

impl fmt::Display for RemainderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemainderPolicy::Skip => write!(f, "skip"),
            RemainderPolicy::Epilogue => write!(f, "epilogue"),
        }
    }
}

impl FromStr for RemainderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(RemainderPolicy::Skip),
            "epilogue" => Ok(RemainderPolicy::Epilogue),
            other => Err(format!("unknown remainder policy '{}' (expected skip or epilogue)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnrollOptions {
    pub axis: usize,
    pub factor: u32,
    pub remainder: RemainderPolicy,
    /// Restrict unrolling to these regions; empty means every live region.
    pub regions: Vec<String>,
}

impl Default for UnrollOptions {
    fn default() -> Self {
        UnrollOptions {
            axis: 0,
            factor: 2,
            remainder: RemainderPolicy::Skip,
            regions: Vec::new(),
        }
    }
}

// ── Rejections ──────────────────────────────────────────────────────────────

/// Why a region was left unrolled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnrollRejection {
    #[error("unroll factor {factor} is not at least 2")]
    InvalidFactor { factor: u32 },
    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("shape is unresolved; the region is unreachable from any output")]
    UnresolvedShape,
    #[error("region is already unrolled")]
    AlreadyUnrolled,
    #[error("extent {extent} along axis {axis} is smaller than the unroll factor {factor}")]
    ExtentTooSmall { axis: usize, extent: i64, factor: u32 },
    #[error("extent {extent} along axis {axis} is not divisible by {factor}")]
    NotDivisible { axis: usize, extent: i64, factor: u32 },
    #[error("region no longer exists")]
    Missing,
}

#[derive(Debug, Default)]
pub struct UnrollResult {
    pub unrolled: Vec<ApplyId>,
    pub rejected: Vec<(ApplyId, UnrollRejection)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl UnrollResult {
    pub fn changed(&self) -> bool {
        !self.unrolled.is_empty()
    }
}

// ── Rewrite ─────────────────────────────────────────────────────────────────

/// Replicate `body` `factor` times along `axis`.
pub fn replicate_body(body: &Body, axis: usize, factor: u32) -> Body {
    let n = body.ops.len() as u32;
    let mut ops = Vec::with_capacity(body.ops.len() * factor as usize);
    for r in 0..factor {
        let base = r * n;
        for op in &body.ops {
            let shifted = match op {
                BodyOp::Access { offset, .. } | BodyOp::Index { offset, .. } => {
                    op.shifted(&Offset::zeros(offset.rank()).shifted_along(axis, i64::from(r)))
                }
                _ => op.clone(),
            };
            ops.push(shifted.map_args(|v| ValueId(base + v.0)));
        }
    }
    let mut values = Vec::with_capacity(body.ret.values.len() * factor as usize);
    for v in &body.ret.values {
        for r in 0..factor {
            values.push(ValueId(r * n + v.0));
        }
    }
    Body {
        ops,
        ret: ReturnOp {
            values,
            unroll: Some(UnrollAttr { axis, factor }),
        },
    }
}

/// Unroll one region, or explain why not.
pub fn unroll_region(func: &mut Function, id: ApplyId, options: &UnrollOptions) -> Result<(), UnrollRejection> {
    let rank = func.rank;
    let region = func.region_mut(id).ok_or(UnrollRejection::Missing)?;
    if options.factor < 2 {
        return Err(UnrollRejection::InvalidFactor { factor: options.factor });
    }
    if options.axis >= rank {
        return Err(UnrollRejection::AxisOutOfRange {
            axis: options.axis,
            rank,
        });
    }
    if region.unroll().is_some() || region.epilogue.is_some() {
        return Err(UnrollRejection::AlreadyUnrolled);
    }
    let domain = region.shape.as_box().ok_or(UnrollRejection::UnresolvedShape)?;
    let extent = domain.extent(options.axis);
    // No full replica group would run; the rewrite would only add code.
    if extent < i64::from(options.factor) {
        return Err(UnrollRejection::ExtentTooSmall {
            axis: options.axis,
            extent,
            factor: options.factor,
        });
    }
    let divisible = extent % i64::from(options.factor) == 0;
    if !divisible && options.remainder == RemainderPolicy::Skip {
        return Err(UnrollRejection::NotDivisible {
            axis: options.axis,
            extent,
            factor: options.factor,
        });
    }

    let original = region.body.clone();
    region.body = replicate_body(&original, options.axis, options.factor);
    if !divisible {
        region.epilogue = Some(original);
    }
    Ok(())
}

/// Unroll every selected live region, in topological order.
pub fn unroll_function(func: &mut Function, options: &UnrollOptions) -> Result<UnrollResult, PassError> {
    func.ensure_fresh_shapes("unrolling")?;
    let mut result = UnrollResult::default();

    for id in topo_order(func)? {
        let name = func.region(id).map(|r| r.name.clone()).unwrap_or_default();
        if !options.regions.is_empty() && !options.regions.contains(&name) {
            continue;
        }
        match unroll_region(func, id, options) {
            Ok(()) => {
                debug!(function = %func.name, region = %name, axis = options.axis, factor = options.factor, "unrolled apply region");
                result.unrolled.push(id);
            }
            Err(reason) => {
                info!(function = %func.name, region = %name, %reason, "unrolling skipped");
                result.diagnostics.push(
                    Diagnostic::warning(format!("unrolling of apply '{}' skipped: {}", name, reason))
                        .with_code(codes::W0301)
                        .with_subject(Subject::Apply(id, name)),
                );
                result.rejected.push((id, reason));
            }
        }
    }

    if result.changed() {
        func.invalidate_shapes();
    }
    Ok(result)
}
