// error.rs: Hard failures of the stencil passes
//
// A `PassError` aborts the remaining passes for one function. Every variant
// names the offending operator so the driver can surface it as a structured
// diagnostic; `to_diagnostic` performs that conversion.

use thiserror::Error;

use crate::bbox::{BoundingBox, Offset};
use crate::diag::{codes, DiagCode, Diagnostic, Subject};
use crate::id::{ApplyId, BufferId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PassError {
    /// The producer/consumer graph between apply regions is not a DAG.
    #[error("cyclic dependency between apply regions: {}", cycle_names.join(" -> "))]
    CyclicDependency {
        region: ApplyId,
        cycle: Vec<ApplyId>,
        cycle_names: Vec<String>,
    },

    /// An access, over its region's computed iteration domain, reads outside
    /// the declared domain of an external input buffer.
    #[error(
        "apply '{region_name}' reads '@{buffer_name}' at offset {offset} over {accessed}, \
         outside its declared domain {declared}"
    )]
    OutOfBoundsAccess {
        region: ApplyId,
        region_name: String,
        buffer: BufferId,
        buffer_name: String,
        offset: Offset,
        accessed: BoundingBox,
        declared: BoundingBox,
    },

    /// A pass that depends on shape data found it missing or out of date.
    #[error("shape information is stale; run shape-inference before {pass}")]
    StaleShapes { pass: &'static str },

    /// The function violates a data-model invariant.
    #[error("invalid IR ({obligation}): {message}")]
    InvalidIr {
        obligation: &'static str,
        region: Option<(ApplyId, String)>,
        message: String,
    },
}

impl PassError {
    pub fn code(&self) -> DiagCode {
        match self {
            PassError::CyclicDependency { .. } => codes::E0200,
            PassError::OutOfBoundsAccess { .. } => codes::E0201,
            PassError::StaleShapes { .. } => codes::E0202,
            PassError::InvalidIr { .. } => codes::E0203,
        }
    }

    /// The apply region the failure is attributed to, if any.
    pub fn region(&self) -> Option<ApplyId> {
        match self {
            PassError::CyclicDependency { region, .. } => Some(*region),
            PassError::OutOfBoundsAccess { region, .. } => Some(*region),
            PassError::StaleShapes { .. } => None,
            PassError::InvalidIr { region, .. } => region.as_ref().map(|r| r.0),
        }
    }

    /// Convert into a structured error diagnostic for the driver.
    pub fn to_diagnostic(&self, function: &str) -> Diagnostic {
        let base = Diagnostic::error(self.to_string()).with_code(self.code());
        match self {
            PassError::CyclicDependency {
                cycle, cycle_names, ..
            } => {
                let mut d = base.with_subject(Subject::Apply(cycle[0], cycle_names[0].clone()));
                for (id, name) in cycle.iter().zip(cycle_names).skip(1) {
                    d = d.with_related(Subject::Apply(*id, name.clone()));
                }
                d.with_hint("apply regions must form a DAG from outputs back to external inputs")
            }
            PassError::OutOfBoundsAccess {
                region,
                region_name,
                buffer,
                buffer_name,
                ..
            } => base
                .with_subject(Subject::Apply(*region, region_name.clone()))
                .with_related(Subject::Buffer(*buffer, buffer_name.clone()))
                .with_hint("enlarge the buffer's declared domain or shrink the output domain"),
            PassError::StaleShapes { .. } => base
                .with_subject(Subject::Function(function.to_string()))
                .with_hint("schedule shape-inference after every rewriting pass"),
            PassError::InvalidIr { region, .. } => match region {
                Some((id, name)) => base.with_subject(Subject::Apply(*id, name.clone())),
                None => base.with_subject(Subject::Function(function.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_regions() {
        let err = PassError::CyclicDependency {
            region: ApplyId(0),
            cycle: vec![ApplyId(0), ApplyId(1)],
            cycle_names: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency between apply regions: a -> b"
        );
        let d = err.to_diagnostic("f");
        assert_eq!(d.code, Some(codes::E0200));
        assert_eq!(d.subject, Some(Subject::Apply(ApplyId(0), "a".into())));
        assert_eq!(d.related.len(), 1);
    }

    #[test]
    fn out_of_bounds_diagnostic_names_buffer() {
        let err = PassError::OutOfBoundsAccess {
            region: ApplyId(3),
            region_name: "lap".into(),
            buffer: BufferId(0),
            buffer_name: "in".into(),
            offset: Offset(vec![2]),
            accessed: BoundingBox::from_ranges(&[(2, 12)]),
            declared: BoundingBox::from_ranges(&[(0, 11)]),
        };
        assert_eq!(
            err.to_string(),
            "apply 'lap' reads '@in' at offset [2] over [2:12], outside its declared domain [0:11]"
        );
        assert_eq!(err.region(), Some(ApplyId(3)));
        assert!(err.to_diagnostic("f").is_error());
    }
}
