// verify.rs: Structural verification of a stencil function
//
// Checks the data-model invariants every pass relies on and reports them as
// a certificate of named obligations:
//
//   V1 access rank       every offset, index dim, box and unroll axis matches
//                        the function rank; offsets and declared boxes stay
//                        within MAX_COORD
//   V2 operands closed   bodies read only their own operand slots, and every
//                        operand names a live temporary or a declared buffer
//   V3 single producer   each temporary is a result of exactly its producer
//   V4 values defined    body values are used only after their definition
//   V5 return arity      returns yield one value per result per replica
//
// Preconditions: none.
// Postconditions: `IrCert::all_pass()` iff no violation was recorded.
// Failure modes: none (violations are data, `into_result` converts the first).
// Side effects: none.

use std::collections::HashMap;

use crate::error::PassError;
use crate::id::{ApplyId, TempId};
use crate::ir::{ApplyRegion, Body, BodyOp, Function, Operand};
use crate::pass::StageCert;

pub const V1: &str = "V1_access_rank";
pub const V2: &str = "V2_operands_closed";
pub const V3: &str = "V3_single_producer";
pub const V4: &str = "V4_values_defined";
pub const V5: &str = "V5_return_arity";

/// One failed obligation, attributed to a region when possible.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub obligation: &'static str,
    pub region: Option<(ApplyId, String)>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrCert {
    pub v1_access_rank: bool,
    pub v2_operands_closed: bool,
    pub v3_single_producer: bool,
    pub v4_values_defined: bool,
    pub v5_return_arity: bool,
    pub violations: Vec<Violation>,
}

impl StageCert for IrCert {
    fn all_pass(&self) -> bool {
        self.v1_access_rank
            && self.v2_operands_closed
            && self.v3_single_producer
            && self.v4_values_defined
            && self.v5_return_arity
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            (V1, self.v1_access_rank),
            (V2, self.v2_operands_closed),
            (V3, self.v3_single_producer),
            (V4, self.v4_values_defined),
            (V5, self.v5_return_arity),
        ]
    }
}

impl IrCert {
    /// The first violation as a hard error.
    pub fn into_result(self) -> Result<(), PassError> {
        match self.violations.into_iter().next() {
            None => Ok(()),
            Some(v) => Err(PassError::InvalidIr {
                obligation: v.obligation,
                region: v.region,
                message: v.message,
            }),
        }
    }
}

struct Checker<'a> {
    func: &'a Function,
    violations: Vec<Violation>,
}

impl<'a> Checker<'a> {
    fn fail(&mut self, obligation: &'static str, region: Option<(ApplyId, &ApplyRegion)>, message: String) {
        self.violations.push(Violation {
            obligation,
            region: region.map(|(id, r)| (id, r.name.clone())),
            message,
        });
    }

    fn check_body(&mut self, id: ApplyId, region: &ApplyRegion, body: &Body, what: &str) {
        let rank = self.func.rank;
        for (i, op) in body.ops.iter().enumerate() {
            match op {
                BodyOp::Access { operand, offset } => {
                    if offset.rank() != rank {
                        self.fail(
                            V1,
                            Some((id, region)),
                            format!(
                                "{}: access %{} has offset {} of rank {}, expected {}",
                                what, i, offset, offset.rank(), rank
                            ),
                        );
                    }
                    if !offset.in_range() {
                        self.fail(
                            V1,
                            Some((id, region)),
                            format!("{}: access %{} has out-of-range offset {}", what, i, offset),
                        );
                    }
                    if *operand >= region.operands.len() {
                        self.fail(
                            V2,
                            Some((id, region)),
                            format!(
                                "{}: access %{} reads operand slot {} but the region has {} operands",
                                what,
                                i,
                                operand,
                                region.operands.len()
                            ),
                        );
                    }
                }
                BodyOp::Index { dim, offset } => {
                    if *dim >= rank || offset.rank() != rank || !offset.in_range() {
                        self.fail(
                            V1,
                            Some((id, region)),
                            format!("{}: index %{} along dim {} is invalid for rank {}", what, i, dim, rank),
                        );
                    }
                }
                _ => {}
            }
            for arg in op.args() {
                if arg.index() >= i {
                    self.fail(
                        V4,
                        Some((id, region)),
                        format!("{}: op %{} uses {} before its definition", what, i, arg),
                    );
                }
            }
        }
        for v in &body.ret.values {
            if v.index() >= body.ops.len() {
                self.fail(
                    V4,
                    Some((id, region)),
                    format!("{}: return uses undefined value {}", what, v),
                );
            }
        }
    }

    fn check_region(&mut self, id: ApplyId, region: &ApplyRegion) {
        let func = self.func;
        for (slot, operand) in region.operands.iter().enumerate() {
            let live = match operand {
                Operand::Temp(t) => func.temp(*t).is_some(),
                Operand::Buffer(b) => func.buffer(*b).is_some(),
            };
            if !live {
                self.fail(
                    V2,
                    Some((id, region)),
                    format!("operand slot {} refers to a deleted or undeclared value", slot),
                );
            }
        }

        self.check_body(id, region, &region.body, "body");

        let results = region.results.len();
        let ret = &region.body.ret;
        if let Some(u) = ret.unroll {
            if u.axis >= func.rank {
                self.fail(
                    V1,
                    Some((id, region)),
                    format!("unroll axis {} is out of range for rank {}", u.axis, func.rank),
                );
            }
            if u.factor == 0 {
                self.fail(V5, Some((id, region)), "unroll factor must be positive".to_string());
            }
        }
        let expected = results * ret.factor() as usize;
        if ret.values.len() != expected {
            self.fail(
                V5,
                Some((id, region)),
                format!(
                    "return yields {} values, expected {} ({} results x {} replicas)",
                    ret.values.len(),
                    expected,
                    results,
                    ret.factor()
                ),
            );
        }

        if let Some(epilogue) = &region.epilogue {
            self.check_body(id, region, epilogue, "epilogue");
            if ret.unroll.is_none() {
                self.fail(
                    V5,
                    Some((id, region)),
                    "epilogue attached to a region that is not unrolled".to_string(),
                );
            }
            if epilogue.ret.unroll.is_some() || epilogue.ret.values.len() != results {
                self.fail(
                    V5,
                    Some((id, region)),
                    format!("epilogue must return exactly {} plain values", results),
                );
            }
        }

        for (i, t) in region.results.iter().enumerate() {
            match func.temp(*t) {
                Some(temp) if temp.producer == id && temp.result_index == i => {}
                _ => self.fail(
                    V3,
                    Some((id, region)),
                    format!("result {} is not owned by this region", i),
                ),
            }
        }
    }
}

/// Check every structural invariant of `func`.
pub fn verify_function(func: &Function) -> IrCert {
    let mut checker = Checker {
        func,
        violations: Vec::new(),
    };

    for (id, region) in func.regions() {
        checker.check_region(id, region);
    }

    // V3 from the temporary side: one producer, listed exactly once.
    let mut owners: HashMap<TempId, usize> = HashMap::new();
    for (_, region) in func.regions() {
        for t in &region.results {
            *owners.entry(*t).or_default() += 1;
        }
    }
    for (tid, temp) in func.temps() {
        let listed = owners.get(&tid).copied().unwrap_or(0);
        if listed != 1 || func.region(temp.producer).is_none() {
            checker.violations.push(Violation {
                obligation: V3,
                region: None,
                message: format!(
                    "temporary '%{}' has {} producing regions, expected exactly 1",
                    temp.name, listed
                ),
            });
        }
    }

    for buffer in &func.buffers {
        if buffer.domain.as_ref().is_some_and(|d| !d.is_well_formed(func.rank)) {
            checker.violations.push(Violation {
                obligation: V1,
                region: None,
                message: format!("buffer '@{}' declares a malformed domain for rank {}", buffer.name, func.rank),
            });
        }
    }
    for mark in &func.outputs {
        if func.temp(mark.temp).is_none() {
            checker.violations.push(Violation {
                obligation: V2,
                region: None,
                message: format!("output refers to deleted temporary {:?}", mark.temp),
            });
        }
        if !mark.domain.is_well_formed(func.rank) {
            checker.violations.push(Violation {
                obligation: V1,
                region: None,
                message: format!(
                    "output domain (lb {:?}, ub {:?}) is malformed for rank {}",
                    mark.domain.lb, mark.domain.ub, func.rank
                ),
            });
        }
    }

    let failed = |name: &str| checker.violations.iter().any(|v| v.obligation == name);
    IrCert {
        v1_access_rank: !failed(V1),
        v2_operands_closed: !failed(V2),
        v3_single_producer: !failed(V3),
        v4_values_defined: !failed(V4),
        v5_return_arity: !failed(V5),
        violations: checker.violations,
    }
}
