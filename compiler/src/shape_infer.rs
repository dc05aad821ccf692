// shape_infer.rs: Required-domain inference for temporaries and apply regions
//
// Backward dataflow from the output marks to the external buffers:
//
//   1. seed each output temporary with its caller-declared domain
//   2. visit regions consumers-first; a region's iteration domain is the join
//      of its results' required boxes, and every access at offset `o` grows
//      its operand by that domain shifted by `o`
//   3. re-queue a producer whenever one of its temporaries grows, until no box
//      changes
//
// Boxes only grow (`Shape::grow`), so the fixpoint terminates. On a DAG
// visited in reverse topological order every region is visited exactly once.
//
// Preconditions: the function passes structural verification.
// Postconditions: shapes satisfy `ShapeCert`; the freshness stamp is recorded.
// Failure modes: CyclicDependency, OutOfBoundsAccess, InvalidIr.
// Side effects: rewrites every shape annotation of the function in place.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace, warn};

use crate::bbox::{BoundingBox, Offset, Shape};
use crate::diag::{codes, Diagnostic, Subject};
use crate::error::PassError;
use crate::graph::topo_order;
use crate::id::{ApplyId, BufferId, TempId};
use crate::ir::{ApplyRegion, Function, Operand};
use crate::pass::StageCert;
use crate::verify::verify_function;

// ── Public types ────────────────────────────────────────────────────────────

/// Annotation updated by one propagation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTarget {
    Temp(TempId),
    Buffer(BufferId),
    Region(ApplyId),
}

/// Observer payload: an annotation before and after one growth step.
#[derive(Debug)]
pub struct ShapeEvent<'a> {
    pub target: ShapeTarget,
    pub before: &'a Shape,
    pub after: &'a Shape,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeStats {
    /// Regions popped from the worklist.
    pub region_visits: usize,
    /// Propagation steps that enlarged an annotation.
    pub grow_events: usize,
    /// Upper bound on growth steps: temporaries and buffers times distinct offsets.
    pub step_bound: usize,
}

/// Postconditions of a shape-inference run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeCert {
    /// Every access footprint lies inside its source's inferred box.
    pub s1_accesses_sound: bool,
    /// Every output temporary covers its declared domain.
    pub s2_outputs_covered: bool,
    /// Every producer computes at least its temporaries' required boxes.
    pub s3_producers_cover: bool,
}

impl StageCert for ShapeCert {
    fn all_pass(&self) -> bool {
        self.s1_accesses_sound && self.s2_outputs_covered && self.s3_producers_cover
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("S1_accesses_sound", self.s1_accesses_sound),
            ("S2_outputs_covered", self.s2_outputs_covered),
            ("S3_producers_cover", self.s3_producers_cover),
        ]
    }
}

#[derive(Debug)]
pub struct ShapeResult {
    pub cert: ShapeCert,
    pub stats: ShapeStats,
    /// Regions left unresolved (unreachable from any output).
    pub dead_regions: Vec<ApplyId>,
    pub diagnostics: Vec<Diagnostic>,
}

/// One box read by an access over a region's computed domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    pub slot: usize,
    pub offset: Offset,
    pub read: BoundingBox,
}

/// Boxes read by every access of `region` when it computes `domain`.
/// Unrolled bodies are walked over their base points, epilogues over the
/// trailing points.
pub fn access_footprints(region: &ApplyRegion, domain: &BoundingBox) -> Vec<Footprint> {
    let plan = region.iteration_plan(domain);
    let mut out = Vec::new();
    let parts = [(Some(&region.body), plan.main.as_ref()), (region.epilogue.as_ref(), plan.epilogue.as_ref())];
    for (body, base) in parts {
        let Some(body) = body else { continue };
        let base = base.cloned().unwrap_or_else(|| BoundingBox::empty(domain.rank()));
        for (_, slot, offset) in body.accesses() {
            out.push(Footprint {
                slot,
                offset: offset.clone(),
                read: base.shifted(offset),
            });
        }
    }
    out
}

// ── Worklist ────────────────────────────────────────────────────────────────

struct ShapeWorklist {
    queue: VecDeque<ApplyId>,
    queued: HashSet<ApplyId>,
}

impl ShapeWorklist {
    fn seeded(order: &[ApplyId]) -> Self {
        let mut queue = VecDeque::with_capacity(order.len());
        let mut queued = HashSet::with_capacity(order.len());
        for id in order.iter().rev() {
            queue.push_back(*id);
            queued.insert(*id);
        }
        ShapeWorklist { queue, queued }
    }

    fn pop(&mut self) -> Option<ApplyId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    fn push(&mut self, id: ApplyId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }
}

// ── Pass entry ──────────────────────────────────────────────────────────────

/// Infer shapes for every temporary, buffer and region of `func`.
pub fn infer_shapes(func: &mut Function) -> Result<ShapeResult, PassError> {
    infer_shapes_with(func, |_| {})
}

/// Like `infer_shapes`, reporting every annotation change to `observer`.
pub fn infer_shapes_with(
    func: &mut Function,
    mut observer: impl FnMut(&ShapeEvent<'_>),
) -> Result<ShapeResult, PassError> {
    verify_function(func).into_result()?;
    let order = topo_order(func)?;
    func.clear_shapes();

    let mut stats = ShapeStats {
        step_bound: step_bound(func),
        ..ShapeStats::default()
    };

    // Seed.
    let marks: Vec<_> = func.outputs.iter().map(|m| (m.temp, m.domain.clone())).collect();
    for (temp, domain) in marks {
        if let Some(t) = func.temp_mut(temp) {
            let before = t.shape.clone();
            if t.shape.grow(&domain) {
                stats.grow_events += 1;
                observer(&ShapeEvent {
                    target: ShapeTarget::Temp(temp),
                    before: &before,
                    after: &t.shape,
                });
            }
        }
    }

    // Backward fixpoint.
    let mut worklist = ShapeWorklist::seeded(&order);
    while let Some(id) = worklist.pop() {
        stats.region_visits += 1;
        propagate_region(func, id, &mut worklist, &mut stats, &mut observer);
    }
    debug!(
        function = %func.name,
        visits = stats.region_visits,
        grows = stats.grow_events,
        "shape fixpoint reached"
    );

    // Dead regions are reported, not fatal.
    let mut diagnostics = Vec::new();
    let mut dead_regions = Vec::new();
    for id in &order {
        let Some(region) = func.region(*id) else { continue };
        if region.shape.is_known() {
            continue;
        }
        warn!(function = %func.name, region = %region.name, "apply region is unreachable from any output");
        dead_regions.push(*id);
        diagnostics.push(
            Diagnostic::warning(format!(
                "shape of apply '{}' is unresolved; it is unreachable from any output",
                region.name
            ))
            .with_code(codes::W0300)
            .with_subject(Subject::Apply(*id, region.name.clone()))
            .with_hint("the region is dead code and is excluded from inlining and unrolling"),
        );
    }

    check_external_bounds(func, &order)?;

    func.record_shape_stamp();
    let cert = verify_shapes(func);
    Ok(ShapeResult {
        cert,
        stats,
        dead_regions,
        diagnostics,
    })
}

/// Number of distinct offsets times the number of shaped values. Each growth
/// step extends some box to the hull of a new shifted footprint, so the
/// number of growth steps on a DAG stays below this bound.
fn step_bound(func: &Function) -> usize {
    let mut offsets: HashSet<&Offset> = HashSet::new();
    for (_, region) in func.regions() {
        for (_, _, o) in region.body.accesses() {
            offsets.insert(o);
        }
        if let Some(e) = &region.epilogue {
            for (_, _, o) in e.accesses() {
                offsets.insert(o);
            }
        }
    }
    let values = func.temps().count() + func.buffers.len() + func.region_count();
    values * (offsets.len() + 1)
}

fn propagate_region(
    func: &mut Function,
    id: ApplyId,
    worklist: &mut ShapeWorklist,
    stats: &mut ShapeStats,
    observer: &mut impl FnMut(&ShapeEvent<'_>),
) {
    let Some(region) = func.region(id) else { return };

    let mut required = Shape::Unknown;
    for t in &region.results {
        if let Some(temp) = func.temp(*t) {
            required = required.join(&temp.shape);
        }
    }
    let Shape::Known(required) = required else {
        trace!(region = %region.name, "no consumer demand yet");
        return;
    };
    let computed = region.computed_domain(&required);
    let footprints = access_footprints(region, &computed);
    let operands = region.operands.clone();

    if let Some(region) = func.region_mut(id) {
        let before = region.shape.clone();
        if region.shape.grow(&computed) {
            stats.grow_events += 1;
            observer(&ShapeEvent {
                target: ShapeTarget::Region(id),
                before: &before,
                after: &region.shape,
            });
        }
    }

    for fp in footprints {
        let Some(operand) = operands.get(fp.slot) else { continue };
        match *operand {
            Operand::Temp(t) => {
                let Some(temp) = func.temp_mut(t) else { continue };
                let before = temp.shape.clone();
                if temp.shape.grow(&fp.read) {
                    stats.grow_events += 1;
                    observer(&ShapeEvent {
                        target: ShapeTarget::Temp(t),
                        before: &before,
                        after: &temp.shape,
                    });
                    worklist.push(temp.producer);
                }
            }
            Operand::Buffer(b) => {
                let Some(buffer) = func.buffer_mut(b) else { continue };
                let before = buffer.required.clone();
                if buffer.required.grow(&fp.read) {
                    stats.grow_events += 1;
                    observer(&ShapeEvent {
                        target: ShapeTarget::Buffer(b),
                        before: &before,
                        after: &buffer.required,
                    });
                }
            }
        }
    }
}

/// Reject the first access, in region order, whose footprint leaves the
/// declared domain of an external buffer.
fn check_external_bounds(func: &Function, order: &[ApplyId]) -> Result<(), PassError> {
    for id in order {
        let Some(region) = func.region(*id) else { continue };
        let Some(domain) = region.shape.as_box() else { continue };
        for fp in access_footprints(region, domain) {
            let Some(Operand::Buffer(b)) = region.operands.get(fp.slot) else {
                continue;
            };
            let Some(buffer) = func.buffer(*b) else { continue };
            let Some(declared) = &buffer.domain else { continue };
            if !declared.contains(&fp.read) {
                return Err(PassError::OutOfBoundsAccess {
                    region: *id,
                    region_name: region.name.clone(),
                    buffer: *b,
                    buffer_name: buffer.name.clone(),
                    offset: fp.offset,
                    accessed: fp.read,
                    declared: declared.clone(),
                });
            }
        }
    }
    Ok(())
}

// ── Certificate ─────────────────────────────────────────────────────────────

/// Check the current shape annotations against the IR.
pub fn verify_shapes(func: &Function) -> ShapeCert {
    let mut s1 = true;
    let mut s3 = true;
    for (_, region) in func.regions() {
        let Some(domain) = region.shape.as_box() else { continue };
        for fp in access_footprints(region, domain) {
            let covered = region
                .operands
                .get(fp.slot)
                .and_then(|op| func.operand_shape(*op))
                .is_some_and(|s| s.covers(&Shape::Known(fp.read.clone())));
            s1 &= covered;
        }
    }
    for (_, temp) in func.temps() {
        if !temp.shape.is_known() {
            continue;
        }
        let producer = func.region(temp.producer).map(|r| &r.shape);
        s3 &= producer.is_some_and(|p| p.covers(&temp.shape));
    }
    let s2 = func.outputs.iter().all(|m| {
        func.temp(m.temp)
            .is_some_and(|t| t.shape.covers(&Shape::Known(m.domain.clone())))
    });
    ShapeCert {
        s1_accesses_sound: s1,
        s2_outputs_covered: s2,
        s3_producers_cover: s3,
    }
}
