// inline.rs: Splicing single-use apply regions into their consumer
//
// A producer P is spliced into consumer C when P's results have exactly one
// use in total, that use is an access inside C, P's shape is resolved and P
// has no side effects. The access at offset `o` is replaced by a copy of P's
// body with every nested offset composed with `o`; P's operands are merged
// into C's operand list and P is deleted.
//
// Preconditions: shape annotations are fresh (shape-inference just ran).
// Postconditions: every surviving consumer observes the same values; the
//   shape stamp is invalidated if anything was inlined.
// Failure modes: StaleShapes. Non-candidates are skipped, never errors.
// Side effects: deletes inlined regions and their temporaries.

use tracing::{debug, trace};

use crate::bbox::Offset;
use crate::error::PassError;
use crate::graph::{topo_order, Use, UseIndex};
use crate::id::{ApplyId, ValueId};
use crate::ir::{Body, BodyOp, Function, Operand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRecord {
    pub producer: String,
    pub consumer: String,
}

#[derive(Debug, Default)]
pub struct InlineResult {
    /// Splices performed, in order.
    pub inlined: Vec<InlineRecord>,
}

impl InlineResult {
    pub fn changed(&self) -> bool {
        !self.inlined.is_empty()
    }
}

/// A chosen splice: the access defining `value` in `consumer` reads the
/// `result_index`-th result of `producer`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    producer: ApplyId,
    result_index: usize,
    consumer: ApplyId,
    value: ValueId,
    in_epilogue: bool,
}

/// Why a region is not inlined. Only used for trace output.
#[derive(Debug)]
enum Skip {
    UnresolvedShape,
    SideEffects,
    Unrolled,
    UseCount(usize),
    OutputUse,
    DeadConsumer,
}

/// Inline to a fixpoint, visiting producers in topological order.
pub fn inline_function(func: &mut Function) -> Result<InlineResult, PassError> {
    func.ensure_fresh_shapes("inlining")?;
    let mut result = InlineResult::default();

    // Each splice deletes a region, so this loop runs at most once per region.
    while let Some(candidate) = next_candidate(func)? {
        let producer = func
            .region(candidate.producer)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        let consumer = func
            .region(candidate.consumer)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        splice(func, candidate);
        debug!(function = %func.name, %producer, %consumer, "inlined apply region");
        result.inlined.push(InlineRecord { producer, consumer });
    }

    if result.changed() {
        func.invalidate_shapes();
    }
    Ok(result)
}

fn next_candidate(func: &Function) -> Result<Option<Candidate>, PassError> {
    let uses = UseIndex::build(func);
    for id in topo_order(func)? {
        match classify(func, &uses, id) {
            Ok(c) => return Ok(Some(c)),
            Err(reason) => {
                trace!(region = ?func.region(id).map(|r| &r.name), ?reason, "not an inlining candidate");
            }
        }
    }
    Ok(None)
}

fn classify(func: &Function, uses: &UseIndex, id: ApplyId) -> Result<Candidate, Skip> {
    let Some(region) = func.region(id) else {
        return Err(Skip::UseCount(0));
    };
    if !region.shape.is_known() {
        return Err(Skip::UnresolvedShape);
    }
    if region.has_side_effects() {
        return Err(Skip::SideEffects);
    }
    if region.unroll().is_some() || region.epilogue.is_some() {
        return Err(Skip::Unrolled);
    }

    let mut all = Vec::new();
    for (i, t) in region.results.iter().enumerate() {
        for u in uses.uses(*t) {
            all.push((i, *u));
        }
    }
    if all.len() != 1 {
        return Err(Skip::UseCount(all.len()));
    }
    let (result_index, single) = all[0];
    let Use::Access {
        region: consumer,
        value,
        in_epilogue,
    } = single
    else {
        return Err(Skip::OutputUse);
    };
    if consumer == id || !func.region(consumer).is_some_and(|c| c.shape.is_known()) {
        return Err(Skip::DeadConsumer);
    }
    Ok(Candidate {
        producer: id,
        result_index,
        consumer,
        value,
        in_epilogue,
    })
}

fn splice(func: &mut Function, c: Candidate) {
    let Some(producer) = func.region(c.producer).cloned() else {
        return;
    };
    let Some(consumer) = func.region_mut(c.consumer) else {
        return;
    };

    // Merge operand lists, deduplicated by identity.
    let slot_map: Vec<usize> = producer
        .operands
        .iter()
        .map(|op| match consumer.operands.iter().position(|o| o == op) {
            Some(slot) => slot,
            None => {
                consumer.operands.push(*op);
                consumer.operands.len() - 1
            }
        })
        .collect();

    let target = if c.in_epilogue {
        consumer.epilogue.as_mut()
    } else {
        Some(&mut consumer.body)
    };
    if let Some(body) = target {
        splice_body(body, c.value, &producer.body, producer.body.ret.values[c.result_index], &slot_map);
    }

    // Drop the slots that named the producer's results; nothing reads them now.
    let dead: Vec<usize> = consumer
        .operands
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, Operand::Temp(t) if producer.results.contains(t)))
        .map(|(slot, _)| slot)
        .collect();
    for slot in dead.into_iter().rev() {
        debug_assert!(!consumer.reads_slot(slot));
        consumer.operands.remove(slot);
        renumber_slots(&mut consumer.body, slot);
        if let Some(e) = consumer.epilogue.as_mut() {
            renumber_slots(e, slot);
        }
    }

    func.remove_region(c.producer);
}

/// Replace the access at `at` with `inner`'s ops, composing offsets and
/// renaming values so the surrounding body stays in definition order.
fn splice_body(body: &mut Body, at: ValueId, inner: &Body, inner_ret: ValueId, slot_map: &[usize]) {
    let a = at.index();
    let offset = match &body.ops[a] {
        BodyOp::Access { offset, .. } => offset.clone(),
        _ => return,
    };
    let n = inner.ops.len();
    let base = a as u32;

    let rename_outer = |v: ValueId| -> ValueId {
        let i = v.index();
        if i < a {
            v
        } else if i == a {
            ValueId(base + inner_ret.0)
        } else {
            ValueId((i + n - 1) as u32)
        }
    };

    let mut ops = Vec::with_capacity(body.ops.len() + n - 1);
    ops.extend(body.ops[..a].iter().cloned());
    for op in &inner.ops {
        let op = compose_op(op, &offset, slot_map);
        ops.push(op.map_args(|v| ValueId(base + v.0)));
    }
    for op in &body.ops[a + 1..] {
        ops.push(op.map_args(rename_outer));
    }
    body.ops = ops;
    body.ret.values = body.ret.values.iter().map(|v| rename_outer(*v)).collect();
}

fn compose_op(op: &BodyOp, outer: &Offset, slot_map: &[usize]) -> BodyOp {
    match op {
        BodyOp::Access { operand, offset } => BodyOp::Access {
            operand: slot_map.get(*operand).copied().unwrap_or(*operand),
            offset: offset.compose(outer),
        },
        other => other.shifted(outer),
    }
}

fn renumber_slots(body: &mut Body, removed: usize) {
    for op in &mut body.ops {
        if let BodyOp::Access { operand, .. } = op {
            if *operand > removed {
                *operand -= 1;
            }
        }
    }
}
