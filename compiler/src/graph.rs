// graph.rs: Producer/consumer graph queries over apply regions
//
// Regions form a graph through the temporaries they read: an edge P -> C
// exists when C lists a result of P among its operands. The graph is never
// materialized as owned nodes; it is recomputed from the arenas on demand.
//
// Preconditions: the function passes structural verification.
// Postconditions: `topo_order` lists producers before consumers.
// Failure modes: `PassError::CyclicDependency` when the graph is not a DAG.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};

use crate::error::PassError;
use crate::id::{ApplyId, TempId, ValueId};
use crate::ir::{Function, Operand};

// ── Uses ────────────────────────────────────────────────────────────────────

/// One consumer of a temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Use {
    /// Read by the access op defining `value` in `region`'s body or epilogue.
    Access {
        region: ApplyId,
        value: ValueId,
        in_epilogue: bool,
    },
    /// Marked as a function output (index into `Function::outputs`).
    Output { index: usize },
}

/// Every use of every live temporary, in program order.
#[derive(Debug, Default)]
pub struct UseIndex {
    uses: HashMap<TempId, Vec<Use>>,
}

impl UseIndex {
    pub fn build(func: &Function) -> Self {
        let mut uses: HashMap<TempId, Vec<Use>> = HashMap::new();
        for (id, region) in func.regions() {
            let bodies = std::iter::once((&region.body, false))
                .chain(region.epilogue.iter().map(|e| (e, true)));
            for (body, in_epilogue) in bodies {
                for (value, slot, _) in body.accesses() {
                    if let Some(Operand::Temp(t)) = region.operands.get(slot) {
                        uses.entry(*t).or_default().push(Use::Access {
                            region: id,
                            value,
                            in_epilogue,
                        });
                    }
                }
            }
        }
        for (index, mark) in func.outputs.iter().enumerate() {
            uses.entry(mark.temp).or_default().push(Use::Output { index });
        }
        UseIndex { uses }
    }

    pub fn uses(&self, temp: TempId) -> &[Use] {
        self.uses.get(&temp).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_output(&self, temp: TempId) -> bool {
        self.uses(temp).iter().any(|u| matches!(u, Use::Output { .. }))
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

/// Distinct producer regions of `region`'s temporary operands, sorted.
pub fn producers_of(func: &Function, region: ApplyId) -> Vec<ApplyId> {
    let Some(r) = func.region(region) else {
        return Vec::new();
    };
    let set: BTreeSet<ApplyId> = r
        .operands
        .iter()
        .filter_map(|op| match op {
            Operand::Temp(t) => func.temp(*t).map(|t| t.producer),
            Operand::Buffer(_) => None,
        })
        .collect();
    set.into_iter().collect()
}

/// Consumer adjacency: producer -> distinct consumers, sorted.
pub fn consumer_map(func: &Function) -> HashMap<ApplyId, Vec<ApplyId>> {
    let mut adj: HashMap<ApplyId, BTreeSet<ApplyId>> = HashMap::new();
    for (id, _) in func.regions() {
        adj.entry(id).or_default();
        for p in producers_of(func, id) {
            adj.entry(p).or_default().insert(id);
        }
    }
    adj.into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

// ── Ordering ────────────────────────────────────────────────────────────────

/// Topological order of live regions, producers first. Ties are broken by
/// handle so the order is reproducible.
pub fn topo_order(func: &Function) -> Result<Vec<ApplyId>, PassError> {
    let consumers = consumer_map(func);
    let mut indegree: HashMap<ApplyId, usize> = HashMap::new();
    for (id, _) in func.regions() {
        indegree.insert(id, producers_of(func, id).len());
    }

    let mut ready: BTreeSet<ApplyId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(indegree.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for c in consumers.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(d) = indegree.get_mut(c) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*c);
                }
            }
        }
    }

    if order.len() == indegree.len() {
        return Ok(order);
    }
    let cycle = find_cycle(func).unwrap_or_default();
    let region = cycle
        .first()
        .copied()
        .or_else(|| indegree.iter().filter(|(_, d)| **d > 0).map(|(id, _)| *id).min())
        .unwrap_or(ApplyId(0));
    let cycle_names = cycle
        .iter()
        .map(|id| func.region(*id).map(|r| r.name.clone()).unwrap_or_default())
        .collect();
    Err(PassError::CyclicDependency {
        region,
        cycle,
        cycle_names,
    })
}

/// First cycle found by depth-first search from the lowest handle.
pub fn find_cycle(func: &Function) -> Option<Vec<ApplyId>> {
    let adj = consumer_map(func);
    let mut visited: HashMap<ApplyId, u8> = HashMap::new(); // 0 = unvisited, 1 = on path, 2 = done
    let mut path = Vec::new();
    for id in func.region_ids() {
        if *visited.get(&id).unwrap_or(&0) == 0 {
            if let Some(cycle) = dfs_cycle(id, &adj, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle(
    node: ApplyId,
    adj: &HashMap<ApplyId, Vec<ApplyId>>,
    visited: &mut HashMap<ApplyId, u8>,
    path: &mut Vec<ApplyId>,
) -> Option<Vec<ApplyId>> {
    visited.insert(node, 1);
    path.push(node);
    for &next in adj.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
        match visited.get(&next).unwrap_or(&0) {
            0 => {
                if let Some(cycle) = dfs_cycle(next, adj, visited, path) {
                    return Some(cycle);
                }
            }
            1 => {
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    return Some(path[pos..].to_vec());
                }
            }
            _ => {}
        }
    }
    path.pop();
    visited.insert(node, 2);
    None
}
