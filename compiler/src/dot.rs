// dot.rs: Graphviz DOT output for stencil operator graphs
//
// Renders each function as a cluster: external buffers, apply regions and
// output marks as nodes, operand reads as edges labelled with the temporary
// (or buffer) and the distinct offsets at which it is read.
//
// Preconditions: none (stale or unknown shapes are printed as `?`).
// Postconditions: returns a DOT string; node order follows handle order.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{self, Write};

use crate::graph::find_cycle;
use crate::id::ApplyId;
use crate::ir::{Function, Module, Operand};

/// Emit every function of the module as a Graphviz DOT string.
pub fn emit_dot(module: &Module) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_module(&mut buf, module);
    buf
}

fn write_module(buf: &mut String, module: &Module) -> fmt::Result {
    writeln!(buf, "digraph stencil {{")?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;
    for func in &module.functions {
        writeln!(buf)?;
        write_function(buf, func)?;
    }
    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn region_node(func: &str, id: ApplyId) -> String {
    format!("{func}_a{}", id.0)
}

fn write_function(buf: &mut String, func: &Function) -> fmt::Result {
    let f = sanitize(&func.name);
    writeln!(buf, "    subgraph cluster_{f} {{")?;
    writeln!(buf, "        label=\"func: {} (rank {})\";", func.name, func.rank)?;
    writeln!(buf, "        style=rounded;")?;
    writeln!(buf, "        color=gray50;")?;

    for (i, b) in func.buffers.iter().enumerate() {
        let domain = b.domain.as_ref().map_or("unbounded".to_string(), |d| d.to_string());
        writeln!(
            buf,
            "        {f}_b{i} [shape=cylinder, style=filled, fillcolor=lightsalmon, label=\"@{}\\n{}\\nreads {}\"];",
            b.name, domain, b.required
        )?;
    }

    for (id, region) in func.regions() {
        let mut label = format!("{}\\n{}", region.name, region.shape);
        if let Some(u) = region.unroll() {
            let _ = write!(label, "\\nunroll {} by {}", u.axis, u.factor);
            if region.epilogue.is_some() {
                label.push_str(" + epilogue");
            }
        }
        let fill = if region.shape.is_known() { "lightblue" } else { "gray90" };
        writeln!(
            buf,
            "        {} [shape=box, style=filled, fillcolor={fill}, label=\"{label}\"];",
            region_node(&f, id)
        )?;
    }

    for (i, mark) in func.outputs.iter().enumerate() {
        let name = func.temp(mark.temp).map_or("?", |t| t.name.as_str());
        writeln!(
            buf,
            "        {f}_o{i} [shape=doublecircle, style=filled, fillcolor=lightgreen, label=\"%{name}\\n{}\"];",
            mark.domain
        )?;
    }

    writeln!(buf)?;

    let cycle_edges: HashSet<(ApplyId, ApplyId)> = match find_cycle(func) {
        Some(cycle) => {
            let mut edges: HashSet<_> = cycle.windows(2).map(|w| (w[0], w[1])).collect();
            if let (Some(last), Some(first)) = (cycle.last(), cycle.first()) {
                edges.insert((*last, *first));
            }
            edges
        }
        None => HashSet::new(),
    };

    for (id, region) in func.regions() {
        // Distinct offsets per operand slot, across body and epilogue.
        let mut reads: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        let bodies = std::iter::once(&region.body).chain(region.epilogue.iter());
        for body in bodies {
            for (_, slot, offset) in body.accesses() {
                reads.entry(slot).or_default().insert(offset.to_string());
            }
        }
        let target = region_node(&f, id);
        for (slot, operand) in region.operands.iter().enumerate() {
            let offsets: Vec<String> = reads.remove(&slot).unwrap_or_default().into_iter().collect();
            let label = format!("{} {}", func.operand_name(*operand), offsets.join(" "));
            match operand {
                Operand::Buffer(b) => {
                    writeln!(buf, "        {f}_b{} -> {target} [label=\"{}\"];", b.0, label.trim_end())?;
                }
                Operand::Temp(t) => {
                    let Some(producer) = func.temp(*t).map(|t| t.producer) else {
                        continue;
                    };
                    let style = if cycle_edges.contains(&(producer, id)) {
                        ", style=bold, color=red"
                    } else {
                        ""
                    };
                    writeln!(
                        buf,
                        "        {} -> {target} [label=\"{}\"{style}];",
                        region_node(&f, producer),
                        label.trim_end()
                    )?;
                }
            }
        }
    }

    for (i, mark) in func.outputs.iter().enumerate() {
        if let Some(t) = func.temp(mark.temp) {
            writeln!(buf, "        {} -> {f}_o{i};", region_node(&f, t.producer))?;
        }
    }

    writeln!(buf, "    }}")
}
