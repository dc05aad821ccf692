// print.rs: Textual IR printer
//
// Renders modules in the syntax accepted by `parser`. Shape annotations are
// printed when known so that an analyzed function can be reloaded with its
// boxes intact: result boxes after each type, the region box after `over`
// when it differs from the join of its results, and `required` on buffers.
//
// Preconditions: none.
// Postconditions: for a function with compact arenas (no removed regions),
//                 parsing the printed text yields an equal function up to the
//                 freshness stamp; printing is a fixpoint after one reload.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::bbox::Shape;
use crate::ir::{ApplyRegion, Body, BodyOp, Function, Module};

/// Print every function of the module.
pub fn print_module(module: &Module) -> String {
    module.to_string()
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} rank {} {{", self.name, self.rank)?;
        for b in &self.buffers {
            write!(f, "  buffer @{} : {}", b.name, b.elem)?;
            if let Some(domain) = &b.domain {
                write!(f, " domain {domain}")?;
            }
            if let Shape::Known(required) = &b.required {
                write!(f, " required {required}")?;
            }
            writeln!(f)?;
        }
        for (_, region) in self.regions() {
            write_region(f, self, region)?;
        }
        for mark in &self.outputs {
            let name = self.temp(mark.temp).map_or("?", |t| t.name.as_str());
            writeln!(f, "  output %{} {}", name, mark.domain)?;
        }
        writeln!(f, "}}")
    }
}

fn write_region(f: &mut fmt::Formatter<'_>, func: &Function, region: &ApplyRegion) -> fmt::Result {
    let results: Vec<String> = region
        .results
        .iter()
        .map(|t| format!("%{}", func.temp(*t).map_or("?", |t| t.name.as_str())))
        .collect();
    let operands: Vec<String> = region.operands.iter().map(|o| func.operand_name(*o)).collect();
    write!(
        f,
        "  {} = apply {}({}) -> ",
        results.join(", "),
        region.name,
        operands.join(", ")
    )?;

    let mut joined = Shape::Unknown;
    for (i, t) in region.results.iter().filter_map(|t| func.temp(*t)).enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", t.elem)?;
        if let Shape::Known(b) = &t.shape {
            write!(f, " {b}")?;
        }
        joined = joined.join(&t.shape);
    }
    if let Shape::Known(b) = &region.shape {
        if joined != region.shape {
            write!(f, " over {b}")?;
        }
    }

    writeln!(f, " {{")?;
    write_body(f, func, region, &region.body)?;
    match &region.epilogue {
        Some(epilogue) => {
            writeln!(f, "  }} epilogue {{")?;
            write_body(f, func, region, epilogue)?;
            writeln!(f, "  }}")
        }
        None => writeln!(f, "  }}"),
    }
}

fn write_body(
    f: &mut fmt::Formatter<'_>,
    func: &Function,
    region: &ApplyRegion,
    body: &Body,
) -> fmt::Result {
    for (i, op) in body.ops.iter().enumerate() {
        write!(f, "    %{i} = ")?;
        match op {
            BodyOp::Access { operand, offset } => {
                let name = region
                    .operands
                    .get(*operand)
                    .map_or_else(|| format!("<slot {operand}>"), |o| func.operand_name(*o));
                writeln!(f, "access {name} {offset}")?;
            }
            BodyOp::Index { dim, offset } => writeln!(f, "index {dim} {offset}")?,
            BodyOp::Constant(v) => writeln!(f, "const {v:?}")?,
            BodyOp::Unary { op, arg } => writeln!(f, "{} {arg}", op.mnemonic())?,
            BodyOp::Binary { op, lhs, rhs } => writeln!(f, "{} {lhs}, {rhs}", op.mnemonic())?,
            BodyOp::Call { callee, args, pure } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                let impure = if *pure { "" } else { "impure " };
                writeln!(f, "call {impure}{callee}({})", args.join(", "))?;
            }
        }
    }
    let mut ret = String::from("return");
    for (i, v) in body.ret.values.iter().enumerate() {
        let sep = if i == 0 { " " } else { ", " };
        let _ = write!(ret, "{sep}{v}");
    }
    if let Some(u) = body.ret.unroll {
        let _ = write!(ret, " unroll {} by {}", u.axis, u.factor);
    }
    writeln!(f, "    {ret}")
}
