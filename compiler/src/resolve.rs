// resolve.rs: Name resolution: textual AST → arena IR
//
// Walks the parsed AST of each function, resolves `%temp`, `@buffer` and body
// value references, checks ranks and arities, and assembles `Function`s.
// Apply regions may reference temporaries produced by later regions; all
// results are declared before any body is resolved.
//
// Preconditions: `module` is a well-formed AST from the parser.
// Postconditions: every function that resolved without errors is in the
//                 returned module; arena order follows declaration order.
// Failure modes: undefined names, duplicate definitions, rank mismatches,
//                accesses to non-operands and malformed bodies produce
//                `Diagnostic` entries. Resolution continues past errors; a
//                function with errors is left out of the module.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::*;
use crate::bbox::{BoundingBox, Offset, Shape, MAX_COORD};
use crate::diag::codes::{E0100, E0101, E0102, E0103, E0104};
use crate::diag::{DiagCode, Diagnostic, Subject};
use crate::id::{ApplyId, BufferId, TempId, ValueId};
use crate::ir::{
    ApplyRegion, Body, BodyOp, ElemType, ExternalBuffer, Function, Module, Operand, OutputMark,
    ReturnOp, Temporary, UnrollAttr,
};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolve every function of a parsed module.
pub fn resolve(module: &ModuleAst) -> ResolveResult {
    let mut resolver = Resolver::default();
    let mut seen: HashMap<&str, Span> = HashMap::new();
    let mut functions = Vec::new();

    for decl in &module.functions {
        if let Some(first) = seen.insert(decl.name.name.as_str(), decl.name.span) {
            resolver.diagnostics.push(
                Diagnostic::error(format!("duplicate function '{}'", decl.name.name))
                    .with_code(E0101)
                    .with_span(decl.name.span)
                    .with_hint(format!("first defined at {}..{}", first.start, first.end)),
            );
            continue;
        }
        let before = resolver.error_count();
        let func = resolver.resolve_function(decl);
        if resolver.error_count() == before {
            functions.extend(func);
        }
    }

    ResolveResult {
        module: Module { functions },
        diagnostics: resolver.diagnostics,
    }
}

/// Parse and resolve textual IR in one step.
///
/// Lex and parse errors are reported as uncoded diagnostics carrying the
/// offending span.
pub fn load_module(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    let mut diagnostics: Vec<Diagnostic> = parsed
        .errors
        .iter()
        .map(|e| Diagnostic::error(e.to_string()).with_span(*e.span()))
        .collect();
    let Some(ast) = parsed.module else {
        return Err(diagnostics);
    };
    let result = resolve(&ast);
    diagnostics.extend(result.diagnostics);
    if crate::diag::has_errors(&diagnostics) {
        return Err(diagnostics);
    }
    Ok(result.module)
}

// ── Resolver ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Resolver {
    diagnostics: Vec<Diagnostic>,
}

/// Per-function symbol tables.
struct Scope {
    rank: usize,
    buffers: HashMap<String, BufferId>,
    temps: HashMap<String, TempId>,
}

/// An operand list entry, keyed by sigil and name.
#[derive(PartialEq)]
enum OperandKey<'a> {
    Temp(&'a str),
    Buffer(&'a str),
}

impl<'a> OperandKey<'a> {
    fn of(r: &'a OperandRef) -> Self {
        match r {
            OperandRef::Temp(i) => OperandKey::Temp(&i.name),
            OperandRef::Buffer(i) => OperandKey::Buffer(&i.name),
        }
    }
}

impl Resolver {
    fn error(&mut self, code: DiagCode, span: Span, message: String) -> &mut Diagnostic {
        self.diagnostics
            .push(Diagnostic::error(message).with_code(code).with_span(span));
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    fn resolve_function(&mut self, decl: &FuncDecl) -> Option<Function> {
        if decl.rank < 1 {
            self.error(
                E0102,
                decl.rank_span,
                format!("function '{}' must have rank >= 1, found {}", decl.name.name, decl.rank),
            );
            return None;
        }
        let mut scope = Scope {
            rank: decl.rank as usize,
            buffers: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut buffers = Vec::new();
        let mut temps = Vec::new();
        let mut applies: Vec<(&ApplyDecl, Vec<TempId>)> = Vec::new();
        let mut apply_names: HashMap<&str, Span> = HashMap::new();

        // Pass 1: declare buffers and every apply's results.
        for item in &decl.items {
            match item {
                Item::Buffer(b) => {
                    if scope.buffers.contains_key(&b.name.name) {
                        self.error(E0101, b.name.span, format!("duplicate buffer '@{}'", b.name.name));
                        continue;
                    }
                    let elem = self.elem_type(&b.elem);
                    let domain = b.domain.as_ref().and_then(|d| self.bbox(d, scope.rank));
                    let required = b
                        .required
                        .as_ref()
                        .and_then(|d| self.bbox(d, scope.rank))
                        .map_or(Shape::Unknown, Shape::Known);
                    scope
                        .buffers
                        .insert(b.name.name.clone(), BufferId(buffers.len() as u32));
                    buffers.push(ExternalBuffer {
                        name: b.name.name.clone(),
                        elem,
                        domain,
                        required,
                    });
                }
                Item::Apply(a) => {
                    if let Some(first) = apply_names.insert(a.name.name.as_str(), a.name.span) {
                        self.error(E0101, a.name.span, format!("duplicate apply '{}'", a.name.name))
                            .hint = Some(format!("first defined at {}..{}", first.start, first.end));
                    }
                    if a.result_types.len() != a.results.len() {
                        self.error(
                            E0104,
                            a.span,
                            format!(
                                "apply '{}' declares {} results but {} result types",
                                a.name.name,
                                a.results.len(),
                                a.result_types.len()
                            ),
                        );
                    }
                    let producer = ApplyId(applies.len() as u32);
                    let mut ids = Vec::with_capacity(a.results.len());
                    for (i, result) in a.results.iter().enumerate() {
                        if scope.temps.contains_key(&result.name) {
                            self.error(E0101, result.span, format!("duplicate temporary '%{}'", result.name));
                            continue;
                        }
                        let ty = a.result_types.get(i);
                        let elem = ty.map_or(ElemType::F64, |t| self.elem_type(&t.elem));
                        let shape = ty
                            .and_then(|t| t.shape.as_ref())
                            .and_then(|s| self.bbox(s, scope.rank))
                            .map_or(Shape::Unknown, Shape::Known);
                        let id = TempId(temps.len() as u32);
                        scope.temps.insert(result.name.clone(), id);
                        temps.push(Temporary {
                            name: result.name.clone(),
                            elem,
                            producer,
                            result_index: i,
                            shape,
                        });
                        ids.push(id);
                    }
                    applies.push((a, ids));
                }
                Item::Output(_) => {}
            }
        }

        // Pass 2: operand lists and bodies.
        let mut regions = Vec::with_capacity(applies.len());
        for (k, (a, results)) in applies.into_iter().enumerate() {
            let shape = match &a.over {
                Some(over) => self.bbox(over, scope.rank).map_or(Shape::Unknown, Shape::Known),
                None => results
                    .iter()
                    .filter_map(|t| temps.get(t.index()))
                    .fold(Shape::Unknown, |acc, t: &Temporary| acc.join(&t.shape)),
            };
            regions.push(self.resolve_apply(ApplyId(k as u32), a, &scope, results, shape));
        }

        // Pass 3: outputs.
        let mut outputs = Vec::new();
        for item in &decl.items {
            let Item::Output(o) = item else { continue };
            let Some(&temp) = scope.temps.get(&o.temp.name) else {
                self.error(E0100, o.temp.span, format!("undefined temporary '%{}'", o.temp.name));
                continue;
            };
            if let Some(domain) = self.bbox(&o.domain, scope.rank) {
                outputs.push(OutputMark { temp, domain });
            }
        }

        Some(Function::from_parts(
            decl.name.name.clone(),
            scope.rank,
            buffers,
            temps,
            regions,
            outputs,
        ))
    }

    fn resolve_apply(
        &mut self,
        id: ApplyId,
        a: &ApplyDecl,
        scope: &Scope,
        results: Vec<TempId>,
        shape: Shape,
    ) -> ApplyRegion {
        let subject = Subject::Apply(id, a.name.name.clone());
        let mut keys: Vec<OperandKey> = Vec::with_capacity(a.operands.len());
        let mut operands = Vec::with_capacity(a.operands.len());

        for r in &a.operands {
            let key = OperandKey::of(r);
            let ident = r.ident();
            if keys.contains(&key) {
                self.error(E0101, ident.span, format!("operand listed twice in apply '{}'", a.name.name));
            }
            let operand = match r {
                OperandRef::Temp(i) => scope.temps.get(&i.name).copied().map(Operand::Temp),
                OperandRef::Buffer(i) => scope.buffers.get(&i.name).copied().map(Operand::Buffer),
            };
            match operand {
                Some(op) => operands.push(op),
                None => {
                    let sigil = if matches!(r, OperandRef::Temp(_)) { "%" } else { "@" };
                    let kind = if sigil == "%" { "temporary" } else { "buffer" };
                    self.error(E0100, ident.span, format!("undefined {kind} '{sigil}{}'", ident.name));
                }
            }
            keys.push(key);
        }

        let n_results = a.results.len();
        let body = self.resolve_body(&a.body, scope.rank, &keys, n_results, &subject);
        let epilogue = a.epilogue.as_ref().map(|epi| {
            if body.ret.unroll.is_none() {
                self.error(
                    E0104,
                    epi.span,
                    format!("apply '{}' has an epilogue but its body is not unrolled", a.name.name),
                );
            }
            let epi_body = self.resolve_body(epi, scope.rank, &keys, n_results, &subject);
            if epi_body.ret.unroll.is_some() {
                self.error(E0104, epi.ret.span, "an epilogue body cannot be unrolled".to_string());
            }
            epi_body
        });

        ApplyRegion {
            name: a.name.name.clone(),
            operands,
            body,
            epilogue,
            results,
            shape,
        }
    }

    fn resolve_body(
        &mut self,
        body: &BodyAst,
        rank: usize,
        operands: &[OperandKey],
        results: usize,
        subject: &Subject,
    ) -> Body {
        let mut locals: HashMap<&str, ValueId> = HashMap::new();
        let mut ops = Vec::with_capacity(body.stmts.len());

        for stmt in &body.stmts {
            let op = match &stmt.op {
                OpAst::Access { operand, offset } => {
                    let key = OperandKey::of(operand);
                    let slot = match operands.iter().position(|k| *k == key) {
                        Some(slot) => slot,
                        None => {
                            let ident = operand.ident();
                            let sigil = if matches!(operand, OperandRef::Temp(_)) { "%" } else { "@" };
                            self.error(
                                E0103,
                                ident.span,
                                format!("{subject} accesses '{sigil}{}', which is not one of its operands", ident.name),
                            )
                            .hint = Some("add it to the apply's operand list".to_string());
                            0
                        }
                    };
                    BodyOp::Access {
                        operand: slot,
                        offset: self.offset(offset, rank),
                    }
                }
                OpAst::Index { dim, dim_span, offset } => {
                    if *dim < 0 || *dim as usize >= rank {
                        self.error(
                            E0102,
                            *dim_span,
                            format!("index dimension {dim} out of range for rank {rank}"),
                        );
                    }
                    BodyOp::Index {
                        dim: (*dim).max(0) as usize,
                        offset: self.offset(offset, rank),
                    }
                }
                OpAst::Const(v) => BodyOp::Constant(*v),
                OpAst::Unary { op, arg } => BodyOp::Unary {
                    op: *op,
                    arg: self.value(&locals, arg),
                },
                OpAst::Binary { op, lhs, rhs } => BodyOp::Binary {
                    op: *op,
                    lhs: self.value(&locals, lhs),
                    rhs: self.value(&locals, rhs),
                },
                OpAst::Call { callee, args, pure } => BodyOp::Call {
                    callee: callee.name.clone(),
                    args: args.iter().map(|a| self.value(&locals, a)).collect(),
                    pure: *pure,
                },
            };
            if locals.contains_key(stmt.result.name.as_str()) {
                self.error(
                    E0101,
                    stmt.result.span,
                    format!("value '%{}' defined twice in {subject}", stmt.result.name),
                );
            }
            locals.insert(stmt.result.name.as_str(), ValueId(ops.len() as u32));
            ops.push(op);
        }

        let values: Vec<ValueId> = body.ret.values.iter().map(|v| self.value(&locals, v)).collect();
        let unroll = body.ret.unroll.and_then(|(axis, factor)| {
            if axis < 0 || axis as usize >= rank {
                self.error(
                    E0102,
                    body.ret.span,
                    format!("unroll axis {axis} out of range for rank {rank}"),
                );
                return None;
            }
            if factor < 1 || factor > u32::MAX as i64 {
                self.error(E0104, body.ret.span, format!("invalid unroll factor {factor}"));
                return None;
            }
            Some(UnrollAttr {
                axis: axis as usize,
                factor: factor as u32,
            })
        });
        let factor = unroll.map_or(1, |u| u.factor as usize);
        if values.len() != results * factor {
            self.error(
                E0104,
                body.ret.span,
                format!(
                    "{subject} returns {} values, expected {} ({} results x factor {})",
                    values.len(),
                    results * factor,
                    results,
                    factor
                ),
            );
        }

        Body {
            ops,
            ret: ReturnOp { values, unroll },
        }
    }

    // ── Leaf helpers ──

    fn value(&mut self, locals: &HashMap<&str, ValueId>, ident: &Ident) -> ValueId {
        match locals.get(ident.name.as_str()) {
            Some(&v) => v,
            None => {
                self.error(E0100, ident.span, format!("undefined value '%{}'", ident.name));
                ValueId(0)
            }
        }
    }

    fn elem_type(&mut self, ident: &Ident) -> ElemType {
        ElemType::from_name(&ident.name).unwrap_or_else(|| {
            self.error(E0100, ident.span, format!("unknown element type '{}'", ident.name))
                .hint = Some("expected f32 or f64".to_string());
            ElemType::F64
        })
    }

    fn offset(&mut self, lit: &OffsetLit, rank: usize) -> Offset {
        if lit.values.len() != rank {
            self.error(
                E0102,
                lit.span,
                format!("offset has {} components, expected {rank}", lit.values.len()),
            );
        }
        let offset = Offset(lit.values.clone());
        if !offset.in_range() {
            self.error(E0104, lit.span, format!("offset {offset} is out of range"))
                .hint = Some(format!("offset components must lie within ±{MAX_COORD}"));
        }
        offset
    }

    /// Boxes with `lb >= ub` along any axis collapse to the canonical empty box.
    fn bbox(&mut self, lit: &BoxLit, rank: usize) -> Option<BoundingBox> {
        match &lit.kind {
            BoxKind::Empty => Some(BoundingBox::empty(rank)),
            BoxKind::Ranges(ranges) if ranges.len() != rank => {
                self.error(
                    E0102,
                    lit.span,
                    format!("box has {} dimensions, expected {rank}", ranges.len()),
                );
                None
            }
            BoxKind::Ranges(ranges) => {
                let b = BoundingBox::from_ranges(ranges);
                if !b.is_well_formed(rank) {
                    self.error(E0104, lit.span, format!("box {b} has an out-of-range bound"))
                        .hint = Some(format!("box bounds must lie within ±{MAX_COORD}"));
                    return None;
                }
                Some(if b.is_empty() { BoundingBox::empty(rank) } else { b })
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    fn resolve_source(source: &str) -> ResolveResult {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:#?}", parsed.errors);
        resolve(&parsed.module.expect("parse failed"))
    }

    fn resolve_ok(source: &str) -> Module {
        let result = resolve_source(source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:#?}",
            result.diagnostics
        );
        result.module
    }

    fn error_codes(source: &str) -> Vec<&'static str> {
        resolve_source(source)
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    #[test]
    fn smooth_resolves() {
        let m = resolve_ok(
            "func smooth rank 1 {
               buffer @in : f64 domain [-4:14]
               %t0 = apply r0(@in) -> f64 {
                 %0 = access @in [-1]
                 %1 = access @in [1]
                 %2 = add %0, %1
                 return %2
               }
               output %t0 [0:10]
             }",
        );
        let f = m.function("smooth").expect("function");
        assert_eq!(f.rank, 1);
        assert_eq!(f.buffers[0].domain, Some(BoundingBox::from_ranges(&[(-4, 14)])));
        let r0 = f.find_region("r0").expect("region");
        let region = f.region(r0).expect("region");
        assert_eq!(region.operands, vec![Operand::Buffer(BufferId(0))]);
        assert_eq!(
            region.body.ops[2],
            BodyOp::Binary {
                op: BinaryOp::Add,
                lhs: ValueId(0),
                rhs: ValueId(1)
            }
        );
        assert_eq!(f.outputs[0].temp, f.find_temp("t0").expect("temp"));
    }

    #[test]
    fn forward_reference_between_applies() {
        let m = resolve_ok(
            "func f rank 1 {
               buffer @in : f64
               %b = apply second(%a) -> f64 { %0 = access %a [0] return %0 }
               %a = apply first(@in) -> f64 { %0 = access @in [0] return %0 }
               output %b [0:4]
             }",
        );
        let f = &m.functions[0];
        let a = f.find_temp("a").expect("temp");
        assert_eq!(f.temp(a).map(|t| t.producer), f.find_region("first"));
    }

    #[test]
    fn shapes_and_unroll_are_read_back() {
        let m = resolve_ok(
            "func f rank 1 {
               buffer @in : f64 required [0:11]
               %t = apply r(@in) -> f64 [0:10] over [0:10] {
                 %0 = access @in [0]
                 %1 = access @in [1]
                 return %0, %1 unroll 0 by 2
               }
             }",
        );
        let f = &m.functions[0];
        let region = f.region(ApplyId(0)).expect("region");
        assert_eq!(region.unroll(), Some(UnrollAttr { axis: 0, factor: 2 }));
        assert_eq!(region.shape, Shape::Known(BoundingBox::from_ranges(&[(0, 10)])));
        assert!(f.buffers[0].required.is_known());
    }

    #[test]
    fn undefined_names() {
        assert_eq!(
            error_codes("func f rank 1 { %t = apply r(@nope) -> f64 { %0 = const 1.0 return %0 } }"),
            vec!["E0100"]
        );
        assert_eq!(
            error_codes("func f rank 1 { %t = apply r() -> f64 { return %x } }"),
            vec!["E0100"]
        );
        assert_eq!(
            error_codes("func f rank 1 { output %missing [0:1] }"),
            vec!["E0100"]
        );
    }

    #[test]
    fn duplicates() {
        assert_eq!(
            error_codes("func f rank 1 { buffer @a : f64 buffer @a : f64 }"),
            vec!["E0101"]
        );
        assert_eq!(
            error_codes(
                "func f rank 1 {
                   %t = apply r() -> f64 { %0 = const 1.0 return %0 }
                   %t = apply s() -> f64 { %0 = const 1.0 return %0 }
                 }"
            ),
            vec!["E0101"]
        );
        assert_eq!(
            error_codes("func f rank 1 { } func f rank 1 { }"),
            vec!["E0101"]
        );
    }

    #[test]
    fn rank_mismatches() {
        assert_eq!(
            error_codes("func f rank 2 { buffer @a : f64 domain [0:4] }"),
            vec!["E0102"]
        );
        assert_eq!(
            error_codes(
                "func f rank 2 { buffer @a : f64
                   %t = apply r(@a) -> f64 { %0 = access @a [1] return %0 } }"
            ),
            vec!["E0102"]
        );
        assert_eq!(error_codes("func f rank 0 { }"), vec!["E0102"]);
    }

    #[test]
    fn access_to_non_operand() {
        let result = resolve_source(
            "func f rank 1 {
               buffer @a : f64
               buffer @b : f64
               %t = apply r(@a) -> f64 { %0 = access @b [0] return %0 }
             }",
        );
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, Some(E0103));
        assert!(result.module.functions.is_empty());
    }

    #[test]
    fn malformed_bodies() {
        // Return arity vs results x factor.
        assert_eq!(
            error_codes(
                "func f rank 1 { %t = apply r() -> f64 { %0 = const 1.0 return %0 unroll 0 by 2 } }"
            ),
            vec!["E0104"]
        );
        // Epilogue without unroll.
        assert_eq!(
            error_codes(
                "func f rank 1 { %t = apply r() -> f64 { %0 = const 1.0 return %0 }
                   epilogue { %0 = const 1.0 return %0 } }"
            ),
            vec!["E0104"]
        );
    }

    #[test]
    fn out_of_range_coordinates() {
        assert_eq!(
            error_codes(
                "func f rank 1 { buffer @a : f64
                   %t = apply r(@a) -> f64 { %0 = access @a [9223372036854775807] return %0 }
                   output %t [0:4] }"
            ),
            vec!["E0104"]
        );
        assert_eq!(
            error_codes(
                "func f rank 1 { %t = apply r() -> f64 { %0 = index 0 [-3000000000] return %0 }
                   output %t [0:4] }"
            ),
            vec!["E0104"]
        );
        assert_eq!(
            error_codes("func f rank 1 { buffer @a : f64 domain [0:9223372036854775807] }"),
            vec!["E0104"]
        );
        // The limit itself is accepted.
        resolve_ok(
            "func f rank 1 { buffer @a : f64
               %t = apply r(@a) -> f64 { %0 = access @a [2147483647] return %0 }
               output %t [-2147483647:2147483647] }",
        );
    }

    #[test]
    fn inverted_box_is_empty() {
        let m = resolve_ok(
            "func f rank 1 {
               %t = apply r() -> f64 { %0 = const 1.0 return %0 }
               output %t [5:2]
             }",
        );
        assert!(m.functions[0].outputs[0].domain.is_empty());
    }

    #[test]
    fn load_module_reports_parse_errors_with_spans() {
        let errors = load_module("func f rank 1 {").unwrap_err();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|d| d.span.is_some()));
    }
}
