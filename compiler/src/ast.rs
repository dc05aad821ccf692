// AST node types for the textual stencil IR.
//
// Mirrors the surface syntax one-to-one; names are still unresolved strings.
// Every node carries a `SimpleSpan` for error reporting during resolution.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::{BinaryOp, UnaryOp};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAst {
    pub functions: Vec<FuncDecl>,
    pub span: Span,
}

/// `func NAME rank N { item* }`
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: Ident,
    pub rank: i64,
    pub rank_span: Span,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Buffer(BufferDecl),
    Apply(ApplyDecl),
    Output(OutputDecl),
}

// ── Boxes and offsets ──

#[derive(Debug, Clone, PartialEq)]
pub enum BoxKind {
    /// `[lb:ub, ...]`
    Ranges(Vec<(i64, i64)>),
    /// `empty`
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxLit {
    pub kind: BoxKind,
    pub span: Span,
}

/// `[o0, o1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetLit {
    pub values: Vec<i64>,
    pub span: Span,
}

// ── Items ──

/// `buffer @NAME : TYPE (domain BOX)? (required BOX)?`
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub name: Ident,
    pub elem: Ident,
    pub domain: Option<BoxLit>,
    pub required: Option<BoxLit>,
    pub span: Span,
}

/// `%temp` or `@buffer`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandRef {
    Temp(Ident),
    Buffer(Ident),
}

impl OperandRef {
    pub fn ident(&self) -> &Ident {
        match self {
            OperandRef::Temp(i) | OperandRef::Buffer(i) => i,
        }
    }
}

/// `TYPE BOX?` in an apply header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultType {
    pub elem: Ident,
    pub shape: Option<BoxLit>,
}

/// `%r, ... = apply NAME(operands) -> types (over BOX)? { body } (epilogue { body })?`
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyDecl {
    pub results: Vec<Ident>,
    pub name: Ident,
    pub operands: Vec<OperandRef>,
    pub result_types: Vec<ResultType>,
    pub over: Option<BoxLit>,
    pub body: BodyAst,
    pub epilogue: Option<BodyAst>,
    pub span: Span,
}

/// `output %temp BOX`
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDecl {
    pub temp: Ident,
    pub domain: BoxLit,
    pub span: Span,
}

// ── Bodies ──

#[derive(Debug, Clone, PartialEq)]
pub struct BodyAst {
    pub stmts: Vec<OpStmt>,
    pub ret: ReturnStmt,
    pub span: Span,
}

/// `%value = op`
#[derive(Debug, Clone, PartialEq)]
pub struct OpStmt {
    pub result: Ident,
    pub op: OpAst,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpAst {
    Access { operand: OperandRef, offset: OffsetLit },
    Index { dim: i64, dim_span: Span, offset: OffsetLit },
    Const(f64),
    Unary { op: UnaryOp, arg: Ident },
    Binary { op: BinaryOp, lhs: Ident, rhs: Ident },
    Call { callee: Ident, args: Vec<Ident>, pure: bool },
}

/// `return %v, ... (unroll AXIS by FACTOR)?`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub values: Vec<Ident>,
    pub unroll: Option<(i64, i64)>,
    pub span: Span,
}
