// stencil-opt: Stencil IR optimization core
//
// Library root: textual IR front end, arena IR, shape inference, inlining,
// unrolling, the pass driver and the reference evaluator.

pub mod ast;
pub mod bbox;
pub mod diag;
pub mod dot;
pub mod error;
pub mod eval;
pub mod graph;
pub mod id;
pub mod inline;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod print;
pub mod resolve;
pub mod shape_infer;
pub mod unroll;
pub mod verify;
