// Lexer for the textual stencil IR.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) is insignificant; `#` starts a comment running to end of line.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;
use logos::Logos;

use crate::ast::Span;

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Stencil IR token types.
///
/// Keywords and symbols are matched as fixed strings. Sigiled names carry the
/// name without its sigil.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("func")]
    Func,
    #[token("rank")]
    Rank,
    #[token("buffer")]
    Buffer,
    #[token("domain")]
    Domain,
    #[token("required")]
    Required,
    #[token("apply")]
    Apply,
    #[token("over")]
    Over,
    #[token("return")]
    Return,
    #[token("unroll")]
    Unroll,
    #[token("by")]
    By,
    #[token("epilogue")]
    Epilogue,
    #[token("output")]
    Output,
    #[token("empty")]
    Empty,
    #[token("access")]
    Access,
    #[token("index")]
    Index,
    #[token("const")]
    Const,
    #[token("call")]
    Call,
    #[token("impure")]
    Impure,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // ── Literals ──
    /// Float literal: requires a fraction or an exponent.
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    // ── Names ──
    /// `%name`: temporary or body value.
    #[regex(r"%[A-Za-z0-9_]+", strip_sigil)]
    Local(String),

    /// `@name`: external buffer.
    #[regex(r"@[A-Za-z_][A-Za-z0-9_]*", strip_sigil)]
    Global(String),

    // Placed after keywords; logos prefers fixed `#[token]` matches over a
    // regex of the same length, so `rank` lexes as Rank, not Ident.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Func => write!(f, "func"),
            Token::Rank => write!(f, "rank"),
            Token::Buffer => write!(f, "buffer"),
            Token::Domain => write!(f, "domain"),
            Token::Required => write!(f, "required"),
            Token::Apply => write!(f, "apply"),
            Token::Over => write!(f, "over"),
            Token::Return => write!(f, "return"),
            Token::Unroll => write!(f, "unroll"),
            Token::By => write!(f, "by"),
            Token::Epilogue => write!(f, "epilogue"),
            Token::Output => write!(f, "output"),
            Token::Empty => write!(f, "empty"),
            Token::Access => write!(f, "access"),
            Token::Index => write!(f, "index"),
            Token::Const => write!(f, "const"),
            Token::Call => write!(f, "call"),
            Token::Impure => write!(f, "impure"),
            Token::Arrow => write!(f, "->"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Float(v) => write!(f, "{v:?}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Local(name) => write!(f, "%{name}"),
            Token::Global(name) => write!(f, "@{name}"),
            Token::Ident(name) => write!(f, "{name}"),
        }
    }
}

// ── Callbacks ──

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn strip_sigil(lex: &mut logos::Lexer<'_, Token>) -> String {
    lex.slice()[1..].to_string()
}

// ── Public API ──

/// Lex a source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span: SimpleSpan = (range.start..range.end).into();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[range]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
