// diag.rs: Unified diagnostics model
//
// Provides the shared diagnostic types used by the resolver and all passes.
// A diagnostic is tagged with the operator it concerns (`Subject`) when it is
// produced on the IR, and with a source span when produced on the AST.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ast::Span;
use crate::id::{ApplyId, BufferId, TempId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Resolution (textual IR → arena IR)
    pub const E0100: DiagCode = DiagCode("E0100"); // undefined name
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate definition
    pub const E0102: DiagCode = DiagCode("E0102"); // rank mismatch
    pub const E0103: DiagCode = DiagCode("E0103"); // access to a non-operand
    pub const E0104: DiagCode = DiagCode("E0104"); // malformed body or out-of-range coordinate

    // Analysis (fatal per function)
    pub const E0200: DiagCode = DiagCode("E0200"); // cyclic dependency
    pub const E0201: DiagCode = DiagCode("E0201"); // out-of-bounds external access
    pub const E0202: DiagCode = DiagCode("E0202"); // stale shape data
    pub const E0203: DiagCode = DiagCode("E0203"); // structural verification failed

    // Rewrite skips (non-fatal)
    pub const W0300: DiagCode = DiagCode("W0300"); // unresolved shape (dead region)
    pub const W0301: DiagCode = DiagCode("W0301"); // unroll skipped
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Subject ──────────────────────────────────────────────────────────────

/// The IR entity a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Subject {
    Function(String),
    Apply(ApplyId, String),
    Temp(TempId, String),
    Buffer(BufferId, String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Function(name) => write!(f, "func '{}'", name),
            Subject::Apply(_, name) => write!(f, "apply '{}'", name),
            Subject::Temp(_, name) => write!(f, "temporary '%{}'", name),
            Subject::Buffer(_, name) => write!(f, "buffer '@{}'", name),
        }
    }
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone, Serialize)]
pub struct CauseRecord {
    pub message: String,
    pub subject: Option<Subject>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by the resolver or any pass.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub subject: Option<Subject>,
    #[serde(skip)]
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<Subject>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, subject, span, hint or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            subject: None,
            span: None,
            message: message.into(),
            hint: None,
            related: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Tag the diagnostic with the offending operator.
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach a source location.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related operator.
    pub fn with_related(mut self, subject: Subject) -> Self {
        self.related.push(subject);
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, subject: Option<Subject>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            subject,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, "\n  --> {}", subject)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
