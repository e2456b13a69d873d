//! Structured diagnostics for the scanner, parser, lowerer, and engine.
//!
//! Modeled on `phonon::error_diagnostics::DiagnosticError`, but carries a
//! `kind` so callers can distinguish warnings (lexical/syntactic/semantic/
//! numerical — advisory, collected and parsing continues) from the errors
//! that abort the current program (resource/io).

use std::fmt;
use std::path::PathBuf;

/// Which phase/category a diagnostic belongs to (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntactic,
    Semantic,
    Numerical,
    Resource,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Lexical => "lexical",
            ErrorKind::Syntactic => "syntactic",
            ErrorKind::Semantic => "semantic",
            ErrorKind::Numerical => "numerical",
            ErrorKind::Resource => "resource",
            ErrorKind::Io => "io",
        };
        f.write_str(s)
    }
}

/// A single diagnostic with source position, for both warnings and errors.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub path: Option<PathBuf>,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            line,
            column,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<input>".to_string());
        writeln!(
            f,
            "{file}:{}:{}: {} error: {}",
            self.line, self.column, self.kind, self.message
        )?;
        if self.column > 0 {
            writeln!(f, "  {}^", " ".repeat(self.column.saturating_sub(1)))?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Warnings accumulated during a phase that tolerates and continues past
/// individual failures (spec.md §7: "one warning per occurrence").
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        tracing::warn!("{d}");
        self.warnings.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
