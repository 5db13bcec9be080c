//! Diagnostic system for errors and warnings
//!
//! Lexer, parser, compiler, runtime and sandbox findings all flow through
//! the unified [`Diagnostic`] type so hosts can render them consistently.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic schema version
pub const DIAG_VERSION: u32 = 1;

/// Stable diagnostic codes
pub mod codes {
    // Lexer (WD1xxx)
    pub const UNEXPECTED_CHARACTER: &str = "WD1001";
    pub const UNTERMINATED_STRING: &str = "WD1002";
    pub const INVALID_ESCAPE: &str = "WD1003";
    pub const UNTERMINATED_COMMENT: &str = "WD1004";
    pub const INVALID_NUMBER: &str = "WD1005";

    // Parser (WD11xx)
    pub const SYNTAX_ERROR: &str = "WD1100";
    pub const NESTING_TOO_DEEP: &str = "WD1101";
    pub const MISPLACED_ITEM: &str = "WD1102";

    // Compiler (WD2xxx)
    pub const UNDEFINED_VARIABLE: &str = "WD2001";
    pub const UNKNOWN_FUNCTION: &str = "WD2002";
    pub const ARITY_MISMATCH: &str = "WD2003";
    pub const DUPLICATE_FUNCTION: &str = "WD2004";
    pub const INVALID_ASSIGNMENT: &str = "WD2005";
    pub const LOOP_CONTROL_OUTSIDE_LOOP: &str = "WD2006";
    pub const MEMBER_ACCESS_ON_VALUE: &str = "WD2007";
    pub const PROGRAM_TOO_LARGE: &str = "WD2008";
    pub const ENTRY_POINT_NOT_FOUND: &str = "WD2009";
    pub const INVALID_BYTECODE: &str = "WD2010";

    // Runtime (WD3xxx)
    pub const RUNTIME_FAULT: &str = "WD3001";
    pub const STACK_OVERFLOW: &str = "WD3002";
    pub const MEMORY_LIMIT: &str = "WD3003";
    pub const DEADLINE_EXCEEDED: &str = "WD3004";
    pub const CANCELLED: &str = "WD3005";
    pub const INTEGER_OVERFLOW: &str = "WD3006";

    // Sandbox policy (WD4xxx)
    pub const BLOCKED_PATTERN: &str = "WD4001";
    pub const NAMESPACE_DENIED: &str = "WD4002";
    pub const NAMESPACE_NOT_GRANTED: &str = "WD4003";
    pub const FORBIDDEN_CONSTRUCT: &str = "WD4004";
    pub const RECURSION_SUSPECTED: &str = "WD4005";
    pub const ISOLATION_FAULT: &str = "WD4006";
}

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Prevents the script from running
    Error,
    /// Reported but non-blocking
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message (error or warning)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Diagnostic schema version
    pub diag_version: u32,
    pub level: DiagnosticLevel,
    /// Error code (e.g., "WD1001")
    pub code: String,
    pub message: String,
    /// File path or script id
    pub file: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    /// Length of the highlighted span
    pub length: usize,
    /// Source line containing the span
    pub snippet: String,
    /// Short label for the caret range
    pub label: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub help: Option<String>,
}

impl Diagnostic {
    fn with_level(
        level: DiagnosticLevel,
        code: impl Into<String>,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            diag_version: DIAG_VERSION,
            level,
            code: code.into(),
            message: message.into(),
            file: "<script>".to_string(),
            line: 1,
            column: span.start + 1,
            length: span.len(),
            snippet: String::new(),
            label: String::new(),
            notes: Vec::new(),
            help: None,
        }
    }

    /// Create a new error diagnostic with code
    pub fn error_with_code(
        code: impl Into<String>,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::with_level(DiagnosticLevel::Error, code, message, span)
    }

    /// Create a new warning diagnostic with code
    pub fn warning_with_code(
        code: impl Into<String>,
        message: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::with_level(DiagnosticLevel::Warning, code, message, span)
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Resolve line, column and snippet from the span's byte offset
    ///
    /// The column is computed from the constructor's `span.start`, so this must
    /// be applied to a freshly built diagnostic.
    pub fn located_in(mut self, source: &str) -> Self {
        let offset = (self.column - 1).min(source.len());
        let before = &source[..floor_char_boundary(source, offset)];
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        self.line = before.matches('\n').count() + 1;
        self.column = before[line_start..].chars().count() + 1;
        self.snippet = source[line_start..]
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        self
    }

    /// Format as human-readable string
    pub fn to_human_string(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{}[{}]: {}\n",
            self.level, self.code, self.message
        ));
        output.push_str(&format!(
            "  --> {}:{}:{}\n",
            self.file, self.line, self.column
        ));

        if !self.snippet.is_empty() {
            output.push_str("   |\n");
            output.push_str(&format!("{:>2} | {}\n", self.line, self.snippet));
            if self.length > 0 {
                let padding = " ".repeat(self.column.saturating_sub(1));
                let carets = "^".repeat(self.length);
                output.push_str(&format!("   | {}{}", padding, carets));
                if !self.label.is_empty() {
                    output.push_str(&format!(" {}", self.label));
                }
                output.push('\n');
            }
        }

        for note in &self.notes {
            output.push_str(&format!("   = note: {}\n", note));
        }
        if let Some(help) = &self.help {
            output.push_str(&format!("   = help: {}\n", help));
        }

        output
    }

    /// Format as JSON string
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.level, self.code, self.message)
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Sort diagnostics by level (errors first), then by location
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| match (a.level, b.level) {
        (DiagnosticLevel::Error, DiagnosticLevel::Warning) => std::cmp::Ordering::Less,
        (DiagnosticLevel::Warning, DiagnosticLevel::Error) => std::cmp::Ordering::Greater,
        _ => a
            .file
            .cmp(&b.file)
            .then(a.line.cmp(&b.line))
            .then(a.column.cmp(&b.column)),
    });
}

/// True if any diagnostic in the list is an error
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
