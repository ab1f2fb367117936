//! Structured diagnostics
//!
//! Every phase reports into a shared, append-only `DiagnosticBag`. Nothing
//! is deduplicated or reordered: the bag prints in insertion order, and
//! compiling the same source twice yields byte-identical sequences.

use std::fmt;

/// Diagnostic codes, one per phase.
pub const LEX_ERROR: &str = "LEX001";
pub const PARSE_ERROR: &str = "PAR001";
pub const TYPE_ERROR: &str = "TYP001";
pub const OWNERSHIP_ERROR: &str = "OWN001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Info => write!(f, "Info"),
        }
    }
}

/// A single diagnostic record.
///
/// `line` and `column` are 1-based; `length` is at least 1 and covers the
/// offending source range.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(
        code: &'static str,
        message: impl Into<String>,
        line: usize,
        column: usize,
        length: usize,
    ) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            line,
            column,
            length: length.max(1),
            severity: Severity::Error,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({},{}): {}",
            self.severity, self.code, self.line, self.column, self.message
        )
    }
}

/// Append-only ordered collection of diagnostics, shared across phases.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        DiagnosticBag {
            diagnostics: Vec::new(),
        }
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn report_error(
        &mut self,
        code: &'static str,
        message: impl Into<String>,
        line: usize,
        column: usize,
        length: usize,
    ) {
        self.report(Diagnostic::error(code, message, line, column, length));
    }

    /// True once any Error-severity diagnostic has been reported.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl<'a> IntoIterator for &'a DiagnosticBag {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_format() {
        let d = Diagnostic::error(TYPE_ERROR, "cannot convert float to int", 3, 14, 1);
        assert_eq!(d.to_string(), "Error TYP001 (3,14): cannot convert float to int");
    }

    #[test]
    fn test_length_clamped_to_one() {
        let d = Diagnostic::error(LEX_ERROR, "unexpected character", 1, 1, 0);
        assert_eq!(d.length, 1);
    }

    #[test]
    fn test_has_errors_ignores_warnings() {
        let mut bag = DiagnosticBag::new();
        bag.report(Diagnostic {
            code: OWNERSHIP_ERROR,
            message: "note".to_string(),
            line: 1,
            column: 1,
            length: 1,
            severity: Severity::Warning,
        });
        assert!(!bag.has_errors());
        bag.report_error(OWNERSHIP_ERROR, "cannot assign", 2, 1, 5);
        assert!(bag.has_errors());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut bag = DiagnosticBag::new();
        bag.report_error(LEX_ERROR, "first", 1, 1, 1);
        bag.report_error(PARSE_ERROR, "second", 1, 2, 1);
        let codes: Vec<_> = bag.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![LEX_ERROR, PARSE_ERROR]);
    }
}
