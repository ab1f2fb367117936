//! Ownership and mutability analysis
//!
//! Runs after type checking and re-walks the unit with its own scope stack:
//! every reassignment (`=` to an existing binding, or any compound
//! assignment) must target a binding declared with `flux`. Violations are
//! `OWN001` at the assignment's source position. The analysis is non-fatal
//! to later phases only in the sense that it keeps walking; its errors
//! still fail the compilation.

use crate::ast::{CompilationUnit, Stmt, StmtKind};
use crate::diagnostics::{DiagnosticBag, OWNERSHIP_ERROR};
use crate::symbols::{SymbolTable, Type, VariableSymbol};
use tracing::trace;

pub struct OwnershipAnalyzer<'a> {
    bag: &'a mut DiagnosticBag,
    // Only `is_mutable` is consulted here; bindings carry `unit` as a
    // placeholder type so this pass stays independent of the checker's
    // inference results.
    symbols: SymbolTable,
}

impl<'a> OwnershipAnalyzer<'a> {
    pub fn new(bag: &'a mut DiagnosticBag) -> Self {
        OwnershipAnalyzer {
            bag,
            symbols: SymbolTable::new(),
        }
    }

    pub fn analyze_unit(mut self, unit: &CompilationUnit) {
        for stmt in &unit.statements {
            self.analyze_stmt(stmt);
        }
    }

    fn declare(&mut self, name: &str, is_mutable: bool) {
        // Duplicate declarations were already reported by the checker.
        let _ = self.symbols.try_declare(VariableSymbol {
            name: name.to_string(),
            ty: Type::Unit,
            is_mutable,
        });
    }

    fn analyze_block(&mut self, body: &[Stmt]) {
        self.symbols.enter_scope();
        for stmt in body {
            self.analyze_stmt(stmt);
        }
        self.symbols.exit_scope();
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Declaration {
                is_mutable, name, ..
            } => {
                self.declare(name, *is_mutable);
            }
            StmtKind::Assignment { name, op, .. } => {
                match self.symbols.try_lookup_with_scope_depth(name) {
                    Some((symbol, depth)) => {
                        if !symbol.is_mutable {
                            trace!(name = %name, depth, "write to immutable binding");
                            self.bag.report_error(
                                OWNERSHIP_ERROR,
                                format!(
                                    "cannot assign to '{}': binding is not declared 'flux'",
                                    name
                                ),
                                stmt.span.line,
                                stmt.span.column,
                                stmt.span.length,
                            );
                        }
                    }
                    None => {
                        if op.binary_op().is_none() {
                            // The declaring assignment; later writes must
                            // find a flux binding.
                            self.declare(name, false);
                        }
                        // A compound assignment to an unknown name was
                        // already a type error.
                    }
                }
            }
            StmtKind::If {
                body, else_body, ..
            } => {
                self.analyze_block(body);
                if let Some(else_body) = else_body {
                    self.analyze_block(else_body);
                }
            }
            StmtKind::Loop { body, .. } => {
                self.analyze_block(body);
            }
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Return { .. }
            | StmtKind::Expression(_)
            | StmtKind::TypeDecl(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn analyze(source: &str) -> DiagnosticBag {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        assert!(!bag.has_errors());
        OwnershipAnalyzer::new(&mut bag).analyze_unit(&unit);
        bag
    }

    #[test]
    fn test_compound_assignment_to_immutable() {
        let bag = analyze("count = 1; count += 2;");
        let diagnostics: Vec<_> = bag.iter().collect();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, OWNERSHIP_ERROR);
        // Points at `count += 2`, the second statement.
        assert_eq!((diagnostics[0].line, diagnostics[0].column), (1, 12));
    }

    #[test]
    fn test_plain_reassignment_to_immutable() {
        let bag = analyze("x = 1; x = 2;");
        assert_eq!(bag.iter().filter(|d| d.code == OWNERSHIP_ERROR).count(), 1);
    }

    #[test]
    fn test_flux_bindings_are_writable() {
        let bag = analyze("flux sum = 0; sum += 1; sum = 5; sum *= 2;");
        assert!(bag.is_empty());
    }

    #[test]
    fn test_typed_declaration_without_flux_is_immutable() {
        let bag = analyze("int x = 1; x = 2;");
        assert_eq!(bag.iter().filter(|d| d.code == OWNERSHIP_ERROR).count(), 1);
    }

    #[test]
    fn test_outer_flux_writable_from_nested_block() {
        let bag = analyze("flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; } i -= 1; }");
        assert!(bag.is_empty());
    }

    #[test]
    fn test_analysis_does_not_stop_at_first_violation() {
        let bag = analyze("a = 1; b = 2; a += 1; b += 2;");
        assert_eq!(bag.iter().filter(|d| d.code == OWNERSHIP_ERROR).count(), 2);
    }
}
