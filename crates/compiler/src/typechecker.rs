//! Type checker for Oaf
//!
//! Walks the parsed unit after symbol resolution, attaching an inferred
//! type to every expression node (side table keyed by node id) and
//! enforcing the coercion, cast, generic-arity, and loop-control rules.
//! The checker reports everything it finds and never short-circuits: a
//! failed subexpression yields the poison `error` type, which silences
//! follow-on complaints about the same node.
//!
//! Implicit conversions are widening-only: `char → int`, `char → float`,
//! `int → float`. Explicit casts cover exactly the numeric primitives.
//! Mutability is NOT enforced here; the ownership analyzer owns that rule.

use crate::ast::{
    BinaryOp, CompilationUnit, Expr, ExprKind, NodeId, Span, Stmt, StmtKind, TypeDecl, TypeRef,
    UnaryOp,
};
use crate::diagnostics::{DiagnosticBag, TYPE_ERROR};
use crate::symbols::{
    FieldSymbol, SymbolTable, Type, TypeBody, UserTypeDef, VariableSymbol, VariantSymbol,
};
use std::collections::HashMap;
use tracing::trace;

pub struct TypeChecker<'a> {
    bag: &'a mut DiagnosticBag,
    symbols: SymbolTable,
    expr_types: HashMap<NodeId, Type>,
    loop_depth: usize,
}

/// Everything the checker learned, handed to later phases.
pub struct CheckOutput {
    pub symbols: SymbolTable,
    pub expr_types: HashMap<NodeId, Type>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(bag: &'a mut DiagnosticBag) -> Self {
        TypeChecker {
            bag,
            symbols: SymbolTable::new(),
            expr_types: HashMap::new(),
            loop_depth: 0,
        }
    }

    pub fn check_unit(mut self, unit: &CompilationUnit) -> CheckOutput {
        for stmt in &unit.statements {
            self.check_stmt(stmt);
        }
        CheckOutput {
            symbols: self.symbols,
            expr_types: self.expr_types,
        }
    }

    fn error(&mut self, message: String, span: Span) {
        self.bag
            .report_error(TYPE_ERROR, message, span.line, span.column, span.length);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Declaration {
                is_mutable,
                declared_type,
                name,
                initializer,
            } => {
                let init_ty = self.check_expr(initializer);
                let var_ty = match declared_type {
                    Some(type_ref) => {
                        let declared = self.bind_type_ref(type_ref, &[]);
                        if !declared.is_error()
                            && !init_ty.is_error()
                            && !is_implicitly_convertible(&init_ty, &declared)
                        {
                            self.error(
                                format!(
                                    "cannot implicitly convert '{}' to '{}'",
                                    init_ty, declared
                                ),
                                initializer.span,
                            );
                        }
                        declared
                    }
                    None => init_ty,
                };
                self.declare_variable(name, var_ty, *is_mutable, stmt.span);
            }
            StmtKind::Assignment { name, op, value } => {
                let value_ty = self.check_expr(value);
                let existing = self.symbols.try_lookup(name).cloned();
                match existing {
                    None => {
                        if op.binary_op().is_none() {
                            // Plain assignment to an unknown name introduces
                            // a new (non-flux) binding, type inferred.
                            self.declare_variable(name, value_ty, false, stmt.span);
                        } else {
                            self.error(
                                format!("undefined variable '{}'", name),
                                stmt.span,
                            );
                        }
                    }
                    Some(symbol) => {
                        let target = symbol.ty;
                        if target.is_error() || value_ty.is_error() {
                            return;
                        }
                        match op.binary_op() {
                            None => {
                                if !is_implicitly_convertible(&value_ty, &target) {
                                    self.error(
                                        format!(
                                            "cannot implicitly convert '{}' to '{}'",
                                            value_ty, target
                                        ),
                                        value.span,
                                    );
                                }
                            }
                            Some(binary) => {
                                if !target.is_numeric() || !value_ty.is_numeric() {
                                    self.error(
                                        format!(
                                            "operator '{}' cannot be applied to '{}' and '{}'",
                                            op.spelling(),
                                            target,
                                            value_ty
                                        ),
                                        stmt.span,
                                    );
                                } else {
                                    let result = numeric_supertype(&target, &value_ty);
                                    if !is_implicitly_convertible(&result, &target) {
                                        self.error(
                                            format!(
                                                "operator '{}' result '{}' does not fit '{}'",
                                                binary.spelling(),
                                                result,
                                                target
                                            ),
                                            value.span,
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
            StmtKind::If {
                condition,
                body,
                else_body,
            } => {
                self.check_condition(condition);
                self.check_block(body);
                if let Some(else_body) = else_body {
                    self.check_block(else_body);
                }
            }
            StmtKind::Loop { condition, body } => {
                self.check_condition(condition);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error("'break' is only valid inside a loop".to_string(), stmt.span);
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        "'continue' is only valid inside a loop".to_string(),
                        stmt.span,
                    );
                }
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            StmtKind::Expression(expr) => {
                self.check_expr(expr);
            }
            StmtKind::TypeDecl(decl) => self.check_type_decl(decl),
        }
    }

    fn check_block(&mut self, body: &[Stmt]) {
        self.symbols.enter_scope();
        for stmt in body {
            self.check_stmt(stmt);
        }
        self.symbols.exit_scope();
    }

    fn check_condition(&mut self, condition: &Expr) {
        let ty = self.check_expr(condition);
        if !ty.is_error() && ty != Type::Bool {
            self.error(
                format!("condition must be 'bool', found '{}'", ty),
                condition.span,
            );
        }
    }

    fn declare_variable(&mut self, name: &str, ty: Type, is_mutable: bool, span: Span) {
        let declared = self.symbols.try_declare(VariableSymbol {
            name: name.to_string(),
            ty,
            is_mutable,
        });
        if !declared {
            self.error(
                format!("variable '{}' is already declared in this scope", name),
                span,
            );
        }
    }

    fn check_type_decl(&mut self, decl: &TypeDecl) {
        let declared = self.symbols.try_declare_type(UserTypeDef {
            name: decl.name.clone(),
            kind: decl.kind,
            type_params: decl.type_params.clone(),
            body: None,
        });
        if !declared {
            self.error(
                format!("type '{}' is already declared", decl.name),
                decl.span,
            );
            return;
        }
        trace!(name = %decl.name, kind = %decl.kind, "declared user type");
        let params = &decl.type_params;
        let fields = decl
            .fields
            .iter()
            .map(|field| FieldSymbol {
                name: field.name.clone(),
                ty: self.bind_type_ref(&field.ty, params),
            })
            .collect();
        let variants = decl
            .variants
            .iter()
            .map(|variant| VariantSymbol {
                name: variant.name.clone(),
                payload: variant
                    .payload
                    .as_ref()
                    .map(|payload| self.bind_type_ref(payload, params)),
            })
            .collect();
        if let Err(message) = self.symbols.finalize_type(
            &decl.name,
            TypeBody { fields, variants },
        ) {
            self.error(message, decl.span);
        }
    }

    // ------------------------------------------------------------------
    // Type references
    // ------------------------------------------------------------------

    /// Bind a syntactic type reference against the registry (and the
    /// enclosing declaration's type parameters, when inside one).
    fn bind_type_ref(&mut self, type_ref: &TypeRef, params: &[String]) -> Type {
        if let Some(position) = params.iter().position(|p| p == &type_ref.name) {
            if !type_ref.args.is_empty() {
                self.error(
                    format!("type parameter '{}' cannot take type arguments", type_ref.name),
                    type_ref.span,
                );
                return Type::Error;
            }
            return Type::GenericParam {
                name: type_ref.name.clone(),
                position,
            };
        }
        if let Some(primitive) = Type::primitive(&type_ref.name) {
            if !type_ref.args.is_empty() {
                self.error(
                    format!("type '{}' does not take type arguments", type_ref.name),
                    type_ref.span,
                );
                return Type::Error;
            }
            return primitive;
        }
        let Some(def) = self.symbols.lookup_user_type(&type_ref.name) else {
            self.error(format!("unknown type '{}'", type_ref.name), type_ref.span);
            return Type::Error;
        };
        let expected = def.type_params.len();
        if type_ref.args.len() != expected {
            self.error(
                format!(
                    "type '{}' expects {} type argument(s), found {}",
                    type_ref.name,
                    expected,
                    type_ref.args.len()
                ),
                type_ref.span,
            );
            return Type::Error;
        }
        if expected == 0 {
            Type::Named(type_ref.name.clone())
        } else {
            let args = type_ref
                .args
                .iter()
                .map(|arg| self.bind_type_ref(arg, params))
                .collect();
            Type::Constructed {
                name: type_ref.name.clone(),
                args,
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn record(&mut self, id: NodeId, ty: Type) -> Type {
        self.expr_types.insert(id, ty.clone());
        ty
    }

    fn check_expr(&mut self, expr: &Expr) -> Type {
        let ty = self.infer_expr(expr);
        self.record(expr.id, ty)
    }

    fn infer_expr(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::IntLiteral(_) => Type::Int,
            ExprKind::FloatLiteral(_) => Type::Float,
            ExprKind::BoolLiteral(_) => Type::Bool,
            ExprKind::StringLiteral(_) => Type::String,
            ExprKind::CharLiteral(_) => Type::Char,
            ExprKind::Name(name) => match self.symbols.try_lookup(name) {
                Some(symbol) => symbol.ty.clone(),
                None => {
                    self.error(format!("undefined variable '{}'", name), expr.span);
                    Type::Error
                }
            },
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.check_expr(operand);
                if operand_ty.is_error() {
                    return Type::Error;
                }
                match op {
                    UnaryOp::Neg => {
                        if operand_ty.is_numeric() {
                            // Chars promote: `-c` is an int.
                            if operand_ty == Type::Float {
                                Type::Float
                            } else {
                                Type::Int
                            }
                        } else {
                            self.error(
                                format!("operator '-' cannot be applied to '{}'", operand_ty),
                                expr.span,
                            );
                            Type::Error
                        }
                    }
                    UnaryOp::Not => {
                        if operand_ty == Type::Bool {
                            Type::Bool
                        } else {
                            self.error(
                                format!("operator '!' cannot be applied to '{}'", operand_ty),
                                expr.span,
                            );
                            Type::Error
                        }
                    }
                    UnaryOp::BitNot => {
                        if matches!(operand_ty, Type::Int | Type::Char) {
                            Type::Int
                        } else {
                            self.error(
                                format!("operator '~' requires an integer, found '{}'", operand_ty),
                                expr.span,
                            );
                            Type::Error
                        }
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                self.check_binary(*op, &lhs_ty, &rhs_ty, expr.span)
            }
            ExprKind::Cast { target, operand } => {
                let operand_ty = self.check_expr(operand);
                let target_ty = self.bind_type_ref(target, &[]);
                if target_ty.is_error() || operand_ty.is_error() {
                    return Type::Error;
                }
                let target_numeric = target_ty.is_numeric();
                if !target_numeric || !operand_ty.is_numeric() {
                    self.error(
                        format!("cannot cast '{}' to '{}'", operand_ty, target_ty),
                        expr.span,
                    );
                    return Type::Error;
                }
                target_ty
            }
            ExprKind::Call { callee, args } => {
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
                self.error("expression is not callable".to_string(), expr.span);
                Type::Error
            }
            ExprKind::Member { object, field } => {
                let object_ty = self.check_expr(object);
                if object_ty.is_error() {
                    return Type::Error;
                }
                self.check_member(&object_ty, field, expr.span)
            }
        }
    }

    fn check_binary(&mut self, op: BinaryOp, lhs: &Type, rhs: &Type, span: Span) -> Type {
        if lhs.is_error() || rhs.is_error() {
            return Type::Error;
        }
        if op.is_reserved() {
            self.error(
                format!("operator '{}' is reserved and cannot be used yet", op.spelling()),
                span,
            );
            return Type::Error;
        }
        // No string operators at all, `+` included, pending clarification.
        if *lhs == Type::String || *rhs == Type::String {
            self.error(
                format!("operator '{}' cannot be applied to 'string'", op.spelling()),
                span,
            );
            return Type::Error;
        }
        let mismatch = |checker: &mut Self| {
            checker.error(
                format!(
                    "operator '{}' cannot be applied to '{}' and '{}'",
                    op.spelling(),
                    lhs,
                    rhs
                ),
                span,
            );
            Type::Error
        };
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                if lhs.is_numeric() && rhs.is_numeric() {
                    numeric_supertype(lhs, rhs)
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if is_integer(lhs) && is_integer(rhs) {
                    Type::Int
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShlU | BinaryOp::ShrU => {
                if is_integer(lhs) && is_integer(rhs) {
                    Type::Int
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                if *lhs == Type::Bool && *rhs == Type::Bool {
                    Type::Bool
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if (*lhs == Type::Bool && *rhs == Type::Bool)
                    || (lhs.is_numeric() && rhs.is_numeric())
                {
                    Type::Bool
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                if lhs.is_numeric() && rhs.is_numeric() {
                    Type::Bool
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Nor | BinaryOp::Nand | BinaryOp::Xand => Type::Error,
        }
    }

    fn check_member(&mut self, object_ty: &Type, field: &str, span: Span) -> Type {
        let (name, args): (&str, &[Type]) = match object_ty {
            Type::Named(name) => (name, &[]),
            Type::Constructed { name, args } => (name, args),
            _ => {
                self.error(
                    format!("type '{}' has no members", object_ty),
                    span,
                );
                return Type::Error;
            }
        };
        let Some(def) = self.symbols.lookup_user_type(name) else {
            self.error(format!("unknown type '{}'", name), span);
            return Type::Error;
        };
        let field_ty = def
            .body
            .as_ref()
            .and_then(|body| body.fields.iter().find(|f| f.name == field))
            .map(|f| f.ty.clone());
        match field_ty {
            Some(ty) => substitute_params(&ty, args),
            None => {
                self.error(
                    format!("type '{}' has no member '{}'", object_ty, field),
                    span,
                );
                Type::Error
            }
        }
    }
}

/// Replace generic parameters with the constructed type's arguments.
fn substitute_params(ty: &Type, args: &[Type]) -> Type {
    match ty {
        Type::GenericParam { position, .. } => {
            args.get(*position).cloned().unwrap_or(Type::Error)
        }
        Type::Constructed { name, args: inner } => Type::Constructed {
            name: name.clone(),
            args: inner.iter().map(|t| substitute_params(t, args)).collect(),
        },
        other => other.clone(),
    }
}

fn is_integer(ty: &Type) -> bool {
    // Chars widen to int for the integer-only operator families.
    matches!(ty, Type::Int | Type::Char)
}

/// Common numeric supertype under the widening rules. Chars promote to int
/// the moment arithmetic touches them.
pub fn numeric_supertype(lhs: &Type, rhs: &Type) -> Type {
    if *lhs == Type::Float || *rhs == Type::Float {
        Type::Float
    } else {
        Type::Int
    }
}

/// The implicit (widening-only) conversion matrix: identity, plus
/// `char→int`, `char→float`, `int→float`. The poison type converts to
/// anything so one error does not cascade.
pub fn is_implicitly_convertible(from: &Type, to: &Type) -> bool {
    if from.is_error() || to.is_error() {
        return true;
    }
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Type::Char, Type::Int) | (Type::Char, Type::Float) | (Type::Int, Type::Float)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn check(source: &str) -> (DiagnosticBag, CheckOutput) {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        assert!(!bag.has_errors(), "parse failed: {:?}", bag.iter().collect::<Vec<_>>());
        let output = TypeChecker::new(&mut bag).check_unit(&unit);
        (bag, output)
    }

    fn codes(bag: &DiagnosticBag) -> Vec<&'static str> {
        bag.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_implicit_widening_accepted() {
        let (bag, _) = check("char c = 'a'; int i = c; float f = i; float g = c;");
        assert!(!bag.has_errors(), "{:?}", bag.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_narrowing_requires_cast() {
        let (bag, _) = check("float f = 1.25; int i = f;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_explicit_numeric_casts_accepted() {
        let (bag, _) = check(
            "float f = 1.25; int i = (int)f; char c = (char)65; float g = (float)i; int j = (int)c;",
        );
        assert!(!bag.has_errors(), "{:?}", bag.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_bool_cast_forbidden() {
        let (bag, _) = check("x = (bool)1;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_string_casts_forbidden() {
        let (bag, _) = check("x = (string)1; y = (int)\"oops\";");
        assert_eq!(codes(&bag), vec![TYPE_ERROR, TYPE_ERROR]);
    }

    #[test]
    fn test_generic_arity_mismatch() {
        let (bag, _) = check("struct Box<T> [T value]; Box value = 1;");
        let d = bag.iter().next().unwrap();
        assert_eq!(d.code, TYPE_ERROR);
        assert!(d.message.contains("type argument"));
    }

    #[test]
    fn test_generic_correct_arity_binds() {
        let (bag, _) = check("struct Box<T> [T value]; Box<int> b = x;");
        // Only the undefined initializer name is an error; arity is fine.
        let messages: Vec<_> = bag.iter().map(|d| d.message.clone()).collect();
        assert_eq!(messages, vec!["undefined variable 'x'".to_string()]);
    }

    #[test]
    fn test_break_outside_loop() {
        let (bag, _) = check("break;");
        let d = bag.iter().next().unwrap();
        assert_eq!(d.code, TYPE_ERROR);
        assert!(d.line >= 1 && d.column >= 1);
    }

    #[test]
    fn test_continue_inside_loop_is_fine() {
        let (bag, _) = check("flux i = 3; loop i > 0 => { i -= 1; continue; }");
        assert!(!bag.has_errors());
    }

    #[test]
    fn test_condition_must_be_bool() {
        let (bag, _) = check("loop 1 => break;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_string_concat_rejected() {
        let (bag, _) = check("s = \"a\" + \"b\";");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_reserved_operators_rejected() {
        let (bag, _) = check("x = 1 !| 2; y = 1 !& 2; z = 1 ^& 2;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR, TYPE_ERROR, TYPE_ERROR]);
    }

    #[test]
    fn test_shift_requires_integers() {
        let (bag, _) = check("x = 1.0 << 2;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_logical_requires_bool() {
        let (bag, _) = check("x = 1 && true;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_plain_assignment_introduces_binding_once() {
        let (bag, output) = check("count = 1; other = count + 2;");
        assert!(!bag.has_errors());
        let symbol = output.symbols.try_lookup("count").unwrap();
        assert_eq!(symbol.ty, Type::Int);
        assert!(!symbol.is_mutable);
    }

    #[test]
    fn test_compound_assignment_to_unknown_name() {
        let (bag, _) = check("ghost += 1;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_expression_types_recorded() {
        let (_, output) = check("flux x = 1 + 2;");
        // Literals and the sum all carry int.
        assert!(output.expr_types.values().all(|t| *t == Type::Int));
        assert_eq!(output.expr_types.len(), 3);
    }

    #[test]
    fn test_member_access_on_primitives_rejected() {
        let (bag, _) = check("x = 1; y = x.field;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_calls_rejected() {
        let (bag, _) = check("x = 1; y = x(2);");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }

    #[test]
    fn test_checker_reports_everything() {
        // Two independent errors in one unit; no short-circuit.
        let (bag, _) = check("float f = 1.25; int i = f; break;");
        assert_eq!(codes(&bag), vec![TYPE_ERROR, TYPE_ERROR]);
    }

    #[test]
    fn test_duplicate_type_declaration() {
        let (bag, _) = check("struct P [x: int]; struct P [y: int];");
        assert_eq!(codes(&bag), vec![TYPE_ERROR]);
    }
}
