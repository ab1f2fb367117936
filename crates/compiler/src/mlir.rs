//! Structured (mlir) lowering
//!
//! The alternate compilation target. Instead of flattening through the
//! block/temporary IR, this path lowers the typed AST into a structured
//! dialect — region-nested ops over an implicit operand stack, the way an
//! `scf`-style dialect nests `if`/`while` regions — and then flattens the
//! regions to the same bytecode instruction set the VM executes.
//!
//! The two targets share nothing past the type checker, which is exactly
//! what makes the observable-parity contract worth testing: identical
//! terminal values and runtime-error classes for every accepted program,
//! from independently scheduled code.

use crate::ast::{
    BinaryOp, CompilationUnit, Expr, ExprKind, NodeId, Stmt, StmtKind, UnaryOp,
};
use crate::codegen::{ConstantPool, binary_op, convert_op, unary_op};
use crate::ir::{ConvKind, IrUnOp};
use crate::lowering::select_binary_op;
use crate::symbols::Type;
use crate::typechecker::numeric_supertype;
use oaf_core::bytecode::{Constant, FunctionInfo, Op, Program};
use std::collections::HashMap;

/// One op of the structured dialect. Value flow is an implicit operand
/// stack; control flow is region nesting instead of jumps.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOp {
    Push(Constant),
    Load(u32),
    Store(u32),
    Drop,
    /// A direct stack operation (arithmetic, comparison, conversion).
    Apply(Op),
    /// Consumes a bool; runs one of the two regions.
    If {
        then_region: Vec<StructuredOp>,
        else_region: Vec<StructuredOp>,
    },
    /// Re-evaluates `cond_region` before every iteration.
    Loop {
        cond_region: Vec<StructuredOp>,
        body_region: Vec<StructuredOp>,
    },
    Break,
    Continue,
    /// Consumes the value on top of the stack as the program result.
    Return,
    ReturnUnit,
}

/// A structured module: one top-level region plus its variable-slot count.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredModule {
    pub region: Vec<StructuredOp>,
    pub local_count: u32,
}

// ----------------------------------------------------------------------
// AST → structured dialect
// ----------------------------------------------------------------------

struct StructuredLowerer<'a> {
    expr_types: &'a HashMap<NodeId, Type>,
    scopes: Vec<HashMap<String, (u32, Type)>>,
    next_slot: u32,
}

impl<'a> StructuredLowerer<'a> {
    fn new(expr_types: &'a HashMap<NodeId, Type>) -> Self {
        StructuredLowerer {
            expr_types,
            scopes: vec![HashMap::new()],
            next_slot: 0,
        }
    }

    fn expr_type(&self, expr: &Expr) -> Result<Type, String> {
        self.expr_types
            .get(&expr.id)
            .cloned()
            .ok_or_else(|| format!("internal: no type recorded for node {}", expr.id))
    }

    fn declare_slot(&mut self, name: &str, ty: Type) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), (slot, ty));
        }
        slot
    }

    fn lookup_slot(&self, name: &str) -> Option<(u32, Type)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|(slot, ty)| (*slot, ty.clone()))
    }

    fn lower_region(&mut self, body: &[Stmt]) -> Result<Vec<StructuredOp>, String> {
        self.scopes.push(HashMap::new());
        let mut region = Vec::new();
        for stmt in body {
            self.lower_stmt(stmt, &mut region)?;
        }
        self.scopes.pop();
        Ok(region)
    }

    fn lower_stmt(&mut self, stmt: &Stmt, region: &mut Vec<StructuredOp>) -> Result<(), String> {
        match &stmt.kind {
            StmtKind::Declaration {
                declared_type,
                name,
                initializer,
                ..
            } => {
                let init_ty = self.expr_type(initializer)?;
                let var_ty = match declared_type {
                    Some(type_ref) => Type::primitive(&type_ref.name)
                        .ok_or_else(|| format!("internal: non-primitive variable '{}'", name))?,
                    None => init_ty.clone(),
                };
                self.lower_expr(initializer, region)?;
                coerce(region, &init_ty, &var_ty);
                let slot = self.declare_slot(name, var_ty);
                region.push(StructuredOp::Store(slot));
            }
            StmtKind::Assignment { name, op, value } => {
                let value_ty = self.expr_type(value)?;
                match op.binary_op() {
                    None => {
                        let (slot, var_ty) = match self.lookup_slot(name) {
                            Some(found) => found,
                            None => {
                                let slot = self.declare_slot(name, value_ty.clone());
                                (slot, value_ty.clone())
                            }
                        };
                        self.lower_expr(value, region)?;
                        coerce(region, &value_ty, &var_ty);
                        region.push(StructuredOp::Store(slot));
                    }
                    Some(binary) => {
                        let (slot, var_ty) = self
                            .lookup_slot(name)
                            .ok_or_else(|| format!("internal: unresolved variable '{}'", name))?;
                        let result_ty = numeric_supertype(&var_ty, &value_ty);
                        region.push(StructuredOp::Load(slot));
                        coerce(region, &var_ty, &result_ty);
                        self.lower_expr(value, region)?;
                        coerce(region, &value_ty, &result_ty);
                        let ir_op = select_binary_op(binary, &result_ty)?;
                        region.push(StructuredOp::Apply(binary_op(ir_op)));
                        region.push(StructuredOp::Store(slot));
                    }
                }
            }
            StmtKind::If {
                condition,
                body,
                else_body,
            } => {
                self.lower_expr(condition, region)?;
                let then_region = self.lower_region(body)?;
                let else_region = match else_body {
                    Some(body) => self.lower_region(body)?,
                    None => Vec::new(),
                };
                region.push(StructuredOp::If {
                    then_region,
                    else_region,
                });
            }
            StmtKind::Loop { condition, body } => {
                let mut cond_region = Vec::new();
                self.lower_expr(condition, &mut cond_region)?;
                let body_region = self.lower_region(body)?;
                region.push(StructuredOp::Loop {
                    cond_region,
                    body_region,
                });
            }
            StmtKind::Break => region.push(StructuredOp::Break),
            StmtKind::Continue => region.push(StructuredOp::Continue),
            StmtKind::Return { value } => match value {
                Some(expr) => {
                    self.lower_expr(expr, region)?;
                    region.push(StructuredOp::Return);
                }
                None => region.push(StructuredOp::ReturnUnit),
            },
            StmtKind::Expression(expr) => {
                self.lower_expr(expr, region)?;
                region.push(StructuredOp::Drop);
            }
            StmtKind::TypeDecl(_) => {}
        }
        Ok(())
    }

    /// Post-order expression emission onto the implicit operand stack.
    fn lower_expr(&mut self, expr: &Expr, region: &mut Vec<StructuredOp>) -> Result<(), String> {
        match &expr.kind {
            ExprKind::IntLiteral(value) => region.push(StructuredOp::Push(Constant::Int(*value))),
            ExprKind::FloatLiteral(value) => {
                region.push(StructuredOp::Push(Constant::Float(*value)))
            }
            ExprKind::BoolLiteral(value) => {
                region.push(StructuredOp::Push(Constant::Bool(*value)))
            }
            ExprKind::StringLiteral(value) => {
                region.push(StructuredOp::Push(Constant::Str(value.clone())))
            }
            ExprKind::CharLiteral(value) => {
                region.push(StructuredOp::Push(Constant::Char(*value)))
            }
            ExprKind::Name(name) => {
                let (slot, _) = self
                    .lookup_slot(name)
                    .ok_or_else(|| format!("internal: unresolved variable '{}'", name))?;
                region.push(StructuredOp::Load(slot));
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.expr_type(operand)?;
                self.lower_expr(operand, region)?;
                match op {
                    UnaryOp::Neg => {
                        let result_ty = self.expr_type(expr)?;
                        coerce(region, &operand_ty, &result_ty);
                        let ir_op = if result_ty == Type::Float {
                            IrUnOp::NegF
                        } else {
                            IrUnOp::NegI
                        };
                        region.push(StructuredOp::Apply(unary_op(ir_op)));
                    }
                    UnaryOp::Not => region.push(StructuredOp::Apply(Op::Not)),
                    UnaryOp::BitNot => {
                        coerce(region, &operand_ty, &Type::Int);
                        region.push(StructuredOp::Apply(Op::BitNot));
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.expr_type(lhs)?;
                let rhs_ty = self.expr_type(rhs)?;
                match op {
                    BinaryOp::And | BinaryOp::Or => {
                        self.lower_expr(lhs, region)?;
                        self.lower_expr(rhs, region)?;
                        let selected = if *op == BinaryOp::And {
                            Op::AndB
                        } else {
                            Op::OrB
                        };
                        region.push(StructuredOp::Apply(selected));
                    }
                    BinaryOp::Eq | BinaryOp::Ne if lhs_ty == Type::Bool => {
                        self.lower_expr(lhs, region)?;
                        self.lower_expr(rhs, region)?;
                        let selected = if *op == BinaryOp::Eq { Op::EqB } else { Op::NeB };
                        region.push(StructuredOp::Apply(selected));
                    }
                    BinaryOp::BitAnd
                    | BinaryOp::BitOr
                    | BinaryOp::BitXor
                    | BinaryOp::Shl
                    | BinaryOp::Shr
                    | BinaryOp::ShlU
                    | BinaryOp::ShrU => {
                        self.lower_expr(lhs, region)?;
                        coerce(region, &lhs_ty, &Type::Int);
                        self.lower_expr(rhs, region)?;
                        coerce(region, &rhs_ty, &Type::Int);
                        let ir_op = select_binary_op(*op, &Type::Int)?;
                        region.push(StructuredOp::Apply(binary_op(ir_op)));
                    }
                    _ => {
                        let common = numeric_supertype(&lhs_ty, &rhs_ty);
                        self.lower_expr(lhs, region)?;
                        coerce(region, &lhs_ty, &common);
                        self.lower_expr(rhs, region)?;
                        coerce(region, &rhs_ty, &common);
                        let ir_op = select_binary_op(*op, &common)?;
                        region.push(StructuredOp::Apply(binary_op(ir_op)));
                    }
                }
            }
            ExprKind::Cast { operand, .. } => {
                let from = self.expr_type(operand)?;
                let to = self.expr_type(expr)?;
                self.lower_expr(operand, region)?;
                if let Some(kind) = conversion_kind(&from, &to) {
                    region.push(StructuredOp::Apply(convert_op(kind)));
                }
            }
            ExprKind::Call { .. } | ExprKind::Member { .. } => {
                return Err(
                    "internal: unlowerable expression survived type checking".to_string(),
                );
            }
        }
        Ok(())
    }
}

/// Widening coercion applied to the value on top of the implicit stack.
fn coerce(region: &mut Vec<StructuredOp>, from: &Type, to: &Type) {
    let kind = match (from, to) {
        (Type::Char, Type::Int) => ConvKind::CharToInt,
        (Type::Char, Type::Float) => ConvKind::CharToFloat,
        (Type::Int, Type::Float) => ConvKind::IntToFloat,
        _ => return,
    };
    region.push(StructuredOp::Apply(convert_op(kind)));
}

fn conversion_kind(from: &Type, to: &Type) -> Option<ConvKind> {
    match (from, to) {
        (Type::Int, Type::Float) => Some(ConvKind::IntToFloat),
        (Type::Float, Type::Int) => Some(ConvKind::FloatToInt),
        (Type::Char, Type::Int) => Some(ConvKind::CharToInt),
        (Type::Char, Type::Float) => Some(ConvKind::CharToFloat),
        (Type::Int, Type::Char) => Some(ConvKind::IntToChar),
        (Type::Float, Type::Char) => Some(ConvKind::FloatToChar),
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Structured dialect → bytecode
// ----------------------------------------------------------------------

struct LoopFrame {
    cond_start: u32,
    break_patches: Vec<usize>,
}

struct Flattener {
    ops: Vec<Op>,
    pool: ConstantPool,
    loop_stack: Vec<LoopFrame>,
}

impl Flattener {
    fn new() -> Self {
        Flattener {
            ops: Vec::new(),
            pool: ConstantPool::default(),
            loop_stack: Vec::new(),
        }
    }

    fn here(&self) -> u32 {
        self.ops.len() as u32
    }

    fn flatten(&mut self, region: &[StructuredOp]) -> Result<(), String> {
        for sop in region {
            match sop {
                StructuredOp::Push(constant) => {
                    let index = self.pool.intern(constant.clone());
                    self.ops.push(Op::PushConst(index));
                }
                StructuredOp::Load(slot) => self.ops.push(Op::LoadLocal(*slot)),
                StructuredOp::Store(slot) => self.ops.push(Op::StoreLocal(*slot)),
                StructuredOp::Drop => self.ops.push(Op::Pop),
                StructuredOp::Apply(op) => self.ops.push(*op),
                StructuredOp::If {
                    then_region,
                    else_region,
                } => {
                    let to_else = self.ops.len();
                    self.ops.push(Op::JumpIfFalse(u32::MAX));
                    self.flatten(then_region)?;
                    if else_region.is_empty() {
                        let target = self.here();
                        self.ops[to_else] = Op::JumpIfFalse(target);
                    } else {
                        let to_end = self.ops.len();
                        self.ops.push(Op::Jump(u32::MAX));
                        let else_target = self.here();
                        self.ops[to_else] = Op::JumpIfFalse(else_target);
                        self.flatten(else_region)?;
                        let end = self.here();
                        self.ops[to_end] = Op::Jump(end);
                    }
                }
                StructuredOp::Loop {
                    cond_region,
                    body_region,
                } => {
                    let cond_start = self.here();
                    self.flatten(cond_region)?;
                    let to_exit = self.ops.len();
                    self.ops.push(Op::JumpIfFalse(u32::MAX));
                    self.loop_stack.push(LoopFrame {
                        cond_start,
                        break_patches: Vec::new(),
                    });
                    self.flatten(body_region)?;
                    self.ops.push(Op::Jump(cond_start));
                    let exit = self.here();
                    self.ops[to_exit] = Op::JumpIfFalse(exit);
                    let frame = self
                        .loop_stack
                        .pop()
                        .ok_or("internal: loop frame imbalance")?;
                    for patch in frame.break_patches {
                        self.ops[patch] = Op::Jump(exit);
                    }
                }
                StructuredOp::Break => {
                    let patch = self.ops.len();
                    self.ops.push(Op::Jump(u32::MAX));
                    let frame = self
                        .loop_stack
                        .last_mut()
                        .ok_or("internal: 'break' outside loop in structured lowering")?;
                    frame.break_patches.push(patch);
                }
                StructuredOp::Continue => {
                    let frame = self
                        .loop_stack
                        .last()
                        .ok_or("internal: 'continue' outside loop in structured lowering")?;
                    self.ops.push(Op::Jump(frame.cond_start));
                }
                StructuredOp::Return => self.ops.push(Op::Halt),
                StructuredOp::ReturnUnit => {
                    let index = self.pool.intern(Constant::Unit);
                    self.ops.push(Op::PushConst(index));
                    self.ops.push(Op::Halt);
                }
            }
        }
        Ok(())
    }
}

/// Lower a checked unit into the structured dialect.
pub fn lower_structured(
    unit: &CompilationUnit,
    expr_types: &HashMap<NodeId, Type>,
) -> Result<StructuredModule, String> {
    let mut lowerer = StructuredLowerer::new(expr_types);
    let mut region = Vec::new();
    for stmt in &unit.statements {
        lowerer.lower_stmt(stmt, &mut region)?;
    }
    Ok(StructuredModule {
        region,
        local_count: lowerer.next_slot,
    })
}

/// Flatten a structured module into an executable program.
pub fn emit_bytecode(module: &StructuredModule) -> Result<Program, String> {
    let mut flattener = Flattener::new();
    flattener.flatten(&module.region)?;
    // Falling off the end of the program yields unit.
    let unit_index = flattener.pool.intern(Constant::Unit);
    flattener.ops.push(Op::PushConst(unit_index));
    flattener.ops.push(Op::Halt);
    Ok(Program {
        constants: flattener.pool.into_vec(),
        ops: flattener.ops,
        functions: vec![FunctionInfo {
            name: "main".to_string(),
            arity: 0,
            locals: module.local_count,
            entry: 0,
        }],
        entry_function: 0,
    })
}

/// The full mlir target path: AST → structured dialect → bytecode.
pub fn generate(
    unit: &CompilationUnit,
    expr_types: &HashMap<NodeId, Type>,
) -> Result<Program, String> {
    let module = lower_structured(unit, expr_types)?;
    emit_bytecode(&module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticBag;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;
    use oaf_runtime::Vm;
    use oaf_core::value::Value;

    fn structured(source: &str) -> StructuredModule {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        let output = TypeChecker::new(&mut bag).check_unit(&unit);
        assert!(!bag.has_errors(), "{:?}", bag.iter().collect::<Vec<_>>());
        lower_structured(&unit, &output.expr_types).unwrap()
    }

    fn run(source: &str) -> Value {
        let module = structured(source);
        let program = emit_bytecode(&module).unwrap();
        Vm::new().execute(&program).unwrap()
    }

    #[test]
    fn test_regions_nest_instead_of_jumping() {
        let module = structured("flux i = 2; loop i > 0 => { if i == 1 => { i -= 1; } i -= 1; }");
        let has_loop_with_nested_if = module.region.iter().any(|sop| match sop {
            StructuredOp::Loop { body_region, .. } => body_region
                .iter()
                .any(|inner| matches!(inner, StructuredOp::If { .. })),
            _ => false,
        });
        assert!(has_loop_with_nested_if);
    }

    #[test]
    fn test_expression_statement_drops_value() {
        let module = structured("1 + 2;");
        assert!(module.region.contains(&StructuredOp::Drop));
    }

    #[test]
    fn test_simple_arithmetic_runs() {
        assert_eq!(run("return 2 + 3 * 4;"), Value::Int(14));
    }

    #[test]
    fn test_loop_with_continue_runs() {
        let source = "flux sum = 0; flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; continue; } sum += i; i -= 1; } return sum;";
        assert_eq!(run(source), Value::Int(3));
    }

    #[test]
    fn test_break_exits_loop() {
        let source = "flux i = 0; loop true => { i += 1; if i == 4 => break; } return i;";
        assert_eq!(run(source), Value::Int(4));
    }

    #[test]
    fn test_fall_off_end_is_unit() {
        assert_eq!(run("flux x = 1;"), Value::Unit);
    }

    #[test]
    fn test_casts_run() {
        assert_eq!(run("float f = 1.25; int i = (int)f; int j = (int)-1.5; return i + j;"), Value::Int(0));
    }
}
