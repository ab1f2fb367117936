//! AST → IR lowering
//!
//! Lowers the statement sequence into a single entry function. Control flow
//! becomes conditional/unconditional jumps between blocks; literals become
//! constants; implicit widenings become explicit `Convert` instructions so
//! the IR (and everything after it) is fully typed.
//!
//! Only type-correct units reach this phase — the driver halts earlier on
//! any error diagnostic — so constructs the checker always rejects (calls,
//! member access, reserved operators, user-typed values) surface here as an
//! internal error rather than a panic.

use crate::ast::{
    BinaryOp, CompilationUnit, Expr, ExprKind, NodeId, Stmt, StmtKind, UnaryOp,
};
use crate::ir::{
    Block, BlockId, ConvKind, Instr, IrBinOp, IrConst, IrFunction, IrModule, IrUnOp, Temp,
    Terminator,
};
use crate::symbols::Type;
use crate::typechecker::numeric_supertype;
use std::collections::HashMap;

struct BlockBuilder {
    instructions: Vec<Instr>,
    terminator: Option<Terminator>,
}

pub struct Lowerer<'a> {
    expr_types: &'a HashMap<NodeId, Type>,
    blocks: Vec<BlockBuilder>,
    current: BlockId,
    next_temp: Temp,
    // name -> (slot, static type); one map per live scope.
    scopes: Vec<HashMap<String, (u32, Type)>>,
    next_slot: u32,
    // (continue target, break target) per enclosing loop.
    loop_stack: Vec<(BlockId, BlockId)>,
}

impl<'a> Lowerer<'a> {
    pub fn new(expr_types: &'a HashMap<NodeId, Type>) -> Self {
        Lowerer {
            expr_types,
            blocks: vec![BlockBuilder {
                instructions: Vec::new(),
                terminator: None,
            }],
            current: 0,
            next_temp: 0,
            scopes: vec![HashMap::new()],
            next_slot: 0,
            loop_stack: Vec::new(),
        }
    }

    pub fn lower_unit(mut self, unit: &CompilationUnit) -> Result<IrModule, String> {
        for stmt in &unit.statements {
            self.lower_stmt(stmt)?;
        }
        self.terminate(Terminator::Return(None));
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(label, builder)| Block {
                label: label as BlockId,
                instructions: builder.instructions,
                terminator: builder.terminator.unwrap_or(Terminator::Return(None)),
            })
            .collect();
        Ok(IrModule {
            entry: IrFunction {
                name: "main".to_string(),
                blocks,
                temp_count: self.next_temp,
                local_count: self.next_slot,
            },
        })
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn fresh_temp(&mut self) -> Temp {
        let temp = self.next_temp;
        self.next_temp += 1;
        temp
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(BlockBuilder {
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    fn emit(&mut self, instr: Instr) {
        let block = &mut self.blocks[self.current as usize];
        // Statements after a break/continue/return in the same block are
        // unreachable; emitting them would corrupt the terminator.
        if block.terminator.is_none() {
            block.instructions.push(instr);
        }
    }

    /// Set the current block's terminator unless it already has one.
    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current as usize];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn expr_type(&self, expr: &Expr) -> Result<Type, String> {
        self.expr_types
            .get(&expr.id)
            .cloned()
            .ok_or_else(|| format!("internal: no type recorded for node {}", expr.id))
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    fn declare_slot(&mut self, name: &str, ty: Type) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), (slot, ty));
        }
        slot
    }

    fn lookup_slot(&self, name: &str) -> Result<(u32, Type), String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|(slot, ty)| (*slot, ty.clone()))
            .ok_or_else(|| format!("internal: unresolved variable '{}'", name))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_block(&mut self, body: &[Stmt]) -> Result<(), String> {
        self.scopes.push(HashMap::new());
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), String> {
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
                let value = self.lower_expr(initializer)?;
                let value = self.coerce(value, &init_ty, &var_ty);
                let slot = self.declare_slot(name, var_ty);
                self.emit(Instr::StoreVar { slot, src: value });
            }
            StmtKind::Assignment { name, op, value } => {
                let value_ty = self.expr_type(value)?;
                match op.binary_op() {
                    None => {
                        // May be the declaring assignment.
                        let (slot, var_ty) = match self.lookup_slot(name) {
                            Ok(found) => found,
                            Err(_) => {
                                let slot = self.declare_slot(name, value_ty.clone());
                                (slot, value_ty.clone())
                            }
                        };
                        let temp = self.lower_expr(value)?;
                        let temp = self.coerce(temp, &value_ty, &var_ty);
                        self.emit(Instr::StoreVar { slot, src: temp });
                    }
                    Some(binary) => {
                        let (slot, var_ty) = self.lookup_slot(name)?;
                        let current = self.fresh_temp();
                        self.emit(Instr::LoadVar {
                            dest: current,
                            slot,
                        });
                        let rhs = self.lower_expr(value)?;
                        let result_ty = numeric_supertype(&var_ty, &value_ty);
                        let lhs = self.coerce(current, &var_ty, &result_ty);
                        let rhs = self.coerce(rhs, &value_ty, &result_ty);
                        let dest = self.fresh_temp();
                        let op = select_binary_op(binary, &result_ty)?;
                        self.emit(Instr::Binary { dest, op, lhs, rhs });
                        self.emit(Instr::StoreVar { slot, src: dest });
                    }
                }
            }
            StmtKind::If {
                condition,
                body,
                else_body,
            } => {
                let cond = self.lower_expr(condition)?;
                let then_block = self.new_block();
                let join_block = self.new_block();
                let else_target = match else_body {
                    Some(_) => self.new_block(),
                    None => join_block,
                };
                self.terminate(Terminator::Branch {
                    cond,
                    then_target: then_block,
                    else_target,
                });
                self.switch_to(then_block);
                self.lower_block(body)?;
                self.terminate(Terminator::Jump(join_block));
                if let Some(else_body) = else_body {
                    self.switch_to(else_target);
                    self.lower_block(else_body)?;
                    self.terminate(Terminator::Jump(join_block));
                }
                self.switch_to(join_block);
            }
            StmtKind::Loop { condition, body } => {
                let cond_block = self.new_block();
                let body_block = self.new_block();
                let exit_block = self.new_block();
                self.terminate(Terminator::Jump(cond_block));
                self.switch_to(cond_block);
                let cond = self.lower_expr(condition)?;
                self.terminate(Terminator::Branch {
                    cond,
                    then_target: body_block,
                    else_target: exit_block,
                });
                self.switch_to(body_block);
                self.loop_stack.push((cond_block, exit_block));
                self.lower_block(body)?;
                self.loop_stack.pop();
                self.terminate(Terminator::Jump(cond_block));
                self.switch_to(exit_block);
            }
            StmtKind::Break => {
                let (_, exit_block) = *self
                    .loop_stack
                    .last()
                    .ok_or("internal: 'break' survived type checking outside a loop")?;
                self.terminate(Terminator::Jump(exit_block));
                // Anything that follows in this body is unreachable; give it
                // a fresh block so emission stays well-formed.
                let dead = self.new_block();
                self.switch_to(dead);
            }
            StmtKind::Continue => {
                let (cond_block, _) = *self
                    .loop_stack
                    .last()
                    .ok_or("internal: 'continue' survived type checking outside a loop")?;
                self.terminate(Terminator::Jump(cond_block));
                let dead = self.new_block();
                self.switch_to(dead);
            }
            StmtKind::Return { value } => {
                let result = match value {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                self.terminate(Terminator::Return(result));
                let dead = self.new_block();
                self.switch_to(dead);
            }
            StmtKind::Expression(expr) => {
                // The value is unused; dead-temporary elimination cleans up
                // whatever is pure.
                self.lower_expr(expr)?;
            }
            StmtKind::TypeDecl(_) => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Insert the widening conversion from `from` to `to`, if any.
    fn coerce(&mut self, temp: Temp, from: &Type, to: &Type) -> Temp {
        let kind = match (from, to) {
            (Type::Char, Type::Int) => ConvKind::CharToInt,
            (Type::Char, Type::Float) => ConvKind::CharToFloat,
            (Type::Int, Type::Float) => ConvKind::IntToFloat,
            _ => return temp,
        };
        let dest = self.fresh_temp();
        self.emit(Instr::Convert {
            dest,
            kind,
            src: temp,
        });
        dest
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Temp, String> {
        match &expr.kind {
            ExprKind::IntLiteral(value) => Ok(self.emit_const(IrConst::Int(*value))),
            ExprKind::FloatLiteral(value) => Ok(self.emit_const(IrConst::Float(*value))),
            ExprKind::BoolLiteral(value) => Ok(self.emit_const(IrConst::Bool(*value))),
            ExprKind::StringLiteral(value) => {
                Ok(self.emit_const(IrConst::Str(value.clone())))
            }
            ExprKind::CharLiteral(value) => Ok(self.emit_const(IrConst::Char(*value))),
            ExprKind::Name(name) => {
                let (slot, _) = self.lookup_slot(name)?;
                let dest = self.fresh_temp();
                self.emit(Instr::LoadVar { dest, slot });
                Ok(dest)
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.expr_type(operand)?;
                let src = self.lower_expr(operand)?;
                match op {
                    UnaryOp::Neg => {
                        let result_ty = self.expr_type(expr)?;
                        let src = self.coerce(src, &operand_ty, &result_ty);
                        let ir_op = if result_ty == Type::Float {
                            IrUnOp::NegF
                        } else {
                            IrUnOp::NegI
                        };
                        Ok(self.emit_unary(ir_op, src))
                    }
                    UnaryOp::Not => Ok(self.emit_unary(IrUnOp::Not, src)),
                    UnaryOp::BitNot => {
                        let src = self.coerce(src, &operand_ty, &Type::Int);
                        Ok(self.emit_unary(IrUnOp::BitNot, src))
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.expr_type(lhs)?;
                let rhs_ty = self.expr_type(rhs)?;
                let lhs_temp = self.lower_expr(lhs)?;
                let rhs_temp = self.lower_expr(rhs)?;
                match op {
                    BinaryOp::And => Ok(self.emit_binary(IrBinOp::AndB, lhs_temp, rhs_temp)),
                    BinaryOp::Or => Ok(self.emit_binary(IrBinOp::OrB, lhs_temp, rhs_temp)),
                    BinaryOp::Eq | BinaryOp::Ne if lhs_ty == Type::Bool => {
                        let ir_op = if *op == BinaryOp::Eq {
                            IrBinOp::EqB
                        } else {
                            IrBinOp::NeB
                        };
                        Ok(self.emit_binary(ir_op, lhs_temp, rhs_temp))
                    }
                    BinaryOp::BitAnd
                    | BinaryOp::BitOr
                    | BinaryOp::BitXor
                    | BinaryOp::Shl
                    | BinaryOp::Shr
                    | BinaryOp::ShlU
                    | BinaryOp::ShrU => {
                        let lhs_temp = self.coerce(lhs_temp, &lhs_ty, &Type::Int);
                        let rhs_temp = self.coerce(rhs_temp, &rhs_ty, &Type::Int);
                        let ir_op = select_binary_op(*op, &Type::Int)?;
                        Ok(self.emit_binary(ir_op, lhs_temp, rhs_temp))
                    }
                    _ => {
                        // Arithmetic and numeric comparison: promote both
                        // sides to the common supertype first.
                        let common = numeric_supertype(&lhs_ty, &rhs_ty);
                        let lhs_temp = self.coerce(lhs_temp, &lhs_ty, &common);
                        let rhs_temp = self.coerce(rhs_temp, &rhs_ty, &common);
                        let ir_op = select_binary_op(*op, &common)?;
                        Ok(self.emit_binary(ir_op, lhs_temp, rhs_temp))
                    }
                }
            }
            ExprKind::Cast { operand, .. } => {
                let from = self.expr_type(operand)?;
                let to = self.expr_type(expr)?;
                let src = self.lower_expr(operand)?;
                Ok(self.convert(src, &from, &to))
            }
            ExprKind::Call { .. } | ExprKind::Member { .. } => {
                Err("internal: unlowerable expression survived type checking".to_string())
            }
        }
    }

    fn emit_const(&mut self, value: IrConst) -> Temp {
        let dest = self.fresh_temp();
        self.emit(Instr::Const { dest, value });
        dest
    }

    fn emit_unary(&mut self, op: IrUnOp, src: Temp) -> Temp {
        let dest = self.fresh_temp();
        self.emit(Instr::Unary { dest, op, src });
        dest
    }

    fn emit_binary(&mut self, op: IrBinOp, lhs: Temp, rhs: Temp) -> Temp {
        let dest = self.fresh_temp();
        self.emit(Instr::Binary { dest, op, lhs, rhs });
        dest
    }

    /// Explicit cast conversion covering the full numeric matrix.
    fn convert(&mut self, src: Temp, from: &Type, to: &Type) -> Temp {
        let kind = match (from, to) {
            (Type::Int, Type::Float) => ConvKind::IntToFloat,
            (Type::Float, Type::Int) => ConvKind::FloatToInt,
            (Type::Char, Type::Int) => ConvKind::CharToInt,
            (Type::Char, Type::Float) => ConvKind::CharToFloat,
            (Type::Int, Type::Char) => ConvKind::IntToChar,
            (Type::Float, Type::Char) => ConvKind::FloatToChar,
            // Identity casts: int→int, float→float, char→char.
            _ => return src,
        };
        let dest = self.fresh_temp();
        self.emit(Instr::Convert {
            dest,
            kind,
            src,
        });
        dest
    }
}

/// Pick the typed IR operation for a source-level binary operator. Shared
/// with the structured (mlir) lowering so both targets agree on semantics.
pub(crate) fn select_binary_op(op: BinaryOp, operand_ty: &Type) -> Result<IrBinOp, String> {
    let is_float = *operand_ty == Type::Float;
    let selected = match op {
        BinaryOp::Add => {
            if is_float {
                IrBinOp::AddF
            } else {
                IrBinOp::AddI
            }
        }
        BinaryOp::Sub => {
            if is_float {
                IrBinOp::SubF
            } else {
                IrBinOp::SubI
            }
        }
        BinaryOp::Mul => {
            if is_float {
                IrBinOp::MulF
            } else {
                IrBinOp::MulI
            }
        }
        BinaryOp::Div => {
            if is_float {
                IrBinOp::DivF
            } else {
                IrBinOp::DivI
            }
        }
        BinaryOp::Mod => IrBinOp::ModI,
        BinaryOp::BitAnd => IrBinOp::BitAnd,
        BinaryOp::BitOr => IrBinOp::BitOr,
        BinaryOp::BitXor => IrBinOp::BitXor,
        BinaryOp::Shl => IrBinOp::Shl,
        BinaryOp::Shr => IrBinOp::Shr,
        BinaryOp::ShlU => IrBinOp::ShlU,
        BinaryOp::ShrU => IrBinOp::ShrU,
        BinaryOp::Eq => {
            if is_float {
                IrBinOp::EqF
            } else {
                IrBinOp::EqI
            }
        }
        BinaryOp::Ne => {
            if is_float {
                IrBinOp::NeF
            } else {
                IrBinOp::NeI
            }
        }
        BinaryOp::Lt => {
            if is_float {
                IrBinOp::LtF
            } else {
                IrBinOp::LtI
            }
        }
        BinaryOp::Le => {
            if is_float {
                IrBinOp::LeF
            } else {
                IrBinOp::LeI
            }
        }
        BinaryOp::Gt => {
            if is_float {
                IrBinOp::GtF
            } else {
                IrBinOp::GtI
            }
        }
        BinaryOp::Ge => {
            if is_float {
                IrBinOp::GeF
            } else {
                IrBinOp::GeI
            }
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Nor | BinaryOp::Nand | BinaryOp::Xand => {
            return Err(format!(
                "internal: operator '{}' has no direct IR lowering",
                op.spelling()
            ));
        }
    };
    Ok(selected)
}

/// Lower a checked compilation unit into an IR module.
pub fn lower_unit(
    unit: &CompilationUnit,
    expr_types: &HashMap<NodeId, Type>,
) -> Result<IrModule, String> {
    Lowerer::new(expr_types).lower_unit(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticBag;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> IrModule {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        let output = TypeChecker::new(&mut bag).check_unit(&unit);
        assert!(!bag.has_errors(), "{:?}", bag.iter().collect::<Vec<_>>());
        lower_unit(&unit, &output.expr_types).unwrap()
    }

    fn all_instrs(module: &IrModule) -> Vec<&Instr> {
        module
            .entry
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .collect()
    }

    #[test]
    fn test_literal_becomes_constant() {
        let module = lower("flux x = 42;");
        let instrs = all_instrs(&module);
        assert!(matches!(
            instrs[0],
            Instr::Const {
                value: IrConst::Int(42),
                ..
            }
        ));
        assert!(matches!(instrs[1], Instr::StoreVar { slot: 0, .. }));
    }

    #[test]
    fn test_temps_are_single_assignment() {
        let module = lower("flux x = 1 + 2; flux y = x * 3;");
        let mut seen = std::collections::HashSet::new();
        for instr in all_instrs(&module) {
            if let Some(dest) = instr.dest() {
                assert!(seen.insert(dest), "temp %t{} defined twice", dest);
            }
        }
    }

    #[test]
    fn test_widening_inserts_convert() {
        let module = lower("flux f = 1.5 + 2;");
        let has_conversion = all_instrs(&module).iter().any(|i| {
            matches!(
                i,
                Instr::Convert {
                    kind: ConvKind::IntToFloat,
                    ..
                }
            )
        });
        assert!(has_conversion);
    }

    #[test]
    fn test_loop_produces_branch_blocks() {
        let module = lower("flux i = 3; loop i > 0 => i -= 1;");
        assert!(module.entry.blocks.len() >= 4);
        let has_branch = module
            .entry
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Terminator::Branch { .. }));
        assert!(has_branch);
    }

    #[test]
    fn test_break_jumps_to_exit() {
        let module = lower("flux i = 3; loop i > 0 => { break; }");
        // The body block must end in an unconditional jump that is not the
        // loop backedge target of `continue` (the condition block).
        let jumps: Vec<_> = module
            .entry
            .blocks
            .iter()
            .filter_map(|b| match b.terminator {
                Terminator::Jump(t) => Some(t),
                _ => None,
            })
            .collect();
        assert!(jumps.len() >= 2);
    }

    #[test]
    fn test_return_value_threads_through() {
        let module = lower("return 1 + 2;");
        let has_return_value = module
            .entry
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Terminator::Return(Some(_))));
        assert!(has_return_value);
    }

    #[test]
    fn test_temp_numbering_is_stable() {
        let first = lower("flux x = 1 + 2 * 3; return x;");
        let second = lower("flux x = 1 + 2 * 3; return x;");
        assert_eq!(first, second);
    }

    #[test]
    fn test_shadowed_variables_get_distinct_slots() {
        let module = lower("flux x = 1; if true => { flux x = 2; x += 1; } x += 5;");
        assert_eq!(module.entry.local_count, 2);
    }
}
