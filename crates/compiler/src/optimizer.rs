//! IR optimization passes
//!
//! Two passes, always in this order:
//!
//! 1. constant folding — any instruction whose operands are all known
//!    constants is replaced with its evaluated constant, under the
//!    language's numeric semantics (wrapping 64-bit two's complement for
//!    int, IEEE 754 double for float). Integer division/modulo by a
//!    constant zero is left unfolded so the error surfaces at runtime.
//! 2. dead-temporary elimination — instructions whose result is never
//!    referenced and whose operation has no observable effect are removed.
//!
//! Both passes are idempotent and preserve observable behavior: terminal
//! value, runtime-error set, and the order of side-effecting operations.

use crate::ir::{ConvKind, Instr, IrBinOp, IrConst, IrFunction, IrModule, IrUnOp, Temp};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Run the fixed pass pipeline over a module.
pub fn optimize(module: &mut IrModule) {
    constant_fold(&mut module.entry);
    eliminate_dead_temps(&mut module.entry);
}

/// Shift counts follow the VM: only the low 6 bits are consulted.
fn shift_amount(n: i64) -> u32 {
    (n & 63) as u32
}

fn fold_unary(op: IrUnOp, operand: &IrConst) -> Option<IrConst> {
    match (op, operand) {
        (IrUnOp::NegI, IrConst::Int(n)) => Some(IrConst::Int(n.wrapping_neg())),
        (IrUnOp::NegF, IrConst::Float(x)) => Some(IrConst::Float(-x)),
        (IrUnOp::Not, IrConst::Bool(b)) => Some(IrConst::Bool(!b)),
        (IrUnOp::BitNot, IrConst::Int(n)) => Some(IrConst::Int(!n)),
        _ => None,
    }
}

fn fold_binary(op: IrBinOp, lhs: &IrConst, rhs: &IrConst) -> Option<IrConst> {
    use IrBinOp::*;
    match (lhs, rhs) {
        (IrConst::Int(a), IrConst::Int(b)) => {
            let (a, b) = (*a, *b);
            let folded = match op {
                AddI => IrConst::Int(a.wrapping_add(b)),
                SubI => IrConst::Int(a.wrapping_sub(b)),
                MulI => IrConst::Int(a.wrapping_mul(b)),
                // Leave division by constant zero for the VM to trap on.
                DivI if b != 0 => IrConst::Int(a.wrapping_div(b)),
                ModI if b != 0 => IrConst::Int(a.wrapping_rem(b)),
                BitAnd => IrConst::Int(a & b),
                BitOr => IrConst::Int(a | b),
                BitXor => IrConst::Int(a ^ b),
                Shl => IrConst::Int(a.wrapping_shl(shift_amount(b))),
                Shr => IrConst::Int(a.wrapping_shr(shift_amount(b))),
                ShlU => IrConst::Int(((a as u64) << shift_amount(b)) as i64),
                ShrU => IrConst::Int(((a as u64) >> shift_amount(b)) as i64),
                EqI => IrConst::Bool(a == b),
                NeI => IrConst::Bool(a != b),
                LtI => IrConst::Bool(a < b),
                LeI => IrConst::Bool(a <= b),
                GtI => IrConst::Bool(a > b),
                GeI => IrConst::Bool(a >= b),
                _ => return None,
            };
            Some(folded)
        }
        (IrConst::Float(a), IrConst::Float(b)) => {
            let (a, b) = (*a, *b);
            let folded = match op {
                AddF => IrConst::Float(a + b),
                SubF => IrConst::Float(a - b),
                MulF => IrConst::Float(a * b),
                DivF => IrConst::Float(a / b),
                EqF => IrConst::Bool(a == b),
                NeF => IrConst::Bool(a != b),
                LtF => IrConst::Bool(a < b),
                LeF => IrConst::Bool(a <= b),
                GtF => IrConst::Bool(a > b),
                GeF => IrConst::Bool(a >= b),
                _ => return None,
            };
            Some(folded)
        }
        (IrConst::Bool(a), IrConst::Bool(b)) => {
            let folded = match op {
                EqB => IrConst::Bool(a == b),
                NeB => IrConst::Bool(a != b),
                AndB => IrConst::Bool(*a && *b),
                OrB => IrConst::Bool(*a || *b),
                _ => return None,
            };
            Some(folded)
        }
        _ => None,
    }
}

/// Fold a conversion when (and only when) it cannot trap: folding an
/// invalid conversion away would erase a runtime error.
fn fold_convert(kind: ConvKind, operand: &IrConst) -> Option<IrConst> {
    match (kind, operand) {
        (ConvKind::IntToFloat, IrConst::Int(n)) => Some(IrConst::Float(*n as f64)),
        (ConvKind::CharToInt, IrConst::Char(c)) => Some(IrConst::Int(i64::from(*c as u32))),
        (ConvKind::CharToFloat, IrConst::Char(c)) => Some(IrConst::Float(f64::from(*c as u32))),
        (ConvKind::FloatToInt, IrConst::Float(x)) => {
            // Truncation toward zero; stay clear of the i64 boundary where
            // f64 rounding makes the comparison unreliable.
            if x.is_finite() && x.abs() < 9.0e18 {
                Some(IrConst::Int(x.trunc() as i64))
            } else {
                None
            }
        }
        (ConvKind::IntToChar, IrConst::Int(n)) => u32::try_from(*n)
            .ok()
            .and_then(char::from_u32)
            .map(IrConst::Char),
        (ConvKind::FloatToChar, IrConst::Float(x)) => {
            if x.is_finite() && x.abs() < 9.0e18 {
                u32::try_from(x.trunc() as i64)
                    .ok()
                    .and_then(char::from_u32)
                    .map(IrConst::Char)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Replace instructions whose operands are all constant with the evaluated
/// constant. Temps are single-assignment, so one map over the whole
/// function is sound regardless of block order.
pub fn constant_fold(function: &mut IrFunction) {
    let mut known: HashMap<Temp, IrConst> = HashMap::new();
    let mut folded_count = 0usize;
    for block in &mut function.blocks {
        for instr in &mut block.instructions {
            let replacement = match &*instr {
                Instr::Const { dest, value } => {
                    known.insert(*dest, value.clone());
                    None
                }
                Instr::Unary { dest, op, src } => known
                    .get(src)
                    .and_then(|operand| fold_unary(*op, operand))
                    .map(|value| (*dest, value)),
                Instr::Binary { dest, op, lhs, rhs } => {
                    match (known.get(lhs), known.get(rhs)) {
                        (Some(a), Some(b)) => fold_binary(*op, a, b).map(|value| (*dest, value)),
                        _ => None,
                    }
                }
                Instr::Convert { dest, kind, src } => known
                    .get(src)
                    .and_then(|operand| fold_convert(*kind, operand))
                    .map(|value| (*dest, value)),
                Instr::LoadVar { .. } | Instr::StoreVar { .. } => None,
            };
            if let Some((dest, value)) = replacement {
                known.insert(dest, value.clone());
                *instr = Instr::Const { dest, value };
                folded_count += 1;
            }
        }
    }
    if folded_count > 0 {
        debug!(folded_count, "constant folding replaced instructions");
    }
}

/// Remove instructions whose result temp is never referenced, when the
/// operation is unobservable. Iterates to a fixpoint: removing one dead
/// temp can orphan the temps feeding it.
pub fn eliminate_dead_temps(function: &mut IrFunction) {
    loop {
        let mut used: HashSet<Temp> = HashSet::new();
        for block in &function.blocks {
            for instr in &block.instructions {
                used.extend(instr.operands());
            }
            used.extend(block.terminator.operands());
        }
        let mut removed = 0usize;
        for block in &mut function.blocks {
            let before = block.instructions.len();
            block.instructions.retain(|instr| match instr.dest() {
                Some(dest) => used.contains(&dest) || !instr.removable_when_unused(),
                None => true,
            });
            removed += before - block.instructions.len();
        }
        if removed == 0 {
            break;
        }
        debug!(removed, "dead-temporary elimination removed instructions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticBag;
    use crate::lowering::lower_unit;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> IrModule {
        let mut bag = DiagnosticBag::new();
        let unit = parse_source(source, &mut bag);
        let output = TypeChecker::new(&mut bag).check_unit(&unit);
        assert!(!bag.has_errors(), "{:?}", bag.iter().collect::<Vec<_>>());
        lower_unit(&unit, &output.expr_types).unwrap()
    }

    fn count_instrs(module: &IrModule, predicate: impl Fn(&Instr) -> bool) -> usize {
        module
            .entry
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter(|i| predicate(i))
            .count()
    }

    #[test]
    fn test_arithmetic_folds_to_constant() {
        let mut module = lower("return 2 + 3 * 4;");
        constant_fold(&mut module.entry);
        let has_folded = count_instrs(&module, |i| {
            matches!(
                i,
                Instr::Const {
                    value: IrConst::Int(14),
                    ..
                }
            )
        });
        assert_eq!(has_folded, 1);
        assert_eq!(count_instrs(&module, |i| matches!(i, Instr::Binary { .. })), 0);
    }

    #[test]
    fn test_integer_wrap_on_fold() {
        let mut module = lower(&format!("return {} + 1;", i64::MAX));
        constant_fold(&mut module.entry);
        let wrapped = count_instrs(&module, |i| {
            matches!(
                i,
                Instr::Const {
                    value: IrConst::Int(i64::MIN),
                    ..
                }
            )
        });
        assert_eq!(wrapped, 1);
    }

    #[test]
    fn test_division_by_constant_zero_not_folded() {
        let mut module = lower("return 1 / 0;");
        constant_fold(&mut module.entry);
        assert_eq!(
            count_instrs(&module, |i| matches!(
                i,
                Instr::Binary {
                    op: IrBinOp::DivI,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_float_division_folds_per_ieee() {
        let mut module = lower("return 1.0 / 0.0;");
        constant_fold(&mut module.entry);
        let inf = count_instrs(&module, |i| {
            matches!(i, Instr::Const { value: IrConst::Float(x), .. } if x.is_infinite())
        });
        assert_eq!(inf, 1);
    }

    #[test]
    fn test_dead_temp_removed() {
        let mut module = lower("1 + 2; return 7;");
        constant_fold(&mut module.entry);
        eliminate_dead_temps(&mut module.entry);
        // Only the returned constant survives.
        assert_eq!(count_instrs(&module, |_| true), 1);
    }

    #[test]
    fn test_unused_division_survives_dce() {
        let mut module = lower("flux d = 0; 1 / d; return 7;");
        eliminate_dead_temps(&mut module.entry);
        assert_eq!(
            count_instrs(&module, |i| matches!(
                i,
                Instr::Binary {
                    op: IrBinOp::DivI,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_stores_never_removed() {
        let mut module = lower("flux x = 1;");
        constant_fold(&mut module.entry);
        eliminate_dead_temps(&mut module.entry);
        assert_eq!(
            count_instrs(&module, |i| matches!(i, Instr::StoreVar { .. })),
            1
        );
    }

    #[test]
    fn test_passes_are_idempotent() {
        let mut module = lower("flux x = 2 + 3; 4 * 5; return x * 1;");
        optimize(&mut module);
        let once = module.clone();
        optimize(&mut module);
        assert_eq!(module, once);
    }

    #[test]
    fn test_cast_folding_respects_truncation_toward_zero() {
        let mut module = lower("return (int)-1.5 + (int)1.25;");
        constant_fold(&mut module.entry);
        let folded = count_instrs(&module, |i| {
            matches!(
                i,
                Instr::Const {
                    value: IrConst::Int(0),
                    ..
                }
            )
        });
        assert_eq!(folded, 1);
    }

    #[test]
    fn test_invalid_int_to_char_not_folded() {
        // 0xD800 is a surrogate, not a scalar value; must stay for runtime.
        let mut module = lower("return (char)55296;");
        constant_fold(&mut module.entry);
        assert_eq!(
            count_instrs(&module, |i| matches!(
                i,
                Instr::Convert {
                    kind: ConvKind::IntToChar,
                    ..
                }
            )),
            1
        );
    }
}
