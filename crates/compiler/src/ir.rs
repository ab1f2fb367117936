//! Intermediate representation
//!
//! One entry function of basic blocks. Instructions are three-address
//! operations over immutable temporaries: every temp is defined exactly
//! once, operands are temps, and control flow lives only in block
//! terminators. Variables (which are mutable) are modelled as numbered
//! slots accessed through `LoadVar`/`StoreVar`, keeping the temps pure.

use std::fmt;

/// Single-assignment temporary, numbered in creation order. Numbering is
/// stable across compilations of the same source.
pub type Temp = u32;

/// Index into the function's block list.
pub type BlockId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum IrConst {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Unit,
}

impl fmt::Display for IrConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrConst::Int(n) => write!(f, "int {}", n),
            IrConst::Float(x) => write!(f, "float {}", x),
            IrConst::Bool(b) => write!(f, "bool {}", b),
            IrConst::Char(c) => write!(f, "char {:?}", c),
            IrConst::Str(s) => write!(f, "string {:?}", s),
            IrConst::Unit => write!(f, "unit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrUnOp {
    NegI,
    NegF,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrBinOp {
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    AddF,
    SubF,
    MulF,
    DivF,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    ShlU,
    ShrU,
    EqI,
    NeI,
    LtI,
    LeI,
    GtI,
    GeI,
    EqF,
    NeF,
    LtF,
    LeF,
    GtF,
    GeF,
    EqB,
    NeB,
    AndB,
    OrB,
}

impl IrBinOp {
    /// Division and modulo can trap at runtime; everything else is pure.
    pub fn can_trap(self) -> bool {
        matches!(self, IrBinOp::DivI | IrBinOp::ModI)
    }
}

/// Numeric conversions; the explicit-cast and implicit-widening matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKind {
    IntToFloat,
    FloatToInt,
    CharToInt,
    CharToFloat,
    IntToChar,
    FloatToChar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Const {
        dest: Temp,
        value: IrConst,
    },
    LoadVar {
        dest: Temp,
        slot: u32,
    },
    StoreVar {
        slot: u32,
        src: Temp,
    },
    Unary {
        dest: Temp,
        op: IrUnOp,
        src: Temp,
    },
    Binary {
        dest: Temp,
        op: IrBinOp,
        lhs: Temp,
        rhs: Temp,
    },
    Convert {
        dest: Temp,
        kind: ConvKind,
        src: Temp,
    },
}

impl Instr {
    pub fn dest(&self) -> Option<Temp> {
        match self {
            Instr::Const { dest, .. }
            | Instr::LoadVar { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::Binary { dest, .. }
            | Instr::Convert { dest, .. } => Some(*dest),
            Instr::StoreVar { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<Temp> {
        match self {
            Instr::Const { .. } | Instr::LoadVar { .. } => Vec::new(),
            Instr::StoreVar { src, .. } => vec![*src],
            Instr::Unary { src, .. } => vec![*src],
            Instr::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::Convert { src, .. } => vec![*src],
        }
    }

    /// True when an unused result makes the whole instruction dead:
    /// pure arithmetic, constant loads, variable loads, and casts.
    /// Division/modulo stay (their trap is observable); stores have no
    /// result and never qualify.
    pub fn removable_when_unused(&self) -> bool {
        match self {
            Instr::Const { .. }
            | Instr::LoadVar { .. }
            | Instr::Unary { .. }
            | Instr::Convert { .. } => true,
            Instr::Binary { op, .. } => !op.can_trap(),
            Instr::StoreVar { .. } => false,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Const { dest, value } => write!(f, "%t{} = const {}", dest, value),
            Instr::LoadVar { dest, slot } => write!(f, "%t{} = load v{}", dest, slot),
            Instr::StoreVar { slot, src } => write!(f, "store v{}, %t{}", slot, src),
            Instr::Unary { dest, op, src } => {
                write!(f, "%t{} = {:?} %t{}", dest, op, src)
            }
            Instr::Binary { dest, op, lhs, rhs } => {
                write!(f, "%t{} = {:?} %t{}, %t{}", dest, op, lhs, rhs)
            }
            Instr::Convert { dest, kind, src } => {
                write!(f, "%t{} = {:?} %t{}", dest, kind, src)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Temp,
        then_target: BlockId,
        else_target: BlockId,
    },
    Return(Option<Temp>),
}

impl Terminator {
    pub fn operands(&self) -> Vec<Temp> {
        match self {
            Terminator::Jump(_) => Vec::new(),
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::Return(value) => value.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: BlockId,
    pub instructions: Vec<Instr>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub blocks: Vec<Block>,
    pub temp_count: u32,
    pub local_count: u32,
}

/// An IR module: in this language, always a single entry function lowered
/// from the top-level statement sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct IrModule {
    pub entry: IrFunction,
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = &self.entry;
        writeln!(f, "func @{} (locals: {})", func.name, func.local_count)?;
        for block in &func.blocks {
            writeln!(f, "bb{}:", block.label)?;
            for instr in &block.instructions {
                writeln!(f, "  {}", instr)?;
            }
            match &block.terminator {
                Terminator::Jump(target) => writeln!(f, "  jump bb{}", target)?,
                Terminator::Branch {
                    cond,
                    then_target,
                    else_target,
                } => writeln!(
                    f,
                    "  branch %t{}, bb{}, bb{}",
                    cond, then_target, else_target
                )?,
                Terminator::Return(Some(value)) => writeln!(f, "  return %t{}", value)?,
                Terminator::Return(None) => writeln!(f, "  return")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removable_classification() {
        let pure = Instr::Binary {
            dest: 0,
            op: IrBinOp::AddI,
            lhs: 1,
            rhs: 2,
        };
        let trapping = Instr::Binary {
            dest: 0,
            op: IrBinOp::DivI,
            lhs: 1,
            rhs: 2,
        };
        let store = Instr::StoreVar { slot: 0, src: 1 };
        assert!(pure.removable_when_unused());
        assert!(!trapping.removable_when_unused());
        assert!(!store.removable_when_unused());
    }

    #[test]
    fn test_operand_collection() {
        let instr = Instr::Binary {
            dest: 5,
            op: IrBinOp::MulI,
            lhs: 3,
            rhs: 4,
        };
        assert_eq!(instr.operands(), vec![3, 4]);
        assert_eq!(instr.dest(), Some(5));
        let term = Terminator::Branch {
            cond: 7,
            then_target: 1,
            else_target: 2,
        };
        assert_eq!(term.operands(), vec![7]);
    }
}
