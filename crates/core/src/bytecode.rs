//! Bytecode program model
//!
//! A `Program` is the compiler's final artifact: a deduplicated constant
//! pool, one linear instruction stream with branch targets resolved to
//! absolute offsets, and a function table naming the entry function.
//!
//! Instructions are fixed-format tagged tuples over constant-pool indices,
//! local slots, and absolute jump targets. The arithmetic tier is split by
//! operand type (`AddI` vs `AddF`); the compiler inserts explicit conversion
//! ops wherever the source language widened or cast a value, so the VM never
//! has to guess an operand's type at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pooled constant. Deduplicated by kind and value; floats compare by bit
/// pattern so `0.0` and `-0.0` occupy distinct slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Unit,
}

impl Constant {
    /// Stable dedup key: discriminant plus bit-exact payload.
    pub fn pool_key(&self) -> (u8, u64) {
        match self {
            Constant::Int(n) => (0, *n as u64),
            Constant::Float(x) => (1, x.to_bits()),
            Constant::Bool(b) => (2, u64::from(*b)),
            Constant::Char(c) => (3, u64::from(*c as u32)),
            // Strings hash separately; the pool keeps a side map for them.
            Constant::Str(_) => (4, 0),
            Constant::Unit => (5, 0),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "int {}", n),
            Constant::Float(x) => write!(f, "float {}", x),
            Constant::Bool(b) => write!(f, "bool {}", b),
            Constant::Char(c) => write!(f, "char {:?}", c),
            Constant::Str(s) => write!(f, "string {:?}", s),
            Constant::Unit => write!(f, "unit"),
        }
    }
}

/// One bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Push constant-pool entry `n`.
    PushConst(u32),
    /// Push local slot `n` of the current frame.
    LoadLocal(u32),
    /// Pop into local slot `n` of the current frame.
    StoreLocal(u32),
    /// Discard the top of stack.
    Pop,

    // Integer arithmetic (wrapping, two's complement).
    AddI,
    SubI,
    MulI,
    /// Traps on divisor zero.
    DivI,
    /// Traps on divisor zero.
    ModI,
    NegI,

    // Float arithmetic (IEEE 754).
    AddF,
    SubF,
    MulF,
    DivF,
    NegF,

    // Integer comparison.
    EqI,
    NeI,
    LtI,
    LeI,
    GtI,
    GeI,

    // Float comparison.
    EqF,
    NeF,
    LtF,
    LeF,
    GtF,
    GeF,

    // Boolean ops.
    EqB,
    NeB,
    AndB,
    OrB,
    Not,

    // Bitwise / shifts (integers only). `ShlU`/`ShrU` are the unsigned
    // shifts (`<<<`, `>>>`): the operand is reinterpreted as u64.
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    ShlU,
    ShrU,

    // Numeric conversions, matching the language's cast matrix. The checked
    // ones trap on values with no representation in the target type.
    IntToFloat,
    /// Truncates toward zero; traps on NaN, infinity, or out-of-range.
    FloatToInt,
    CharToInt,
    CharToFloat,
    /// Traps unless the operand is a valid Unicode scalar value.
    IntToChar,
    /// Truncates toward zero, then as `IntToChar`.
    FloatToChar,

    /// Unconditional jump to absolute offset.
    Jump(u32),
    /// Pop a bool; jump to absolute offset when it is false.
    JumpIfFalse(u32),

    /// Call function-table entry `n`; pops its arguments into the new frame.
    Call(u32),
    /// Return to the caller, transferring the top of stack.
    Ret,
    /// Stop execution; the top of stack is the program result.
    Halt,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::PushConst(n) => write!(f, "push.const {}", n),
            Op::LoadLocal(n) => write!(f, "load.local {}", n),
            Op::StoreLocal(n) => write!(f, "store.local {}", n),
            Op::Jump(t) => write!(f, "jump {}", t),
            Op::JumpIfFalse(t) => write!(f, "jump.false {}", t),
            Op::Call(n) => write!(f, "call {}", n),
            // Operand-free ops already read as mnemonics in debug form.
            other => write!(f, "{}", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// Entry in the program's function table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Parameter count; parameters occupy the first local slots.
    pub arity: u32,
    /// Total local slots (parameters included).
    pub locals: u32,
    /// Absolute offset of the function's first instruction.
    pub entry: u32,
}

/// A complete executable program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub constants: Vec<Constant>,
    pub ops: Vec<Op>,
    pub functions: Vec<FunctionInfo>,
    /// Index into `functions` of the entry function.
    pub entry_function: u32,
}

impl Program {
    pub fn entry(&self) -> &FunctionInfo {
        &self.functions[self.entry_function as usize]
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; constants")?;
        for (i, c) in self.constants.iter().enumerate() {
            writeln!(f, ";   [{}] {}", i, c)?;
        }
        for func in &self.functions {
            writeln!(
                f,
                "; function {} (arity {}, locals {})",
                func.name, func.arity, func.locals
            )?;
        }
        for (offset, op) in self.ops.iter().enumerate() {
            writeln!(f, "{:4}  {}", offset, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_distinguishes_kinds() {
        assert_ne!(
            Constant::Int(1).pool_key(),
            Constant::Bool(true).pool_key()
        );
        assert_ne!(
            Constant::Float(0.0).pool_key(),
            Constant::Float(-0.0).pool_key()
        );
    }

    #[test]
    fn test_display_listing() {
        let program = Program {
            constants: vec![Constant::Int(7)],
            ops: vec![Op::PushConst(0), Op::Halt],
            functions: vec![FunctionInfo {
                name: "main".to_string(),
                arity: 0,
                locals: 0,
                entry: 0,
            }],
            entry_function: 0,
        };
        let listing = program.to_string();
        assert!(listing.contains("push.const 0"));
        assert!(listing.contains("halt"));
        assert!(listing.contains("function main"));
    }
}
