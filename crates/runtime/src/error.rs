//! Runtime error taxonomy
//!
//! One variant per failure class the VM can hit. These are not diagnostics:
//! they terminate execution and reach the driver's caller as a distinct
//! error category (exit code 2 at the CLI).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("invalid conversion: {0}")]
    InvalidConversion(String),

    /// A malformed program: bad constant index, bad jump target, operand
    /// stack underflow, or an operand of the wrong type for an opcode.
    /// The compiler never produces these; they guard against corrupt or
    /// hand-assembled bytecode.
    #[error("malformed program: {0}")]
    MalformedProgram(String),
}

impl RuntimeError {
    pub fn type_mismatch(op: &str, found: &str) -> Self {
        RuntimeError::MalformedProgram(format!("'{}' applied to {} operand", op, found))
    }
}
