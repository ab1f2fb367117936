//! Oaf Runtime: the stack-based bytecode virtual machine
//!
//! Executes a compiled `oaf_core::Program` synchronously on the caller's
//! thread and returns the program's terminal value. Runtime failures
//! (division by zero, invalid conversions, malformed programs) surface as
//! `RuntimeError` values, never as panics.

pub mod error;
pub mod vm;

pub use error::RuntimeError;
pub use vm::Vm;
