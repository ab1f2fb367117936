//! Oaf Compiler Library
//!
//! Front-to-back pipeline from Oaf source text to executable bytecode:
//! lexing, parsing, type checking, ownership analysis, IR lowering with
//! optimization, and bytecode generation, plus the driver that threads a
//! shared diagnostic bag through every phase and memoizes results in a
//! bounded LRU cache.
//!
//! Two compilation targets are exposed — `bytecode` and `mlir` — with a
//! contractual guarantee: identical observable results for every accepted
//! program.
//!
//! ```rust
//! use oafc::{CompilationTarget, Driver};
//!
//! let driver = Driver::new();
//! let value = driver
//!     .run("flux x = 20; return x * 2 + 2;", CompilationTarget::Bytecode)
//!     .unwrap();
//! assert_eq!(value.to_string(), "42");
//! ```

pub mod ast;
pub mod bench;
pub mod cache;
pub mod codegen;
pub mod diagnostics;
pub mod driver;
pub mod ir;
pub mod lexer;
pub mod lowering;
pub mod mlir;
pub mod optimizer;
pub mod ownership;
pub mod parser;
pub mod selftest;
pub mod symbols;
pub mod typechecker;

pub use cache::{CompilationCache, global_cache};
pub use diagnostics::{Diagnostic, DiagnosticBag, Severity};
pub use driver::{CompilationResult, CompilationTarget, Driver, RunError, compile_uncached};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
pub use symbols::{SymbolTable, Type, VariableSymbol};
pub use typechecker::TypeChecker;
