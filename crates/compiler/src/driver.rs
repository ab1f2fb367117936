//! Compilation driver
//!
//! Orchestrates the phases — lex/parse, type check, ownership analysis, IR
//! lowering, optimization, bytecode generation — threading one shared
//! diagnostic bag through all of them. The pipeline halts before IR
//! lowering as soon as any Error-severity diagnostic exists; the result
//! then carries whatever artifacts the completed phases produced.
//!
//! Two targets are exposed and must agree observably: `bytecode` (the
//! block-IR path) and `mlir` (the structured lowering, which in this
//! release also emits bytecode for execution).

use crate::ast::CompilationUnit;
use crate::cache::{CompilationCache, global_cache};
use crate::codegen;
use crate::diagnostics::{Diagnostic, DiagnosticBag, TYPE_ERROR};
use crate::ir::IrModule;
use crate::lowering::lower_unit;
use crate::mlir;
use crate::optimizer::optimize;
use crate::ownership::OwnershipAnalyzer;
use crate::parser::parse_source;
use crate::symbols::SymbolTable;
use crate::typechecker::TypeChecker;
use oaf_core::bytecode::Program;
use oaf_core::value::Value;
use oaf_runtime::{RuntimeError, Vm};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilationTarget {
    Bytecode,
    Mlir,
}

impl CompilationTarget {
    pub fn name(self) -> &'static str {
        match self {
            CompilationTarget::Bytecode => "bytecode",
            CompilationTarget::Mlir => "mlir",
        }
    }
}

impl fmt::Display for CompilationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CompilationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytecode" => Ok(CompilationTarget::Bytecode),
            "mlir" => Ok(CompilationTarget::Mlir),
            other => Err(format!(
                "unknown compilation target '{}' (expected 'bytecode' or 'mlir')",
                other
            )),
        }
    }
}

/// Everything a compilation produced. Later-phase artifacts are `None`
/// when an earlier phase reported errors.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub target: CompilationTarget,
    pub unit: Option<CompilationUnit>,
    pub symbols: Option<SymbolTable>,
    pub ir: Option<IrModule>,
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
    /// True iff no Error-severity diagnostic was reported.
    pub success: bool,
}

/// Run the full pipeline without consulting any cache.
pub fn compile_uncached(source: &str, target: CompilationTarget) -> CompilationResult {
    let mut bag = DiagnosticBag::new();

    let unit = parse_source(source, &mut bag);
    let output = TypeChecker::new(&mut bag).check_unit(&unit);
    OwnershipAnalyzer::new(&mut bag).analyze_unit(&unit);

    if bag.has_errors() {
        debug!(compilation_target = %target, diagnostics = bag.len(), "halting before lowering");
        return CompilationResult {
            target,
            unit: Some(unit),
            symbols: Some(output.symbols),
            ir: None,
            program: None,
            success: false,
            diagnostics: bag.into_vec(),
        };
    }

    let mut ir = match lower_unit(&unit, &output.expr_types) {
        Ok(module) => module,
        Err(message) => return internal_failure(target, unit, output.symbols, bag, message),
    };
    optimize(&mut ir);

    let generated = match target {
        CompilationTarget::Bytecode => codegen::generate(&ir),
        CompilationTarget::Mlir => mlir::generate(&unit, &output.expr_types),
    };
    let program = match generated {
        Ok(program) => program,
        Err(message) => return internal_failure(target, unit, output.symbols, bag, message),
    };

    debug!(
        compilation_target = %target,
        ops = program.ops.len(),
        constants = program.constants.len(),
        "compilation finished"
    );
    CompilationResult {
        target,
        unit: Some(unit),
        symbols: Some(output.symbols),
        ir: Some(ir),
        program: Some(program),
        success: !bag.has_errors(),
        diagnostics: bag.into_vec(),
    }
}

/// A back-end phase failed to produce its artifact. This cannot happen for
/// units the front end accepted; it is reported rather than panicking so a
/// compiler bug degrades into a failed compilation.
fn internal_failure(
    target: CompilationTarget,
    unit: CompilationUnit,
    symbols: SymbolTable,
    mut bag: DiagnosticBag,
    message: String,
) -> CompilationResult {
    bag.report_error(TYPE_ERROR, message, 1, 1, 1);
    CompilationResult {
        target,
        unit: Some(unit),
        symbols: Some(symbols),
        ir: None,
        program: None,
        success: false,
        diagnostics: bag.into_vec(),
    }
}

/// How a `run` request can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// The program did not compile; diagnostics in insertion order.
    Compile(Vec<Diagnostic>),
    /// The program compiled but execution raised a runtime error.
    Runtime(RuntimeError),
}

/// The compilation driver. Cheap to construct; all drivers in a process
/// share the global LRU cache unless one is injected.
pub struct Driver {
    cache: Option<Arc<CompilationCache>>,
}

impl Driver {
    pub fn new() -> Self {
        Driver { cache: None }
    }

    /// Use a dedicated cache instead of the process-wide one.
    pub fn with_cache(cache: Arc<CompilationCache>) -> Self {
        Driver { cache: Some(cache) }
    }

    fn cache(&self) -> &CompilationCache {
        match &self.cache {
            Some(cache) => cache,
            None => global_cache(),
        }
    }

    /// Compile through the cache: memoized by source fingerprint + target.
    pub fn compile(&self, source: &str, target: CompilationTarget) -> Arc<CompilationResult> {
        let key = CompilationCache::fingerprint(source, target.name());
        self.cache()
            .get_or_build(&key, || compile_uncached(source, target))
    }

    /// Compile and execute, returning the program's terminal value.
    pub fn run(&self, source: &str, target: CompilationTarget) -> Result<Value, RunError> {
        let result = self.compile(source, target);
        let Some(program) = result.program.as_ref().filter(|_| result.success) else {
            return Err(RunError::Compile(result.diagnostics.clone()));
        };
        Vm::new().execute(program).map_err(RunError::Runtime)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::OWNERSHIP_ERROR;

    fn run_bytecode(source: &str) -> Result<Value, RunError> {
        Driver::new().run(source, CompilationTarget::Bytecode)
    }

    #[test]
    fn test_loop_scenario_returns_three() {
        let source = "flux sum = 0; flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; continue; } sum += i; i -= 1; } return sum;";
        assert_eq!(run_bytecode(source), Ok(Value::Int(3)));
    }

    #[test]
    fn test_cast_scenario_returns_zero() {
        let source = "float f = 1.25; int i = (int)f; int j = (int)-1.5; return i + j;";
        assert_eq!(run_bytecode(source), Ok(Value::Int(0)));
    }

    #[test]
    fn test_immutable_compound_assignment_fails_compile() {
        let result = run_bytecode("count = 1; count += 2;");
        match result {
            Err(RunError::Compile(diagnostics)) => {
                assert!(diagnostics.iter().any(|d| d.code == OWNERSHIP_ERROR));
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_is_distinct_category() {
        let result = run_bytecode("flux d = 0; return 1 / d;");
        assert_eq!(result, Err(RunError::Runtime(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn test_halts_before_lowering_on_error() {
        let result = compile_uncached("break;", CompilationTarget::Bytecode);
        assert!(!result.success);
        assert!(result.ir.is_none());
        assert!(result.program.is_none());
        // Front-end artifacts are still available.
        assert!(result.unit.is_some());
        assert!(result.symbols.is_some());
    }

    #[test]
    fn test_diagnostics_are_deterministic() {
        let source = "float f = 1.25; int i = f; break; @";
        let first = compile_uncached(source, CompilationTarget::Bytecode);
        let second = compile_uncached(source, CompilationTarget::Bytecode);
        assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[test]
    fn test_target_parity_on_programs() {
        let programs = [
            "return 2 + 3 * 4;",
            "flux sum = 0; flux i = 10; loop i > 0 => { sum += i * i; i -= 1; } return sum;",
            "flux i = 0; loop true => { i += 1; if i == 7 => break; } return i;",
            "float f = 1.25; int i = (int)f; int j = (int)-1.5; return i + j;",
            "flux acc = 0; flux i = 0; loop i < 20 => { acc += i ^ (i << 1); i += 1; } return acc;",
            "char c = 'a'; return c + 1;",
            "flux x = 1;",
            "return (5 > 3) && !(2 == 2) || true;",
        ];
        let driver = Driver::new();
        for source in programs {
            let bytecode = driver.run(source, CompilationTarget::Bytecode);
            let mlir = driver.run(source, CompilationTarget::Mlir);
            assert_eq!(bytecode, mlir, "target mismatch for: {}", source);
        }
    }

    #[test]
    fn test_target_parity_on_runtime_errors() {
        let source = "flux d = 0; return 7 % d;";
        let driver = Driver::new();
        let bytecode = driver.run(source, CompilationTarget::Bytecode);
        let mlir = driver.run(source, CompilationTarget::Mlir);
        assert_eq!(bytecode, Err(RunError::Runtime(RuntimeError::ModuloByZero)));
        assert_eq!(bytecode, mlir);
    }

    #[test]
    fn test_optimization_soundness() {
        let sources = [
            "return 2 + 3 * 4;",
            "flux x = 6; return x * (1 + 1);",
            "1 + 2; return 7;",
            "return (int)2.75 + 1;",
        ];
        for source in sources {
            let mut bag = DiagnosticBag::new();
            let unit = parse_source(source, &mut bag);
            let output = TypeChecker::new(&mut bag).check_unit(&unit);
            assert!(!bag.has_errors());
            let unoptimized = lower_unit(&unit, &output.expr_types).unwrap();
            let mut optimized = unoptimized.clone();
            optimize(&mut optimized);
            let raw = Vm::new()
                .execute(&codegen::generate(&unoptimized).unwrap())
                .unwrap();
            let opt = Vm::new()
                .execute(&codegen::generate(&optimized).unwrap())
                .unwrap();
            assert_eq!(raw, opt, "optimization changed behavior for: {}", source);
        }
    }
}
