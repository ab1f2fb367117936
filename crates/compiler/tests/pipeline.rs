//! End-to-end pipeline tests: source in, observable behavior out.

use oafc::diagnostics::{OWNERSHIP_ERROR, TYPE_ERROR};
use oafc::driver::{CompilationTarget, Driver, RunError, compile_uncached};
use oaf_core::bytecode::Program;
use oaf_core::value::Value;
use oaf_runtime::{RuntimeError, Vm};

fn run(source: &str, target: CompilationTarget) -> Result<Value, RunError> {
    Driver::new().run(source, target)
}

#[test]
fn scenario_compound_assignment_to_immutable_is_own001() {
    let result = compile_uncached("count = 1; count += 2;", CompilationTarget::Bytecode);
    assert!(!result.success);
    let diagnostic = result
        .diagnostics
        .iter()
        .find(|d| d.code == OWNERSHIP_ERROR)
        .expect("expected OWN001");
    // Points at the second statement.
    assert_eq!((diagnostic.line, diagnostic.column), (1, 12));
    assert_eq!(
        diagnostic.to_string(),
        format!("Error OWN001 (1,12): {}", diagnostic.message)
    );
}

#[test]
fn scenario_loop_with_continue_sums_to_three() {
    let source = "flux sum = 0; flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; continue; } sum += i; i -= 1; } return sum;";
    assert_eq!(run(source, CompilationTarget::Bytecode), Ok(Value::Int(3)));
    assert_eq!(run(source, CompilationTarget::Mlir), Ok(Value::Int(3)));
}

#[test]
fn scenario_implicit_float_narrowing_is_typ001() {
    let result = compile_uncached("float f = 1.25; int i = f;", CompilationTarget::Bytecode);
    assert!(!result.success);
    assert!(result.diagnostics.iter().any(|d| d.code == TYPE_ERROR));
}

#[test]
fn scenario_explicit_casts_truncate_toward_zero() {
    let source = "float f = 1.25; int i = (int)f; int j = (int)-1.5; return i + j;";
    assert_eq!(run(source, CompilationTarget::Bytecode), Ok(Value::Int(0)));
}

#[test]
fn scenario_generic_arity_mismatch_is_typ001() {
    let result = compile_uncached(
        "struct Box<T> [T value]; Box value = 1;",
        CompilationTarget::Bytecode,
    );
    assert!(!result.success);
    assert!(result.diagnostics.iter().any(|d| d.code == TYPE_ERROR));
}

#[test]
fn scenario_top_level_break_is_typ001_with_valid_position() {
    let result = compile_uncached("break;", CompilationTarget::Bytecode);
    assert!(!result.success);
    let diagnostic = result
        .diagnostics
        .iter()
        .find(|d| d.code == TYPE_ERROR)
        .expect("expected TYP001");
    assert!(diagnostic.line >= 1);
    assert!(diagnostic.column >= 1);
}

#[test]
fn runtime_errors_match_across_targets() {
    let source = "flux d = 0; return 1 / d;";
    let bytecode = run(source, CompilationTarget::Bytecode);
    let mlir = run(source, CompilationTarget::Mlir);
    assert_eq!(bytecode, Err(RunError::Runtime(RuntimeError::DivisionByZero)));
    assert_eq!(bytecode, mlir);
}

#[test]
fn invalid_conversion_surfaces_at_runtime() {
    // A surrogate code point: the cast survives compilation (the operand is
    // not constant-foldable into a char) and traps in the VM.
    let source = "flux n = 55296; char c = (char)n; return c;";
    match run(source, CompilationTarget::Bytecode) {
        Err(RunError::Runtime(RuntimeError::InvalidConversion(_))) => {}
        other => panic!("expected invalid conversion, got {:?}", other),
    }
}

#[test]
fn string_values_flow_to_terminal_value() {
    let source = "s = \"hello\"; return s;";
    match run(source, CompilationTarget::Bytecode) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "hello"),
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn char_arithmetic_widens_to_int() {
    assert_eq!(
        run("char c = 'a'; return c + 1;", CompilationTarget::Bytecode),
        Ok(Value::Int(98))
    );
}

#[test]
fn unsigned_shift_differs_from_arithmetic_shift() {
    let arithmetic = run("flux x = 0 - 8; return x >> 1;", CompilationTarget::Bytecode);
    let unsigned = run("flux x = 0 - 8; return x >>> 1;", CompilationTarget::Bytecode);
    assert_eq!(arithmetic, Ok(Value::Int(-4)));
    assert_eq!(unsigned, Ok(Value::Int(0x7FFF_FFFF_FFFF_FFFCu64 as i64)));
}

#[test]
fn built_artifact_round_trips_through_bincode() {
    let result = compile_uncached("return 6 * 7;", CompilationTarget::Bytecode);
    assert!(result.success);
    let program = result.program.expect("program");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.oafb");
    std::fs::write(&path, bincode::serialize(&program).unwrap()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let decoded: Program = bincode::deserialize(&bytes).unwrap();
    assert_eq!(Vm::new().execute(&decoded), Ok(Value::Int(42)));
}

#[test]
fn diagnostics_print_in_insertion_order_without_dedup() {
    let source = "@ @";
    let result = compile_uncached(source, CompilationTarget::Bytecode);
    let lexical: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.code == "LEX001")
        .collect();
    // Two identical messages, both kept, ordered by column.
    assert_eq!(lexical.len(), 2);
    assert!(lexical[0].column < lexical[1].column);
}

#[test]
fn empty_source_compiles_to_unit() {
    assert_eq!(run("", CompilationTarget::Bytecode), Ok(Value::Unit));
    assert_eq!(run(";;", CompilationTarget::Mlir), Ok(Value::Unit));
}
