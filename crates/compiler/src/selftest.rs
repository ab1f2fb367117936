//! Internal validation
//!
//! A fixed battery of end-to-end checks over the pipeline's contract:
//! pinned programs with known diagnostics or terminal values, target
//! parity, cache behavior, and the benchmark gate. `oafc self-test` runs
//! these and exits zero iff every check passes.

use crate::bench::{
    BASELINE_RUNTIME, BenchResult, GateConfig, Statistic, TARGET_RUNTIME, find_regressions,
    run_benchmarks,
};
use crate::cache::CompilationCache;
use crate::diagnostics::{OWNERSHIP_ERROR, TYPE_ERROR};
use crate::driver::{CompilationTarget, Driver, RunError, compile_uncached};
use oaf_core::value::Value;
use std::sync::Arc;

type CheckResult = Result<(), String>;

fn expect_error_code(source: &str, code: &str) -> CheckResult {
    let result = compile_uncached(source, CompilationTarget::Bytecode);
    if result.success {
        return Err(format!("expected {} but compilation succeeded", code));
    }
    let found = result.diagnostics.iter().find(|d| d.code == code);
    match found {
        Some(diagnostic) if diagnostic.line >= 1 && diagnostic.column >= 1 => Ok(()),
        Some(diagnostic) => Err(format!(
            "{} carries invalid position ({},{})",
            code, diagnostic.line, diagnostic.column
        )),
        None => Err(format!(
            "expected {}, got: {}",
            code,
            result
                .diagnostics
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        )),
    }
}

fn expect_value(source: &str, expected: Value) -> CheckResult {
    let driver = Driver::new();
    for target in [CompilationTarget::Bytecode, CompilationTarget::Mlir] {
        match driver.run(source, target) {
            Ok(value) if value == expected => {}
            Ok(value) => {
                return Err(format!(
                    "target {} returned {}, expected {}",
                    target, value, expected
                ));
            }
            Err(RunError::Compile(diagnostics)) => {
                return Err(format!(
                    "target {} failed to compile: {}",
                    target,
                    diagnostics
                        .first()
                        .map(|d| d.to_string())
                        .unwrap_or_default()
                ));
            }
            Err(RunError::Runtime(error)) => {
                return Err(format!("target {} raised: {}", target, error));
            }
        }
    }
    Ok(())
}

fn check_mutability_violation() -> CheckResult {
    expect_error_code("count = 1; count += 2;", OWNERSHIP_ERROR)
}

fn check_loop_sum() -> CheckResult {
    expect_value(
        "flux sum = 0; flux i = 3; loop i > 0 => { if i == 3 => { i -= 1; continue; } sum += i; i -= 1; } return sum;",
        Value::Int(3),
    )
}

fn check_implicit_narrowing_rejected() -> CheckResult {
    expect_error_code("float f = 1.25; int i = f;", TYPE_ERROR)
}

fn check_cast_truncation() -> CheckResult {
    expect_value(
        "float f = 1.25; int i = (int)f; int j = (int)-1.5; return i + j;",
        Value::Int(0),
    )
}

fn check_generic_arity() -> CheckResult {
    expect_error_code("struct Box<T> [T value]; Box value = 1;", TYPE_ERROR)
}

fn check_break_outside_loop() -> CheckResult {
    expect_error_code("break;", TYPE_ERROR)
}

fn check_diagnostic_order_stable() -> CheckResult {
    let source = "float f = 1.25; int i = f; break; @ count = 1; count += 2;";
    let first = compile_uncached(source, CompilationTarget::Bytecode);
    let second = compile_uncached(source, CompilationTarget::Bytecode);
    if first.diagnostics == second.diagnostics {
        Ok(())
    } else {
        Err("diagnostic sequences differ between identical compilations".to_string())
    }
}

fn check_cache_builds_once() -> CheckResult {
    let cache = Arc::new(CompilationCache::new(8));
    let driver = Driver::with_cache(cache);
    let first = driver.compile("return 41 + 1;", CompilationTarget::Bytecode);
    if !first.success {
        return Err("cached compile unexpectedly failed".to_string());
    }
    // Repeated lookups must observe the very same artifact.
    let second = driver.compile("return 41 + 1;", CompilationTarget::Bytecode);
    if Arc::ptr_eq(&first, &second) {
        Ok(())
    } else {
        Err("cache returned distinct results for one fingerprint".to_string())
    }
}

fn check_benchmark_rows() -> CheckResult {
    let results = run_benchmarks(5);
    if results.len() != 6 {
        return Err(format!("expected 6 benchmark rows, got {}", results.len()));
    }
    for result in &results {
        if result.mean_ms < 0.0 || result.p95_ms < result.mean_ms {
            return Err(format!(
                "benchmark '{}' ({}) violates p95 >= mean >= 0",
                result.benchmark, result.runtime
            ));
        }
    }
    Ok(())
}

fn check_gate_statistic_flip() -> CheckResult {
    let results = vec![
        BenchResult {
            benchmark: "bytecode_vm".to_string(),
            runtime: BASELINE_RUNTIME.to_string(),
            iterations: 5,
            mean_ms: 1.0,
            median_ms: 1.0,
            p95_ms: 1.0,
        },
        BenchResult {
            benchmark: "bytecode_vm".to_string(),
            runtime: TARGET_RUNTIME.to_string(),
            iterations: 5,
            mean_ms: 1.0,
            median_ms: 1.0,
            p95_ms: 4.0,
        },
    ];
    let mut config = GateConfig::new(1.5);
    if !find_regressions(&results, &config).is_empty() {
        return Err("gate flagged a regression on agreeing means".to_string());
    }
    config.statistic = Statistic::P95;
    if find_regressions(&results, &config).len() != 1 {
        return Err("gate missed the p95 divergence".to_string());
    }
    Ok(())
}

/// Run every internal check. Returns (name, outcome) pairs in a stable
/// order.
pub fn run_self_test() -> Vec<(&'static str, CheckResult)> {
    vec![
        ("mutability-violation", check_mutability_violation()),
        ("loop-sum", check_loop_sum()),
        ("implicit-narrowing", check_implicit_narrowing_rejected()),
        ("cast-truncation", check_cast_truncation()),
        ("generic-arity", check_generic_arity()),
        ("break-outside-loop", check_break_outside_loop()),
        ("diagnostic-order", check_diagnostic_order_stable()),
        ("cache-once", check_cache_builds_once()),
        ("benchmark-rows", check_benchmark_rows()),
        ("gate-statistic-flip", check_gate_statistic_flip()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_all_self_tests_pass() {
        for (name, outcome) in run_self_test() {
            assert!(outcome.is_ok(), "{} failed: {:?}", name, outcome);
        }
    }
}
