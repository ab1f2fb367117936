//! General benchmark runner and regression gate
//!
//! Runs three process-wide benchmarks — `lexer`, `compiler_pipeline`,
//! `bytecode_vm` — against a reference baseline and reports per-benchmark
//! statistics (mean, median, p95). The baseline rows come from an embedded
//! reference measurement table (the `csharp-baseline` runtime); the live
//! rows are measured in-process.
//!
//! The regression gate compares `oaf/baseline` ratios against a global
//! threshold plus a per-benchmark override map, over a selectable
//! statistic. Thresholds load from TOML.

pub mod kernels;

use crate::diagnostics::DiagnosticBag;
use crate::driver::{CompilationTarget, compile_uncached};
use crate::lexer::tokenize;
use oaf_runtime::Vm;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

/// Runtime labels for result rows.
pub const BASELINE_RUNTIME: &str = "csharp-baseline";
pub const TARGET_RUNTIME: &str = "oaf";

/// Reference per-iteration means in milliseconds, measured once against
/// the original implementation and pinned here.
const BASELINE_MEAN_MS: &[(&str, f64)] = &[
    ("lexer", 0.110),
    ("compiler_pipeline", 0.900),
    ("bytecode_vm", 0.450),
];

/// Pinned workload compiled/lexed/executed by the process benchmarks.
const BENCH_SOURCE: &str = "\
flux sum = 0;
flux i = 200;
loop i > 0 => {
    if i % 3 == 0 => { sum += i * 2; }
    if i % 3 == 1 => { sum -= i; }
    if i % 3 == 2 => { sum += i >> 1; }
    i -= 1;
}
return sum;
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    Median,
    P95,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Mean => write!(f, "mean"),
            Statistic::Median => write!(f, "median"),
            Statistic::P95 => write!(f, "p95"),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Statistic::Mean),
            "median" => Ok(Statistic::Median),
            "p95" => Ok(Statistic::P95),
            other => Err(format!(
                "unknown statistic '{}' (expected 'mean', 'median', or 'p95')",
                other
            )),
        }
    }
}

/// One (benchmark, runtime) result row.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchResult {
    pub benchmark: String,
    pub runtime: String,
    pub iterations: u32,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
}

impl BenchResult {
    pub fn statistic(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Mean => self.mean_ms,
            Statistic::Median => self.median_ms,
            Statistic::P95 => self.p95_ms,
        }
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn result_from_samples(benchmark: &str, runtime: &str, samples: &[f64]) -> BenchResult {
    BenchResult {
        benchmark: benchmark.to_string(),
        runtime: runtime.to_string(),
        iterations: samples.len() as u32,
        mean_ms: mean(samples),
        median_ms: median(samples),
        p95_ms: p95(samples),
    }
}

fn time_iterations(iterations: u32, mut work: impl FnMut()) -> Vec<f64> {
    let mut samples = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        let start = Instant::now();
        work();
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    samples
}

/// Run the three process benchmarks. Returns six rows: each benchmark for
/// the baseline and the live target.
pub fn run_benchmarks(iterations: u32) -> Vec<BenchResult> {
    let iterations = iterations.max(1);
    let mut results = Vec::with_capacity(6);

    info!(iterations, "running general benchmarks");

    // lexer: tokenize the pinned source.
    let samples = time_iterations(iterations, || {
        let mut bag = DiagnosticBag::new();
        let tokens = tokenize(BENCH_SOURCE, &mut bag);
        std::hint::black_box(tokens.len());
    });
    results.push(baseline_row("lexer", iterations));
    results.push(result_from_samples("lexer", TARGET_RUNTIME, &samples));

    // compiler_pipeline: the full uncached pipeline.
    let samples = time_iterations(iterations, || {
        let result = compile_uncached(BENCH_SOURCE, CompilationTarget::Bytecode);
        std::hint::black_box(result.success);
    });
    results.push(baseline_row("compiler_pipeline", iterations));
    results.push(result_from_samples(
        "compiler_pipeline",
        TARGET_RUNTIME,
        &samples,
    ));

    // bytecode_vm: execute a precompiled program.
    let compiled = compile_uncached(BENCH_SOURCE, CompilationTarget::Bytecode);
    let program = compiled.program.as_ref();
    let samples = time_iterations(iterations, || {
        if let Some(program) = program {
            let value = Vm::new().execute(program);
            std::hint::black_box(value.is_ok());
        }
    });
    results.push(baseline_row("bytecode_vm", iterations));
    results.push(result_from_samples("bytecode_vm", TARGET_RUNTIME, &samples));

    results
}

fn baseline_row(benchmark: &str, iterations: u32) -> BenchResult {
    let mean_ms = BASELINE_MEAN_MS
        .iter()
        .find(|(name, _)| *name == benchmark)
        .map(|(_, value)| *value)
        .unwrap_or(1.0);
    // Reference measurements are pinned per-iteration means; the synthetic
    // sample set is constant, so all three statistics coincide.
    BenchResult {
        benchmark: benchmark.to_string(),
        runtime: BASELINE_RUNTIME.to_string(),
        iterations,
        mean_ms,
        median_ms: mean_ms,
        p95_ms: mean_ms,
    }
}

// ----------------------------------------------------------------------
// Regression gate
// ----------------------------------------------------------------------

/// Gate configuration: a global ratio ceiling plus per-benchmark
/// overrides, applied to a selectable statistic.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub max_allowed_ratio: f64,
    pub per_benchmark: HashMap<String, f64>,
    pub statistic: Statistic,
}

impl GateConfig {
    pub fn new(max_allowed_ratio: f64) -> Self {
        GateConfig {
            max_allowed_ratio,
            per_benchmark: HashMap::new(),
            statistic: Statistic::Mean,
        }
    }

    pub fn threshold_for(&self, benchmark: &str) -> f64 {
        self.per_benchmark
            .get(benchmark)
            .copied()
            .unwrap_or(self.max_allowed_ratio)
    }

    /// Parse a threshold file:
    ///
    /// ```toml
    /// max-allowed-ratio = 1.5
    /// statistic = "mean"
    ///
    /// [overrides]
    /// lexer = 2.0
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "kebab-case")]
        struct RawConfig {
            max_allowed_ratio: f64,
            #[serde(default)]
            statistic: Option<String>,
            #[serde(default)]
            overrides: HashMap<String, f64>,
        }
        let raw: RawConfig =
            toml::from_str(toml_str).map_err(|e| format!("failed to parse gate config: {}", e))?;
        let statistic = match raw.statistic {
            Some(name) => name.parse()?,
            None => Statistic::Mean,
        };
        Ok(GateConfig {
            max_allowed_ratio: raw.max_allowed_ratio,
            per_benchmark: raw.overrides,
            statistic,
        })
    }
}

/// A benchmark whose target/baseline ratio exceeded its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Regression {
    pub benchmark: String,
    pub ratio: f64,
    pub threshold: f64,
    pub statistic: Statistic,
}

/// Compare target rows against their baseline rows. Benchmarks missing
/// either side are skipped.
pub fn find_regressions(results: &[BenchResult], config: &GateConfig) -> Vec<Regression> {
    let mut regressions = Vec::new();
    let baselines: HashMap<&str, &BenchResult> = results
        .iter()
        .filter(|r| r.runtime == BASELINE_RUNTIME)
        .map(|r| (r.benchmark.as_str(), r))
        .collect();
    for result in results.iter().filter(|r| r.runtime == TARGET_RUNTIME) {
        let Some(baseline) = baselines.get(result.benchmark.as_str()) else {
            continue;
        };
        let baseline_value = baseline.statistic(config.statistic);
        if baseline_value <= 0.0 {
            continue;
        }
        let ratio = result.statistic(config.statistic) / baseline_value;
        let threshold = config.threshold_for(&result.benchmark);
        debug!(benchmark = %result.benchmark, ratio, threshold, "gate check");
        if ratio > threshold {
            regressions.push(Regression {
                benchmark: result.benchmark.clone(),
                ratio,
                threshold,
                statistic: config.statistic,
            });
        }
    }
    regressions
}
