//! Oaf Compiler CLI
//!
//! Command-line interface for compiling and running .oaf programs, dumping
//! intermediate artifacts, and driving the benchmark harness.
//!
//! Exit codes: 0 success, 1 compile error, 2 runtime error, 3 benchmark
//! regression (with `--fail-on-regression`).

use clap::{Parser as ClapParser, Subcommand};
use oafc::bench::kernels::{ExecMode, KernelConfig, KernelRow, run_kernels};
use oafc::bench::{GateConfig, Statistic, find_regressions, run_benchmarks};
use oafc::driver::{CompilationTarget, Driver, RunError};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "oafc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Oaf compiler - compile and run .oaf programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a .oaf file, printing the terminal value
    Run {
        /// Input .oaf source file
        input: PathBuf,

        /// Compilation target (both targets agree observably)
        #[arg(long = "compilation-target", default_value = "bytecode")]
        compilation_target: String,

        /// Shortcut for --compilation-target bytecode
        #[arg(long)]
        run_bytecode: bool,

        /// Print the parsed syntax tree
        #[arg(long)]
        ast: bool,

        /// Print the optimized IR module
        #[arg(long)]
        ir: bool,

        /// Print the generated bytecode listing
        #[arg(long)]
        bytecode: bool,
    },

    /// Compile a .oaf file and emit a bytecode artifact
    Build {
        /// Input .oaf source file
        input: PathBuf,

        /// Output path (defaults to input with .oafb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compilation target
        #[arg(long = "compilation-target", default_value = "bytecode")]
        compilation_target: String,
    },

    /// Run the general benchmarks against the reference baseline
    Bench {
        /// Iterations per benchmark
        #[arg(long, default_value_t = 20)]
        iterations: u32,

        /// Global ratio ceiling for the regression gate
        #[arg(long = "max-mean-ratio")]
        max_mean_ratio: Option<f64>,

        /// TOML file with per-benchmark threshold overrides
        #[arg(long = "threshold-config")]
        threshold_config: Option<PathBuf>,

        /// Statistic the gate compares (mean, median, p95)
        #[arg(long, default_value = "mean")]
        statistic: String,

        /// Exit with code 3 when any benchmark regresses
        #[arg(long)]
        fail_on_regression: bool,
    },

    /// Run the kernel benchmarks and emit CSV rows
    Kernels {
        /// Run the native (ahead-of-time) mirrors
        #[arg(long, conflicts_with = "tiered")]
        native: bool,

        /// First iteration in the VM, the rest native
        #[arg(long)]
        tiered: bool,

        /// Compilation target for VM execution
        #[arg(long = "compilation-target", default_value = "bytecode")]
        compilation_target: String,

        /// Iterations per kernel
        #[arg(long, default_value_t = 3)]
        iterations: u32,

        /// Size for the sum-family kernels
        #[arg(long = "sum-n", default_value_t = 10_000)]
        sum_n: i64,

        /// Upper bound for prime_trial
        #[arg(long = "prime-n", default_value_t = 2_000)]
        prime_n: i64,

        /// Grid edge for affine_grid
        #[arg(long = "matrix-n", default_value_t = 64)]
        matrix_n: i64,
    },

    /// Run internal validation; exit 0 iff all checks pass
    SelfTest,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            compilation_target,
            run_bytecode,
            ast,
            ir,
            bytecode,
        } => run_command(&input, &compilation_target, run_bytecode, ast, ir, bytecode),
        Commands::Build {
            input,
            output,
            compilation_target,
        } => build_command(&input, output, &compilation_target),
        Commands::Bench {
            iterations,
            max_mean_ratio,
            threshold_config,
            statistic,
            fail_on_regression,
        } => bench_command(
            iterations,
            max_mean_ratio,
            threshold_config.as_deref(),
            &statistic,
            fail_on_regression,
        ),
        Commands::Kernels {
            native,
            tiered,
            compilation_target,
            iterations,
            sum_n,
            prime_n,
            matrix_n,
        } => kernels_command(
            native,
            tiered,
            &compilation_target,
            KernelConfig {
                iterations,
                sum_n,
                prime_n,
                matrix_n,
            },
        ),
        Commands::SelfTest => self_test_command(),
    }
}

fn parse_target(name: &str) -> CompilationTarget {
    match name.parse() {
        Ok(target) => target,
        Err(message) => {
            eprintln!("Error: {}", message);
            process::exit(1);
        }
    }
}

fn read_source(input: &Path) -> String {
    match fs::read_to_string(input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error: failed to read {}: {}", input.display(), error);
            process::exit(1);
        }
    }
}

fn run_command(
    input: &Path,
    target_name: &str,
    run_bytecode: bool,
    dump_ast: bool,
    dump_ir: bool,
    dump_bytecode: bool,
) {
    let target = if run_bytecode {
        CompilationTarget::Bytecode
    } else {
        parse_target(target_name)
    };
    let source = read_source(input);
    let driver = Driver::new();
    let result = driver.compile(&source, target);

    if dump_ast {
        if let Some(unit) = &result.unit {
            println!("{:#?}", unit);
        }
    }
    if dump_ir {
        if let Some(ir) = &result.ir {
            print!("{}", ir);
        }
    }
    if dump_bytecode {
        if let Some(program) = &result.program {
            print!("{}", program);
        }
    }

    if !result.success {
        for diagnostic in &result.diagnostics {
            eprintln!("{}", diagnostic);
        }
        process::exit(1);
    }

    match driver.run(&source, target) {
        Ok(value) => println!("{}", value),
        Err(RunError::Compile(diagnostics)) => {
            for diagnostic in diagnostics {
                eprintln!("{}", diagnostic);
            }
            process::exit(1);
        }
        Err(RunError::Runtime(error)) => {
            eprintln!("Runtime error: {}", error);
            process::exit(2);
        }
    }
}

fn build_command(input: &Path, output: Option<PathBuf>, target_name: &str) {
    let target = parse_target(target_name);
    let source = read_source(input);
    let result = Driver::new().compile(&source, target);
    if !result.success {
        for diagnostic in &result.diagnostics {
            eprintln!("{}", diagnostic);
        }
        process::exit(1);
    }
    let Some(program) = &result.program else {
        eprintln!("Error: compilation produced no program");
        process::exit(1);
    };
    let output = output.unwrap_or_else(|| input.with_extension("oafb"));
    let encoded = match bincode::serialize(program) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("Error: failed to encode program: {}", error);
            process::exit(1);
        }
    };
    if let Err(error) = fs::write(&output, encoded) {
        eprintln!("Error: failed to write {}: {}", output.display(), error);
        process::exit(1);
    }
    println!("Compiled {} -> {}", input.display(), output.display());
}

fn bench_command(
    iterations: u32,
    max_mean_ratio: Option<f64>,
    threshold_config: Option<&Path>,
    statistic: &str,
    fail_on_regression: bool,
) {
    let mut config = match threshold_config {
        Some(path) => {
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(error) => {
                    eprintln!("Error: failed to read {}: {}", path.display(), error);
                    process::exit(1);
                }
            };
            match GateConfig::from_toml(&content) {
                Ok(config) => config,
                Err(message) => {
                    eprintln!("Error: {}", message);
                    process::exit(1);
                }
            }
        }
        None => GateConfig::new(max_mean_ratio.unwrap_or(f64::INFINITY)),
    };
    if let Some(ratio) = max_mean_ratio {
        config.max_allowed_ratio = ratio;
    }
    match statistic.parse::<Statistic>() {
        Ok(parsed) => config.statistic = parsed,
        Err(message) => {
            eprintln!("Error: {}", message);
            process::exit(1);
        }
    }

    let results = run_benchmarks(iterations);
    println!("benchmark,runtime,iterations,mean_ms,median_ms,p95_ms");
    for result in &results {
        println!(
            "{},{},{},{:.3},{:.3},{:.3}",
            result.benchmark,
            result.runtime,
            result.iterations,
            result.mean_ms,
            result.median_ms,
            result.p95_ms
        );
    }

    let regressions = find_regressions(&results, &config);
    for regression in &regressions {
        eprintln!(
            "regression: {} {} ratio {:.3} exceeds {:.3}",
            regression.benchmark, regression.statistic, regression.ratio, regression.threshold
        );
    }
    if fail_on_regression && !regressions.is_empty() {
        process::exit(3);
    }
}

fn kernels_command(native: bool, tiered: bool, target_name: &str, config: KernelConfig) {
    let target = parse_target(target_name);
    let mode = if tiered {
        ExecMode::Tiered
    } else {
        match (native, target) {
            (true, CompilationTarget::Mlir) => ExecMode::MlirNative,
            (true, CompilationTarget::Bytecode) => ExecMode::Native,
            (false, CompilationTarget::Mlir) => ExecMode::MlirVm,
            (false, CompilationTarget::Bytecode) => ExecMode::Vm,
        }
    };
    match run_kernels(mode, &config) {
        Ok(rows) => {
            println!("{}", KernelRow::csv_header());
            for row in rows {
                println!("{}", row.to_csv());
            }
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            process::exit(1);
        }
    }
}

fn self_test_command() {
    let outcomes = oafc::selftest::run_self_test();
    let mut failures = 0usize;
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(()) => println!("ok   {}", name),
            Err(message) => {
                failures += 1;
                println!("FAIL {}: {}", name, message);
            }
        }
    }
    println!("{} checks, {} failed", outcomes.len(), failures);
    if failures > 0 {
        process::exit(1);
    }
}
