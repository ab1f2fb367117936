//! Kernel benchmark harness
//!
//! A fixed set of algorithmic kernels, each pinned by its input size and
//! expressed twice: as Oaf source (generated per size) and as a native
//! Rust mirror with identical wrapping semantics. Every kernel returns an
//! integer checksum; the harness verifies the checksum is identical across
//! execution modes before reporting timings, so a mode can only differ in
//! speed, never in observable result.
//!
//! Modes are a closed strategy set, not string-keyed configuration.

use crate::driver::{CompilationTarget, Driver, RunError};
use oaf_core::value::Value;
use std::fmt;
use std::time::Instant;
use tracing::info;

/// How a kernel is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Compile with the bytecode target, execute in the VM.
    Vm,
    /// Run the ahead-of-time native mirror.
    Native,
    /// First iteration in the VM, remaining iterations native.
    Tiered,
    /// Compile with the mlir target, execute in the VM.
    MlirVm,
    /// Validate via the mlir target, then run the native mirror.
    MlirNative,
}

impl ExecMode {
    fn vm_target(self) -> CompilationTarget {
        match self {
            ExecMode::MlirVm | ExecMode::MlirNative => CompilationTarget::Mlir,
            _ => CompilationTarget::Bytecode,
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Vm => write!(f, "vm"),
            ExecMode::Native => write!(f, "native"),
            ExecMode::Tiered => write!(f, "tiered"),
            ExecMode::MlirVm => write!(f, "mlir-vm"),
            ExecMode::MlirNative => write!(f, "mlir-native"),
        }
    }
}

/// Kernel sizes and repeat count.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub iterations: u32,
    pub sum_n: i64,
    pub prime_n: i64,
    pub matrix_n: i64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            iterations: 3,
            sum_n: 10_000,
            prime_n: 2_000,
            matrix_n: 64,
        }
    }
}

/// One CSV row of harness output.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelRow {
    pub language: String,
    pub algorithm: String,
    pub iterations: u32,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub checksum: i64,
}

impl KernelRow {
    pub fn csv_header() -> &'static str {
        "language,algorithm,iterations,total_ms,mean_ms,checksum"
    }

    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{:.3},{:.3},{}",
            self.language, self.algorithm, self.iterations, self.total_ms, self.mean_ms,
            self.checksum
        )
    }
}

struct Kernel {
    name: &'static str,
    size: fn(&KernelConfig) -> i64,
    source: fn(i64) -> String,
    native: fn(i64) -> i64,
}

const KERNELS: &[Kernel] = &[
    Kernel {
        name: "sum_xor",
        size: |c| c.sum_n,
        source: sum_xor_source,
        native: sum_xor_native,
    },
    Kernel {
        name: "prime_trial",
        size: |c| c.prime_n,
        source: prime_trial_source,
        native: prime_trial_native,
    },
    Kernel {
        name: "affine_grid",
        size: |c| c.matrix_n,
        source: affine_grid_source,
        native: affine_grid_native,
    },
    Kernel {
        name: "branch_mix",
        size: |c| c.sum_n,
        source: branch_mix_source,
        native: branch_mix_native,
    },
    Kernel {
        name: "gcd_fold",
        size: |c| c.sum_n,
        source: gcd_fold_source,
        native: gcd_fold_native,
    },
    Kernel {
        name: "lcg_stream",
        size: |c| c.sum_n,
        source: lcg_stream_source,
        native: lcg_stream_native,
    },
];

// ----------------------------------------------------------------------
// Kernel bodies (Oaf source + native mirror)
// ----------------------------------------------------------------------

fn sum_xor_source(n: i64) -> String {
    format!(
        "flux acc = 0;\nflux i = 0;\nloop i < {n} => {{\n  acc += i ^ (i << 1);\n  i += 1;\n}}\nreturn acc;\n"
    )
}

fn sum_xor_native(n: i64) -> i64 {
    let mut acc: i64 = 0;
    let mut i: i64 = 0;
    while i < n {
        acc = acc.wrapping_add(i ^ i.wrapping_shl(1));
        i += 1;
    }
    acc
}

fn prime_trial_source(n: i64) -> String {
    format!(
        "flux count = 0;\nflux n = 2;\nloop n < {n} => {{\n  flux isp = true;\n  flux d = 2;\n  loop d * d <= n => {{\n    if n % d == 0 => {{ isp = false; break; }}\n    d += 1;\n  }}\n  if isp => count += 1;\n  n += 1;\n}}\nreturn count;\n"
    )
}

fn prime_trial_native(limit: i64) -> i64 {
    let mut count: i64 = 0;
    let mut n: i64 = 2;
    while n < limit {
        let mut isp = true;
        let mut d: i64 = 2;
        while d.wrapping_mul(d) <= n {
            if n % d == 0 {
                isp = false;
                break;
            }
            d += 1;
        }
        if isp {
            count += 1;
        }
        n += 1;
    }
    count
}

fn affine_grid_source(n: i64) -> String {
    format!(
        "flux acc = 0;\nflux i = 0;\nloop i < {n} => {{\n  flux j = 0;\n  loop j < {n} => {{\n    acc += (i * 7 + j * 13) % 1021;\n    j += 1;\n  }}\n  i += 1;\n}}\nreturn acc;\n"
    )
}

fn affine_grid_native(n: i64) -> i64 {
    let mut acc: i64 = 0;
    let mut i: i64 = 0;
    while i < n {
        let mut j: i64 = 0;
        while j < n {
            acc = acc.wrapping_add(
                i.wrapping_mul(7).wrapping_add(j.wrapping_mul(13)) % 1021,
            );
            j += 1;
        }
        i += 1;
    }
    acc
}

fn branch_mix_source(n: i64) -> String {
    format!(
        "flux acc = 0;\nflux i = 0;\nloop i < {n} => {{\n  if i % 3 == 0 => acc += i * 2;\n  if i % 3 == 1 => acc -= i;\n  if i % 3 == 2 => acc += i >> 1;\n  i += 1;\n}}\nreturn acc;\n"
    )
}

fn branch_mix_native(n: i64) -> i64 {
    let mut acc: i64 = 0;
    let mut i: i64 = 0;
    while i < n {
        match i % 3 {
            0 => acc = acc.wrapping_add(i.wrapping_mul(2)),
            1 => acc = acc.wrapping_sub(i),
            _ => acc = acc.wrapping_add(i >> 1),
        }
        i += 1;
    }
    acc
}

fn gcd_fold_source(n: i64) -> String {
    format!(
        "flux acc = 0;\nflux i = 1;\nloop i < {n} => {{\n  flux a = i;\n  flux b = 123456;\n  loop b != 0 => {{\n    flux t = a % b;\n    a = b;\n    b = t;\n  }}\n  acc += a;\n  i += 1;\n}}\nreturn acc;\n"
    )
}

fn gcd_fold_native(n: i64) -> i64 {
    let mut acc: i64 = 0;
    let mut i: i64 = 1;
    while i < n {
        let mut a = i;
        let mut b: i64 = 123_456;
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        acc = acc.wrapping_add(a);
        i += 1;
    }
    acc
}

fn lcg_stream_source(n: i64) -> String {
    format!(
        "flux s = 12345;\nflux acc = 0;\nflux i = 0;\nloop i < {n} => {{\n  s = s * 1103515245 + 12345;\n  acc = acc ^ s;\n  i += 1;\n}}\nreturn acc;\n"
    )
}

fn lcg_stream_native(n: i64) -> i64 {
    let mut s: i64 = 12345;
    let mut acc: i64 = 0;
    let mut i: i64 = 0;
    while i < n {
        s = s.wrapping_mul(1_103_515_245).wrapping_add(12345);
        acc ^= s;
        i += 1;
    }
    acc
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

fn run_in_vm(driver: &Driver, source: &str, target: CompilationTarget) -> Result<i64, String> {
    match driver.run(source, target) {
        Ok(Value::Int(checksum)) => Ok(checksum),
        Ok(other) => Err(format!("kernel returned non-integer value '{}'", other)),
        Err(RunError::Compile(diagnostics)) => Err(format!(
            "kernel failed to compile: {}",
            diagnostics
                .first()
                .map(|d| d.to_string())
                .unwrap_or_default()
        )),
        Err(RunError::Runtime(error)) => Err(format!("kernel raised: {}", error)),
    }
}

/// Run every kernel under one execution mode.
pub fn run_kernels(mode: ExecMode, config: &KernelConfig) -> Result<Vec<KernelRow>, String> {
    let driver = Driver::new();
    let iterations = config.iterations.max(1);
    let mut rows = Vec::with_capacity(KERNELS.len());

    for kernel in KERNELS {
        let size = (kernel.size)(config);
        let source = (kernel.source)(size);
        info!(kernel = kernel.name, %mode, size, "running kernel");

        // Cross-mode contract: the VM result and the native mirror must
        // agree before any timing is reported.
        let vm_checksum = run_in_vm(&driver, &source, mode.vm_target())?;
        let native_checksum = (kernel.native)(size);
        if vm_checksum != native_checksum {
            return Err(format!(
                "kernel '{}' checksum mismatch: vm {} vs native {}",
                kernel.name, vm_checksum, native_checksum
            ));
        }

        let start = Instant::now();
        let mut checksum = vm_checksum;
        for iteration in 0..iterations {
            checksum = match mode {
                ExecMode::Vm => run_in_vm(&driver, &source, CompilationTarget::Bytecode)?,
                ExecMode::MlirVm => run_in_vm(&driver, &source, CompilationTarget::Mlir)?,
                ExecMode::Native | ExecMode::MlirNative => (kernel.native)(size),
                ExecMode::Tiered => {
                    if iteration == 0 {
                        run_in_vm(&driver, &source, CompilationTarget::Bytecode)?
                    } else {
                        (kernel.native)(size)
                    }
                }
            };
        }
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;

        rows.push(KernelRow {
            language: "oaf".to_string(),
            algorithm: kernel.name.to_string(),
            iterations,
            total_ms,
            mean_ms: total_ms / f64::from(iterations),
            checksum,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> KernelConfig {
        KernelConfig {
            iterations: 1,
            sum_n: 50,
            prime_n: 50,
            matrix_n: 8,
        }
    }

    #[test]
    fn test_all_kernels_run_in_vm() {
        let rows = run_kernels(ExecMode::Vm, &small_config()).unwrap();
        assert_eq!(rows.len(), 6);
        let names: Vec<_> = rows.iter().map(|r| r.algorithm.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "sum_xor",
                "prime_trial",
                "affine_grid",
                "branch_mix",
                "gcd_fold",
                "lcg_stream"
            ]
        );
    }

    #[test]
    fn test_checksums_identical_across_modes() {
        let config = small_config();
        let reference = run_kernels(ExecMode::Vm, &config).unwrap();
        for mode in [
            ExecMode::Native,
            ExecMode::Tiered,
            ExecMode::MlirVm,
            ExecMode::MlirNative,
        ] {
            let rows = run_kernels(mode, &config).unwrap();
            for (expected, actual) in reference.iter().zip(rows.iter()) {
                assert_eq!(
                    expected.checksum, actual.checksum,
                    "checksum drift in '{}' under {}",
                    actual.algorithm, mode
                );
            }
        }
    }

    #[test]
    fn test_prime_trial_counts_primes() {
        // 15 primes below 50.
        assert_eq!(prime_trial_native(50), 15);
    }

    #[test]
    fn test_csv_shape() {
        let rows = run_kernels(ExecMode::Native, &small_config()).unwrap();
        assert_eq!(
            KernelRow::csv_header(),
            "language,algorithm,iterations,total_ms,mean_ms,checksum"
        );
        let line = rows[0].to_csv();
        assert!(line.starts_with("oaf,sum_xor,1,"));
        assert_eq!(line.split(',').count(), 6);
    }

    #[test]
    fn test_timings_are_nonnegative() {
        let rows = run_kernels(ExecMode::Vm, &small_config()).unwrap();
        for row in rows {
            assert!(row.total_ms >= 0.0);
            assert!(row.mean_ms >= 0.0);
        }
    }
}
