//! SpMV benchmark over matrix-market files.
//!
//! Usage: `spmv_bench [-s] <mmf_file> ...`
//!
//! Runtime tunables come from the `SPX_*` environment variables
//! (threads, affinity, encoding search, sampling).

use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use log::{error, info};

use csx::{matvec_mult, Input, Matrix, RuntimeConfig, Vector};

const BENCH_LOOPS: usize = 128;

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {program} [-s] <mmf_file> ...\n\
         \t-s    Use CSX for symmetric matrices.\n\
         \t-h    Print this help message and exit."
    );
}

fn bench_matrix(path: &str, config: &RuntimeConfig) -> anyhow::Result<()> {
    let input = Input::from_mmf(path).with_context(|| format!("loading {path}"))?;
    info!(
        "{path}: {}x{}, tuning with {} threads",
        input.nrows(),
        input.ncols(),
        config.nr_threads
    );

    let tune_start = Instant::now();
    let a = Matrix::tune(&input, config).context("tuning failed")?;
    let tune_time = tune_start.elapsed().as_secs_f64();

    let x = Vector::random_range(a.ncols(), -1000.0, 1000.0);
    let mut y = Vector::new(a.nrows());

    // Warm the caches and fault in the buffers.
    matvec_mult(1.0, &a, &x, &mut y)?;

    let spmv_start = Instant::now();
    for _ in 0..BENCH_LOOPS {
        matvec_mult(1.0, &a, &x, &mut y)?;
    }
    let secs = spmv_start.elapsed().as_secs_f64();
    let mflops = 2.0 * a.nnz() as f64 * BENCH_LOOPS as f64 / secs / 1e6;

    println!(
        "m: {path} preproc: {tune_time:.4} s spmv: {secs:.4} s ({BENCH_LOOPS} loops) \
         perf: {mflops:.2} MFLOPS size: {} bytes",
        a.size_bytes()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let mut config = RuntimeConfig::default();
    if std::env::var("SPX_RT_NR_THREADS").is_err() {
        config.nr_threads = num_cpus::get();
    }
    if let Err(err) = config.set_from_env() {
        error!("{err}");
        return ExitCode::FAILURE;
    }

    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();
    let mut files = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-s" => config.symmetric = true,
            "-h" => {
                print_usage(&program);
                return ExitCode::SUCCESS;
            }
            flag if flag.starts_with('-') => {
                print_usage(&program);
                return ExitCode::FAILURE;
            }
            file => files.push(file.to_string()),
        }
    }

    if files.is_empty() {
        print_usage(&program);
        return ExitCode::FAILURE;
    }

    for file in &files {
        if let Err(err) = bench_matrix(file, &config) {
            error!("{file}: {err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
