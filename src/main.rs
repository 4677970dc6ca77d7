use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use int8mm::compare::ErrorReport;
use int8mm::{init, plain_matmul, quantized_matmul, DType, MatmulConfig, MatmulState, OutlierPolicy};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "int8mm", version, about = "Compare decomposed int8 matmul against the dense reference")]
struct Args {
    /// Rows of A
    #[arg(long, default_value_t = 64)]
    m: usize,

    /// Inner dimension
    #[arg(long, default_value_t = 64)]
    k: usize,

    /// Columns of B
    #[arg(long, default_value_t = 64)]
    n: usize,

    /// Number of random trials
    #[arg(long, default_value_t = 25)]
    trials: usize,

    /// Outlier threshold (0 disables decomposition)
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,

    /// Value written into one eighth of A's columns (0 = no injection)
    #[arg(long, default_value_t = 0.0)]
    outlier_value: f32,

    /// Cache the quantized weight instead of re-quantizing it each call
    #[arg(long, default_value_t = false)]
    cached: bool,

    /// Element-wise instead of column-wise outlier extraction
    #[arg(long, default_value_t = false)]
    element_outliers: bool,

    /// Round operands and outputs to f16
    #[arg(long, default_value_t = false)]
    f16: bool,

    /// Config JSON file; overrides threshold/cached/element_outliers
    #[arg(long)]
    config: Option<PathBuf>,

    /// RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Threads (0 = rayon default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Write a JSON report here
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report {
    config: MatmulConfig,
    shape: (usize, usize, usize),
    trials: Vec<ErrorReport>,
    worst_loose: f64,
    worst_wide: f64,
    elapsed_s: f64,
}

fn load_config(args: &Args) -> Result<MatmulConfig> {
    if let Some(path) = &args.config {
        let s = std::fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
        return MatmulConfig::from_json(&s).with_context(|| format!("parse config: {}", path.display()));
    }
    let policy = if args.element_outliers { OutlierPolicy::Element } else { OutlierPolicy::Column };
    Ok(MatmulConfig::new(args.threshold, !args.cached)?.with_policy(policy))
}

fn run(args: &Args, config: MatmulConfig) -> Result<Report> {
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let dtype = if args.f16 { DType::F16 } else { DType::F32 };
    let pb = ProgressBar::new(args.trials as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?);
    let t0 = Instant::now();
    let mut trials = Vec::with_capacity(args.trials);
    for _ in 0..args.trials {
        let mut a = init::randn(args.m, args.k, &mut rng);
        if args.outlier_value != 0.0 {
            let cols = init::random_columns(args.k, args.k / 8, &mut rng);
            init::fill_columns(&mut a, &cols, args.outlier_value);
        }
        let a = a.with_dtype(dtype);
        let b = init::xavier_uniform(args.k, args.n, &mut rng).with_dtype(dtype);
        let mut state = MatmulState::new(config)?;
        let reference = plain_matmul(&a, &b)?;
        let out = quantized_matmul(&a, &b, &mut state)?;
        let r = ErrorReport::measure(&out, &reference);
        pb.set_message(format!("mean abs err {:.4}", r.mean_abs));
        pb.inc(1);
        trials.push(r);
    }
    pb.finish_and_clear();
    let worst_loose = trials.iter().map(|r| r.loose).fold(0.0, f64::max);
    let worst_wide = trials.iter().map(|r| r.wide).fold(0.0, f64::max);
    Ok(Report { config, shape: (args.m, args.k, args.n), trials, worst_loose, worst_wide, elapsed_s: t0.elapsed().as_secs_f64() })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    log::info!("config: {:?}", config);

    let report = if args.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build()?;
        pool.install(|| run(&args, config))?
    } else {
        run(&args, config)?
    };

    println!(
        "{}x{}x{} trials={} worst>(0.01,0.1)={:.4}% worst>(0.035,0.2)={:.4}% elapsed={:.3}s",
        args.m, args.k, args.n, report.trials.len(),
        report.worst_loose * 100.0, report.worst_wide * 100.0, report.elapsed_s
    );
    if let Some(path) = &args.json {
        std::fs::write(path, serde_json::to_string_pretty(&report)?).with_context(|| format!("write report: {}", path.display()))?;
    }
    Ok(())
}
