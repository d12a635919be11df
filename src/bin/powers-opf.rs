use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{format_err, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rayon::prelude::*;

use powers_opf::{
    load_network, read_case, run_opf, run_power_flow, AcOpfMode, GenQLimits, Network, OPFConfig,
    OPFConfigBuilder, PFConfigBuilder,
};

/// AC power flow and optimal power flow.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(PfArgs),

    /// Optimal Power Flow
    #[clap(name = "opf")]
    OPF(OpfArgs),

    /// Optimal Power Flow for every case in a directory
    #[clap(name = "bench")]
    Bench(BenchArgs),
}

#[derive(Args)]
struct PfArgs {
    /// Case file (.case) or case directory.
    #[arg(required = true)]
    input: PathBuf,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    max_it: Option<usize>,

    /// Enforce gen reactive power limits at expense of |V|.
    #[arg(long, default_value_t = false)]
    qlim: bool,

    /// Print the mismatch at each iteration.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Mode {
    Standard,
    Slacks,
}

#[derive(Args)]
struct OpfArgs {
    /// Case file (.case) or case directory.
    #[arg(required = true)]
    input: PathBuf,

    /// Termination tolerance.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of interior point iterations.
    #[arg(long)]
    max_it: Option<usize>,

    /// Initial trust region radius.
    #[arg(long)]
    trust_radius: Option<f64>,

    /// Limit handling.
    #[arg(long, value_enum, default_value_t = Mode::Standard)]
    mode: Mode,

    /// Hold generators at reactive limits by bound switching.
    #[arg(long, default_value_t = false)]
    qlim: bool,

    /// Start from a power flow solution.
    #[arg(long, default_value_t = false)]
    init_pf: bool,

    /// Print the iteration table.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Args)]
struct BenchArgs {
    /// Directory of .case files and case directories.
    #[arg(required = true)]
    dir: PathBuf,

    /// Termination tolerance.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of interior point iterations.
    #[arg(long)]
    max_it: Option<usize>,

    /// Start from the default point instead of a power flow solution.
    #[arg(long, default_value_t = false)]
    no_init_pf: bool,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::PowerFlow(args) => power_flow(args),
        Commands::OPF(args) => optimal_power_flow(args),
        Commands::Bench(args) => bench(args),
    }
}

fn load(path: &Path) -> Result<Network> {
    let data = read_case(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(load_network(&data)?)
}

fn power_flow(args: &PfArgs) -> Result<()> {
    let net = load(&args.input)?;

    let mut builder = PFConfigBuilder::default();
    if let Some(tol) = args.tol {
        builder.tolerance(tol);
    }
    if let Some(max_it) = args.max_it {
        builder.max_iterations(max_it);
    }
    if args.qlim {
        builder.enforce_q_limits(GenQLimits::OneAtATime);
    }
    builder.verbose(args.verbose);
    let config = builder.build()?;

    let res = run_power_flow(&net, &config)?;
    log::info!(
        "{}: {} buses, {} branches, {} generators",
        net.name(),
        net.bus_count(),
        net.branch_count(),
        net.generator_count()
    );
    log::info!(
        "converged: {} ({:?}) in {} iterations, mismatch {:e}, {:.1} ms",
        res.converged,
        res.status,
        res.iterations,
        res.error,
        res.elapsed.as_secs_f64() * 1e3
    );
    log::info!(
        "generation {:.2} MW, losses {:.2} MW",
        res.gen_p.iter().sum::<f64>(),
        res.losses.total.re
    );
    if !res.converged {
        return Err(format_err!("power flow did not succeed"));
    }
    Ok(())
}

fn opf_config(
    tol: Option<f64>,
    max_it: Option<usize>,
    trust_radius: Option<f64>,
) -> OPFConfigBuilder {
    let mut builder = OPFConfigBuilder::default();
    if let Some(tol) = tol {
        builder.ips_tolerance(tol);
    }
    if let Some(max_it) = max_it {
        builder.ips_iterations(max_it);
    }
    if let Some(radius) = trust_radius {
        builder.ips_trust_radius(radius);
    }
    builder
}

fn optimal_power_flow(args: &OpfArgs) -> Result<()> {
    let net = load(&args.input)?;

    let mut builder = opf_config(args.tol, args.max_it, args.trust_radius);
    builder
        .acopf_mode(match args.mode {
            Mode::Standard => AcOpfMode::Standard,
            Mode::Slacks => AcOpfMode::WithSlacks,
        })
        .ips_control_q_limits(args.qlim)
        .ips_init_with_pf(args.init_pf)
        .verbose(args.verbose);
    let config = builder.build()?;

    let res = run_opf(&net, &config)?;
    log::info!(
        "{}: objective {:.4} $/h, {} iterations ({:?}), {:.1} ms",
        net.name(),
        res.objective,
        res.iterations,
        res.status,
        res.elapsed.as_secs_f64() * 1e3
    );
    log::info!(
        "feascond {:e}, gradcond {:e}, compcond {:e}",
        res.primal_error,
        res.dual_error,
        res.complementarity
    );
    log::info!(
        "generation {:.2} MW, losses {:.2} MW",
        res.gen_p.iter().sum::<f64>(),
        res.losses.total.re
    );
    if !res.converged {
        return Err(format_err!("optimal power flow did not converge"));
    }
    Ok(())
}

struct BenchRow {
    name: String,
    buses: usize,
    branches: usize,
    generators: usize,
    error: f64,
    converged: bool,
    millis: f64,
}

fn bench_case(path: &Path, config: &OPFConfig) -> Result<BenchRow> {
    let t0 = Instant::now();
    let net = load(path)?;
    let res = run_opf(&net, config)?;
    Ok(BenchRow {
        name: net.name().to_string(),
        buses: net.bus_count(),
        branches: net.branch_count(),
        generators: net.generator_count(),
        error: res.error,
        converged: res.converged,
        millis: t0.elapsed().as_secs_f64() * 1e3,
    })
}

fn discover_cases(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut cases = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_case_file = path.extension().map(|ext| ext == "case").unwrap_or(false);
        let is_case_dir = path.is_dir() && path.join("bus.csv").exists();
        if is_case_file || is_case_dir {
            cases.push(path);
        }
    }
    cases.sort();
    Ok(cases)
}

fn bench_config(args: &BenchArgs) -> Result<OPFConfig> {
    Ok(opf_config(args.tol, args.max_it, None)
        .ips_init_with_pf(!args.no_init_pf)
        .build()?)
}

fn bench(args: &BenchArgs) -> Result<()> {
    let cases = discover_cases(&args.dir)?;
    let config = bench_config(args)?;

    let rows: Vec<BenchRow> = cases
        .par_iter()
        .filter_map(|path| match bench_case(path, &config) {
            Ok(row) => Some(row),
            Err(err) => {
                log::error!("{}: {:#}", path.display(), err);
                None
            }
        })
        .collect();

    println!(
        "{:<24} {:>7} {:>8} {:>6} {:>10} {:>9} {:>10}",
        "case", "buses", "branches", "gens", "error", "converged", "time (ms)"
    );
    for row in &rows {
        println!(
            "{:<24} {:>7} {:>8} {:>6} {:>10.2e} {:>9} {:>10.1}",
            row.name, row.buses, row.branches, row.generators, row.error, row.converged, row.millis
        );
    }
    let converged = rows.iter().filter(|r| r.converged).count();
    println!("Converged {} of {}", converged, cases.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};
    use clap::Parser;

    use super::{bench_config, Cli, Commands};

    fn bench_args(argv: &[&str]) -> Result<super::BenchArgs> {
        match Cli::try_parse_from(argv)?.command {
            Commands::Bench(args) => Ok(args),
            _ => Err(format_err!("expected the bench command")),
        }
    }

    #[test]
    fn test_bench_starts_from_power_flow() -> Result<()> {
        let config = bench_config(&bench_args(&["powers-opf", "bench", "cases"])?)?;
        if !config.ips_init_with_pf {
            return Err(format_err!("bench must start from a power flow solution"));
        }

        let config = bench_config(&bench_args(&[
            "powers-opf",
            "bench",
            "cases",
            "--no-init-pf",
            "--tol",
            "1e-6",
        ])?)?;
        if config.ips_init_with_pf || config.ips_tolerance != 1e-6 {
            return Err(format_err!("bench flags not applied"));
        }
        Ok(())
    }
}
