//! Command line front end: `solve` runs every solver combination on one
//! generated chain, `batch` sweeps generated chains into CSV files.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use bracken::chain::JacobianChain;
use bracken::config::Config;
use bracken::dot;
use bracken::generator::ChainGenerator;
use bracken::operation::Mode;
use bracken::optimizer::{
    BlockOptimizer, BranchAndBoundOptimizer, DynamicProgrammingOptimizer, OptimizerParams,
};
use bracken::scheduler::{
    BranchAndBoundScheduler, DeviceScheduler, PriorityListScheduler, Scheduler,
};
use bracken::sequence::Sequence;
use bracken::timer::Timer;

#[derive(Parser)]
#[command(name = "bracken", version, about = "Jacobian chain bracketing and scheduling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one chain and run every solver combination on it.
    Solve { config: PathBuf },
    /// Generate chains per configured length and write one CSV per length.
    Batch {
        config: PathBuf,
        /// Output file prefix; files are named `<prefix><length>.csv`.
        #[arg(default_value = "results")]
        prefix: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Solve { config } => solve(&config),
        Command::Batch { config, prefix } => batch(&config, &prefix),
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(-1);
    }
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed().as_secs_f64())
}

fn solve(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = Config::from_file(config_path)?;
    let params = OptimizerParams::from_config(&config);

    let mut generator = ChainGenerator::from_config(&config);
    let chain = generator.next_chain().expect("config lists one length");
    let q = chain.length();

    let whole = chain.jacobian(q - 1, 0);
    println!("Tangent cost: {}", whole.accumulation_fma(Mode::Tangent));
    println!("Adjoint cost: {}", whole.accumulation_fma(Mode::Adjoint));

    // Dynamic programming seed.
    let (dp_seq, dp_time) = timed(|| {
        DynamicProgrammingOptimizer.solve(&chain, config.available_threads)
    });
    println!("\nDP solve duration: {dp_time} seconds");
    println!("Optimized cost (DP): {}\n{dp_seq}", dp_seq.makespan());
    dot::write_dot(&dp_seq, "dynamic_programming")?;

    // Re-schedule the DP sequence with the one-pass list scheduler.
    let mut dp_seq = dp_seq;
    let (_, list_time) = timed(|| {
        PriorityListScheduler.schedule(
            &mut dp_seq,
            config.available_threads,
            usize::MAX,
            &Timer::unbounded(),
        )
    });
    println!("Scheduling duration: {list_time} seconds");
    println!(
        "Optimized cost (DP + list scheduling): {}\n{dp_seq}",
        dp_seq.makespan()
    );

    // And exactly, with the branch & bound scheduler.
    let (_, bnb_sched_time) = timed(|| {
        BranchAndBoundScheduler.schedule(
            &mut dp_seq,
            config.available_threads,
            usize::MAX,
            &Timer::from_seconds(config.time_to_solve),
        )
    });
    println!("Scheduling duration: {bnb_sched_time} seconds");
    println!(
        "Optimized cost (DP + B&B scheduling): {}\n{dp_seq}",
        dp_seq.makespan()
    );

    run_optimizer(
        "BnB + list scheduling",
        &chain,
        params,
        &dp_seq,
        &PriorityListScheduler,
        false,
    );
    let bnb_seq = run_optimizer(
        "BnB + B&B scheduling",
        &chain,
        params,
        &dp_seq,
        &BranchAndBoundScheduler,
        false,
    );
    if let Some(seq) = bnb_seq {
        dot::write_dot(&seq, "branch_and_bound")?;
    }
    run_optimizer(
        "BnB + device scheduling",
        &chain,
        params,
        &dp_seq,
        &DeviceScheduler::new(),
        false,
    );
    run_optimizer(
        "BnB block + device batch scheduling",
        &chain,
        params,
        &dp_seq,
        &DeviceScheduler::new(),
        true,
    );

    Ok(())
}

/// Run one outer-optimizer configuration, seeded and bounded by the
/// scheduled DP sequence, and print its report. Returns the best sequence.
fn run_optimizer(
    label: &str,
    chain: &JacobianChain,
    params: OptimizerParams,
    dp_seq: &Sequence,
    scheduler: &dyn Scheduler,
    batch_leaves: bool,
) -> Option<Sequence> {
    let (outcome, elapsed) = if batch_leaves {
        let mut optimizer = BlockOptimizer::new(chain, params);
        optimizer.set_upper_bound(dp_seq.makespan());
        optimizer.seed_incumbent(dp_seq.clone());
        timed(|| optimizer.solve(scheduler))
    } else {
        let mut optimizer = BranchAndBoundOptimizer::new(chain, params);
        optimizer.set_upper_bound(dp_seq.makespan());
        optimizer.seed_incumbent(dp_seq.clone());
        timed(|| optimizer.solve(scheduler))
    };
    println!("{label} solve duration: {elapsed} seconds");

    println!("{}", outcome.stats);
    if outcome.timer_expired {
        println!("(search unfinished: deadline expired)");
    }
    println!("Optimized cost ({label}): {}", outcome.makespan);
    if let Some(seq) = &outcome.sequence {
        println!("{seq}");
    }
    outcome.sequence
}

fn batch(config_path: &Path, prefix: &str) -> Result<(), Box<dyn Error>> {
    let config = Config::from_file(config_path)?;
    let mut generator = ChainGenerator::from_config(&config);

    while let Some(length) = generator.current_length() {
        let path = format!("{prefix}{length}.csv");
        let mut out = BufWriter::new(File::create(&path)?);
        info!(%path, length, "writing batch results");

        for t in 1..=length {
            write!(out, "BnB_BnB/{t}/finished,")?;
            write!(out, "BnB_BnB/{t},")?;
            write!(out, "BnB_BnB_GPU/{t}/finished,")?;
            write!(out, "BnB_BnB_GPU/{t},")?;
            write!(out, "BnB_List/{t},")?;
            write!(out, "DP/{t},")?;
            write!(out, "DP_BnB/{t}{}", if t < length { "," } else { "\n" })?;
        }

        while generator.current_length() == Some(length) {
            let Some(chain) = generator.next_chain() else {
                break;
            };
            batch_row(&config, &chain, length, &mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}

fn batch_row(
    config: &Config,
    chain: &JacobianChain,
    length: usize,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    for t in 1..=length {
        let params = OptimizerParams {
            machines: t,
            matrix_free: config.matrix_free,
            time_to_solve: config.time_to_solve,
        };

        // DP bracketing, then its exact schedule.
        let mut dp_seq = DynamicProgrammingOptimizer.solve(chain, t);
        let dp_makespan = dp_seq.makespan();
        BranchAndBoundScheduler.schedule(
            &mut dp_seq,
            t,
            dp_makespan,
            &Timer::from_seconds(config.time_to_solve),
        );

        // Full search with the list scheduler.
        let mut list_solver = BranchAndBoundOptimizer::new(chain, params);
        list_solver.set_upper_bound(dp_seq.makespan());
        list_solver.seed_incumbent(dp_seq.clone());
        let list_outcome = list_solver.solve(&PriorityListScheduler);

        // Full search with the exact CPU scheduler.
        let mut bnb_solver = BranchAndBoundOptimizer::new(chain, params);
        bnb_solver.set_upper_bound(list_outcome.makespan);
        bnb_solver.seed_incumbent(dp_seq.clone());
        let bnb_outcome = bnb_solver.solve(&BranchAndBoundScheduler);

        // Full search with the device scheduler.
        let mut device_solver = BranchAndBoundOptimizer::new(chain, params);
        device_solver.set_upper_bound(list_outcome.makespan);
        device_solver.seed_incumbent(dp_seq.clone());
        let device_outcome = device_solver.solve(&DeviceScheduler::new());

        write!(out, "{},", !bnb_outcome.timer_expired)?;
        write!(out, "{},", bnb_outcome.makespan)?;
        write!(out, "{},", !device_outcome.timer_expired)?;
        write!(out, "{},", device_outcome.makespan)?;
        write!(out, "{},", list_outcome.makespan)?;
        write!(out, "{dp_makespan},")?;
        write!(
            out,
            "{}{}",
            dp_seq.makespan(),
            if t < length { "," } else { "\n" }
        )?;
    }
    Ok(())
}
