// crates/mtd-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mtd_core::exec::Env;
use mtd_core::io::{read_auto, write_auto};
use mtd_design::checkpoint;
use mtd_design::{Designer, Specification};
use mtd_thermo::SyntheticKernel;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "mtd",
    about = "Multi-tube nucleic-acid sequence designer",
    long_about = "Multi-tube nucleic-acid sequence designer.\n\nRun a design from a JSON specification, checkpoint long runs, and resume them.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a design from a specification (JSON/CBOR).
    Design {
        /// Input specification path.
        #[arg(long)]
        spec: PathBuf,

        /// Output result path (JSON/CBOR).
        #[arg(long, default_value = "result.json")]
        out: PathBuf,

        /// Checkpoint path; written every `--checkpoint-secs`.
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Seconds between checkpoints.
        #[arg(long, default_value_t = 60)]
        checkpoint_secs: u64,

        /// Run serially even when a worker pool is available.
        #[arg(long, default_value_t = false)]
        serial: bool,
    },

    /// Resume a checkpointed design and run it to completion.
    Resume {
        /// Input specification path (must match the checkpoint).
        #[arg(long)]
        spec: PathBuf,

        /// Checkpoint to resume from.
        #[arg(long)]
        checkpoint: PathBuf,

        /// Output result path (JSON/CBOR).
        #[arg(long, default_value = "result.json")]
        out: PathBuf,

        /// Run serially even when a worker pool is available.
        #[arg(long, default_value_t = false)]
        serial: bool,
    },

    /// Print a summary of a checkpoint without resuming it.
    Inspect {
        /// Checkpoint path.
        #[arg(long)]
        checkpoint: PathBuf,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn install_checkpointing(designer: &mut Designer, path: PathBuf, every_secs: u64) {
    let mut last = std::time::Instant::now();
    designer.checkpoint = Some(Box::new(move |d: &Designer, done: bool| {
        if done || last.elapsed().as_secs() >= every_secs {
            last = std::time::Instant::now();
            match checkpoint::save(&path, d) {
                Ok(()) => info!(path = %path.display(), "checkpoint written"),
                Err(e) => tracing::warn!(error = %e, "checkpoint write failed"),
            }
        }
    }));
}

fn finish(designer: &Designer, env: Env, out: &PathBuf) -> Result<()> {
    let result = designer.design_result(env)?;
    write_auto(out, &result).with_context(|| format!("writing {}", out.display()))?;
    info!(
        success = result.success,
        defect = designer.best.full.weighted_total(),
        out = %out.display(),
        "design finished"
    );
    for single in &result.results {
        for (name, seq) in &single.domains {
            println!("domain {name}: {seq}");
        }
        for (name, seq) in &single.strands {
            println!("strand {name}: {seq}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Design { spec, out, checkpoint: ckpt, checkpoint_secs, serial } => {
            let spec: Specification =
                read_auto(&spec).with_context(|| format!("reading {}", spec.display()))?;
            let mut designer = spec.build()?;
            designer.initialize(true)?;
            if let Some(path) = ckpt {
                install_checkpointing(&mut designer, path, checkpoint_secs);
            }
            let env = if serial { Env::Serial } else { Env::Pool };
            let best = designer.optimize_tubes(env)?;
            info!(defect = best.weighted_total(), "optimization converged");
            finish(&designer, env, &out)
        }

        Cmd::Resume { spec, checkpoint: ckpt, out, serial } => {
            let spec: Specification =
                read_auto(&spec).with_context(|| format!("reading {}", spec.display()))?;
            let mut designer = checkpoint::load(&ckpt, &spec, Arc::new(SyntheticKernel))?;
            info!(
                elapsed = designer.stats.design_time,
                defect = designer.best.full.weighted_total(),
                "resuming design"
            );
            let env = if serial { Env::Serial } else { Env::Pool };
            let best = designer.optimize_tubes(env)?;
            info!(defect = best.weighted_total(), "optimization converged");
            finish(&designer, env, &out)
        }

        Cmd::Inspect { checkpoint: ckpt } => {
            let wrapped: mtd_core::io::Versioned<serde_json::Value> = read_auto(&ckpt)?;
            println!("checkpoint version: {}", wrapped.ver);
            if let Some(stats) = wrapped.payload.get("stats") {
                println!("stats: {}", serde_json::to_string_pretty(stats)?);
            }
            if let Some(psi) = wrapped.payload.get("psi") {
                println!("partition: {psi}");
            }
            Ok(())
        }
    }
}
