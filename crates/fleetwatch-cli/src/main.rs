use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod fleet;
mod notify;

use commands::{GroupArgs, RunArgs};

#[derive(Parser)]
#[command(
    name = "fleetwatch",
    about = "fleetwatch: periodic autoscaling decisions for instance groups",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the group once and apply the decision.
    ///
    /// Meant to be invoked by a scheduler every minute or so. Thresholds
    /// come from --config (TOML), overridden by the flags below.
    Run(RunArgs),
    /// Print the fleet, its current loads and the persisted engine state
    Status {
        #[command(flatten)]
        target: GroupArgs,
        /// Include private DNS names
        #[arg(short, long)]
        all: bool,
        /// TOML file with the sampling window (same file as `run --config`)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Set the desired capacity by hand (at most two away from the current count)
    SetDesired {
        #[command(flatten)]
        target: GroupArgs,
        #[arg(short = 'n', long = "instances")]
        desired: u32,
    },
    /// Terminate one instance and decrement the desired capacity
    Kill {
        #[command(flatten)]
        target: GroupArgs,
        #[arg(short, long)]
        instance: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetwatch=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Status {
            target,
            all,
            config,
        } => commands::status::status(&target, all, config.as_deref()),
        Commands::SetDesired { target, desired } => commands::manage::set_desired(&target, desired),
        Commands::Kill { target, instance } => commands::manage::kill(&target, &instance),
    }
}
