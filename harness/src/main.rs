use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pardo_harness::{config, demo, functions};

#[derive(Parser, Debug)]
#[command(name = "pardo-harness")]
#[command(about = "Local partition runner for pardo user functions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the analyzed signatures of the demo functions as JSON.
    Describe,

    /// Split generated lines into words and count them per window.
    Run,

    /// Read a range of positions through the splittable demo function.
    ReadRange {
        #[arg(long, default_value_t = 1000)]
        n: u64,

        /// Positions claimed per invocation before checkpointing.
        #[arg(long, default_value_t = 16)]
        batch: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pardo_runner=debug")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::HarnessConfig::from_env().context("load harness config")?;

    let report = match cli.command {
        Command::Describe => functions::describe_all()?,
        Command::Run => demo::run(&cfg).await?,
        Command::ReadRange { n, batch } => demo::read_range(&cfg, n, batch).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
