//! Ferry DTN control-plane simulator

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ferry_logging::{ConsoleFormat, FerrySubscriberBuilder, FileOutput, LogConfig, RotationStrategy};

use ferry_sim::scenarios;

#[derive(Parser)]
#[command(
    name = "ferry-sim",
    about = "Scripted scenarios for the Ferry bundle forwarding control plane",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSONL console output instead of human-readable
    #[arg(long, global = true)]
    json: bool,

    /// Also write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay over two on-demand hops that open on traffic and close when idle
    Relay {
        /// Number of bundles to send
        #[arg(short, long, default_value = "3")]
        bundles: usize,
    },

    /// Cut a link with bundles in transit and restore it later
    Outage {
        #[arg(short, long, default_value = "3")]
        bundles: usize,

        /// Outage length in seconds
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },

    /// Send over two converging paths; the relay forwards each bundle once
    Duplicates {
        #[arg(short, long, default_value = "3")]
        bundles: usize,
    },

    /// Run every scenario
    All,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = LogConfig::simulation(cli.verbose);
    if cli.json {
        config = config.with_console_format(ConsoleFormat::Jsonl);
    }
    if let Some(dir) = cli.log_dir {
        config = config.with_file(
            FileOutput::new(dir)
                .with_prefix("ferry-sim")
                .with_rotation(RotationStrategy::Never),
        );
    }
    let _guard = FerrySubscriberBuilder::new().with_config(config).init()?;

    let reports = match cli.command {
        Commands::Relay { bundles } => vec![scenarios::ondemand_relay(bundles)?],
        Commands::Outage { bundles, seconds } => {
            vec![scenarios::outage_recovery(bundles, Duration::from_secs(seconds))?]
        }
        Commands::Duplicates { bundles } => vec![scenarios::duplicate_suppression(bundles)?],
        Commands::All => vec![
            scenarios::ondemand_relay(3)?,
            scenarios::outage_recovery(3, Duration::from_secs(30))?,
            scenarios::duplicate_suppression(3)?,
        ],
    };

    for report in reports {
        println!("{}", report);
    }
    Ok(())
}
