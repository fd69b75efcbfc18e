mod cmd;
mod output;
mod scenario;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "twinpath",
    about = "Digital-twin orchestrator: route stimuli to twins, aggregate outcomes, publish units of work",
    version,
    propagate_version = true
)]
struct Cli {
    /// Orchestrator config file (default: built-in settings)
    #[arg(long, global = true, env = "TWINPATH_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log pipeline activity at info level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and validate orchestrator configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run a scenario file end to end and print every published unit of work
    Simulate {
        /// Scenario YAML (behaviours, forwarders, units of work)
        scenario: PathBuf,

        /// Give up if not every unit of work is published within this many milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
        Commands::Simulate {
            scenario,
            timeout_ms,
        } => cmd::simulate::run(config_path, &scenario, timeout_ms, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
