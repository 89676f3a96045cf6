use clap::{Parser, Subcommand};
use std::path::Path;

use weatherfeed::cli::commands;
use weatherfeed::cli::logging::init_logging;
use weatherfeed::config::SimulationConfig;

#[derive(Parser)]
#[command(name = "weatherfeed")]
#[command(about = "A synthetic weather feed that uploads diurnal readings to object storage and a dashboard")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults apply when it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate readings and deliver them to the configured sinks
    Run {
        /// Stop after this many ticks instead of running until Ctrl-C
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Print readings to stdout as JSON lines without uploading
    Sample {
        /// Number of readings to generate
        #[arg(short = 'n', long, default_value_t = 12)]
        count: u64,

        /// Simulated minute to start from
        #[arg(short, long)]
        start_minute: Option<u64>,

        /// Disable random noise and print the pure diurnal signal
        #[arg(long)]
        no_noise: bool,
    },

    /// Start the dashboard API
    Serve,

    /// Inspect stored readings
    Readings {
        #[command(subcommand)]
        action: ReadingsAction,
    },
}

#[derive(Subcommand)]
enum ReadingsAction {
    /// List stored readings, newest first
    List {
        /// Maximum number of rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the newest stored reading
    Latest,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match SimulationConfig::load(Path::new(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log_level, &config.log_format);

    let result = match cli.command {
        Commands::Run { ticks } => commands::run_simulation(&config, ticks).await,
        Commands::Sample {
            count,
            start_minute,
            no_noise,
        } => commands::sample(&config, count, start_minute, no_noise),
        Commands::Serve => commands::serve(&config).await,
        Commands::Readings { action } => match action {
            ReadingsAction::List { limit } => commands::list_readings(&config, limit).await,
            ReadingsAction::Latest => commands::latest_reading(&config).await,
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
