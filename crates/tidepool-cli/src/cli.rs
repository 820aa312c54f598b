use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "tidepool",
    about = "Check and exercise database connection pools",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a data source configuration and print it
    Check {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: String,
        /// Also open one pooled connection and run the ping query
        #[arg(long)]
        connect: bool,
    },
    /// Run a concurrent acquire/release workload and print pool statistics.
    ///
    /// Each thread repeatedly acquires a connection, runs the configured
    /// ping query (or `SELECT 1`), holds the connection and releases it.
    Bench {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: String,
        /// Number of worker threads
        #[arg(short, long, default_value_t = 8)]
        threads: usize,
        /// Acquire/release cycles per thread
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
        /// How long each checkout is held, in milliseconds
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tidepool=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config, connect } => commands::check::check(&config, connect),
        Commands::Bench {
            config,
            threads,
            iterations,
            hold_ms,
            format,
        } => commands::bench::bench(
            &config,
            commands::bench::Workload {
                threads,
                iterations,
                hold_ms,
            },
            format,
        ),
    }
}
