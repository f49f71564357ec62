//! # Ferrous Gate
//!
//! DNS front end serving UDP, TCP, DoT and DoH listeners in front of a
//! cached query entry.

mod bootstrap;
mod server;

use clap::Parser;
use ferrous_gate_domain::CliOverrides;
use mimalloc::MiMalloc;
use tracing::info;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "ferrous-gate")]
#[command(version)]
#[command(about = "A DNS front end with UDP, TCP, DoT and DoH listeners")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bootstrap::load_config(
        cli.config.as_deref(),
        CliOverrides {
            log_level: cli.log_level,
        },
    )?;
    bootstrap::init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Ferrous Gate starting");

    server::run(config).await
}
