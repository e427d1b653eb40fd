use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkhound::cli::{self, Cli};

fn main() {
    // Parse CLI first to check verbose flag
    let cli = Cli::parse();

    // Log to stderr to keep stdout clean: on the MCP stdio transport it
    // carries protocol frames exclusively
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(cli::run_with(cli));
}
