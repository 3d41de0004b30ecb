use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uptick_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    uptick_cli::run(cli).await
}

/// Logs go to stderr so `--format json` output stays parseable.
fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
