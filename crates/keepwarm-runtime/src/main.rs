//! keepwarm: singleton keepalive supervisor binary.

use clap::Parser;

mod cli;
mod cmd_decode;
mod cmd_serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr; `decode` prints its results on stdout.
    let filter = std::env::var("KEEPWARM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Serve(opts) => cmd_serve::run_serve(opts).await?,
        cli::Command::Decode(opts) => cmd_decode::run_decode(opts).await?,
    }

    Ok(())
}
