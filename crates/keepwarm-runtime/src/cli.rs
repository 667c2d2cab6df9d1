//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keepwarm_core::defaults::DEFAULT_SLEEP_AFTER;
use keepwarm_core::parse_duration;

#[derive(Parser)]
#[command(name = "keepwarm", about = "keep one backend process warm while it is in use")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Supervise a backend command and proxy requests to it
    Serve(ServeOpts),
    /// Decode an event stream and print classified events as JSON lines
    Decode(DecodeOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// Address the front server listens on
    #[arg(long, default_value = "127.0.0.1:8080", env = "KEEPWARM_LISTEN")]
    pub listen: SocketAddr,

    /// Idle time without activity before the backend is stopped (e.g. 10m, 90s)
    #[arg(long, default_value = DEFAULT_SLEEP_AFTER, value_parser = parse_duration, env = "KEEPWARM_SLEEP_AFTER")]
    pub sleep_after: Duration,

    /// How long the backend may take to accept connections
    #[arg(long, default_value = "30000")]
    pub startup_timeout_ms: u64,

    /// How long to wait for the backend's response headers
    #[arg(long, default_value = "30000")]
    pub response_timeout_ms: u64,

    /// Backend command and its arguments
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

#[derive(clap::Args)]
pub struct DecodeOpts {
    /// Input file (default: stdin)
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_takes_command_after_separator() {
        let cli = Cli::try_parse_from([
            "keepwarm", "serve", "--listen", "0.0.0.0:9000", "--", "opencode", "serve", "--port", "2633",
        ])
        .unwrap();
        let Command::Serve(opts) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.listen.port(), 9000);
        assert_eq!(opts.startup_timeout_ms, 30_000);
        assert_eq!(opts.response_timeout_ms, 30_000);
        assert_eq!(opts.sleep_after, keepwarm_core::defaults::DEFAULT_IDLE_TIMEOUT);
        assert_eq!(opts.command, vec!["opencode", "serve", "--port", "2633"]);
    }

    #[test]
    fn sleep_after_accepts_duration_strings() {
        let cli = Cli::try_parse_from(["keepwarm", "serve", "--sleep-after", "90s", "--", "sleep", "60"]).unwrap();
        let Command::Serve(opts) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.sleep_after, Duration::from_secs(90));

        assert!(Cli::try_parse_from(["keepwarm", "serve", "--sleep-after", "5d", "--", "sleep"]).is_err());
    }

    #[test]
    fn serve_requires_command() {
        assert!(Cli::try_parse_from(["keepwarm", "serve"]).is_err());
    }

    #[test]
    fn decode_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["keepwarm", "decode"]).unwrap();
        assert!(matches!(cli.command, Command::Decode(DecodeOpts { file: None })));
    }
}
