//! spike-bridge command line: run a loopback session over a UDP bus, or poke
//! the bus by hand.

mod app;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "spike-bridge")]
#[command(version)]
#[command(about = "Bridge bus values and spike timings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bidirectional interface against the loopback substrate
    Run(RunArgs),
    /// Publish one value on a topic
    Send(SendArgs),
    /// Print values arriving on a topic
    Listen(ListenArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Interface configuration (JSON); defaults apply to missing fields
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Local address the bus listens on
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub bind: SocketAddr,
    /// Address published values are sent to
    #[arg(long, default_value = "127.0.0.1:7001")]
    pub peer: SocketAddr,
    /// Session length in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub duration_ms: u64,
    /// Override the configured neuron count
    #[arg(long)]
    pub n_neurons: Option<usize>,
    /// Print a timing report at the end
    #[arg(long)]
    pub benchmark: bool,
    /// Write what the engines recorded to this file (JSON)
    #[arg(long)]
    pub record: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct SendArgs {
    /// Destination bus address
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub peer: SocketAddr,
    #[arg(long, default_value = spike_bridge::config::DEFAULT_TOPIC_IN)]
    pub topic: String,
    /// JSON number or array, e.g. `20` or `[50, 10]`
    pub value: String,
    /// Send the value this many times
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,
    /// Pause between repeats in milliseconds
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,
}

#[derive(clap::Args)]
pub struct ListenArgs {
    /// Local address to receive on
    #[arg(long, default_value = "127.0.0.1:7001")]
    pub bind: SocketAddr,
    #[arg(long, default_value = spike_bridge::config::DEFAULT_TOPIC_OUT)]
    pub topic: String,
    /// Stop after this many values
    #[arg(long)]
    pub count: Option<u64>,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run(args) => app::run(args),
        Commands::Send(args) => app::send(args),
        Commands::Listen(args) => app::listen(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_send() {
        let cli = Cli::try_parse_from(["spike-bridge", "send", "--topic", "x", "[1, 2]"]).unwrap();
        match cli.command {
            Commands::Send(a) => {
                assert_eq!(a.topic, "x");
                assert_eq!(a.value, "[1, 2]");
                assert_eq!(a.repeat, 1);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "spike-bridge",
            "run",
            "--duration-ms",
            "250",
            "--n-neurons",
            "3",
            "--benchmark",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(a) => {
                assert_eq!(a.duration_ms, 250);
                assert_eq!(a.n_neurons, Some(3));
                assert!(a.benchmark);
                assert!(a.config.is_none());
            }
            _ => panic!("expected run"),
        }
    }
}
