use std::path::PathBuf;

use clap::Parser;
use eyre::{Result, WrapErr};
use mero_keyx::config::{load_config, load_env_config};
use mero_keyx::server::{build_state, shutdown_signal, start_server};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Calimero Key Exchange Service
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Bind address for the server, a host (`0.0.0.0`) or host and port
    #[clap(short, long, value_parser, env = "SERVER_ADDR")]
    bind: Option<String>,

    /// Port to listen on, replacing the port of the bind address
    #[clap(short, long, value_parser, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Enable verbose logging (can be specified multiple times)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mero_keyx=info,tower_http=debug".into()),
        1 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        load_config(config_path)
            .wrap_err_with(|| format!("failed to load {}", config_path.display()))?
    } else {
        info!("No configuration file given, using defaults and environment");
        load_env_config().wrap_err("failed to load configuration from environment")?
    };

    config.apply_bind_overrides(cli.bind.as_deref(), cli.port)?;

    info!("Starting key exchange service");
    let state = build_state(config).await?;

    let listener = TcpListener::bind(state.config.listen_addr).await?;

    tokio::select! {
        result = start_server(listener, state) => {
            if let Err(err) = result {
                eprintln!("Server error: {err}");
                return Err(err);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, shutting down");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use mero_keyx::config::default_config;

    use super::*;

    #[test]
    fn test_host_only_bind_with_separate_port() {
        let cli =
            Cli::try_parse_from(["mero-keyx", "--bind", "0.0.0.0", "--port", "3000"]).unwrap();

        let mut config = default_config();
        config
            .apply_bind_overrides(cli.bind.as_deref(), cli.port)
            .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
    }
}
