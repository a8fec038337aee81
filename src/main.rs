use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lexkv::{DictionaryConfig, DictionaryNode, NamingConfig, NamingServer};

#[derive(Parser, Debug)]
#[command(name = "lexkv", about = "Distributed dictionary services")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the naming service.
    Naming {
        #[arg(long, env = "NAMING_HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "NAMING_PORT", default_value_t = 8000)]
        port: u16,

        /// Seconds without a heartbeat before an instance counts as dead.
        #[arg(long, env = "TTL_SECONDS", default_value_t = 20)]
        ttl_seconds: u64,

        /// Extra seconds tolerated on top of the TTL before pruning.
        #[arg(long, env = "HEARTBEAT_GRACE", default_value_t = 10)]
        heartbeat_grace: u64,

        #[arg(long, env = "PRUNE_INTERVAL_SECONDS", default_value_t = 3)]
        prune_interval_seconds: u64,
    },
    /// Run a dictionary manager instance.
    Dictionary {
        #[arg(long, env = "SERVER_NAME", default_value = "server1")]
        name: String,

        #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "SERVER_PORT", default_value_t = 9000)]
        port: u16,

        /// Host other processes use to reach this instance.
        #[arg(long, env = "ADVERTISE_HOST", default_value = "127.0.0.1")]
        advertise_host: String,

        #[arg(long, env = "DATA_FILE", default_value = "./dictionary.json")]
        data_file: PathBuf,

        #[arg(long, env = "NAMING_ADDR", default_value = "127.0.0.1:8000")]
        naming_addr: String,

        #[arg(long, env = "HEARTBEAT_SECONDS", default_value_t = 5)]
        heartbeat_seconds: u64,

        /// Roll back transactions idle for this many seconds. Disabled when unset.
        #[arg(long, env = "IDLE_TXN_SECONDS")]
        idle_txn_seconds: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    match Args::parse().command {
        Command::Naming {
            host,
            port,
            ttl_seconds,
            heartbeat_grace,
            prune_interval_seconds,
        } => {
            let config = NamingConfig::new(format!("{host}:{port}"))
                .with_ttl(Duration::from_secs(ttl_seconds))
                .with_grace(Duration::from_secs(heartbeat_grace))
                .with_prune_interval(Duration::from_secs(prune_interval_seconds));
            info!("starting naming service with config {:?}", config);

            let server = NamingServer::bind(config)
                .await
                .context("bind naming listener")?;
            server.serve_with_shutdown(shutdown_signal()).await?;
        }
        Command::Dictionary {
            name,
            host,
            port,
            advertise_host,
            data_file,
            naming_addr,
            heartbeat_seconds,
            idle_txn_seconds,
        } => {
            let config = DictionaryConfig::new(name, format!("{host}:{port}"))
                .with_advertise_host(advertise_host)
                .with_snapshot(data_file)
                .with_naming_addr(naming_addr)
                .with_heartbeat_interval(Duration::from_secs(heartbeat_seconds))
                .with_idle_txn_timeout(idle_txn_seconds.map(Duration::from_secs));
            info!("starting dictionary node with config {:?}", config);

            let node = DictionaryNode::start(config)
                .await
                .context("start dictionary node")?;
            node.run_until_shutdown(shutdown_signal()).await?;
        }
    }

    Ok(())
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal support; run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
