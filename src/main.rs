//! vibequery server - executes portable query trees sent over TCP

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use log::info;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vibequery::network::{QueryServer, ServerConfig, DEFAULT_PORT};
use vibequery::service::{demo, DataStore, QueryService};

/// vibequery server - runs remote queries against an in-memory store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Maximum concurrent connections
    #[arg(short = 'c', long, default_value = "100")]
    max_connections: usize,

    /// Start with an empty store instead of the demo customers
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let store = if args.no_seed {
        DataStore::new()
    } else {
        demo::store().context("Failed to seed demo data")?
    };
    info!("Resources: {:?}", store.names());
    let service = Arc::new(QueryService::new(Arc::new(demo::registry()), Arc::new(store)));

    let addr = SocketAddr::from((
        args.host
            .parse::<IpAddr>()
            .context("Invalid host address")?,
        args.port,
    ));
    let server = QueryServer::new(
        service,
        ServerConfig {
            addr,
            max_connections: args.max_connections,
        },
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let mut server_handle = tokio::spawn(async move { server.run(token).await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutting down");
            shutdown.cancel();
            (&mut server_handle)
                .await
                .context("Server task panicked")?
                .context("Server error")?;
        }
        finished = &mut server_handle => {
            finished.context("Server task panicked")?.context("Server error")?;
        }
    }
    Ok(())
}
