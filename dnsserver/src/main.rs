use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use v2router::PlainMatcherBuilder;

mod corefile;
mod server;

/// A DNS forwarding server that routes queries by domain rules.
#[derive(Parser)]
struct Args {
    /// Path to the configuration file containing the `v2router` stanza.
    #[arg(long, short)]
    config: PathBuf,

    /// Socket address to serve UDP DNS queries on.
    #[arg(long, default_value = "127.0.0.1:5353")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();

    let stanza = corefile::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let (router, shutdown) =
        v2router::config::build(&stanza, &PlainMatcherBuilder).context("Failed to build router")?;

    let ctx = CancellationToken::new();

    tokio::select! {
        result = server::serve(args.listen, Arc::new(router), ctx.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received ctrl-c, shutting down");
        }
    }

    ctx.cancel();
    shutdown.trigger();

    Ok(())
}

fn init_logging() -> Result<()> {
    let directives = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    let filter = EnvFilter::try_new(directives).context("Failed to parse LOG_LEVEL")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();

    Ok(())
}
