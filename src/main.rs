use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use watch_party_relay::config::{RelayConfig, DEFAULT_PORT};
use watch_party_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(version, about)]
struct CliArgs {
    /// The port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .context("failed to install the tracing subscriber")?;

    let config = RelayConfig::default().with_port(cli_args.port);
    let server = RelayServer::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.socket_addr()))?;

    server
        .serve_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => {
                    warn!("cannot listen for ctrl-c, running until killed: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("relay server failed")?;

    info!("relay stopped");
    Ok(())
}
