// SharePod Directory Server daemon.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use share_directory::{config, DirectoryServer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "share-directory")]
#[command(about = "SharePod Directory Server")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/sharepod/directory.toml, then /etc/sharepod/directory.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        cfg.bind = bind;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = DirectoryServer::bind(&cfg)
            .await
            .with_context(|| format!("binding {}:{}", cfg.bind, cfg.port))?;
        server
            .run(async {
                if let Err(e) = shutdown_signal().await {
                    tracing::error!(error = %e, "signal handler failed");
                }
            })
            .await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
