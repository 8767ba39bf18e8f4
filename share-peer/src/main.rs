// SharePod peer: file service daemon and interactive console.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use share_core::Catalog;
use share_peer::{config, Console, FileService, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "share-peer")]
#[command(about = "SharePod peer: share a directory and fetch files from other peers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the File Service and optionally register with a Directory Server
    Serve {
        /// Config file (default: ~/.config/sharepod/peer.toml, then /etc/sharepod/peer.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// File Service listen address
        #[arg(long)]
        bind: Option<IpAddr>,

        /// File Service listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory to share
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Directory Server address:port
        #[arg(short, long)]
        directory: Option<String>,

        /// Display name sent to the Directory Server
        #[arg(short, long)]
        username: Option<String>,

        /// address:port other peers use to reach this File Service
        #[arg(long)]
        advertise: Option<String>,

        /// Link speed label (e.g. dial-up, dsl, gigabit)
        #[arg(long)]
        speed: Option<String>,
    },

    /// Interactive console: CONNECT, LIST, RETRIEVE, STORE, DELETE, QUIT
    Shell {
        /// Where retrieved files are written
        #[arg(short, long, default_value = ".")]
        download_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            root,
            directory,
            username,
            advertise,
            speed,
        } => {
            let mut cfg = config::load(config.as_deref())?;
            if let Some(b) = bind {
                cfg.bind = b;
            }
            if let Some(p) = port {
                cfg.port = p;
            }
            if let Some(r) = root {
                cfg.root = r;
            }
            if directory.is_some() {
                cfg.directory = directory;
            }
            if let Some(u) = username {
                cfg.username = u;
            }
            if advertise.is_some() {
                cfg.advertise = advertise;
            }
            if let Some(s) = speed {
                cfg.speed = s;
            }
            rt.block_on(serve(cfg))
        }
        Commands::Shell { download_dir } => rt.block_on(shell(download_dir)),
    }
}

async fn serve(cfg: config::Config) -> Result<()> {
    let service = FileService::bind(&cfg)
        .await
        .with_context(|| format!("binding {}:{}", cfg.bind, cfg.port))?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let service_task = tokio::spawn(service.run(async {
        let _ = stop_rx.await;
    }));

    let mut session = None;
    if let Some(directory) = &cfg.directory {
        let mut s = Session::new(Catalog::new(&cfg.root, cfg.catalog.clone()));
        match s
            .connect(
                directory,
                &cfg.username,
                &cfg.advertised_hostname(),
                &cfg.speed,
            )
            .await
        {
            Ok(msg) => {
                info!(%directory, %msg, "announced catalog");
                session = Some(s);
            }
            Err(e) => warn!(%directory, error = %e, "could not register with directory"),
        }
    }

    shutdown_signal().await?;
    if let Some(mut s) = session {
        s.disconnect().await;
    }
    let _ = stop_tx.send(());
    service_task.await??;
    Ok(())
}

async fn shell(download_dir: PathBuf) -> Result<()> {
    let mut console = Console::new(download_dir);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    while let Some(line) = lines.next_line().await? {
        console.run_line(&line, &mut stdout).await?;
    }
    Ok(())
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
