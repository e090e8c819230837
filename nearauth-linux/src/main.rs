// nearauth Linux daemon: offer listener, control socket, session channels, continuous reauthentication.

mod config;
mod control;
mod handshake;
mod listener;
mod pairings;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use nearauth_core::{Authenticator, LogNotifier};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("nearauth-linux {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument {other:?} (usage: nearauth-linux [--config <path>] [--version])"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load(config_path.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::DaemonConfig) -> anyhow::Result<()> {
    let pairings = Arc::new(
        pairings::FilePairingStore::load_or_empty(&cfg.pairings_file)
            .with_context(|| format!("loading pairings from {}", cfg.pairings_file.display()))?,
    );
    let handshake = Arc::new(handshake::SharedSecretHandshake::new(pairings.clone()));
    let factory = transport::factory_from_config(&cfg.channel);
    let authenticator = Arc::new(Authenticator::new(
        &cfg.auth,
        pairings.clone(),
        handshake,
        factory.clone(),
        Arc::new(LogNotifier),
    ));

    let tcp = tokio::net::TcpListener::bind(("0.0.0.0", cfg.listen_port))
        .await
        .with_context(|| format!("binding offer listener on port {}", cfg.listen_port))?;
    tracing::info!(
        version = VERSION,
        port = cfg.listen_port,
        mode = ?authenticator.mode(),
        channel = factory.kind(),
        pairings = pairings.len(),
        "nearauth daemon started"
    );
    let control = control::bind(&cfg.control_socket)?;
    tracing::info!(socket = %cfg.control_socket.display(), "control socket ready");
    let accept = tokio::spawn(listener::run_listener(
        tcp,
        authenticator.clone(),
        listener::OFFER_READ_TIMEOUT,
    ));
    let commands = tokio::spawn(control::serve(control, authenticator.clone()));

    let registry = authenticator.registry().clone();
    if cfg.exit_when_idle {
        tokio::select! {
            r = shutdown_signal() => r?,
            _ = registry.wait_idle() => tracing::info!("last session closed; exiting"),
        }
    } else {
        shutdown_signal().await?;
    }

    accept.abort();
    commands.abort();
    if let Err(e) = std::fs::remove_file(&cfg.control_socket) {
        tracing::debug!(error = %e, "control socket not removed");
    }
    for session in registry.all_sessions() {
        let _ = registry.close_session(session.id);
    }
    tracing::info!("nearauth daemon stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
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
