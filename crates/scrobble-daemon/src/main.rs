mod core;
mod dbus;
mod error;
mod lastfm;
mod notify;
mod proxy;
mod session;
mod socket;
mod watchdog;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use scrobble_proto::config::Config;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{DaemonCore, DaemonEvent, Shutdown};
use crate::lastfm::LastfmConnector;
use crate::notify::DesktopNotifier;
use crate::proxy::{CallProxy, DispatchMode, ProxyOptions};

/// D-Bus interface to last.fm scrobbling.
#[derive(Debug, Parser)]
#[command(name = "scrobbled", version)]
struct Cli {
    /// No-activity (calls) timeout in minutes before the daemon exits
    /// (less or equal to zero - infinite, default: 30).
    #[arg(short = 't', long, value_name = "MINUTES", allow_negative_numbers = true)]
    activity_timeout: Option<f64>,

    /// Network to use unless overridden by SetNetwork ("lastfm" or "librefm").
    #[arg(long)]
    default_network: Option<String>,

    /// Do not actually send data.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Do synchronous submissions and return errors to callers.
    #[arg(long)]
    sync: bool,

    /// Verbose operation mode.
    #[arg(long)]
    debug: bool,

    /// Config file (default: ~/.config/scrobbled/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not claim the D-Bus name.
    #[arg(long)]
    no_dbus: bool,

    /// Also accept calls on the local TCP socket.
    #[arg(long)]
    socket: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(minutes) = self.activity_timeout {
            config.daemon.activity_timeout_minutes = minutes;
        }
        if let Some(network) = &self.default_network {
            config.daemon.default_network = network.clone();
        }
        config.daemon.dry_run |= self.dry_run;
        config.daemon.sync |= self.sync;
        if self.no_dbus {
            config.dbus.enabled = false;
        }
        config.socket.enabled |= self.socket;
    }
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let default_filter = if debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    cli.apply(&mut config);

    init_logging(cli.debug, config.daemon.log_file.as_deref())?;
    info!("Config loaded from: {:?}", config_path);

    if !config.dbus.enabled && !config.socket.enabled {
        anyhow::bail!("Both D-Bus and socket fronts are disabled, nothing to listen on");
    }

    let notifier = Arc::new(DesktopNotifier::new(&config.notify, cli.debug));
    let connector = LastfmConnector::new(&config.networks)?;
    let proxy = CallProxy::new(
        connector,
        notifier,
        ProxyOptions {
            network: config.daemon.default_network.clone(),
            mode: if config.daemon.sync {
                DispatchMode::Sync
            } else {
                DispatchMode::Async
            },
            dry_run: config.daemon.dry_run,
            idle_timeout: config.daemon.activity_timeout(),
            verbose: cli.debug,
        },
    );

    // Event channel: every front funnels into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<DaemonEvent>(256);

    let _dbus = if config.dbus.enabled {
        Some(dbus::serve(&config.dbus, event_tx.clone()).await?)
    } else {
        None
    };

    let _socket_handle = if config.socket.enabled {
        Some(
            socket::start_server(
                &config.socket.bind_address,
                config.socket.port,
                event_tx.clone(),
            )
            .await?,
        )
    } else {
        None
    };

    info!(
        "Daemon initialised (network={}, sync={}, dry_run={}, idle timeout={:?})",
        config.daemon.default_network,
        config.daemon.sync,
        config.daemon.dry_run,
        config.daemon.activity_timeout()
    );

    drop(event_tx);

    let reason = DaemonCore::new(proxy)
        .run(event_rx, shutdown_signal())
        .await;
    match reason {
        Shutdown::Idle => info!(
            "Exiting due to inactivity timeout ({}m)",
            config.daemon.activity_timeout_minutes
        ),
        Shutdown::Signal => info!("Exiting on signal"),
        Shutdown::Closed => info!("All fronts closed, exiting"),
    }

    Ok(())
}
