mod connection;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use scrobble_proto::platform;
use scrobble_proto::protocol::Call;

use crate::connection::DaemonConnection;

/// Talk to a running scrobbled over its local socket.
#[derive(Debug, Parser)]
#[command(name = "scrobble-ctl", version)]
struct Cli {
    /// Daemon socket address.
    #[arg(long, default_value_t = platform::daemon_address())]
    address: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show what the daemon reports on connect.
    Status,
    /// Select the scrobbling network for subsequent calls.
    SetNetwork { network: String },
    /// Supply API credentials and session key.
    Auth {
        api_key: String,
        api_secret: String,
        session_key: String,
    },
    /// Submit a played track.
    Scrobble {
        artist: String,
        album: String,
        title: String,
        /// Track length in seconds.
        #[arg(long, default_value_t = 0)]
        duration: u32,
        /// Unix time the track started (default: now).
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Report the currently playing track.
    NowPlaying {
        artist: String,
        album: String,
        title: String,
        /// Track length in seconds (0 - unknown).
        #[arg(long, default_value_t = 0)]
        duration: u32,
    },
}

impl Command {
    /// `None` for commands answered by the Hello alone.
    fn into_call(self) -> Option<Call> {
        let call = match self {
            Command::Status => return None,
            Command::SetNetwork { network } => Call::SetNetwork { network },
            Command::Auth {
                api_key,
                api_secret,
                session_key,
            } => Call::Auth {
                api_key,
                api_secret,
                session_key,
            },
            Command::Scrobble {
                artist,
                album,
                title,
                duration,
                timestamp,
            } => Call::Scrobble {
                artist,
                album,
                title,
                duration,
                timestamp: timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            },
            Command::NowPlaying {
                artist,
                album,
                title,
                duration,
            } => Call::ReportNowPlaying {
                artist,
                album,
                title,
                duration,
            },
        };
        Some(call)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("scrobble-ctl: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut conn = DaemonConnection::connect(&cli.address).await?;

    match cli.command.into_call() {
        None => {
            let info = conn.info();
            println!("network:       {}", info.network);
            println!("mode:          {}", if info.sync { "sync" } else { "async" });
            println!("authenticated: {}", info.authenticated);
            Ok(())
        }
        Some(call) => conn.call(call).await,
    }
}
