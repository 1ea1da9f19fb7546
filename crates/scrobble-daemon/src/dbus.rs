//! Session-bus front.  Method names and signatures match what existing
//! players already call: `SetNetwork(s)`, `Auth(sss)`, `Scrobble(sssud)`,
//! `ReportNowPlaying(sssu)`.

use anyhow::Context;
use scrobble_proto::config::DbusConfig;
use scrobble_proto::protocol::Call;
use tokio::sync::mpsc;
use tracing::{debug, info};
use zbus::{connection, fdo, interface, Connection};

use crate::core::{submit, DaemonEvent};

pub struct ScrobblerInterface {
    events: mpsc::Sender<DaemonEvent>,
}

impl ScrobblerInterface {
    pub fn new(events: mpsc::Sender<DaemonEvent>) -> Self {
        Self { events }
    }

    async fn forward(&self, call: Call) -> fdo::Result<()> {
        let method = call.method_name();
        let result = submit(&self.events, call)
            .await
            .map_err(|e| fdo::Error::Failed(e.to_string()))?;
        result.map_err(|e| {
            debug!("{} failed: {}", method, e);
            fdo::Error::Failed(e.to_string())
        })
    }
}

#[interface(name = "net.fraggod.DBusLastFM")]
impl ScrobblerInterface {
    async fn set_network(&self, network: String) -> fdo::Result<()> {
        self.forward(Call::SetNetwork { network }).await
    }

    async fn auth(
        &self,
        api_key: String,
        api_secret: String,
        session_key: String,
    ) -> fdo::Result<()> {
        self.forward(Call::Auth {
            api_key,
            api_secret,
            session_key,
        })
        .await
    }

    async fn scrobble(
        &self,
        artist: String,
        album: String,
        title: String,
        duration: u32,
        ts: f64,
    ) -> fdo::Result<()> {
        self.forward(Call::Scrobble {
            artist,
            album,
            title,
            duration,
            timestamp: timestamp_from_dbus(ts),
        })
        .await
    }

    async fn report_now_playing(
        &self,
        artist: String,
        album: String,
        title: String,
        duration: u32,
    ) -> fdo::Result<()> {
        self.forward(Call::ReportNowPlaying {
            artist,
            album,
            title,
            duration,
        })
        .await
    }
}

/// Players send the start time as a double; the backend wants whole seconds.
fn timestamp_from_dbus(ts: f64) -> i64 {
    ts.trunc() as i64
}

/// Registers the interface, then claims the well-known name.  Dropping the
/// returned connection releases the name.
pub async fn serve(config: &DbusConfig, events: mpsc::Sender<DaemonEvent>) -> anyhow::Result<Connection> {
    let connection = connection::Builder::session()?
        .build()
        .await
        .context("Failed to connect to the session bus")?;

    connection
        .object_server()
        .at(config.object_path.as_str(), ScrobblerInterface::new(events))
        .await
        .context("Failed to serve scrobbler interface")?;

    connection
        .request_name(config.service_name.as_str())
        .await
        .with_context(|| format!("Failed to request D-Bus name {}", config.service_name))?;

    info!(
        "D-Bus service {} at {}",
        config.service_name, config.object_path
    );
    Ok(connection)
}
