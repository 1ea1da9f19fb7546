//! Audioscrobbler 2.0 web-service client.
//!
//! Last.fm and Libre.fm speak the same signed-POST API, so a "network" is
//! just a name for an API root URL.  Extra roots can be declared in the
//! config under `[networks.<name>]`.
//!
//! Signing: every parameter except `format` is sorted by key, concatenated
//! as `key value key value ...` with no separators, the API secret is
//! appended and the md5 hex digest is sent as `api_sig`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::Client;
use scrobble_proto::config::NetworkConfig;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::session::{
    Credentials, NowPlaying, RemoteSession, Scrobble, ScrobbleSource, SessionFactory,
};

pub const LASTFM_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
pub const LIBREFM_API_URL: &str = "https://libre.fm/2.0/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Params = Vec<(&'static str, String)>;

// ── Connector ─────────────────────────────────────────────────────────────────

/// Resolves network names and hands out sessions sharing one HTTP client.
pub struct LastfmConnector {
    client: Client,
    networks: BTreeMap<String, String>,
}

impl LastfmConnector {
    pub fn new(extra: &BTreeMap<String, NetworkConfig>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("scrobbled/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut networks = BTreeMap::new();
        networks.insert("lastfm".to_string(), LASTFM_API_URL.to_string());
        networks.insert("librefm".to_string(), LIBREFM_API_URL.to_string());
        for (name, network) in extra {
            networks.insert(name.clone(), network.api_url.clone());
        }

        Ok(Self { client, networks })
    }

    pub fn api_url(&self, network: &str) -> Option<&str> {
        self.networks.get(network).map(String::as_str)
    }
}

#[async_trait]
impl SessionFactory for LastfmConnector {
    type Session = LastfmSession;

    async fn connect(
        &self,
        network: &str,
        credentials: &Credentials,
    ) -> Result<LastfmSession, RemoteError> {
        let api_url = self
            .api_url(network)
            .ok_or_else(|| RemoteError::UnknownNetwork(network.to_string()))?;
        debug!("Using {} backend at {}", network, api_url);
        Ok(LastfmSession {
            client: self.client.clone(),
            api_url: api_url.to_string(),
            credentials: credentials.clone(),
        })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct LastfmSession {
    client: Client,
    api_url: String,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

impl LastfmSession {
    /// Adds auth fields and the signature; `format` goes last, unsigned.
    fn signed_params(&self, method: &str, mut params: Params) -> Params {
        params.push(("method", method.to_string()));
        params.push(("api_key", self.credentials.api_key.clone()));
        params.push(("sk", self.credentials.session_key.clone()));
        params.sort_by(|a, b| a.0.cmp(b.0));
        let sig = api_signature(&params, &self.credentials.api_secret);
        params.push(("api_sig", sig));
        params.push(("format", "json".to_string()));
        params
    }

    async fn call(&self, method: &str, params: Params) -> Result<Value, RemoteError> {
        let form = self.signed_params(method, params);
        let response = self.client.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&text) {
            return Err(RemoteError::Api {
                code: err.error,
                message: err.message,
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemoteSession for LastfmSession {
    async fn scrobble(&self, scrobble: &Scrobble) -> Result<(), RemoteError> {
        debug!(
            "Scrobbling {} - {} (source={}, mode={})",
            scrobble.artist,
            scrobble.title,
            scrobble.source.as_str(),
            scrobble.mode.as_str()
        );
        let body = self.call("track.scrobble", scrobble_params(scrobble)).await?;
        check_scrobble_accepted(&body)
    }

    async fn update_now_playing(&self, track: &NowPlaying) -> Result<(), RemoteError> {
        self.call("track.updateNowPlaying", now_playing_params(track))
            .await
            .map(|_| ())
    }
}

// ── Request building ──────────────────────────────────────────────────────────

pub fn api_signature(params: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Md5::new();
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn scrobble_params(scrobble: &Scrobble) -> Params {
    let mut params = vec![
        ("artist", scrobble.artist.clone()),
        ("album", scrobble.album.clone()),
        ("track", scrobble.title.clone()),
        ("duration", scrobble.duration.to_string()),
        ("timestamp", scrobble.started_at.to_string()),
    ];
    if scrobble.source == ScrobbleSource::User {
        params.push(("chosenByUser", "1".to_string()));
    }
    params
}

fn now_playing_params(track: &NowPlaying) -> Params {
    vec![
        ("artist", track.artist.clone()),
        ("album", track.album.clone()),
        ("track", track.title.clone()),
        (
            "duration",
            track.duration.map(|d| d.to_string()).unwrap_or_default(),
        ),
    ]
}

/// The API answers 200 even for ignored scrobbles; dig out the counter.
fn check_scrobble_accepted(body: &Value) -> Result<(), RemoteError> {
    let scrobbles = &body["scrobbles"];
    let ignored = match &scrobbles["@attr"]["ignored"] {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    };
    if ignored == 0 {
        return Ok(());
    }

    let message = &scrobbles["scrobble"]["ignoredMessage"];
    let reason = message["#text"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| message["code"].as_str().map(|c| format!("code {}", c)))
        .unwrap_or_else(|| "no reason given".to_string());
    Err(RemoteError::Ignored(reason))
}
