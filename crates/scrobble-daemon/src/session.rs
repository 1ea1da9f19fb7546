//! Remote session abstraction: the typed action set plus the traits the
//! proxy uses to open and drive a backend session.

use async_trait::async_trait;
use std::fmt;

use crate::error::RemoteError;

/// API key, secret and session key for one account.  All three or nothing.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub session_key: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            session_key: session_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("session_key", &"<redacted>")
            .finish()
    }
}

/// Who picked the track.  Only user-chosen plays are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrobbleSource {
    #[default]
    User,
}

impl ScrobbleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrobbleSource::User => "user",
        }
    }
}

/// What happened to the track.  Only completed plays are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrobbleMode {
    #[default]
    Played,
}

impl ScrobbleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrobbleMode::Played => "played",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scrobble {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub duration: u32,
    /// Seconds since the epoch.
    pub started_at: i64,
    pub source: ScrobbleSource,
    pub mode: ScrobbleMode,
}

impl Scrobble {
    pub fn new(artist: String, album: String, title: String, duration: u32, started_at: i64) -> Self {
        Self {
            artist,
            album,
            title,
            duration,
            started_at,
            source: ScrobbleSource::User,
            mode: ScrobbleMode::Played,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub artist: String,
    pub album: String,
    pub title: String,
    /// `None` is sent as an empty value, never as zero.
    pub duration: Option<u32>,
}

impl NowPlaying {
    pub fn new(artist: String, album: String, title: String, duration: u32) -> Self {
        Self {
            artist,
            album,
            title,
            duration: (duration > 0).then_some(duration),
        }
    }
}

/// One remote action waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Scrobble(Scrobble),
    NowPlaying(NowPlaying),
}

impl PendingAction {
    /// Name used in log lines and in "Failed to <name> track" alerts.
    pub fn name(&self) -> &'static str {
        match self {
            PendingAction::Scrobble(_) => "scrobble",
            PendingAction::NowPlaying(_) => "report_now_playing",
        }
    }

    pub async fn run<S: RemoteSession + ?Sized>(&self, session: &S) -> Result<(), RemoteError> {
        match self {
            PendingAction::Scrobble(scrobble) => session.scrobble(scrobble).await,
            PendingAction::NowPlaying(track) => session.update_now_playing(track).await,
        }
    }
}

/// A live, authenticated handle to one backend.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn scrobble(&self, scrobble: &Scrobble) -> Result<(), RemoteError>;

    async fn update_now_playing(&self, track: &NowPlaying) -> Result<(), RemoteError>;
}

/// Opens sessions for a (network, credentials) pair.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: RemoteSession;

    async fn connect(
        &self,
        network: &str,
        credentials: &Credentials,
    ) -> Result<Self::Session, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_normalized_to_none() {
        let track = NowPlaying::new("A".into(), "B".into(), "C".into(), 0);
        assert_eq!(track.duration, None);
        let track = NowPlaying::new("A".into(), "B".into(), "C".into(), 212);
        assert_eq!(track.duration, Some(212));
    }

    #[test]
    fn test_scrobble_has_fixed_source_and_mode() {
        let scrobble = Scrobble::new("A".into(), "B".into(), "C".into(), 180, 1_000_000_000);
        assert_eq!(scrobble.source.as_str(), "user");
        assert_eq!(scrobble.mode.as_str(), "played");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("key", "secret", "session");
        let text = format!("{:?}", creds);
        assert!(text.contains("key"));
        assert!(!text.contains("secret\""));
        assert!(!text.contains("session\""));
    }

    #[test]
    fn test_action_names() {
        let scrobble = PendingAction::Scrobble(Scrobble::new(
            "A".into(),
            "B".into(),
            "C".into(),
            1,
            2,
        ));
        let np = PendingAction::NowPlaying(NowPlaying::new("A".into(), "B".into(), "C".into(), 0));
        assert_eq!(scrobble.name(), "scrobble");
        assert_eq!(np.name(), "report_now_playing");
    }
}
