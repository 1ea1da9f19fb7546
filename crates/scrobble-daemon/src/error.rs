use thiserror::Error;

/// Failures talking to a scrobbling backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("{message} (code {code})")]
    Api { code: u32, message: String },

    #[error("scrobble ignored by backend: {0}")]
    Ignored(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Outcome of a failed proxied action.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No `Auth` call has been received yet.
    #[error("NO-AUTH")]
    NoAuth,

    #[error("Failed to {action} track: cannot open {network} session: {source}")]
    Session {
        action: &'static str,
        network: String,
        #[source]
        source: RemoteError,
    },

    #[error("Failed to {action} track: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: RemoteError,
    },
}

impl ProxyError {
    /// Short cause text for the notification body.
    pub fn cause(&self) -> String {
        match self {
            ProxyError::NoAuth => "NO-AUTH".to_string(),
            ProxyError::Session { source, .. } | ProxyError::Action { source, .. } => {
                source.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_text_names_the_action() {
        let err = ProxyError::Action {
            action: "scrobble",
            source: RemoteError::Api {
                code: 9,
                message: "Invalid session key".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Failed to scrobble track: Invalid session key (code 9)"
        );
        assert_eq!(err.cause(), "Invalid session key (code 9)");
    }

    #[test]
    fn test_session_error_keeps_network() {
        let err = ProxyError::Session {
            action: "report_now_playing",
            network: "nope".into(),
            source: RemoteError::UnknownNetwork("nope".into()),
        };
        let text = err.to_string();
        assert!(text.starts_with("Failed to report_now_playing track"));
        assert!(text.contains("unknown network \"nope\""));
    }
}
