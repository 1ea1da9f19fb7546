use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Calls sent from a client to the daemon.  Mirrors the D-Bus method set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call")]
pub enum Call {
    SetNetwork {
        network: String,
    },
    Auth {
        api_key: String,
        api_secret: String,
        session_key: String,
    },
    Scrobble {
        artist: String,
        album: String,
        title: String,
        duration: u32,
        /// Seconds since the epoch when playback started.
        timestamp: i64,
    },
    ReportNowPlaying {
        artist: String,
        album: String,
        title: String,
        /// 0 means unknown.
        duration: u32,
    },
}

impl Call {
    /// D-Bus style method name, used in logs.
    pub fn method_name(&self) -> &'static str {
        match self {
            Call::SetNetwork { .. } => "SetNetwork",
            Call::Auth { .. } => "Auth",
            Call::Scrobble { .. } => "Scrobble",
            Call::ReportNowPlaying { .. } => "ReportNowPlaying",
        }
    }
}

/// Messages sent from the daemon back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum Reply {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        network: String,
        /// True when the daemon reports remote failures back to callers.
        sync: bool,
        /// Credentials have been supplied via `Auth`.
        #[serde(default)]
        authenticated: bool,
    },
    Ok,
    Error {
        message: String,
    },
}

/// Largest JSON payload accepted in one frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Call(Call),
    Reply(Reply),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(frame_len) = Self::frame_len(data)? else {
            anyhow::bail!("Insufficient data for message");
        };
        let msg: Self = serde_json::from_slice(&data[4..frame_len])?;
        Ok((msg, frame_len))
    }

    /// Total length (header included) of the frame at the start of `data`,
    /// or `None` while it is still incomplete.  Fails for a header announcing
    /// more than `MAX_FRAME_LEN` bytes; such a stream cannot be resynced.
    pub fn frame_len(data: &[u8]) -> anyhow::Result<Option<usize>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        Ok(Some(4 + len))
    }
}
