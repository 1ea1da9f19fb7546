use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub dbus: DbusConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Extra Audioscrobbler-compatible backends, keyed by network name.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minutes without calls before the daemon exits.  <= 0 never exits.
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_minutes: f64,
    #[serde(default = "default_network")]
    pub default_network: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Run remote calls inline and return their errors to the caller.
    #[serde(default)]
    pub sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_object_path")]
    pub object_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Display timeout in milliseconds; unset leaves it to the notification server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Audioscrobbler 2.0 endpoint, e.g. `https://libre.fm/2.0/`.
    pub api_url: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            activity_timeout_minutes: default_activity_timeout(),
            default_network: default_network(),
            dry_run: false,
            sync: false,
            log_file: None,
        }
    }
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: default_service_name(),
            object_path: default_object_path(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: default_app_name(),
            timeout_ms: None,
        }
    }
}

/// Anything longer (about a century) is treated as "never".
const MAX_ACTIVITY_TIMEOUT_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

fn default_activity_timeout() -> f64 {
    30.0
}

fn default_network() -> String {
    "lastfm".to_string()
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    platform::DBUS_SERVICE_NAME.to_string()
}

fn default_object_path() -> String {
    platform::DBUS_OBJECT_PATH.to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_app_name() -> String {
    "dbus-last.fm".to_string()
}

impl DaemonConfig {
    /// Idle period after which the daemon shuts down, `None` when disabled.
    pub fn activity_timeout(&self) -> Option<Duration> {
        let minutes = self.activity_timeout_minutes;
        if minutes > 0.0 && minutes <= MAX_ACTIVITY_TIMEOUT_MINUTES {
            Duration::try_from_secs_f64(minutes * 60.0).ok()
        } else {
            None
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads `path`, writing a default config there first if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.default_network, "lastfm");
        assert_eq!(
            config.daemon.activity_timeout(),
            Some(Duration::from_secs(30 * 60))
        );
        assert!(!config.daemon.sync);
        assert!(!config.daemon.dry_run);
        assert!(config.dbus.enabled);
        assert_eq!(config.dbus.service_name, "net.fraggod.DBusLastFM");
        assert!(!config.socket.enabled);
        assert!(config.networks.is_empty());
    }

    #[test]
    fn test_non_positive_timeout_disables_watchdog() {
        let mut daemon = DaemonConfig::default();
        daemon.activity_timeout_minutes = 0.0;
        assert_eq!(daemon.activity_timeout(), None);
        daemon.activity_timeout_minutes = -5.0;
        assert_eq!(daemon.activity_timeout(), None);
        daemon.activity_timeout_minutes = 0.5;
        assert_eq!(daemon.activity_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_absurd_timeout_is_treated_as_disabled() {
        let mut daemon = DaemonConfig::default();
        daemon.activity_timeout_minutes = 1.6e17;
        assert_eq!(daemon.activity_timeout(), None);
        daemon.activity_timeout_minutes = f64::INFINITY;
        assert_eq!(daemon.activity_timeout(), None);
        daemon.activity_timeout_minutes = 60.0 * 24.0 * 365.0;
        assert_eq!(
            daemon.activity_timeout(),
            Some(Duration::from_secs(365 * 24 * 3600))
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            sync = true

            [networks.selfhosted]
            api_url = "https://scrobble.example.org/2.0/"
            "#,
        )
        .unwrap();
        assert!(config.daemon.sync);
        assert_eq!(config.daemon.default_network, "lastfm");
        assert_eq!(config.notify.app_name, "dbus-last.fm");
        assert_eq!(
            config.networks["selfhosted"].api_url,
            "https://scrobble.example.org/2.0/"
        );
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = std::env::temp_dir().join(format!("scrobbled-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_dir_all(&dir);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.daemon.default_network, "lastfm");

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.dbus.object_path, config.dbus.object_path);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
