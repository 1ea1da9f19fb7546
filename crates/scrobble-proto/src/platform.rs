use std::path::PathBuf;

/// Well-known D-Bus name players already talk to.
pub const DBUS_SERVICE_NAME: &str = "net.fraggod.DBusLastFM";
pub const DBUS_OBJECT_PATH: &str = "/net/fraggod/DBusLastFM";

pub const DAEMON_TCP_PORT: u16 = 9877;
const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", DAEMON_TCP_HOST, DAEMON_TCP_PORT)
}

pub fn config_dir() -> PathBuf {
    // Honour XDG_CONFIG_HOME when set, otherwise ~/.config/scrobbled/
    #[cfg(unix)]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return PathBuf::from(xdg).join("scrobbled");
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("scrobbled")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scrobbled")
    }
}
