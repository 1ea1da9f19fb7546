//! Desktop alerts.  Everything here is best effort: it runs from error
//! handling paths, so a broken notification daemon must never turn into a
//! second error.

use std::collections::HashMap;

use async_trait::async_trait;
use scrobble_proto::config::NotifyConfig;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use zbus::zvariant::Value;
use zbus::{proxy, Connection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub critical: bool,
    /// Milliseconds; `None` leaves it to the notification server.
    pub timeout_ms: Option<i32>,
}

impl Alert {
    pub fn critical(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            critical: true,
            timeout_ms: None,
        }
    }

    /// Value of the freedesktop `urgency` hint.
    fn urgency_hint(&self) -> u8 {
        if self.critical {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifications are disabled")]
    Disabled,

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
}

/// Somewhere to show user-facing alerts.  Implementations swallow their
/// own failures.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn alert(&self, alert: Alert);
}

#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications",
    gen_blocking = false
)]
trait Notifications {
    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: &HashMap<&str, &Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

/// freedesktop notification sink.  The session-bus connection is opened on
/// the first alert and kept; a failed open is retried on the next one.
pub struct DesktopNotifier {
    enabled: bool,
    app_name: String,
    default_timeout_ms: Option<i32>,
    verbose: bool,
    proxy: OnceCell<NotificationsProxy<'static>>,
}

impl DesktopNotifier {
    pub fn new(config: &NotifyConfig, verbose: bool) -> Self {
        Self {
            enabled: config.enabled,
            app_name: config.app_name.clone(),
            default_timeout_ms: config.timeout_ms,
            verbose,
            proxy: OnceCell::new(),
        }
    }

    async fn proxy(&self) -> Result<&NotificationsProxy<'static>, NotifyError> {
        self.proxy
            .get_or_try_init(|| async {
                let connection = Connection::session().await?;
                let proxy = NotificationsProxy::new(&connection).await?;
                debug!("Connected to notification server");
                Ok::<_, NotifyError>(proxy)
            })
            .await
    }

    /// Shows `alert`, returning the server-assigned notification id.
    pub async fn try_alert(&self, alert: &Alert) -> Result<u32, NotifyError> {
        if !self.enabled {
            return Err(NotifyError::Disabled);
        }
        let proxy = self.proxy().await?;

        let urgency = Value::from(alert.urgency_hint());
        let mut hints = HashMap::new();
        hints.insert("urgency", &urgency);

        let timeout = alert.timeout_ms.or(self.default_timeout_ms).unwrap_or(-1);
        let id = proxy
            .notify(
                &self.app_name,
                0,
                "",
                &alert.title,
                &alert.body,
                &[],
                &hints,
                timeout,
            )
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifier {
    async fn alert(&self, alert: Alert) {
        match self.try_alert(&alert).await {
            Ok(id) => debug!("Shown notification {} ({})", id, alert.title),
            Err(NotifyError::Disabled) => {
                debug!("Notification suppressed: {}: {}", alert.title, alert.body)
            }
            Err(e) if self.verbose => {
                debug!("Failed to dispatch desktop-notification: {:?} ({:?})", e, alert)
            }
            Err(e) => info!("Failed to dispatch desktop-notification: {}", e),
        }
    }
}
