//! In-memory stand-ins for the backend and the notification server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::notify::{Alert, NotificationSink};
use crate::session::{
    Credentials, NowPlaying, PendingAction, RemoteSession, Scrobble, SessionFactory,
};

/// Shared record of everything the stub backend saw.
#[derive(Default)]
pub struct StubLog {
    connects: Mutex<Vec<(String, Credentials)>>,
    actions: Mutex<Vec<PendingAction>>,
}

impl StubLog {
    pub fn connects(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn last_network(&self) -> Option<String> {
        self.connects
            .lock()
            .unwrap()
            .last()
            .map(|(network, _)| network.clone())
    }

    pub fn actions(&self) -> Vec<PendingAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct StubFactory {
    pub log: Arc<StubLog>,
    fail_connect: bool,
    fail_actions: bool,
}

impl StubFactory {
    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn failing_actions() -> Self {
        Self {
            fail_actions: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SessionFactory for StubFactory {
    type Session = StubSession;

    async fn connect(
        &self,
        network: &str,
        credentials: &Credentials,
    ) -> Result<StubSession, RemoteError> {
        self.log
            .connects
            .lock()
            .unwrap()
            .push((network.to_string(), credentials.clone()));
        if self.fail_connect {
            return Err(RemoteError::UnknownNetwork(network.to_string()));
        }
        Ok(StubSession {
            log: self.log.clone(),
            fail: self.fail_actions,
        })
    }
}

pub struct StubSession {
    log: Arc<StubLog>,
    fail: bool,
}

impl StubSession {
    fn record(&self, action: PendingAction) -> Result<(), RemoteError> {
        self.log.actions.lock().unwrap().push(action);
        if self.fail {
            Err(RemoteError::Api {
                code: 11,
                message: "Service Offline".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteSession for StubSession {
    async fn scrobble(&self, scrobble: &Scrobble) -> Result<(), RemoteError> {
        self.record(PendingAction::Scrobble(scrobble.clone()))
    }

    async fn update_now_playing(&self, track: &NowPlaying) -> Result<(), RemoteError> {
        self.record(PendingAction::NowPlaying(track.clone()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn alert(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
