//! The call proxy: owns credentials, network selection, the lazily opened
//! remote session and the idle watchdog, and decides how each action is
//! dispatched.
//!
//! ```text
//!   invoke(action)
//!     ├─ watchdog.reset()                  always
//!     ├─ dry run?        → Completed(Ok)
//!     ├─ Sync, no creds  → Completed(NoAuth), no alert
//!     ├─ Sync            → execute now → Completed(result)
//!     └─ Async           → Deferred(action), caller gets Ok right away
//!
//!   execute(action)
//!     ├─ no credentials  → NoAuth
//!     ├─ no session      → factory.connect(network, credentials)
//!     ├─ action.run(session)
//!     └─ on error        → log + critical alert
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::ProxyError;
use crate::notify::{Alert, NotificationSink};
use crate::session::{Credentials, PendingAction, SessionFactory};
use crate::watchdog::IdleWatchdog;

/// How remote work relates to the IPC call that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run before replying; errors go back to the caller.
    Sync,
    /// Reply at once; run on the next turn of the event loop.
    Async,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub network: String,
    pub mode: DispatchMode,
    pub dry_run: bool,
    pub idle_timeout: Option<Duration>,
    /// Dump call data alongside failures.
    pub verbose: bool,
}

/// What `invoke` did with an action.
#[derive(Debug)]
pub enum Invocation {
    Completed(Result<(), ProxyError>),
    /// The caller must queue this and hand it to `run_deferred` later.
    Deferred(PendingAction),
}

pub struct CallProxy<F: SessionFactory> {
    factory: F,
    notifier: Arc<dyn NotificationSink>,
    credentials: Option<Credentials>,
    network: String,
    session: Option<F::Session>,
    mode: DispatchMode,
    dry_run: bool,
    verbose: bool,
    watchdog: IdleWatchdog,
}

impl<F: SessionFactory> CallProxy<F> {
    pub fn new(factory: F, notifier: Arc<dyn NotificationSink>, options: ProxyOptions) -> Self {
        Self {
            factory,
            notifier,
            credentials: None,
            network: options.network,
            session: None,
            mode: options.mode,
            dry_run: options.dry_run,
            verbose: options.verbose,
            watchdog: IdleWatchdog::new(options.idle_timeout),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    /// Drops the session even when `network` is unchanged.
    pub fn set_network(&mut self, network: String) {
        debug!("Got update for network (to {})", network);
        if self.has_session() {
            debug!("Dropping {} session", self.network);
        }
        self.network = network;
        self.session = None;
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        debug!("Got update for API keys");
        if self.has_session() {
            debug!("Dropping {} session", self.network);
        }
        self.credentials = Some(credentials);
        self.session = None;
    }

    pub fn record_activity(&mut self) {
        self.watchdog.reset();
    }

    pub async fn invoke(&mut self, action: PendingAction) -> Invocation {
        self.record_activity();
        if self.dry_run {
            debug!("Dry run, not sending {}: {:?}", action.name(), action);
            return Invocation::Completed(Ok(()));
        }
        match self.mode {
            // The caller gets NO-AUTH back, so no alert on top of it.
            DispatchMode::Sync if !self.is_authenticated() => {
                info!("Rejecting {} call: no credentials yet", action.name());
                Invocation::Completed(Err(ProxyError::NoAuth))
            }
            DispatchMode::Sync => Invocation::Completed(self.execute(&action).await),
            DispatchMode::Async => Invocation::Deferred(action),
        }
    }

    /// Runs a previously deferred action.  Failures were already logged and
    /// alerted, nobody is waiting for the result.
    pub async fn run_deferred(&mut self, action: PendingAction) {
        let _ = self.execute(&action).await;
    }

    async fn execute(&mut self, action: &PendingAction) -> Result<(), ProxyError> {
        debug!("Scrobbler call - {}, args: {:?}", action.name(), action);
        let result = self.try_execute(action).await;
        if let Err(err) = &result {
            self.report_failure(action, err).await;
        }
        result
    }

    async fn try_execute(&mut self, action: &PendingAction) -> Result<(), ProxyError> {
        let credentials = self.credentials.as_ref().ok_or(ProxyError::NoAuth)?;

        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let session = self
                    .factory
                    .connect(&self.network, credentials)
                    .await
                    .map_err(|source| ProxyError::Session {
                        action: action.name(),
                        network: self.network.clone(),
                        source,
                    })?;
                info!("Opened {} session", self.network);
                session
            }
        };

        // A failed action keeps the session; the next call reuses it.
        let result = action.run(&session).await;
        self.session = Some(session);
        result.map_err(|source| ProxyError::Action {
            action: action.name(),
            source,
        })
    }

    async fn report_failure(&self, action: &PendingAction, err: &ProxyError) {
        let title = failure_title(action);
        error!("{}", failure_line(action, err));
        if self.verbose {
            debug!(
                "Call data:\n  method: {}\n  network: {}\n  args: {:?}",
                action.name(),
                self.network,
                action
            );
        }
        self.notifier
            .alert(Alert::critical(title, format!("Error: {}", err.cause())))
            .await;
    }
}

fn failure_title(action: &PendingAction) -> String {
    format!("Failed to {} track", action.name())
}

/// `ProxyError`'s own text already carries the title, so only the cause is
/// appended.
fn failure_line(action: &PendingAction, err: &ProxyError) -> String {
    format!("{}: {}", failure_title(action), err.cause())
}
