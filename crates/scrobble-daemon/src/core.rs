//! Daemon event loop.
//!
//! Every front (D-Bus, TCP socket) funnels calls into one mpsc channel.
//! A single task owns the `CallProxy` and a FIFO of deferred actions, so
//! proxy state is only ever touched from here and remote calls never
//! overlap.
//!
//! ```text
//!   dbus / socket ──DaemonEvent──► run() ──► CallProxy
//!                                   │  ▲
//!                                   ▼  │
//!                               deferred queue
//! ```

use std::collections::VecDeque;
use std::future::Future;

use scrobble_proto::protocol::Call;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::proxy::{CallProxy, DispatchMode, Invocation};
use crate::session::{Credentials, NowPlaying, PendingAction, Scrobble, SessionFactory};
use crate::watchdog::sleep_until_deadline;

pub enum DaemonEvent {
    Call {
        call: Call,
        reply: oneshot::Sender<Result<(), ProxyError>>,
    },
    Status {
        reply: oneshot::Sender<DaemonStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub network: String,
    pub sync: bool,
    pub authenticated: bool,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Idle,
    Signal,
    /// Every event sender was dropped.
    Closed,
}

pub struct DaemonCore<F: SessionFactory> {
    proxy: CallProxy<F>,
    deferred: VecDeque<PendingAction>,
}

impl<F: SessionFactory> DaemonCore<F> {
    pub fn new(proxy: CallProxy<F>) -> Self {
        Self {
            proxy,
            deferred: VecDeque::new(),
        }
    }

    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<DaemonEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Shutdown {
        tokio::pin!(shutdown);

        loop {
            let deadline = self.proxy.idle_deadline();
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Shutdown::Signal;
                }

                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("All event senders gone, draining {} deferred", self.deferred.len());
                        while let Some(action) = self.deferred.pop_front() {
                            self.proxy.run_deferred(action).await;
                        }
                        return Shutdown::Closed;
                    }
                },

                _ = std::future::ready(()), if !self.deferred.is_empty() => {
                    if let Some(action) = self.deferred.pop_front() {
                        self.proxy.run_deferred(action).await;
                    }
                }

                _ = sleep_until_deadline(deadline) => {
                    info!("Exiting due to inactivity timeout");
                    return Shutdown::Idle;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Call { call, reply } => {
                let result = self.handle_call(call).await;
                let _ = reply.send(result);
            }
            DaemonEvent::Status { reply } => {
                let _ = reply.send(DaemonStatus {
                    network: self.proxy.network().to_string(),
                    sync: self.proxy.mode() == DispatchMode::Sync,
                    authenticated: self.proxy.is_authenticated(),
                });
            }
        }
    }

    async fn handle_call(&mut self, call: Call) -> Result<(), ProxyError> {
        debug!("Incoming {} call", call.method_name());
        match call {
            Call::SetNetwork { network } => {
                self.proxy.record_activity();
                self.proxy.set_network(network);
                Ok(())
            }
            Call::Auth {
                api_key,
                api_secret,
                session_key,
            } => {
                self.proxy.record_activity();
                self.proxy
                    .set_credentials(Credentials::new(api_key, api_secret, session_key));
                Ok(())
            }
            Call::Scrobble {
                artist,
                album,
                title,
                duration,
                timestamp,
            } => {
                let scrobble = Scrobble::new(artist, album, title, duration, timestamp);
                self.invoke(PendingAction::Scrobble(scrobble)).await
            }
            Call::ReportNowPlaying {
                artist,
                album,
                title,
                duration,
            } => {
                let track = NowPlaying::new(artist, album, title, duration);
                self.invoke(PendingAction::NowPlaying(track)).await
            }
        }
    }

    async fn invoke(&mut self, action: PendingAction) -> Result<(), ProxyError> {
        match self.proxy.invoke(action).await {
            Invocation::Completed(result) => result,
            Invocation::Deferred(action) => {
                self.deferred.push_back(action);
                Ok(())
            }
        }
    }
}

/// Hands `call` to the loop and waits for its reply.
pub async fn submit(
    events: &mpsc::Sender<DaemonEvent>,
    call: Call,
) -> Result<Result<(), ProxyError>, SubmitError> {
    let (reply, rx) = oneshot::channel();
    events
        .send(DaemonEvent::Call { call, reply })
        .await
        .map_err(|_| SubmitError)?;
    rx.await.map_err(|_| SubmitError)
}

pub async fn status(events: &mpsc::Sender<DaemonEvent>) -> Result<DaemonStatus, SubmitError> {
    let (reply, rx) = oneshot::channel();
    events
        .send(DaemonEvent::Status { reply })
        .await
        .map_err(|_| SubmitError)?;
    rx.await.map_err(|_| SubmitError)
}

/// The event loop has stopped.
#[derive(Debug, thiserror::Error)]
#[error("daemon is shutting down")]
pub struct SubmitError;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyOptions;
    use crate::testing::{RecordingSink, StubFactory, StubLog};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn core(
        mode: DispatchMode,
        idle_timeout: Option<Duration>,
    ) -> (DaemonCore<StubFactory>, Arc<StubLog>, Arc<RecordingSink>) {
        let factory = StubFactory::default();
        let log = factory.log.clone();
        let sink = Arc::new(RecordingSink::default());
        let proxy = CallProxy::new(
            factory,
            sink.clone(),
            ProxyOptions {
                network: "lastfm".into(),
                mode,
                dry_run: false,
                idle_timeout,
                verbose: false,
            },
        );
        (DaemonCore::new(proxy), log, sink)
    }

    fn auth() -> Call {
        Call::Auth {
            api_key: "k".into(),
            api_secret: "s".into(),
            session_key: "sk".into(),
        }
    }

    fn now_playing(title: &str, duration: u32) -> Call {
        Call::ReportNowPlaying {
            artist: "A".into(),
            album: "B".into(),
            title: title.into(),
            duration,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_a_second_apart_keep_daemon_alive() {
        let (core, _log, _sink) = core(DispatchMode::Async, Some(Duration::from_secs(60)));
        let (tx, rx) = mpsc::channel(8);
        let start = Instant::now();

        let run = async {
            let reason = core.run(rx, std::future::pending()).await;
            (reason, start.elapsed())
        };
        let driver = async {
            for _ in 0..3 {
                submit(&tx, now_playing("C", 0)).await.unwrap().unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            // Keep the sender alive past the idle deadline.
            tokio::time::sleep(Duration::from_secs(300)).await;
            drop(tx);
        };

        let ((reason, elapsed), ()) = tokio::join!(run, driver);
        assert_eq!(reason, Shutdown::Idle);
        // Last call landed at t=2s.
        assert!(elapsed >= Duration::from_secs(62), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(63), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timeout_never_shuts_down() {
        let (core, _log, _sink) = core(DispatchMode::Async, None);
        let (tx, rx) = mpsc::channel(8);

        let run = core.run(rx, std::future::pending());
        let driver = async {
            tokio::time::sleep(Duration::from_secs(7 * 24 * 3600)).await;
            drop(tx);
        };

        let (reason, ()) = tokio::join!(run, driver);
        assert_eq!(reason, Shutdown::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_without_any_call_exits() {
        let (core, _log, _sink) = core(DispatchMode::Sync, Some(Duration::from_secs(60)));
        let (_tx, rx) = mpsc::channel::<DaemonEvent>(8);
        let start = Instant::now();
        let reason = core.run(rx, std::future::pending()).await;
        assert_eq!(reason, Shutdown::Idle);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test]
    async fn test_async_calls_are_acknowledged_then_run_in_order() {
        let (core, log, sink) = core(DispatchMode::Async, None);
        let (tx, rx) = mpsc::channel(8);

        let run = core.run(rx, std::future::pending());
        let driver = async {
            submit(&tx, auth()).await.unwrap().unwrap();
            for title in ["one", "two", "three"] {
                submit(&tx, now_playing(title, 0)).await.unwrap().unwrap();
            }
            drop(tx);
        };

        let (reason, ()) = tokio::join!(run, driver);
        assert_eq!(reason, Shutdown::Closed);

        let titles: Vec<String> = log
            .actions()
            .into_iter()
            .map(|action| match action {
                PendingAction::NowPlaying(track) => {
                    assert_eq!(track.duration, None);
                    track.title
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(titles, ["one", "two", "three"]);
        assert_eq!(log.connects(), 1);
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_async_no_auth_is_silent_to_caller() {
        let (core, log, sink) = core(DispatchMode::Async, None);
        let (tx, rx) = mpsc::channel(8);

        let run = core.run(rx, std::future::pending());
        let driver = async {
            let result = submit(&tx, now_playing("C", 200)).await.unwrap();
            assert!(result.is_ok());
            drop(tx);
        };

        let (_, ()) = tokio::join!(run, driver);
        assert_eq!(log.connects(), 0);
        assert_eq!(sink.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_no_auth_reaches_caller() {
        let (core, _log, sink) = core(DispatchMode::Sync, None);
        let (tx, rx) = mpsc::channel(8);

        let run = core.run(rx, std::future::pending());
        let driver = async {
            let result = submit(&tx, now_playing("C", 200)).await.unwrap();
            assert!(matches!(result, Err(ProxyError::NoAuth)));

            let status = status(&tx).await.unwrap();
            assert_eq!(
                status,
                DaemonStatus {
                    network: "lastfm".into(),
                    sync: true,
                    authenticated: false,
                }
            );
            drop(tx);
        };

        let (_, ()) = tokio::join!(run, driver);
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_set_network_then_call_connects_once() {
        let (core, log, _sink) = core(DispatchMode::Sync, None);
        let (tx, rx) = mpsc::channel(8);

        let run = core.run(rx, std::future::pending());
        let driver = async {
            submit(&tx, auth()).await.unwrap().unwrap();
            submit(&tx, now_playing("C", 1)).await.unwrap().unwrap();
            submit(
                &tx,
                Call::SetNetwork {
                    network: "lastfm".into(),
                },
            )
            .await
            .unwrap()
            .unwrap();
            submit(&tx, now_playing("C", 1)).await.unwrap().unwrap();
            submit(&tx, now_playing("C", 1)).await.unwrap().unwrap();
            drop(tx);
        };

        let (_, ()) = tokio::join!(run, driver);
        assert_eq!(log.connects(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let (core, _log, _sink) = core(DispatchMode::Async, None);
        let (_tx, rx) = mpsc::channel::<DaemonEvent>(8);
        let reason = core.run(rx, async {}).await;
        assert_eq!(reason, Shutdown::Signal);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let (tx, rx) = mpsc::channel::<DaemonEvent>(1);
        drop(rx);
        assert!(submit(&tx, auth()).await.is_err());
    }
}
