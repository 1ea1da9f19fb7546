use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Single idle deadline.  `reset` replaces the deadline, it never adds a
/// second one, so at most one expiry can be pending at any time.
///
/// A watchdog built without a timeout stays disarmed forever.
#[derive(Debug)]
pub struct IdleWatchdog {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl IdleWatchdog {
    /// Armed immediately, so a daemon nobody talks to still goes away.
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut watchdog = Self {
            timeout,
            deadline: None,
        };
        watchdog.reset();
        watchdog
    }

    pub fn reset(&mut self) {
        if let Some(timeout) = self.timeout {
            // An unrepresentable deadline means it can never be reached.
            self.deadline = Instant::now().checked_add(timeout);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Resolves at `deadline`, or never when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            sleep_until(deadline).await;
            debug!("Idle deadline reached");
        }
        None => pending::<()>().await,
    }
}
