//! Keepalive driver: periodic liveness ticks on an open connection.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::SessionEvent;

/// Posts [`SessionEvent::KeepaliveTick`] into the session's event queue,
/// immediately on start and then every period.
///
/// Ticks are skipped while the consumer is busy, never queued, so no probe
/// backlog accumulates. At most one schedule exists per session; starting a
/// new one implicitly cancels the prior one.
#[derive(Debug, Default)]
pub struct KeepaliveDriver {
    handle: Option<JoinHandle<()>>,
}

impl KeepaliveDriver {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Start (or restart) the schedule for the given connection epoch.
    pub fn start(&mut self, events: mpsc::Sender<SessionEvent>, epoch: u64, period: Duration) {
        self.stop();
        debug!(epoch, period_secs = period.as_secs(), "Starting keepalive schedule");

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if events.send(SessionEvent::KeepaliveTick { epoch }).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel the schedule. Safe to call repeatedly or when nothing is
    /// scheduled.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for KeepaliveDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
