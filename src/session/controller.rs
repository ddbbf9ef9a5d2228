//! Session controller: composition root wiring the connection, keepalive,
//! correlator, and state machine together behind `start`/`stop`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::api::{Connection, Outbound, SocketEvent};
use crate::config::{SessionConfig, TradingMode};
use crate::error::SessionError;

use super::keepalive::KeepaliveDriver;
use super::machine::{Action, SessionMachine};
use super::{SessionEvent, SessionSnapshot};

enum Command {
    Stop { done: oneshot::Sender<()> },
}

struct ActiveSession {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Owns at most one active session and republishes its derived state.
///
/// Starting a new session implicitly tears down the prior one; `stop` is
/// idempotent and returns only after timers are cancelled and the socket is
/// closed.
pub struct SessionController {
    config: SessionConfig,
    mode: TradingMode,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(config: SessionConfig, mode: TradingMode) -> Self {
        Self {
            config,
            mode,
            snapshot: Arc::new(RwLock::new(SessionSnapshot::idle(mode))),
            active: None,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Current derived session state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Switch trading mode. Rejected while a session is active.
    pub async fn switch_mode(&mut self, mode: TradingMode) -> Result<(), SessionError> {
        if self.is_active().await {
            return Err(SessionError::ModeLockedWhileActive);
        }
        info!(mode = %mode, "Switching trading mode");
        self.mode = mode;
        Ok(())
    }

    /// Whether a session is currently in an active phase.
    pub async fn is_active(&self) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.snapshot.read().await.is_active
    }

    /// Start a session for `credential` in `mode`, tearing down any prior one.
    pub async fn start(&mut self, credential: String, mode: TradingMode) -> Result<(), SessionError> {
        self.stop().await;
        self.mode = mode;

        let machine = SessionMachine::new(self.config.clone(), credential, mode);
        *self.snapshot.write().await = SessionSnapshot::idle(mode);

        let (command_tx, command_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_session(
            self.config.clone(),
            machine,
            command_rx,
            Arc::clone(&self.snapshot),
        ));

        self.active = Some(ActiveSession {
            commands: command_tx,
            task,
        });
        Ok(())
    }

    /// Stop the active session, if any. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if active
            .commands
            .send(Command::Stop { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
        // The task ends right after acknowledging the stop (or already has).
        let _ = active.task.await;
    }
}

/// Interprets machine actions: owns the socket handle, the keepalive driver,
/// the reconnect timer, and the epoch counter that invalidates stale events.
struct SessionDriver {
    config: SessionConfig,
    events: mpsc::Sender<SessionEvent>,
    epoch: u64,
    connection: Option<Connection>,
    keepalive: KeepaliveDriver,
    reconnect: Option<JoinHandle<()>>,
}

impl SessionDriver {
    fn new(config: SessionConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            config,
            events,
            epoch: 0,
            connection: None,
            keepalive: KeepaliveDriver::new(),
            reconnect: None,
        }
    }

    fn socket_open(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(outbound) => self.send(&outbound),
                Action::OpenSocket => {
                    if let Some(old) = self.connection.take() {
                        old.close();
                    }
                    self.epoch += 1;
                    self.connection = Some(Connection::open(
                        self.config.ws_url(),
                        self.epoch,
                        self.config.connect_timeout,
                        self.events.clone(),
                    ));
                }
                Action::CloseSocket => {
                    if let Some(connection) = &self.connection {
                        connection.close();
                    }
                }
                Action::StartKeepalive => {
                    self.keepalive
                        .start(self.events.clone(), self.epoch, self.config.ping_interval);
                }
                Action::StopKeepalive => self.keepalive.stop(),
                Action::ScheduleReconnect => {
                    self.cancel_reconnect();
                    let events = self.events.clone();
                    let epoch = self.epoch;
                    let delay = self.config.reconnect_delay;
                    self.reconnect = Some(tokio::spawn(async move {
                        sleep(delay).await;
                        let _ = events.send(SessionEvent::ReconnectDue { epoch }).await;
                    }));
                }
            }
        }
    }

    fn send(&self, outbound: &Outbound) {
        let Some(connection) = &self.connection else {
            debug!("No connection, dropping outbound frame");
            return;
        };
        match outbound.to_frame() {
            Ok(frame) => {
                if let Err(e) = connection.send(frame) {
                    debug!(error = %e, "Send skipped");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize request"),
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_reconnect();
        self.keepalive.stop();
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

async fn run_session(
    config: SessionConfig,
    mut machine: SessionMachine,
    mut commands: mpsc::Receiver<Command>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
) {
    let (event_tx, mut events) = mpsc::channel::<SessionEvent>(64);
    let mut driver = SessionDriver::new(config, event_tx);

    let actions = machine.on_start();
    driver.apply(actions);
    *snapshot.write().await = machine.snapshot();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Stop { done }) => {
                        let actions = machine.on_stop(driver.socket_open());
                        driver.apply(actions);
                        driver.shutdown();
                        *snapshot.write().await = machine.snapshot();
                        let _ = done.send(());
                    }
                    // Controller dropped without an explicit stop.
                    None => {
                        let actions = machine.on_stop(driver.socket_open());
                        driver.apply(actions);
                        driver.shutdown();
                        *snapshot.write().await = machine.snapshot();
                    }
                }
                return;
            }

            Some(event) = events.recv() => {
                let actions = match event {
                    SessionEvent::Socket { epoch, event } if epoch == driver.epoch => match event {
                        SocketEvent::Opened => machine.on_socket_opened(),
                        SocketEvent::Frame(text) => machine.on_frame(&text, Instant::now()),
                        SocketEvent::Closed { code, reason, was_clean } => {
                            machine.on_socket_closed(code, reason, was_clean)
                        }
                        SocketEvent::Error(message) => machine.on_socket_error(message),
                    },
                    SessionEvent::Socket { epoch, .. } => {
                        debug!(epoch, current = driver.epoch, "Discarding stale socket event");
                        Vec::new()
                    }
                    SessionEvent::KeepaliveTick { epoch } if epoch == driver.epoch => {
                        if driver.socket_open() {
                            driver.send(&Outbound::Ping);
                        } else {
                            debug!("Socket not open, skipping keepalive probe");
                        }
                        Vec::new()
                    }
                    SessionEvent::KeepaliveTick { .. } => Vec::new(),
                    SessionEvent::ReconnectDue { epoch } if epoch == driver.epoch => {
                        machine.on_reconnect_due()
                    }
                    SessionEvent::ReconnectDue { .. } => {
                        debug!("Discarding stale reconnect timer");
                        Vec::new()
                    }
                };

                driver.apply(actions);
                *snapshot.write().await = machine.snapshot();

                // An absorbing failure keeps its state visible in the
                // snapshot; the task itself has nothing left to drive.
                if machine.phase().is_terminal() {
                    driver.shutdown();
                    return;
                }
            }

            else => {
                driver.shutdown();
                return;
            }
        }
    }
}
