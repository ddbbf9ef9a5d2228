//! Copy-trading session: correlator, keepalive, state machine, controller.
//!
//! Everything that can wake a session — socket events, keepalive ticks, the
//! reconnect timer — posts into one ordered event queue consumed by a single
//! task, so no two transitions for the same session ever run concurrently.
//! Events are tagged with the epoch of the connection that produced them;
//! events from a superseded epoch are discarded as stale.

mod controller;
mod correlator;
mod keepalive;
mod machine;

pub use controller::SessionController;
pub use correlator::{Correlator, Operation};
pub use keepalive::KeepaliveDriver;
pub use machine::{Action, SessionMachine, SessionPhase};

use rust_decimal::Decimal;

use crate::api::{ContractDetails, SocketEvent};
use crate::config::TradingMode;
use crate::models::TradeRecord;

/// One entry in a session's serialized event queue.
#[derive(Debug)]
pub enum SessionEvent {
    /// An observable transition from the socket task.
    Socket { epoch: u64, event: SocketEvent },
    /// The keepalive timer fired.
    KeepaliveTick { epoch: u64 },
    /// The reconnect delay elapsed.
    ReconnectDue { epoch: u64 },
}

/// Derived session state republished for the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub status: String,
    pub mode: TradingMode,
    pub balance: Option<Decimal>,
    pub contract: Option<ContractDetails>,
    pub trades: Vec<TradeRecord>,
    pub error: Option<String>,
    pub is_active: bool,
}

impl SessionSnapshot {
    pub fn idle(mode: TradingMode) -> Self {
        Self {
            phase: SessionPhase::Idle,
            status: SessionPhase::Idle.status_text().to_string(),
            mode,
            balance: None,
            contract: None,
            trades: Vec::new(),
            error: None,
            is_active: false,
        }
    }
}
