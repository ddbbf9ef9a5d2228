//! Session state machine for the copy-trading protocol.
//!
//! The machine is synchronous and side-effect free: every input returns the
//! list of [`Action`]s the driver must perform. All socket, timer, and
//! command inputs arrive through one serialized queue, so transitions never
//! run concurrently and the machine needs no locking.

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::protocol::{
    AuthorizeReply, ContractDetails, ErrorDetail, Inbound, Outbound, PortfolioSnapshot,
    TransactionEvent,
};
use crate::config::{InitialStake, SessionConfig, TradingMode};
use crate::error::SessionError;
use crate::models::{TradeLog, TradeRecord};

use super::correlator::{Correlator, Operation};
use super::SessionSnapshot;

/// Phases of a copy-trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Authenticating,
    Purchasing,
    StartingCopy,
    Subscribing,
    Running,
    Stopping,
    Closed,
    Failed,
}

impl SessionPhase {
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Connecting => "Connecting to server...",
            SessionPhase::Authenticating => "Authenticating...",
            SessionPhase::Purchasing => "Purchasing contract...",
            SessionPhase::StartingCopy => "Starting copy trading...",
            SessionPhase::Subscribing => "Subscribing to the transaction stream...",
            SessionPhase::Running => "Copy trading active",
            SessionPhase::Stopping => "Stopping...",
            SessionPhase::Closed => "Copy trading stopped",
            SessionPhase::Failed => "Failed",
        }
    }

    /// A session in an active phase owns a socket or is entitled to one.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SessionPhase::Idle | SessionPhase::Closed | SessionPhase::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Failed)
    }
}

/// Side effects requested by the machine, performed by the session driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Put a frame on the wire (best effort; skipped if the socket closed).
    Send(Outbound),
    /// Open a fresh socket under a new epoch.
    OpenSocket,
    /// Close the current socket.
    CloseSocket,
    /// Start (or restart) the keepalive schedule for the current epoch.
    StartKeepalive,
    /// Cancel the keepalive schedule.
    StopKeepalive,
    /// Post a reconnect event after the configured delay.
    ScheduleReconnect,
}

/// The trading protocol state for one session.
pub struct SessionMachine {
    config: SessionConfig,
    mode: TradingMode,
    credential: String,
    trader_token: String,

    phase: SessionPhase,
    balance: Option<Decimal>,
    error: Option<SessionError>,
    trades: TradeLog,
    contract: Option<ContractDetails>,
    correlator: Correlator,
    last_buy_at: Option<Instant>,
    reconnect_pending: bool,
}

impl SessionMachine {
    pub fn new(config: SessionConfig, credential: String, mode: TradingMode) -> Self {
        let trader_token = config.trader_token(mode).to_string();
        let trade_log_capacity = config.trade_log_capacity;

        Self {
            config,
            mode,
            credential,
            trader_token,
            phase: SessionPhase::Idle,
            balance: None,
            error: None,
            trades: TradeLog::new(trade_log_capacity),
            contract: None,
            correlator: Correlator::new(),
            last_buy_at: None,
            reconnect_pending: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn balance(&self) -> Option<Decimal> {
        self.balance
    }

    pub fn trades(&self) -> &TradeLog {
        &self.trades
    }

    pub fn contract(&self) -> Option<&ContractDetails> {
        self.contract.as_ref()
    }

    /// Begin the session: `Idle -> Connecting`.
    pub fn on_start(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::Idle {
            return Vec::new();
        }
        info!(mode = %self.mode, "Starting copy trading session");
        self.phase = SessionPhase::Connecting;
        vec![Action::OpenSocket]
    }

    /// Socket opened: authenticate and start the keepalive schedule.
    pub fn on_socket_opened(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::Connecting {
            debug!(phase = ?self.phase, "Ignoring open outside Connecting");
            return Vec::new();
        }

        self.phase = SessionPhase::Authenticating;
        let req_id = self.correlator.issue(Operation::Authorize);
        info!(req_id, "Connected, authenticating");

        vec![
            Action::StartKeepalive,
            Action::Send(Outbound::Authorize {
                token: self.credential.clone(),
                req_id,
            }),
        ]
    }

    /// An inbound text frame arrived on the current epoch's socket.
    pub fn on_frame(&mut self, text: &str, now: Instant) -> Vec<Action> {
        if !self.phase.is_active() || self.phase == SessionPhase::Stopping {
            return Vec::new();
        }

        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(error = %e, "Dropping unparseable frame");
                return Vec::new();
            }
        };

        match inbound {
            Inbound::Ping => Vec::new(),
            Inbound::Error { req_id, error } => self.handle_error_reply(req_id, error),
            Inbound::Authorize { req_id, details } => {
                match self.resolve_reply(req_id, Operation::Authorize) {
                    ReplyMatch::Matched => self.handle_authorized(details, now),
                    ReplyMatch::Skip => Vec::new(),
                }
            }
            Inbound::Buy { req_id, contract } => {
                match self.resolve_reply(req_id, Operation::Buy) {
                    ReplyMatch::Matched => self.handle_bought(contract),
                    ReplyMatch::Skip => Vec::new(),
                }
            }
            Inbound::CopyStart { req_id } => {
                match self.resolve_reply(req_id, Operation::CopyStart) {
                    ReplyMatch::Matched => self.handle_copy_started(),
                    ReplyMatch::Skip => Vec::new(),
                }
            }
            Inbound::CopyStop { req_id } => {
                if let Some(id) = req_id {
                    let _ = self.correlator.resolve(id);
                }
                Vec::new()
            }
            Inbound::Transaction { req_id, event } => self.handle_transaction(req_id, event),
            Inbound::Portfolio { req_id, snapshot } => self.handle_portfolio(req_id, snapshot),
            Inbound::Other { msg_type } => {
                debug!(msg_type = ?msg_type, "Ignoring unrecognized message");
                Vec::new()
            }
        }
    }

    /// Socket closed. Our own teardown completes the session; anything else
    /// schedules exactly one reconnect.
    pub fn on_socket_closed(
        &mut self,
        code: Option<u16>,
        reason: Option<String>,
        was_clean: bool,
    ) -> Vec<Action> {
        // Replies pending on this socket can never arrive now.
        if self.correlator.pending_count() > 0 {
            debug!(
                pending = self.correlator.pending_count(),
                "Dropping in-flight requests with the socket"
            );
        }
        self.correlator.clear();

        match self.phase {
            SessionPhase::Stopping => {
                self.phase = SessionPhase::Closed;
                Vec::new()
            }
            SessionPhase::Idle | SessionPhase::Closed | SessionPhase::Failed => Vec::new(),
            _ => {
                warn!(code = ?code, reason = ?reason, was_clean, "Connection lost, scheduling reconnect");
                self.reconnect_pending = true;
                self.error = Some(SessionError::TransportError(
                    reason.unwrap_or_else(|| "connection lost".to_string()),
                ));
                vec![Action::StopKeepalive, Action::ScheduleReconnect]
            }
        }
    }

    /// Socket-level error; the close that follows drives recovery.
    pub fn on_socket_error(&mut self, message: String) -> Vec<Action> {
        if self.phase.is_active() {
            warn!(error = %message, "Socket error");
            self.error = Some(SessionError::TransportError(message));
        }
        Vec::new()
    }

    /// The reconnect delay elapsed: re-enter `Connecting` under a new epoch.
    pub fn on_reconnect_due(&mut self) -> Vec<Action> {
        if !self.reconnect_pending || !self.phase.is_active() {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.phase = SessionPhase::Connecting;
        info!("Reconnecting");
        vec![Action::OpenSocket]
    }

    /// Explicit stop: best-effort teardown messages, cancel timers, close.
    /// Calling it again on a finished session does nothing.
    pub fn on_stop(&mut self, socket_open: bool) -> Vec<Action> {
        if !self.phase.is_active() {
            return Vec::new();
        }

        self.phase = SessionPhase::Stopping;
        self.reconnect_pending = false;

        let mut actions = Vec::new();
        if socket_open {
            let req_id = self.correlator.issue(Operation::CopyStop);
            actions.push(Action::Send(Outbound::CopyStop {
                trader: self.trader_token.clone(),
                req_id,
            }));
            let req_id = self.correlator.issue(Operation::TransactionUnsubscribe);
            actions.push(Action::Send(Outbound::TransactionUnsubscribe { req_id }));
            let req_id = self.correlator.issue(Operation::PortfolioUnsubscribe);
            actions.push(Action::Send(Outbound::PortfolioUnsubscribe { req_id }));
        } else {
            debug!("Socket not open, skipping teardown messages");
        }
        actions.push(Action::StopKeepalive);
        actions.push(Action::CloseSocket);

        info!(trades_observed = self.trades.len(), "Copy trading stopped");
        self.trades.clear();
        self.contract = None;
        self.phase = SessionPhase::Closed;

        actions
    }

    /// Derived state for the presentation layer.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            status: self.status(),
            mode: self.mode,
            balance: self.balance,
            contract: self.contract.clone(),
            trades: self.trades.to_vec(),
            error: self.error.as_ref().map(|e| e.to_string()),
            is_active: self.phase.is_active(),
        }
    }

    fn status(&self) -> String {
        if self.reconnect_pending {
            return "Connection lost - reconnecting...".to_string();
        }
        match self.phase {
            SessionPhase::Failed => match &self.error {
                Some(e) => format!("Error: {e}"),
                None => SessionPhase::Failed.status_text().to_string(),
            },
            SessionPhase::Running if self.trades.is_empty() => {
                "Copy trading active - waiting for trades...".to_string()
            }
            phase => phase.status_text().to_string(),
        }
    }

    fn handle_authorized(&mut self, details: AuthorizeReply, now: Instant) -> Vec<Action> {
        if self.phase != SessionPhase::Authenticating {
            debug!(phase = ?self.phase, "Ignoring authorize reply outside Authenticating");
            return Vec::new();
        }

        info!(
            loginid = %details.loginid,
            balance = %details.balance,
            currency = %details.currency,
            "Authorized"
        );
        self.balance = Some(details.balance);

        if details.balance < self.config.minimum_balance {
            return self.fail(SessionError::InsufficientBalance {
                balance: details.balance,
                minimum: self.config.minimum_balance,
            });
        }

        match self.config.initial_stake {
            Some(stake) => {
                let amount = match stake {
                    InitialStake::Balance => details.balance,
                    InitialStake::Fixed(amount) => amount,
                };
                self.begin_purchase(amount, now)
            }
            None => self.begin_copy_start(),
        }
    }

    fn begin_purchase(&mut self, amount: Decimal, now: Instant) -> Vec<Action> {
        let request = self.config.contract.with_amount(amount);
        if let Err(e) = request.validate() {
            return self.fail(e);
        }

        if let Some(previous) = self.last_buy_at {
            if now.duration_since(previous) < self.config.buy_cooldown {
                return self.fail(SessionError::RateLimited);
            }
        }
        self.last_buy_at = Some(now);

        self.phase = SessionPhase::Purchasing;
        let req_id = self.correlator.issue(Operation::Buy);
        info!(req_id, amount = %amount, symbol = %request.symbol, "Purchasing contract");

        vec![Action::Send(Outbound::Buy {
            price: amount,
            parameters: request,
            req_id,
        })]
    }

    fn handle_bought(&mut self, contract: ContractDetails) -> Vec<Action> {
        if self.phase != SessionPhase::Purchasing {
            debug!(phase = ?self.phase, "Ignoring buy reply outside Purchasing");
            return Vec::new();
        }

        info!(
            contract_id = contract.contract_id,
            buy_price = %contract.buy_price,
            payout = %contract.payout,
            "Contract purchased"
        );
        self.contract = Some(contract);
        self.begin_copy_start()
    }

    fn begin_copy_start(&mut self) -> Vec<Action> {
        self.phase = SessionPhase::StartingCopy;
        let req_id = self.correlator.issue(Operation::CopyStart);
        info!(req_id, "Requesting copy start");

        vec![Action::Send(Outbound::CopyStart {
            trader: self.trader_token.clone(),
            req_id,
        })]
    }

    fn handle_copy_started(&mut self) -> Vec<Action> {
        if self.phase != SessionPhase::StartingCopy {
            debug!(phase = ?self.phase, "Ignoring copy_start reply outside StartingCopy");
            return Vec::new();
        }

        info!("Copy start accepted, subscribing to updates");
        self.phase = SessionPhase::Subscribing;
        self.error = None;

        let transaction_id = self.correlator.issue(Operation::TransactionSubscribe);
        let portfolio_id = self.correlator.issue(Operation::PortfolioSubscribe);
        vec![
            Action::Send(Outbound::TransactionSubscribe { req_id: transaction_id }),
            Action::Send(Outbound::PortfolioSubscribe { req_id: portfolio_id }),
        ]
    }

    fn handle_transaction(
        &mut self,
        req_id: Option<u64>,
        event: Option<TransactionEvent>,
    ) -> Vec<Action> {
        // Continuation pushes echo the subscription's req_id; only the first
        // one settles a pending request, the rest are routed by type.
        if let Some(id) = req_id {
            let _ = self.correlator.resolve(id);
        }

        if self.phase == SessionPhase::Subscribing {
            info!("Transaction stream live, copy trading active");
            self.phase = SessionPhase::Running;
        }

        if self.phase != SessionPhase::Running {
            return Vec::new();
        }

        if let Some(event) = event {
            if event.action == "buy" {
                info!(
                    contract_id = ?event.contract_id,
                    amount = %event.amount,
                    symbol = ?event.symbol,
                    "Mirrored buy transaction"
                );
                self.trades.push(TradeRecord {
                    action: event.action,
                    amount: event.amount,
                    contract_id: event.contract_id,
                    symbol: event.symbol,
                    transaction_id: event.transaction_id,
                    received_at: Utc::now(),
                });
            } else {
                debug!(action = %event.action, "Observed non-buy transaction");
            }
        }

        Vec::new()
    }

    fn handle_portfolio(&mut self, req_id: Option<u64>, snapshot: PortfolioSnapshot) -> Vec<Action> {
        if let Some(id) = req_id {
            let _ = self.correlator.resolve(id);
        }

        if let Some(balance) = snapshot.balance {
            debug!(balance = %balance, contracts = snapshot.contracts.len(), "Portfolio update");
            self.balance = Some(balance);
        }
        for contract in &snapshot.contracts {
            debug!(
                contract_id = contract.contract_id,
                symbol = %contract.symbol,
                buy_price = %contract.buy_price,
                "Open contract in portfolio"
            );
        }

        Vec::new()
    }

    fn handle_error_reply(&mut self, req_id: Option<u64>, error: ErrorDetail) -> Vec<Action> {
        debug!(code = %error.code, message = %error.message, "Server error reply");

        let Some(id) = req_id else {
            return self.fail(SessionError::ServerError(error.message));
        };

        match self.correlator.resolve(id) {
            Some(Operation::Authorize) => self.fail(SessionError::ServerError(error.message)),
            Some(Operation::Buy) => {
                let mut message = error.message;
                if let Some(details) = error.details {
                    message = format!("{message} ({details})");
                }
                self.fail(SessionError::PurchaseRejected(message))
            }
            Some(Operation::CopyStart) => {
                self.fail(SessionError::CopyStartRejected(error.message))
            }
            Some(Operation::TransactionSubscribe) | Some(Operation::PortfolioSubscribe) => {
                self.fail(SessionError::ServerError(error.message))
            }
            Some(Operation::CopyStop)
            | Some(Operation::TransactionUnsubscribe)
            | Some(Operation::PortfolioUnsubscribe) => {
                debug!(req_id = id, error = %error.message, "Teardown request rejected");
                Vec::new()
            }
            None => {
                debug!(req_id = id, "{}", SessionError::StaleReply(id));
                Vec::new()
            }
        }
    }

    /// One of [`Operation`]'s replies arrived: settle it against the pending
    /// table, distinguishing a stale reply from a mismatched one.
    fn resolve_reply(&mut self, req_id: Option<u64>, expected: Operation) -> ReplyMatch {
        let Some(id) = req_id else {
            debug!(operation = ?expected, "Reply without req_id ignored");
            return ReplyMatch::Skip;
        };

        match self.correlator.resolve(id) {
            Some(operation) if operation == expected => ReplyMatch::Matched,
            Some(operation) => {
                warn!(req_id = id, expected = ?expected, actual = ?operation, "Reply kind mismatch");
                ReplyMatch::Skip
            }
            None => {
                debug!(req_id = id, "{}", SessionError::StaleReply(id));
                ReplyMatch::Skip
            }
        }
    }

    fn fail(&mut self, error: SessionError) -> Vec<Action> {
        warn!(error = %error, "Session failed");
        self.error = Some(error);
        self.phase = SessionPhase::Failed;
        self.reconnect_pending = false;
        vec![Action::StopKeepalive, Action::CloseSocket]
    }
}

enum ReplyMatch {
    Matched,
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn test_config() -> SessionConfig {
        SessionConfig {
            real_trader_token: "real-trader-token".to_string(),
            demo_trader_token: "demo-trader-token".to_string(),
            ..Default::default()
        }
    }

    fn machine_with_stake(stake: Option<InitialStake>) -> SessionMachine {
        let mut config = test_config();
        config.initial_stake = stake;
        SessionMachine::new(config, "copier-token".to_string(), TradingMode::Demo)
    }

    fn sent(actions: &[Action]) -> Vec<&Outbound> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(outbound) => Some(outbound),
                _ => None,
            })
            .collect()
    }

    fn authorize_req_id(actions: &[Action]) -> u64 {
        sent(actions)
            .iter()
            .find_map(|o| match o {
                Outbound::Authorize { req_id, .. } => Some(*req_id),
                _ => None,
            })
            .expect("authorize request")
    }

    fn buy_req_id(actions: &[Action]) -> u64 {
        sent(actions)
            .iter()
            .find_map(|o| match o {
                Outbound::Buy { req_id, .. } => Some(*req_id),
                _ => None,
            })
            .expect("buy request")
    }

    fn copy_start_req_id(actions: &[Action]) -> u64 {
        sent(actions)
            .iter()
            .find_map(|o| match o {
                Outbound::CopyStart { req_id, .. } => Some(*req_id),
                _ => None,
            })
            .expect("copy_start request")
    }

    fn authorize_frame(req_id: u64, balance: &str) -> String {
        format!(
            r#"{{"msg_type":"authorize","req_id":{req_id},"authorize":{{"loginid":"CR1","balance":{balance},"currency":"USD"}}}}"#
        )
    }

    fn buy_frame(req_id: u64, contract_id: u64) -> String {
        format!(
            r#"{{"msg_type":"buy","req_id":{req_id},"buy":{{"contract_id":{contract_id},"buy_price":10,"payout":19.5,"symbol":"R_100","contract_type":"CALL"}}}}"#
        )
    }

    fn copy_start_frame(req_id: u64) -> String {
        format!(r#"{{"msg_type":"copy_start","req_id":{req_id},"copy_start":1}}"#)
    }

    fn transaction_frame(action: &str, contract_id: u64, amount: &str) -> String {
        format!(
            r#"{{"msg_type":"transaction","transaction":{{"action":"{action}","amount":{amount},"contract_id":{contract_id},"symbol":"R_100","transaction_id":{}}}}}"#,
            contract_id * 10
        )
    }

    /// Drive the machine from Idle to Running with a full-balance purchase.
    fn drive_to_running(machine: &mut SessionMachine) {
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        let buy_id = buy_req_id(&actions);

        let actions = machine.on_frame(&buy_frame(buy_id, 555), Instant::now());
        let copy_id = copy_start_req_id(&actions);

        machine.on_frame(&copy_start_frame(copy_id), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::Subscribing);

        machine.on_frame(&transaction_frame("sell", 1, "1"), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_opens_socket() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        let actions = machine.on_start();
        assert_eq!(actions, vec![Action::OpenSocket]);
        assert_eq!(machine.phase(), SessionPhase::Connecting);

        // A second start on an already-started session is a no-op.
        assert!(machine.on_start().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_authenticates_and_starts_keepalive() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();

        assert_eq!(machine.phase(), SessionPhase::Authenticating);
        assert_eq!(actions[0], Action::StartKeepalive);
        assert!(matches!(
            &actions[1],
            Action::Send(Outbound::Authorize { token, .. }) if token == "copier-token"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_balance_fails_without_buy() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "0.5"), Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        assert!(matches!(
            machine.error(),
            Some(SessionError::InsufficientBalance { .. })
        ));
        assert!(sent(&actions).is_empty());
        assert!(actions.contains(&Action::CloseSocket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_balance_purchase_then_copy_start() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::Purchasing);
        assert_eq!(machine.balance(), Some(dec!(10)));
        match sent(&actions).as_slice() {
            [Outbound::Buy { price, parameters, .. }] => {
                assert_eq!(*price, dec!(10));
                assert_eq!(parameters.amount, dec!(10));
            }
            other => panic!("unexpected sends: {other:?}"),
        }

        let buy_id = buy_req_id(&actions);
        let actions = machine.on_frame(&buy_frame(buy_id, 555), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::StartingCopy);
        assert_eq!(machine.contract().unwrap().contract_id, 555);
        assert!(matches!(
            sent(&actions).as_slice(),
            [Outbound::CopyStart { trader, .. }] if trader == "demo-trader-token"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stake_skips_purchase() {
        let mut machine = machine_with_stake(None);
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::StartingCopy);
        assert!(matches!(
            sent(&actions).as_slice(),
            [Outbound::CopyStart { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_stake_amount() {
        let mut machine = machine_with_stake(Some(InitialStake::Fixed(dec!(2.5))));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        match sent(&actions).as_slice() {
            [Outbound::Buy { parameters, .. }] => assert_eq!(parameters.amount, dec!(2.5)),
            other => panic!("unexpected sends: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_contract_parameters_never_sent() {
        let mut machine = machine_with_stake(Some(InitialStake::Fixed(dec!(0.5))));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        assert!(matches!(
            machine.error(),
            Some(SessionError::InvalidContractParameters(_))
        ));
        assert!(sent(&actions).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_rate_limited_on_fast_retry() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::Purchasing);

        // Transport drops before the buy settles; reconnect replays the
        // sequence immediately, hitting the purchase cooldown.
        machine.on_socket_closed(None, None, false);
        machine.on_reconnect_due();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        assert_eq!(machine.error(), Some(&SessionError::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_allowed_when_spaced() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());

        machine.on_socket_closed(None, None, false);
        tokio::time::advance(Duration::from_millis(1000)).await;
        machine.on_reconnect_due();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Purchasing);
        assert!(matches!(sent(&actions).as_slice(), [Outbound::Buy { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_leaves_state_unchanged() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        let balance_before = machine.balance();
        let actions = machine.on_frame(&authorize_frame(999, "777"), Instant::now());

        assert!(actions.is_empty());
        assert_eq!(machine.phase(), SessionPhase::Running);
        assert_eq!(machine.balance(), balance_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorize_error_fails() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let frame = format!(
            r#"{{"msg_type":"authorize","req_id":{auth_id},"error":{{"code":"InvalidToken","message":"Token is not valid"}}}}"#
        );
        machine.on_frame(&frame, Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        assert!(matches!(machine.error(), Some(SessionError::ServerError(m)) if m.contains("not valid")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_error_fails_with_detail() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        let buy_id = buy_req_id(&actions);

        let frame = format!(
            r#"{{"msg_type":"buy","req_id":{buy_id},"error":{{"code":"InvalidPrice","message":"Price has moved","details":{{"field":"price"}}}}}}"#
        );
        machine.on_frame(&frame, Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        match machine.error() {
            Some(SessionError::PurchaseRejected(message)) => {
                assert!(message.contains("Price has moved"));
                assert!(message.contains("price"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_start_error_fails() {
        let mut machine = machine_with_stake(None);
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        let copy_id = copy_start_req_id(&actions);

        let frame = format!(
            r#"{{"msg_type":"copy_start","req_id":{copy_id},"error":{{"code":"CopyTradingNotAllowed","message":"Trader does not allow copying"}}}}"#
        );
        machine.on_frame(&frame, Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Failed);
        assert!(matches!(
            machine.error(),
            Some(SessionError::CopyStartRejected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_close_schedules_single_reconnect() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        let actions = machine.on_socket_closed(Some(1006), None, false);
        let reconnects = actions
            .iter()
            .filter(|a| **a == Action::ScheduleReconnect)
            .count();
        assert_eq!(reconnects, 1);
        assert!(actions.contains(&Action::StopKeepalive));

        // Replays authenticate on the fresh socket; the keepalive schedule
        // restarts with the new epoch instead of doubling up.
        let actions = machine.on_reconnect_due();
        assert_eq!(actions, vec![Action::OpenSocket]);
        assert_eq!(machine.phase(), SessionPhase::Connecting);

        let actions = machine.on_socket_opened();
        assert_eq!(actions[0], Action::StartKeepalive);
        assert!(matches!(&actions[1], Action::Send(Outbound::Authorize { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_after_failure_does_not_reconnect() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);
        machine.on_frame(&authorize_frame(auth_id, "0.5"), Instant::now());
        assert_eq!(machine.phase(), SessionPhase::Failed);

        let actions = machine.on_socket_closed(None, None, true);
        assert!(actions.is_empty());
        assert_eq!(machine.phase(), SessionPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_transactions_recorded_newest_first() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        machine.on_frame(&transaction_frame("buy", 100, "5"), Instant::now());
        machine.on_frame(&transaction_frame("buy", 101, "6"), Instant::now());

        let ids: Vec<_> = machine.trades().iter().map(|t| t.contract_id).collect();
        assert_eq!(ids, vec![Some(101), Some(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_buy_transactions_observed_not_recorded() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        machine.on_frame(&transaction_frame("sell", 200, "5"), Instant::now());
        assert!(machine.trades().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_log_capped_at_fifty() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        for id in 1..=60 {
            machine.on_frame(&transaction_frame("buy", id, "5"), Instant::now());
        }

        assert_eq!(machine.trades().len(), 50);
        let ids: Vec<_> = machine.trades().iter().map(|t| t.contract_id.unwrap()).collect();
        assert_eq!(ids.first(), Some(&60));
        assert_eq!(ids.last(), Some(&11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_portfolio_push_updates_balance() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        let frame = r#"{"msg_type":"portfolio","portfolio":{"balance":42.5,"contracts":[]}}"#;
        machine.on_frame(frame, Instant::now());
        assert_eq!(machine.balance(), Some(dec!(42.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_sends_teardown_once() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);
        machine.on_frame(&transaction_frame("buy", 100, "5"), Instant::now());

        let actions = machine.on_stop(true);
        let outbound = sent(&actions);
        assert!(matches!(outbound[0], Outbound::CopyStop { trader, .. } if trader == "demo-trader-token"));
        assert!(matches!(outbound[1], Outbound::TransactionUnsubscribe { .. }));
        assert!(matches!(outbound[2], Outbound::PortfolioUnsubscribe { .. }));
        assert!(actions.contains(&Action::StopKeepalive));
        assert!(actions.contains(&Action::CloseSocket));

        assert_eq!(machine.phase(), SessionPhase::Closed);
        assert!(machine.trades().is_empty());
        assert!(machine.contract().is_none());

        // Stop is idempotent: no duplicate teardown messages.
        assert!(machine.on_stop(true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_sends_on_closed_socket() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        drive_to_running(&mut machine);

        let actions = machine.on_stop(false);
        assert!(sent(&actions).is_empty());
        assert!(actions.contains(&Action::CloseSocket));
        assert_eq!(machine.phase(), SessionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_scenario() {
        let mut machine = machine_with_stake(Some(InitialStake::Balance));
        machine.on_start();
        let actions = machine.on_socket_opened();
        let auth_id = authorize_req_id(&actions);

        let actions = machine.on_frame(&authorize_frame(auth_id, "10"), Instant::now());
        let buy_id = buy_req_id(&actions);

        let actions = machine.on_frame(&buy_frame(buy_id, 555), Instant::now());
        let copy_id = copy_start_req_id(&actions);
        machine.on_frame(&copy_start_frame(copy_id), Instant::now());

        machine.on_frame(&transaction_frame("buy", 777, "5"), Instant::now());

        assert_eq!(machine.phase(), SessionPhase::Running);
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.trades.len(), 1);
        let trade = &snapshot.trades[0];
        assert_eq!(trade.contract_id, Some(777));
        assert_eq!(trade.amount, dec!(5));
        assert_eq!(trade.action, "buy");
        assert_eq!(snapshot.contract.as_ref().unwrap().contract_id, 555);
        assert!(snapshot.is_active);
    }
}
