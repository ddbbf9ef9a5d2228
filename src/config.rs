//! Session configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::ContractTemplate;

const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";
const DEFAULT_APP_ID: u32 = 70344;

/// Which account family a session trades against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Real,
    Demo,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Real => "real",
            TradingMode::Demo => "demo",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "real" => Ok(TradingMode::Real),
            "demo" => Ok(TradingMode::Demo),
            other => Err(format!("unknown trading mode '{other}' (use 'real' or 'demo')")),
        }
    }
}

/// How the optional initial purchase is sized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialStake {
    /// Stake the full account balance reported by the authorize reply.
    Balance,
    /// Stake a fixed amount.
    Fixed(Decimal),
}

impl FromStr for InitialStake {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("balance") {
            return Ok(InitialStake::Balance);
        }
        s.parse::<Decimal>()
            .map(InitialStake::Fixed)
            .map_err(|_| format!("invalid stake '{s}' (use an amount or 'balance')"))
    }
}

/// Configuration for a copy-trading session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (without the app_id query parameter).
    pub endpoint: String,

    /// Application id appended to the endpoint URL.
    pub app_id: u32,

    /// Trader token mirrored in real mode.
    pub real_trader_token: String,

    /// Trader token mirrored in demo mode.
    pub demo_trader_token: String,

    /// Keepalive probe period.
    pub ping_interval: Duration,

    /// Delay before re-entering `Connecting` after transport loss.
    pub reconnect_delay: Duration,

    /// Socket connect timeout.
    pub connect_timeout: Duration,

    /// Minimum balance required after authentication.
    pub minimum_balance: Decimal,

    /// Minimum spacing between two purchase requests.
    pub buy_cooldown: Duration,

    /// Trade log capacity; oldest entries evicted first.
    pub trade_log_capacity: usize,

    /// Initial purchase sizing; `None` skips the purchase step.
    pub initial_stake: Option<InitialStake>,

    /// Contract parameters used for the initial purchase.
    pub contract: ContractTemplate,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: DEFAULT_APP_ID,
            real_trader_token: String::new(),
            demo_trader_token: String::new(),
            ping_interval: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            minimum_balance: dec!(1),
            buy_cooldown: Duration::from_millis(1000),
            trade_log_capacity: 50,
            initial_stake: Some(InitialStake::Balance),
            contract: ContractTemplate::default(),
        }
    }
}

impl SessionConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("DERIV_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(app_id) = std::env::var("DERIV_APP_ID") {
            if let Ok(id) = app_id.parse() {
                config.app_id = id;
            }
        }
        if let Ok(token) = std::env::var("DERIV_REAL_TRADER_TOKEN") {
            config.real_trader_token = token;
        }
        if let Ok(token) = std::env::var("DERIV_DEMO_TRADER_TOKEN") {
            config.demo_trader_token = token;
        }

        config
    }

    /// Full WebSocket URL including the app_id parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }

    /// Trader token for the given mode.
    pub fn trader_token(&self, mode: TradingMode) -> &str {
        match mode {
            TradingMode::Real => &self.real_trader_token,
            TradingMode::Demo => &self.demo_trader_token,
        }
    }
}
