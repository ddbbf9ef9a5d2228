//! Trader profile shown before and during a copy session.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::TradingMode;

/// Performance profile of the trader being mirrored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderProfile {
    /// Login id of the trader account.
    pub trader_loginid: String,

    /// Number of accounts currently copying this trader.
    #[serde(default)]
    pub copiers: u32,

    /// Total trades placed by the trader.
    #[serde(default)]
    pub total_trades: u32,

    /// Trades that closed profitably.
    #[serde(default)]
    pub trades_profitable: u32,

    /// Average profit per winning trade.
    #[serde(default)]
    pub avg_profit: Decimal,

    /// Average loss per losing trade (negative).
    #[serde(default)]
    pub avg_loss: Decimal,

    /// Average trade duration in minutes.
    #[serde(default)]
    pub avg_duration: f64,

    /// When the trader account became active.
    pub active_since: Option<DateTime<Utc>>,

    /// Whether the trader accepts copiers.
    #[serde(default)]
    pub allow_copiers: bool,
}

impl TraderProfile {
    /// Fraction of trades that closed profitably, as a percentage.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        f64::from(self.trades_profitable) / f64::from(self.total_trades) * 100.0
    }

    /// Built-in profile for the given mode's trader account.
    pub fn builtin(mode: TradingMode) -> Self {
        match mode {
            TradingMode::Real => Self {
                trader_loginid: "CR12345678".to_string(),
                copiers: 42,
                total_trades: 287,
                trades_profitable: 198,
                avg_profit: dec!(18.7),
                avg_loss: dec!(-12.5),
                avg_duration: 5.2,
                active_since: Some(Utc::now() - Duration::days(180)),
                allow_copiers: true,
            },
            TradingMode::Demo => Self {
                trader_loginid: "VR98765432".to_string(),
                copiers: 87,
                total_trades: 412,
                trades_profitable: 265,
                avg_profit: dec!(15.3),
                avg_loss: dec!(-10.2),
                avg_duration: 4.8,
                active_since: Some(Utc::now() - Duration::days(90)),
                allow_copiers: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_rate() {
        let profile = TraderProfile::builtin(TradingMode::Real);
        let expected = 198.0 / 287.0 * 100.0;
        assert!((profile.win_rate() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_win_rate_no_trades() {
        let mut profile = TraderProfile::builtin(TradingMode::Demo);
        profile.total_trades = 0;
        assert_eq!(profile.win_rate(), 0.0);
    }

    #[test]
    fn test_builtin_profiles_differ_by_mode() {
        let real = TraderProfile::builtin(TradingMode::Real);
        let demo = TraderProfile::builtin(TradingMode::Demo);
        assert_ne!(real.trader_loginid, demo.trader_loginid);
        assert!(real.allow_copiers && demo.allow_copiers);
    }
}
