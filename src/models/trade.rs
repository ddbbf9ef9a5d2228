//! Observed trade records and the bounded trade log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trade observed on the transaction stream while mirroring a trader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Transaction action as reported by the server ("buy", "sell", ...).
    pub action: String,

    /// Stake amount of the transaction.
    pub amount: Decimal,

    /// Contract the transaction refers to.
    pub contract_id: Option<u64>,

    /// Underlying symbol, when reported.
    pub symbol: Option<String>,

    /// Server-side transaction identifier.
    pub transaction_id: Option<u64>,

    /// When this client received the event.
    pub received_at: DateTime<Utc>,
}

/// Bounded, newest-first log of observed trades.
///
/// Once the capacity is reached the oldest entry is evicted for each new one.
#[derive(Debug, Clone, Default)]
pub struct TradeLog {
    entries: VecDeque<TradeRecord>,
    capacity: usize,
}

impl TradeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a trade as the newest entry, evicting the oldest if full.
    pub fn push(&mut self, record: TradeRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &TradeRecord> {
        self.entries.iter()
    }

    /// Snapshot of the log, newest first.
    pub fn to_vec(&self) -> Vec<TradeRecord> {
        self.iter().cloned().collect()
    }
}
