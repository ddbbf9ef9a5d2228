//! Data models for contracts, observed trades, and trader profiles.

mod contract;
mod trade;
mod trader;

pub use contract::{ContractKind, ContractRequest, ContractTemplate, DurationUnit};
pub use trade::{TradeLog, TradeRecord};
pub use trader::TraderProfile;
