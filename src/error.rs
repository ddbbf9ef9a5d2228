//! Session error taxonomy.
//!
//! Validation errors (`InvalidContractParameters`, `RateLimited`) are raised
//! before anything touches the network. Server and transport errors surface
//! as the session's derived `error` field; nothing is thrown across the
//! session boundary.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by the copy-trading session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("connection not ready for trading")]
    NotConnected,

    #[error("invalid contract parameters: {0}")]
    InvalidContractParameters(String),

    #[error("please wait before placing another trade")]
    RateLimited,

    #[error("insufficient balance (minimum {minimum} required, have {balance})")]
    InsufficientBalance { balance: Decimal, minimum: Decimal },

    #[error("failed to buy contract: {0}")]
    PurchaseRejected(String),

    #[error("failed to start copying: {0}")]
    CopyStartRejected(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("connection error: {0}")]
    TransportError(String),

    #[error("stop the current session before switching mode")]
    ModeLockedWhileActive,

    /// A reply whose `req_id` matches no pending request. Logged and
    /// swallowed; never surfaced to the presentation layer.
    #[error("stale reply for request {0}")]
    StaleReply(u64),
}
