//! Wire protocol for the trading backend.
//!
//! Requests carry a client-assigned integer `req_id`; replies either echo it
//! or carry a `msg_type` for unsolicited pushes. A top-level `error` object
//! marks a failed reply regardless of `msg_type`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ContractRequest;

/// A request the client can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Keepalive probe; carries no correlation id.
    Ping,
    Authorize { token: String, req_id: u64 },
    Buy {
        price: Decimal,
        parameters: ContractRequest,
        req_id: u64,
    },
    CopyStart { trader: String, req_id: u64 },
    CopyStop { trader: String, req_id: u64 },
    TransactionSubscribe { req_id: u64 },
    TransactionUnsubscribe { req_id: u64 },
    PortfolioSubscribe { req_id: u64 },
    PortfolioUnsubscribe { req_id: u64 },
}

impl Outbound {
    /// Serialize to the JSON frame sent over the socket.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            Outbound::Ping => serde_json::to_string(&PingRequest { ping: 1 }),
            Outbound::Authorize { token, req_id } => serde_json::to_string(&AuthorizeRequest {
                authorize: token,
                req_id: *req_id,
            }),
            Outbound::Buy {
                price,
                parameters,
                req_id,
            } => serde_json::to_string(&BuyRequest {
                buy: 1,
                price: *price,
                parameters,
                req_id: *req_id,
            }),
            Outbound::CopyStart { trader, req_id } => serde_json::to_string(&CopyStartRequest {
                copy_start: trader,
                req_id: *req_id,
            }),
            Outbound::CopyStop { trader, req_id } => serde_json::to_string(&CopyStopRequest {
                copy_stop: trader,
                req_id: *req_id,
            }),
            Outbound::TransactionSubscribe { req_id } => {
                serde_json::to_string(&TransactionStreamRequest {
                    transaction: 1,
                    subscribe: Some(1),
                    unsubscribe: None,
                    req_id: *req_id,
                })
            }
            Outbound::TransactionUnsubscribe { req_id } => {
                serde_json::to_string(&TransactionStreamRequest {
                    transaction: 1,
                    subscribe: None,
                    unsubscribe: Some(1),
                    req_id: *req_id,
                })
            }
            Outbound::PortfolioSubscribe { req_id } => serde_json::to_string(&PortfolioRequest {
                portfolio: 1,
                unsubscribe: None,
                req_id: *req_id,
            }),
            Outbound::PortfolioUnsubscribe { req_id } => serde_json::to_string(&PortfolioRequest {
                portfolio: 1,
                unsubscribe: Some(1),
                req_id: *req_id,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct PingRequest {
    ping: u8,
}

#[derive(Debug, Serialize)]
struct AuthorizeRequest<'a> {
    authorize: &'a str,
    req_id: u64,
}

#[derive(Debug, Serialize)]
struct BuyRequest<'a> {
    buy: u8,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    parameters: &'a ContractRequest,
    req_id: u64,
}

#[derive(Debug, Serialize)]
struct CopyStartRequest<'a> {
    copy_start: &'a str,
    req_id: u64,
}

#[derive(Debug, Serialize)]
struct CopyStopRequest<'a> {
    copy_stop: &'a str,
    req_id: u64,
}

#[derive(Debug, Serialize)]
struct TransactionStreamRequest {
    transaction: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribe: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unsubscribe: Option<u8>,
    req_id: u64,
}

#[derive(Debug, Serialize)]
struct PortfolioRequest {
    portfolio: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    unsubscribe: Option<u8>,
    req_id: u64,
}

/// Error object attached to a failed reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Payload of a successful authorize reply.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeReply {
    pub loginid: String,
    pub balance: Decimal,
    #[serde(default)]
    pub currency: String,
}

/// Payload of a successful buy reply; also the held-contract record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
    pub contract_id: u64,
    pub buy_price: Decimal,
    #[serde(default)]
    pub payout: Decimal,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
}

/// Pushed transaction event.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEvent {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default)]
    pub contract_id: Option<u64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<u64>,
}

/// Pushed portfolio snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub contracts: Vec<PortfolioContract>,
}

/// One open contract inside a portfolio snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioContract {
    pub contract_id: u64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub buy_price: Decimal,
}

/// Closed set of inbound message kinds the session understands.
///
/// Anything outside this set parses to [`Inbound::Other`] and is ignored by
/// the state machine rather than silently matched.
#[derive(Debug, Clone)]
pub enum Inbound {
    Authorize {
        req_id: Option<u64>,
        details: AuthorizeReply,
    },
    Buy {
        req_id: Option<u64>,
        contract: ContractDetails,
    },
    CopyStart { req_id: Option<u64> },
    CopyStop { req_id: Option<u64> },
    Transaction {
        req_id: Option<u64>,
        event: Option<TransactionEvent>,
    },
    Portfolio {
        req_id: Option<u64>,
        snapshot: PortfolioSnapshot,
    },
    Ping,
    Error {
        req_id: Option<u64>,
        error: ErrorDetail,
    },
    Other { msg_type: Option<String> },
}

/// Untyped reply envelope used to classify an inbound frame.
#[derive(Debug, Deserialize)]
struct WireReply {
    msg_type: Option<String>,
    req_id: Option<u64>,
    error: Option<ErrorDetail>,
    authorize: Option<AuthorizeReply>,
    buy: Option<ContractDetails>,
    transaction: Option<TransactionEvent>,
    portfolio: Option<PortfolioSnapshot>,
}

impl Inbound {
    /// Parse a raw text frame into the closed inbound set.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: WireReply = serde_json::from_str(text)?;

        // An error object marks the reply as failed whatever its msg_type.
        if let Some(error) = raw.error {
            return Ok(Inbound::Error {
                req_id: raw.req_id,
                error,
            });
        }

        let inbound = match raw.msg_type.as_deref() {
            Some("authorize") => match raw.authorize {
                Some(details) => Inbound::Authorize {
                    req_id: raw.req_id,
                    details,
                },
                None => Inbound::Other {
                    msg_type: raw.msg_type,
                },
            },
            Some("buy") => match raw.buy {
                Some(contract) => Inbound::Buy {
                    req_id: raw.req_id,
                    contract,
                },
                None => Inbound::Other {
                    msg_type: raw.msg_type,
                },
            },
            Some("copy_start") => Inbound::CopyStart { req_id: raw.req_id },
            Some("copy_stop") => Inbound::CopyStop { req_id: raw.req_id },
            Some("transaction") => Inbound::Transaction {
                req_id: raw.req_id,
                event: raw.transaction,
            },
            Some("portfolio") => match raw.portfolio {
                Some(snapshot) => Inbound::Portfolio {
                    req_id: raw.req_id,
                    snapshot,
                },
                None => Inbound::Other {
                    msg_type: raw.msg_type,
                },
            },
            Some("ping") => Inbound::Ping,
            _ => Inbound::Other {
                msg_type: raw.msg_type,
            },
        };

        Ok(inbound)
    }
}
