//! WebSocket transport and wire protocol for the trading backend.

mod connection;
pub mod protocol;

pub use connection::{Connection, SocketEvent};
pub use protocol::{
    AuthorizeReply, ContractDetails, ErrorDetail, Inbound, Outbound, PortfolioSnapshot,
    TransactionEvent,
};
