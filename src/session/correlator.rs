//! Request correlator: ties each outgoing request to its eventual reply.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::debug;

/// Semantic operation awaiting a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Authorize,
    Buy,
    CopyStart,
    CopyStop,
    TransactionSubscribe,
    TransactionUnsubscribe,
    PortfolioSubscribe,
    PortfolioUnsubscribe,
}

#[derive(Debug)]
struct PendingRequest {
    operation: Operation,
    issued_at: Instant,
}

/// Assigns monotonically increasing correlation ids and tracks the in-flight
/// request behind each one. Ids are opaque integers to the wire layer and are
/// never reused while still pending.
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Reserve the next id for `operation` and mark it in flight.
    pub fn issue(&mut self, operation: Operation) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                operation,
                issued_at: Instant::now(),
            },
        );
        id
    }

    /// Match a reply id to its pending operation, removing the entry.
    ///
    /// `None` marks a stray or late reply (typically after teardown or
    /// reconnection); callers log it and leave the current state untouched.
    pub fn resolve(&mut self, id: u64) -> Option<Operation> {
        match self.pending.remove(&id) {
            Some(request) => {
                debug!(
                    req_id = id,
                    operation = ?request.operation,
                    elapsed_ms = request.issued_at.elapsed().as_millis() as u64,
                    "Resolved reply"
                );
                Some(request.operation)
            }
            None => None,
        }
    }

    /// Number of requests still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending entry. Ids are not reset; a session never reuses
    /// an id, even across reconnects.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
