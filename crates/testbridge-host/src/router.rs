//! Correlation table: in-flight request id → the resolver awaiting it.
//!
//! Each entry resolves at most once. `route`, `cancel` and `terminate` all
//! remove the entry before anything else happens, and resolvers run after
//! the table lock is released so a resolver may issue new requests.
//!
//! Settled ids are remembered so late duplicates can be told apart from
//! strangers. Only the most recent [`SETTLED_CAPACITY`] are kept; an older
//! id that shows up again is reported as [`Unroutable::Unknown`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProtocolError, SessionError};

/// Which kind of result a request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverKind {
    Discovery,
    Execution,
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverKind::Discovery => f.write_str("discovery"),
            ResolverKind::Execution => f.write_str("execution"),
        }
    }
}

pub type Resolution = Result<Value, SessionError>;

/// One-shot callback invoked with the decoded payload, or with
/// `SessionTerminated` when the connection goes away first.
pub type Resolver = Box<dyn FnOnce(Resolution) + Send + 'static>;

struct PendingRequest {
    kind: ResolverKind,
    resolve: Resolver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unroutable {
    /// Never registered with this router.
    Unknown,
    /// Already resolved or cancelled.
    AlreadySettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(ResolverKind),
    Unroutable(Unroutable),
}

/// How many settled ids a router remembers.
pub const SETTLED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Table {
    pending: HashMap<String, PendingRequest>,
    settled: HashSet<String>,
    /// Insertion order of `settled`, oldest first.
    settled_order: VecDeque<String>,
    closed: bool,
}

impl Table {
    fn settle(&mut self, id: &str) {
        if !self.settled.insert(id.to_string()) {
            return;
        }
        self.settled_order.push_back(id.to_string());
        while self.settled_order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = self.settled_order.pop_front() {
                self.settled.remove(&oldest);
            }
        }
    }

    fn unsettle(&mut self, id: &str) {
        if self.settled.remove(id) {
            self.settled_order.retain(|settled| settled != id);
        }
    }
}

#[derive(Default)]
pub struct CorrelationRouter {
    table: Mutex<Table>,
}

impl CorrelationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        correlation_id: impl Into<String>,
        kind: ResolverKind,
        resolve: Resolver,
    ) -> Result<(), SessionError> {
        let id = correlation_id.into();
        let mut table = self.table();
        if table.closed {
            return Err(SessionError::SessionTerminated);
        }
        if table.pending.contains_key(&id) {
            return Err(SessionError::DuplicateCorrelationId(id));
        }
        table.unsettle(&id);
        debug!(correlation_id = %id, %kind, "registered request");
        table.pending.insert(id, PendingRequest { kind, resolve });
        Ok(())
    }

    /// Deliver `payload` to the request registered under `correlation_id`.
    pub fn route(&self, correlation_id: &str, payload: Value) -> RouteOutcome {
        let entry = {
            let mut table = self.table();
            match table.pending.remove(correlation_id) {
                Some(entry) => {
                    table.settle(correlation_id);
                    entry
                }
                None => {
                    let reason = if table.settled.contains(correlation_id) {
                        Unroutable::AlreadySettled
                    } else {
                        Unroutable::Unknown
                    };
                    let err = ProtocolError::UnroutableCorrelationId(correlation_id.to_string());
                    warn!(error = %err, ?reason, "dropping unroutable frame");
                    return RouteOutcome::Unroutable(reason);
                }
            }
        };

        debug!(correlation_id, kind = %entry.kind, "routing result");
        (entry.resolve)(Ok(payload));
        RouteOutcome::Delivered(entry.kind)
    }

    /// Drop a pending entry without invoking it. Returns whether one existed.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let entry = {
            let mut table = self.table();
            let entry = table.pending.remove(correlation_id);
            if entry.is_some() {
                table.settle(correlation_id);
            }
            entry
        };
        match entry {
            Some(entry) => {
                debug!(correlation_id, kind = %entry.kind, "cancelled request");
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with `SessionTerminated` and refuse new
    /// registrations. Returns how many requests were rejected.
    pub fn terminate(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut table = self.table();
            table.closed = true;
            let drained: Vec<(String, PendingRequest)> = table.pending.drain().collect();
            for (id, _) in &drained {
                table.settle(id);
            }
            drained
        };

        let count = drained.len();
        for (id, entry) in drained {
            debug!(correlation_id = %id, kind = %entry.kind, "rejecting pending request");
            (entry.resolve)(Err(SessionError::SessionTerminated));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    /// Settled ids currently remembered, at most [`SETTLED_CAPACITY`].
    pub fn settled_count(&self) -> usize {
        self.table().settled.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.table().pending.contains_key(correlation_id)
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }
}

impl fmt::Debug for CorrelationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table();
        f.debug_struct("CorrelationRouter")
            .field("pending", &table.pending.len())
            .field("settled", &table.settled.len())
            .field("closed", &table.closed)
            .finish()
    }
}

// ── Unit tests ──────────────────────────────────────────────────────
