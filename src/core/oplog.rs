// src/core/oplog.rs

//! Operation-log entry types and the contract of the oplog reader that
//! delivers them to interested drivers.

use crate::core::document::{DocId, FieldMap};
use async_trait::async_trait;
use bytes::Bytes;

/// The position token of an oplog entry. Opaque to the driver; it is only
/// forwarded to the document fetcher as a cache key, so that two drivers
/// asking for the same `(id, ts)` pair can share one lookup.
pub type OplogTimestamp = Bytes;

/// One data-mutating operation observed on the oplog. The affected id is
/// extracted by the reader; how it does so is its own concern.
#[derive(Debug, Clone)]
pub struct OplogEntry {
    pub id: DocId,
    pub op: OplogOp,
    pub ts: OplogTimestamp,
}

/// The operation kind and payload of an oplog entry.
#[derive(Debug, Clone)]
pub enum OplogOp {
    /// A freshly inserted document. The id travels in [`OplogEntry::id`]
    /// and is not repeated in the field map.
    Insert { doc: FieldMap },
    /// An update: either a modifier document (`$set`/`$unset` keys) or a
    /// full replacement (no modifier keys). The driver distinguishes the
    /// two by inspecting the keys.
    Update { change: FieldMap },
    /// A deletion.
    Delete,
    /// An operation kind the reader recognized but the driver does not
    /// handle. Reaching the driver with one of these is fatal.
    Other { kind: String },
}

impl OplogOp {
    pub fn kind(&self) -> &str {
        match self {
            OplogOp::Insert { .. } => "i",
            OplogOp::Update { .. } => "u",
            OplogOp::Delete => "d",
            OplogOp::Other { kind } => kind,
        }
    }
}

/// What the reader hands to a per-query subscription: either a single entry
/// relevant to the query's collection, or the news that the collection was
/// dropped as a whole.
#[derive(Debug, Clone)]
pub enum OplogNotification {
    Entry(OplogEntry),
    DropCollection,
}

/// Per-subscription filter. Readers deliver only entries for this
/// collection, in oplog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OplogFilter {
    pub collection_name: String,
}

/// Callback registered with the reader. Invoked synchronously with respect
/// to oplog processing; implementations must not block or suspend.
pub type OplogCallback = Box<dyn Fn(OplogNotification) + Send + Sync>;

/// Handle returned by a subscription; stopping it detaches the callback.
pub trait OplogStopHandle: Send + Sync {
    fn stop(&self);
}

/// The oplog reader contract.
#[async_trait]
pub trait OplogReader: Send + Sync {
    /// Registers a callback for entries matching `filter`. Entries are
    /// delivered in oplog order, one at a time.
    fn on_oplog_entry(&self, filter: OplogFilter, cb: OplogCallback) -> Box<dyn OplogStopHandle>;

    /// Suspends until every oplog event observed so far has been delivered
    /// to all registered callbacks.
    async fn wait_until_caught_up(&self);
}
