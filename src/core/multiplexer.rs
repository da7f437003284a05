// src/core/multiplexer.rs

//! The contract of the multiplexer that fans driver callbacks out to
//! individual subscribers.

use crate::core::document::{ChangedFields, DocId, FieldMap};
use crate::core::errors::TailviewError;

/// Callback scheduled to run once all previously emitted callbacks have
/// been delivered to every subscriber.
pub type FlushCallback = Box<dyn FnOnce() + Send>;

/// Fan-out surface for observe callbacks.
///
/// All methods are non-blocking enqueues: the driver invokes them while
/// holding its state lock, so implementations must never reenter the driver
/// synchronously and must preserve per-driver emission order to each
/// subscriber.
pub trait Multiplexer: Send + Sync {
    /// A document entered the result set. `fields` is the publish-projected
    /// field map, without the id.
    fn added(&self, id: &DocId, fields: FieldMap);

    /// A published document changed. `fields` holds only the changed
    /// entries; `None` marks a cleared field.
    fn changed(&self, id: &DocId, fields: ChangedFields);

    /// A document left the result set.
    fn removed(&self, id: &DocId);

    /// The initial query completed; observers may now return.
    fn ready(&self);

    /// The driver failed fatally; subscribers are torn down with this error.
    fn query_error(&self, error: TailviewError);

    /// Schedules `cb` to run after every callback emitted so far has been
    /// observed by all subscribers.
    fn on_flush(&self, cb: FlushCallback);
}
