// src/core/cursor.rs

//! The immutable description of an observed query: collection, selector,
//! and cursor options.

use crate::core::query::sorter::SortSpec;
use serde_json::Value;

/// Describes a query against one collection. Immutable once constructed;
/// drivers never mutate the description they observe.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorDescription {
    pub collection_name: String,
    /// The raw selector document.
    pub selector: Value,
    pub options: CursorOptions,
}

impl CursorDescription {
    pub fn new(collection_name: impl Into<String>, selector: Value, options: CursorOptions) -> Self {
        CursorDescription {
            collection_name: collection_name.into(),
            selector,
            options,
        }
    }
}

/// Options attached to a cursor. `limit == 0` means unlimited.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CursorOptions {
    pub sort: Option<SortSpec>,
    pub limit: usize,
    pub skip: usize,
    /// Raw field projection specifier, e.g. `{"status": 1}`.
    pub fields: Option<Value>,
    /// Explicit opt-out: when set, the admissibility check refuses to serve
    /// this cursor from the oplog.
    pub disable_oplog: bool,
}
