// src/core/document.rs

//! Document identity and field-map types shared across the driver, plus the
//! changed-field diffing used when emitting `changed` callbacks.

use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The field map of a document, keyed by field name. The document id is
/// carried separately as a [`DocId`] and never appears in a field map.
pub type FieldMap = serde_json::Map<String, Value>;

/// The payload of a `changed` callback: field name to `Some(new value)` for
/// fields that were added or changed, `None` for fields the update cleared.
pub type ChangedFields = BTreeMap<String, Option<Value>>;

/// An opaque document identifier. Wraps raw bytes so that ids of any
/// encoding can be carried without interpretation; ordering and hashing are
/// byte-wise.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(Bytes);

impl DocId {
    pub fn new(bytes: Bytes) -> Self {
        DocId(bytes)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(Bytes::from(s))
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({})", String::from_utf8_lossy(&self.0))
    }
}

/// A cached document: an id plus the fields the shared projection retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub fields: FieldMap,
}

impl Document {
    pub fn new(id: DocId, fields: FieldMap) -> Self {
        Document { id, fields }
    }

    /// Resolves a dotted field path against this document. The special path
    /// `_id` resolves to the id rendered as a string.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if path == "_id" {
            return Some(Value::String(self.id.to_string()));
        }
        lookup_path(&self.fields, path)
    }
}

/// Resolves a dotted path against a field map, descending through nested
/// objects. Returns `None` when any segment is missing or not an object.
pub fn lookup_path(fields: &FieldMap, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Computes the changed-field payload between two projected field maps.
/// Fields present in `new` with a different (or no) value in `old` map to
/// `Some(value)`; fields present only in `old` map to `None`.
pub fn make_changed_fields(new: &FieldMap, old: &FieldMap) -> ChangedFields {
    let mut changed = ChangedFields::new();
    for (name, value) in new {
        if old.get(name) != Some(value) {
            changed.insert(name.clone(), Some(value.clone()));
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            changed.insert(name.clone(), None);
        }
    }
    changed
}
