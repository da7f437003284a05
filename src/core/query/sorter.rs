// src/core/query/sorter.rs

//! Sort specifications and the comparator derived from them.
//!
//! A [`Sorter`] extracts a [`SortKey`] per document; keys carry their own
//! direction-aware total order so they can live inside ordered containers.

use crate::core::document::Document;
use crate::core::errors::TailviewError;
use crate::core::query::projection::Projection;
use serde_json::Value;
use std::cmp::Ordering;

/// Direction of one sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// An ordered list of `(field path, direction)` pairs.
pub type SortSpec = Vec<(String, SortDirection)>;

/// A compiled sort specification.
#[derive(Debug, Clone)]
pub struct Sorter {
    spec: SortSpec,
}

impl Sorter {
    /// Compiles a sort spec. An empty spec is rejected: a sorter exists to
    /// order documents, and limited queries depend on that order being
    /// deterministic.
    pub fn new(spec: SortSpec) -> Result<Self, TailviewError> {
        if spec.is_empty() {
            return Err(TailviewError::BadSelector(
                "sort specification must name at least one field".to_string(),
            ));
        }
        Ok(Sorter { spec })
    }

    /// Extracts the sort key of a document. Missing fields sort as null.
    pub fn key_for(&self, doc: &Document) -> SortKey {
        SortKey(
            self.spec
                .iter()
                .map(|(path, direction)| KeyPart {
                    value: doc.lookup(path).unwrap_or(Value::Null),
                    direction: *direction,
                })
                .collect(),
        )
    }

    /// Compares two documents by this sort specification.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        self.key_for(a).cmp(&self.key_for(b))
    }

    /// Widens a projection so that every sort field survives it; the driver
    /// must be able to re-derive sort keys from its cached documents.
    pub fn combine_into_projection(&self, projection: &Projection) -> Projection {
        projection.combine_with_paths(self.spec.iter().map(|(path, _)| path.as_str()))
    }
}

/// The extracted sort key of one document. Keys from the same sorter have
/// the same arity and compare part-by-part, honoring each part's direction.
#[derive(Debug, Clone)]
pub struct SortKey(Vec<KeyPart>);

#[derive(Debug, Clone)]
struct KeyPart {
    value: Value,
    direction: SortDirection,
}

impl SortKey {
    /// A key that compares equal to every other empty key; used by
    /// unsorted containers that fall back to id order.
    pub fn empty() -> Self {
        SortKey(Vec::new())
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let part = match value_cmp(&a.value, &b.value) {
                Ordering::Equal => continue,
                ordering => ordering,
            };
            return match a.direction {
                SortDirection::Ascending => part,
                SortDirection::Descending => part.reverse(),
            };
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Rank of a value's type in the cross-type sort order: null, then numbers,
/// then strings, then objects, then arrays, then booleans.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// A total order over JSON values: by type rank first, then within the type.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => {
            // serde_json maps iterate in key order, so pairwise comparison
            // is deterministic.
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let key = ka.cmp(kb);
                if key != Ordering::Equal {
                    return key;
                }
                let value = value_cmp(va, vb);
                if value != Ordering::Equal {
                    return value;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Array(x), Value::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let value = value_cmp(va, vb);
                if value != Ordering::Equal {
                    return value;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Checks whether two values are equal under the driver's value order.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    value_cmp(a, b) == Ordering::Equal
}
