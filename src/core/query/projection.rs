// src/core/query/projection.rs

//! Field projections: compiling a raw `fields` specifier into an applicable
//! projection, and widening projections with selector- or sort-relevant
//! paths.

use crate::core::document::FieldMap;
use crate::core::errors::TailviewError;
use serde_json::Value;
use std::collections::BTreeSet;

/// A compiled field projection.
///
/// Only flat, boolean-valued specifiers are supported; operator projections
/// (`$slice`, `$elemMatch`, positional) and dotted paths are rejected with
/// [`TailviewError::UnsupportedProjection`], which the admissibility check
/// maps to "cannot be served from the oplog".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// No projection: every field passes through.
    All,
    /// Only the named fields pass through.
    Include(BTreeSet<String>),
    /// Every field except the named ones passes through.
    Exclude(BTreeSet<String>),
}

impl Projection {
    /// Compiles a raw `fields` specifier. `None` means no projection.
    pub fn compile(spec: Option<&Value>) -> Result<Projection, TailviewError> {
        let Some(spec) = spec else {
            return Ok(Projection::All);
        };
        let Some(map) = spec.as_object() else {
            return Err(TailviewError::UnsupportedProjection(
                "projection specifier must be an object".to_string(),
            ));
        };

        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        for (field, flag) in map {
            if field.contains('$') {
                return Err(TailviewError::UnsupportedProjection(format!(
                    "operator projections are not supported: {field}"
                )));
            }
            if field.contains('.') {
                return Err(TailviewError::UnsupportedProjection(format!(
                    "nested field projections are not supported: {field}"
                )));
            }
            let keep = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                _ => {
                    return Err(TailviewError::UnsupportedProjection(format!(
                        "projection value for {field} must be a boolean or number"
                    )));
                }
            };
            // The id is carried outside field maps; either polarity on _id
            // is accepted and ignored.
            if field == "_id" {
                continue;
            }
            if keep {
                included.insert(field.clone());
            } else {
                excluded.insert(field.clone());
            }
        }

        match (included.is_empty(), excluded.is_empty()) {
            (true, true) => Ok(Projection::All),
            (false, true) => Ok(Projection::Include(included)),
            (true, false) => Ok(Projection::Exclude(excluded)),
            (false, false) => Err(TailviewError::UnsupportedProjection(
                "cannot mix inclusion and exclusion in one projection".to_string(),
            )),
        }
    }

    /// Applies the projection to a field map.
    pub fn apply(&self, fields: &FieldMap) -> FieldMap {
        match self {
            Projection::All => fields.clone(),
            Projection::Include(keep) => fields
                .iter()
                .filter(|(name, _)| keep.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            Projection::Exclude(drop) => fields
                .iter()
                .filter(|(name, _)| !drop.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Widens the projection so the top-level fields of the given paths
    /// survive it. Inclusions grow; exclusions shrink; `All` stays `All`.
    /// Caching more than strictly necessary is always safe.
    pub fn combine_with_paths<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Projection {
        let heads: BTreeSet<String> = paths
            .into_iter()
            .filter_map(|path| path.split('.').next())
            .filter(|head| *head != "_id" && !head.is_empty())
            .map(|head| head.to_string())
            .collect();
        match self {
            Projection::All => Projection::All,
            Projection::Include(keep) => Projection::Include(keep.union(&heads).cloned().collect()),
            Projection::Exclude(drop) => {
                Projection::Exclude(drop.difference(&heads).cloned().collect())
            }
        }
    }
}
