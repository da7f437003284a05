// src/core/query/modifier.rs

//! Update modifiers: distinguishing modifier updates from replacements,
//! applying `$set`/`$unset` to cached documents, and deciding whether a
//! modifier may be applied locally at all.

use crate::core::document::FieldMap;
use crate::core::errors::TailviewError;
use serde_json::Value;

/// Field names containing this marker carry custom-type encodings; mutating
/// them through a path-level modifier would corrupt the encoded value, so
/// such modifiers force a refetch instead of a local application.
const CUSTOM_TYPE_MARKER: &str = "EJSON$";

/// Modifier keys the driver knows how to interpret. `$v` is the oplog's
/// internal version marker and carries no field changes.
const SET_OP: &str = "$set";
const UNSET_OP: &str = "$unset";
const VERSION_OP: &str = "$v";

/// A parsed `$set`/`$unset` modifier.
#[derive(Debug, Clone, Default)]
pub struct Modifier {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
}

/// Whether an update payload is a modifier, as opposed to a full
/// replacement document.
pub fn is_modifier(change: &FieldMap) -> bool {
    change.contains_key(SET_OP) || change.contains_key(UNSET_OP)
}

/// Whether the modifier can be applied to a cached copy of the document
/// without consulting the database: every key must be a known modifier
/// operation and no touched field name may carry a custom-type marker.
pub fn can_apply_locally(change: &FieldMap) -> bool {
    change.iter().all(|(op, fields)| match op.as_str() {
        VERSION_OP => true,
        SET_OP | UNSET_OP => fields
            .as_object()
            .is_some_and(|map| map.keys().all(|field| !field.contains(CUSTOM_TYPE_MARKER))),
        _ => false,
    })
}

/// The dotted field paths an update payload touches. For replacements this
/// is the replacement's own top-level fields.
pub fn modified_paths(change: &FieldMap) -> Vec<String> {
    if !is_modifier(change) {
        return change.keys().cloned().collect();
    }
    let mut paths = Vec::new();
    for op in [SET_OP, UNSET_OP] {
        if let Some(fields) = change.get(op).and_then(Value::as_object) {
            paths.extend(fields.keys().cloned());
        }
    }
    paths
}

impl Modifier {
    /// Parses an update payload known to be a locally applicable modifier.
    pub fn parse(change: &FieldMap) -> Result<Modifier, TailviewError> {
        let mut modifier = Modifier::default();
        for (op, fields) in change {
            match op.as_str() {
                VERSION_OP => continue,
                SET_OP => {
                    let Some(map) = fields.as_object() else {
                        return Err(TailviewError::BadModifier(
                            "$set requires an object operand".to_string(),
                        ));
                    };
                    for (path, value) in map {
                        modifier.set.push((path.clone(), value.clone()));
                    }
                }
                UNSET_OP => {
                    let Some(map) = fields.as_object() else {
                        return Err(TailviewError::BadModifier(
                            "$unset requires an object operand".to_string(),
                        ));
                    };
                    modifier.unset.extend(map.keys().cloned());
                }
                other => {
                    return Err(TailviewError::BadModifier(format!(
                        "unsupported modifier operation: {other}"
                    )));
                }
            }
        }
        Ok(modifier)
    }

    /// Applies the modifier in place. `$set` creates missing intermediate
    /// objects; `$unset` of a missing path is a no-op.
    pub fn apply(&self, fields: &mut FieldMap) -> Result<(), TailviewError> {
        for (path, value) in &self.set {
            set_path(fields, path, value.clone())?;
        }
        for path in &self.unset {
            unset_path(fields, path);
        }
        Ok(())
    }
}

fn set_path(fields: &mut FieldMap, path: &str, value: Value) -> Result<(), TailviewError> {
    let mut segments = path.split('.').peekable();
    let mut current = fields;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(FieldMap::new()));
        match entry {
            Value::Object(map) => current = map,
            _ => {
                return Err(TailviewError::BadModifier(format!(
                    "cannot create field path {path}: intermediate value is not an object"
                )));
            }
        }
    }
    Ok(())
}

fn unset_path(fields: &mut FieldMap, path: &str) {
    let mut segments = path.split('.').peekable();
    let mut current = fields;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.remove(segment);
            return;
        }
        match current.get_mut(segment) {
            Some(Value::Object(map)) => current = map,
            _ => return,
        }
    }
}
