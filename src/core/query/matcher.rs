// src/core/query/matcher.rs

//! Selector compilation and matching.
//!
//! The matcher supports the selector shapes the driver can tail through:
//! field equality (including array containment), comparison and membership
//! operators, `$exists`, and `$and`/`$or` composition. `$where` and geo
//! predicates are recognized only so the admissibility check can reject
//! them before a driver is built.

use crate::core::document::{Document, FieldMap};
use crate::core::errors::TailviewError;
use crate::core::query::modifier;
use crate::core::query::projection::Projection;
use crate::core::query::sorter::{value_cmp, value_eq};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A compiled selector predicate.
#[derive(Debug, Clone)]
pub struct Matcher {
    clauses: Vec<Clause>,
    has_where: bool,
    has_geo: bool,
    /// Every field path the selector depends on.
    paths: BTreeSet<String>,
}

#[derive(Debug, Clone)]
enum Clause {
    Field { path: String, predicate: Predicate },
    And(Vec<Clause>),
    Or(Vec<Clause>),
}

#[derive(Debug, Clone)]
enum Predicate {
    Eq(Value),
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone)]
enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    /// Geo predicates never match here; cursors using them are rejected by
    /// the admissibility check before a driver exists.
    Geo,
}

impl Matcher {
    /// Compiles a raw selector document.
    pub fn compile(selector: &Value) -> Result<Matcher, TailviewError> {
        let Some(map) = selector.as_object() else {
            return Err(TailviewError::BadSelector(
                "selector must be an object".to_string(),
            ));
        };
        let mut matcher = Matcher {
            clauses: Vec::new(),
            has_where: false,
            has_geo: false,
            paths: BTreeSet::new(),
        };
        matcher.clauses = matcher.compile_object(map)?;
        Ok(matcher)
    }

    fn compile_object(&mut self, map: &FieldMap) -> Result<Vec<Clause>, TailviewError> {
        let mut clauses = Vec::new();
        for (key, value) in map {
            match key.as_str() {
                "$and" | "$or" => {
                    let Some(branches) = value.as_array() else {
                        return Err(TailviewError::BadSelector(format!(
                            "{key} requires an array of selectors"
                        )));
                    };
                    let mut compiled = Vec::new();
                    for branch in branches {
                        let Some(branch_map) = branch.as_object() else {
                            return Err(TailviewError::BadSelector(format!(
                                "{key} branches must be objects"
                            )));
                        };
                        compiled.push(Clause::And(self.compile_object(branch_map)?));
                    }
                    clauses.push(if key == "$and" {
                        Clause::And(compiled)
                    } else {
                        Clause::Or(compiled)
                    });
                }
                "$where" => {
                    // Recorded for admissibility; never evaluated.
                    self.has_where = true;
                }
                other if other.starts_with('$') => {
                    return Err(TailviewError::BadSelector(format!(
                        "unsupported selector operator: {other}"
                    )));
                }
                path => {
                    self.paths.insert(path.to_string());
                    let predicate = self.compile_predicate(value)?;
                    clauses.push(Clause::Field {
                        path: path.to_string(),
                        predicate,
                    });
                }
            }
        }
        Ok(clauses)
    }

    fn compile_predicate(&mut self, value: &Value) -> Result<Predicate, TailviewError> {
        let Some(map) = value
            .as_object()
            .filter(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
        else {
            return Ok(Predicate::Eq(value.clone()));
        };
        let mut ops = Vec::new();
        for (op, operand) in map {
            let compiled = match op.as_str() {
                "$eq" => FieldOp::Eq(operand.clone()),
                "$ne" => FieldOp::Ne(operand.clone()),
                "$gt" => FieldOp::Gt(operand.clone()),
                "$gte" => FieldOp::Gte(operand.clone()),
                "$lt" => FieldOp::Lt(operand.clone()),
                "$lte" => FieldOp::Lte(operand.clone()),
                "$in" | "$nin" => {
                    let Some(values) = operand.as_array() else {
                        return Err(TailviewError::BadSelector(format!(
                            "{op} requires an array operand"
                        )));
                    };
                    if op == "$in" {
                        FieldOp::In(values.clone())
                    } else {
                        FieldOp::Nin(values.clone())
                    }
                }
                "$exists" => FieldOp::Exists(operand.as_bool().unwrap_or(false)),
                "$near" | "$nearSphere" | "$geoWithin" | "$geoIntersects" => {
                    self.has_geo = true;
                    FieldOp::Geo
                }
                other => {
                    return Err(TailviewError::BadSelector(format!(
                        "unsupported field operator: {other}"
                    )));
                }
            };
            ops.push(compiled);
        }
        Ok(Predicate::Ops(ops))
    }

    /// Evaluates the selector against a document.
    pub fn document_matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| eval_clause(clause, doc))
    }

    /// Whether applying the given update document could make the selector
    /// become true for some document. Conservative: answers true whenever a
    /// modified path overlaps a selector path. A modifier touching no
    /// selector path can never change the match result, so false negatives
    /// are impossible.
    pub fn can_become_true_by_modifier(&self, change: &FieldMap) -> bool {
        modifier::modified_paths(change)
            .iter()
            .any(|modified| self.paths.iter().any(|path| paths_overlap(path, modified)))
    }

    pub fn has_where(&self) -> bool {
        self.has_where
    }

    pub fn has_geo_query(&self) -> bool {
        self.has_geo
    }

    /// The field paths this selector reads.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|p| p.as_str())
    }

    /// Widens a projection so every selector-relevant field survives it.
    pub fn combine_into_projection(&self, projection: &Projection) -> Projection {
        projection.combine_with_paths(self.paths())
    }
}

/// Two dotted paths overlap when one is the other or a prefix of it.
fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() < b.len() { (a, b) } else { (b, a) };
    longer.starts_with(shorter) && longer.as_bytes().get(shorter.len()) == Some(&b'.')
}

fn eval_clause(clause: &Clause, doc: &Document) -> bool {
    match clause {
        Clause::Field { path, predicate } => eval_predicate(predicate, doc.lookup(path).as_ref()),
        Clause::And(branches) => branches.iter().all(|c| eval_clause(c, doc)),
        Clause::Or(branches) => branches.iter().any(|c| eval_clause(c, doc)),
    }
}

fn eval_predicate(predicate: &Predicate, actual: Option<&Value>) -> bool {
    match predicate {
        Predicate::Eq(expected) => eval_eq(expected, actual),
        Predicate::Ops(ops) => ops.iter().all(|op| eval_op(op, actual)),
    }
}

/// Equality semantics: a missing field equals null; an array field matches
/// if the whole array or any element equals the expected value.
fn eval_eq(expected: &Value, actual: Option<&Value>) -> bool {
    match actual {
        None => expected.is_null(),
        Some(actual) => {
            if value_eq(actual, expected) {
                return true;
            }
            match actual {
                Value::Array(elements) => elements.iter().any(|e| value_eq(e, expected)),
                Value::Null => expected.is_null(),
                _ => false,
            }
        }
    }
}

/// Ordered comparisons only apply between two numbers or two strings;
/// cross-type and missing-field comparisons never match.
fn eval_ordered(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let comparable = matches!(
        (actual, operand),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_))
    );
    comparable && accept(value_cmp(actual, operand))
}

fn eval_op(op: &FieldOp, actual: Option<&Value>) -> bool {
    match op {
        FieldOp::Eq(expected) => eval_eq(expected, actual),
        FieldOp::Ne(expected) => !eval_eq(expected, actual),
        FieldOp::Gt(operand) => eval_ordered(actual, operand, |o| o == Ordering::Greater),
        FieldOp::Gte(operand) => eval_ordered(actual, operand, |o| o != Ordering::Less),
        FieldOp::Lt(operand) => eval_ordered(actual, operand, |o| o == Ordering::Less),
        FieldOp::Lte(operand) => eval_ordered(actual, operand, |o| o != Ordering::Greater),
        FieldOp::In(values) => values.iter().any(|v| eval_eq(v, actual)),
        FieldOp::Nin(values) => !values.iter().any(|v| eval_eq(v, actual)),
        FieldOp::Exists(expected) => actual.is_some() == *expected,
        FieldOp::Geo => false,
    }
}
