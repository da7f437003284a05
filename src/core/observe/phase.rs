// src/core/observe/phase.rs

//! The driver's three-phase lifecycle.

use std::fmt;

/// The phase an observe driver is in.
///
/// - `Querying`: a full collection query is in flight.
/// - `Fetching`: ambiguous updates are being resolved by point fetches.
/// - `Steady`: live oplog tailing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Querying,
    Fetching,
    Steady,
}

impl Phase {
    /// Stable label used for the per-phase time metric.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Querying => "querying",
            Phase::Fetching => "fetching",
            Phase::Steady => "steady",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
