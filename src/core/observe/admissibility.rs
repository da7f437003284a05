// src/core/observe/admissibility.rs

//! The static check answering whether a cursor can be served by oplog
//! tailing at all. Runs before a driver is constructed; a `false` answer
//! sends the caller to a polling strategy instead.

use crate::core::cursor::CursorDescription;
use crate::core::errors::TailviewError;
use crate::core::query::matcher::Matcher;
use crate::core::query::projection::Projection;

/// Whether the described cursor can be driven from the oplog.
///
/// Rejected: an explicit opt-out, non-zero skip (we would have to track
/// every skipped id), limit without sort (no deterministic order to
/// maintain), projections using unsupported operators, and `$where` or geo
/// selectors. A projection that fails to compile for any *other* reason is
/// a real error and propagates.
pub fn cursor_supported_by_oplog(
    description: &CursorDescription,
    matcher: &Matcher,
) -> Result<bool, TailviewError> {
    let options = &description.options;

    if options.disable_oplog {
        return Ok(false);
    }
    if options.skip > 0 || (options.limit > 0 && options.sort.is_none()) {
        return Ok(false);
    }
    if let Some(fields) = &options.fields {
        match Projection::compile(Some(fields)) {
            Ok(_) => {}
            Err(TailviewError::UnsupportedProjection(_)) => return Ok(false),
            Err(error) => return Err(error),
        }
    }

    Ok(!matcher.has_where() && !matcher.has_geo_query())
}
