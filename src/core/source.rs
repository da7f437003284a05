// src/core/source.rs

//! Contracts of the two read paths the driver uses against the underlying
//! collection: batch queries for the QUERYING phase, and point fetches for
//! the FETCHING phase.

use crate::core::cursor::CursorDescription;
use crate::core::document::{DocId, Document};
use crate::core::errors::TailviewError;
use crate::core::oplog::OplogTimestamp;
use crate::core::query::projection::Projection;
use async_trait::async_trait;

/// Runs full collection queries on behalf of the driver.
#[async_trait]
pub trait QuerySource: Send + Sync {
    /// Runs the described query with the driver's shared projection and an
    /// overriding limit (`0` = unlimited), returning matching documents in
    /// sort order. Skip is always zero for admissible cursors.
    async fn run_query(
        &self,
        description: &CursorDescription,
        projection: &Projection,
        limit: usize,
    ) -> Result<Vec<Document>, TailviewError>;
}

/// Point-lookup of single documents by id.
///
/// `cache_key` is the oplog position that made the fetch necessary; two
/// fetches for the same `(id, cache_key)` pair may be coalesced by the
/// implementation. Implementations must complete asynchronously: the result
/// is never produced synchronously with respect to the caller.
#[async_trait]
pub trait DocFetcher: Send + Sync {
    async fn fetch(
        &self,
        collection_name: &str,
        id: &DocId,
        cache_key: &OplogTimestamp,
    ) -> Result<Option<Document>, TailviewError>;
}
