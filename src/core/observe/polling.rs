// src/core/observe/polling.rs

//! The QUERYING phase: the initial query, full requeries, and the
//! transition out of querying once the oplog has been drained.

use crate::core::document::{DocId, Document};
use crate::core::errors::TailviewError;
use crate::core::metrics;
use crate::core::observe::driver::{DriverInner, DriverState};
use crate::core::observe::phase::Phase;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

fn internal(message: impl Into<String>) -> TailviewError {
    TailviewError::Internal(message.into())
}

impl DriverInner {
    /// Runs the very first query. Documents are routed through
    /// `add_matching`, so for limited queries the overflow beyond the
    /// limit lands in the buffer. Fetching fewer than `2 * limit`
    /// documents proves the buffer holds every remaining match.
    ///
    /// Unlike later polls, a failure here is not retried: the observer has
    /// never seen a working query, so the error is surfaced and the driver
    /// stops.
    pub(crate) async fn run_initial_query(self: Arc<Self>) {
        let docs = match self
            .source
            .run_query(&self.cursor, &self.shared_projection, self.limit * 2)
            .await
        {
            Ok(docs) => docs,
            Err(error) => {
                warn!(driver = %self.id, %error, "initial query failed");
                let st = self.state.lock();
                self.fail(st, error);
                return;
            }
        };

        {
            let mut st = self.state.lock();
            if st.stopped {
                return;
            }
            let fetched = docs.len();
            for doc in docs {
                if let Err(error) = self.add_matching(&mut st, doc) {
                    self.fail(st, error);
                    return;
                }
            }
            st.safe_append_to_buffer = self.limit == 0 || fetched < self.limit * 2;
        }

        // Observers may return now; anything that happened since the query
        // is resolved by the fetch pass that follows.
        self.multiplexer.ready();
        self.done_querying().await;
    }

    /// Schedules a full requery, discarding every queued and in-flight
    /// fetch. Anything still running dies on the generation check.
    pub(crate) fn poll_query(self: &Arc<Self>, st: &mut DriverState) {
        if st.stopped {
            return;
        }
        st.need_to_fetch.clear();
        st.currently_fetching = None;
        st.fetch_generation += 1;
        self.register_phase_change(st, Phase::Querying);
        metrics::POLL_QUERIES_TOTAL.inc();
        let inner = self.clone();
        tokio::spawn(async move { inner.run_poll_query().await });
    }

    /// A repoll is needed: start one now, or flag the one already running
    /// to go again when it finishes.
    pub(crate) fn need_to_poll_query(self: &Arc<Self>, st: &mut DriverState) {
        if st.stopped {
            return;
        }
        if st.phase != Phase::Querying {
            self.poll_query(st);
        } else {
            st.requery_when_done_this_query = true;
        }
    }

    async fn run_poll_query(self: Arc<Self>) {
        let retry_delay = Duration::from_millis(self.config.poll_retry_delay_ms);
        loop {
            if self.state.lock().stopped {
                return;
            }
            match self
                .source
                .run_query(&self.cursor, &self.shared_projection, self.limit * 2)
                .await
            {
                Ok(mut docs) => {
                    let mut st = self.state.lock();
                    if st.stopped {
                        return;
                    }
                    // The first `limit` documents are the new answer; the
                    // rest seed the buffer.
                    let split = if self.limit > 0 {
                        self.limit.min(docs.len())
                    } else {
                        docs.len()
                    };
                    let new_buffer = docs.split_off(split);
                    if let Err(error) = self.publish_new_results(&mut st, docs, new_buffer) {
                        self.fail(st, error);
                        return;
                    }
                    break;
                }
                Err(error) => {
                    // Transient failures (a failover, say) must not kill a
                    // working observer; log and try again.
                    warn!(driver = %self.id, %error, "poll query failed; retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
        self.done_querying().await;
    }

    /// Replaces the driver's caches with a fresh query answer, emitting
    /// the difference against what was published before.
    pub(crate) fn publish_new_results(
        self: &Arc<Self>,
        st: &mut DriverState,
        new_results: Vec<Document>,
        new_buffer: Vec<Document>,
    ) -> Result<(), TailviewError> {
        let new_results: IndexMap<DocId, Document> = new_results
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        // The old buffer is stale; clear it up front so removals below do
        // not promote out of it.
        if let Some(buffer) = st.buffer.as_mut() {
            buffer.clear();
        }

        // Collect, then delete: never mutate the published set while
        // iterating it.
        let ids_to_remove: Vec<DocId> = st
            .published
            .ids()
            .into_iter()
            .filter(|id| !new_results.contains_key(id))
            .collect();
        for id in &ids_to_remove {
            self.remove_published(st, id)?;
        }

        for (id, doc) in &new_results {
            self.handle_doc(st, id, Some(doc.clone()))?;
        }

        // Sanity checks: everything we tried to publish must have landed.
        if st.published.len() != new_results.len() {
            return Err(internal(format!(
                "driver and collection disagree on the result size: {} published, {} queried",
                st.published.len(),
                new_results.len()
            )));
        }
        for id in st.published.ids() {
            if !new_results.contains_key(&id) {
                return Err(internal(format!(
                    "published document {id} is absent from the requery result"
                )));
            }
        }

        for doc in &new_buffer {
            let id = doc.id.clone();
            self.add_buffered(st, &id, doc)?;
        }
        st.safe_append_to_buffer = self.limit == 0 || new_buffer.len() < self.limit;
        Ok(())
    }

    /// The query finished; wait for the oplog to drain, then either requery
    /// (if one was requested meanwhile), go steady, or fetch what the oplog
    /// touched while we were querying.
    pub(crate) async fn done_querying(self: &Arc<Self>) {
        {
            let st = self.state.lock();
            if st.stopped {
                return;
            }
        }
        self.oplog.wait_until_caught_up().await;

        let mut st = self.state.lock();
        if st.stopped {
            return;
        }
        if st.phase != Phase::Querying {
            let error = internal(format!("phase unexpectedly {} after a query", st.phase));
            self.fail(st, error);
            return;
        }
        if st.requery_when_done_this_query {
            st.requery_when_done_this_query = false;
            self.poll_query(&mut st);
        } else if st.need_to_fetch.is_empty() {
            self.be_steady(&mut st);
        } else {
            self.fetch_modified_documents(&mut st);
        }
    }
}
