// src/core/observe/fetching.rs

//! The FETCHING phase: batched, generation-guarded point fetches that
//! resolve ambiguous updates, and the transition into STEADY.

use crate::core::errors::TailviewError;
use crate::core::metrics;
use crate::core::observe::driver::{DriverInner, DriverState};
use crate::core::observe::phase::Phase;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

fn internal(message: impl Into<String>) -> TailviewError {
    TailviewError::Internal(message.into())
}

impl DriverInner {
    /// Enters FETCHING and starts the asynchronous fetch loop. Callable
    /// from the non-suspending oplog path; the fetches themselves run on a
    /// task.
    pub(crate) fn fetch_modified_documents(self: &Arc<Self>, st: &mut DriverState) {
        self.register_phase_change(st, Phase::Fetching);
        if self.config.fetching_timeout_ms > 0 {
            self.arm_fetching_watchdog();
        }
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(error) = inner.fetch_loop().await {
                let st = inner.state.lock();
                inner.fail(st, error);
            }
        });
    }

    /// Watchdog for a FETCHING phase that never drains (configured via
    /// `fetching_timeout_ms`): falls back to a full requery. A later
    /// FETCHING entry re-arms its own watchdog, so one armed against an
    /// earlier entry stands down.
    fn arm_fetching_watchdog(self: &Arc<Self>) {
        let armed_at = Instant::now();
        let timeout = Duration::from_millis(self.config.fetching_timeout_ms);
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut st = inner.state.lock();
            if st.stopped || st.phase != Phase::Fetching || st.phase_started_at > armed_at {
                return;
            }
            warn!(
                driver = %inner.id,
                timeout_ms = inner.config.fetching_timeout_ms,
                "fetch phase timed out; falling back to a full requery"
            );
            inner.need_to_poll_query(&mut st);
        });
    }

    /// Drains `need_to_fetch` in batches. Each batch bumps the fetch
    /// generation; completions that arrive after a phase change or a
    /// generation bump are discarded. The first fetch error is captured,
    /// the rest of the batch is awaited, then the error fails the driver.
    pub(crate) async fn fetch_loop(self: &Arc<Self>) -> Result<(), TailviewError> {
        loop {
            let (batch, generation) = {
                let mut st = self.state.lock();
                if st.stopped {
                    return Ok(());
                }
                match st.phase {
                    // A repoll owns the state now; anything we still have
                    // in flight dies on the generation check.
                    Phase::Querying => return Ok(()),
                    Phase::Steady => {
                        return Err(internal("fetch loop running in the steady phase"));
                    }
                    Phase::Fetching => {}
                }
                if st.need_to_fetch.is_empty() {
                    self.be_steady(&mut st);
                    return Ok(());
                }
                let batch = Arc::new(std::mem::take(&mut st.need_to_fetch));
                st.currently_fetching = Some(batch.clone());
                st.fetch_generation += 1;
                (batch, st.fetch_generation)
            };

            let fetches: Vec<_> = batch
                .iter()
                .map(|(id, cache_key)| {
                    let inner = self.clone();
                    let id = id.clone();
                    let cache_key = cache_key.clone();
                    async move {
                        metrics::DOC_FETCHES_TOTAL.inc();
                        let fetched = inner
                            .fetcher
                            .fetch(&inner.cursor.collection_name, &id, &cache_key)
                            .await;
                        match fetched {
                            Err(error) => Some(error),
                            Ok(doc) => {
                                let mut st = inner.state.lock();
                                if !st.stopped
                                    && st.phase == Phase::Fetching
                                    && st.fetch_generation == generation
                                {
                                    if let Err(error) = inner.handle_doc(&mut st, &id, doc) {
                                        return Some(error);
                                    }
                                }
                                None
                            }
                        }
                    }
                })
                .collect();

            let errors = futures::future::join_all(fetches).await;
            if let Some(error) = errors.into_iter().flatten().next() {
                return Err(error);
            }

            let mut st = self.state.lock();
            if st.stopped || st.phase == Phase::Querying {
                return Ok(());
            }
            st.currently_fetching = None;
        }
    }

    /// Enters STEADY and schedules the release of every write token
    /// captured along the way, once the subscribers have seen everything
    /// emitted so far.
    pub(crate) fn be_steady(&self, st: &mut DriverState) {
        self.register_phase_change(st, Phase::Steady);
        let writes = std::mem::take(&mut st.pending_writes);
        if writes.is_empty() {
            return;
        }
        self.multiplexer.on_flush(Box::new(move || {
            for write in writes {
                write.committed();
            }
        }));
    }
}
