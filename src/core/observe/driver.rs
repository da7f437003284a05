// src/core/observe/driver.rs

//! Driver construction, lifecycle, and the write-fence coordinator.
//!
//! All driver state lives behind a single mutex; the non-suspending entry
//! points (oplog notifications, fenced writes, stop) lock, mutate, and
//! return, while suspending work runs on spawned tasks that reacquire the
//! lock between awaits.

use crate::config::ObserveConfig;
use crate::core::cursor::CursorDescription;
use crate::core::document::{DocId, Document};
use crate::core::errors::TailviewError;
use crate::core::fence::{WriteFence, WriteToken};
use crate::core::metrics;
use crate::core::multiplexer::Multiplexer;
use crate::core::observe::heap::DocHeap;
use crate::core::observe::phase::Phase;
use crate::core::oplog::{OplogFilter, OplogReader, OplogStopHandle, OplogTimestamp};
use crate::core::query::matcher::Matcher;
use crate::core::query::projection::Projection;
use crate::core::query::sorter::Sorter;
use crate::core::source::{DocFetcher, QuerySource};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

/// Everything needed to build a driver. The matcher and sorter are
/// precompiled by the caller, which has usually already consulted
/// [`cursor_supported_by_oplog`](super::cursor_supported_by_oplog) with
/// them.
pub struct ObserveDriverOptions {
    pub cursor: CursorDescription,
    /// Ordered observation is not supported; passing `true` is rejected at
    /// construction.
    pub ordered: bool,
    pub matcher: Arc<Matcher>,
    pub sorter: Option<Arc<Sorter>>,
    pub oplog: Arc<dyn OplogReader>,
    pub fetcher: Arc<dyn DocFetcher>,
    pub source: Arc<dyn QuerySource>,
    pub multiplexer: Arc<dyn Multiplexer>,
    pub config: ObserveConfig,
}

/// A live query driver. Once started it runs until [`ObserveDriver::stop`]
/// is called, which the owning multiplexer does exactly once when its last
/// handle goes away.
pub struct ObserveDriver {
    inner: Arc<DriverInner>,
}

pub(crate) struct DriverInner {
    pub(crate) id: Uuid,
    pub(crate) cursor: CursorDescription,
    /// `0` means unlimited.
    pub(crate) limit: usize,
    pub(crate) matcher: Arc<Matcher>,
    pub(crate) sorter: Option<Arc<Sorter>>,
    /// Fields exposed to subscribers.
    pub(crate) publish_projection: Projection,
    /// Publish fields plus selector- and sort-relevant fields; what the
    /// driver caches and queries with.
    pub(crate) shared_projection: Projection,
    pub(crate) oplog: Arc<dyn OplogReader>,
    pub(crate) fetcher: Arc<dyn DocFetcher>,
    pub(crate) source: Arc<dyn QuerySource>,
    pub(crate) multiplexer: Arc<dyn Multiplexer>,
    pub(crate) config: ObserveConfig,
    pub(crate) state: Mutex<DriverState>,
}

pub(crate) struct DriverState {
    pub(crate) phase: Phase,
    pub(crate) phase_started_at: Instant,
    pub(crate) published: DocHeap,
    /// Only present for limited queries.
    pub(crate) buffer: Option<DocHeap>,
    /// True while the buffer is known to hold the next matching documents
    /// in order; cleared whenever a matching document is dropped from
    /// cache.
    pub(crate) safe_append_to_buffer: bool,
    pub(crate) need_to_fetch: IndexMap<DocId, OplogTimestamp>,
    /// The batch currently in flight; treated as immutable for its
    /// duration.
    pub(crate) currently_fetching: Option<Arc<IndexMap<DocId, OplogTimestamp>>>,
    pub(crate) fetch_generation: u64,
    pub(crate) requery_when_done_this_query: bool,
    pub(crate) pending_writes: Vec<Box<dyn WriteToken>>,
    pub(crate) stopped: bool,
    pub(crate) stop_handles: Vec<Box<dyn OplogStopHandle>>,
}

impl ObserveDriver {
    /// Builds a driver, subscribes it to the oplog, and kicks off the
    /// initial query. Must be called from within a tokio runtime.
    pub fn start(options: ObserveDriverOptions) -> Result<ObserveDriver, TailviewError> {
        if options.ordered {
            return Err(TailviewError::OrderedObserveUnsupported);
        }
        let limit = options.cursor.options.limit;
        if limit > 0 && options.sorter.is_none() {
            return Err(TailviewError::Internal(
                "limited queries require a sort specifier".to_string(),
            ));
        }

        let publish_projection = Projection::compile(options.cursor.options.fields.as_ref())?;
        let mut shared_projection = options.matcher.combine_into_projection(&publish_projection);
        if let Some(sorter) = &options.sorter {
            shared_projection = sorter.combine_into_projection(&shared_projection);
        }

        let inner = Arc::new(DriverInner {
            id: Uuid::new_v4(),
            limit,
            matcher: options.matcher,
            publish_projection,
            shared_projection,
            oplog: options.oplog,
            fetcher: options.fetcher,
            source: options.source,
            multiplexer: options.multiplexer,
            config: options.config,
            state: Mutex::new(DriverState {
                phase: Phase::Querying,
                phase_started_at: Instant::now(),
                published: DocHeap::new(options.sorter.clone()),
                buffer: (limit > 0).then(|| DocHeap::new(options.sorter.clone())),
                safe_append_to_buffer: true,
                need_to_fetch: IndexMap::new(),
                currently_fetching: None,
                fetch_generation: 0,
                requery_when_done_this_query: false,
                pending_writes: Vec::new(),
                stopped: false,
                stop_handles: Vec::new(),
            }),
            sorter: options.sorter,
            cursor: options.cursor,
        });

        metrics::OBSERVE_DRIVERS_OPLOG.inc();
        debug!(
            driver = %inner.id,
            collection = %inner.cursor.collection_name,
            limit,
            "observe driver starting"
        );

        let weak = Arc::downgrade(&inner);
        let handle = inner.oplog.on_oplog_entry(
            OplogFilter {
                collection_name: inner.cursor.collection_name.clone(),
            },
            Box::new(move |notification| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_oplog_notification(notification);
                }
            }),
        );
        inner.state.lock().stop_handles.push(handle);

        let task = inner.clone();
        tokio::spawn(async move { task.run_initial_query().await });

        Ok(ObserveDriver { inner })
    }

    /// A fenced write touched this driver's collection. Captures a write
    /// token now and commits it once every subscriber has observed the
    /// corresponding change. Never suspends.
    pub fn observe_fenced_write(&self, fence: &dyn WriteFence) {
        self.inner.observe_fenced_write(fence);
    }

    /// Schedules a full requery. Hook for external conditions the driver
    /// cannot detect itself, such as a primary failover.
    pub fn force_repoll(&self) {
        let mut st = self.inner.state.lock();
        if !st.stopped {
            self.inner.need_to_poll_query(&mut st);
        }
    }

    /// Idempotent teardown: unsubscribes from the oplog, commits any
    /// captured write tokens, and drops the caches.
    pub fn stop(&self) {
        let st = self.inner.state.lock();
        self.inner.stop_with_guard(st);
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn published_len(&self) -> usize {
        self.inner.state.lock().published.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .buffer
            .as_ref()
            .map_or(0, |buffer| buffer.len())
    }

    pub fn safe_append_to_buffer(&self) -> bool {
        self.inner.state.lock().safe_append_to_buffer
    }

    /// Ids currently published, in sort order.
    pub fn published_ids(&self) -> Vec<DocId> {
        self.inner.state.lock().published.ids()
    }
}

impl DriverInner {
    /// Records a phase transition, reporting the time spent in the previous
    /// phase.
    pub(crate) fn register_phase_change(&self, st: &mut DriverState, phase: Phase) {
        let elapsed = st.phase_started_at.elapsed();
        metrics::PHASE_TIME_SECONDS
            .with_label_values(&[st.phase.label()])
            .inc_by(elapsed.as_secs_f64());
        debug!(driver = %self.id, from = %st.phase, to = %phase, "phase transition");
        st.phase = phase;
        st.phase_started_at = Instant::now();
    }

    /// Compares two documents under the cursor's sort order. Unsorted
    /// cursors are unlimited, so no caller reaches this without a sorter;
    /// equal is the inert answer if one ever does.
    pub(crate) fn cmp_docs(&self, a: &Document, b: &Document) -> Ordering {
        match &self.sorter {
            Some(sorter) => sorter.compare(a, b),
            None => Ordering::Equal,
        }
    }

    pub(crate) fn observe_fenced_write(self: &Arc<Self>, fence: &dyn WriteFence) {
        let token = fence.begin_write();
        {
            let st = self.state.lock();
            if st.stopped {
                drop(st);
                token.committed();
                return;
            }
        }
        // The token may only be released once the oplog has been processed
        // past the fenced write; waiting suspends, so it happens on a task.
        let inner = self.clone();
        tokio::spawn(async move {
            inner.oplog.wait_until_caught_up().await;
            let mut st = inner.state.lock();
            if st.stopped {
                drop(st);
                token.committed();
            } else if st.phase == Phase::Steady {
                inner.multiplexer.on_flush(Box::new(move || token.committed()));
            } else {
                st.pending_writes.push(token);
            }
        });
    }

    /// Fatal failure: surface the error to subscribers and tear down.
    pub(crate) fn fail(self: &Arc<Self>, st: MutexGuard<'_, DriverState>, error: TailviewError) {
        error!(driver = %self.id, %error, "observe driver failed");
        self.multiplexer.query_error(error);
        self.stop_with_guard(st);
    }

    pub(crate) fn stop_with_guard(&self, mut st: MutexGuard<'_, DriverState>) {
        if st.stopped {
            return;
        }
        st.stopped = true;
        let handles = std::mem::take(&mut st.stop_handles);
        // The multiplexer is already tearing down when stop is reached, so
        // no flush is coming; captured writes are released immediately.
        let writes = std::mem::take(&mut st.pending_writes);
        st.published.clear();
        if let Some(buffer) = st.buffer.as_mut() {
            buffer.clear();
        }
        st.need_to_fetch.clear();
        st.currently_fetching = None;
        drop(st);

        for handle in &handles {
            handle.stop();
        }
        for write in writes {
            write.committed();
        }
        metrics::OBSERVE_DRIVERS_OPLOG.dec();
        debug!(driver = %self.id, "observe driver stopped");
    }
}
