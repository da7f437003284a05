// tests/common/test_helpers.rs

//! Test helpers: in-memory implementations of the driver's collaborators
//! and a harness that wires a driver against them.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tailview::config::ObserveConfig;
use tailview::core::cursor::{CursorDescription, CursorOptions};
use tailview::core::document::{ChangedFields, DocId, Document, FieldMap};
use tailview::core::errors::TailviewError;
use tailview::core::fence::{WriteFence, WriteToken};
use tailview::core::multiplexer::{FlushCallback, Multiplexer};
use tailview::core::observe::phase::Phase;
use tailview::core::observe::{ObserveDriver, ObserveDriverOptions};
use tailview::core::oplog::{
    OplogCallback, OplogEntry, OplogFilter, OplogNotification, OplogOp, OplogReader,
    OplogStopHandle, OplogTimestamp,
};
use tailview::core::query::matcher::Matcher;
use tailview::core::query::projection::Projection;
use tailview::core::query::sorter::Sorter;
use tailview::core::source::{DocFetcher, QuerySource};

/// Initializes tracing once for tests; errors from repeat initialization
/// are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// Builds a document from a JSON object literal.
pub fn doc(id: &str, fields: Value) -> Document {
    let Value::Object(map) = fields else {
        panic!("document fields must be a JSON object");
    };
    Document::new(DocId::from(id), map)
}

pub fn field_map(fields: Value) -> FieldMap {
    let Value::Object(map) = fields else {
        panic!("expected a JSON object");
    };
    map
}

pub fn ts(n: u64) -> OplogTimestamp {
    Bytes::from(n.to_string())
}

/// Polls a condition until it holds, yielding to the scheduler in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within timeout");
}

// --- Recording multiplexer ---

#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent {
    Added(DocId, FieldMap),
    Changed(DocId, ChangedFields),
    Removed(DocId),
    Ready,
    QueryError(String),
}

/// Records every callback in order; flush callbacks are held until the test
/// runs them explicitly.
#[derive(Default)]
pub struct RecordingMultiplexer {
    events: Mutex<Vec<MuxEvent>>,
    flushes: Mutex<Vec<FlushCallback>>,
}

impl RecordingMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MuxEvent> {
        self.events.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.events.lock().iter().any(|e| *e == MuxEvent::Ready)
    }

    pub fn had_query_error(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| matches!(e, MuxEvent::QueryError(_)))
    }

    /// Runs and drains every pending flush callback.
    pub fn run_flushes(&self) -> usize {
        let flushes: Vec<FlushCallback> = std::mem::take(&mut *self.flushes.lock());
        let count = flushes.len();
        for flush in flushes {
            flush();
        }
        count
    }

    pub fn pending_flushes(&self) -> usize {
        self.flushes.lock().len()
    }
}

impl Multiplexer for RecordingMultiplexer {
    fn added(&self, id: &DocId, fields: FieldMap) {
        self.events.lock().push(MuxEvent::Added(id.clone(), fields));
    }

    fn changed(&self, id: &DocId, fields: ChangedFields) {
        self.events
            .lock()
            .push(MuxEvent::Changed(id.clone(), fields));
    }

    fn removed(&self, id: &DocId) {
        self.events.lock().push(MuxEvent::Removed(id.clone()));
    }

    fn ready(&self) {
        self.events.lock().push(MuxEvent::Ready);
    }

    fn query_error(&self, error: TailviewError) {
        self.events
            .lock()
            .push(MuxEvent::QueryError(error.to_string()));
    }

    fn on_flush(&self, cb: FlushCallback) {
        self.flushes.lock().push(cb);
    }
}

// --- Scripted oplog reader ---

struct Registration {
    filter: OplogFilter,
    callback: OplogCallback,
    stopped: Arc<AtomicBool>,
}

struct ScriptedStopHandle {
    stopped: Arc<AtomicBool>,
}

impl OplogStopHandle for ScriptedStopHandle {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// An oplog reader driven by the test: `deliver_*` invokes the registered
/// callbacks synchronously, in registration order.
#[derive(Default)]
pub struct ScriptedOplog {
    registrations: Mutex<Vec<Registration>>,
}

impl ScriptedOplog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscription_count(&self) -> usize {
        self.registrations
            .lock()
            .iter()
            .filter(|r| !r.stopped.load(Ordering::SeqCst))
            .count()
    }

    pub fn deliver(&self, collection_name: &str, notification: OplogNotification) {
        let registrations = self.registrations.lock();
        for registration in registrations.iter() {
            if registration.stopped.load(Ordering::SeqCst) {
                continue;
            }
            if registration.filter.collection_name == collection_name {
                (registration.callback)(notification.clone());
            }
        }
    }

    pub fn deliver_insert(&self, collection_name: &str, id: &str, fields: Value, at: u64) {
        self.deliver(
            collection_name,
            OplogNotification::Entry(OplogEntry {
                id: DocId::from(id),
                op: OplogOp::Insert {
                    doc: field_map(fields),
                },
                ts: ts(at),
            }),
        );
    }

    pub fn deliver_update(&self, collection_name: &str, id: &str, change: Value, at: u64) {
        self.deliver(
            collection_name,
            OplogNotification::Entry(OplogEntry {
                id: DocId::from(id),
                op: OplogOp::Update {
                    change: field_map(change),
                },
                ts: ts(at),
            }),
        );
    }

    pub fn deliver_delete(&self, collection_name: &str, id: &str, at: u64) {
        self.deliver(
            collection_name,
            OplogNotification::Entry(OplogEntry {
                id: DocId::from(id),
                op: OplogOp::Delete,
                ts: ts(at),
            }),
        );
    }

    pub fn deliver_drop(&self, collection_name: &str) {
        self.deliver(collection_name, OplogNotification::DropCollection);
    }
}

#[async_trait]
impl OplogReader for ScriptedOplog {
    fn on_oplog_entry(&self, filter: OplogFilter, cb: OplogCallback) -> Box<dyn OplogStopHandle> {
        let stopped = Arc::new(AtomicBool::new(false));
        self.registrations.lock().push(Registration {
            filter,
            callback: cb,
            stopped: stopped.clone(),
        });
        Box::new(ScriptedStopHandle { stopped })
    }

    async fn wait_until_caught_up(&self) {
        // Deliveries are synchronous in tests, so yielding once is enough.
        tokio::task::yield_now().await;
    }
}

// --- In-memory query source and fetcher ---

/// Backs both read paths with one document map. Queries compile the
/// description's selector and sort with the crate's own primitives.
#[derive(Default)]
pub struct MemorySource {
    docs: Mutex<HashMap<DocId, Document>>,
    fetch_log: Mutex<Vec<(DocId, OplogTimestamp)>>,
    query_count: AtomicUsize,
    failures_left: AtomicUsize,
    fail_fetches: AtomicBool,
}

impl MemorySource {
    pub fn new(initial: Vec<Document>) -> Arc<Self> {
        let source = Self::default();
        {
            let mut docs = source.docs.lock();
            for doc in initial {
                docs.insert(doc.id.clone(), doc);
            }
        }
        Arc::new(source)
    }

    pub fn upsert(&self, doc: Document) {
        self.docs.lock().insert(doc.id.clone(), doc);
    }

    pub fn remove(&self, id: &DocId) {
        self.docs.lock().remove(id);
    }

    pub fn clear(&self) {
        self.docs.lock().clear();
    }

    pub fn fetches(&self) -> Vec<(DocId, OplogTimestamp)> {
        self.fetch_log.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Makes the next `n` queries fail before succeeding again.
    pub fn fail_next_queries(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuerySource for MemorySource {
    async fn run_query(
        &self,
        description: &CursorDescription,
        projection: &Projection,
        limit: usize,
    ) -> Result<Vec<Document>, TailviewError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TailviewError::QueryFailed("scripted failure".to_string()));
        }

        let matcher = Matcher::compile(&description.selector)?;
        let sorter = match &description.options.sort {
            Some(spec) => Some(Sorter::new(spec.clone())?),
            None => None,
        };
        let mut results: Vec<Document> = self
            .docs
            .lock()
            .values()
            .filter(|doc| matcher.document_matches(doc))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            let by_key = match &sorter {
                Some(sorter) => sorter.compare(a, b),
                None => std::cmp::Ordering::Equal,
            };
            by_key.then_with(|| a.id.cmp(&b.id))
        });
        if limit > 0 {
            results.truncate(limit);
        }
        Ok(results
            .into_iter()
            .map(|doc| {
                let fields = projection.apply(&doc.fields);
                Document::new(doc.id, fields)
            })
            .collect())
    }
}

#[async_trait]
impl DocFetcher for MemorySource {
    async fn fetch(
        &self,
        _collection_name: &str,
        id: &DocId,
        cache_key: &OplogTimestamp,
    ) -> Result<Option<Document>, TailviewError> {
        // Point fetches never complete synchronously.
        tokio::task::yield_now().await;
        self.fetch_log.lock().push((id.clone(), cache_key.clone()));
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(TailviewError::Fetch("scripted fetch failure".to_string()));
        }
        Ok(self.docs.lock().get(id).cloned())
    }
}

// --- Counting write fence ---

pub struct CountingFence {
    pub begun: Arc<AtomicUsize>,
    pub committed: Arc<AtomicUsize>,
}

struct CountingToken {
    committed: Arc<AtomicUsize>,
}

impl WriteToken for CountingToken {
    fn committed(self: Box<Self>) {
        self.committed.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingFence {
    pub fn new() -> Self {
        CountingFence {
            begun: Arc::new(AtomicUsize::new(0)),
            committed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn begun_count(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn committed_count(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }
}

impl WriteFence for CountingFence {
    fn begin_write(&self) -> Box<dyn WriteToken> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingToken {
            committed: self.committed.clone(),
        })
    }
}

// --- Harness ---

pub const COLLECTION: &str = "things";

pub struct DriverHarness {
    pub driver: ObserveDriver,
    pub mux: Arc<RecordingMultiplexer>,
    pub oplog: Arc<ScriptedOplog>,
    pub source: Arc<MemorySource>,
}

impl DriverHarness {
    /// Starts a driver over the given initial documents and waits for it to
    /// finish its initial query and reach STEADY.
    pub async fn start(selector: Value, options: CursorOptions, initial: Vec<Document>) -> Self {
        let harness = Self::start_without_waiting(selector, options, initial);
        wait_until(|| harness.mux.is_ready()).await;
        wait_until(|| harness.driver.phase() == Phase::Steady).await;
        harness
    }

    /// Starts a driver without waiting for readiness; used by tests that
    /// script failures into the initial query.
    pub fn start_without_waiting(
        selector: Value,
        options: CursorOptions,
        initial: Vec<Document>,
    ) -> Self {
        init_tracing();
        let mux = RecordingMultiplexer::new();
        let oplog = ScriptedOplog::new();
        let source = MemorySource::new(initial);
        let matcher = Arc::new(Matcher::compile(&selector).expect("selector must compile"));
        let sorter = options
            .sort
            .as_ref()
            .map(|spec| Arc::new(Sorter::new(spec.clone()).expect("sort spec must compile")));
        let cursor = CursorDescription::new(COLLECTION, selector, options);
        let driver = ObserveDriver::start(ObserveDriverOptions {
            cursor,
            ordered: false,
            matcher,
            sorter,
            oplog: oplog.clone(),
            fetcher: source.clone(),
            source: source.clone(),
            multiplexer: mux.clone(),
            config: ObserveConfig::default(),
        })
        .expect("driver must start");
        DriverHarness {
            driver,
            mux,
            oplog,
            source,
        }
    }
}
