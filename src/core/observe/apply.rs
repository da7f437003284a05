// src/core/observe/apply.rs

//! Per-phase dispatch of oplog notifications.
//!
//! This is the driver's critical path: it runs synchronously with respect
//! to the oplog reader and never suspends. Anything that needs to suspend
//! (fetching, repolling) is scheduled onto a task instead.

use crate::core::document::{DocId, Document, FieldMap};
use crate::core::errors::TailviewError;
use crate::core::observe::driver::{DriverInner, DriverState};
use crate::core::observe::phase::Phase;
use crate::core::oplog::{OplogEntry, OplogNotification, OplogOp, OplogTimestamp};
use crate::core::query::modifier::{self, Modifier};
use std::sync::Arc;

fn internal(message: impl Into<String>) -> TailviewError {
    TailviewError::Internal(message.into())
}

impl DriverInner {
    /// Entry point for everything the oplog reader delivers.
    pub(crate) fn handle_oplog_notification(self: &Arc<Self>, notification: OplogNotification) {
        let mut st = self.state.lock();
        if st.stopped {
            return;
        }
        let result = match notification {
            OplogNotification::DropCollection => {
                self.need_to_poll_query(&mut st);
                Ok(())
            }
            OplogNotification::Entry(entry) => match st.phase {
                // Mid-query the answer is in flux anyway; every touched id
                // is refetched once the query is done.
                Phase::Querying => {
                    st.need_to_fetch.insert(entry.id, entry.ts);
                    Ok(())
                }
                Phase::Fetching | Phase::Steady => {
                    self.handle_entry_steady_or_fetching(&mut st, entry)
                }
            },
        };
        if let Err(error) = result {
            self.fail(st, error);
        }
    }

    fn handle_entry_steady_or_fetching(
        self: &Arc<Self>,
        st: &mut DriverState,
        entry: OplogEntry,
    ) -> Result<(), TailviewError> {
        let id = entry.id;

        // An id already being fetched (or queued for a fetch) cannot be
        // short-circuited: remember the newest position so it is fetched
        // again afterwards.
        if st.phase == Phase::Fetching
            && (st
                .currently_fetching
                .as_ref()
                .is_some_and(|batch| batch.contains_key(&id))
                || st.need_to_fetch.contains_key(&id))
        {
            st.need_to_fetch.insert(id, entry.ts);
            return Ok(());
        }

        match entry.op {
            OplogOp::Delete => {
                let cached = st.published.has(&id)
                    || st.buffer.as_ref().is_some_and(|buffer| buffer.has(&id));
                if cached {
                    self.remove_matching(st, &id)?;
                }
                Ok(())
            }
            OplogOp::Insert { doc } => {
                if st.published.has(&id) {
                    return Err(internal(format!(
                        "insert received for already-published document {id}"
                    )));
                }
                if st.buffer.as_ref().is_some_and(|buffer| buffer.has(&id)) {
                    return Err(internal(format!(
                        "insert received for already-buffered document {id}"
                    )));
                }
                let doc = Document::new(id, doc);
                if self.matcher.document_matches(&doc) {
                    self.add_matching(st, doc)?;
                }
                Ok(())
            }
            OplogOp::Update { change } => self.handle_update(st, id, change, entry.ts),
            OplogOp::Other { kind } => Err(TailviewError::UnsupportedOplogEntry(kind)),
        }
    }

    fn handle_update(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: DocId,
        change: FieldMap,
        ts: OplogTimestamp,
    ) -> Result<(), TailviewError> {
        let is_replace = !modifier::is_modifier(&change);
        let can_apply = !is_replace && modifier::can_apply_locally(&change);
        let published_before = st.published.has(&id);
        let buffered_before = st.buffer.as_ref().is_some_and(|buffer| buffer.has(&id));

        if is_replace {
            let doc = Document::new(id.clone(), change);
            self.handle_doc(st, &id, Some(doc))
        } else if (published_before || buffered_before) && can_apply {
            // The cached copy plus the modifier fully determine the new
            // contents; no fetch needed.
            let cached = if published_before {
                st.published.get(&id)
            } else {
                st.buffer.as_ref().and_then(|buffer| buffer.get(&id))
            }
            .cloned()
            .ok_or_else(|| internal(format!("cached document {id} vanished")))?;

            let parsed = Modifier::parse(&change)?;
            let mut fields = cached.fields;
            parsed.apply(&mut fields)?;
            let reprojected = Document::new(id.clone(), self.shared_projection.apply(&fields));
            self.handle_doc(st, &id, Some(reprojected))
        } else if !can_apply || self.matcher.can_become_true_by_modifier(&change) {
            // Either the update is opaque to us, or it could flip the
            // selector: the truth lives in the database.
            st.need_to_fetch.insert(id, ts);
            if st.phase == Phase::Steady {
                self.fetch_modified_documents(st);
            }
            Ok(())
        } else {
            // A local-only modifier on an uncached document that cannot
            // start matching: nothing to do.
            Ok(())
        }
    }
}
