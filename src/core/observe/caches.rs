// src/core/observe/caches.rs

//! Mutators over the published set and the unpublished buffer, and the
//! classifier that decides where a new version of a document belongs.
//!
//! Between any two observable steps these maintain the driver's cache
//! invariants: the published set never exceeds the limit, published and
//! buffered ids are disjoint, and every published document sorts at or
//! before every buffered one.

use crate::core::document::{DocId, Document, make_changed_fields};
use crate::core::errors::TailviewError;
use crate::core::observe::driver::{DriverInner, DriverState};
use crate::core::observe::phase::Phase;
use std::cmp::Ordering;
use std::sync::Arc;

fn internal(message: impl Into<String>) -> TailviewError {
    TailviewError::Internal(message.into())
}

fn published_max(st: &DriverState) -> Option<Document> {
    st.published
        .max_element_id()
        .and_then(|id| st.published.get(&id).cloned())
}

fn buffer_min(st: &DriverState) -> Option<Document> {
    let buffer = st.buffer.as_ref()?;
    buffer.min_element_id().and_then(|id| buffer.get(&id).cloned())
}

fn buffer_max(st: &DriverState) -> Option<Document> {
    let buffer = st.buffer.as_ref()?;
    buffer.max_element_id().and_then(|id| buffer.get(&id).cloned())
}

fn buffer_has(st: &DriverState, id: &DocId) -> bool {
    st.buffer.as_ref().is_some_and(|buffer| buffer.has(id))
}

impl DriverInner {
    /// Publishes a document: caches its shared projection and emits
    /// `added`. When the published set overflows the limit, the maximum
    /// element is demoted into the buffer.
    pub(crate) fn add_published(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: &DocId,
        doc: &Document,
    ) -> Result<(), TailviewError> {
        st.published.set(Document::new(
            id.clone(),
            self.shared_projection.apply(&doc.fields),
        ));
        self.multiplexer
            .added(id, self.publish_projection.apply(&doc.fields));

        if self.limit > 0 && st.published.len() > self.limit {
            if st.published.len() != self.limit + 1 {
                return Err(internal(format!(
                    "published set is overflowing by {} documents",
                    st.published.len() - self.limit
                )));
            }
            let overflowing_id = st
                .published
                .max_element_id()
                .ok_or_else(|| internal("overflowing published set has no maximum"))?;
            if overflowing_id == *id {
                return Err(internal(
                    "the document just added is overflowing the published set",
                ));
            }
            let overflowing = st
                .published
                .remove(&overflowing_id)
                .ok_or_else(|| internal("maximum element vanished from the published set"))?;
            self.multiplexer.removed(&overflowing_id);
            self.add_buffered(st, &overflowing_id, &overflowing)?;
        }
        Ok(())
    }

    /// Unpublishes a document and emits `removed`. For limited queries the
    /// vacancy is filled from the buffer when possible; an empty buffer is
    /// only tolerable mid-requery or while the buffer is known complete.
    pub(crate) fn remove_published(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: &DocId,
    ) -> Result<(), TailviewError> {
        st.published
            .remove(id)
            .ok_or_else(|| internal(format!("tried to remove unpublished document {id}")))?;
        self.multiplexer.removed(id);
        if self.limit == 0 || st.published.len() == self.limit {
            return Ok(());
        }
        if st.published.len() > self.limit {
            return Err(internal("published set exceeds the limit after a removal"));
        }

        if let Some(next) = buffer_min(st) {
            let next_id = next.id.clone();
            self.remove_buffered(st, &next_id)?;
            return self.add_published(st, &next_id, &next);
        }

        // Nothing buffered. Mid-requery the caller already knows the whole
        // answer; with a complete buffer the published set already holds
        // every match. Anything else means the emptying path failed to
        // schedule a repoll.
        if st.phase == Phase::Querying {
            return Ok(());
        }
        if st.safe_append_to_buffer {
            return Ok(());
        }
        Err(internal("unpublished buffer inexplicably empty"))
    }

    /// Replaces a published document and emits `changed` with the projected
    /// field diff, if any field visible to subscribers actually changed.
    pub(crate) fn change_published(
        &self,
        st: &mut DriverState,
        id: &DocId,
        old_doc: &Document,
        new_doc: &Document,
    ) {
        st.published.set(Document::new(
            id.clone(),
            self.shared_projection.apply(&new_doc.fields),
        ));
        let projected_new = self.publish_projection.apply(&new_doc.fields);
        let projected_old = self.publish_projection.apply(&old_doc.fields);
        let changed = make_changed_fields(&projected_new, &projected_old);
        if !changed.is_empty() {
            self.multiplexer.changed(id, changed);
        }
    }

    /// Inserts into the buffer, evicting the maximum element on overflow.
    /// An eviction drops a matching document from cache, so it clears
    /// `safe_append_to_buffer`.
    pub(crate) fn add_buffered(
        &self,
        st: &mut DriverState,
        id: &DocId,
        doc: &Document,
    ) -> Result<(), TailviewError> {
        let shared = self.shared_projection.apply(&doc.fields);
        let limit = self.limit;
        let buffer = st
            .buffer
            .as_mut()
            .ok_or_else(|| internal("tried to buffer a document on an unlimited query"))?;
        buffer.set(Document::new(id.clone(), shared));
        if buffer.len() > limit {
            let max_id = buffer
                .max_element_id()
                .ok_or_else(|| internal("overflowing buffer has no maximum"))?;
            buffer.remove(&max_id);
            st.safe_append_to_buffer = false;
        }
        Ok(())
    }

    /// Removes from the buffer. Emptying the buffer while it is not known
    /// complete violates the steady-state contract, so it schedules a
    /// repoll.
    pub(crate) fn remove_buffered(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: &DocId,
    ) -> Result<Document, TailviewError> {
        let buffer = st
            .buffer
            .as_mut()
            .ok_or_else(|| internal("tried to unbuffer a document on an unlimited query"))?;
        let doc = buffer
            .remove(id)
            .ok_or_else(|| internal(format!("tried to remove unbuffered document {id}")))?;
        if buffer.is_empty() && !st.safe_append_to_buffer {
            self.need_to_poll_query(st);
        }
        Ok(doc)
    }

    /// Routes a newly matching document to the published set, the buffer,
    /// or nowhere, per the limit and the current cache extrema.
    pub(crate) fn add_matching(
        self: &Arc<Self>,
        st: &mut DriverState,
        doc: Document,
    ) -> Result<(), TailviewError> {
        let id = doc.id.clone();
        if st.published.has(&id) {
            return Err(internal(format!(
                "tried to add already-published document {id}"
            )));
        }
        if buffer_has(st, &id) {
            return Err(internal(format!(
                "tried to add already-buffered document {id}"
            )));
        }

        let limit = self.limit;
        let max_published = if limit > 0 { published_max(st) } else { None };
        let max_buffered = if limit > 0 { buffer_max(st) } else { None };

        let to_publish = limit == 0
            || st.published.len() < limit
            || max_published
                .as_ref()
                .is_some_and(|max| self.cmp_docs(&doc, max) == Ordering::Less);

        // Appending is allowed while the buffer is known to hold every
        // match beyond the published set; inserting below its maximum is
        // always allowed.
        let can_append = !to_publish
            && st.safe_append_to_buffer
            && st.buffer.as_ref().is_some_and(|buffer| buffer.len() < limit);
        let can_insert = !to_publish
            && max_buffered
                .as_ref()
                .is_some_and(|max| self.cmp_docs(&doc, max) != Ordering::Greater);

        if to_publish {
            self.add_published(st, &id, &doc)
        } else if can_append || can_insert {
            self.add_buffered(st, &id, &doc)
        } else {
            // Dropped without caching: the cache no longer covers the
            // matching set.
            st.safe_append_to_buffer = false;
            Ok(())
        }
    }

    /// Removes a document known to have stopped matching.
    pub(crate) fn remove_matching(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: &DocId,
    ) -> Result<(), TailviewError> {
        if !st.published.has(id) && self.limit == 0 {
            return Err(internal(format!(
                "tried to remove uncached document {id} from an unlimited query"
            )));
        }
        if st.published.has(id) {
            self.remove_published(st, id)
        } else if buffer_has(st, id) {
            self.remove_buffered(st, id).map(|_| ())
        } else {
            Ok(())
        }
    }

    /// Reclassifies an id given its new contents (or absence), moving it
    /// between the published set, the buffer, and oblivion as needed.
    pub(crate) fn handle_doc(
        self: &Arc<Self>,
        st: &mut DriverState,
        id: &DocId,
        new_doc: Option<Document>,
    ) -> Result<(), TailviewError> {
        let matches_now = new_doc
            .as_ref()
            .is_some_and(|doc| self.matcher.document_matches(doc));
        let published_before = st.published.has(id);
        let buffered_before = buffer_has(st, id);
        let cached_before = published_before || buffered_before;

        if matches_now && !cached_before {
            let doc = new_doc.ok_or_else(|| internal("matching document has no contents"))?;
            return self.add_matching(st, doc);
        }
        if cached_before && !matches_now {
            return self.remove_matching(st, id);
        }
        if !cached_before {
            return Ok(());
        }
        let new_doc = new_doc.ok_or_else(|| internal("matching document has no contents"))?;

        if published_before {
            let old_doc = st
                .published
                .get(id)
                .cloned()
                .ok_or_else(|| internal("published document vanished"))?;
            // It stays published if the query is unlimited, nothing is
            // buffered, or it still sorts at or before the buffer minimum.
            let stays_published = self.limit == 0
                || match buffer_min(st) {
                    None => true,
                    Some(min) => self.cmp_docs(&new_doc, &min) != Ordering::Greater,
                };
            if stays_published {
                self.change_published(st, id, &old_doc, &new_doc);
                return Ok(());
            }
            self.remove_published(st, id)?;
            let to_buffer = st.safe_append_to_buffer
                || buffer_max(st)
                    .as_ref()
                    .is_some_and(|max| self.cmp_docs(&new_doc, max) != Ordering::Greater);
            if to_buffer {
                self.add_buffered(st, id, &new_doc)?;
            } else {
                st.safe_append_to_buffer = false;
            }
            return Ok(());
        }

        // Buffered before: pull it out silently, then route the new
        // contents as if freshly classified against both extrema.
        self.remove_buffered(st, id)?;
        let to_publish = match published_max(st) {
            None => true,
            Some(max) => self.cmp_docs(&new_doc, &max) == Ordering::Less,
        };
        let stays_buffered = !to_publish
            && (st.safe_append_to_buffer
                || buffer_max(st)
                    .as_ref()
                    .is_some_and(|max| self.cmp_docs(&new_doc, max) != Ordering::Greater));
        if to_publish {
            self.add_published(st, id, &new_doc)
        } else if stays_buffered {
            self.add_buffered(st, id, &new_doc)
        } else {
            st.safe_append_to_buffer = false;
            Ok(())
        }
    }
}
