// src/core/observe/heap.rs

//! An id-indexed ordered document container.
//!
//! It uses a `HashMap` for fast O(1) lookups of a document by id and a
//! `BTreeSet` to keep entries ordered by sort key (then id, for
//! determinism), giving cheap access to both the minimum and maximum
//! element.

use crate::core::document::{DocId, Document};
use crate::core::query::sorter::{SortKey, Sorter};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One entry in the ordered index. Ties on the sort key fall back to id
/// order so iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    key: SortKey,
    id: DocId,
}

/// An id-indexed heap over documents. Without a sorter every key is empty
/// and the container degenerates to id order, which is all the unlimited
/// driver needs from it.
#[derive(Debug, Clone, Default)]
pub struct DocHeap {
    sorter: Option<Arc<Sorter>>,
    docs: HashMap<DocId, Document>,
    sorted: BTreeSet<HeapEntry>,
}

impl DocHeap {
    pub fn new(sorter: Option<Arc<Sorter>>) -> Self {
        DocHeap {
            sorter,
            docs: HashMap::new(),
            sorted: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn has(&self, id: &DocId) -> bool {
        self.docs.contains_key(id)
    }

    pub fn get(&self, id: &DocId) -> Option<&Document> {
        self.docs.get(id)
    }

    fn key_for(&self, doc: &Document) -> SortKey {
        match &self.sorter {
            Some(sorter) => sorter.key_for(doc),
            None => SortKey::empty(),
        }
    }

    /// Inserts or replaces the document stored under `doc.id`.
    pub fn set(&mut self, doc: Document) {
        let id = doc.id.clone();
        if let Some(previous) = self.docs.remove(&id) {
            let key = self.key_for(&previous);
            self.sorted.remove(&HeapEntry {
                key,
                id: id.clone(),
            });
        }
        let key = self.key_for(&doc);
        self.sorted.insert(HeapEntry {
            key,
            id: id.clone(),
        });
        self.docs.insert(id, doc);
    }

    /// Removes and returns the document stored under `id`.
    pub fn remove(&mut self, id: &DocId) -> Option<Document> {
        let doc = self.docs.remove(id)?;
        let key = self.key_for(&doc);
        self.sorted.remove(&HeapEntry {
            key,
            id: id.clone(),
        });
        Some(doc)
    }

    /// The id of the least element under the sort order.
    pub fn min_element_id(&self) -> Option<DocId> {
        self.sorted.first().map(|entry| entry.id.clone())
    }

    /// The id of the greatest element under the sort order.
    pub fn max_element_id(&self) -> Option<DocId> {
        self.sorted.last().map(|entry| entry.id.clone())
    }

    pub fn clear(&mut self) {
        self.docs.clear();
        self.sorted.clear();
    }

    /// Iterates documents in sort order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.sorted.iter().filter_map(|entry| self.docs.get(&entry.id))
    }

    /// The ids of all stored documents, in sort order.
    pub fn ids(&self) -> Vec<DocId> {
        self.sorted.iter().map(|entry| entry.id.clone()).collect()
    }
}
