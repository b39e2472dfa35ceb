//! In-memory [`DocumentSource`] for tests.
//!
//! Collections are plain vectors of BSON documents. Inserted documents get
//! strictly increasing ObjectIds unless they already carry an `_id`.
//!
//! Reads follow the server's ordering rules closely enough for the tail
//! loop: an unfiltered read returns documents whose `_id` is not an
//! ObjectId first (they sort before ObjectIds), a `$gt` read only ever
//! returns ObjectIds, and the oldest-id lookup ignores other `_id` types.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::Document;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::cursor::Cursor;
use crate::source::DocumentSource;

/// 2015-06-27T00:00:00Z, the generation time of the first generated id.
pub const BASE_TIMESTAMP: u32 = 1_435_363_200;

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<Document>>,
    next_seq: u32,
    failing_fetches: usize,
    fail_stream_after: Option<usize>,
    fail_listing: bool,
    fetch_calls: usize,
}

/// Shared, cloneable in-memory database.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory source lock poisoned"))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Id the next generated document will get.
    ///
    /// One second apart per document, with the sequence number as counter.
    fn generate_id(state: &mut MemoryState) -> ObjectId {
        let seq = state.next_seq;
        state.next_seq += 1;
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&(BASE_TIMESTAMP + seq).to_be_bytes());
        bytes[8..].copy_from_slice(&seq.to_be_bytes());
        ObjectId::from_bytes(bytes)
    }

    /// Create an empty collection (no-op if it exists).
    pub fn create_collection(&self, name: &str) {
        self.with_state(|state| {
            state.collections.entry(name.to_string()).or_default();
        });
    }

    pub fn drop_collection(&self, name: &str) {
        self.with_state(|state| {
            state.collections.remove(name);
        });
    }

    /// Insert one document, creating the collection if needed.
    ///
    /// Returns the document's `_id` as a cursor when it is an ObjectId.
    pub fn insert(&self, collection: &str, mut doc: Document) -> Option<Cursor> {
        self.with_state(|state| {
            if !doc.contains_key("_id") {
                let oid = Self::generate_id(state);
                doc.insert("_id", oid);
            }
            let cursor = doc.get_object_id("_id").ok().map(Cursor::new);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(doc);
            cursor
        })
    }

    pub fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Document>,
    ) -> Vec<Cursor> {
        docs.into_iter()
            .filter_map(|doc| self.insert(collection, doc))
            .collect()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.with_state(|state| state.collections.get(collection).map_or(0, Vec::len))
    }

    /// Make the next `n` calls to `fetch_batch` fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.with_state(|state| state.failing_fetches = n);
    }

    /// Make the next `fetch_batch` stream yield at most `n` documents and
    /// then an error.
    pub fn fail_after(&self, n: usize) {
        self.with_state(|state| state.fail_stream_after = Some(n));
    }

    pub fn fail_listing(&self, fail: bool) {
        self.with_state(|state| state.fail_listing = fail);
    }

    /// Number of `fetch_batch` calls so far, failed ones included.
    pub fn fetch_calls(&self) -> usize {
        self.with_state(|state| state.fetch_calls)
    }
}

/// Documents with an ObjectId `_id` after `after`, in id order.
fn sorted_by_id(docs: &[Document], after: Option<Cursor>) -> Vec<(Cursor, Document)> {
    let mut selected: Vec<(Cursor, Document)> = docs
        .iter()
        .filter_map(|doc| {
            let cursor = Cursor::new(doc.get_object_id("_id").ok()?);
            match after {
                Some(after) if cursor <= after => None,
                _ => Some((cursor, doc.clone())),
            }
        })
        .collect();
    selected.sort_by_key(|(cursor, _)| *cursor);
    selected
}

/// What `find` with an optional `_id > after` filter, sorted by `_id`, returns.
fn read_after(docs: &[Document], after: Option<Cursor>) -> Vec<Document> {
    let others = docs
        .iter()
        .filter(|doc| after.is_none() && doc.get_object_id("_id").is_err())
        .cloned();
    others
        .chain(sorted_by_id(docs, after).into_iter().map(|(_, doc)| doc))
        .collect()
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn list_collection_names(&self) -> Result<Vec<String>> {
        let state = self.lock()?;
        if state.fail_listing {
            anyhow::bail!("simulated failure listing collections");
        }
        Ok(state.collections.keys().cloned().collect())
    }

    async fn oldest_document_id(&self, collection: &str) -> Result<Option<Cursor>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| sorted_by_id(docs, None).first().map(|(cursor, _)| *cursor)))
    }

    async fn fetch_batch(
        &self,
        collection: &str,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<BoxStream<'static, Result<Document>>> {
        let mut state = self.lock()?;
        state.fetch_calls += 1;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            anyhow::bail!("simulated fetch failure on {collection}");
        }

        let mut batch: Vec<Result<Document>> = state
            .collections
            .get(collection)
            .map(|docs| read_after(docs, after))
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(Ok)
            .collect();
        if let Some(n) = state.fail_stream_after.take() {
            batch.truncate(n);
            batch.push(Err(anyhow!("simulated connection reset reading {collection}")));
        }
        Ok(stream::iter(batch).boxed())
    }
}
