//! The tail loop
//!
//! Each pass re-runs discovery, then drains every watched collection in
//! name order: fetch one batch after the in-memory cursor, transform and
//! emit each document, then persist the advanced cursor. A pass that emits
//! nothing is followed by a backoff sleep. All sleeps race the cancellation
//! token.
//!
//! ```text
//! DISCOVERING ──► DRAINING ──► (nothing emitted) IDLE_BACKOFF ──┐
//!      ▲              │                                          │
//!      └──────────────┴──────────────────────────────────────────┘
//!                 cancellation at any boundary ──► STOPPED
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use bson::Document;
use checkpoint::{CheckpointManager, CheckpointStore};
use futures::StreamExt;
use tail_core::{transform, EventSink, FlatEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::TailConfig;
use crate::cursor::Cursor;
use crate::discovery::{list_matching, CollectionFilter};
use crate::error::TailError;
use crate::provenance::{self, ProvenanceOpts};
use crate::source::DocumentSource;

/// A collection currently being tailed.
///
/// `last_id` is the newest document tailed past; `None` means nothing has
/// been read yet and the collection had no documents when it was discovered.
/// `stored_id` is what the checkpoint store currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedCollection {
    pub name: String,
    pub last_id: Option<Cursor>,
    pub stored_id: Option<Cursor>,
}

/// Changes made to the watch-set by one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Result of one pass over the watch-set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Events emitted downstream
    pub emitted: usize,
    /// Documents skipped because they could not be transformed
    pub skipped: usize,
    /// Documents without an ObjectId `_id` or not after the cursor
    pub ignored: usize,
    /// A fetch failed and the rest of the pass was abandoned
    pub fetch_failed: bool,
    /// The pass stopped early on cancellation
    pub cancelled: bool,
}

impl PassOutcome {
    /// Whether the pass moved any cursor, whether or not it emitted.
    pub fn advanced(&self) -> bool {
        self.emitted + self.skipped > 0
    }
}

/// Totals over the lifetime of [`TailLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailStats {
    pub passes: u64,
    pub emitted: u64,
    pub skipped: u64,
    pub fetch_failures: u64,
}

enum Drain {
    Done,
    FetchFailed,
    Cancelled,
}

/// Single-worker engine tailing the collections of one source.
pub struct TailLoop<D, S, K> {
    source: D,
    checkpoints: CheckpointManager<S>,
    sink: K,
    config: TailConfig,
    filter: CollectionFilter,
    backoff: Backoff,
    host: String,
    watched: BTreeMap<String, WatchedCollection>,
}

impl<D, S, K> TailLoop<D, S, K>
where
    D: DocumentSource,
    S: CheckpointStore,
    K: EventSink,
{
    /// Validate `config` and build a loop with an empty watch-set.
    pub fn new(
        source: D,
        checkpoints: CheckpointManager<S>,
        sink: K,
        config: TailConfig,
    ) -> Result<Self, TailError> {
        config.validate()?;
        let filter = CollectionFilter::new(
            &config.collection_pattern,
            config.exclude_collections.iter().cloned(),
        )?;
        let backoff = Backoff::new(config.poll_floor, config.poll_ceiling);

        Ok(Self {
            source,
            checkpoints,
            sink,
            config,
            filter,
            backoff,
            host: local_hostname(),
            watched: BTreeMap::new(),
        })
    }

    /// Override the `host` stamped onto events.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Current watch-set in name order.
    pub fn watched(&self) -> impl Iterator<Item = &WatchedCollection> {
        self.watched.values()
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    fn provenance_opts(&self) -> ProvenanceOpts {
        ProvenanceOpts {
            unpack_mongo_id: self.config.unpack_mongo_id,
            add_log_entry: self.config.add_log_entry,
        }
    }

    /// Refresh the watch-set from the source.
    ///
    /// New names are seeded from their stored checkpoint, or from the
    /// predecessor of their oldest document when none is stored. Names no
    /// longer listed are dropped; their checkpoints are kept.
    pub async fn discover(&mut self) -> Result<DiscoveryReport, TailError> {
        let matching = list_matching(&self.source, &self.filter).await?;
        let mut report = DiscoveryReport::default();

        let gone: Vec<String> = self
            .watched
            .keys()
            .filter(|name| !matching.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            info!("Collection {} is no longer listed, stopped watching it", name);
            self.watched.remove(&name);
            report.removed.push(name);
        }

        for name in matching {
            if self.watched.contains_key(&name) {
                continue;
            }
            let last_id = self.seed(&name).await?;
            match &last_id {
                Some(cursor) => info!("Watching collection {} from {}", name, cursor),
                None => info!("Watching empty collection {} from its beginning", name),
            }
            self.watched.insert(
                name.clone(),
                WatchedCollection {
                    name: name.clone(),
                    last_id,
                    stored_id: last_id,
                },
            );
            report.added.push(name);
        }

        Ok(report)
    }

    async fn seed(&self, collection: &str) -> Result<Option<Cursor>, TailError> {
        let stored = self
            .checkpoints
            .read_checkpoint::<Cursor>(collection)
            .await
            .map_err(|cause| TailError::Checkpoint {
                collection: collection.to_string(),
                cause,
            })?;
        if stored.is_some() {
            return Ok(stored);
        }

        let oldest = self
            .source
            .oldest_document_id(collection)
            .await
            .map_err(|cause| TailError::Discovery { cause })?;

        // Start just before the oldest document so the first `$gt` read includes it
        let Some(seed) = oldest.and_then(|oldest| oldest.predecessor()) else {
            return Ok(None);
        };
        self.persist(collection, &seed).await?;
        debug!("Seeded checkpoint for {} at {}", collection, seed);
        Ok(Some(seed))
    }

    async fn persist(&self, collection: &str, cursor: &Cursor) -> Result<(), TailError> {
        self.checkpoints
            .emit_checkpoint(collection, cursor)
            .await
            .map_err(|cause| TailError::Checkpoint {
                collection: collection.to_string(),
                cause,
            })
    }

    /// One discovery run followed by one drain of every watched collection.
    ///
    /// A fetch failure abandons the rest of the pass and is reported in the
    /// outcome rather than as an error.
    pub async fn run_pass(&mut self, cancel: &CancellationToken) -> Result<PassOutcome, TailError> {
        let mut outcome = PassOutcome::default();
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        self.discover().await?;

        let names: Vec<String> = self.watched.keys().cloned().collect();
        for name in names {
            match self.drain_collection(&name, cancel, &mut outcome).await? {
                Drain::Done => {}
                Drain::FetchFailed => {
                    outcome.fetch_failed = true;
                    break;
                }
                Drain::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    async fn drain_collection(
        &mut self,
        collection: &str,
        cancel: &CancellationToken,
        outcome: &mut PassOutcome,
    ) -> Result<Drain, TailError> {
        let (start, mut persisted) = match self.watched.get(collection) {
            Some(watched) => (watched.last_id, watched.stored_id),
            None => return Ok(Drain::Done),
        };
        debug!(collection = %collection, last_id = ?start, "Fetching batch");

        let mut stream = match self
            .source
            .fetch_batch(collection, start, self.config.batch_size)
            .await
        {
            Ok(stream) => stream,
            Err(cause) => {
                let err = TailError::Fetch {
                    collection: collection.to_string(),
                    cause,
                };
                warn!("{err}");
                return Ok(Drain::FetchFailed);
            }
        };

        let mut last_id = start;
        let mut since_checkpoint = 0usize;
        let mut result = Drain::Done;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    result = Drain::Cancelled;
                    break;
                }
                next = stream.next() => next,
            };

            let doc = match next {
                None => break,
                Some(Ok(doc)) => doc,
                Some(Err(cause)) => {
                    let err = TailError::Fetch {
                        collection: collection.to_string(),
                        cause,
                    };
                    warn!("{err}");
                    result = Drain::FetchFailed;
                    break;
                }
            };

            let Some(cursor) = self.document_cursor(collection, &doc, last_id) else {
                outcome.ignored += 1;
                continue;
            };

            match self.build_event(collection, &cursor, &doc) {
                Ok(event) => {
                    trace!(collection = %collection, id = %cursor, "Emitting event");
                    self.sink
                        .emit(event)
                        .await
                        .map_err(|cause| TailError::Emit {
                            collection: collection.to_string(),
                            cause,
                        })?;
                    outcome.emitted += 1;
                }
                Err(err) => {
                    warn!("{err}, skipping it");
                    outcome.skipped += 1;
                }
            }

            last_id = Some(cursor);
            if let Some(watched) = self.watched.get_mut(collection) {
                watched.last_id = last_id;
            }

            since_checkpoint += 1;
            if self
                .config
                .checkpoint_every
                .is_some_and(|every| since_checkpoint >= every)
            {
                self.store_position(collection, &cursor).await?;
                persisted = last_id;
                since_checkpoint = 0;
            }
        }

        // Documents emitted before a failure or cancellation are stored too
        if last_id != persisted {
            if let Some(cursor) = &last_id {
                self.store_position(collection, cursor).await?;
                debug!(collection = %collection, last_id = %cursor, "Checkpoint stored");
            }
        }

        Ok(result)
    }

    async fn store_position(&mut self, collection: &str, cursor: &Cursor) -> Result<(), TailError> {
        self.persist(collection, cursor).await?;
        if let Some(watched) = self.watched.get_mut(collection) {
            watched.stored_id = Some(*cursor);
        }
        Ok(())
    }

    /// Cursor of `doc`, or `None` when it cannot be tailed past.
    fn document_cursor(
        &self,
        collection: &str,
        doc: &Document,
        last_id: Option<Cursor>,
    ) -> Option<Cursor> {
        let cursor = match doc.get_object_id("_id") {
            Ok(oid) => Cursor::new(oid),
            Err(e) => {
                warn!("Document in {collection} has no ObjectId _id ({e}), skipping it");
                return None;
            }
        };
        if last_id.is_some_and(|last| cursor <= last) {
            warn!("Document {cursor} in {collection} is not after the cursor, skipping it");
            return None;
        }
        Some(cursor)
    }

    fn build_event(
        &self,
        collection: &str,
        cursor: &Cursor,
        doc: &Document,
    ) -> Result<FlatEvent, TailError> {
        let transform_error = |cause| TailError::Transform {
            collection: collection.to_string(),
            id: cursor.to_hex(),
            cause,
        };

        let value = mongodb_types::document_to_doc_value(doc).map_err(transform_error)?;
        let mut event = transform(&value, &self.config.transform).map_err(transform_error)?;
        provenance::stamp(&mut event, &self.host, cursor, doc, self.provenance_opts());
        Ok(event)
    }

    /// Run passes until `cancel` fires.
    ///
    /// Returns `Ok` on cancellation; any non-recoverable failure ends the
    /// loop with that error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<TailStats, TailError> {
        info!(
            "Tailing collections matching '{}' (batch size {}, idle sleep {:?} to {:?})",
            self.filter.pattern(),
            self.config.batch_size,
            self.backoff.floor(),
            self.backoff.ceiling()
        );
        let mut stats = TailStats::default();

        loop {
            let outcome = self.run_pass(&cancel).await?;
            stats.passes += 1;
            stats.emitted += outcome.emitted as u64;
            stats.skipped += outcome.skipped as u64;

            if outcome.cancelled {
                break;
            }

            let delay = if outcome.fetch_failed {
                stats.fetch_failures += 1;
                warn!("Retrying in {:?}", self.config.retry_delay);
                Some(self.config.retry_delay)
            } else if !outcome.advanced() {
                let delay = self.backoff.next_delay();
                debug!(
                    "No new documents. Sleeping {:?} (next {:?})",
                    delay,
                    self.backoff.peek()
                );
                Some(delay)
            } else {
                if self.config.reset_backoff_on_data {
                    self.backoff.reset();
                }
                None
            };

            if let Some(delay) = delay {
                if !sleep_or_cancel(delay, &cancel).await {
                    break;
                }
            }
        }

        info!(
            "Tail loop stopped after {} passes, {} events emitted",
            stats.passes, stats.emitted
        );
        Ok(stats)
    }
}

/// Sleep for `delay`; `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to resolve local host name: {e}");
            "localhost".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use checkpoint::MemoryStore;
    use tail_core::ChannelSink;
    use tokio::sync::mpsc;

    use crate::testing::MemorySource;

    type TestLoop = TailLoop<MemorySource, MemoryStore, ChannelSink>;

    fn tail_loop(
        source: &MemorySource,
        config: TailConfig,
    ) -> (TestLoop, mpsc::Receiver<FlatEvent>) {
        let (sink, rx) = ChannelSink::bounded(100);
        let checkpoints = CheckpointManager::new(MemoryStore::new(), "logstash_since");
        let tail = TailLoop::new(source.clone(), checkpoints, sink, config)
            .unwrap()
            .with_host("test-host");
        (tail, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<FlatEvent>) -> Vec<FlatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_pattern() {
        let source = MemorySource::new();
        let (sink, _rx) = ChannelSink::bounded(1);
        let checkpoints = CheckpointManager::new(MemoryStore::new(), "ns");
        let result = TailLoop::new(source, checkpoints, sink, TailConfig::new("(unclosed"));
        assert!(matches!(result, Err(TailError::Config(_))));
    }

    #[tokio::test]
    async fn test_discover_adds_and_removes() {
        let source = MemorySource::new();
        source.create_collection("events_a");
        source.create_collection("users");
        let (mut tail, _rx) = tail_loop(&source, TailConfig::new("events"));

        let report = tail.discover().await.unwrap();
        assert_eq!(report.added, vec!["events_a"]);

        source.create_collection("events_b");
        source.drop_collection("events_a");
        let report = tail.discover().await.unwrap();
        assert_eq!(report.added, vec!["events_b"]);
        assert_eq!(report.removed, vec!["events_a"]);

        let names: Vec<&str> = tail.watched().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["events_b"]);
    }

    #[tokio::test]
    async fn test_empty_collection_gets_no_checkpoint_until_data() {
        let source = MemorySource::new();
        source.create_collection("events");
        let (mut tail, mut rx) = tail_loop(&source, TailConfig::new("events"));
        let cancel = CancellationToken::new();

        tail.run_pass(&cancel).await.unwrap();
        assert_eq!(tail.checkpoints().store().write_count(), 0);
        assert_eq!(tail.watched().next().unwrap().last_id, None);

        let ids = source.insert_many("events", [doc! { "n": 1 }, doc! { "n": 2 }]);
        let outcome = tail.run_pass(&cancel).await.unwrap();

        assert_eq!(outcome.emitted, 2);
        assert_eq!(drain(&mut rx).len(), 2);
        let stored: Option<Cursor> = tail.checkpoints().read_checkpoint("events").await.unwrap();
        assert_eq!(stored, Some(ids[1]));
    }

    #[tokio::test]
    async fn test_event_shape() {
        let source = MemorySource::new();
        let id = source
            .insert(
                "events",
                doc! { "info": { "status": "200", "rtime": "12.5" }, "tags": ["http"] },
            )
            .unwrap();
        let (mut tail, mut rx) = tail_loop(&source, TailConfig::new("events"));

        tail.run_pass(&CancellationToken::new()).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.get("host"), Some(&tail_core::DocValue::from("test-host")));
        assert_eq!(
            event.get("mongo_id"),
            Some(&tail_core::DocValue::from(id.to_hex()))
        );
        assert_eq!(
            event.get("logdate"),
            Some(&tail_core::DocValue::from("2015-06-27T00:00:00Z"))
        );
        assert_eq!(event.get("info_status"), Some(&tail_core::DocValue::Int(200)));
        assert_eq!(event.get("info_rtime"), Some(&tail_core::DocValue::Float(12.5)));
        assert_eq!(
            event.get("tags"),
            Some(&tail_core::DocValue::from(vec!["http"]))
        );
        assert!(!event.contains_key("_id"));
    }

    #[tokio::test]
    async fn test_checkpoint_every_writes_within_batch() {
        let source = MemorySource::new();
        source.insert_many("events", (0..5).map(|i| doc! { "n": i }));
        let mut config = TailConfig::new("events");
        config.checkpoint_every = Some(2);
        let (mut tail, _rx) = tail_loop(&source, config);

        tail.run_pass(&CancellationToken::new()).await.unwrap();

        // seed + after docs 2 and 4 + end of batch
        assert_eq!(tail.checkpoints().store().write_count(), 4);
    }

    #[tokio::test]
    async fn test_unchanged_collection_is_not_rewritten() {
        let source = MemorySource::new();
        source.insert_many("events", (0..2).map(|i| doc! { "n": i }));
        let (mut tail, _rx) = tail_loop(&source, TailConfig::new("events"));
        let cancel = CancellationToken::new();

        tail.run_pass(&cancel).await.unwrap();
        let writes = tail.checkpoints().store().write_count();
        let outcome = tail.run_pass(&cancel).await.unwrap();

        assert_eq!(outcome.emitted, 0);
        assert_eq!(tail.checkpoints().store().write_count(), writes);
    }

    #[tokio::test]
    async fn test_untransformable_document_is_skipped_and_passed() {
        let source = MemorySource::new();
        let pointer = bson::Bson::try_from(serde_json::json!({
            "$dbPointer": {
                "$ref": "other",
                "$id": { "$oid": "558de77ec5ed007567574a58" }
            }
        }))
        .unwrap();
        source.insert("events", doc! { "n": 1 });
        let bad = source.insert("events", doc! { "ptr": pointer }).unwrap();
        source.insert("events", doc! { "n": 3 });
        let (mut tail, mut rx) = tail_loop(&source, TailConfig::new("events"));

        let outcome = tail.run_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.emitted, 2);
        assert_eq!(outcome.skipped, 1);
        let ids: Vec<String> = drain(&mut rx)
            .iter()
            .filter_map(|e| e.get("mongo_id").and_then(|v| v.as_str()).map(String::from))
            .collect();
        assert!(!ids.contains(&bad.to_hex()));
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_sink_is_fatal() {
        let source = MemorySource::new();
        source.insert("events", doc! { "n": 1 });
        let (mut tail, rx) = tail_loop(&source, TailConfig::new("events"));
        drop(rx);

        let err = tail.run_pass(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TailError::Emit { .. }));
        assert!(!err.is_recoverable());
    }
}
