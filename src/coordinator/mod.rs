pub mod session;
pub mod state_db;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Notify, mpsc};

pub use session::{Session, SessionState};
pub use state_db::CoordinatorDb;

use crate::error::{GraphError, Result};
use crate::graphcol;
use crate::models::{CdcEvent, WireMessage};
use crate::object_store::ObjectStore;
use crate::store::now_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Flush immediately once this many events are buffered across shards.
    pub batch_size: usize,
    /// Alarm delay after the first buffered event.
    pub batch_timeout_ms: u64,
    /// Soft cap per (shard, namespace) queue; beyond it senders see
    /// `error{overload}`.
    pub max_buffered_events: usize,
    /// How long a silently-dropped connection keeps its registration.
    pub grace_period_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            batch_size: 1000,
            batch_timeout_ms: 100,
            max_buffered_events: 1000,
            grace_period_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub events_buffered: u64,
    pub events_flushed: u64,
    pub flush_count: u64,
    pub registered_shards: u64,
    pub startup_timestamp: i64,
    pub uptime_ms: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardInfo {
    pub shard_id: String,
    pub namespace: String,
    pub last_sequence: u64,
}

/// Why a `cdc` batch was refused. Mapped to wire `error` codes by the
/// session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CdcReject {
    NotRegistered,
    OutOfOrder { last: u64 },
    Overload,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ShardPhase {
    Registered,
    Active,
    Draining,
}

struct ShardEntry {
    namespace: String,
    /// Highest acknowledged (durably flushed) sequence.
    last_sequence: u64,
    /// Highest received sequence; the strict-monotonicity floor.
    highest_pending: u64,
    phase: ShardPhase,
    connected: bool,
    disconnected_at: Option<Instant>,
    sender: Option<mpsc::UnboundedSender<WireMessage>>,
}

struct PendingEvent {
    shard_id: String,
    sequence: u64,
    event_index: u32,
    event: CdcEvent,
}

#[derive(Default, Clone)]
struct NamespaceTotals {
    triples: u64,
    chunks: u64,
    entities: u64,
    bytes: u64,
}

#[derive(Default)]
struct CoordInner {
    shards: HashMap<String, ShardEntry>,
    pending: HashMap<(String, String), Vec<PendingEvent>>,
    pending_total: usize,
    events_flushed: u64,
    flush_count: u64,
    bytes_written: u64,
    namespaces: HashMap<String, NamespaceTotals>,
}

/// Long-lived single-instance consumer of shard CDC streams. Buffers events
/// per (shard, namespace), enforces per-shard monotonic sequencing, and
/// periodically compacts namespace groups into GraphCol chunks in object
/// storage.
pub struct Coordinator {
    config: CoordinatorConfig,
    db: CoordinatorDb,
    store: Arc<dyn ObjectStore>,
    inner: Mutex<CoordInner>,
    flush_signal: Notify,
    started: Instant,
    startup_timestamp: i64,
}

/// Object-storage dataset name for a namespace URL:
/// `https://example.com/people` becomes `example.com-people`.
pub fn dataset_name(namespace: &str) -> String {
    namespace
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .replace(['/', ':'], "-")
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, db: CoordinatorDb, store: Arc<dyn ObjectStore>) -> Self {
        let mut inner = CoordInner::default();
        inner.events_flushed = db.counter("events_flushed").unwrap_or(0);
        inner.flush_count = db.counter("flush_count").unwrap_or(0);
        inner.bytes_written = db.counter("bytes_written").unwrap_or(0);
        Coordinator {
            config,
            db,
            store,
            inner: Mutex::new(inner),
            flush_signal: Notify::new(),
            started: Instant::now(),
            startup_timestamp: now_ms(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Handle `register`: recovery takes the stricter of the persisted and
    /// shard-declared sequences so replays are never double-applied.
    pub fn register(
        &self,
        shard_id: &str,
        namespace: &str,
        declared_last: u64,
        sender: mpsc::UnboundedSender<WireMessage>,
    ) -> Result<WireMessage> {
        let persisted = self
            .db
            .last_sequence(shard_id)
            .map_err(|e| GraphError::Transient(format!("state db: {e}")))?
            .unwrap_or(0);
        let last = persisted.max(declared_last);
        self.db
            .set_last_sequence(shard_id, namespace, last)
            .map_err(|e| GraphError::Transient(format!("state db: {e}")))?;

        let mut inner = self.inner.lock().unwrap();
        inner.shards.insert(
            shard_id.to_string(),
            ShardEntry {
                namespace: namespace.to_string(),
                last_sequence: last,
                highest_pending: last,
                phase: ShardPhase::Registered,
                connected: true,
                disconnected_at: None,
                sender: Some(sender),
            },
        );
        tracing::info!("shard {shard_id} registered for {namespace} at sequence {last}");
        Ok(WireMessage::Registered {
            shard_id: shard_id.to_string(),
        })
    }

    /// Handle a `cdc` batch. `sequence` is the highest sequence of the
    /// batch's events and must be strictly greater than anything seen.
    pub fn accept_cdc(
        &self,
        shard_id: &str,
        events: Vec<CdcEvent>,
        sequence: u64,
    ) -> std::result::Result<(), CdcReject> {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        let Some(entry) = inner.shards.get_mut(shard_id) else {
            return Err(CdcReject::NotRegistered);
        };
        if sequence <= entry.highest_pending {
            return Err(CdcReject::OutOfOrder {
                last: entry.highest_pending,
            });
        }
        let key = (shard_id.to_string(), entry.namespace.clone());
        let queue = inner.pending.entry(key).or_default();
        if queue.len() + events.len() > self.config.max_buffered_events {
            return Err(CdcReject::Overload);
        }

        entry.highest_pending = sequence;
        entry.phase = ShardPhase::Active;
        let added = events.len();
        for (i, event) in events.into_iter().enumerate() {
            queue.push(PendingEvent {
                shard_id: shard_id.to_string(),
                sequence,
                event_index: i as u32,
                event,
            });
        }
        inner.pending_total += added;
        if inner.pending_total >= self.config.batch_size {
            self.flush_signal.notify_one();
        }
        Ok(())
    }

    /// Graceful shutdown: outstanding events drain at the next flush, after
    /// which the registration is removed.
    pub fn deregister(&self, shard_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.shards.get_mut(shard_id) {
            entry.phase = ShardPhase::Draining;
            entry.connected = false;
            entry.sender = None;
        }
        self.flush_signal.notify_one();
        tracing::info!("shard {shard_id} deregistered");
    }

    /// Transport dropped without a deregister: keep the registration for a
    /// grace period; buffered events still flush next cycle.
    pub fn disconnect(&self, shard_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.shards.get_mut(shard_id) {
            if entry.phase != ShardPhase::Draining {
                entry.connected = false;
                entry.disconnected_at = Some(Instant::now());
            }
            entry.sender = None;
        }
    }

    pub fn expire_disconnected(&self) {
        let grace = std::time::Duration::from_millis(self.config.grace_period_ms);
        let mut inner = self.inner.lock().unwrap();
        inner.shards.retain(|shard_id, entry| {
            let expired = !entry.connected
                && entry
                    .disconnected_at
                    .map(|at| at.elapsed() > grace)
                    .unwrap_or(false);
            if expired {
                tracing::info!("shard {shard_id} registration expired after disconnect");
            }
            !expired
        });
    }

    pub fn is_registered(&self, shard_id: &str) -> bool {
        self.inner.lock().unwrap().shards.contains_key(shard_id)
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().unwrap().pending_total > 0
    }

    pub fn stats(&self) -> CoordinatorStats {
        let inner = self.inner.lock().unwrap();
        CoordinatorStats {
            events_buffered: inner.pending_total as u64,
            events_flushed: inner.events_flushed,
            flush_count: inner.flush_count,
            registered_shards: inner.shards.len() as u64,
            startup_timestamp: self.startup_timestamp,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            bytes_written: inner.bytes_written,
        }
    }

    pub fn shards(&self) -> Vec<ShardInfo> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<ShardInfo> = inner
            .shards
            .iter()
            .map(|(shard_id, entry)| ShardInfo {
                shard_id: shard_id.clone(),
                namespace: entry.namespace.clone(),
                last_sequence: entry.last_sequence,
            })
            .collect();
        out.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        out
    }

    /// Group pending events by namespace, publish one chunk per group plus
    /// an updated manifest, then advance sequences and ack. On publish
    /// failure the events are requeued untouched and no ack is sent.
    pub async fn flush(&self) -> Result<()> {
        let flush_started = Instant::now();
        let taken: HashMap<(String, String), Vec<PendingEvent>> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.pending.is_empty() {
                return Ok(());
            }
            inner.pending_total = 0;
            std::mem::take(&mut inner.pending)
        };

        let mut by_namespace: BTreeMap<String, Vec<&PendingEvent>> = BTreeMap::new();
        for ((_, namespace), events) in &taken {
            by_namespace
                .entry(namespace.clone())
                .or_default()
                .extend(events.iter());
        }

        let mut total_events = 0u64;
        let mut total_bytes = 0u64;
        let mut shard_high: HashMap<String, u64> = HashMap::new();
        let mut published: Vec<(String, u64, u64, u64)> = Vec::new();

        let result: Result<()> = async {
            for (namespace, mut events) in by_namespace {
                events.sort_by_key(|e| (e.sequence, e.event_index));
                let triples: Vec<_> = events.iter().map(|e| e.event.triple.clone()).collect();
                let entities = triples
                    .iter()
                    .map(|t| t.subject.as_str())
                    .collect::<BTreeSet<_>>()
                    .len() as u64;
                let bytes = graphcol::encode_chunk(&namespace, &triples)?;
                // Content-addressed chunk id: retries of the same batch
                // land on the same object key.
                let chunk_id: String = Sha256::digest(&bytes)
                    .iter()
                    .take(16)
                    .map(|b| format!("{b:02x}"))
                    .collect();
                let dataset = dataset_name(&namespace);
                let path = format!("datasets/{dataset}/chunks/{chunk_id}.chunk");
                self.store.put(&path, &bytes).await?;
                tracing::debug!(
                    "published {} triples to {path} ({} bytes)",
                    triples.len(),
                    bytes.len()
                );

                for e in &events {
                    let high = shard_high.entry(e.shard_id.clone()).or_insert(0);
                    *high = (*high).max(e.sequence);
                }
                total_events += events.len() as u64;
                total_bytes += bytes.len() as u64;
                published.push((namespace, triples.len() as u64, entities, bytes.len() as u64));
            }

            // Manifests are last-writer-wins within the flush cycle.
            let load_duration = flush_started.elapsed().as_millis() as u64;
            for (namespace, triples, entities, bytes) in &published {
                let totals = {
                    let mut inner = self.inner.lock().unwrap();
                    let totals = inner.namespaces.entry(namespace.clone()).or_default();
                    totals.triples += triples;
                    totals.chunks += 1;
                    totals.entities += entities;
                    totals.bytes += bytes;
                    totals.clone()
                };
                let dataset = dataset_name(namespace);
                let manifest = Manifest::new(dataset.clone(), namespace, &totals, load_duration);
                let body = serde_json::to_vec_pretty(&manifest)?;
                self.store
                    .put(&format!("datasets/{dataset}/manifest.json"), &body)
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            // Requeue in front of anything that arrived while flushing.
            let mut inner = self.inner.lock().unwrap();
            for (key, mut events) in taken {
                inner.pending_total += events.len();
                let queue = inner.pending.entry(key).or_default();
                let newer = std::mem::take(queue);
                events.extend(newer);
                *queue = events;
            }
            return Err(e);
        }

        // Publish succeeded: advance sequences, persist, ack.
        let mut inner = self.inner.lock().unwrap();
        for (shard_id, high) in &shard_high {
            if let Some(entry) = inner.shards.get_mut(shard_id) {
                entry.last_sequence = entry.last_sequence.max(*high);
                if let Err(e) = self
                    .db
                    .set_last_sequence(shard_id, &entry.namespace, entry.last_sequence)
                {
                    tracing::warn!("failed to persist sequence for {shard_id}: {e}");
                }
                if let Some(sender) = &entry.sender {
                    let _ = sender.send(WireMessage::Ack {
                        shard_id: shard_id.clone(),
                        sequence: entry.last_sequence,
                    });
                }
            } else if let Some(((_, namespace), _)) =
                taken.iter().find(|((s, _), _)| s == shard_id)
            {
                // Registration already expired; still persist progress.
                if let Err(e) = self.db.set_last_sequence(shard_id, namespace, *high) {
                    tracing::warn!("failed to persist sequence for {shard_id}: {e}");
                }
            }
        }
        inner.events_flushed += total_events;
        inner.flush_count += 1;
        inner.bytes_written += total_bytes;
        let _ = self.db.add_counter("events_flushed", total_events);
        let _ = self.db.add_counter("flush_count", 1);
        let _ = self.db.add_counter("bytes_written", total_bytes);

        // Draining shards are fully drained once their events are out.
        inner
            .shards
            .retain(|_, entry| entry.phase != ShardPhase::Draining);

        tracing::info!(
            "flushed {total_events} events ({total_bytes} bytes) across {} namespaces",
            published.len()
        );
        Ok(())
    }

    /// Cooperative scheduler: wake on the size trigger or the alarm, flush,
    /// and expire stale registrations.
    pub async fn run_flush_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.flush_signal.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.batch_timeout_ms,
                )) => {}
            }
            if self.has_pending() {
                if let Err(e) = self.flush().await {
                    tracing::warn!("flush failed, will retry: {e}");
                }
            }
            self.expire_disconnected();
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    version: u32,
    format: &'static str,
    dataset: String,
    source: String,
    schema: BTreeMap<&'static str, &'static str>,
    stats: ManifestStats,
    created_at: String,
    load_duration: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestStats {
    total_triples: u64,
    total_chunks: u64,
    total_entities: u64,
    total_size_bytes: u64,
    parse_errors: u64,
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// In-memory object store; can be told to fail the next N puts.
    pub(crate) struct MemObjectStore {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_puts: AtomicUsize,
    }

    impl MemObjectStore {
        pub fn new() -> Arc<Self> {
            Arc::new(MemObjectStore {
                objects: Mutex::new(HashMap::new()),
                fail_puts: AtomicUsize::new(0),
            })
        }

        pub fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl ObjectStore for MemObjectStore {
        async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) > 0 {
                self.fail_puts.fetch_sub(1, Ordering::SeqCst);
                return Err(GraphError::Transient("injected object-store failure".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.objects.lock().unwrap().get(path).cloned())
        }
    }

    pub(crate) fn test_coordinator() -> (Arc<Coordinator>, Arc<MemObjectStore>) {
        let store = MemObjectStore::new();
        let db = CoordinatorDb::open_in_memory().unwrap();
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig::default(),
            db,
            store.clone(),
        ));
        (coordinator, store)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{MemObjectStore, test_coordinator};
    use super::*;
    use crate::models::{CdcEventKind, EntityId, TransactionId, Triple, TypedObject};

    fn event(ns_path: &str, i: usize) -> CdcEvent {
        CdcEvent {
            kind: CdcEventKind::Insert,
            triple: Triple::new(
                EntityId::parse(&format!("https://example.com/{ns_path}/p{i}")).unwrap(),
                "name",
                TypedObject::String(format!("p{i}")),
                1_700_000_000_000 + i as i64,
                TransactionId::generate(),
            ),
            previous: None,
            timestamp: 1_700_000_000_000,
        }
    }

    fn sender() -> (
        mpsc::UnboundedSender<WireMessage>,
        mpsc::UnboundedReceiver<WireMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_flush_publishes_chunk_and_acks() {
        let (coordinator, store) = test_coordinator();
        let (tx, mut rx) = sender();
        coordinator
            .register("shard-1", "https://example.com/people", 100, tx)
            .unwrap();
        coordinator
            .accept_cdc("shard-1", (0..3).map(|i| event("people", i)).collect(), 110)
            .unwrap();

        coordinator.flush().await.unwrap();

        let keys = store.keys();
        assert_eq!(keys.len(), 2, "expected one chunk and one manifest: {keys:?}");
        assert!(keys.iter().any(|k| k.ends_with(".chunk")));
        assert!(
            keys.contains(&"datasets/example.com-people/manifest.json".to_string()),
            "{keys:?}"
        );

        // The chunk decodes back to the flushed triples.
        let chunk_key = keys.iter().find(|k| k.ends_with(".chunk")).unwrap();
        let bytes = store.get(chunk_key).await.unwrap().unwrap();
        let decoded = graphcol::decode_chunk(&bytes).unwrap();
        assert_eq!(decoded.triples.len(), 3);
        assert_eq!(decoded.meta.namespace, "https://example.com/people");

        // Ack carries the batch's highest sequence.
        let ack = rx.recv().await.unwrap();
        assert_eq!(
            ack,
            WireMessage::Ack {
                shard_id: "shard-1".into(),
                sequence: 110
            }
        );
        assert_eq!(coordinator.shards()[0].last_sequence, 110);
        assert_eq!(coordinator.stats().events_flushed, 3);
        assert_eq!(coordinator.stats().flush_count, 1);
    }

    #[tokio::test]
    async fn test_flush_groups_by_namespace() {
        let (coordinator, store) = test_coordinator();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        coordinator
            .register("shard-1", "https://example.com/people", 0, tx1)
            .unwrap();
        coordinator
            .register("shard-2", "https://example.com/orgs", 0, tx2)
            .unwrap();
        coordinator
            .accept_cdc("shard-1", vec![event("people", 0)], 1)
            .unwrap();
        coordinator
            .accept_cdc("shard-2", vec![event("orgs", 0)], 1)
            .unwrap();

        coordinator.flush().await.unwrap();

        let keys = store.keys();
        assert!(keys.iter().any(|k| k.starts_with("datasets/example.com-people/chunks/")));
        assert!(keys.iter().any(|k| k.starts_with("datasets/example.com-orgs/chunks/")));
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_events_and_retries() {
        let (coordinator, store) = test_coordinator();
        let (tx, mut rx) = sender();
        coordinator
            .register("shard-1", "https://example.com/people", 0, tx)
            .unwrap();
        coordinator
            .accept_cdc("shard-1", vec![event("people", 0)], 1)
            .unwrap();

        store.fail_puts.store(1, std::sync::atomic::Ordering::SeqCst);
        assert!(coordinator.flush().await.is_err());
        assert!(coordinator.has_pending());
        assert!(rx.try_recv().is_err(), "no ack on failed flush");
        assert_eq!(coordinator.shards()[0].last_sequence, 0);

        // Next alarm retries the same batch.
        coordinator.flush().await.unwrap();
        assert!(!coordinator.has_pending());
        assert_eq!(rx.recv().await.unwrap(), WireMessage::Ack {
            shard_id: "shard-1".into(),
            sequence: 1
        });
    }

    #[tokio::test]
    async fn test_recovery_takes_max_of_persisted_and_declared() {
        let store = MemObjectStore::new();
        let db = CoordinatorDb::open_in_memory().unwrap();
        db.set_last_sequence("shard-1", "https://example.com/people", 200)
            .unwrap();
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig::default(),
            db,
            store,
        ));

        let (tx, _rx) = sender();
        coordinator
            .register("shard-1", "https://example.com/people", 150, tx)
            .unwrap();
        // The persisted 200 wins over the declared 150.
        assert!(matches!(
            coordinator.accept_cdc("shard-1", vec![event("people", 0)], 180),
            Err(CdcReject::OutOfOrder { last: 200 })
        ));
        assert!(
            coordinator
                .accept_cdc("shard-1", vec![event("people", 0)], 201)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_events_ordered_by_sequence_within_namespace() {
        let (coordinator, store) = test_coordinator();
        let (tx, _rx) = sender();
        coordinator
            .register("shard-1", "https://example.com/people", 0, tx)
            .unwrap();
        // Two batches; the chunk must carry both in sequence order.
        coordinator
            .accept_cdc("shard-1", vec![event("people", 0), event("people", 1)], 2)
            .unwrap();
        coordinator
            .accept_cdc("shard-1", vec![event("people", 2)], 3)
            .unwrap();

        coordinator.flush().await.unwrap();
        let keys = store.keys();
        let chunk_key = keys.iter().find(|k| k.ends_with(".chunk")).unwrap();
        let bytes = store.get(chunk_key).await.unwrap().unwrap();
        let decoded = graphcol::decode_chunk(&bytes).unwrap();
        assert_eq!(decoded.triples.len(), 3);
    }

    #[test]
    fn test_dataset_name_is_path_safe() {
        assert_eq!(
            dataset_name("https://example.com/people"),
            "example.com-people"
        );
        assert_eq!(
            dataset_name("http://localhost:8080/ns/"),
            "localhost-8080-ns"
        );
    }
}

impl Manifest {
    fn new(dataset: String, namespace: &str, totals: &NamespaceTotals, load_duration: u64) -> Self {
        let mut schema = BTreeMap::new();
        schema.insert("subject", "entity id (absolute URL)");
        schema.insert("predicate", "field name");
        schema.insert("object", "typed value, one column per tag");
        schema.insert("timestamp", "version timestamp, ms since epoch");
        schema.insert("tx_id", "writer transaction ulid");
        Manifest {
            version: 1,
            format: "graphcol",
            dataset,
            source: namespace.to_string(),
            schema,
            stats: ManifestStats {
                total_triples: totals.triples,
                total_chunks: totals.chunks,
                total_entities: totals.entities,
                total_size_bytes: totals.bytes,
                parse_errors: 0,
            },
            created_at: chrono::Utc::now().to_rfc3339(),
            load_duration,
        }
    }
}
