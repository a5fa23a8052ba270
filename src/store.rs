use std::sync::{Arc, Mutex};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rusqlite::{Connection, params};

use crate::bloom::BloomFilter;
use crate::cdc::CdcBuffer;
use crate::error::{GraphError, Result};
use crate::index::{CompareOp, GeoMatch, IndexConfig, IndexHooks, IndexMaintainer, osp, pos};
use crate::models::{
    CdcEvent, CdcEventKind, Entity, EntityId, ObjType, TransactionId, Triple, TypedObject,
    validate_predicate,
};

const SCHEMA_VERSION: &str = "1";
const BLOOM_META_KEY: &str = "entity_bloom";

/// Column list shared by every triple SELECT. Order is load-bearing for
/// `triple_from_row`.
const TRIPLE_COLUMNS: &str = "subject, predicate, obj_type, obj_ref, obj_string, obj_int64, \
     obj_float64, obj_bool, obj_timestamp, obj_lat, obj_lng, obj_lang, obj_unit, obj_binary, \
     timestamp, tx_id";

/// Correlated subquery selecting the latest row id for a (subject,
/// predicate) pair; latest is `(timestamp desc, tx_id desc)`.
const LATEST_ID: &str = "(SELECT t2.id FROM triples t2 \
     WHERE t2.subject = t.subject AND t2.predicate = t.predicate \
     ORDER BY t2.timestamp DESC, t2.tx_id DESC LIMIT 1)";

/// Single-shard durable triple storage. Writes are serialized through one
/// connection; index hooks run inside the write transaction and CDC events
/// are emitted after commit, in commit order.
pub struct TripleStore {
    conn: Mutex<Connection>,
    indexes: Mutex<IndexMaintainer>,
    cdc: Arc<CdcBuffer>,
}

impl TripleStore {
    pub fn open(path: &str, config: IndexConfig, cdc: Arc<CdcBuffer>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn, config, cdc)
    }

    pub fn open_in_memory(config: IndexConfig, cdc: Arc<CdcBuffer>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config, cdc)
    }

    fn from_connection(
        conn: Connection,
        config: IndexConfig,
        cdc: Arc<CdcBuffer>,
    ) -> Result<Self> {
        let store = TripleStore {
            conn: Mutex::new(conn),
            indexes: Mutex::new(IndexMaintainer::new(config)),
            cdc,
        };
        store.run_migrations()?;
        store.check_schema_version()?;
        store.rebuild_volatile_indexes()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS triples (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                subject       TEXT NOT NULL,
                predicate     TEXT NOT NULL,
                obj_type      INTEGER NOT NULL,
                obj_ref       TEXT,
                obj_string    TEXT,
                obj_norm      TEXT,
                obj_int64     INTEGER,
                obj_float64   REAL,
                obj_bool      INTEGER,
                obj_timestamp INTEGER,
                obj_lat       REAL,
                obj_lng       REAL,
                obj_lang      TEXT,
                obj_unit      TEXT,
                obj_binary    BLOB,
                timestamp     INTEGER NOT NULL,
                tx_id         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_triples_spo ON triples(subject, predicate, obj_type);
            CREATE INDEX IF NOT EXISTS idx_triples_pos ON triples(predicate, obj_type, subject);
            CREATE INDEX IF NOT EXISTS idx_triples_osp ON triples(obj_ref, subject, predicate)
                WHERE obj_type = 7;
            CREATE INDEX IF NOT EXISTS idx_triples_time ON triples(timestamp);
            CREATE INDEX IF NOT EXISTS idx_triples_tx ON triples(tx_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS fts_documents
                USING fts5(subject UNINDEXED, predicate UNINDEXED, content);

            CREATE TABLE IF NOT EXISTS geo_index (
                subject   TEXT NOT NULL,
                predicate TEXT NOT NULL,
                geohash   TEXT NOT NULL,
                lat       REAL NOT NULL,
                lng       REAL NOT NULL,
                PRIMARY KEY (subject, predicate)
            );
            CREATE INDEX IF NOT EXISTS idx_geo_hash ON geo_index(geohash);

            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id   TEXT PRIMARY KEY,
                namespace  TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                data       BLOB,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_namespace ON chunks(namespace, created_at DESC);

            CREATE TABLE IF NOT EXISTS schema_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1');
            ",
        )?;
        Ok(())
    }

    fn check_schema_version(&self) -> Result<()> {
        let version = self
            .get_meta("schema_version")?
            .unwrap_or_else(|| SCHEMA_VERSION.to_string());
        if version != SCHEMA_VERSION {
            return Err(GraphError::Fatal(format!(
                "schema version mismatch: store has {version}, engine expects {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    /// The bloom filter and the HNSW graph live in memory; the triples table
    /// is the source of truth they are rebuilt from.
    fn rebuild_volatile_indexes(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut indexes = self.indexes.lock().unwrap();

        match self.get_meta_locked(&conn, BLOOM_META_KEY)? {
            Some(encoded) => {
                let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    GraphError::Fatal(format!("persisted bloom filter is corrupt: {e}"))
                })?;
                indexes.restore_bloom(BloomFilter::deserialize(&bytes)?);
            }
            None => {
                let mut stmt = conn.prepare("SELECT DISTINCT subject FROM triples")?;
                let subjects = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for s in subjects {
                    indexes.bloom_add(&EntityId::from_trusted(s));
                }
            }
        }

        let embedding_predicates: Vec<String> = indexes
            .config()
            .embedding_predicates
            .iter()
            .cloned()
            .collect();
        for predicate in embedding_predicates {
            let sql = format!(
                "SELECT t.subject, t.obj_binary FROM triples t \
                 WHERE t.predicate = ?1 AND t.obj_type = ?2 AND t.id = {LATEST_ID}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![predicate, ObjType::Json.code()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (subject, bytes) in rows {
                let values: Vec<f64> = match serde_json::from_slice(&bytes) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                indexes.hnsw_insert(
                    EntityId::from_trusted(subject),
                    values.into_iter().map(|v| v as f32).collect(),
                )?;
            }
        }
        Ok(())
    }

    // ── Write operations ──

    pub fn insert_triple(&self, triple: &Triple) -> Result<()> {
        validate_triple(triple)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_row(&tx, triple)?;
        {
            let mut indexes = self.indexes.lock().unwrap();
            indexes.on_insert(&tx, triple)?;
        }
        tx.commit()?;
        self.emit(CdcEventKind::Insert, triple.clone(), None);
        Ok(())
    }

    /// Append a new version for an existing key. The previous latest value
    /// is handed to the index hooks and recorded in the CDC event.
    pub fn update_triple(
        &self,
        subject: &EntityId,
        predicate: &str,
        new_value: TypedObject,
        tx_id: TransactionId,
    ) -> Result<Triple> {
        validate_predicate(predicate)?;
        new_value.validate()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let old = latest_row(&tx, subject, predicate)?
            .filter(|t| !t.is_tombstone())
            .ok_or_else(|| {
                GraphError::NotFound(format!("no triple for ({subject}, {predicate})"))
            })?;
        // A same-millisecond update must still order after the old version.
        let timestamp = now_ms().max(old.timestamp + 1);
        let new = Triple::new(subject.clone(), predicate, new_value, timestamp, tx_id);
        insert_row(&tx, &new)?;
        {
            let mut indexes = self.indexes.lock().unwrap();
            indexes.on_update(&tx, &old, &new)?;
        }
        tx.commit()?;
        self.emit(CdcEventKind::Update, new.clone(), Some(old.object));
        Ok(new)
    }

    /// Append a tombstone. Idempotent: a second delete appends another
    /// tombstone row but touches no index.
    pub fn delete_triple(
        &self,
        subject: &EntityId,
        predicate: &str,
        tx_id: TransactionId,
    ) -> Result<()> {
        validate_predicate(predicate)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let prev = latest_row(&tx, subject, predicate)?;
        let timestamp = now_ms().max(prev.as_ref().map(|t| t.timestamp + 1).unwrap_or(0));
        let tombstone = Triple::new(
            subject.clone(),
            predicate,
            TypedObject::Null,
            timestamp,
            tx_id,
        );
        insert_row(&tx, &tombstone)?;
        let live_prev = prev.filter(|t| !t.is_tombstone());
        if let Some(prev) = &live_prev {
            let mut indexes = self.indexes.lock().unwrap();
            indexes.on_delete(&tx, prev)?;
        }
        tx.commit()?;
        self.emit(
            CdcEventKind::Delete,
            tombstone,
            live_prev.map(|t| t.object),
        );
        Ok(())
    }

    /// Atomic multi-insert: either every triple is appended or none. The
    /// index maintainer sees the whole batch in one call.
    pub fn batch_insert_triples(&self, triples: &[Triple]) -> Result<()> {
        for t in triples {
            validate_triple(t)?;
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for t in triples {
            insert_row(&tx, t)?;
        }
        {
            let mut indexes = self.indexes.lock().unwrap();
            indexes.on_batch_insert(&tx, triples)?;
        }
        tx.commit()?;
        for t in triples {
            self.emit(CdcEventKind::Insert, t.clone(), None);
        }
        Ok(())
    }

    fn emit(&self, kind: CdcEventKind, triple: Triple, previous: Option<TypedObject>) {
        let timestamp = triple.timestamp;
        self.cdc.append(CdcEvent {
            kind,
            triple,
            previous,
            timestamp,
        });
    }

    // ── Read operations ──

    /// The logical value for a key: latest non-tombstone row, or None.
    pub fn get_latest_triple(
        &self,
        subject: &EntityId,
        predicate: &str,
    ) -> Result<Option<Triple>> {
        let conn = self.conn.lock().unwrap();
        Ok(latest_row(&conn, subject, predicate)?.filter(|t| !t.is_tombstone()))
    }

    /// Latest-wins assembled view of every live predicate of a subject.
    pub fn get_entity(&self, subject: &EntityId) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TRIPLE_COLUMNS} FROM triples t \
             WHERE t.subject = ?1 AND t.obj_type != 0 AND t.id = {LATEST_ID} \
             ORDER BY t.predicate"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let triples = stmt
            .query_map(params![subject.as_str()], triple_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if triples.is_empty() {
            return Ok(None);
        }
        let mut entity = Entity::new(subject.clone());
        for t in triples {
            entity.properties.insert(t.predicate, t.object);
        }
        Ok(Some(entity))
    }

    /// True when the subject has at least one live predicate.
    pub fn subject_exists(&self, subject: &EntityId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM triples t \
             WHERE t.subject = ?1 AND t.obj_type != 0 AND t.id = {LATEST_ID})"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![subject.as_str()], |row| row.get(0))?)
    }

    /// Cursor-based scan in row-id order; used by CDC replay and index
    /// rebuild. Returns the page and the cursor for the next one.
    pub fn scan(&self, cursor: Option<i64>, limit: usize) -> Result<(Vec<Triple>, Option<i64>)> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT id, {TRIPLE_COLUMNS} FROM triples t \
             WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![cursor.unwrap_or(0), limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, triple_from_row_at(row, 1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let next = if rows.len() == limit {
            rows.last().map(|(id, _)| *id)
        } else {
            None
        };
        Ok((rows.into_iter().map(|(_, t)| t).collect(), next))
    }

    // ── Index probes ──

    pub fn find_subjects(
        &self,
        predicate: &str,
        op: CompareOp,
        value: &TypedObject,
        limit: usize,
    ) -> Result<Vec<EntityId>> {
        let conn = self.conn.lock().unwrap();
        pos::find_subjects(&conn, predicate, op, value, limit)
    }

    pub fn subjects_with_predicate(&self, predicate: &str, limit: usize) -> Result<Vec<EntityId>> {
        let conn = self.conn.lock().unwrap();
        pos::subjects_with_predicate(&conn, predicate, limit)
    }

    pub fn reverse_refs(
        &self,
        target: &EntityId,
        predicate: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(EntityId, String)>> {
        let conn = self.conn.lock().unwrap();
        osp::reverse_refs(&conn, target, predicate, limit)
    }

    pub fn search_text(
        &self,
        query: &str,
        predicate: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EntityId>> {
        let conn = self.conn.lock().unwrap();
        let indexes = self.indexes.lock().unwrap();
        indexes.search_text(&conn, query, predicate, limit)
    }

    pub fn geo_bbox(
        &self,
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>> {
        let conn = self.conn.lock().unwrap();
        let indexes = self.indexes.lock().unwrap();
        indexes.geo_bbox(&conn, min_lat, min_lng, max_lat, max_lng, limit)
    }

    pub fn geo_radius(
        &self,
        center_lat: f64,
        center_lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>> {
        let conn = self.conn.lock().unwrap();
        let indexes = self.indexes.lock().unwrap();
        indexes.geo_radius(&conn, center_lat, center_lng, radius_km, limit)
    }

    pub fn vector_search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(EntityId, f64)> {
        self.indexes.lock().unwrap().vector_search(query, k, ef)
    }

    pub fn bloom_might_exist(&self, subject: &EntityId) -> bool {
        self.indexes
            .lock()
            .unwrap()
            .bloom()
            .might_exist(subject.as_str().as_bytes())
    }

    pub fn bloom_snapshot(&self) -> BloomFilter {
        self.indexes.lock().unwrap().bloom().clone()
    }

    /// Persist the bloom filter so the next open can skip the rebuild scan.
    pub fn save_bloom(&self) -> Result<()> {
        let encoded = BASE64.encode(self.bloom_snapshot().serialize());
        self.set_meta(BLOOM_META_KEY, &encoded)
    }

    // ── Chunk cache ──

    pub fn put_chunk(&self, chunk_id: &str, namespace: &str, data: Option<&[u8]>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chunks (chunk_id, namespace, size_bytes, data) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(chunk_id) DO UPDATE SET size_bytes = ?3, data = ?4",
            params![
                chunk_id,
                namespace,
                data.map(|d| d.len() as i64).unwrap_or(0),
                data
            ],
        )?;
        Ok(())
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT data FROM chunks WHERE chunk_id = ?1")?;
        let mut rows = stmt.query_map(params![chunk_id], |row| row.get::<_, Option<Vec<u8>>>(0))?;
        Ok(rows.next().transpose()?.flatten())
    }

    pub fn list_chunks(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT chunk_id FROM chunks WHERE namespace = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Metadata ──

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        self.get_meta_locked(&conn, key)
    }

    fn get_meta_locked(&self, conn: &Connection, key: &str) -> Result<Option<String>> {
        let mut stmt = conn.prepare_cached("SELECT value FROM schema_meta WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schema_meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn validate_triple(triple: &Triple) -> Result<()> {
    validate_predicate(&triple.predicate)?;
    EntityId::parse(triple.subject.as_str())?;
    triple.object.validate()
}

fn latest_row(
    conn: &Connection,
    subject: &EntityId,
    predicate: &str,
) -> Result<Option<Triple>> {
    let sql = format!(
        "SELECT {TRIPLE_COLUMNS} FROM triples t \
         WHERE t.subject = ?1 AND t.predicate = ?2 \
         ORDER BY t.timestamp DESC, t.tx_id DESC LIMIT 1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query_map(params![subject.as_str(), predicate], triple_from_row)?;
    Ok(rows.next().transpose()?)
}

fn insert_row(conn: &Connection, t: &Triple) -> Result<()> {
    let mut obj_ref: Option<&str> = None;
    let mut obj_string: Option<&str> = None;
    let mut obj_norm: Option<String> = None;
    let mut obj_int64: Option<i64> = None;
    let mut obj_float64: Option<f64> = None;
    let mut obj_bool: Option<bool> = None;
    let mut obj_timestamp: Option<i64> = None;
    let mut obj_lat: Option<f64> = None;
    let mut obj_lng: Option<f64> = None;
    let mut obj_lang: Option<&str> = None;
    let mut obj_unit: Option<&str> = None;
    let mut obj_binary: Option<&[u8]> = None;

    match &t.object {
        TypedObject::Null => {}
        TypedObject::Bool(v) => obj_bool = Some(*v),
        TypedObject::Int32(v) => obj_int64 = Some(*v as i64),
        TypedObject::Int64(v) => obj_int64 = Some(*v),
        TypedObject::Float64(v) => obj_float64 = Some(*v),
        TypedObject::String(s) => {
            obj_string = Some(s);
            obj_norm = Some(pos::normalize_string(s));
        }
        TypedObject::Url(s) => {
            obj_string = Some(s);
            obj_norm = Some(pos::normalize_string(s));
        }
        TypedObject::Ref(id) => obj_ref = Some(id.as_str()),
        TypedObject::Timestamp(v) => obj_timestamp = Some(*v),
        TypedObject::GeoPoint { lat, lng } => {
            obj_lat = Some(*lat);
            obj_lng = Some(*lng);
        }
        TypedObject::Monolingual { text, lang } => {
            obj_string = Some(text);
            obj_norm = Some(pos::normalize_string(text));
            obj_lang = Some(lang);
        }
        TypedObject::Quantity { value, unit } => {
            obj_float64 = Some(*value);
            obj_unit = unit.as_deref();
        }
        TypedObject::Json(bytes) | TypedObject::Binary(bytes) => obj_binary = Some(bytes),
    }

    conn.execute(
        "INSERT INTO triples (subject, predicate, obj_type, obj_ref, obj_string, obj_norm, \
         obj_int64, obj_float64, obj_bool, obj_timestamp, obj_lat, obj_lng, obj_lang, obj_unit, \
         obj_binary, timestamp, tx_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            t.subject.as_str(),
            t.predicate,
            t.object.obj_type().code(),
            obj_ref,
            obj_string,
            obj_norm,
            obj_int64,
            obj_float64,
            obj_bool,
            obj_timestamp,
            obj_lat,
            obj_lng,
            obj_lang,
            obj_unit,
            obj_binary,
            t.timestamp,
            t.tx_id.as_str(),
        ],
    )?;
    Ok(())
}

fn triple_from_row(row: &rusqlite::Row) -> rusqlite::Result<Triple> {
    triple_from_row_at(row, 0)
}

/// Rebuild a `Triple` from `TRIPLE_COLUMNS` starting at column `base`.
fn triple_from_row_at(row: &rusqlite::Row, base: usize) -> rusqlite::Result<Triple> {
    let subject: String = row.get(base)?;
    let predicate: String = row.get(base + 1)?;
    let code: u8 = row.get(base + 2)?;
    let obj_type = ObjType::from_code(code).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            base + 2,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })?;

    let object = match obj_type {
        ObjType::Null => TypedObject::Null,
        ObjType::Bool => TypedObject::Bool(row.get(base + 7)?),
        ObjType::Int32 => TypedObject::Int32(row.get::<_, i64>(base + 5)? as i32),
        ObjType::Int64 => TypedObject::Int64(row.get(base + 5)?),
        ObjType::Float64 => TypedObject::Float64(row.get(base + 6)?),
        ObjType::String => TypedObject::String(row.get(base + 4)?),
        ObjType::Url => TypedObject::Url(row.get(base + 4)?),
        ObjType::Ref => TypedObject::Ref(EntityId::from_trusted(row.get(base + 3)?)),
        ObjType::Timestamp => TypedObject::Timestamp(row.get(base + 8)?),
        ObjType::GeoPoint => TypedObject::GeoPoint {
            lat: row.get(base + 9)?,
            lng: row.get(base + 10)?,
        },
        ObjType::Monolingual => TypedObject::Monolingual {
            text: row.get(base + 4)?,
            lang: row.get(base + 11)?,
        },
        ObjType::Quantity => TypedObject::Quantity {
            value: row.get(base + 6)?,
            unit: row.get(base + 12)?,
        },
        ObjType::Json => TypedObject::Json(row.get(base + 13)?),
        ObjType::Binary => TypedObject::Binary(row.get(base + 13)?),
    };

    Ok(Triple {
        subject: EntityId::from_trusted(subject),
        predicate,
        object,
        timestamp: row.get(base + 14)?,
        tx_id: TransactionId::from_trusted(row.get(base + 15)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DistanceMetric;

    fn test_store() -> (TripleStore, Arc<CdcBuffer>) {
        let cdc = Arc::new(CdcBuffer::new(10_000));
        let store = TripleStore::open_in_memory(IndexConfig::default(), cdc.clone()).unwrap();
        (store, cdc)
    }

    fn eid(path: &str) -> EntityId {
        EntityId::parse(&format!("https://example.com/{path}")).unwrap()
    }

    fn insert(store: &TripleStore, subject: &EntityId, predicate: &str, object: TypedObject) {
        let triple = Triple::new(
            subject.clone(),
            predicate,
            object,
            now_ms(),
            TransactionId::generate(),
        );
        store.insert_triple(&triple).unwrap();
    }

    #[test]
    fn test_latest_wins_insert_update_delete() {
        let (store, _cdc) = test_store();
        let alice = eid("people/alice");

        insert(&store, &alice, "name", TypedObject::String("A".into()));
        store
            .update_triple(
                &alice,
                "name",
                TypedObject::String("B".into()),
                TransactionId::generate(),
            )
            .unwrap();

        let latest = store.get_latest_triple(&alice, "name").unwrap().unwrap();
        assert_eq!(latest.object, TypedObject::String("B".into()));

        store
            .delete_triple(&alice, "name", TransactionId::generate())
            .unwrap();
        assert!(store.get_latest_triple(&alice, "name").unwrap().is_none());
    }

    #[test]
    fn test_latest_wins_by_timestamp_not_insertion_order() {
        let (store, _cdc) = test_store();
        let alice = eid("people/alice");
        // Rows appended out of timestamp order; the highest (timestamp,
        // tx_id) wins regardless.
        for (ts, value) in [(300, "newest"), (100, "oldest"), (200, "middle")] {
            store
                .insert_triple(&Triple::new(
                    alice.clone(),
                    "name",
                    TypedObject::String(value.into()),
                    ts,
                    TransactionId::generate(),
                ))
                .unwrap();
        }
        let latest = store.get_latest_triple(&alice, "name").unwrap().unwrap();
        assert_eq!(latest.object, TypedObject::String("newest".into()));
        assert_eq!(latest.timestamp, 300);
    }

    #[test]
    fn test_update_without_prior_is_not_found() {
        let (store, _cdc) = test_store();
        let err = store
            .update_triple(
                &eid("people/ghost"),
                "name",
                TypedObject::String("X".into()),
                TransactionId::generate(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (store, _cdc) = test_store();
        let alice = eid("people/alice");
        insert(&store, &alice, "name", TypedObject::String("A".into()));
        store
            .delete_triple(&alice, "name", TransactionId::generate())
            .unwrap();
        store
            .delete_triple(&alice, "name", TransactionId::generate())
            .unwrap();
        assert!(store.get_latest_triple(&alice, "name").unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_bad_input() {
        let (store, _cdc) = test_store();
        let triple = Triple::new(
            eid("x"),
            "foaf:knows",
            TypedObject::Bool(true),
            now_ms(),
            TransactionId::generate(),
        );
        assert!(matches!(
            store.insert_triple(&triple),
            Err(GraphError::Validation(_))
        ));

        let triple = Triple::new(
            eid("x"),
            "location",
            TypedObject::GeoPoint { lat: 95.0, lng: 0.0 },
            now_ms(),
            TransactionId::generate(),
        );
        assert!(matches!(
            store.insert_triple(&triple),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn test_batch_insert_is_atomic() {
        let (store, _cdc) = test_store();
        let good = Triple::new(
            eid("a"),
            "name",
            TypedObject::String("a".into()),
            now_ms(),
            TransactionId::generate(),
        );
        let bad = Triple::new(
            eid("b"),
            "bad:pred",
            TypedObject::String("b".into()),
            now_ms(),
            TransactionId::generate(),
        );
        assert!(store.batch_insert_triples(&[good, bad]).is_err());
        assert!(store.get_latest_triple(&eid("a"), "name").unwrap().is_none());
    }

    #[test]
    fn test_reverse_refs() {
        let (store, _cdc) = test_store();
        let p2 = eid("people/p2");
        insert(&store, &eid("people/p1"), "knows", TypedObject::Ref(p2.clone()));
        insert(&store, &eid("people/p3"), "knows", TypedObject::Ref(p2.clone()));

        let refs = store.reverse_refs(&p2, Some("knows"), 100).unwrap();
        let sources: Vec<&str> = refs.iter().map(|(s, _)| s.as_str()).collect();
        assert!(sources.contains(&"https://example.com/people/p1"));
        assert!(sources.contains(&"https://example.com/people/p3"));
    }

    #[test]
    fn test_reverse_refs_respect_latest_wins() {
        let (store, _cdc) = test_store();
        let p2 = eid("people/p2");
        let p1 = eid("people/p1");
        insert(&store, &p1, "knows", TypedObject::Ref(p2.clone()));
        store
            .update_triple(
                &p1,
                "knows",
                TypedObject::Ref(eid("people/p4")),
                TransactionId::generate(),
            )
            .unwrap();
        assert!(store.reverse_refs(&p2, Some("knows"), 100).unwrap().is_empty());
    }

    #[test]
    fn test_find_subjects_comparison_ops() {
        let (store, _cdc) = test_store();
        for (name, age) in [("a", 30i64), ("b", 40), ("c", 50)] {
            insert(&store, &eid(&format!("people/{name}")), "age", TypedObject::Int64(age));
        }
        let over_35 = store
            .find_subjects("age", CompareOp::Gt, &TypedObject::Int64(35), 100)
            .unwrap();
        assert_eq!(over_35.len(), 2);

        let exact = store
            .find_subjects("age", CompareOp::Eq, &TypedObject::Int64(30), 100)
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].as_str(), "https://example.com/people/a");
    }

    #[test]
    fn test_string_match_is_case_canonical() {
        let (store, _cdc) = test_store();
        insert(&store, &eid("people/a"), "name", TypedObject::String("Alice".into()));
        let found = store
            .find_subjects("name", CompareOp::Eq, &TypedObject::String("alice".into()), 10)
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_get_entity_assembles_latest_values() {
        let (store, _cdc) = test_store();
        let alice = eid("people/alice");
        insert(&store, &alice, "name", TypedObject::String("Alice".into()));
        insert(&store, &alice, "age", TypedObject::Int64(30));
        store
            .update_triple(&alice, "age", TypedObject::Int64(31), TransactionId::generate())
            .unwrap();
        store
            .delete_triple(&alice, "name", TransactionId::generate())
            .unwrap();

        let entity = store.get_entity(&alice).unwrap().unwrap();
        assert_eq!(entity.properties.len(), 1);
        assert_eq!(entity.properties["age"], TypedObject::Int64(31));
    }

    #[test]
    fn test_scan_pages_in_id_order() {
        let (store, _cdc) = test_store();
        for i in 0..7 {
            insert(&store, &eid(&format!("items/{i}")), "rank", TypedObject::Int64(i));
        }
        let (page1, cursor) = store.scan(None, 3).unwrap();
        assert_eq!(page1.len(), 3);
        let cursor = cursor.unwrap();
        let (page2, _) = store.scan(Some(cursor), 10).unwrap();
        assert_eq!(page2.len(), 4);
        assert_eq!(page1[0].object, TypedObject::Int64(0));
        assert_eq!(page2[0].object, TypedObject::Int64(3));
    }

    #[test]
    fn test_cdc_events_emitted_in_write_order() {
        let (store, cdc) = test_store();
        let alice = eid("people/alice");
        insert(&store, &alice, "name", TypedObject::String("A".into()));
        store
            .update_triple(
                &alice,
                "name",
                TypedObject::String("B".into()),
                TransactionId::generate(),
            )
            .unwrap();
        store
            .delete_triple(&alice, "name", TransactionId::generate())
            .unwrap();

        let events = cdc.flush();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, CdcEventKind::Insert);
        assert_eq!(events[1].kind, CdcEventKind::Update);
        assert_eq!(
            events[1].previous.as_ref().unwrap(),
            &TypedObject::String("A".into())
        );
        assert_eq!(events[2].kind, CdcEventKind::Delete);
        assert!(events[2].triple.is_tombstone());
    }

    #[test]
    fn test_fts_search_through_store() {
        let (store, _cdc) = test_store();
        insert(
            &store,
            &eid("docs/1"),
            "title",
            TypedObject::String("Graph databases in production".into()),
        );
        insert(
            &store,
            &eid("docs/2"),
            "title",
            TypedObject::String("Cooking with cast iron".into()),
        );

        let hits = store.search_text("graph", Some("title"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].as_str(), "https://example.com/docs/1");
    }

    #[test]
    fn test_bloom_tracks_subjects() {
        let (store, _cdc) = test_store();
        let alice = eid("people/alice");
        assert!(!store.bloom_might_exist(&alice));
        insert(&store, &alice, "name", TypedObject::String("A".into()));
        assert!(store.bloom_might_exist(&alice));
    }

    #[test]
    fn test_round_trip_all_types() {
        let (store, _cdc) = test_store();
        let subject = eid("things/all");
        let objects = vec![
            ("b", TypedObject::Bool(true)),
            ("i32", TypedObject::Int32(-5)),
            ("i64", TypedObject::Int64(1 << 40)),
            ("f", TypedObject::Float64(2.5)),
            ("s", TypedObject::String("hello".into())),
            ("u", TypedObject::Url("https://example.com/page".into())),
            ("r", TypedObject::Ref(eid("things/other"))),
            ("ts", TypedObject::Timestamp(1_700_000_000_000)),
            ("geo", TypedObject::GeoPoint { lat: 1.5, lng: -2.5 }),
            (
                "ml",
                TypedObject::Monolingual {
                    text: "bonjour".into(),
                    lang: "fr".into(),
                },
            ),
            (
                "q",
                TypedObject::Quantity {
                    value: 3.25,
                    unit: Some("https://units.example.com/kg".into()),
                },
            ),
            ("j", TypedObject::Json(br#"{"k": 1}"#.to_vec())),
            ("bin", TypedObject::Binary(vec![0, 1, 2, 255])),
        ];
        for (pred, obj) in &objects {
            insert(&store, &subject, pred, obj.clone());
        }
        for (pred, obj) in &objects {
            let got = store.get_latest_triple(&subject, pred).unwrap().unwrap();
            assert_eq!(&got.object, obj, "round trip failed for {pred}");
        }
    }

    #[test]
    fn test_vector_index_through_store() {
        let mut config = IndexConfig::default();
        config.embedding_predicates.insert("embedding".into());
        config.metric = DistanceMetric::Euclidean;
        let cdc = Arc::new(CdcBuffer::new(10_000));
        let store = TripleStore::open_in_memory(config, cdc).unwrap();

        for i in 0..10 {
            let triple = Triple::new(
                eid(&format!("vecs/{i}")),
                "embedding",
                TypedObject::Json(format!("[{i}.0, 0.0]").into_bytes()),
                now_ms(),
                TransactionId::generate(),
            );
            store.insert_triple(&triple).unwrap();
        }
        let hits = store.vector_search(&[3.2, 0.0], 2, 50);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.as_str(), "https://example.com/vecs/3");
    }
}
