pub mod fts;
pub mod geo;
pub mod hnsw;
pub mod osp;
pub mod pos;

use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub use geo::GeoMatch;
pub use hnsw::{DistanceMetric, HnswConfig, HnswIndex};
pub use pos::CompareOp;

use crate::bloom::BloomFilter;
use crate::error::{GraphError, Result};
use crate::models::{EntityId, ObjType, Triple, TypedObject};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Geohash cell precision for stored points.
    pub geohash_precision: usize,
    /// Predicates whose JSON values are embedding vectors.
    pub embedding_predicates: HashSet<String>,
    pub hnsw: HnswConfig,
    pub metric: DistanceMetric,
    pub bloom_capacity: u32,
    pub bloom_target_fpr: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            geohash_precision: geo::DEFAULT_GEOHASH_PRECISION,
            embedding_predicates: HashSet::new(),
            hnsw: HnswConfig::default(),
            metric: DistanceMetric::Cosine,
            bloom_capacity: 100_000,
            bloom_target_fpr: 0.01,
        }
    }
}

/// The single capability boundary between the triple store and its secondary
/// indexes. The store invokes these inside the write transaction; a hook
/// error rolls the whole write back.
pub trait IndexHooks {
    fn on_insert(&mut self, conn: &Connection, triple: &Triple) -> Result<()>;
    fn on_update(&mut self, conn: &Connection, old: &Triple, new: &Triple) -> Result<()>;
    fn on_delete(&mut self, conn: &Connection, triple: &Triple) -> Result<()>;

    /// Batch paths must leave the same final state as the scalar hooks
    /// applied in order.
    fn on_batch_insert(&mut self, conn: &Connection, triples: &[Triple]) -> Result<()> {
        for t in triples {
            self.on_insert(conn, t)?;
        }
        Ok(())
    }

    fn on_batch_delete(&mut self, conn: &Connection, triples: &[Triple]) -> Result<()> {
        for t in triples {
            self.on_delete(conn, t)?;
        }
        Ok(())
    }
}

/// Keeps the FTS, geo, vector and bloom structures in sync with the triples
/// table. POS and OSP probes ride the table's own SQL indexes and need no
/// hook-side state.
pub struct IndexMaintainer {
    config: IndexConfig,
    hnsw: HnswIndex,
    bloom: BloomFilter,
}

impl IndexMaintainer {
    pub fn new(config: IndexConfig) -> Self {
        let hnsw = HnswIndex::new(config.hnsw, config.metric);
        let bloom = BloomFilter::new(config.bloom_capacity, config.bloom_target_fpr);
        IndexMaintainer {
            config,
            hnsw,
            bloom,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn is_embedding(&self, predicate: &str) -> bool {
        self.config.embedding_predicates.contains(predicate)
    }

    fn embedding_vector(triple: &Triple) -> Result<Vec<f32>> {
        match &triple.object {
            TypedObject::Json(bytes) => {
                let values: Vec<f64> = serde_json::from_slice(bytes).map_err(|e| {
                    GraphError::Validation(format!(
                        "embedding for {} must be a JSON number array: {e}",
                        triple.predicate
                    ))
                })?;
                Ok(values.into_iter().map(|v| v as f32).collect())
            }
            other => Err(GraphError::Validation(format!(
                "embedding predicate {} carries {:?}, expected JSON",
                triple.predicate,
                other.obj_type()
            ))),
        }
    }

    fn apply_entries(&mut self, conn: &Connection, t: &Triple) -> Result<()> {
        match &t.object {
            TypedObject::String(s) => fts::upsert_document(conn, &t.subject, &t.predicate, s)?,
            TypedObject::Monolingual { text, .. } => {
                fts::upsert_document(conn, &t.subject, &t.predicate, text)?;
            }
            TypedObject::GeoPoint { lat, lng } => {
                geo::upsert_point(
                    conn,
                    &t.subject,
                    &t.predicate,
                    *lat,
                    *lng,
                    self.config.geohash_precision,
                )?;
            }
            TypedObject::Json(_) if self.is_embedding(&t.predicate) => {
                let vector = Self::embedding_vector(t)?;
                self.hnsw.insert(t.subject.clone(), vector)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn remove_entries(&mut self, conn: &Connection, t: &Triple) -> Result<()> {
        match &t.object {
            TypedObject::String(_) | TypedObject::Monolingual { .. } => {
                fts::delete_document(conn, &t.subject, &t.predicate)?;
            }
            TypedObject::GeoPoint { .. } => {
                geo::delete_point(conn, &t.subject, &t.predicate)?;
            }
            TypedObject::Json(_) if self.is_embedding(&t.predicate) => {
                self.hnsw.remove(&t.subject);
            }
            _ => {}
        }
        Ok(())
    }

    /// True when the subject still has at least one live (non-tombstone)
    /// latest value. Runs inside the write transaction, so an appended
    /// tombstone is already visible.
    fn subject_is_live(conn: &Connection, subject: &EntityId) -> Result<bool> {
        let mut stmt = conn.prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM triples t \
             WHERE t.subject = ?1 AND t.obj_type != ?2 \
               AND t.id = (SELECT t2.id FROM triples t2 \
                           WHERE t2.subject = t.subject AND t2.predicate = t.predicate \
                           ORDER BY t2.timestamp DESC, t2.tx_id DESC LIMIT 1))",
        )?;
        let live: bool =
            stmt.query_row(rusqlite::params![subject.as_str(), ObjType::Null.code()], |row| {
                row.get(0)
            })?;
        Ok(live)
    }

    // ── Read-side access used by the query layer ──

    pub fn search_text(
        &self,
        conn: &Connection,
        query: &str,
        predicate: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EntityId>> {
        fts::search(conn, query, predicate, limit)
    }

    pub fn geo_bbox(
        &self,
        conn: &Connection,
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>> {
        geo::bbox(conn, min_lat, min_lng, max_lat, max_lng, limit)
    }

    pub fn geo_radius(
        &self,
        conn: &Connection,
        center_lat: f64,
        center_lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoMatch>> {
        geo::radius(
            conn,
            center_lat,
            center_lng,
            radius_km,
            self.config.geohash_precision,
            limit,
        )
    }

    pub fn vector_search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(EntityId, f64)> {
        self.hnsw.search(query, k, ef)
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    // ── Rebuild support (indexes are reconstructable from the store) ──

    pub(crate) fn restore_bloom(&mut self, bloom: BloomFilter) {
        self.bloom = bloom;
    }

    pub(crate) fn bloom_add(&mut self, subject: &EntityId) {
        self.bloom.add(subject.as_str().as_bytes());
    }

    pub(crate) fn hnsw_insert(&mut self, subject: EntityId, vector: Vec<f32>) -> Result<()> {
        self.hnsw.insert(subject, vector)
    }
}

impl IndexHooks for IndexMaintainer {
    fn on_insert(&mut self, conn: &Connection, triple: &Triple) -> Result<()> {
        self.apply_entries(conn, triple)?;
        let key = triple.subject.as_str().as_bytes();
        if !self.bloom.might_exist(key) {
            self.bloom.add(key);
        }
        Ok(())
    }

    fn on_update(&mut self, conn: &Connection, old: &Triple, new: &Triple) -> Result<()> {
        // When the type changes both the source and destination index are
        // touched; same-type updates decay to a replace.
        self.remove_entries(conn, old)?;
        self.apply_entries(conn, new)
    }

    fn on_delete(&mut self, conn: &Connection, triple: &Triple) -> Result<()> {
        self.remove_entries(conn, triple)?;
        if !Self::subject_is_live(conn, &triple.subject)? {
            self.bloom.decrement_count();
        }
        Ok(())
    }
}
