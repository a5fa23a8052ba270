use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::index::CompareOp;
use crate::models::{Entity, EntityId, TransactionId, TypedObject};
use crate::query::{QueryEngine, QueryOptions, QueryResult};
use crate::store::{TripleStore, now_ms};

/// Transport-agnostic client surface over one shard: entity CRUD,
/// traversals, path queries and batch operations. The RPC router binds
/// these one-to-one.
pub struct GraphApi {
    store: Arc<TripleStore>,
    engine: QueryEngine,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraversalOptions {
    pub max_depth: Option<usize>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub filter: Option<TraversalFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraversalFilter {
    pub predicate: String,
    pub op: CompareOp,
    pub value: serde_json::Value,
}

/// Per-index outcome of a batch call, so partial failures stay observable.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchOutcome<T> {
    Ok { value: T },
    Err { code: String, error: String },
}

#[derive(Debug, Serialize)]
pub struct BatchResult<T> {
    pub results: Vec<BatchOutcome<T>>,
}

impl<T> BatchResult<T> {
    fn collect(items: impl IntoIterator<Item = Result<T>>) -> Self {
        BatchResult {
            results: items
                .into_iter()
                .map(|r| match r {
                    Ok(value) => BatchOutcome::Ok { value },
                    Err(e) => BatchOutcome::Err {
                        code: e.wire_code().to_string(),
                        error: e.to_string(),
                    },
                })
                .collect(),
        }
    }
}

/// One operation inside `batch_execute`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Get { id: String },
    Create { entity: Entity },
    Update { id: String, props: BTreeMap<String, TypedObject> },
    Delete { id: String },
}

/// Retry-policy classification for the RPC surface. `batch_execute` is
/// conservatively non-idempotent even when it only contains reads.
pub fn is_idempotent(method: &str) -> bool {
    matches!(
        method,
        "get_entity"
            | "traverse"
            | "reverse_traverse"
            | "path_traverse"
            | "query"
            | "batch_get"
    )
}

const DEFAULT_TRAVERSAL_LIMIT: usize = 100;

impl GraphApi {
    pub fn new(store: Arc<TripleStore>, plan_cache_size: usize) -> Self {
        GraphApi {
            store,
            engine: QueryEngine::new(plan_cache_size),
        }
    }

    // ── Entity CRUD ──

    /// Missing entities read as None, not as an error.
    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.store.get_entity(id)
    }

    /// Fails with `Conflict` when the entity already has live properties.
    pub fn create_entity(&self, entity: &Entity) -> Result<()> {
        if self.store.subject_exists(&entity.id)? {
            return Err(GraphError::Conflict(format!(
                "entity {} already exists",
                entity.id
            )));
        }
        let tx_id = TransactionId::generate();
        let timestamp = now_ms();
        let triples: Vec<_> = entity
            .properties
            .iter()
            .filter(|(predicate, _)| predicate.as_str() != "$id")
            .map(|(predicate, object)| {
                crate::models::Triple::new(
                    entity.id.clone(),
                    predicate.clone(),
                    object.clone(),
                    timestamp,
                    tx_id.clone(),
                )
            })
            .collect();
        if triples.is_empty() {
            return Err(GraphError::Validation(format!(
                "entity {} has no properties",
                entity.id
            )));
        }
        self.store.batch_insert_triples(&triples)
    }

    /// Upserts each given property on an existing entity.
    pub fn update_entity(
        &self,
        id: &EntityId,
        props: &BTreeMap<String, TypedObject>,
    ) -> Result<()> {
        if !self.store.subject_exists(id)? {
            return Err(GraphError::NotFound(format!("entity {id}")));
        }
        for (predicate, object) in props {
            if predicate == "$id" {
                continue;
            }
            let tx_id = TransactionId::generate();
            match self.store.get_latest_triple(id, predicate)? {
                Some(_) => {
                    self.store
                        .update_triple(id, predicate, object.clone(), tx_id)?;
                }
                None => {
                    self.store.insert_triple(&crate::models::Triple::new(
                        id.clone(),
                        predicate.clone(),
                        object.clone(),
                        now_ms(),
                        tx_id,
                    ))?;
                }
            }
        }
        Ok(())
    }

    /// Tombstones every live property. Idempotent: deleting a missing
    /// entity is a no-op.
    pub fn delete_entity(&self, id: &EntityId) -> Result<()> {
        let Some(entity) = self.store.get_entity(id)? else {
            return Ok(());
        };
        for predicate in entity.properties.keys() {
            self.store
                .delete_triple(id, predicate, TransactionId::generate())?;
        }
        Ok(())
    }

    // ── Traversals ──

    /// Breadth-first walk along one predicate, up to `max_depth` hops
    /// (default 1). Returns the entities reached, nearest hops first.
    pub fn traverse(
        &self,
        start: &EntityId,
        predicate: &str,
        opts: &TraversalOptions,
    ) -> Result<Vec<Entity>> {
        let max_depth = opts.max_depth.unwrap_or(1).max(1);
        let limit = opts.limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT);

        let mut frontier = vec![start.clone()];
        let mut seen = std::collections::BTreeSet::new();
        let mut reached: Vec<EntityId> = Vec::new();
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for subject in &frontier {
                if let Some(triple) = self.store.get_latest_triple(subject, predicate)? {
                    if let TypedObject::Ref(target) = triple.object {
                        if seen.insert(target.clone()) {
                            reached.push(target.clone());
                            next.push(target);
                        }
                    }
                }
            }
            if next.is_empty() || reached.len() >= limit {
                break;
            }
            frontier = next;
        }
        reached.truncate(limit);
        self.materialize(reached, opts)
    }

    /// Every entity whose `predicate` points at `target` (OSP probe).
    pub fn reverse_traverse(
        &self,
        target: &EntityId,
        predicate: &str,
        opts: &TraversalOptions,
    ) -> Result<Vec<Entity>> {
        let limit = opts.limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT);
        let sources: Vec<EntityId> = self
            .store
            .reverse_refs(target, Some(predicate), limit)?
            .into_iter()
            .map(|(source, _)| source)
            .collect();
        self.materialize(sources, opts)
    }

    /// Follow a fixed predicate path from one start entity.
    pub fn path_traverse(
        &self,
        start: &EntityId,
        path: &[String],
        opts: &TraversalOptions,
    ) -> Result<Vec<Entity>> {
        let mut current = vec![start.clone()];
        for predicate in path {
            let mut next = Vec::new();
            for subject in &current {
                if let Some(triple) = self.store.get_latest_triple(subject, predicate)? {
                    if let TypedObject::Ref(target) = triple.object {
                        next.push(target);
                    }
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current.truncate(opts.limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT));
        self.materialize(current, opts)
    }

    fn materialize(&self, ids: Vec<EntityId>, opts: &TraversalOptions) -> Result<Vec<Entity>> {
        let filter_value = opts
            .filter
            .as_ref()
            .map(|f| json_to_object(&f.value))
            .transpose()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entity) = self.store.get_entity(&id)? else {
                continue;
            };
            if let (Some(filter), Some(value)) = (&opts.filter, &filter_value) {
                let matching = self
                    .store
                    .find_subjects(&filter.predicate, filter.op, value, usize::MAX >> 1)?;
                if !matching.contains(&id) {
                    continue;
                }
            }
            out.push(entity);
        }
        Ok(out)
    }

    // ── Queries ──

    pub fn query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult> {
        self.engine.query(&self.store, query, opts)
    }

    // ── Batches ──

    pub fn batch_get(&self, ids: &[String]) -> BatchResult<Option<Entity>> {
        BatchResult::collect(
            ids.iter()
                .map(|raw| EntityId::parse(raw).and_then(|id| self.get_entity(&id))),
        )
    }

    pub fn batch_create(&self, entities: &[Entity]) -> BatchResult<()> {
        BatchResult::collect(entities.iter().map(|e| self.create_entity(e)))
    }

    pub fn batch_execute(&self, ops: &[BatchOp]) -> BatchResult<serde_json::Value> {
        BatchResult::collect(ops.iter().map(|op| self.execute_op(op)))
    }

    fn execute_op(&self, op: &BatchOp) -> Result<serde_json::Value> {
        match op {
            BatchOp::Get { id } => {
                let entity = self.get_entity(&EntityId::parse(id)?)?;
                Ok(serde_json::to_value(entity)?)
            }
            BatchOp::Create { entity } => {
                self.create_entity(entity)?;
                Ok(serde_json::Value::Null)
            }
            BatchOp::Update { id, props } => {
                self.update_entity(&EntityId::parse(id)?, props)?;
                Ok(serde_json::Value::Null)
            }
            BatchOp::Delete { id } => {
                self.delete_entity(&EntityId::parse(id)?)?;
                Ok(serde_json::Value::Null)
            }
        }
    }
}

fn json_to_object(value: &serde_json::Value) -> Result<TypedObject> {
    match value {
        serde_json::Value::Null => Ok(TypedObject::Null),
        serde_json::Value::Bool(b) => Ok(TypedObject::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(TypedObject::Int64(i))
            } else {
                Ok(TypedObject::Float64(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Ok(TypedObject::String(s.clone())),
        other => Err(GraphError::Validation(format!(
            "filter value {other} is not a scalar"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::CdcBuffer;
    use crate::index::IndexConfig;

    fn eid(path: &str) -> EntityId {
        EntityId::parse(&format!("https://example.com/{path}")).unwrap()
    }

    fn api() -> GraphApi {
        let store = Arc::new(
            TripleStore::open_in_memory(IndexConfig::default(), Arc::new(CdcBuffer::new(100_000)))
                .unwrap(),
        );
        GraphApi::new(store, 100)
    }

    fn person(api: &GraphApi, name: &str, knows: Option<&EntityId>) -> EntityId {
        let id = eid(&format!("people/{name}"));
        let mut entity = Entity::new(id.clone());
        entity
            .properties
            .insert("name".into(), TypedObject::String(name.into()));
        if let Some(target) = knows {
            entity
                .properties
                .insert("knows".into(), TypedObject::Ref(target.clone()));
        }
        api.create_entity(&entity).unwrap();
        id
    }

    #[test]
    fn test_create_then_get() {
        let api = api();
        let alice = person(&api, "alice", None);
        let got = api.get_entity(&alice).unwrap().unwrap();
        assert_eq!(got.properties["name"], TypedObject::String("alice".into()));
        assert!(api.get_entity(&eid("people/missing")).unwrap().is_none());
    }

    #[test]
    fn test_create_duplicate_is_conflict() {
        let api = api();
        person(&api, "alice", None);
        let mut dup = Entity::new(eid("people/alice"));
        dup.properties
            .insert("name".into(), TypedObject::String("alice2".into()));
        assert!(matches!(
            api.create_entity(&dup),
            Err(GraphError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let api = api();
        let mut props = BTreeMap::new();
        props.insert("name".into(), TypedObject::String("x".into()));
        assert!(matches!(
            api.update_entity(&eid("people/ghost"), &props),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_entity_removes_all_properties() {
        let api = api();
        let alice = person(&api, "alice", None);
        api.delete_entity(&alice).unwrap();
        assert!(api.get_entity(&alice).unwrap().is_none());
        // Idempotent.
        api.delete_entity(&alice).unwrap();
    }

    #[test]
    fn test_traverse_multi_hop() {
        let api = api();
        let carol = person(&api, "carol", None);
        let bob = person(&api, "bob", Some(&carol));
        let alice = person(&api, "alice", Some(&bob));

        let one_hop = api
            .traverse(&alice, "knows", &TraversalOptions::default())
            .unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].id, bob);

        let two_hops = api
            .traverse(
                &alice,
                "knows",
                &TraversalOptions {
                    max_depth: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(two_hops.len(), 2);
        assert_eq!(two_hops[1].id, carol);
    }

    #[test]
    fn test_reverse_traverse() {
        let api = api();
        let p2 = person(&api, "p2", None);
        let p1 = person(&api, "p1", Some(&p2));
        let p3 = person(&api, "p3", Some(&p2));

        let referrers = api
            .reverse_traverse(&p2, "knows", &TraversalOptions::default())
            .unwrap();
        let ids: Vec<&EntityId> = referrers.iter().map(|e| &e.id).collect();
        assert!(ids.contains(&&p1));
        assert!(ids.contains(&&p3));
    }

    #[test]
    fn test_path_traverse() {
        let api = api();
        let org = person(&api, "org-acme", None);
        let bob = {
            let id = eid("people/bob");
            let mut e = Entity::new(id.clone());
            e.properties
                .insert("employer".into(), TypedObject::Ref(org.clone()));
            api.create_entity(&e).unwrap();
            id
        };
        let alice = person(&api, "alice", Some(&bob));

        let reached = api
            .path_traverse(
                &alice,
                &["knows".into(), "employer".into()],
                &TraversalOptions::default(),
            )
            .unwrap();
        assert_eq!(reached.len(), 1);
        assert_eq!(reached[0].id, org);
    }

    #[test]
    fn test_batch_results_are_per_index() {
        let api = api();
        person(&api, "alice", None);
        let result = api.batch_get(&[
            "https://example.com/people/alice".to_string(),
            "not-a-url".to_string(),
        ]);
        assert!(matches!(result.results[0], BatchOutcome::Ok { .. }));
        assert!(matches!(
            &result.results[1],
            BatchOutcome::Err { code, .. } if code == "validation"
        ));
    }

    #[test]
    fn test_idempotency_classification() {
        for method in ["get_entity", "traverse", "query", "batch_get"] {
            assert!(is_idempotent(method), "{method}");
        }
        for method in ["create_entity", "update_entity", "delete_entity", "batch_execute"] {
            assert!(!is_idempotent(method), "{method}");
        }
    }
}
