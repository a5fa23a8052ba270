use std::collections::BTreeSet;
use std::time::Instant;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::models::{Entity, EntityId, TypedObject};
use crate::store::TripleStore;

use super::plan::{PlanStep, QueryPlan};

/// Upper bound on intermediate candidate sets; keeps a single query from
/// materializing the whole shard.
const MAX_CANDIDATES: usize = 10_000;
const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub shard_queries: u64,
    pub entities_scanned: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub entities: Vec<Entity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
    pub stats: QueryStats,
}

fn encode_cursor(subject: &EntityId) -> String {
    BASE64.encode(subject.as_str().as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<String> {
    let bytes = BASE64
        .decode(cursor.as_bytes())
        .map_err(|e| GraphError::Validation(format!("invalid cursor: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GraphError::Validation(format!("invalid cursor: {e}")))
}

/// Run a plan against one shard. The working set stays sorted so results
/// are deterministic for a given plan and database state.
pub fn execute_plan(
    store: &TripleStore,
    plan: &QueryPlan,
    opts: &QueryOptions,
) -> Result<QueryResult> {
    let started = Instant::now();
    let mut stats = QueryStats::default();
    let mut subjects: BTreeSet<EntityId> = BTreeSet::new();
    let mut projection: Option<Vec<String>> = None;

    for step in &plan.steps {
        match step {
            PlanStep::SeedById(id) => {
                subjects.insert(id.clone());
            }
            PlanStep::SeedByPredicate(predicate) => {
                stats.shard_queries += 1;
                subjects = store
                    .subjects_with_predicate(predicate, MAX_CANDIDATES)?
                    .into_iter()
                    .collect();
            }
            PlanStep::SeedByFilter {
                predicate,
                op,
                value,
            } => {
                stats.shard_queries += 1;
                subjects = store
                    .find_subjects(predicate, *op, value, MAX_CANDIDATES)?
                    .into_iter()
                    .collect();
            }
            PlanStep::FilterIndexed {
                predicate,
                op,
                value,
            } => {
                stats.shard_queries += 1;
                let matching: BTreeSet<EntityId> = store
                    .find_subjects(predicate, *op, value, MAX_CANDIDATES)?
                    .into_iter()
                    .collect();
                subjects.retain(|s| matching.contains(s));
            }
            PlanStep::FilterReverse { predicate, target } => {
                stats.shard_queries += 1;
                let referrers: BTreeSet<EntityId> = store
                    .reverse_refs(target, Some(predicate), MAX_CANDIDATES)?
                    .into_iter()
                    .map(|(s, _)| s)
                    .collect();
                subjects.retain(|s| referrers.contains(s));
            }
            PlanStep::FollowPath(path) => {
                for predicate in path {
                    let mut next = BTreeSet::new();
                    for subject in &subjects {
                        stats.shard_queries += 1;
                        if let Some(triple) = store.get_latest_triple(subject, predicate)? {
                            if let TypedObject::Ref(target) = triple.object {
                                next.insert(target);
                            }
                        }
                    }
                    subjects = next;
                    if subjects.is_empty() {
                        break;
                    }
                }
            }
            PlanStep::Project(fields) => {
                projection = Some(fields.clone());
            }
        }
    }

    // Cursor pagination over the sorted subject set.
    let after = opts.cursor.as_deref().map(decode_cursor).transpose()?;
    let limit = opts.limit.unwrap_or(DEFAULT_LIMIT).max(1);

    let mut page: Vec<EntityId> = subjects
        .into_iter()
        .filter(|s| after.as_deref().is_none_or(|a| s.as_str() > a))
        .take(limit + 1)
        .collect();
    let has_more = page.len() > limit;
    page.truncate(limit);

    let mut entities = Vec::with_capacity(page.len());
    for subject in &page {
        stats.entities_scanned += 1;
        let Some(mut entity) = store.get_entity(subject)? else {
            continue;
        };
        if let Some(fields) = &projection {
            entity.properties.retain(|k, _| fields.contains(k));
        }
        entities.push(entity);
    }

    let cursor = if has_more {
        page.last().map(encode_cursor)
    } else {
        None
    };
    stats.duration_ms = started.elapsed().as_millis() as u64;

    Ok(QueryResult {
        entities,
        cursor,
        has_more,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cdc::CdcBuffer;
    use crate::index::IndexConfig;
    use crate::models::{TransactionId, Triple};
    use crate::query::QueryEngine;
    use crate::store::now_ms;

    fn eid(path: &str) -> EntityId {
        EntityId::parse(&format!("https://example.com/{path}")).unwrap()
    }

    fn seeded_store() -> TripleStore {
        let store = TripleStore::open_in_memory(
            IndexConfig::default(),
            Arc::new(CdcBuffer::new(100_000)),
        )
        .unwrap();
        let acme = eid("orgs/acme");
        for (name, age, employer) in [
            ("alice", 34i64, Some(&acme)),
            ("bob", 19, Some(&acme)),
            ("carol", 45, None),
        ] {
            let subject = eid(&format!("people/{name}"));
            for (pred, obj) in [
                ("name", TypedObject::String(name.to_string())),
                ("age", TypedObject::Int64(age)),
            ] {
                store
                    .insert_triple(&Triple::new(
                        subject.clone(),
                        pred,
                        obj,
                        now_ms(),
                        TransactionId::generate(),
                    ))
                    .unwrap();
            }
            if let Some(org) = employer {
                store
                    .insert_triple(&Triple::new(
                        subject.clone(),
                        "employer",
                        TypedObject::Ref(org.clone()),
                        now_ms(),
                        TransactionId::generate(),
                    ))
                    .unwrap();
            }
        }
        store
            .insert_triple(&Triple::new(
                acme,
                "name",
                TypedObject::String("Acme".into()),
                now_ms(),
                TransactionId::generate(),
            ))
            .unwrap();
        store
    }

    #[test]
    fn test_point_lookup() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        let result = engine
            .query(&store, "https://example.com/people/alice", &QueryOptions::default())
            .unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(
            result.entities[0].properties["name"],
            TypedObject::String("alice".into())
        );
        assert!(!result.has_more);
    }

    #[test]
    fn test_filter_and_follow() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        let result = engine
            .query(&store, "age[?age >= 21].employer", &QueryOptions::default())
            .unwrap();
        // alice (34) and carol (45) pass the filter; only alice has an
        // employer edge to follow.
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].id.as_str(), "https://example.com/orgs/acme");
        assert!(result.stats.shard_queries > 0);
    }

    #[test]
    fn test_reverse_probe_filter() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        let result = engine
            .query(
                &store,
                "name[?employer = \"https://example.com/orgs/acme\"]",
                &QueryOptions::default(),
            )
            .unwrap();
        let ids: Vec<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "https://example.com/people/alice",
                "https://example.com/people/bob"
            ]
        );
    }

    #[test]
    fn test_projection_restricts_properties() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        let result = engine
            .query(&store, "name{name}", &QueryOptions::default())
            .unwrap();
        for entity in &result.entities {
            assert!(entity.properties.keys().all(|k| k == "name"));
        }
    }

    #[test]
    fn test_cursor_pagination_is_exhaustive_and_stable() {
        let store = seeded_store();
        let engine = QueryEngine::default();

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let result = engine
                .query(
                    &store,
                    "name",
                    &QueryOptions {
                        limit: Some(2),
                        cursor: cursor.clone(),
                    },
                )
                .unwrap();
            seen.extend(result.entities.iter().map(|e| e.id.as_str().to_string()));
            if !result.has_more {
                break;
            }
            cursor = result.cursor;
        }
        assert_eq!(seen.len(), 4);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[test]
    fn test_invalid_cursor_is_validation_error() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        let err = engine
            .query(
                &store,
                "name",
                &QueryOptions {
                    limit: None,
                    cursor: Some("***".into()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_plan_cache_reuse() {
        let store = seeded_store();
        let engine = QueryEngine::default();
        engine.query(&store, "name", &QueryOptions::default()).unwrap();
        assert_eq!(engine.cache_len(), 1);
        engine.query(&store, "name", &QueryOptions::default()).unwrap();
        assert_eq!(engine.cache_len(), 1);
    }
}
