use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::plan::QueryPlan;

pub const DEFAULT_PLAN_CACHE_SIZE: usize = 1000;

struct Slot {
    plan: Arc<QueryPlan>,
    last_used: u64,
}

struct Inner {
    map: HashMap<String, Slot>,
    tick: u64,
    max_size: usize,
}

/// Bounded LRU cache keyed by the raw query string. Retrieval is a single
/// hash lookup; recency is a counter bump, and eviction scans only when the
/// cache is full.
pub struct PlanCache {
    inner: Mutex<Inner>,
}

impl PlanCache {
    pub fn new(max_size: usize) -> Self {
        PlanCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
                max_size: max_size.max(1),
            }),
        }
    }

    pub fn get(&self, query: &str) -> Option<Arc<QueryPlan>> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.get_mut(query).map(|slot| {
            slot.last_used = tick;
            slot.plan.clone()
        })
    }

    pub fn insert(&self, query: &str, plan: Arc<QueryPlan>) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.map.contains_key(query) && inner.map.len() >= inner.max_size {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(
            query.to_string(),
            Slot {
                plan,
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::new(DEFAULT_PLAN_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_plan() -> Arc<QueryPlan> {
        Arc::new(QueryPlan { steps: Vec::new() })
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = PlanCache::new(10);
        assert!(cache.get("a").is_none());
        cache.insert("a", dummy_plan());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = PlanCache::new(2);
        cache.insert("a", dummy_plan());
        cache.insert("b", dummy_plan());
        cache.get("a");
        cache.insert("c", dummy_plan());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let cache = PlanCache::new(2);
        cache.insert("a", dummy_plan());
        cache.insert("a", dummy_plan());
        assert_eq!(cache.len(), 1);
    }
}
