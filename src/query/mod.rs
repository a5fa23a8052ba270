pub mod cache;
pub mod exec;
pub mod parse;
pub mod plan;

use std::sync::Arc;

pub use cache::{DEFAULT_PLAN_CACHE_SIZE, PlanCache};
pub use exec::{QueryOptions, QueryResult, QueryStats};
pub use parse::{Node, ParseError, parse_query};
pub use plan::{PlanStep, QueryPlan, plan_query};

use crate::error::Result;
use crate::store::TripleStore;

/// Parses, plans, caches and executes path queries against a shard.
pub struct QueryEngine {
    cache: PlanCache,
}

impl QueryEngine {
    pub fn new(cache_size: usize) -> Self {
        QueryEngine {
            cache: PlanCache::new(cache_size),
        }
    }

    pub fn query(
        &self,
        store: &TripleStore,
        query: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult> {
        let plan = match self.cache.get(query) {
            Some(plan) => plan,
            None => {
                let nodes = parse_query(query)?;
                let plan = Arc::new(plan_query(&nodes)?);
                self.cache.insert(query, plan.clone());
                plan
            }
        };
        exec::execute_plan(store, &plan, opts)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        QueryEngine::new(DEFAULT_PLAN_CACHE_SIZE)
    }
}
