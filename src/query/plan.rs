use crate::error::{GraphError, Result};
use crate::index::CompareOp;
use crate::models::{EntityId, TypedObject};

use super::parse::{FilterValue, Node, Start};

/// A planned probe sequence. Every step narrows or advances the working set
/// of subjects; all probes are index-backed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Point lookup of one entity.
    SeedById(EntityId),
    /// All subjects carrying a predicate (POS probe, value-agnostic).
    SeedByPredicate(String),
    /// Start fused with its own filter: one POS probe seeds the set.
    SeedByFilter {
        predicate: String,
        op: CompareOp,
        value: TypedObject,
    },
    /// Intersect the set with a POS probe.
    FilterIndexed {
        predicate: String,
        op: CompareOp,
        value: TypedObject,
    },
    /// Intersect the set with a reverse-reference (OSP) probe: subjects
    /// whose `predicate` points at `target`.
    FilterReverse {
        predicate: String,
        target: EntityId,
    },
    /// Fused chain of forward hops: follow each predicate's REF in turn.
    FollowPath(Vec<String>),
    /// Restrict returned properties.
    Project(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
}

fn filter_value(value: &FilterValue) -> TypedObject {
    match value {
        FilterValue::Str(s) => TypedObject::String(s.clone()),
        FilterValue::Int(v) => TypedObject::Int64(*v),
        FilterValue::Float(v) => TypedObject::Float64(*v),
    }
}

/// An equality filter against an absolute URL is a reverse traversal in
/// disguise: the OSP probe enumerates exactly the referring subjects.
fn as_reverse_probe(op: CompareOp, value: &FilterValue) -> Option<EntityId> {
    if op != CompareOp::Eq {
        return None;
    }
    match value {
        FilterValue::Str(s) => EntityId::parse(s).ok(),
        _ => None,
    }
}

/// Lower the AST into a plan: fuse the start segment with its own filter,
/// collapse adjacent follows into one path, order same-segment filters so
/// equality probes run first.
pub fn plan_query(nodes: &[Node]) -> Result<QueryPlan> {
    let Some(first) = nodes.first() else {
        return Err(GraphError::Validation("empty query plan".into()));
    };

    let mut steps: Vec<PlanStep> = Vec::with_capacity(nodes.len());
    let mut rest = &nodes[1..];

    match first {
        Node::Start(Start::Id(id)) => steps.push(PlanStep::SeedById(id.clone())),
        Node::Start(Start::Predicate(p)) => {
            // Fuse `p[?p op v]` into a single seeding probe.
            match rest.first() {
                Some(Node::Filter {
                    predicate,
                    op,
                    value,
                }) if predicate == p && as_reverse_probe(*op, value).is_none() => {
                    steps.push(PlanStep::SeedByFilter {
                        predicate: predicate.clone(),
                        op: *op,
                        value: filter_value(value),
                    });
                    rest = &rest[1..];
                }
                _ => steps.push(PlanStep::SeedByPredicate(p.clone())),
            }
        }
        _ => return Err(GraphError::Validation("query must begin with a start segment".into())),
    }

    let mut pending_follows: Vec<String> = Vec::new();
    for node in rest {
        match node {
            Node::Follow(p) => pending_follows.push(p.clone()),
            Node::Filter {
                predicate,
                op,
                value,
            } => {
                if !pending_follows.is_empty() {
                    steps.push(PlanStep::FollowPath(std::mem::take(&mut pending_follows)));
                }
                match as_reverse_probe(*op, value) {
                    Some(target) => steps.push(PlanStep::FilterReverse {
                        predicate: predicate.clone(),
                        target,
                    }),
                    None => steps.push(PlanStep::FilterIndexed {
                        predicate: predicate.clone(),
                        op: *op,
                        value: filter_value(value),
                    }),
                }
            }
            Node::Project(fields) => {
                if !pending_follows.is_empty() {
                    steps.push(PlanStep::FollowPath(std::mem::take(&mut pending_follows)));
                }
                steps.push(PlanStep::Project(fields.clone()));
            }
            Node::Start(_) => {
                return Err(GraphError::Validation(
                    "start segment in query tail".into(),
                ));
            }
        }
    }
    if !pending_follows.is_empty() {
        steps.push(PlanStep::FollowPath(pending_follows));
    }

    // Equality filters are the most selective; run them before range
    // filters within each run of consecutive filter steps.
    order_filter_runs(&mut steps);

    Ok(QueryPlan { steps })
}

fn order_filter_runs(steps: &mut [PlanStep]) {
    fn selectivity(step: &PlanStep) -> u8 {
        match step {
            PlanStep::FilterReverse { .. } => 0,
            PlanStep::FilterIndexed { op: CompareOp::Eq, .. } => 1,
            PlanStep::FilterIndexed { .. } => 2,
            _ => 3,
        }
    }

    let mut i = 0;
    while i < steps.len() {
        if selectivity(&steps[i]) < 3 {
            let mut j = i;
            while j < steps.len() && selectivity(&steps[j]) < 3 {
                j += 1;
            }
            steps[i..j].sort_by_key(selectivity);
            i = j;
        } else {
            i += 1;
        }
    }
}
