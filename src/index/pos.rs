use rusqlite::{Connection, ToSql, params};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::models::{EntityId, ObjType, TypedObject};

/// Comparison operators supported by predicate-value probes and query
/// filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn is_ordered(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql())
    }
}

/// Case-canonical form used for exact-match string comparisons.
pub fn normalize_string(s: &str) -> String {
    s.to_lowercase()
}

/// The value column and bound parameter for a comparison against the given
/// object. Strings compare against the normalized column so exact matches
/// are case-insensitive; numbers sort as numbers.
fn value_binding(value: &TypedObject, op: CompareOp) -> Result<(&'static str, Box<dyn ToSql>)> {
    match value {
        TypedObject::String(s) | TypedObject::Url(s) => {
            Ok(("obj_norm", Box::new(normalize_string(s))))
        }
        TypedObject::Monolingual { text, .. } => Ok(("obj_norm", Box::new(normalize_string(text)))),
        TypedObject::Int32(v) => Ok(("obj_int64", Box::new(*v as i64))),
        TypedObject::Int64(v) => Ok(("obj_int64", Box::new(*v))),
        TypedObject::Float64(v) => Ok(("obj_float64", Box::new(*v))),
        TypedObject::Quantity { value, .. } => Ok(("obj_float64", Box::new(*value))),
        TypedObject::Timestamp(v) => Ok(("obj_timestamp", Box::new(*v))),
        TypedObject::Bool(v) => {
            if op.is_ordered() {
                return Err(GraphError::Validation(
                    "ordered comparison on bool value".into(),
                ));
            }
            Ok(("obj_bool", Box::new(*v)))
        }
        TypedObject::Ref(id) => {
            if op.is_ordered() {
                return Err(GraphError::Validation(
                    "ordered comparison on ref value".into(),
                ));
            }
            Ok(("obj_ref", Box::new(id.as_str().to_string())))
        }
        other => Err(GraphError::Validation(format!(
            "type {:?} is not comparable",
            other.obj_type()
        ))),
    }
}

/// Find subjects whose latest value for `predicate` satisfies
/// `op value`. Latest-wins is enforced per (subject, predicate) so
/// overwritten and tombstoned values never match.
pub(crate) fn find_subjects(
    conn: &Connection,
    predicate: &str,
    op: CompareOp,
    value: &TypedObject,
    limit: usize,
) -> Result<Vec<EntityId>> {
    let (column, bound) = value_binding(value, op)?;
    let sql = format!(
        "SELECT t.subject FROM triples t \
         WHERE t.predicate = ?1 \
           AND t.obj_type = ?2 \
           AND t.{column} {} ?3 \
           AND t.id = (SELECT t2.id FROM triples t2 \
                       WHERE t2.subject = t.subject AND t2.predicate = t.predicate \
                       ORDER BY t2.timestamp DESC, t2.tx_id DESC LIMIT 1) \
         ORDER BY t.subject LIMIT ?4",
        op.sql()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let code = value.obj_type().code();
    let limit = limit as i64;
    let bound_params: [&dyn ToSql; 4] = [&predicate, &code, bound.as_ref(), &limit];
    let rows = stmt
        .query_map(&bound_params[..], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(EntityId::from_trusted).collect())
}

/// Find subjects whose latest triple for `predicate` is live, regardless of
/// value. Used by `Start(predicate)` query roots.
pub(crate) fn subjects_with_predicate(
    conn: &Connection,
    predicate: &str,
    limit: usize,
) -> Result<Vec<EntityId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.subject FROM triples t \
         WHERE t.predicate = ?1 \
           AND t.obj_type != 0 \
           AND t.id = (SELECT t2.id FROM triples t2 \
                       WHERE t2.subject = t.subject AND t2.predicate = t.predicate \
                       ORDER BY t2.timestamp DESC, t2.tx_id DESC LIMIT 1) \
         ORDER BY t.subject LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![predicate, limit as i64], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(EntityId::from_trusted).collect())
}
