use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::{EntityId, ObjType};

/// Reverse-reference lookup: every (source, predicate) whose latest value is
/// a live REF to `target`. Backed by the partial OSP index on the triples
/// table.
pub(crate) fn reverse_refs(
    conn: &Connection,
    target: &EntityId,
    predicate: Option<&str>,
    limit: usize,
) -> Result<Vec<(EntityId, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.subject, t.predicate FROM triples t \
         WHERE t.obj_ref = ?1 \
           AND t.obj_type = ?2 \
           AND (?3 IS NULL OR t.predicate = ?3) \
           AND t.id = (SELECT t2.id FROM triples t2 \
                       WHERE t2.subject = t.subject AND t2.predicate = t.predicate \
                       ORDER BY t2.timestamp DESC, t2.tx_id DESC LIMIT 1) \
         ORDER BY t.subject LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(
            params![
                target.as_str(),
                ObjType::Ref.code(),
                predicate,
                limit as i64
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(s, p)| (EntityId::from_trusted(s), p))
        .collect())
}
