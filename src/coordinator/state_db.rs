use rusqlite::{Connection, params};
use std::sync::Mutex;

/// Durable coordinator state: the per-shard acknowledged sequence map and
/// flush counters. Survives restarts so recovery can take
/// `max(persisted, register-declared)`.
pub struct CoordinatorDb {
    conn: Mutex<Connection>,
}

impl CoordinatorDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        let db = CoordinatorDb {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS shard_sequences (
                shard_id      TEXT PRIMARY KEY,
                namespace     TEXT NOT NULL,
                last_sequence INTEGER NOT NULL DEFAULT 0,
                updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS flush_counters (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    pub fn last_sequence(&self, shard_id: &str) -> anyhow::Result<Option<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT last_sequence FROM shard_sequences WHERE shard_id = ?1")?;
        let mut rows = stmt.query_map(params![shard_id], |row| row.get::<_, i64>(0))?;
        Ok(rows.next().transpose()?.map(|v| v as u64))
    }

    pub fn set_last_sequence(
        &self,
        shard_id: &str,
        namespace: &str,
        sequence: u64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO shard_sequences (shard_id, namespace, last_sequence) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(shard_id) DO UPDATE SET namespace = ?2, last_sequence = ?3, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![shard_id, namespace, sequence as i64],
        )?;
        Ok(())
    }

    pub fn list_shards(&self) -> anyhow::Result<Vec<(String, String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT shard_id, namespace, last_sequence FROM shard_sequences ORDER BY shard_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_counter(&self, key: &str, delta: u64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO flush_counters (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = value + ?2",
            params![key, delta as i64],
        )?;
        Ok(())
    }

    pub fn counter(&self, key: &str) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT value FROM flush_counters WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, i64>(0))?;
        Ok(rows.next().transpose()?.map(|v| v as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_round_trip() {
        let db = CoordinatorDb::open_in_memory().unwrap();
        assert_eq!(db.last_sequence("s1").unwrap(), None);
        db.set_last_sequence("s1", "https://example.com/people", 42)
            .unwrap();
        assert_eq!(db.last_sequence("s1").unwrap(), Some(42));
        db.set_last_sequence("s1", "https://example.com/people", 99)
            .unwrap();
        assert_eq!(db.last_sequence("s1").unwrap(), Some(99));
    }

    #[test]
    fn test_counters_accumulate() {
        let db = CoordinatorDb::open_in_memory().unwrap();
        db.add_counter("events_flushed", 10).unwrap();
        db.add_counter("events_flushed", 5).unwrap();
        assert_eq!(db.counter("events_flushed").unwrap(), 15);
        assert_eq!(db.counter("missing").unwrap(), 0);
    }
}
