//! Dead-letter records.
//!
//! A record lands here after emission exhausts its retries or backpressure
//! exceeds its limit. Rows are preserved for manual inspection and replay,
//! never silently discarded.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::emit::EmitRecord;
use crate::storage::Pool;

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub identity: String,
    pub granularity: String,
    pub window_start: DateTime<Utc>,
    pub value: f64,
    pub payload_json: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Set a failed record aside.
pub fn record(pool: &Pool, rec: &EmitRecord, reason: &str) -> Result<Uuid> {
    let conn = pool.get()?;
    let id = Uuid::new_v4();
    let payload = serde_json::to_string(rec)?;

    conn.execute(
        "INSERT INTO dead_letters (id, identity, granularity, window_start, value, payload_json, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.to_string(),
            rec.identity,
            rec.granularity.to_string(),
            rec.window_start.to_rfc3339(),
            rec.value,
            payload,
            reason
        ],
    )?;

    Ok(id)
}

/// Most recent dead letters, newest first.
pub fn list_recent(pool: &Pool, limit: usize) -> Result<Vec<DeadLetter>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, identity, granularity, window_start, value, payload_json, reason, created_at
         FROM dead_letters ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        let id_str: String = row.get(0)?;
        let window_start: String = row.get(3)?;
        let created_at: String = row.get(7)?;
        Ok(DeadLetter {
            id: Uuid::parse_str(&id_str).unwrap_or_default(),
            identity: row.get(1)?,
            granularity: row.get(2)?,
            window_start: DateTime::parse_from_rfc3339(&window_start)
                .unwrap_or_default()
                .with_timezone(&Utc),
            value: row.get(4)?,
            payload_json: row.get(5)?,
            reason: row.get(6)?,
            // SQLite's datetime('now') format, not RFC3339
            created_at: chrono::NaiveDateTime::parse_from_str(&created_at, "%Y-%m-%d %H:%M:%S")
                .map(|n| n.and_utc())
                .unwrap_or_default(),
        })
    })?;

    let mut out = Vec::new();
    for r in rows.flatten() {
        out.push(r);
    }
    Ok(out)
}

pub fn count(pool: &Pool) -> Result<u64> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}
