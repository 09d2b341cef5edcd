//! SQLite storage layer -- schema, dead letters, persisted baselines.

pub mod dead_letter;
pub mod schema;

use anyhow::Result;
use chrono::Utc;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::warn;

use crate::aggregate::Granularity;
use crate::detect::baseline::Baseline;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open an in-memory pool for tests and ephemeral runs.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Replace the persisted baseline set with a fresh snapshot.
pub fn save_baselines(pool: &Pool, baselines: &[(String, Granularity, Baseline)]) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM baselines", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO baselines (identity, granularity, sample_count, mean, m2, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let now = Utc::now().to_rfc3339();
        for (identity, granularity, b) in baselines {
            stmt.execute(params![
                identity,
                granularity.to_string(),
                b.count as i64,
                b.mean,
                b.m2,
                now
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Load persisted baselines. Rows with an unrecognized granularity are
/// skipped with a warning; taxonomy checks on the identity happen in the
/// detector when it restores.
pub fn load_baselines(pool: &Pool) -> Result<Vec<(String, Granularity, Baseline)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT identity, granularity, sample_count, mean, m2 FROM baselines",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for r in rows {
        let (identity, granularity, count, mean, m2) = r?;
        let granularity = match granularity.as_str() {
            "hour" => Granularity::Hour,
            "day" => Granularity::Day,
            other => {
                warn!(%identity, granularity = %other, "skipping baseline with unknown granularity");
                continue;
            }
        };
        out.push((
            identity,
            granularity,
            Baseline::from_parts(count.max(0) as u64, mean, m2),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_round_trip() -> Result<()> {
        let pool = open_memory_pool()?;

        let snapshot = vec![
            (
                "CONNECTION_COUNT{REGION=us-east}".to_string(),
                Granularity::Hour,
                Baseline::from_parts(12, 10.5, 3.25),
            ),
            (
                "REBOOT_COUNT".to_string(),
                Granularity::Day,
                Baseline::from_parts(4, 1.0, 0.0),
            ),
        ];
        save_baselines(&pool, &snapshot)?;

        let mut loaded = load_baselines(&pool)?;
        loaded.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, "CONNECTION_COUNT{REGION=us-east}");
        assert_eq!(loaded[0].1, Granularity::Hour);
        assert_eq!(loaded[0].2.count, 12);
        assert!((loaded[0].2.mean - 10.5).abs() < 1e-9);

        // A later save replaces, not appends
        save_baselines(&pool, &snapshot[..1].to_vec())?;
        assert_eq!(load_baselines(&pool)?.len(), 1);
        Ok(())
    }
}
