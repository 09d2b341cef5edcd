//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            identity TEXT NOT NULL,
            granularity TEXT NOT NULL,
            window_start TEXT NOT NULL,
            value REAL NOT NULL,
            payload_json TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS baselines (
            identity TEXT NOT NULL,
            granularity TEXT NOT NULL,
            sample_count INTEGER NOT NULL,
            mean REAL NOT NULL,
            m2 REAL NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (identity, granularity)
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letters_created ON dead_letters(created_at);
        CREATE INDEX IF NOT EXISTS idx_dead_letters_identity ON dead_letters(identity);",
    )?;

    Ok(())
}
