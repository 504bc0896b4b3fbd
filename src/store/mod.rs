pub mod cursor;
pub mod seen;

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

/// Durable record of forwarded message ids and the scan cursor for one channel.
///
/// Every mutation is a single autocommitted statement, so the on-disk state is
/// never behind what the pipeline has acted on. Owned by the poll loop alone.
pub struct SeenTracker {
    conn: Connection,
    channel: String,
    seen: BTreeSet<i64>,
    cursor: Option<i64>,
}

impl SeenTracker {
    /// Open or create the state database at `path` and load `channel`'s record.
    pub fn open(path: &Path, channel: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database: {}", path.display()))?;

        // journal_mode PRAGMA returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=FULL;")?;

        let tracker = Self::load(conn, channel)?;
        info!(
            "State store opened at {} (channel {}, {} seen, cursor {:?})",
            path.display(),
            channel,
            tracker.seen.len(),
            tracker.cursor
        );
        Ok(tracker)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory(channel: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::load(conn, channel)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn load(conn: Connection, channel: &str) -> Result<Self> {
        Self::run_migrations(&conn)?;

        let cursor: Option<i64> = conn
            .query_row(
                "SELECT last_id FROM cursors WHERE channel = ?1",
                rusqlite::params![channel],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load cursor")?;

        let seen = {
            let mut stmt = conn
                .prepare("SELECT message_id FROM seen_messages WHERE channel = ?1")
                .context("Failed to prepare seen-set query")?;
            let ids = stmt
                .query_map(rusqlite::params![channel], |row| row.get::<_, i64>(0))
                .context("Failed to query seen-set")?
                .collect::<rusqlite::Result<BTreeSet<_>>>()
                .context("Failed to load seen-set")?;
            ids
        };

        Ok(Self {
            conn,
            channel: channel.to_string(),
            seen,
            cursor,
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS seen_messages (
                channel TEXT NOT NULL,
                message_id INTEGER NOT NULL,
                forwarded_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (channel, message_id)
            );

            CREATE TABLE IF NOT EXISTS cursors (
                channel TEXT PRIMARY KEY,
                last_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run state migrations")?;
        Ok(())
    }
}
