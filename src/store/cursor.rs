use anyhow::{Context, Result};
use tracing::{info, warn};

use super::SeenTracker;

impl SeenTracker {
    /// Highest message id already scanned, if any cycle has completed.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Move the cursor forward to `id`.
    ///
    /// Monotonic: an id older than the current cursor is logged and ignored.
    /// Returns whether the stored cursor changed.
    pub fn advance_cursor(&mut self, id: i64) -> Result<bool> {
        match self.cursor {
            Some(current) if id < current => {
                warn!(current, requested = id, "cursor regression ignored");
                return Ok(false);
            }
            Some(current) if id == current => return Ok(false),
            _ => {}
        }

        self.write_cursor(id)?;
        Ok(true)
    }

    /// Operator override: move the cursor to `id` even if that is backwards.
    pub fn rewind_cursor(&mut self, id: i64) -> Result<()> {
        info!(from = ?self.cursor, to = id, "cursor rewound by operator");
        self.write_cursor(id)
    }

    fn write_cursor(&mut self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cursors (channel, last_id) VALUES (?1, ?2)
                 ON CONFLICT(channel) DO UPDATE SET
                    last_id = excluded.last_id,
                    updated_at = datetime('now')",
                rusqlite::params![self.channel, id],
            )
            .with_context(|| format!("Failed to store cursor {}", id))?;
        self.cursor = Some(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_starts_empty_and_advances() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        assert_eq!(tracker.cursor(), None);
        assert!(tracker.advance_cursor(10).unwrap());
        assert!(tracker.advance_cursor(25).unwrap());
        assert_eq!(tracker.cursor(), Some(25));
    }

    #[test]
    fn test_cursor_regression_is_noop() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        tracker.advance_cursor(50).unwrap();
        assert!(!tracker.advance_cursor(40).unwrap());
        assert!(!tracker.advance_cursor(50).unwrap());
        assert_eq!(tracker.cursor(), Some(50));
    }

    #[test]
    fn test_rewind_bypasses_monotonic_guard() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        tracker.advance_cursor(50).unwrap();
        tracker.rewind_cursor(20).unwrap();
        assert_eq!(tracker.cursor(), Some(20));
        assert!(tracker.advance_cursor(30).unwrap());
    }
}
