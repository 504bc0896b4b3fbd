use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::SeenTracker;

impl SeenTracker {
    pub fn is_seen(&self, id: i64) -> bool {
        self.seen.contains(&id)
    }

    /// Record that `id`'s digest was accepted by the destination.
    ///
    /// Returns `false` (and changes nothing) if it was already recorded.
    pub fn mark_seen(&mut self, id: i64) -> Result<bool> {
        if self.seen.contains(&id) {
            warn!(message_id = id, "duplicate mark-seen ignored");
            return Ok(false);
        }

        self.conn
            .execute(
                "INSERT OR IGNORE INTO seen_messages (channel, message_id) VALUES (?1, ?2)",
                rusqlite::params![self.channel, id],
            )
            .with_context(|| format!("Failed to record forwarded message {}", id))?;

        self.seen.insert(id);
        Ok(true)
    }

    /// Drop seen ids older than `min_id`. Returns how many were removed.
    pub fn prune_before(&mut self, min_id: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM seen_messages WHERE channel = ?1 AND message_id < ?2",
                rusqlite::params![self.channel, min_id],
            )
            .context("Failed to prune seen-set")?;

        self.seen = self.seen.split_off(&min_id);
        if removed > 0 {
            debug!(removed, min_id, "pruned seen-set");
        }
        Ok(removed)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_seen_once() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        assert!(!tracker.is_seen(5));
        assert!(tracker.mark_seen(5).unwrap());
        assert!(tracker.is_seen(5));
    }

    #[test]
    fn test_duplicate_mark_seen_is_noop() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        tracker.mark_seen(5).unwrap();
        assert!(!tracker.mark_seen(5).unwrap());
        assert_eq!(tracker.seen_count(), 1);
    }

    #[test]
    fn test_prune_before_keeps_recent_ids() {
        let mut tracker = SeenTracker::open_in_memory("chan").unwrap();
        for id in [10, 20, 30, 40] {
            tracker.mark_seen(id).unwrap();
        }

        let removed = tracker.prune_before(30).unwrap();
        assert_eq!(removed, 2);
        assert!(!tracker.is_seen(10));
        assert!(!tracker.is_seen(20));
        assert!(tracker.is_seen(30));
        assert!(tracker.is_seen(40));
        assert_eq!(tracker.seen_count(), 2);
    }
}
