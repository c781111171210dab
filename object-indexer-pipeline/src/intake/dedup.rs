//! Event-ID deduplication.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Remembers event IDs for a retention window.
///
/// Redelivery of the same notification is expected from at-least-once
/// sources; anything older than the window is handled by the coordinator's
/// record lookup instead.
pub struct EventDeduplicator {
    seen: DashMap<String, DateTime<Utc>>,
    retention: chrono::Duration,
}

impl EventDeduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Record `event_id` as seen at `now`.
    ///
    /// Returns `true` the first time an ID is seen within the window.
    pub fn check_and_mark(&self, event_id: &str, now: DateTime<Utc>) -> bool {
        match self.seen.entry(event_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if self.is_expired(*slot.get(), now) {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Forget IDs older than the retention window. Returns how many were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| !self.is_expired(*seen_at, now));
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn is_expired(&self, seen_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(seen_at) > self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sighting_is_duplicate() {
        let dedup = EventDeduplicator::new(Duration::from_secs(60));
        let now = Utc::now();

        assert!(dedup.check_and_mark("evt-1", now));
        assert!(!dedup.check_and_mark("evt-1", now));
        assert!(dedup.check_and_mark("evt-2", now));
    }

    #[test]
    fn test_forgets_after_retention() {
        let dedup = EventDeduplicator::new(Duration::from_secs(60));
        let now = Utc::now();
        dedup.check_and_mark("evt-1", now);
        dedup.check_and_mark("evt-2", now + chrono::Duration::seconds(50));

        let later = now + chrono::Duration::seconds(90);
        assert_eq!(dedup.purge_expired(later), 1);
        assert_eq!(dedup.len(), 1);
        assert!(dedup.check_and_mark("evt-1", later));
    }
}
