use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

#[derive(Debug, Default, Clone)]
struct Entry {
    cooldown_until: Option<DateTime<Utc>>,
    approved: bool,
}

/// In-memory index of the request IDs this process has seen and that are not
/// yet known to be finalized on chain. Owned by the watcher task.
pub struct RequestTracker {
    entries: BTreeMap<u64, Entry>,
    clock: Clock,
}

impl RequestTracker {
    pub fn new(clock: Clock) -> Self {
        Self { entries: BTreeMap::new(), clock }
    }

    /// Inserts `id` without a cooldown. Returns `true` if it was not tracked yet.
    pub fn note(&mut self, id: u64) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, Entry::default());
        true
    }

    pub fn arm_cooldown(&mut self, id: u64, duration: Duration) {
        let until = (self.clock)() + duration;
        self.entries.entry(id).or_default().cooldown_until = Some(until);
    }

    pub fn is_cooling(&self, id: u64) -> bool {
        self.entries
            .get(&id)
            .and_then(|e| e.cooldown_until)
            .is_some_and(|until| until > (self.clock)())
    }

    pub fn mark_approved(&mut self, id: u64) {
        self.entries.entry(id).or_default().approved = true;
    }

    pub fn is_approved(&self, id: u64) -> bool {
        self.entries.get(&id).is_some_and(|e| e.approved)
    }

    pub fn forget(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    /// Active IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
