use crate::order::id::LocalOrderId;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Kind of gateway deadline tracked for an order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    Ack,
    Fill,
    Cancel,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TimeoutKind::Ack => "ack",
                TimeoutKind::Fill => "fill",
                TimeoutKind::Cancel => "cancel",
            }
        )
    }
}

/// Deadline configuration, in seconds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub ack_secs: i64,
    pub fill_secs: i64,
    pub cancel_secs: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ack_secs: 5,
            fill_secs: 30,
            cancel_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn delta(&self, kind: TimeoutKind) -> TimeDelta {
        match kind {
            TimeoutKind::Ack => TimeDelta::seconds(self.ack_secs),
            TimeoutKind::Fill => TimeDelta::seconds(self.fill_secs),
            TimeoutKind::Cancel => TimeDelta::seconds(self.cancel_secs),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
struct TimeoutEntry {
    deadline: DateTime<Utc>,
    local_id: LocalOrderId,
    kind: TimeoutKind,
    seq: u64,
}

/// `(local_id, kind) -> deadline` bookkeeping.
///
/// [`Self::tick`] removes and returns fired entries atomically, ordered by deadline then
/// registration order, for delivery to the order FSMs.
#[derive(Debug, Clone, Default)]
pub struct TimeoutManager {
    entries: Vec<TimeoutEntry>,
    config: TimeoutConfig,
    next_seq: u64,
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> TimeoutConfig {
        self.config
    }

    /// Register a deadline of `now + config(kind)`. Re-registering an existing
    /// `(local_id, kind)` replaces the previous deadline.
    pub fn register(&mut self, local_id: LocalOrderId, kind: TimeoutKind, now: DateTime<Utc>) {
        self.register_at(local_id, kind, now + self.config.delta(kind));
    }

    /// Register an explicit deadline.
    pub fn register_at(
        &mut self,
        local_id: LocalOrderId,
        kind: TimeoutKind,
        deadline: DateTime<Utc>,
    ) {
        self.entries
            .retain(|entry| !(entry.local_id == local_id && entry.kind == kind));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimeoutEntry {
            deadline,
            local_id,
            kind,
            seq,
        });
    }

    /// Cancel one pending deadline.
    pub fn cancel(&mut self, local_id: LocalOrderId, kind: TimeoutKind) {
        self.entries
            .retain(|entry| !(entry.local_id == local_id && entry.kind == kind));
    }

    /// Cancel every pending deadline for the order (called on terminal states).
    pub fn cancel_all_for_order(&mut self, local_id: LocalOrderId) {
        self.entries.retain(|entry| entry.local_id != local_id);
    }

    /// Remove and return every deadline that has expired at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<(LocalOrderId, TimeoutKind)> {
        let mut fired: Vec<TimeoutEntry> = Vec::new();
        self.entries.retain(|entry| {
            if entry.deadline <= now {
                fired.push(entry.clone());
                false
            } else {
                true
            }
        });

        fired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.seq.cmp(&b.seq)));
        fired
            .into_iter()
            .map(|entry| (entry.local_id, entry.kind))
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_tick_fires_expired_in_order() {
        let mut manager = TimeoutManager::new(TimeoutConfig::default());
        let a = LocalOrderId::random();
        let b = LocalOrderId::random();

        manager.register_at(a, TimeoutKind::Fill, at(30));
        manager.register_at(b, TimeoutKind::Ack, at(5));

        assert!(manager.tick(at(4)).is_empty());

        let fired = manager.tick(at(30));
        assert_eq!(fired, vec![(b, TimeoutKind::Ack), (a, TimeoutKind::Fill)]);
        assert_eq!(manager.pending_len(), 0);

        // fired entries are removed atomically; a second tick returns nothing
        assert!(manager.tick(at(60)).is_empty());
    }

    #[test]
    fn test_default_deadlines() {
        let mut manager = TimeoutManager::new(TimeoutConfig::default());
        let a = LocalOrderId::random();

        manager.register(a, TimeoutKind::Ack, at(0));
        assert!(manager.tick(at(4)).is_empty());
        assert_eq!(manager.tick(at(5)), vec![(a, TimeoutKind::Ack)]);
    }

    #[test]
    fn test_reregister_replaces_deadline() {
        let mut manager = TimeoutManager::new(TimeoutConfig::default());
        let a = LocalOrderId::random();

        manager.register_at(a, TimeoutKind::Ack, at(5));
        manager.register_at(a, TimeoutKind::Ack, at(10));

        assert!(manager.tick(at(6)).is_empty());
        assert_eq!(manager.tick(at(10)), vec![(a, TimeoutKind::Ack)]);
    }

    #[test]
    fn test_cancel_all_for_order() {
        let mut manager = TimeoutManager::new(TimeoutConfig::default());
        let a = LocalOrderId::random();
        let b = LocalOrderId::random();

        manager.register_at(a, TimeoutKind::Ack, at(5));
        manager.register_at(a, TimeoutKind::Fill, at(30));
        manager.register_at(b, TimeoutKind::Ack, at(5));

        manager.cancel_all_for_order(a);
        assert_eq!(manager.tick(at(60)), vec![(b, TimeoutKind::Ack)]);
    }
}
