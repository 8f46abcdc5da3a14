use crate::audit::canonical::to_canonical_string;
use itertools::{EitherOrBoth, Itertools};
use serde_json::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Timestamp-valued fields excluded from every replay hash.
const TIMESTAMP_FIELDS: [&str; 3] = ["ts", "timestamp", "received_at"];

/// Which event family a verification runs over.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayKind {
    Decision,
    Guardian,
}

impl ReplayKind {
    /// `event_type` prefix selecting this family.
    pub fn prefix(&self) -> &'static str {
        match self {
            ReplayKind::Decision => "decision",
            ReplayKind::Guardian => "guardian",
        }
    }
}

/// Strip timestamp-valued fields recursively, leaving the decision-relevant structure.
pub fn canonicalise(event: &Value) -> Value {
    match event {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !TIMESTAMP_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), canonicalise(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonicalise).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonicalised event sequence.
pub fn hash_events<'a>(events: impl IntoIterator<Item = &'a Value>) -> String {
    let canonical = Value::Array(events.into_iter().map(canonicalise).collect());
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_string(&canonical).as_bytes());
    hex::encode(hasher.finalize())
}

/// 16-hex-char digest of a canonical JSON value, used for decision feature hashes.
pub fn feature_hash(features: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_string(features).as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// First index at which two filtered sequences diverge.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Divergence {
    pub index: usize,
    pub original: Option<Value>,
    pub replay: Option<Value>,
}

/// Outcome of verifying a replay log against the original.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ReplayReport {
    pub kind: ReplayKind,
    pub hash_original: String,
    pub hash_replay: String,
    pub divergence: Option<Divergence>,
}

impl ReplayReport {
    pub fn is_match(&self) -> bool {
        self.hash_original == self.hash_replay
    }
}

fn filter_kind<'a>(events: &'a [Value], kind: ReplayKind) -> Vec<&'a Value> {
    events
        .iter()
        .filter(|event| {
            event["event_type"]
                .as_str()
                .is_some_and(|event_type| event_type.starts_with(kind.prefix()))
        })
        .collect()
}

/// Verify that two event logs carry identical `kind`-family sequences.
///
/// On hash mismatch the first divergent index is located by pairwise comparison of the
/// canonicalised events (None-vs-value at a length mismatch, or the first unequal pair).
pub fn verify(original: &[Value], replay: &[Value], kind: ReplayKind) -> ReplayReport {
    let original_filtered = filter_kind(original, kind);
    let replay_filtered = filter_kind(replay, kind);

    let hash_original = hash_events(original_filtered.iter().copied());
    let hash_replay = hash_events(replay_filtered.iter().copied());

    let divergence = if hash_original == hash_replay {
        None
    } else {
        original_filtered
            .iter()
            .zip_longest(replay_filtered.iter())
            .enumerate()
            .find_map(|(index, pair)| {
                let (original_event, replay_event) = match pair {
                    EitherOrBoth::Both(a, b) => {
                        let (a, b) = (canonicalise(a), canonicalise(b));
                        if a == b {
                            return None;
                        }
                        (Some(a), Some(b))
                    }
                    EitherOrBoth::Left(a) => (Some(canonicalise(a)), None),
                    EitherOrBoth::Right(b) => (None, Some(canonicalise(b))),
                };
                Some(Divergence {
                    index,
                    original: original_event,
                    replay: replay_event,
                })
            })
    };

    ReplayReport {
        kind,
        hash_original,
        hash_replay,
        divergence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision(ts: &str, hash: &str) -> Value {
        json!({
            "ts": ts,
            "event_type": "decision",
            "run_id": "r1",
            "exec_id": "e1",
            "feature_hash": hash,
            "target_portfolio": {"rb2501": 10}
        })
    }

    #[test]
    fn test_timestamps_excluded_from_hash() {
        let a = vec![decision("2025-01-06T01:00:00Z", "abc")];
        let b = vec![decision("2025-01-06T09:30:00Z", "abc")];

        let report = verify(&a, &b, ReplayKind::Decision);
        assert!(report.is_match());
        assert!(report.divergence.is_none());
    }

    #[test]
    fn test_mismatch_localised_to_first_divergent_index() {
        let original = vec![
            decision("t", "abc"),
            decision("t", "def"),
            decision("t", "ghi"),
        ];
        let replay = vec![
            decision("t", "abc"),
            decision("t", "XXX"),
            decision("t", "ghi"),
        ];

        let report = verify(&original, &replay, ReplayKind::Decision);
        assert!(!report.is_match());
        let divergence = report.divergence.unwrap();
        assert_eq!(divergence.index, 1);
        assert_eq!(divergence.original.unwrap()["feature_hash"], "def");
        assert_eq!(divergence.replay.unwrap()["feature_hash"], "XXX");
    }

    #[test]
    fn test_length_mismatch_reports_none_side() {
        let original = vec![decision("t", "abc"), decision("t", "def")];
        let replay = vec![decision("t", "abc")];

        let report = verify(&original, &replay, ReplayKind::Decision);
        assert!(!report.is_match());
        let divergence = report.divergence.unwrap();
        assert_eq!(divergence.index, 1);
        assert!(divergence.original.is_some());
        assert!(divergence.replay.is_none());
    }

    #[test]
    fn test_filter_ignores_other_families() {
        let original = vec![
            decision("t", "abc"),
            json!({"event_type": "trade", "run_id": "r1", "exec_id": "e1", "qty": 1}),
        ];
        let replay = vec![decision("t", "abc")];

        let report = verify(&original, &replay, ReplayKind::Decision);
        assert!(report.is_match());
    }

    #[test]
    fn test_guardian_prefix_selects_all_guardian_events() {
        let original = vec![
            json!({"event_type": "guardian_mode", "prev": "running", "current": "halted"}),
            json!({"event_type": "guardian_trigger", "event": "quote_stale"}),
        ];
        let replay = original.clone();

        let report = verify(&original, &replay, ReplayKind::Guardian);
        assert!(report.is_match());
    }

    #[test]
    fn test_feature_hash_is_16_hex() {
        let hash = feature_hash(&json!({"mom_5": "0.25", "spread": "1"}));
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        // Key order does not matter
        let reordered = feature_hash(&json!({"spread": "1", "mom_5": "0.25"}));
        assert_eq!(hash, reordered);
    }
}
