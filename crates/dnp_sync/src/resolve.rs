//! Last-write-wins resolution for an inbound record against local state.
//!
//! Pure functions: no I/O, no clock. The engine stamps merged records.

use std::cmp::Ordering;

use dnp_crypto::hash::content_digest;
use dnp_proto::{ProtoError, Record};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Unknown id, live record: take it.
    Insert(Record),
    /// Remote is strictly newer (tombstone included), or identical apart from
    /// an earlier `created_at`.
    Replace(Record),
    /// Equal timestamps, different content. The record still needs a fresh
    /// `modified_at` and must be republished.
    Merge(Record),
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Tombstone for an id never seen locally.
    UnknownTombstone,
    LocalNewer,
    /// Same timestamp and same content: already applied.
    Duplicate,
    KindMismatch,
}

pub fn resolve(local: Option<&Record>, remote: Record) -> Result<Resolution, ProtoError> {
    let Some(local) = local else {
        if remote.tombstoned {
            return Ok(Resolution::Ignore(IgnoreReason::UnknownTombstone));
        }
        return Ok(Resolution::Insert(remote));
    };
    if local.kind != remote.kind {
        return Ok(Resolution::Ignore(IgnoreReason::KindMismatch));
    }
    match remote.modified_at.cmp(&local.modified_at) {
        Ordering::Greater => Ok(Resolution::Replace(remote)),
        Ordering::Less => Ok(Resolution::Ignore(IgnoreReason::LocalNewer)),
        // Same edit seen twice. Only an earlier `created_at` is worth taking.
        Ordering::Equal if local.same_content(&remote) => {
            if remote.created_at < local.created_at {
                Ok(Resolution::Replace(remote))
            } else {
                Ok(Resolution::Ignore(IgnoreReason::Duplicate))
            }
        }
        Ordering::Equal => merge_tie(local, &remote).map(Resolution::Merge),
    }
}

/// Deterministic merge of two different records with the same timestamp.
///
/// Every replica picks the same winner (greater content digest, tombstone
/// first), so every replica computes the same merged content. Fields present
/// on only one side are kept; fields present on both take the winner's value.
pub fn merge_tie(local: &Record, remote: &Record) -> Result<Record, ProtoError> {
    let (winner, loser) = if local.tombstoned != remote.tombstoned {
        if remote.tombstoned {
            (remote, local)
        } else {
            (local, remote)
        }
    } else {
        let l = content_digest(&local.canonical_content()?);
        let r = content_digest(&remote.canonical_content()?);
        if r >= l {
            (remote, local)
        } else {
            (local, remote)
        }
    };

    let mut merged = winner.clone();
    merged.created_at = local.created_at.min(remote.created_at);
    if !winner.tombstoned {
        for (k, v) in &loser.payload {
            merged.payload.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnp_proto::RecordKind;
    use serde_json::{json, Map, Value};

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn note(id: &str, ts: i64, payload: Value) -> Record {
        let mut r = Record::new(RecordKind::Note, obj(payload), ts);
        r.id = id.into();
        r
    }

    #[test]
    fn unknown_live_record_inserts() {
        let r = note("n", 10, json!({"title": "A"}));
        assert_eq!(resolve(None, r.clone()).unwrap(), Resolution::Insert(r));
    }

    #[test]
    fn unknown_tombstone_is_ignored() {
        let t = note("n", 10, json!({})).tombstone(11);
        assert_eq!(
            resolve(None, t).unwrap(),
            Resolution::Ignore(IgnoreReason::UnknownTombstone)
        );
    }

    #[test]
    fn strictly_newer_remote_wins() {
        let local = note("n", 100, json!({"title": "A"}));
        let mut remote = local.clone();
        remote.payload = obj(json!({"title": "B"}));
        remote.modified_at = 200;
        assert_eq!(resolve(Some(&local), remote.clone()).unwrap(), Resolution::Replace(remote));
    }

    #[test]
    fn older_remote_is_ignored() {
        let local = note("n", 200, json!({"title": "B"}));
        let mut remote = local.clone();
        remote.modified_at = 150;
        assert_eq!(
            resolve(Some(&local), remote).unwrap(),
            Resolution::Ignore(IgnoreReason::LocalNewer)
        );
    }

    #[test]
    fn stale_create_loses_to_tombstone() {
        let tomb = note("n2", 250, json!({})).tombstone(300);
        let stale = note("n2", 250, json!({"title": "zombie"}));
        assert_eq!(
            resolve(Some(&tomb), stale).unwrap(),
            Resolution::Ignore(IgnoreReason::LocalNewer)
        );
    }

    #[test]
    fn identical_tie_is_duplicate() {
        let r = note("n", 10, json!({"title": "A"}));
        assert_eq!(
            resolve(Some(&r), r.clone()).unwrap(),
            Resolution::Ignore(IgnoreReason::Duplicate)
        );
    }

    #[test]
    fn identical_tie_settles_on_earliest_creation_time() {
        let mut early = note("n", 10, json!({"title": "A"}));
        early.created_at = 2;
        let mut late = early.clone();
        late.created_at = 5;

        assert_eq!(
            resolve(Some(&late), early.clone()).unwrap(),
            Resolution::Replace(early.clone())
        );
        assert_eq!(
            resolve(Some(&early), late).unwrap(),
            Resolution::Ignore(IgnoreReason::Duplicate)
        );
    }

    #[test]
    fn tie_merge_is_symmetric() {
        let a = note("n", 10, json!({"title": "A", "content": "only-a"}));
        let mut b = a.clone();
        b.payload = obj(json!({"title": "B", "tags": ["x"]}));

        let ab = merge_tie(&a, &b).unwrap();
        let ba = merge_tie(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.payload.get("content"), Some(&json!("only-a")));
        assert_eq!(ab.payload.get("tags"), Some(&json!(["x"])));
        let title = ab.payload.get("title").unwrap();
        assert!(title == &json!("A") || title == &json!("B"));
    }

    #[test]
    fn tombstone_wins_tie() {
        let live = note("n", 10, json!({"title": "A"}));
        let mut tomb = live.tombstone(10);
        tomb.created_at = live.created_at;
        let merged = merge_tie(&live, &tomb).unwrap();
        assert!(merged.tombstoned);
        assert!(merged.payload.is_empty());
        assert_eq!(merge_tie(&tomb, &live).unwrap(), merged);
    }

    #[test]
    fn kind_mismatch_is_ignored() {
        let local = note("n", 10, json!({}));
        let mut remote = local.clone();
        remote.kind = RecordKind::Task;
        remote.modified_at = 20;
        assert_eq!(
            resolve(Some(&local), remote).unwrap(),
            Resolution::Ignore(IgnoreReason::KindMismatch)
        );
    }
}
