// ⚖️ Reconciliation Engine - Two-pass document merge
//
// Groups both documents by identity and runs every pair through the merge
// rules:
//   Pass 1: status-tag screen, resolves all unambiguous pairs
//   Pass 2: content comparison, only for the pairs pass 1 deferred
//
// The merge is pure and deterministic: same inputs, same output, in the same
// order (date, then identity). It re-runs on every login and admin save with
// no way to tell "already merged", so it must be idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::ValidationError;
use crate::record::{ensure_unique, sort_document, Record};
use crate::rules::{self, Direction, FastPath};
use crate::status::{Action, Status};

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub direction: Direction,

    /// Merged document, sorted by date then identity
    pub records: Vec<Record>,

    /// Size of the union of both identity sets
    pub identity_count: usize,

    /// Pairs decided from status tags alone
    pub fast_path: usize,

    /// Pairs that needed payload comparison
    pub content_path: usize,

    /// Identities left in ADMIN_CHECK
    pub conflicts: Vec<String>,

    /// Identities removed by a tombstone
    pub dropped: Vec<String>,

    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// True when the merged output differs from `prior` (order ignored)
    pub fn changed_from(&self, prior: &[Record]) -> bool {
        documents_differ(&self.records, prior)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} merge: {} identities, {} records out, {} fast / {} content, {} conflicts, {} dropped",
            self.direction.as_str(),
            self.identity_count,
            self.records.len(),
            self.fast_path,
            self.content_path,
            self.conflicts.len(),
            self.dropped.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    pub direction: Direction,
}

impl ReconciliationEngine {
    pub fn new(direction: Direction) -> Self {
        ReconciliationEngine { direction }
    }

    pub fn user_login() -> Self {
        Self::new(Direction::UserLogin)
    }

    pub fn admin_load() -> Self {
        Self::new(Direction::AdminLoad)
    }

    /// Merge a remote (admin) document with a local (user) document
    ///
    /// Example:
    /// ```
    /// use worklog_sync::{Payload, Record, ReconciliationEngine, Status};
    /// use chrono::NaiveDate;
    ///
    /// let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
    /// let local = vec![Record::new("1", "alice", Payload::new(day, "W")).with_status(Status::UserInput)];
    ///
    /// let report = ReconciliationEngine::admin_load().reconcile(&[], &local).unwrap();
    /// assert_eq!(report.records, local);
    /// ```
    pub fn reconcile(
        &self,
        remote: &[Record],
        local: &[Record],
    ) -> Result<ReconciliationReport, ValidationError> {
        ensure_unique(remote)?;
        ensure_unique(local)?;

        let remote_by_id = index(remote);
        let local_by_id = index(local);
        let identities: BTreeSet<&str> = remote_by_id
            .keys()
            .chain(local_by_id.keys())
            .copied()
            .collect();

        let mut merged: BTreeMap<&str, Record> = BTreeMap::new();
        let mut deferred: Vec<(&Record, &Record)> = Vec::new();
        let mut dropped = Vec::new();
        let mut fast_path = 0;

        // Pass 1: status tags only
        for &id in &identities {
            let r = remote_by_id.get(id).copied();
            let l = local_by_id.get(id).copied();

            match rules::resolve_fast(r, l, self.direction) {
                FastPath::Resolved(Some(record)) => {
                    fast_path += 1;
                    merged.insert(id, record);
                }
                FastPath::Resolved(None) => {
                    fast_path += 1;
                    if r.map_or(false, Record::is_tombstone) || l.map_or(false, Record::is_tombstone) {
                        dropped.push(id.to_string());
                    }
                }
                FastPath::NeedsContent => {
                    if let (Some(r), Some(l)) = (r, l) {
                        deferred.push((r, l));
                    }
                }
            }
        }

        debug!(
            direction = self.direction.as_str(),
            identities = identities.len(),
            fast_path,
            deferred = deferred.len(),
            "merge pass 1 complete"
        );

        // Pass 2: payload comparison for the ambiguous batch
        let content_path = deferred.len();
        for (r, l) in deferred {
            match rules::resolve_full(r, l, self.direction) {
                Some(record) => {
                    merged.insert(r.id.as_str(), record);
                }
                None => dropped.push(r.id.clone()),
            }
        }

        let conflicts: Vec<String> = merged
            .values()
            .filter(|record| record.status == Some(Status::AdminCheck))
            .map(|record| record.id.clone())
            .collect();

        let mut records: Vec<Record> = merged.into_values().collect();
        sort_document(&mut records);
        dropped.sort();

        Ok(ReconciliationReport {
            direction: self.direction,
            records,
            identity_count: identities.len(),
            fast_path,
            content_path,
            conflicts,
            dropped,
            reconciled_at: Utc::now(),
        })
    }
}

// ============================================================================
// POST-MERGE REWRITES
// ============================================================================

/// Remote document after a login merge: tombstones purged, admin edits the
/// user now holds flipped to USER_DONE
pub fn acknowledge(remote: &[Record], merged_local: &[Record]) -> Vec<Record> {
    let local_by_id = index(merged_local);

    let mut records: Vec<Record> = remote
        .iter()
        .filter(|record| !record.is_tombstone())
        .map(|record| {
            let received = local_by_id.get(record.id.as_str()).map_or(false, |l| {
                l.status == Some(Status::UserDone) && l.same_content(record)
            });
            match Status::apply(record.status, Action::Acknowledge) {
                Ok(status) if received && record.status == Some(Status::AdminEdited) => {
                    record.with_status(status)
                }
                _ => record.clone(),
            }
        })
        .collect();

    sort_document(&mut records);
    records
}

/// Local document with every identity tombstoned on the remote side removed
pub fn without_tombstoned(remote: &[Record], local: &[Record]) -> Vec<Record> {
    let tombstoned: BTreeSet<&str> = remote
        .iter()
        .filter(|record| record.is_tombstone())
        .map(|record| record.id.as_str())
        .collect();

    local
        .iter()
        .filter(|record| !tombstoned.contains(record.id.as_str()) && !record.is_tombstone())
        .cloned()
        .collect()
}

/// Compare two documents as identity-keyed sets
pub fn documents_differ(a: &[Record], b: &[Record]) -> bool {
    if a.len() != b.len() {
        return true;
    }
    let b_by_id = index(b);
    a.iter()
        .any(|record| b_by_id.get(record.id.as_str()) != Some(&record))
}

fn index(records: &[Record]) -> BTreeMap<&str, &Record> {
    records.iter().map(|record| (record.id.as_str(), record)).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn rec(id: &str, day: u32, kind: &str, status: Option<Status>) -> Record {
        let mut r = Record::new(
            id,
            "alice",
            Payload::new(NaiveDate::from_ymd_opt(2025, 3, day).unwrap(), kind),
        );
        r.status = status;
        r
    }

    #[test]
    fn test_pass_through_into_absent_remote() {
        let local = vec![rec("1", 1, "W", Some(Status::UserInput))];
        let report = ReconciliationEngine::admin_load().reconcile(&[], &local).unwrap();

        assert_eq!(report.records, local);
        assert_eq!(report.fast_path, 1);
        assert_eq!(report.content_path, 0);
    }

    #[test]
    fn test_conflict_detected_on_admin_load() {
        let remote = vec![rec("1", 10, "CO", Some(Status::AdminEdited))];
        let local = vec![rec("1", 10, "CM", Some(Status::UserEdited))];

        let report = ReconciliationEngine::admin_load().reconcile(&remote, &local).unwrap();

        assert_eq!(report.content_path, 1);
        assert_eq!(report.conflicts, vec!["1".to_string()]);
        assert_eq!(report.records[0].status, Some(Status::AdminCheck));
        assert_eq!(report.records[0].kind(), "CO");
        assert!(report.has_conflicts());
    }

    #[test]
    fn test_deletion_propagates_on_login() {
        let remote = vec![
            rec("1", 10, "CO", Some(Status::AdminBlank)),
            rec("2", 11, "W", Some(Status::AdminEdited)),
        ];
        let local = vec![
            rec("1", 10, "CM", Some(Status::UserEdited)),
            rec("2", 11, "W", Some(Status::UserInput)),
            rec("3", 12, "W", Some(Status::UserInput)),
        ];

        let report = ReconciliationEngine::user_login().reconcile(&remote, &local).unwrap();
        let ids: Vec<&str> = report.records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(report.dropped, vec!["1".to_string()]);
        assert_eq!(report.records[0].status, Some(Status::UserDone));
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let local = vec![rec("1", 1, "W", None), rec("1", 2, "W", None)];
        let err = ReconciliationEngine::admin_load().reconcile(&[], &local).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateIdentity("1".to_string()));
    }

    #[test]
    fn test_output_sorted_by_date_then_id() {
        let remote = vec![rec("b", 2, "W", Some(Status::UserDone))];
        let local = vec![rec("c", 1, "W", Some(Status::UserInput)), rec("a", 2, "W", None)];

        let report = ReconciliationEngine::admin_load().reconcile(&remote, &local).unwrap();
        let ids: Vec<&str> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_acknowledge_flips_received_admin_edits() {
        let remote = vec![
            rec("1", 1, "CO", Some(Status::AdminEdited)),
            rec("2", 2, "W", Some(Status::AdminBlank)),
            rec("3", 3, "CO", Some(Status::AdminEdited)),
        ];
        let merged_local = vec![
            rec("1", 1, "CO", Some(Status::UserDone)),
            // user kept a diverging edit
            rec("3", 3, "CM", Some(Status::UserEdited)),
        ];

        let acked = acknowledge(&remote, &merged_local);
        assert_eq!(acked.len(), 2);
        assert_eq!(acked[0].status, Some(Status::UserDone));
        assert_eq!(acked[1].status, Some(Status::AdminEdited));
    }

    #[test]
    fn test_without_tombstoned() {
        let remote = vec![rec("1", 1, "W", Some(Status::AdminBlank))];
        let local = vec![rec("1", 1, "W", Some(Status::UserInput)), rec("2", 2, "W", None)];
        let kept = without_tombstoned(&remote, &local);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "2");
    }

    #[test]
    fn test_changed_from_ignores_order() {
        let a = rec("1", 1, "W", Some(Status::UserInput));
        let b = rec("2", 2, "W", Some(Status::UserInput));
        let report = ReconciliationEngine::admin_load()
            .reconcile(&[], &[a.clone(), b.clone()])
            .unwrap();

        assert!(!report.changed_from(&[b.clone(), a.clone()]));
        assert!(report.changed_from(&[a]));
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn status_strategy() -> impl Strategy<Value = Option<Status>> {
        prop_oneof![
            Just(None),
            proptest::sample::select(Status::ALL.to_vec()).prop_map(Some),
        ]
    }

    fn document_strategy() -> impl Strategy<Value = Vec<Record>> {
        proptest::collection::btree_map(
            0u8..8,
            (1u32..4, proptest::sample::select(vec!["W", "CO", "CM"]), status_strategy()),
            0..8,
        )
        .prop_map(|entries| {
            entries
                .into_iter()
                .map(|(id, (day, kind, status))| rec(&format!("r{}", id), day, kind, status))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn admin_load_is_idempotent(remote in document_strategy(), local in document_strategy()) {
            let engine = ReconciliationEngine::admin_load();
            let first = engine.reconcile(&remote, &local).unwrap();
            // deletions reach the user's copy alongside the admin write
            let local = without_tombstoned(&remote, &local);
            let second = engine.reconcile(&first.records, &local).unwrap();
            prop_assert_eq!(&second.records, &first.records);
        }

        #[test]
        fn user_login_is_idempotent(remote in document_strategy(), local in document_strategy()) {
            let engine = ReconciliationEngine::user_login();
            let first = engine.reconcile(&remote, &local).unwrap();
            let second = engine.reconcile(&remote, &first.records).unwrap();
            prop_assert_eq!(&second.records, &first.records);
        }

        #[test]
        fn output_has_no_tombstones_or_duplicates(
            remote in document_strategy(),
            local in document_strategy(),
            login in any::<bool>(),
        ) {
            let engine = if login {
                ReconciliationEngine::user_login()
            } else {
                ReconciliationEngine::admin_load()
            };
            let report = engine.reconcile(&remote, &local).unwrap();

            prop_assert!(report.records.iter().all(|r| !r.is_tombstone()));
            prop_assert!(ensure_unique(&report.records).is_ok());
        }

        #[test]
        fn merge_is_deterministic(remote in document_strategy(), local in document_strategy()) {
            let engine = ReconciliationEngine::admin_load();
            let a = engine.reconcile(&remote, &local).unwrap();
            let mut shuffled_local = local.clone();
            shuffled_local.reverse();
            let b = engine.reconcile(&remote, &shuffled_local).unwrap();
            prop_assert_eq!(a.records, b.records);
        }
    }
}
