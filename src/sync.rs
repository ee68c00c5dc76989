// 🔄 Sync Service - Login, admin load, admin save and tracker fan-in
//
// Every operation follows the same shape:
//   1. validate input (no store access yet)
//   2. take the owner's lock
//   3. read everything up front
//   4. compute in memory (no I/O)
//   5. write what changed, still under the lock
//   6. invalidate the cache (failures only logged)

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::allocation::AllocationService;
use crate::bootstrap::bootstrap;
use crate::cache::{invalidate_quietly, CacheInvalidator};
use crate::config::SyncConfig;
use crate::error::{AllocationError, Result, Side, StoreError, SyncError, ValidationError};
use crate::locks::ScopeLocks;
use crate::reconciliation::{acknowledge, documents_differ, without_tombstoned, ReconciliationEngine, ReconciliationReport};
use crate::record::{validate_document, validate_identity, validate_owner, Payload, Period, Record, Scope};
use crate::status::{Action, Status};
use crate::store::{RecordStore, TrackerStore};
use crate::tracker::{MonthLoad, Tracker, TrackerReport, TrackerSynchronizer};

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A merge ran and at least one side was rewritten
    Merged(ReconciliationReport),

    /// Remote document was absent and got created from the local copy
    Bootstrapped { promoted: usize },

    /// Nothing to write
    NoChange,
}

impl SyncOutcome {
    pub fn conflicts(&self) -> &[String] {
        match self {
            SyncOutcome::Merged(report) => &report.conflicts,
            _ => &[],
        }
    }
}

/// One admin change to the remote document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminAction {
    Edit(Record),
    Delete(String),
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct SyncService {
    local: Arc<dyn RecordStore>,
    remote: Arc<dyn RecordStore>,
    trackers: Arc<dyn TrackerStore>,
    allocations: Arc<dyn AllocationService>,
    cache: Arc<dyn CacheInvalidator>,
    locks: ScopeLocks,
    synchronizer: TrackerSynchronizer,
}

impl SyncService {
    pub fn new(
        local: Arc<dyn RecordStore>,
        remote: Arc<dyn RecordStore>,
        trackers: Arc<dyn TrackerStore>,
        allocations: Arc<dyn AllocationService>,
        cache: Arc<dyn CacheInvalidator>,
        config: &SyncConfig,
    ) -> Self {
        SyncService {
            local,
            remote,
            trackers,
            allocations,
            cache,
            locks: ScopeLocks::new(config.lock_shards),
            synchronizer: TrackerSynchronizer::new(config.tracker.clone()),
        }
    }

    // ========================================================================
    // USER SIDE
    // ========================================================================

    /// Append a new USER_INPUT record to the local document
    pub fn user_create(&self, scope: &Scope, payload: Payload) -> Result<Record> {
        scope.validate()?;

        let mut record = Record::generate(scope.owner.clone(), payload);
        record.status = Some(Status::apply(None, Action::UserCreate)?);
        record.created_at = Some(Utc::now());
        record.validate(scope)?;

        let _guard = self.locks.lock(&scope.owner);

        let mut document = self.read(Side::Local, scope)?.unwrap_or_default();
        document.push(record.clone());
        self.write(Side::Local, scope, &document)?;

        info!(scope = %scope, id = %record.id, "user created record");
        Ok(record)
    }

    /// Replace the payload of a local record
    pub fn user_edit(&self, scope: &Scope, id: &str, payload: Payload) -> Result<Record> {
        scope.validate()?;
        validate_identity(id)?;

        let _guard = self.locks.lock(&scope.owner);

        let mut document = self.read(Side::Local, scope)?.unwrap_or_default();
        let record = document
            .iter_mut()
            .find(|record| record.id == id && !record.is_tombstone())
            .ok_or_else(|| ValidationError::UnknownIdentity(id.to_string()))?;

        let status = Status::apply(record.status, Action::UserEdit)?;
        let mut edited = record.with_status(status);
        edited.payload = payload;
        edited.updated_at = Some(Utc::now());
        edited.validate(scope)?;
        *record = edited.clone();

        self.write(Side::Local, scope, &document)?;

        info!(scope = %scope, id, status = %status, "user edited record");
        Ok(edited)
    }

    /// Refresh the user's copy from the admin copy
    pub fn user_login(&self, scope: &Scope) -> Result<SyncOutcome> {
        scope.validate()?;

        let _guard = self.locks.lock(&scope.owner);

        let Some(remote) = self.read(Side::Remote, scope)? else {
            info!(scope = %scope, "no admin copy yet, login merge skipped");
            return Ok(SyncOutcome::NoChange);
        };
        let local = self.read(Side::Local, scope)?.unwrap_or_default();

        let report = ReconciliationEngine::user_login().reconcile(&remote, &local)?;
        let next_remote = acknowledge(&remote, &report.records);

        let local_changed = report.changed_from(&local);
        let remote_changed = documents_differ(&next_remote, &remote);

        if !local_changed && !remote_changed {
            info!(scope = %scope, "login merge: no change");
            return Ok(SyncOutcome::NoChange);
        }

        if local_changed {
            self.write(Side::Local, scope, &report.records)?;
        }
        if remote_changed {
            self.write(Side::Remote, scope, &next_remote)?;
        }
        invalidate_quietly(self.cache.as_ref(), scope);

        info!(scope = %scope, local_changed, remote_changed, "{}", report.summary());
        Ok(SyncOutcome::Merged(report))
    }

    // ========================================================================
    // ADMIN SIDE
    // ========================================================================

    /// Refresh the admin copy from the user's copy
    pub fn admin_load(&self, scope: &Scope) -> Result<SyncOutcome> {
        scope.validate()?;

        let _guard = self.locks.lock(&scope.owner);

        let remote = self.read(Side::Remote, scope)?;
        let local = self.read(Side::Local, scope)?;

        let Some(remote) = remote else {
            let Some(local) = local else {
                info!(scope = %scope, "no document on either side");
                return Ok(SyncOutcome::NoChange);
            };
            let promoted = bootstrap(&local);
            self.write(Side::Remote, scope, &promoted.records)?;
            invalidate_quietly(self.cache.as_ref(), scope);
            return Ok(SyncOutcome::Bootstrapped {
                promoted: promoted.records.len(),
            });
        };
        let local = local.unwrap_or_default();

        let report = ReconciliationEngine::admin_load().reconcile(&remote, &local)?;
        let next_local = without_tombstoned(&remote, &local);

        self.persist_admin_merge(scope, &remote, &local, report, &next_local)
    }

    /// Apply admin edits and deletions, then merge against the user's copy
    pub fn admin_save(&self, scope: &Scope, actions: Vec<AdminAction>) -> Result<SyncOutcome> {
        scope.validate()?;
        for action in &actions {
            match action {
                AdminAction::Edit(record) => record.validate(scope)?,
                AdminAction::Delete(id) => validate_identity(id)?,
            }
        }

        let _guard = self.locks.lock(&scope.owner);

        let remote = self.read(Side::Remote, scope)?;
        let local = self.read(Side::Local, scope)?.unwrap_or_default();

        let base = match &remote {
            Some(records) => records.clone(),
            None => bootstrap(&local).records,
        };
        let staged = stage(base, actions)?;
        validate_document(scope, &staged)?;

        let report = ReconciliationEngine::admin_load().reconcile(&staged, &local)?;
        let next_local = without_tombstoned(&staged, &local);

        match remote {
            Some(remote) => self.persist_admin_merge(scope, &remote, &local, report, &next_local),
            None => {
                self.write(Side::Remote, scope, &report.records)?;
                if documents_differ(&next_local, &local) {
                    self.write(Side::Local, scope, &next_local)?;
                }
                invalidate_quietly(self.cache.as_ref(), scope);
                Ok(SyncOutcome::Merged(report))
            }
        }
    }

    fn persist_admin_merge(
        &self,
        scope: &Scope,
        remote: &[Record],
        local: &[Record],
        report: ReconciliationReport,
        next_local: &[Record],
    ) -> Result<SyncOutcome> {
        let remote_changed = report.changed_from(remote);
        let local_changed = documents_differ(next_local, local);

        if !remote_changed && !local_changed {
            info!(scope = %scope, "admin merge: no change");
            return Ok(SyncOutcome::NoChange);
        }

        if remote_changed {
            self.write(Side::Remote, scope, &report.records)?;
        }
        if local_changed {
            self.write(Side::Local, scope, next_local)?;
        }
        invalidate_quietly(self.cache.as_ref(), scope);

        if report.has_conflicts() {
            warn!(scope = %scope, conflicts = ?report.conflicts, "records need admin review");
        }
        info!(scope = %scope, remote_changed, local_changed, "{}", report.summary());
        Ok(SyncOutcome::Merged(report))
    }

    // ========================================================================
    // TRACKER
    // ========================================================================

    /// Queue a time-off request until ground truth holds it
    pub fn request_leave(&self, owner: &str, date: NaiveDate, kind: &str) -> Result<bool> {
        validate_owner(owner)?;
        let year = Period::of(date).year;

        let _guard = self.locks.lock(owner);

        let mut tracker = self.read_tracker(owner, year)?;
        let added = tracker.request(date, kind)?;
        if added {
            self.write_tracker(&tracker)?;
        }
        Ok(added)
    }

    /// Fold the twelve remote monthly documents into the yearly tracker and
    /// push the balance delta.
    pub fn sync_tracker(&self, owner: &str, year: i32) -> Result<TrackerReport> {
        validate_owner(owner)?;
        Period::new(year, 1)?;

        let _guard = self.locks.lock(owner);

        let tracker = self.read_tracker(owner, year)?;

        let mut months = BTreeMap::new();
        for period in Period::months_of(year) {
            let scope = Scope {
                owner: owner.to_string(),
                period,
            };
            let load = match self.remote.read(&scope) {
                Ok(Some(records)) => MonthLoad::Loaded(records),
                Ok(None) => MonthLoad::Absent,
                Err(e) => {
                    warn!(scope = %scope, error = %e, "month unreadable, tracker sync continues");
                    MonthLoad::Failed(e.to_string())
                }
            };
            months.insert(period.month, load);
        }

        let (mut next, mut report) = self.synchronizer.reconcile(&tracker, &months);

        // Tracker first: a balance pushed without its tracker would drift.
        // `pushed_consumed` only moves once the balance push succeeds, so a
        // failed push stays owed to the next sync.
        self.write_tracker(&next)?;

        let delta = report.balance_delta();
        if delta != 0 {
            let before = match self.allocations.get_balance(owner) {
                Ok(balance) => balance,
                Err(AllocationError::UnknownOwner(_)) => 0,
                Err(source) => {
                    return Err(SyncError::Allocation {
                        owner: owner.to_string(),
                        source,
                    })
                }
            };
            let after = before + delta;
            self.allocations
                .set_balance(owner, after)
                .map_err(|source| SyncError::Allocation {
                    owner: owner.to_string(),
                    source,
                })?;
            report.balance_before = Some(before);
            report.balance_after = Some(after);

            next.pushed_consumed = next.consumed;
            self.write_tracker(&next)?;
        }

        if report.is_partial() {
            warn!(owner, year, failed = report.failed_months.len(), "tracker sync is partial");
        }
        info!(owner, year, delta, "{}", report.summary());
        Ok(report)
    }

    // ========================================================================
    // STORE ACCESS
    // ========================================================================

    fn store(&self, side: Side) -> &dyn RecordStore {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    fn read(&self, side: Side, scope: &Scope) -> Result<Option<Vec<Record>>> {
        self.store(side).read(scope).map_err(|source| SyncError::Read {
            scope: scope.clone(),
            side,
            source,
        })
    }

    fn write(&self, side: Side, scope: &Scope, records: &[Record]) -> Result<()> {
        self.store(side)
            .write(scope, records)
            .map_err(|source| SyncError::Write {
                scope: scope.clone(),
                side,
                source,
            })
    }

    fn write_tracker(&self, tracker: &Tracker) -> Result<()> {
        self.trackers
            .write_tracker(tracker)
            .map_err(|source| SyncError::TrackerWrite {
                owner: tracker.owner.clone(),
                year: tracker.year,
                source,
            })
    }

    fn read_tracker(&self, owner: &str, year: i32) -> Result<Tracker> {
        let stored = self
            .trackers
            .read_tracker(owner, year)
            .map_err(|source: StoreError| SyncError::TrackerRead {
                owner: owner.to_string(),
                year,
                source,
            })?;
        Ok(stored.unwrap_or_else(|| Tracker::new(owner, year)))
    }
}

// ============================================================================
// ADMIN STAGING
// ============================================================================

/// Apply admin actions to the remote document with status transitions.
///
/// An edit records which user payload it was made against, so the next merge
/// treats it as a knowing override rather than a fresh conflict.
fn stage(mut document: Vec<Record>, actions: Vec<AdminAction>) -> Result<Vec<Record>> {
    let now = Utc::now();

    for action in actions {
        match action {
            AdminAction::Edit(edit) => {
                let existing = document.iter().position(|r| r.id == edit.id);
                let current = existing.map(|i| &document[i]);

                // Editing a tombstone is rejected by the transition table
                let status = Status::apply(current.and_then(|r| r.status), Action::AdminEdit)?;

                let overrides = current.and_then(|r| match r.status {
                    Some(Status::AdminCheck) => r.contested.as_ref().map(Payload::fingerprint),
                    Some(s) if s.is_user_authored() => Some(r.fingerprint()),
                    _ => r.overrides.clone(),
                });

                let mut next = edit.with_status(status).with_contested(None);
                next.overrides = overrides;
                next.created_at = current.and_then(|r| r.created_at).or(Some(now));
                next.updated_at = Some(now);

                match existing {
                    Some(i) => document[i] = next,
                    None => document.push(next),
                }
            }
            AdminAction::Delete(id) => {
                let record = document
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| ValidationError::UnknownIdentity(id.clone()))?;
                let status = Status::apply(record.status, Action::AdminDelete)?;
                record.status = Some(status);
                record.updated_at = Some(now);
            }
        }
    }

    Ok(document)
}

// ============================================================================
// TESTS
// ============================================================================
