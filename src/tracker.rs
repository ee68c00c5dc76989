// 📅 Tracker - Yearly index of approved time off
//
// The tracker is a derived index: everything in it can be rebuilt from the
// twelve monthly ground-truth documents, except entries still PENDING
// propagation. The synchronizer folds one pass of monthly documents into it:
//
//   (a) date -> kind for every tracked ground-truth entry seen this pass
//   (b) date -> kind for every entry seen in a loaded month, tracked or not
//
// Only entries in loaded months can be canceled, so "month not loaded" never
// reads as "no longer the tracked kind". (b) tells a retyped date apart from
// a removed one in the audit note.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::record::Record;

// ============================================================================
// TRACKER ENTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerState {
    /// Requested, not yet present in ground truth
    Pending,
    Approved,
    /// No longer backed by ground truth; kept for audit
    Canceled,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Pending => "PENDING",
            TrackerState::Approved => "APPROVED",
            TrackerState::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TrackerState::Pending),
            "APPROVED" => Some(TrackerState::Approved),
            "CANCELED" => Some(TrackerState::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub date: NaiveDate,
    pub kind: String,
    pub state: TrackerState,

    /// Provenance / audit note for the last change
    pub note: String,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackerEntry {
    fn approved(date: NaiveDate, kind: &str, note: String, now: DateTime<Utc>) -> Self {
        TrackerEntry {
            date,
            kind: kind.to_string(),
            state: TrackerState::Approved,
            note,
            updated_at: Some(now),
        }
    }
}

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub owner: String,
    pub year: i32,
    pub entries: BTreeMap<NaiveDate, TrackerEntry>,

    /// Approved entries of the balance-bearing kind, as of the last sync
    pub consumed: i64,

    /// Value of `consumed` the allocation balance last reflected. Lags
    /// `consumed` until a balance push succeeds.
    #[serde(default)]
    pub pushed_consumed: i64,

    /// Months whose ground truth could not be read on the last sync
    pub stale_months: BTreeSet<u32>,

    pub synced_at: Option<DateTime<Utc>>,
}

impl Tracker {
    pub fn new(owner: impl Into<String>, year: i32) -> Self {
        Tracker {
            owner: owner.into(),
            year,
            entries: BTreeMap::new(),
            consumed: 0,
            pushed_consumed: 0,
            stale_months: BTreeSet::new(),
            synced_at: None,
        }
    }

    /// Record a time-off request that ground truth does not hold yet.
    ///
    /// Returns false when an approved entry already covers the date.
    pub fn request(&mut self, date: NaiveDate, kind: &str) -> Result<bool, ValidationError> {
        if date.year() != self.year {
            return Err(ValidationError::OutOfYear {
                date,
                year: self.year,
            });
        }

        if let Some(existing) = self.entries.get(&date) {
            if existing.state == TrackerState::Approved {
                return Ok(false);
            }
        }

        self.entries.insert(
            date,
            TrackerEntry {
                date,
                kind: kind.to_string(),
                state: TrackerState::Pending,
                note: "requested".to_string(),
                updated_at: Some(Utc::now()),
            },
        );
        Ok(true)
    }

    pub fn approved_count(&self, kind: &str) -> i64 {
        self.entries
            .values()
            .filter(|e| e.state == TrackerState::Approved && e.kind == kind)
            .count() as i64
    }

    pub fn is_stale(&self) -> bool {
        !self.stale_months.is_empty()
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// Which ground-truth kinds the tracker follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerPolicy {
    pub tracked_kinds: BTreeSet<String>,

    /// Kind whose approved entries consume the allocation balance
    pub balance_kind: String,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        TrackerPolicy {
            tracked_kinds: ["CO".to_string()].into_iter().collect(),
            balance_kind: "CO".to_string(),
        }
    }
}

impl TrackerPolicy {
    pub fn tracks(&self, kind: &str) -> bool {
        self.tracked_kinds.contains(kind) || self.balance_kind == kind
    }
}

// ============================================================================
// MONTH LOADS
// ============================================================================

/// What one month's ground-truth read produced
#[derive(Debug, Clone, PartialEq)]
pub enum MonthLoad {
    Loaded(Vec<Record>),
    /// No document for that month; nothing can be concluded about it
    Absent,
    /// Read failed; the month is marked stale
    Failed(String),
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerReport {
    pub owner: String,
    pub year: i32,
    pub loaded_months: Vec<u32>,
    pub absent_months: Vec<u32>,
    pub failed_months: Vec<(u32, String)>,
    pub inserted: usize,
    pub updated: usize,
    pub canceled: usize,
    pub restored: usize,
    pub approved_pending: usize,
    pub consumed_before: i64,
    pub consumed: i64,

    /// `pushed_consumed` of the tracker going in
    pub pushed_before: i64,
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
}

impl TrackerReport {
    pub fn is_partial(&self) -> bool {
        !self.failed_months.is_empty()
    }

    pub fn changes(&self) -> usize {
        self.inserted + self.updated + self.canceled + self.restored + self.approved_pending
    }

    /// Allocation delta still owed after this pass (positive frees days).
    /// Includes any delta an earlier pass failed to push.
    pub fn balance_delta(&self) -> i64 {
        self.pushed_before - self.consumed
    }

    pub fn summary(&self) -> String {
        format!(
            "tracker {}/{}: {} months loaded, {} failed, +{} ~{} -{} restored {}, consumed {} -> {}",
            self.owner,
            self.year,
            self.loaded_months.len(),
            self.failed_months.len(),
            self.inserted,
            self.updated,
            self.canceled,
            self.restored,
            self.consumed_before,
            self.consumed
        )
    }
}

// ============================================================================
// SYNCHRONIZER
// ============================================================================

pub struct TrackerSynchronizer {
    pub policy: TrackerPolicy,
}

impl TrackerSynchronizer {
    pub fn new(policy: TrackerPolicy) -> Self {
        TrackerSynchronizer { policy }
    }

    /// Fold one pass of monthly loads into a tracker. Pure: returns the new
    /// tracker and leaves the input untouched.
    pub fn reconcile(&self, tracker: &Tracker, months: &BTreeMap<u32, MonthLoad>) -> (Tracker, TrackerReport) {
        let now = Utc::now();
        let mut next = tracker.clone();
        let mut report = TrackerReport {
            owner: tracker.owner.clone(),
            year: tracker.year,
            consumed_before: tracker.consumed,
            pushed_before: tracker.pushed_consumed,
            ..TrackerReport::default()
        };

        // (a) tracked kinds by date, (b) every date seen in a loaded month
        let mut tracked: BTreeMap<NaiveDate, String> = BTreeMap::new();
        let mut seen: BTreeMap<NaiveDate, String> = BTreeMap::new();
        let mut covered: BTreeSet<u32> = BTreeSet::new();

        for (&month, load) in months {
            match load {
                MonthLoad::Loaded(records) => {
                    covered.insert(month);
                    next.stale_months.remove(&month);
                    report.loaded_months.push(month);

                    let mut live: Vec<&Record> = records
                        .iter()
                        .filter(|r| !r.is_tombstone())
                        .filter(|r| r.date().year() == tracker.year && r.date().month() == month)
                        .collect();
                    live.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.id.cmp(&b.id)));

                    for record in live {
                        seen
                            .entry(record.date())
                            .or_insert_with(|| record.kind().to_string());
                        if self.policy.tracks(record.kind()) {
                            tracked
                                .entry(record.date())
                                .or_insert_with(|| record.kind().to_string());
                        }
                    }
                }
                MonthLoad::Absent => {
                    next.stale_months.remove(&month);
                    report.absent_months.push(month);
                }
                MonthLoad::Failed(reason) => {
                    next.stale_months.insert(month);
                    report.failed_months.push((month, reason.clone()));
                }
            }
        }

        debug!(
            owner = %tracker.owner,
            year = tracker.year,
            covered = covered.len(),
            seen_dates = seen.len(),
            tracked = tracked.len(),
            "ground truth scanned"
        );

        // Existing entries inside loaded months
        for (date, entry) in next.entries.iter_mut() {
            if !covered.contains(&date.month()) {
                continue;
            }

            match (tracked.get(date), entry.state) {
                (Some(kind), TrackerState::Pending) => {
                    entry.note = if *kind == entry.kind {
                        "approved: found in ground truth".to_string()
                    } else {
                        format!("approved as {} (requested {})", kind, entry.kind)
                    };
                    entry.kind = kind.clone();
                    entry.state = TrackerState::Approved;
                    entry.updated_at = Some(now);
                    report.approved_pending += 1;
                }
                (Some(kind), TrackerState::Approved) if *kind != entry.kind => {
                    entry.note = format!("type changed from {} to {}", entry.kind, kind);
                    entry.kind = kind.clone();
                    entry.updated_at = Some(now);
                    report.updated += 1;
                }
                (Some(_), TrackerState::Approved) => {}
                (Some(kind), TrackerState::Canceled) => {
                    entry.note = format!("restored: recorded as {} again", kind);
                    entry.kind = kind.clone();
                    entry.state = TrackerState::Approved;
                    entry.updated_at = Some(now);
                    report.restored += 1;
                }
                (None, TrackerState::Approved) => {
                    entry.note = match seen.get(date) {
                        Some(kind) => format!("canceled: {} is now recorded as {}", date, kind),
                        None => format!("canceled: {} no longer has a {} entry", date, entry.kind),
                    };
                    entry.state = TrackerState::Canceled;
                    entry.updated_at = Some(now);
                    report.canceled += 1;
                }
                // Pending requests wait for propagation; canceled stays canceled
                (None, TrackerState::Pending) | (None, TrackerState::Canceled) => {}
            }
        }

        // Ground truth with no tracker counterpart
        for (date, kind) in &tracked {
            if !next.entries.contains_key(date) {
                next.entries.insert(
                    *date,
                    TrackerEntry::approved(*date, kind, "imported from ground truth".to_string(), now),
                );
                report.inserted += 1;
            }
        }

        next.consumed = next.approved_count(&self.policy.balance_kind);
        next.synced_at = Some(now);
        report.consumed = next.consumed;

        info!(
            owner = %tracker.owner,
            year = tracker.year,
            inserted = report.inserted,
            updated = report.updated,
            canceled = report.canceled,
            restored = report.restored,
            consumed = report.consumed,
            "tracker reconciled"
        );

        (next, report)
    }
}

// ============================================================================
// TESTS
// ============================================================================
