// 🚨 Error types for the reconciliation engine
//
// Three families:
//   - validation (rejected before any store access)
//   - system (store read/write, allocation service)
//   - illegal status transitions requested by user/admin actions
// A detected conflict is NOT here: it is the ADMIN_CHECK status.

use chrono::NaiveDate;
use thiserror::Error;

use crate::record::{Period, Scope};
use crate::status::{Action, Status};

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner id is missing")]
    MissingOwner,

    #[error("owner id is malformed: {0:?}")]
    MalformedOwner(String),

    #[error("period {year}-{month:02} is out of range")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("period string is malformed: {0:?}")]
    MalformedPeriod(String),

    #[error("record identity is malformed: {0:?}")]
    MalformedIdentity(String),

    #[error("record {id} belongs to owner {found}, expected {expected}")]
    OwnerMismatch {
        id: String,
        expected: String,
        found: String,
    },

    #[error("record {id} is dated {date}, outside period {period}")]
    OutOfPeriod {
        id: String,
        date: NaiveDate,
        period: Period,
    },

    #[error("date {date} is outside tracker year {year}")]
    OutOfYear { date: NaiveDate, year: i32 },

    #[error("record kind is missing for {0}")]
    MissingKind(String),

    #[error("identity {0} appears more than once in the document")]
    DuplicateIdentity(String),

    #[error("record {0} does not exist in the document")]
    UnknownIdentity(String),
}

// ============================================================================
// STATUS TRANSITIONS
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot apply {action:?} to a record in state {from:?}")]
pub struct TransitionError {
    pub from: Option<Status>,
    pub action: Action,
}

// ============================================================================
// COLLABORATORS
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored document is corrupt: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no allocation known for owner {0}")]
    UnknownOwner(String),

    #[error("allocation service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cache invalidation failed: {0}")]
pub struct CacheError(pub String);

// ============================================================================
// SYNC
// ============================================================================

/// Which copy of a document an operation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The per-user copy
    Local,
    /// The centrally-administered copy
    Remote,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("illegal status change: {0}")]
    Transition(#[from] TransitionError),

    #[error("reading {side} document for {scope} failed: {source}")]
    Read {
        scope: Scope,
        side: Side,
        #[source]
        source: StoreError,
    },

    #[error("writing {side} document for {scope} failed after merge: {source}")]
    Write {
        scope: Scope,
        side: Side,
        #[source]
        source: StoreError,
    },

    #[error("reading tracker {owner}/{year} failed: {source}")]
    TrackerRead {
        owner: String,
        year: i32,
        #[source]
        source: StoreError,
    },

    #[error("writing tracker {owner}/{year} failed after sync: {source}")]
    TrackerWrite {
        owner: String,
        year: i32,
        #[source]
        source: StoreError,
    },

    #[error("allocation update for {owner} failed: {source}")]
    Allocation {
        owner: String,
        #[source]
        source: AllocationError,
    },
}

impl SyncError {
    /// True for failures of a collaborator, as opposed to bad input
    pub fn is_system_error(&self) -> bool {
        matches!(
            self,
            SyncError::Read { .. }
                | SyncError::Write { .. }
                | SyncError::TrackerRead { .. }
                | SyncError::TrackerWrite { .. }
                | SyncError::Allocation { .. }
        )
    }

    /// True when the merge was computed but could not be persisted
    pub fn is_write_failure(&self) -> bool {
        matches!(self, SyncError::Write { .. } | SyncError::TrackerWrite { .. })
    }
}
