// 🏷️ Status Model - Provenance tags and legal transitions
//
// Transitions are driven by WHO acted, never by timestamps:
//
//   none          --user creates-->  USER_INPUT
//   USER_INPUT    --admin edits-->   ADMIN_EDITED
//   USER_DONE     --admin edits-->   ADMIN_EDITED
//   ADMIN_EDITED  --user edits-->    USER_EDITED   (conflict candidate)
//   USER_EDITED vs ADMIN_EDITED      ADMIN_CHECK   (found by admin-load merge)
//   ADMIN_CHECK   --admin saves-->   ADMIN_EDITED
//   any           --admin deletes--> ADMIN_BLANK   (tombstone)
//   ADMIN_EDITED  --login merge-->   USER_DONE

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TransitionError;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created by the user, never seen by an admin
    UserInput,

    /// Edited by the user after an admin touched it
    UserEdited,

    /// Admin edit received and acknowledged by the user
    UserDone,

    /// Edited by an admin, not yet received by the user
    AdminEdited,

    /// Conflicting edits on both sides, waiting for an admin decision
    AdminCheck,

    /// Deleted by an admin (tombstone)
    AdminBlank,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::UserInput,
        Status::UserEdited,
        Status::UserDone,
        Status::AdminEdited,
        Status::AdminCheck,
        Status::AdminBlank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::UserInput => "USER_INPUT",
            Status::UserEdited => "USER_EDITED",
            Status::UserDone => "USER_DONE",
            Status::AdminEdited => "ADMIN_EDITED",
            Status::AdminCheck => "ADMIN_CHECK",
            Status::AdminBlank => "ADMIN_BLANK",
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Status::AdminBlank)
    }

    /// Tags that mean "the user side holds the latest word on this record"
    pub fn is_user_authored(&self) -> bool {
        matches!(self, Status::UserInput | Status::UserEdited | Status::UserDone)
    }

    /// Apply an authorship action to an optional current tag.
    ///
    /// `current == None` means the record carries no tag (or does not exist
    /// yet, for `Action::UserCreate`).
    pub fn apply(current: Option<Status>, action: Action) -> Result<Status, TransitionError> {
        use Action::*;
        use Status::*;

        let next = match (current, action) {
            // Nothing can be done to a tombstone except deleting it again
            (Some(AdminBlank), AdminDelete) => Some(AdminBlank),
            (Some(AdminBlank), _) => None,

            (None, UserCreate) => Some(UserInput),
            (Some(_), UserCreate) => None,

            // Admin has never seen it, so it is still plain input
            (None, UserEdit) | (Some(UserInput), UserEdit) => Some(UserInput),
            (Some(UserEdited), UserEdit)
            | (Some(UserDone), UserEdit)
            | (Some(AdminEdited), UserEdit)
            | (Some(AdminCheck), UserEdit) => Some(UserEdited),

            (_, AdminEdit) => Some(AdminEdited),
            (_, AdminDelete) => Some(AdminBlank),

            (Some(UserEdited), DetectConflict) | (Some(AdminEdited), DetectConflict) => {
                Some(AdminCheck)
            }
            (Some(AdminCheck), DetectConflict) => Some(AdminCheck),
            (_, DetectConflict) => None,

            (Some(AdminEdited), Acknowledge) => Some(UserDone),
            (Some(UserDone), Acknowledge) => Some(UserDone),
            (_, Acknowledge) => None,
        };

        next.ok_or(TransitionError {
            from: current,
            action,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status tag: {}", s))
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Who did what to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    UserCreate,
    UserEdit,
    AdminEdit,
    AdminDelete,
    /// Admin-load merge found independent edits on both sides
    DetectConflict,
    /// User received an admin edit through a login merge
    Acknowledge,
}

// ============================================================================
// TESTS
// ============================================================================
