// ⚖️ Merge Rules - Resolve one identity's (remote, local) pair
//
// Pure functions, no I/O. Two entry points:
//   - resolve_fast:  decides from the status-tag pair alone
//   - resolve_full:  compares payload content; only for ambiguous pairs
//
// A pair is ambiguous when both sides exist and the remote is ADMIN_EDITED
// or the local is USER_EDITED: only then does "same edit on both sides"
// need telling apart from "diverged independently".

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::status::{Action, Status};

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Admin copy is authoritative, the user's copy is refreshed
    UserLogin,

    /// User's copy is the incoming source, the admin copy is refreshed
    AdminLoad,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::UserLogin => "user-login",
            Direction::AdminLoad => "admin-load",
        }
    }
}

/// Outcome of the cheap status-only screen
#[derive(Debug, Clone, PartialEq)]
pub enum FastPath {
    /// Decided; `None` drops the identity
    Resolved(Option<Record>),

    /// Needs payload comparison (pass 2)
    NeedsContent,
}

// ============================================================================
// SCREENING
// ============================================================================

/// True when the pair must go through the content path
pub fn needs_content(remote: Option<&Record>, local: Option<&Record>) -> bool {
    match (remote, local) {
        (Some(r), Some(l)) => {
            !r.is_tombstone()
                && !l.is_tombstone()
                && (r.status == Some(Status::AdminEdited) || l.status == Some(Status::UserEdited))
        }
        _ => false,
    }
}

/// Resolve any pair, taking the content path only when needed
pub fn resolve(remote: Option<&Record>, local: Option<&Record>, direction: Direction) -> Option<Record> {
    match resolve_fast(remote, local, direction) {
        FastPath::Resolved(result) => result,
        FastPath::NeedsContent => match (remote, local) {
            (Some(r), Some(l)) => resolve_full(r, l, direction),
            // needs_content is only true when both sides exist
            _ => None,
        },
    }
}

// ============================================================================
// PASS 1 - STATUS ONLY
// ============================================================================

pub fn resolve_fast(remote: Option<&Record>, local: Option<&Record>, direction: Direction) -> FastPath {
    if needs_content(remote, local) {
        return FastPath::NeedsContent;
    }

    let resolved = match direction {
        Direction::UserLogin => login_fast(remote, local),
        Direction::AdminLoad => admin_fast(remote, local),
    };
    FastPath::Resolved(resolved)
}

fn login_fast(remote: Option<&Record>, local: Option<&Record>) -> Option<Record> {
    // Admin deletions win over any local edit
    if remote.map_or(false, Record::is_tombstone) {
        return None;
    }
    // A tombstone carries no authority on the user side
    let local = local.filter(|l| !l.is_tombstone());

    match (remote, local) {
        (None, None) => None,
        // Admin has not seen it yet
        (None, Some(l)) => Some(l.clone()),
        (Some(r), None) if r.status == Some(Status::AdminEdited) => Some(acknowledged(r)),
        (Some(r), None) => Some(r.clone()),
        // Neither side carries a fresh edit, the user's copy stands
        (Some(_), Some(l)) => Some(l.clone()),
    }
}

fn admin_fast(remote: Option<&Record>, local: Option<&Record>) -> Option<Record> {
    if remote.map_or(false, Record::is_tombstone) {
        return None;
    }
    let local = local.filter(|l| !l.is_tombstone());

    match (remote, local) {
        (None, None) => None,
        (None, Some(l)) => Some(promoted(l)),
        (Some(r), None) => Some(r.clone()),
        (Some(r), Some(_)) if r.status == Some(Status::AdminCheck) => Some(r.clone()),
        (Some(_), Some(l)) => Some(promoted(l)),
    }
}

// ============================================================================
// PASS 2 - CONTENT COMPARISON
// ============================================================================

pub fn resolve_full(remote: &Record, local: &Record, direction: Direction) -> Option<Record> {
    if remote.is_tombstone() || local.is_tombstone() {
        return match direction {
            Direction::UserLogin => login_fast(Some(remote), Some(local)),
            Direction::AdminLoad => admin_fast(Some(remote), Some(local)),
        };
    }

    match direction {
        Direction::UserLogin => Some(login_full(remote, local)),
        Direction::AdminLoad => Some(admin_full(remote, local)),
    }
}

fn login_full(remote: &Record, local: &Record) -> Record {
    match (remote.status, local.status) {
        (Some(Status::AdminEdited), Some(Status::UserEdited)) => {
            if remote.same_content(local) || overridden(remote, local) {
                acknowledged(remote)
            } else {
                // Independent user edit: keep it until an admin load flags it
                local.clone()
            }
        }
        (Some(Status::AdminEdited), Some(Status::UserInput) | None) if edited_since(remote, local) => {
            local.clone()
        }
        (Some(Status::AdminEdited), _) => acknowledged(remote),
        _ => local.clone(),
    }
}

fn admin_full(remote: &Record, local: &Record) -> Record {
    match (remote.status, local.status) {
        (Some(Status::AdminEdited), Some(Status::UserEdited)) => {
            if remote.same_content(local) || overridden(remote, local) {
                remote.clone()
            } else {
                flagged(remote, local)
            }
        }
        (Some(Status::AdminEdited), Some(Status::UserDone)) => {
            if remote.same_content(local) {
                local.clone()
            } else {
                remote.clone()
            }
        }
        (Some(Status::AdminEdited), Some(Status::UserInput) | None) if edited_since(remote, local) => {
            flagged(remote, local)
        }
        (Some(Status::AdminEdited), _) => remote.clone(),
        (Some(Status::AdminCheck), Some(Status::UserEdited)) => {
            if remote.contested.as_ref() == Some(&local.payload) {
                remote.clone()
            } else {
                remote.with_contested(Some(local.payload.clone()))
            }
        }
        (Some(Status::AdminCheck), _) => remote.clone(),
        _ => promoted(local),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Admin edit as received by the user
fn acknowledged(remote: &Record) -> Record {
    let status = Status::apply(remote.status, Action::Acknowledge).unwrap_or(Status::UserDone);
    remote.with_status(status)
}

/// Conflict record: admin payload stays visible, user payload is kept aside
fn flagged(remote: &Record, local: &Record) -> Record {
    let status = Status::apply(remote.status, Action::DetectConflict).unwrap_or(Status::AdminCheck);
    remote
        .with_status(status)
        .with_contested(Some(local.payload.clone()))
}

/// Untagged local records enter the admin copy as USER_INPUT
pub(crate) fn promoted(local: &Record) -> Record {
    match local.status {
        Some(_) => local.clone(),
        None => local.with_status(Status::UserInput),
    }
}

/// The admin edit was made against exactly this user payload
fn overridden(remote: &Record, local: &Record) -> bool {
    remote
        .overrides
        .as_deref()
        .map_or(false, |fingerprint| fingerprint == local.fingerprint())
}

/// A record the user never received back was changed after the admin edit
/// was made against it. USER_INPUT stays USER_INPUT on edit, so only the
/// fingerprint tells this apart from the admin's own copy.
fn edited_since(remote: &Record, local: &Record) -> bool {
    remote.overrides.is_some() && !overridden(remote, local) && !remote.same_content(local)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use chrono::NaiveDate;

    fn rec(id: &str, kind: &str, status: Option<Status>) -> Record {
        let mut r = Record::new(
            id,
            "alice",
            Payload::new(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), kind),
        );
        r.status = status;
        r
    }

    // ------------------------------------------------------------------------
    // User-login direction
    // ------------------------------------------------------------------------

    #[test]
    fn test_login_admin_edit_overwrites_and_acknowledges() {
        let remote = rec("1", "CO", Some(Status::AdminEdited));
        let local = rec("1", "W", Some(Status::UserInput));

        let merged = resolve(Some(&remote), Some(&local), Direction::UserLogin).unwrap();
        assert_eq!(merged.status, Some(Status::UserDone));
        assert_eq!(merged.kind(), "CO");
    }

    #[test]
    fn test_login_local_only_passes_through() {
        let local = rec("1", "W", Some(Status::UserInput));
        let merged = resolve(None, Some(&local), Direction::UserLogin);
        assert_eq!(merged, Some(local));
    }

    #[test]
    fn test_login_tombstone_drops_local_edit() {
        let remote = rec("1", "W", Some(Status::AdminBlank));
        let local = rec("1", "CO", Some(Status::UserEdited));

        assert_eq!(resolve_fast(Some(&remote), Some(&local), Direction::UserLogin), FastPath::Resolved(None));
        assert_eq!(resolve(Some(&remote), Some(&local), Direction::UserLogin), None);
    }

    #[test]
    fn test_login_keeps_diverging_user_edit() {
        let remote = rec("1", "CO", Some(Status::AdminEdited));
        let local = rec("1", "CM", Some(Status::UserEdited));

        let merged = resolve(Some(&remote), Some(&local), Direction::UserLogin).unwrap();
        assert_eq!(merged, local);
    }

    #[test]
    fn test_login_accepts_override_of_seen_user_edit() {
        let local = rec("1", "CM", Some(Status::UserEdited));
        let mut remote = rec("1", "CO", Some(Status::AdminEdited));
        remote.overrides = Some(local.fingerprint());

        let merged = resolve(Some(&remote), Some(&local), Direction::UserLogin).unwrap();
        assert_eq!(merged.status, Some(Status::UserDone));
        assert_eq!(merged.kind(), "CO");
    }

    #[test]
    fn test_user_input_edit_after_admin_edit_is_kept() {
        let seen = rec("1", "W", Some(Status::UserInput));
        let mut remote = rec("1", "CM", Some(Status::AdminEdited));
        remote.overrides = Some(seen.fingerprint());

        // Unchanged since the admin saw it: admin edit flows down
        let merged = resolve(Some(&remote), Some(&seen), Direction::UserLogin).unwrap();
        assert_eq!(merged.status, Some(Status::UserDone));
        assert_eq!(merged.kind(), "CM");
        assert_eq!(resolve(Some(&remote), Some(&seen), Direction::AdminLoad), Some(remote.clone()));

        // Edited again before receiving the admin edit
        let edited = rec("1", "CO", Some(Status::UserInput));
        assert_eq!(resolve(Some(&remote), Some(&edited), Direction::UserLogin), Some(edited.clone()));

        let flagged = resolve(Some(&remote), Some(&edited), Direction::AdminLoad).unwrap();
        assert_eq!(flagged.status, Some(Status::AdminCheck));
        assert_eq!(flagged.kind(), "CM");
        assert_eq!(flagged.contested, Some(edited.payload.clone()));

        // Second load leaves the conflict as is
        assert_eq!(resolve(Some(&flagged), Some(&edited), Direction::AdminLoad), Some(flagged.clone()));

        // Edit that happens to match the admin's is no conflict
        let same = rec("1", "CM", Some(Status::UserInput));
        assert_eq!(resolve(Some(&remote), Some(&same), Direction::AdminLoad), Some(remote));
    }

    #[test]
    fn test_login_pending_conflict_keeps_local() {
        let remote = rec("1", "CO", Some(Status::AdminCheck));
        let local = rec("1", "CM", Some(Status::UserEdited));
        assert_eq!(resolve(Some(&remote), Some(&local), Direction::UserLogin), Some(local));
    }

    // ------------------------------------------------------------------------
    // Admin-load direction
    // ------------------------------------------------------------------------

    #[test]
    fn test_admin_inserts_new_user_record() {
        let local = rec("1", "W", Some(Status::UserInput));
        assert_eq!(resolve(None, Some(&local), Direction::AdminLoad), Some(local));

        let untagged = rec("2", "W", None);
        let merged = resolve(None, Some(&untagged), Direction::AdminLoad).unwrap();
        assert_eq!(merged.status, Some(Status::UserInput));
    }

    #[test]
    fn test_admin_detects_conflict() {
        let remote = rec("1", "CO", Some(Status::AdminEdited));
        let local = rec("1", "CM", Some(Status::UserEdited));

        assert_eq!(
            resolve_fast(Some(&remote), Some(&local), Direction::AdminLoad),
            FastPath::NeedsContent
        );

        let merged = resolve(Some(&remote), Some(&local), Direction::AdminLoad).unwrap();
        assert_eq!(merged.status, Some(Status::AdminCheck));
        assert_eq!(merged.kind(), "CO");
        assert_eq!(merged.contested, Some(local.payload.clone()));
    }

    #[test]
    fn test_admin_same_edit_is_not_conflict() {
        let remote = rec("1", "CO", Some(Status::AdminEdited));
        let local = rec("1", "CO", Some(Status::UserEdited));

        let merged = resolve(Some(&remote), Some(&local), Direction::AdminLoad).unwrap();
        assert_eq!(merged, remote);
    }

    #[test]
    fn test_admin_conflict_refreshes_contested_payload() {
        let first = rec("1", "CM", Some(Status::UserEdited));
        let remote = rec("1", "CO", Some(Status::AdminCheck)).with_contested(Some(first.payload.clone()));

        // Unchanged user edit: nothing to do
        assert_eq!(resolve(Some(&remote), Some(&first), Direction::AdminLoad), Some(remote.clone()));

        let second = rec("1", "W", Some(Status::UserEdited));
        let merged = resolve(Some(&remote), Some(&second), Direction::AdminLoad).unwrap();
        assert_eq!(merged.status, Some(Status::AdminCheck));
        assert_eq!(merged.contested, Some(second.payload.clone()));
    }

    #[test]
    fn test_admin_acknowledged_edit_becomes_user_done() {
        let remote = rec("1", "CO", Some(Status::AdminEdited));
        let local = rec("1", "CO", Some(Status::UserDone));
        let merged = resolve(Some(&remote), Some(&local), Direction::AdminLoad).unwrap();
        assert_eq!(merged.status, Some(Status::UserDone));

        // A newer admin edit the user has not received yet stays admin's
        let stale = rec("1", "W", Some(Status::UserDone));
        let merged = resolve(Some(&remote), Some(&stale), Direction::AdminLoad).unwrap();
        assert_eq!(merged, remote);
    }

    #[test]
    fn test_admin_tombstone_drops_identity() {
        let remote = rec("1", "W", Some(Status::AdminBlank));
        let local = rec("1", "W", Some(Status::UserInput));
        assert_eq!(resolve(Some(&remote), Some(&local), Direction::AdminLoad), None);
        assert_eq!(resolve(Some(&remote), None, Direction::AdminLoad), None);
    }

    #[test]
    fn test_remote_only_passes_through() {
        let remote = rec("1", "W", Some(Status::UserDone));
        assert_eq!(resolve(Some(&remote), None, Direction::AdminLoad), Some(remote.clone()));
        assert_eq!(resolve(Some(&remote), None, Direction::UserLogin), Some(remote));
    }

    #[test]
    fn test_user_edit_on_user_record_wins_on_admin_side() {
        let remote = rec("1", "W", Some(Status::UserDone));
        let local = rec("1", "CO", Some(Status::UserEdited));
        assert_eq!(resolve(Some(&remote), Some(&local), Direction::AdminLoad), Some(local));
    }
}
