// 📄 Records, documents and scopes
//
// A Record is a plain value: merge never mutates its inputs, it builds new
// records with the `with_*` helpers below.
//
// Identity (`id`) is stable and unique within one (owner, period) scope.
// Timestamps are audit-only and never decide precedence.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::status::Status;

const MAX_IDENTITY_LEN: usize = 128;
const MAX_OWNER_LEN: usize = 64;

// ============================================================================
// PERIOD & SCOPE
// ============================================================================

/// One calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        let period = Period { year, month };
        period.validate()?;
        Ok(period)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=12).contains(&self.month) || !(1970..=9999).contains(&self.year) {
            return Err(ValidationError::InvalidPeriod {
                year: self.year,
                month: self.month,
            });
        }
        Ok(())
    }

    /// Period containing a date
    pub fn of(date: NaiveDate) -> Self {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// All twelve months of a year
    pub fn months_of(year: i32) -> impl Iterator<Item = Period> {
        (1..=12).map(move |month| Period { year, month })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedPeriod(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(malformed)?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        Period::new(year, month)
    }
}

/// One (owner, period) document scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub owner: String,
    pub period: Period,
}

impl Scope {
    /// Build a validated scope
    pub fn new(owner: impl Into<String>, period: Period) -> Result<Self, ValidationError> {
        let scope = Scope {
            owner: owner.into(),
            period,
        };
        scope.validate()?;
        Ok(scope)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_owner(&self.owner)?;
        self.period.validate()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.period)
    }
}

pub fn validate_owner(owner: &str) -> Result<(), ValidationError> {
    if owner.is_empty() {
        return Err(ValidationError::MissingOwner);
    }
    if owner.len() > MAX_OWNER_LEN
        || owner.trim() != owner
        || owner.chars().any(|c| c.is_control() || c == '/')
    {
        return Err(ValidationError::MalformedOwner(owner.to_string()));
    }
    Ok(())
}

pub fn validate_identity(id: &str) -> Result<(), ValidationError> {
    if id.is_empty()
        || id.len() > MAX_IDENTITY_LEN
        || id.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::MalformedIdentity(id.to_string()));
    }
    Ok(())
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// The user-visible content of a record.
///
/// `kind` is the entry type code (e.g. "CO" for annual leave); `fields` is
/// opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub date: NaiveDate,
    pub kind: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Payload {
    pub fn new(date: NaiveDate, kind: impl Into<String>) -> Self {
        Payload {
            date,
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Content fingerprint (SHA-256 over canonical JSON).
    ///
    /// BTreeMap keys serialize in order, so equal payloads always hash equal.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "date": self.date.to_string(),
            "kind": self.kind,
            "fields": self.fields,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string());
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identity within the scope
    pub id: String,

    pub owner: String,

    #[serde(flatten)]
    pub payload: Payload,

    /// Provenance tag; `None` means never classified
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// User payload held next to an ADMIN_CHECK record
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contested: Option<Payload>,

    /// Fingerprint of the user payload an admin edit was made against
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, payload: Payload) -> Self {
        Record {
            id: id.into(),
            owner: owner.into(),
            payload,
            status: None,
            contested: None,
            overrides: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// New record with a generated identity
    pub fn generate(owner: impl Into<String>, payload: Payload) -> Self {
        Record::new(uuid::Uuid::new_v4().to_string(), owner, payload)
    }

    pub fn with_status(&self, status: Status) -> Record {
        let mut next = self.clone();
        next.status = Some(status);
        next
    }

    pub fn with_contested(&self, contested: Option<Payload>) -> Record {
        let mut next = self.clone();
        next.contested = contested;
        next
    }

    pub fn is_tombstone(&self) -> bool {
        self.status.map_or(false, |s| s.is_tombstone())
    }

    pub fn fingerprint(&self) -> String {
        self.payload.fingerprint()
    }

    pub fn same_content(&self, other: &Record) -> bool {
        self.payload == other.payload || self.fingerprint() == other.fingerprint()
    }

    pub fn date(&self) -> NaiveDate {
        self.payload.date
    }

    pub fn kind(&self) -> &str {
        &self.payload.kind
    }

    /// Check identity, ownership and date against a scope
    pub fn validate(&self, scope: &Scope) -> Result<(), ValidationError> {
        validate_identity(&self.id)?;
        if self.owner != scope.owner {
            return Err(ValidationError::OwnerMismatch {
                id: self.id.clone(),
                expected: scope.owner.clone(),
                found: self.owner.clone(),
            });
        }
        if !scope.period.contains(self.payload.date) {
            return Err(ValidationError::OutOfPeriod {
                id: self.id.clone(),
                date: self.payload.date,
                period: scope.period,
            });
        }
        if self.payload.kind.trim().is_empty() {
            return Err(ValidationError::MissingKind(self.id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// DOCUMENT HELPERS
// ============================================================================

/// Reject documents where an identity appears twice
pub fn ensure_unique(records: &[Record]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.as_str()) {
            return Err(ValidationError::DuplicateIdentity(record.id.clone()));
        }
    }
    Ok(())
}

/// Validate every record of a document against its scope
pub fn validate_document(scope: &Scope, records: &[Record]) -> Result<(), ValidationError> {
    scope.validate()?;
    for record in records {
        record.validate(scope)?;
    }
    ensure_unique(records)
}

/// Order callers re-impose after merge: by date, then identity
pub fn sort_document(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.payload
            .date
            .cmp(&b.payload.date)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn march() -> Scope {
        Scope::new("alice", Period::new(2025, 3).unwrap()).unwrap()
    }

    fn record(id: &str, day: u32, kind: &str) -> Record {
        Record::new(
            id,
            "alice",
            Payload::new(NaiveDate::from_ymd_opt(2025, 3, day).unwrap(), kind),
        )
    }

    #[test]
    fn test_period_parse_and_display() {
        let period: Period = "2025-03".parse().unwrap();
        assert_eq!(period, Period { year: 2025, month: 3 });
        assert_eq!(period.to_string(), "2025-03");

        assert!("2025-13".parse::<Period>().is_err());
        assert!("March".parse::<Period>().is_err());
        assert_eq!(Period::months_of(2025).count(), 12);
    }

    #[test]
    fn test_scope_requires_owner() {
        let period = Period::new(2025, 3).unwrap();
        assert_eq!(Scope::new("", period), Err(ValidationError::MissingOwner));
        assert!(matches!(
            Scope::new(" bob", period),
            Err(ValidationError::MalformedOwner(_))
        ));
    }

    #[test]
    fn test_record_validation() {
        let scope = march();
        assert!(record("r-1", 10, "CO").validate(&scope).is_ok());

        assert!(matches!(
            record("bad id", 10, "CO").validate(&scope),
            Err(ValidationError::MalformedIdentity(_))
        ));
        assert!(matches!(
            record("", 10, "CO").validate(&scope),
            Err(ValidationError::MalformedIdentity(_))
        ));

        let mut foreign = record("r-2", 10, "CO");
        foreign.owner = "bob".to_string();
        assert!(matches!(
            foreign.validate(&scope),
            Err(ValidationError::OwnerMismatch { .. })
        ));

        let mut april = record("r-3", 10, "CO");
        april.payload.date = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert!(matches!(
            april.validate(&scope),
            Err(ValidationError::OutOfPeriod { .. })
        ));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let records = vec![record("r-1", 3, "W"), record("r-1", 4, "W")];
        assert_eq!(
            ensure_unique(&records),
            Err(ValidationError::DuplicateIdentity("r-1".to_string()))
        );
    }

    #[test]
    fn test_fingerprint_ignores_status_and_timestamps() {
        let a = Record::new(
            "r-1",
            "alice",
            Payload::new(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), "CO")
                .with_field("hours", serde_json::json!(8)),
        );
        let mut b = a.with_status(Status::AdminEdited);
        b.updated_at = Some(Utc::now());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = record("r-1", 10, "CM");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_sort_document_by_date_then_id() {
        let mut records = vec![record("b", 5, "W"), record("a", 5, "W"), record("c", 1, "W")];
        sort_document(&mut records);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_serde_uses_status_tags() {
        let r = record("r-1", 10, "CO").with_status(Status::UserInput);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "USER_INPUT");
        assert_eq!(json["kind"], "CO");

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
