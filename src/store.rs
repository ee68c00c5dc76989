// 🗄️ Store - Document and tracker persistence seams
//
// A document read has three outcomes that must stay distinct:
//   Ok(None)          -> no document was ever written for the scope
//   Ok(Some(vec![]))  -> document exists but holds no records
//   Err(_)            -> the store could not answer

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::record::{sort_document, Record, Scope};
use crate::tracker::Tracker;

/// One side (local or remote) of the monthly documents
pub trait RecordStore: Send + Sync {
    fn read(&self, scope: &Scope) -> Result<Option<Vec<Record>>, StoreError>;

    /// Replace the whole document for a scope
    fn write(&self, scope: &Scope, records: &[Record]) -> Result<(), StoreError>;
}

/// Yearly tracker persistence
pub trait TrackerStore: Send + Sync {
    fn read_tracker(&self, owner: &str, year: i32) -> Result<Option<Tracker>, StoreError>;

    fn write_tracker(&self, tracker: &Tracker) -> Result<(), StoreError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local store, used by tests and as a scratch backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Scope, Vec<Record>>>,
    trackers: RwLock<HashMap<(String, i32), Tracker>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, scope: &Scope) -> Result<Option<Vec<Record>>, StoreError> {
        Ok(self.documents.read().get(scope).cloned())
    }

    fn write(&self, scope: &Scope, records: &[Record]) -> Result<(), StoreError> {
        let mut document = records.to_vec();
        sort_document(&mut document);
        self.documents.write().insert(scope.clone(), document);
        Ok(())
    }
}

impl TrackerStore for MemoryStore {
    fn read_tracker(&self, owner: &str, year: i32) -> Result<Option<Tracker>, StoreError> {
        Ok(self.trackers.read().get(&(owner.to_string(), year)).cloned())
    }

    fn write_tracker(&self, tracker: &Tracker) -> Result<(), StoreError> {
        self.trackers
            .write()
            .insert((tracker.owner.clone(), tracker.year), tracker.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Payload, Period};
    use chrono::NaiveDate;

    fn scope() -> Scope {
        Scope::new("alice", Period::new(2025, 3).unwrap()).unwrap()
    }

    #[test]
    fn test_absent_and_empty_are_distinct() {
        let store = MemoryStore::new();
        assert_eq!(store.read(&scope()).unwrap(), None);

        store.write(&scope(), &[]).unwrap();
        assert_eq!(store.read(&scope()).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_write_sorts_document() {
        let store = MemoryStore::new();
        let late = Record::new("b", "alice", Payload::new(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(), "W"));
        let early = Record::new("a", "alice", Payload::new(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(), "W"));

        store.write(&scope(), &[late, early]).unwrap();

        let ids: Vec<String> = store.read(&scope()).unwrap().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_tracker_round_trip() {
        let store = MemoryStore::new();
        assert!(store.read_tracker("alice", 2025).unwrap().is_none());

        let mut tracker = Tracker::new("alice", 2025);
        tracker.request(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "CO").unwrap();
        store.write_tracker(&tracker).unwrap();

        assert_eq!(store.read_tracker("alice", 2025).unwrap(), Some(tracker));
    }
}
