// Worklog Sync - Core Library
// Keeps the user's copy and the admin copy of monthly time records consistent

pub mod allocation;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod reconciliation;
pub mod record;
pub mod rules;
pub mod status;
pub mod store;
pub mod sync;
pub mod tracker;

// Re-export commonly used types
pub use allocation::{AllocationService, MemoryAllocations};
pub use bootstrap::{bootstrap, Bootstrap};
pub use cache::{CacheInvalidator, NoopInvalidator, RecordingInvalidator};
pub use config::SyncConfig;
pub use db::{load_csv, setup_database, Event, SqliteStore};
pub use error::{
    AllocationError, CacheError, Side, StoreError, SyncError, TransitionError, ValidationError,
};
pub use locks::ScopeLocks;
pub use reconciliation::{
    acknowledge, documents_differ, without_tombstoned, ReconciliationEngine, ReconciliationReport,
};
pub use record::{Payload, Period, Record, Scope};
pub use rules::Direction;
pub use status::{Action, Status};
pub use store::{MemoryStore, RecordStore, TrackerStore};
pub use sync::{AdminAction, SyncOutcome, SyncService};
pub use tracker::{
    MonthLoad, Tracker, TrackerEntry, TrackerPolicy, TrackerReport, TrackerState,
    TrackerSynchronizer,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
