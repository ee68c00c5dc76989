// 🧹 Cache - Invalidation hook fired after successful writes
//
// Fire-and-forget: a failure is logged and never rolls back or fails the
// write that triggered it.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::record::Scope;

pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, scope: &Scope) -> Result<(), CacheError>;
}

/// Call the hook and swallow its failure
pub fn invalidate_quietly(cache: &dyn CacheInvalidator, scope: &Scope) {
    match cache.invalidate(scope) {
        Ok(()) => debug!(scope = %scope, "cache invalidated"),
        Err(e) => warn!(scope = %scope, error = %e, "cache invalidation failed, continuing"),
    }
}

/// No cache in front of the stores
#[derive(Debug, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _scope: &Scope) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Keeps every invalidated scope; the CLI prints them, tests assert on them
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    seen: Mutex<Vec<Scope>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<Scope> {
        self.seen.lock().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, scope: &Scope) -> Result<(), CacheError> {
        self.seen.lock().push(scope.clone());
        Ok(())
    }
}
