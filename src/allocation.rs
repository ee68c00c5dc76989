// 🏖️ Allocation - Remaining time-off balance per owner

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::AllocationError;

/// External balance service; the tracker sync pushes deltas into it
pub trait AllocationService: Send + Sync {
    fn get_balance(&self, owner: &str) -> Result<i64, AllocationError>;

    fn set_balance(&self, owner: &str, balance: i64) -> Result<(), AllocationError>;
}

/// In-process balances. Unknown owners start at zero on first write.
#[derive(Debug, Default)]
pub struct MemoryAllocations {
    balances: RwLock<HashMap<String, i64>>,
}

impl MemoryAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, owner: &str, balance: i64) -> Self {
        self.balances.write().insert(owner.to_string(), balance);
        self
    }
}

impl AllocationService for MemoryAllocations {
    fn get_balance(&self, owner: &str) -> Result<i64, AllocationError> {
        self.balances
            .read()
            .get(owner)
            .copied()
            .ok_or_else(|| AllocationError::UnknownOwner(owner.to_string()))
    }

    fn set_balance(&self, owner: &str, balance: i64) -> Result<(), AllocationError> {
        self.balances.write().insert(owner.to_string(), balance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_owner() {
        let allocations = MemoryAllocations::new();
        assert_eq!(
            allocations.get_balance("bob"),
            Err(AllocationError::UnknownOwner("bob".to_string()))
        );
    }

    #[test]
    fn test_set_then_get() {
        let allocations = MemoryAllocations::new().with_balance("alice", 25);
        assert_eq!(allocations.get_balance("alice"), Ok(25));

        allocations.set_balance("alice", 24).unwrap();
        assert_eq!(allocations.get_balance("alice"), Ok(24));
    }
}
