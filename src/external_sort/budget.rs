use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::constants::{MIN_BUDGET_BYTES, PERCENT_100};

/// Memory the sort stage may hold at once, in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// `percent` of currently available memory, floored at
    /// `MIN_BUDGET_BYTES` so tiny containers still make progress.
    pub fn from_percent_of_available(percent: f64) -> Self {
        let mut system = System::new();
        system.refresh_memory();

        let available = system.available_memory() as f64;
        let bytes = (available * percent / PERCENT_100) as usize;
        Self {
            bytes: bytes.max(MIN_BUDGET_BYTES),
        }
    }

    /// Exact budget, no floor. Tests use this to force spilling.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes: bytes.max(1) }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Splits the budget across `ways` readers, clamped to `[min, max]`.
    pub fn share(&self, ways: usize, min: usize, max: usize) -> usize {
        (self.bytes / ways.max(1)).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_budget_has_floor() {
        let budget = MemoryBudget::from_percent_of_available(1.0);
        assert!(budget.bytes() >= MIN_BUDGET_BYTES);
    }

    #[test]
    fn test_explicit_budget_is_exact() {
        assert_eq!(MemoryBudget::from_bytes(512).bytes(), 512);
        assert_eq!(MemoryBudget::from_bytes(0).bytes(), 1);
    }

    #[test]
    fn test_share_is_clamped() {
        let budget = MemoryBudget::from_bytes(1_000);
        assert_eq!(budget.share(10, 4096, 1 << 20), 4096);
        let budget = MemoryBudget::from_bytes(100 << 20);
        assert_eq!(budget.share(2, 4096, 1 << 20), 1 << 20);
        assert_eq!(budget.share(0, 1, usize::MAX), 100 << 20);
    }
}
