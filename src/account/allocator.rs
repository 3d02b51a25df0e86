//! Numeric user id allocation.

use super::Account;

/// Highest number never handed out. First account gets `floor + 1`.
pub const DEFAULT_UID_FLOOR: u32 = 10_000;

/// Computes the next free `uidNumber` from a snapshot of the directory.
///
/// No counter is kept between calls, the directory is the only state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidAllocator {
    floor: u32,
}

impl Default for UidAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_UID_FLOOR)
    }
}

impl UidAllocator {
    /// Create a new [`UidAllocator`].
    pub fn new(floor: u32) -> Self {
        Self { floor }
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    /// Returns `max(floor, max(uidNumber)) + 1`, or `None` once `u32` is
    /// exhausted.
    pub fn next_uid_number(&self, existing: &[Account]) -> Option<u32> {
        existing
            .iter()
            .map(|account| account.uid_number)
            .fold(self.floor, u32::max)
            .checked_add(1)
    }
}
