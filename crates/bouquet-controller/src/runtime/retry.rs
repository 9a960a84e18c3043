//! Per-key retry accounting for failed syncs
//!
//! kube's scheduler requeues whatever the error policy asks for; the ceiling
//! and the exponential delays live here. A key that fails
//! [`MAX_SYNC_ATTEMPTS`] times in a row is dropped until the next watch event
//! for it arrives.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::informer::ObjectKey;

/// Consecutive failed syncs after which a key is dropped
pub const MAX_SYNC_ATTEMPTS: u32 = 15;

/// First retry delay
pub const BASE_DELAY: Duration = Duration::from_millis(5);

/// Longest retry delay
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Consecutive failures per key
///
/// Uses a std mutex: the error policy that updates it is synchronous.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a failure and return the number of consecutive failures
    pub fn increment(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget the failures of `key` (after a success or when giving up)
    pub fn reset(&self, key: &ObjectKey) {
        self.failures().remove(key);
    }

    pub fn get(&self, key: &ObjectKey) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.failures().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delay before the next attempt, `None` once the ceiling is reached
///
/// `failures` counts the failed attempts so far, the one just seen included.
/// 5ms after the first failure, doubling up to [`MAX_DELAY`].
pub fn retry_delay(failures: u32) -> Option<Duration> {
    if failures >= MAX_SYNC_ATTEMPTS {
        return None;
    }
    let delay = 2u32
        .checked_pow(failures.saturating_sub(1))
        .and_then(|factor| BASE_DELAY.checked_mul(factor))
        .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY));
    Some(delay)
}
