//! Per-account nonce allocation.
//!
//! The registry is an explicit service object: construct one per scenario
//! and share it behind an `Arc` with every worker that deploys.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::HarnessError;
use crate::types::AccountId;

/// Nonce handed out on first use of an account
pub const DEFAULT_NONCE_BASE: u64 = 1;

/// Monotonic nonce allocator keyed by account.
///
/// `next` is an atomic fetch-and-increment under a single mutex, so
/// concurrent callers never receive the same value for an account.
/// State lives for the registry's lifetime only; callers that need
/// continuity across restarts pass explicit nonces instead.
#[derive(Debug)]
pub struct NonceRegistry {
    base: u64,
    // `None` once `u64::MAX` has been issued
    next: Mutex<HashMap<AccountId, Option<u64>>>,
}

impl NonceRegistry {
    /// Registry starting every account at `DEFAULT_NONCE_BASE`
    pub fn new() -> Self {
        Self::with_base(DEFAULT_NONCE_BASE)
    }

    /// Registry starting every account at `base`
    pub fn with_base(base: u64) -> Self {
        Self {
            base,
            next: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next nonce for `account`.
    ///
    /// Fails with [`HarnessError::NonceExhausted`] once `u64::MAX` has
    /// been handed out for the account.
    pub fn next(&self, account: &AccountId) -> Result<u64, HarnessError> {
        let mut next = self.next.lock();
        let slot = next.entry(account.clone()).or_insert(Some(self.base));
        let nonce = (*slot).ok_or_else(|| HarnessError::NonceExhausted {
            account: account.clone(),
        })?;
        *slot = nonce.checked_add(1);
        Ok(nonce)
    }

    /// Last nonce issued for `account`, if any
    pub fn last_issued(&self, account: &AccountId) -> Option<u64> {
        // entries exist only after a first issue, so a stored `next` is at least 1
        self.next.lock().get(account).map(|next| match next {
            Some(next) => next - 1,
            None => u64::MAX,
        })
    }

    /// Base value for fresh accounts
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl Default for NonceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
