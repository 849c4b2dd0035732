//! In-process striped lock provider.

use std::sync::{Arc, Condvar, Mutex};

use crate::{LockError, LockProvider, LockToken, key_digest};

/// Default number of stripes.
const DEFAULT_STRIPES: usize = 1024;

/// One stripe: a held flag plus the condvar waiters block on.
struct Stripe {
    held: Mutex<bool>,
    freed: Condvar,
}

/// In-process [`LockProvider`] backed by a fixed array of stripes.
///
/// A key is mapped to a stripe through a SHA-256 digest, so the distribution
/// is uniform and identical on every platform. Distinct keys may share a
/// stripe and then serialize against each other, which is safe because
/// stripes are independent and a call path never nests acquisition of two
/// different keys.
#[derive(Clone)]
pub struct MemoryLockProvider {
    stripes: Arc<[Stripe]>,
}

impl MemoryLockProvider {
    /// Provider with the default stripe count.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Provider with an explicit stripe count.
    ///
    /// A count of 1 serializes every key, which tests use to force
    /// contention deterministically.
    #[must_use]
    pub fn with_stripes(count: usize) -> Self {
        let stripes = (0..count.max(1))
            .map(|_| Stripe {
                held: Mutex::new(false),
                freed: Condvar::new(),
            })
            .collect();
        Self { stripes }
    }

    fn stripe_index(&self, key: &str) -> usize {
        let digest = key_digest(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.stripes.len() as u64) as usize
    }
}

impl Default for MemoryLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for MemoryLockProvider {
    fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
        let index = self.stripe_index(key);
        {
            let stripe = &self.stripes[index];
            let mut held = stripe.held.lock().unwrap();
            while *held {
                held = stripe.freed.wait(held).unwrap();
            }
            *held = true;
        }

        let stripes = Arc::clone(&self.stripes);
        Ok(LockToken::new(key, move || {
            let stripe = &stripes[index];
            *stripe.held.lock().unwrap() = false;
            stripe.freed.notify_one();
        }))
    }
}
