//! Named mutual-exclusion locks for the flush path.
//!
//! The service runs as multiple stateless replicas, so flush exclusion
//! cannot rely on an in-process mutex: the contract is a named lock with a
//! bounded acquisition wait, a bounded hold lease, and release on every
//! exit path. [`InMemoryLockService`] implements the contract for
//! single-process deployments and tests; any lease-based key in a shared
//! store satisfies the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::LockError;

/// Lock keyspace: `lock::{project}::{scope}::{user}`.
#[must_use]
pub fn lock_key(project_id: &str, scope: &str, user_id: &str) -> String {
    format!("lock::{project_id}::{scope}::{user_id}")
}

/// Proof of a held lock; the token guards against releasing a lease that
/// expired and was re-acquired by another holder.
#[derive(Debug, Clone)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire `key`, waiting up to `blocking_timeout`. The lease expires
    /// after `hold_timeout` even if never released, so a crashed holder
    /// cannot wedge the buffer forever.
    async fn acquire(
        &self,
        key: &str,
        blocking_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<LockLease, LockError>;

    /// Release a held lease. Failure here is logged by callers, never
    /// fatal to the guarded operation's result.
    async fn release(&self, lease: &LockLease) -> Result<(), LockError>;
}

// ── In-memory implementation ─────────────────────────────────────

struct Holder {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryLockService {
    holders: Mutex<HashMap<String, Holder>>,
}

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(25);

impl InMemoryLockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn try_acquire(&self, key: &str, hold_timeout: Duration) -> Option<LockLease> {
        let mut holders = self.holders.lock().await;
        let now = Instant::now();
        match holders.get(key) {
            Some(holder) if holder.expires_at > now => None,
            _ => {
                let token = Uuid::new_v4().to_string();
                holders.insert(
                    key.to_string(),
                    Holder {
                        token: token.clone(),
                        expires_at: now + hold_timeout,
                    },
                );
                Some(LockLease {
                    key: key.to_string(),
                    token,
                })
            }
        }
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(
        &self,
        key: &str,
        blocking_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<LockLease, LockError> {
        let deadline = Instant::now() + blocking_timeout;
        loop {
            if let Some(lease) = self.try_acquire(key, hold_timeout).await {
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(LockError::AcquireTimeout {
                    key: key.to_string(),
                    waited_secs: blocking_timeout.as_secs(),
                });
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        let mut holders = self.holders.lock().await;
        match holders.get(&lease.key) {
            Some(holder) if holder.token == lease.token => {
                holders.remove(&lease.key);
                Ok(())
            }
            Some(_) => Err(LockError::Backend(format!(
                "lease for {} superseded before release",
                lease.key
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let locks = InMemoryLockService::new();
        let lease = locks
            .acquire("lock::p::flush::u1", Duration::from_secs(1), Duration::from_secs(10))
            .await
            .unwrap();
        locks.release(&lease).await.unwrap();
        locks
            .acquire("lock::p::flush::u1", Duration::from_secs(1), Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn held_lock_times_out_second_acquirer() {
        let locks = InMemoryLockService::new();
        let _lease = locks
            .acquire("k", Duration::from_millis(50), Duration::from_secs(10))
            .await
            .unwrap();
        let err = locks
            .acquire("k", Duration::from_millis(50), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AcquireTimeout { .. }));
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let locks = InMemoryLockService::new();
        let stale = locks
            .acquire("k", Duration::from_millis(50), Duration::ZERO)
            .await
            .unwrap();

        let fresh = locks
            .acquire("k", Duration::from_millis(100), Duration::from_secs(10))
            .await
            .unwrap();
        assert_ne!(stale.token, fresh.token);

        // Releasing the stale lease must not free the new holder's lock.
        assert!(locks.release(&stale).await.is_err());
        let contender = locks
            .acquire("k", Duration::from_millis(50), Duration::from_secs(10))
            .await;
        assert!(contender.is_err());
    }

    #[tokio::test]
    async fn waiting_acquirer_succeeds_after_release() {
        let locks = InMemoryLockService::new();
        let lease = locks
            .acquire("k", Duration::from_millis(50), Duration::from_secs(10))
            .await
            .unwrap();

        let locks_clone = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            locks_clone
                .acquire("k", Duration::from_secs(2), Duration::from_secs(10))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        locks.release(&lease).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[test]
    fn lock_key_layout() {
        assert_eq!(lock_key("proj", "insert_blob", "u1"), "lock::proj::insert_blob::u1");
    }
}
