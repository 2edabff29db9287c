//! Per-identity serialization of message processing.
//!
//! Two deliveries for the same identity never run the pipeline concurrently.
//! With Redis configured the lease is shared by every replica; otherwise a
//! keyed in-process mutex is used. The conversation `version` check in
//! [`super::store`] still guards the write if a lease expires mid-turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

const KEY_PREFIX: &str = "recruiter:identity-lock:";
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("timed out waiting for lock on {0}")]
    Timeout(String),
}

/// Proof of holding an identity's lock. Hand it back to [`IdentityLock::release`].
pub enum IdentityLease {
    Redis { key: String, token: String },
    Local { identity: String, guard: OwnedMutexGuard<()> },
}

#[async_trait]
pub trait IdentityLock: Send + Sync {
    /// Waits for the identity to be free, up to the implementation's limit.
    async fn acquire(&self, identity: &str) -> Result<IdentityLease, LockError>;

    /// Never fails; an undeliverable release is logged and left to expire.
    async fn release(&self, lease: IdentityLease);
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

pub struct RedisIdentityLock {
    connection: MultiplexedConnection,
    lease_ttl: Duration,
    max_wait: Duration,
}

impl RedisIdentityLock {
    pub async fn connect(
        redis_url: &str,
        lease_ttl: Duration,
        max_wait: Duration,
    ) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            connection,
            lease_ttl,
            max_wait,
        })
    }

    async fn try_set(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.lease_ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl IdentityLock for RedisIdentityLock {
    async fn acquire(&self, identity: &str) -> Result<IdentityLease, LockError> {
        let key = format!("{KEY_PREFIX}{identity}");
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.max_wait;

        loop {
            if self.try_set(&key, &token).await? {
                return Ok(IdentityLease::Redis { key, token });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockError::Timeout(identity.to_string()));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release(&self, lease: IdentityLease) {
        let IdentityLease::Redis { key, token } = lease else {
            return;
        };
        let mut conn = self.connection.clone();
        let released: redis::RedisResult<i32> = redis::Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await;
        match released {
            Ok(1) => {}
            Ok(_) => warn!(key, "identity lease expired before release"),
            Err(e) => warn!(key, "failed to release identity lease: {e}"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process
// ────────────────────────────────────────────────────────────────────────────

/// Keyed `tokio` mutex for single-replica deployments and tests.
pub struct LocalIdentityLock {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_wait: Duration,
}

impl LocalIdentityLock {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_wait,
        }
    }

    /// Identities currently holding or waiting for a slot.
    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }

    fn slot(&self, identity: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl IdentityLock for LocalIdentityLock {
    async fn acquire(&self, identity: &str) -> Result<IdentityLease, LockError> {
        let slot = self.slot(identity);
        let guard = tokio::time::timeout(self.max_wait, slot.lock_owned())
            .await
            .map_err(|_| LockError::Timeout(identity.to_string()))?;
        Ok(IdentityLease::Local {
            identity: identity.to_string(),
            guard,
        })
    }

    async fn release(&self, lease: IdentityLease) {
        let IdentityLease::Local { identity, guard } = lease else {
            return;
        };
        drop(guard);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map holds the slot once nobody owns or awaits it.
        if slots
            .get(&identity)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&identity);
        }
    }
}
