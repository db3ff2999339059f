//! Replay guard for signed requests.

use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::model::unix_now;
use crate::store::{NonceRepository, StoreError};

/// Consumes nonces through the store's atomic insert-if-absent.
#[derive(Clone)]
pub struct NonceGuard {
    store: Arc<dyn NonceRepository>,
}

impl NonceGuard {
    pub fn new(store: Arc<dyn NonceRepository>) -> Self {
        Self { store }
    }

    /// Consume `nonce`. Only the first caller for a given value succeeds.
    pub async fn validate(&self, nonce: &str) -> GatewayResult<()> {
        match self.store.insert_unique(nonce, unix_now()).await {
            Ok(()) => Ok(()),
            Err(StoreError::Duplicate(_)) => Err(GatewayError::authentication("duplicate nonce")),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop nonces older than `ttl_secs`. Runs from the housekeeping task.
    pub async fn purge_expired(&self, ttl_secs: u64) -> GatewayResult<usize> {
        let cutoff = unix_now() - ttl_secs as i64;
        Ok(self.store.purge_before(cutoff).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn concurrent_consumers_get_one_winner() {
        let guard = NonceGuard::new(Arc::new(MemoryStore::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move { guard.validate("abc123").await }));
        }

        let mut ok = 0;
        let mut duplicate = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(GatewayError::Authentication(msg)) => {
                    assert!(msg.contains("duplicate"));
                    duplicate += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicate, 7);
    }
}
