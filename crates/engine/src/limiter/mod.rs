//! Rate-limited request executor for outbound provider calls.
//!
//! Every call to an external platform goes through [`RequestExecutor`],
//! which guarantees a (tenant, provider) pair never exceeds that provider's
//! requests-per-minute quota and recovers automatically from transient
//! faults (429, timeout, connection reset, DNS).
//!
//! Limiters are created lazily on first use and evicted after an idle
//! period, so tenants that stop syncing do not leak limiter state.

mod reservoir;

use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, error, warn};

use storebridge_core::{Provider, TenantId};

use crate::config::LimiterConfig;
use crate::models::Store;
use crate::providers::ProviderError;

pub use reservoir::StoreLimiter;

/// Cache key for the limiter registry. Limiter state is exclusively owned
/// by its (tenant, provider) pair and never shared across tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub tenant_id: TenantId,
    pub provider: Provider,
}

/// Executes outbound provider calls under per-store rate limits with
/// bounded retry.
///
/// Retry policy: on a retryable fault the executor drains the remaining
/// reservoir tokens (so nothing else escapes during the cooldown), sleeps
/// `attempt * base` (linear, base 10s by default), refunds exactly one token
/// for the retried call, and tries again, up to the attempt budget. After
/// the final attempt the error propagates to the caller. Non-retryable
/// errors propagate immediately.
pub struct RequestExecutor {
    limiters: Cache<LimiterKey, Arc<StoreLimiter>>,
    config: LimiterConfig,
}

impl RequestExecutor {
    /// Create an executor with the given limits.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let limiters = Cache::builder()
            .time_to_idle(config.idle_eviction)
            .build();
        Self { limiters, config }
    }

    /// The limiter for a store, created race-free on first use.
    pub async fn limiter_for(&self, tenant_id: TenantId, provider: Provider) -> Arc<StoreLimiter> {
        let key = LimiterKey {
            tenant_id,
            provider,
        };
        self.limiters
            .get_with(key, async {
                Arc::new(StoreLimiter::new(
                    self.config.per_minute(provider),
                    self.config.concurrency,
                ))
            })
            .await
    }

    /// Run one logical provider call with rate limiting and bounded retry.
    ///
    /// The operation closure is invoked once per attempt; it must build a
    /// fresh request each time.
    ///
    /// # Errors
    ///
    /// Returns the last error once the attempt budget is exhausted, or the
    /// first non-retryable error immediately.
    pub async fn execute<T, F, Fut>(&self, store: &Store, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let limiter = self.limiter_for(store.tenant_id, store.provider).await;
        let mut attempt: u32 = 0;

        loop {
            let result = {
                // Permit held only for the duration of the call itself.
                let _permit = limiter
                    .concurrency()
                    .acquire()
                    .await
                    .expect("limiter semaphore is never closed");
                limiter.acquire().await;
                op().await
            };

            match result {
                Ok(value) => {
                    debug!(
                        tenant_id = %store.tenant_id,
                        store_id = %store.id,
                        provider = %store.provider,
                        attempts = attempt + 1,
                        "provider call succeeded"
                    );
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        error!(
                            tenant_id = %store.tenant_id,
                            store_id = %store.id,
                            provider = %store.provider,
                            attempts = attempt,
                            error = %err,
                            "provider call failed, attempt budget exhausted"
                        );
                        return Err(err);
                    }

                    let backoff = self.config.backoff_base * attempt;
                    warn!(
                        tenant_id = %store.tenant_id,
                        store_id = %store.id,
                        provider = %store.provider,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "retryable provider fault, backing off"
                    );
                    limiter.drain().await;
                    tokio::time::sleep(backoff).await;
                    limiter.refund_one().await;
                }
                Err(err) => {
                    error!(
                        tenant_id = %store.tenant_id,
                        store_id = %store.id,
                        provider = %store.provider,
                        error = %err,
                        "provider call failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use secrecy::SecretString;
    use tokio::time::Instant;

    use storebridge_core::{StoreId, SyncStatus};

    use super::*;

    fn test_store(provider: Provider) -> Store {
        Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider,
            credentials: SecretString::from("{}"),
            active: true,
            sync_status: SyncStatus::Pending,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_config() -> LimiterConfig {
        LimiterConfig {
            shopify_per_minute: 40,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_respected_within_window() {
        let executor = RequestExecutor::new(test_config());
        let store = test_store(Provider::Shopify);

        let start = Instant::now();
        for _ in 0..40 {
            executor
                .execute(&store, || async { Ok::<_, ProviderError>(()) })
                .await
                .expect("call");
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Call #41 waits for the next refill window.
        executor
            .execute(&store, || async { Ok::<_, ProviderError>(()) })
            .await
            .expect("call");
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_on_rate_limit() {
        let executor = RequestExecutor::new(test_config());
        let store = test_store(Provider::Shopify);
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        executor
            .execute(&store, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::RateLimited { retry_after: None })
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        // Attempt 1 fails -> ~10s wait, attempt 2 fails -> ~20s wait.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_exhausted() {
        let executor = RequestExecutor::new(test_config());
        let store = test_store(Provider::WooCommerce);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(&store, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::Timeout) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, ProviderError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_immediately() {
        let executor = RequestExecutor::new(test_config());
        let store = test_store(Provider::EasyOrder);
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let err = executor
            .execute(&store, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ProviderError::Remote {
                        status: 422,
                        message: "invalid payload".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(err, ProviderError::Remote { status: 422, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiters_are_isolated_per_tenant() {
        let executor = RequestExecutor::new(test_config());
        let store_a = test_store(Provider::Shopify);
        let store_b = test_store(Provider::Shopify);

        let start = Instant::now();
        for _ in 0..40 {
            executor
                .execute(&store_a, || async { Ok::<_, ProviderError>(()) })
                .await
                .expect("call");
        }
        // Tenant B still has a full reservoir.
        executor
            .execute(&store_b, || async { Ok::<_, ProviderError>(()) })
            .await
            .expect("call");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
