//! Bounded exponential backoff around an object store.
//!
//! Only [`StoreError::Unavailable`] is retried. `NotFound` and `InvalidPath`
//! are answers, not transient faults. Each call completes (or exhausts its
//! attempts) before returning, so callers that await puts in sequence keep
//! their write ordering.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::storage::{ObjectMetadata, ObjectStore, PathStream, StoreError, StoreResult};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::exponential(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(31);
        let scaled = self.base_delay.as_millis().saturating_mul(1u128 << shift);
        let raw = Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64);
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let jitter = self.jitter_fraction.min(1.0);
        let factor = rand::rng().random_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
        Duration::from_millis((bounded.as_millis() as f64 * factor).round().max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_jitter(0.2)
    }
}

/// Store decorator that retries transient failures of the inner store.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ObjectStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<'a, T, F, Fut>(&'a self, op: &str, path: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut(&'a S) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call(&self.inner).await {
                Err(StoreError::Unavailable(detail)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Store {} on {} failed (attempt {}/{}): {}; retrying in {:?}",
                        op,
                        path,
                        attempt,
                        self.policy.max_attempts,
                        detail,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
        content_type: &str,
    ) -> StoreResult<()> {
        self.retry("put", path, |inner| {
            inner.put(path, body.clone(), metadata.clone(), content_type)
        })
        .await
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.retry("get", path, |inner| inner.get(path)).await
    }

    async fn get_metadata(&self, path: &str) -> StoreResult<ObjectMetadata> {
        self.retry("get_metadata", path, |inner| inner.get_metadata(path))
            .await
    }

    async fn content_type(&self, path: &str) -> StoreResult<String> {
        self.retry("content_type", path, |inner| inner.content_type(path))
            .await
    }

    fn list(&self, prefix: &str) -> PathStream {
        // A listing cannot be restarted without repeating paths.
        self.inner.list(prefix)
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.retry("exists", path, |inner| inner.exists(path)).await
    }

    async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()> {
        self.retry("ensure_namespace", namespace, |inner| {
            inner.ensure_namespace(namespace)
        })
        .await
    }
}
