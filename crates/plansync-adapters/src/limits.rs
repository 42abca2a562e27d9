use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use plansync_core::{NodeLevel, PlatformId, RemoteId, RemoteKind, ScopeId};

use crate::retry::RetryPolicy;
use crate::{
    AdapterError, CreateItemRequest, PlatformAdapter, RemoteItem, RemoteRelease, SearchQuery,
    UpdateItemRequest,
};

type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AdapterError>> + Send + 'a>>;

/// Decorates a platform adapter with the run's resource rules: a permit
/// semaphore bounding in-flight calls, a per-call timeout, and retry with
/// exponential backoff. Permits are held only for the duration of a single
/// attempt, never across a backoff sleep.
pub struct GovernedPlatform<A> {
    inner: A,
    platform: PlatformId,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl<A: PlatformAdapter> GovernedPlatform<A> {
    pub fn new(inner: A, max_in_flight: usize, call_timeout: Duration, retry: RetryPolicy) -> Self {
        let platform = inner.platform();
        Self {
            inner,
            platform,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            call_timeout,
            retry,
        }
    }

    async fn governed<'a, T: Send>(
        &self,
        operation: &'static str,
        make_call: impl Fn() -> AdapterFuture<'a, T> + Send + Sync,
    ) -> Result<T, AdapterError> {
        let mut attempt: u32 = 1;
        loop {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| AdapterError::Transient("platform permit pool closed".to_owned()))?;
            let outcome = match tokio::time::timeout(self.call_timeout, make_call()).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Transient(format!(
                    "{operation} timed out after {}ms",
                    self.call_timeout.as_millis()
                ))),
            };
            drop(permit);

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if self.retry.should_retry(&error, attempt) => {
                    let delay = self.retry.delay_for(&error, attempt);
                    tracing::warn!(
                        platform = self.platform.as_str(),
                        operation,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "platform call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl<A: PlatformAdapter> PlatformAdapter for GovernedPlatform<A> {
    fn platform(&self) -> PlatformId {
        self.platform.clone()
    }

    fn kind_for(&self, level: NodeLevel) -> Option<RemoteKind> {
        self.inner.kind_for(level)
    }

    fn canonical_reference(&self, remote_id: &RemoteId) -> String {
        self.inner.canonical_reference(remote_id)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        self.governed("health_check", || self.inner.health_check())
            .await
    }

    async fn search(
        &self,
        scope: &ScopeId,
        query: &SearchQuery,
    ) -> Result<Vec<RemoteItem>, AdapterError> {
        self.governed("search", || self.inner.search(scope, query))
            .await
    }

    async fn get(&self, remote_id: &RemoteId) -> Result<RemoteItem, AdapterError> {
        self.governed("get", || self.inner.get(remote_id)).await
    }

    async fn create(
        &self,
        scope: &ScopeId,
        request: CreateItemRequest,
    ) -> Result<RemoteId, AdapterError> {
        self.governed("create", || self.inner.create(scope, request.clone()))
            .await
    }

    async fn update(
        &self,
        remote_id: &RemoteId,
        request: UpdateItemRequest,
    ) -> Result<(), AdapterError> {
        self.governed("update", || self.inner.update(remote_id, request.clone()))
            .await
    }

    async fn link_child(
        &self,
        parent: &RemoteId,
        child: &RemoteId,
        kind: RemoteKind,
    ) -> Result<(), AdapterError> {
        self.governed("link_child", || self.inner.link_child(parent, child, kind))
            .await
    }

    async fn list_releases(&self, scope: &ScopeId) -> Result<Vec<RemoteRelease>, AdapterError> {
        self.governed("list_releases", || self.inner.list_releases(scope))
            .await
    }
}
