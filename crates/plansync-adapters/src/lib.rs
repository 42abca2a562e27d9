use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use plansync_core::{
    ExternalLink, NodeId, NodeLevel, PlanNode, PlatformId, RemoteId, RemoteKind, ScopeId,
    SyncError, normalize_name,
};

pub mod limits;
pub mod retry;
pub mod test_support;

pub use limits::GovernedPlatform;
pub use retry::RetryPolicy;

/// Typed failure classes a platform call can produce. `Transient` and
/// `RateLimited` are retryable; the rest are terminal for the call.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("remote entity not found: {0}")]
    NotFound(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transient platform failure: {0}")]
    Transient(String),
    #[error("rejected by platform validation: {0}")]
    Invalid(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Transient(_) | AdapterError::RateLimited { .. }
        )
    }

    /// True when the failure means the platform as a whole should be skipped
    /// for the rest of the run, as opposed to a single-call outcome.
    pub fn is_platform_outage(&self) -> bool {
        matches!(
            self,
            AdapterError::Transient(_)
                | AdapterError::RateLimited { .. }
                | AdapterError::Unauthorized(_)
        )
    }
}

pub fn platform_unavailable(platform: &PlatformId, error: &AdapterError) -> SyncError {
    SyncError::PlatformUnavailable {
        platform: platform.as_str().to_owned(),
        reason: error.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub remote_id: RemoteId,
    pub kind: RemoteKind,
    pub title: String,
    pub body: String,
    pub target_date: Option<NaiveDate>,
    pub parent: Option<RemoteId>,
    pub release: Option<RemoteId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRelease {
    pub remote_id: RemoteId,
    pub name: String,
    pub target_date: Option<NaiveDate>,
}

/// Hint passed to `search`. `name` narrows by title; `source_ref` lets a
/// platform also surface items that embed the node's canonical source
/// reference in their body, so renamed items still come back as candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub kind: RemoteKind,
    pub name: String,
    pub source_ref: Option<String>,
    pub parent: Option<RemoteId>,
}

impl SearchQuery {
    /// Stable text form used as the per-run cache key component.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind.as_key(),
            normalize_name(&self.name),
            self.source_ref.as_deref().unwrap_or(""),
            self.parent
                .as_ref()
                .map(|parent| parent.as_str())
                .unwrap_or(""),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub kind: RemoteKind,
    pub title: String,
    pub body: String,
    pub target_date: Option<NaiveDate>,
    pub parent: Option<RemoteId>,
}

/// Structural fields an update may touch. `None` leaves a field alone; the
/// absence of downstream-owned fields here is what keeps reconciliation from
/// ever clobbering assignees, workflow state, or comments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub target_date: Option<Option<NaiveDate>>,
}

impl UpdateItemRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.target_date.is_none()
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Remote kind mirroring the given hierarchy level on this platform, or
    /// `None` when the platform does not mirror that level.
    fn kind_for(&self, level: NodeLevel) -> Option<RemoteKind>;

    /// The platform's canonical link format for a remote id, embedded in
    /// reverse-reference lines on other platforms.
    fn canonical_reference(&self, remote_id: &RemoteId) -> String;

    async fn health_check(&self) -> Result<(), AdapterError>;

    async fn search(
        &self,
        scope: &ScopeId,
        query: &SearchQuery,
    ) -> Result<Vec<RemoteItem>, AdapterError>;

    async fn get(&self, remote_id: &RemoteId) -> Result<RemoteItem, AdapterError>;

    async fn create(
        &self,
        scope: &ScopeId,
        request: CreateItemRequest,
    ) -> Result<RemoteId, AdapterError>;

    async fn update(
        &self,
        remote_id: &RemoteId,
        request: UpdateItemRequest,
    ) -> Result<(), AdapterError>;

    async fn link_child(
        &self,
        parent: &RemoteId,
        child: &RemoteId,
        kind: RemoteKind,
    ) -> Result<(), AdapterError>;

    /// Platforms without a release concept keep the default empty answer.
    async fn list_releases(&self, scope: &ScopeId) -> Result<Vec<RemoteRelease>, AdapterError> {
        let _ = scope;
        Ok(Vec::new())
    }
}

#[async_trait]
impl<A: PlatformAdapter + ?Sized> PlatformAdapter for Arc<A> {
    fn platform(&self) -> PlatformId {
        (**self).platform()
    }

    fn kind_for(&self, level: NodeLevel) -> Option<RemoteKind> {
        (**self).kind_for(level)
    }

    fn canonical_reference(&self, remote_id: &RemoteId) -> String {
        (**self).canonical_reference(remote_id)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        (**self).health_check().await
    }

    async fn search(
        &self,
        scope: &ScopeId,
        query: &SearchQuery,
    ) -> Result<Vec<RemoteItem>, AdapterError> {
        (**self).search(scope, query).await
    }

    async fn get(&self, remote_id: &RemoteId) -> Result<RemoteItem, AdapterError> {
        (**self).get(remote_id).await
    }

    async fn create(
        &self,
        scope: &ScopeId,
        request: CreateItemRequest,
    ) -> Result<RemoteId, AdapterError> {
        (**self).create(scope, request).await
    }

    async fn update(
        &self,
        remote_id: &RemoteId,
        request: UpdateItemRequest,
    ) -> Result<(), AdapterError> {
        (**self).update(remote_id, request).await
    }

    async fn link_child(
        &self,
        parent: &RemoteId,
        child: &RemoteId,
        kind: RemoteKind,
    ) -> Result<(), AdapterError> {
        (**self).link_child(parent, child, kind).await
    }

    async fn list_releases(&self, scope: &ScopeId) -> Result<Vec<RemoteRelease>, AdapterError> {
        (**self).list_releases(scope).await
    }
}

/// The authoritative upstream side. The engine never writes structural fields
/// here; `record_link` is the one write-back, persisting a newly created
/// downstream counterpart on its node.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> PlatformId;

    fn canonical_reference(&self, node_id: &NodeId) -> String;

    async fn health_check(&self) -> Result<(), AdapterError>;

    /// Full hierarchy subtree for a scope, every node carrying its recorded
    /// external links. Order is not significant; parents are resolved by id.
    async fn fetch_hierarchy(&self, scope: &ScopeId) -> Result<Vec<PlanNode>, AdapterError>;

    async fn record_link(
        &self,
        node_id: &NodeId,
        link: &ExternalLink,
    ) -> Result<(), AdapterError>;
}

/// Fetches the hierarchy, mapping any source failure to the fatal
/// `SourceUnavailable` class.
pub async fn fetch_hierarchy(
    source: &dyn SourceAdapter,
    scope: &ScopeId,
) -> Result<Vec<PlanNode>, SyncError> {
    source
        .fetch_hierarchy(scope)
        .await
        .map_err(|err| SyncError::SourceUnavailable(err.to_string()))
}
