use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use plansync_core::{
    ExternalLink, NodeId, NodeLevel, NodeState, PlanNode, PlatformId, RemoteId, RemoteKind,
    ScopeId,
};

use crate::{
    AdapterError, CreateItemRequest, PlatformAdapter, RemoteItem, RemoteRelease, SearchQuery,
    SourceAdapter, UpdateItemRequest,
};

/// Bare hierarchy node for tests; callers adjust fields after construction.
pub fn node(id: &str, level: NodeLevel, name: &str) -> PlanNode {
    PlanNode {
        id: NodeId::from(id),
        level,
        name: name.to_owned(),
        description: String::new(),
        parent_id: None,
        target_date: None,
        state: NodeState::Open,
        sort_key: 0.0,
        updated_at: Utc::now(),
        links: Vec::new(),
    }
}

pub fn child_node(id: &str, level: NodeLevel, name: &str, parent: &str) -> PlanNode {
    let mut built = node(id, level, name);
    built.parent_id = Some(NodeId::from(parent));
    built
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    HealthCheck,
    Search { scope: ScopeId, query: SearchQuery },
    Get { remote_id: RemoteId },
    Create { scope: ScopeId, title: String },
    Update { remote_id: RemoteId },
    LinkChild { parent: RemoteId, child: RemoteId, kind: RemoteKind },
    ListReleases { scope: ScopeId },
}

impl RecordedCall {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::Search { .. } => "search",
            Self::Get { .. } => "get",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::LinkChild { .. } => "link_child",
            Self::ListReleases { .. } => "list_releases",
        }
    }
}

#[derive(Default)]
struct PlatformState {
    items: BTreeMap<RemoteId, (ScopeId, RemoteItem)>,
    releases: Vec<(ScopeId, RemoteRelease)>,
}

/// Reference implementation of the platform contract, backed by in-process
/// state. Records every call, counts successful writes, and supports scripted
/// failures and artificial latency for resilience tests.
pub struct InMemoryPlatform {
    platform: PlatformId,
    id_prefix: String,
    kinds: BTreeMap<NodeLevel, RemoteKind>,
    state: Mutex<PlatformState>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_queue: Mutex<VecDeque<AdapterError>>,
    op_failures: Mutex<BTreeMap<&'static str, VecDeque<AdapterError>>>,
    offline_reason: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryPlatform {
    pub fn with_kinds(
        platform: &str,
        id_prefix: &str,
        kinds: BTreeMap<NodeLevel, RemoteKind>,
    ) -> Self {
        Self {
            platform: PlatformId::from(platform),
            id_prefix: id_prefix.to_owned(),
            kinds,
            state: Mutex::new(PlatformState::default()),
            calls: Mutex::new(Vec::new()),
            fail_queue: Mutex::new(VecDeque::new()),
            op_failures: Mutex::new(BTreeMap::new()),
            offline_reason: Mutex::new(None),
            latency: Mutex::new(None),
            next_id: AtomicU64::new(1),
            writes: AtomicU64::new(0),
        }
    }

    /// Tracker-style platform mirroring projects as epics and milestones as
    /// tasks, with release support.
    pub fn tracking(platform: &str, id_prefix: &str) -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(NodeLevel::Project, RemoteKind::Epic);
        kinds.insert(NodeLevel::Milestone, RemoteKind::Task);
        kinds.insert(NodeLevel::Issue, RemoteKind::Issue);
        Self::with_kinds(platform, id_prefix, kinds)
    }

    /// Issue-tracker-style platform that only mirrors milestone-level nodes.
    pub fn issues_only(platform: &str, id_prefix: &str) -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(NodeLevel::Milestone, RemoteKind::Issue);
        Self::with_kinds(platform, id_prefix, kinds)
    }

    pub fn seed_item(&self, scope: &ScopeId, item: RemoteItem) -> RemoteId {
        let remote_id = item.remote_id.clone();
        let mut state = self.state.lock().expect("platform state lock");
        state.items.insert(remote_id.clone(), (scope.clone(), item));
        remote_id
    }

    pub fn seed_release(&self, scope: &ScopeId, release: RemoteRelease) {
        let mut state = self.state.lock().expect("platform state lock");
        state.releases.push((scope.clone(), release));
    }

    pub fn item(&self, remote_id: &RemoteId) -> Option<RemoteItem> {
        let state = self.state.lock().expect("platform state lock");
        state.items.get(remote_id).map(|(_, item)| item.clone())
    }

    pub fn items_in_scope(&self, scope: &ScopeId) -> Vec<RemoteItem> {
        let state = self.state.lock().expect("platform state lock");
        state
            .items
            .values()
            .filter(|(item_scope, _)| item_scope == scope)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn remove_item(&self, remote_id: &RemoteId) {
        let mut state = self.state.lock().expect("platform state lock");
        state.items.remove(remote_id);
    }

    pub fn set_item_title(&self, remote_id: &RemoteId, title: &str) {
        let mut state = self.state.lock().expect("platform state lock");
        if let Some((_, item)) = state.items.get_mut(remote_id) {
            item.title = title.to_owned();
        }
    }

    pub fn set_item_body(&self, remote_id: &RemoteId, body: &str) {
        let mut state = self.state.lock().expect("platform state lock");
        if let Some((_, item)) = state.items.get_mut(remote_id) {
            item.body = body.to_owned();
        }
    }

    pub fn set_item_date(&self, remote_id: &RemoteId, date: Option<NaiveDate>) {
        let mut state = self.state.lock().expect("platform state lock");
        if let Some((_, item)) = state.items.get_mut(remote_id) {
            item.target_date = date;
        }
    }

    pub fn push_failure(&self, error: AdapterError) {
        self.fail_queue
            .lock()
            .expect("failure queue lock")
            .push_back(error);
    }

    /// Scripts a failure for the next call of one specific operation, leaving
    /// every other operation untouched.
    pub fn push_failure_for(&self, operation: &'static str, error: AdapterError) {
        self.op_failures
            .lock()
            .expect("failure queue lock")
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn set_offline(&self, reason: Option<&str>) {
        *self.offline_reason.lock().expect("offline flag lock") = reason.map(str::to_owned);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().expect("latency lock") = latency;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("call log lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("call log lock").len()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: RecordedCall) -> Result<(), AdapterError> {
        let latency = *self.latency.lock().expect("latency lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let operation = call.operation();
        self.calls.lock().expect("call log lock").push(call);
        let scripted = self
            .op_failures
            .lock()
            .expect("failure queue lock")
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }
        if let Some(error) = self
            .fail_queue
            .lock()
            .expect("failure queue lock")
            .pop_front()
        {
            return Err(error);
        }
        if let Some(reason) = self.offline_reason.lock().expect("offline flag lock").clone() {
            return Err(AdapterError::Transient(reason));
        }
        Ok(())
    }

    fn loose_name_match(item_title: &str, query_name: &str) -> bool {
        let item_name = plansync_core::normalize_name(plansync_core::title_name(item_title));
        let query_name = plansync_core::normalize_name(query_name);
        if item_name.is_empty() || query_name.is_empty() {
            return false;
        }
        item_name.contains(&query_name) || query_name.contains(&item_name)
    }
}

#[async_trait]
impl PlatformAdapter for InMemoryPlatform {
    fn platform(&self) -> PlatformId {
        self.platform.clone()
    }

    fn kind_for(&self, level: NodeLevel) -> Option<RemoteKind> {
        self.kinds.get(&level).copied()
    }

    fn canonical_reference(&self, remote_id: &RemoteId) -> String {
        format!("{}://{}", self.platform.as_str(), remote_id.as_str())
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        self.enter(RecordedCall::HealthCheck).await
    }

    async fn search(
        &self,
        scope: &ScopeId,
        query: &SearchQuery,
    ) -> Result<Vec<RemoteItem>, AdapterError> {
        self.enter(RecordedCall::Search {
            scope: scope.clone(),
            query: query.clone(),
        })
        .await?;

        let state = self.state.lock().expect("platform state lock");
        let candidates = state
            .items
            .values()
            .filter(|(item_scope, _)| item_scope == scope)
            .map(|(_, item)| item)
            .filter(|item| item.kind == query.kind)
            .filter(|item| match &query.parent {
                Some(parent) => item.parent.as_ref() == Some(parent),
                None => true,
            })
            .filter(|item| {
                let by_name = Self::loose_name_match(&item.title, &query.name);
                let by_ref = query
                    .source_ref
                    .as_deref()
                    .map(|source_ref| item.body.contains(source_ref))
                    .unwrap_or(false);
                by_name || by_ref
            })
            .cloned()
            .collect();
        Ok(candidates)
    }

    async fn get(&self, remote_id: &RemoteId) -> Result<RemoteItem, AdapterError> {
        self.enter(RecordedCall::Get {
            remote_id: remote_id.clone(),
        })
        .await?;

        let state = self.state.lock().expect("platform state lock");
        state
            .items
            .get(remote_id)
            .map(|(_, item)| item.clone())
            .ok_or_else(|| AdapterError::NotFound(remote_id.as_str().to_owned()))
    }

    async fn create(
        &self,
        scope: &ScopeId,
        request: CreateItemRequest,
    ) -> Result<RemoteId, AdapterError> {
        self.enter(RecordedCall::Create {
            scope: scope.clone(),
            title: request.title.clone(),
        })
        .await?;

        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst);
        let remote_id = RemoteId::from(format!("{}-{sequence}", self.id_prefix));
        let item = RemoteItem {
            remote_id: remote_id.clone(),
            kind: request.kind,
            title: request.title,
            body: request.body,
            target_date: request.target_date,
            parent: request.parent,
            release: None,
        };
        let mut state = self.state.lock().expect("platform state lock");
        state.items.insert(remote_id.clone(), (scope.clone(), item));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(remote_id)
    }

    async fn update(
        &self,
        remote_id: &RemoteId,
        request: UpdateItemRequest,
    ) -> Result<(), AdapterError> {
        self.enter(RecordedCall::Update {
            remote_id: remote_id.clone(),
        })
        .await?;

        let mut state = self.state.lock().expect("platform state lock");
        let (_, item) = state
            .items
            .get_mut(remote_id)
            .ok_or_else(|| AdapterError::NotFound(remote_id.as_str().to_owned()))?;
        if let Some(title) = request.title {
            item.title = title;
        }
        if let Some(body) = request.body {
            item.body = body;
        }
        if let Some(target_date) = request.target_date {
            item.target_date = target_date;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn link_child(
        &self,
        parent: &RemoteId,
        child: &RemoteId,
        kind: RemoteKind,
    ) -> Result<(), AdapterError> {
        self.enter(RecordedCall::LinkChild {
            parent: parent.clone(),
            child: child.clone(),
            kind,
        })
        .await?;

        let mut state = self.state.lock().expect("platform state lock");
        let parent_is_release = state
            .releases
            .iter()
            .any(|(_, release)| &release.remote_id == parent);
        if !parent_is_release && !state.items.contains_key(parent) {
            return Err(AdapterError::NotFound(parent.as_str().to_owned()));
        }
        let (_, item) = state
            .items
            .get_mut(child)
            .ok_or_else(|| AdapterError::NotFound(child.as_str().to_owned()))?;
        if kind == RemoteKind::Release {
            item.release = Some(parent.clone());
        } else {
            item.parent = Some(parent.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_releases(&self, scope: &ScopeId) -> Result<Vec<RemoteRelease>, AdapterError> {
        self.enter(RecordedCall::ListReleases {
            scope: scope.clone(),
        })
        .await?;

        let state = self.state.lock().expect("platform state lock");
        Ok(state
            .releases
            .iter()
            .filter(|(release_scope, _)| release_scope == scope)
            .map(|(_, release)| release.clone())
            .collect())
    }
}

/// In-process source of truth: per-scope node sets, recorded link write-backs,
/// and a toggle to simulate the source being unreachable.
pub struct InMemorySource {
    platform: PlatformId,
    nodes: Mutex<BTreeMap<ScopeId, Vec<PlanNode>>>,
    recorded_links: Mutex<Vec<(NodeId, ExternalLink)>>,
    offline_reason: Mutex<Option<String>>,
}

impl InMemorySource {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: PlatformId::from(platform),
            nodes: Mutex::new(BTreeMap::new()),
            recorded_links: Mutex::new(Vec::new()),
            offline_reason: Mutex::new(None),
        }
    }

    pub fn set_nodes(&self, scope: &ScopeId, nodes: Vec<PlanNode>) {
        self.nodes
            .lock()
            .expect("source nodes lock")
            .insert(scope.clone(), nodes);
    }

    pub fn node(&self, scope: &ScopeId, node_id: &NodeId) -> Option<PlanNode> {
        let nodes = self.nodes.lock().expect("source nodes lock");
        nodes
            .get(scope)?
            .iter()
            .find(|node| &node.id == node_id)
            .cloned()
    }

    pub fn set_offline(&self, reason: Option<&str>) {
        *self.offline_reason.lock().expect("offline flag lock") = reason.map(str::to_owned);
    }

    pub fn recorded_links(&self) -> Vec<(NodeId, ExternalLink)> {
        self.recorded_links.lock().expect("recorded links lock").clone()
    }
}

#[async_trait]
impl SourceAdapter for InMemorySource {
    fn platform(&self) -> PlatformId {
        self.platform.clone()
    }

    fn canonical_reference(&self, node_id: &NodeId) -> String {
        format!("{}://{}", self.platform.as_str(), node_id.as_str())
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        match self.offline_reason.lock().expect("offline flag lock").clone() {
            Some(reason) => Err(AdapterError::Transient(reason)),
            None => Ok(()),
        }
    }

    async fn fetch_hierarchy(&self, scope: &ScopeId) -> Result<Vec<PlanNode>, AdapterError> {
        if let Some(reason) = self.offline_reason.lock().expect("offline flag lock").clone() {
            return Err(AdapterError::Transient(reason));
        }
        let nodes = self.nodes.lock().expect("source nodes lock");
        Ok(nodes.get(scope).cloned().unwrap_or_default())
    }

    async fn record_link(
        &self,
        node_id: &NodeId,
        link: &ExternalLink,
    ) -> Result<(), AdapterError> {
        if let Some(reason) = self.offline_reason.lock().expect("offline flag lock").clone() {
            return Err(AdapterError::Transient(reason));
        }
        let mut nodes = self.nodes.lock().expect("source nodes lock");
        let node = nodes
            .values_mut()
            .flat_map(|scope_nodes| scope_nodes.iter_mut())
            .find(|node| &node.id == node_id)
            .ok_or_else(|| AdapterError::NotFound(node_id.as_str().to_owned()))?;
        node.links.retain(|existing| {
            !(existing.platform == link.platform && existing.remote_kind == link.remote_kind)
        });
        node.links.push(link.clone());
        self.recorded_links
            .lock()
            .expect("recorded links lock")
            .push((node_id.clone(), link.clone()));
        Ok(())
    }
}
