use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;

use plansync_adapters::{
    AdapterError, CreateItemRequest, PlatformAdapter, RemoteItem, RemoteRelease, SearchQuery,
    SourceAdapter, UpdateItemRequest,
};
use plansync_core::{
    CacheKey, ExternalLink, NodeId, NodeLevel, PlanNode, PlatformId, ReferenceLine, RemoteId,
    RemoteKind, ScopeId, SearchCache, body_contains_reference, body_without_references,
    compose_body, format_title, is_valid_tracking_id, normalize_name, title_name,
    truncate_for_error,
};

use crate::hierarchy::HierarchyStore;
use crate::propagate::PlannedCascade;
use crate::report::{NodeOutcome, NodeReport, PlatformOutcome, PropagatedDate};

enum MatchDecision {
    None,
    One(RemoteItem),
    Many(Vec<RemoteId>),
}

enum SlotOutcome {
    Existing { remote_id: RemoteId, item: RemoteItem },
    Created { remote_id: RemoteId, item: RemoteItem },
    Terminal(NodeOutcome),
}

/// Per-run reconciliation state: the link registry, read caches, and the set
/// of platforms degraded so far. Built fresh for every run and dropped with
/// it; nothing here outlives the run.
///
/// Platforms are ordered tracking-first so the tracking identifier exists by
/// the time other platforms compose their titles.
pub struct Reconciler {
    source: Arc<dyn SourceAdapter>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    tracking: Option<PlatformId>,
    search_cache: SearchCache<Vec<RemoteItem>>,
    release_cache: SearchCache<Vec<RemoteRelease>>,
    links: Mutex<HashMap<(NodeId, PlatformId, RemoteKind), RemoteId>>,
    degraded: Mutex<BTreeSet<PlatformId>>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        mut platforms: Vec<Arc<dyn PlatformAdapter>>,
        tracking: Option<PlatformId>,
        search_ttl: Duration,
    ) -> Self {
        if let Some(tracking) = &tracking {
            if !platforms
                .iter()
                .any(|adapter| &adapter.platform() == tracking)
            {
                tracing::warn!(
                    platform = tracking.as_str(),
                    "tracking platform is not being reconciled, titles will carry no marker"
                );
            }
        }
        platforms.sort_by_key(|adapter| {
            let platform = adapter.platform();
            let is_tracking = Some(&platform) == tracking.as_ref();
            (!is_tracking, platform)
        });
        Self {
            source,
            platforms,
            tracking,
            search_cache: SearchCache::new(search_ttl),
            release_cache: SearchCache::new(search_ttl),
            links: Mutex::new(HashMap::new()),
            degraded: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn platforms(&self) -> &[Arc<dyn PlatformAdapter>] {
        &self.platforms
    }

    /// Loads every link already recorded on the source nodes into the run's
    /// registry, so recorded counterparts resolve without searching.
    pub fn seed_links(&self, store: &HierarchyStore) {
        let mut links = self.links.lock().expect("link registry lock");
        for node in store.traverse() {
            for link in &node.links {
                links.insert(
                    (node.id.clone(), link.platform.clone(), link.remote_kind),
                    link.remote_id.clone(),
                );
            }
        }
    }

    pub fn mark_degraded(&self, platform: &PlatformId) {
        self.degraded
            .lock()
            .expect("degraded set lock")
            .insert(platform.clone());
    }

    pub fn is_degraded(&self, platform: &PlatformId) -> bool {
        self.degraded
            .lock()
            .expect("degraded set lock")
            .contains(platform)
    }

    pub fn degraded_platforms(&self) -> Vec<PlatformId> {
        self.degraded
            .lock()
            .expect("degraded set lock")
            .iter()
            .cloned()
            .collect()
    }

    fn registry_link(
        &self,
        node_id: &NodeId,
        platform: &PlatformId,
        kind: RemoteKind,
    ) -> Option<RemoteId> {
        self.links
            .lock()
            .expect("link registry lock")
            .get(&(node_id.clone(), platform.clone(), kind))
            .cloned()
    }

    fn forget_link(&self, node_id: &NodeId, platform: &PlatformId, kind: RemoteKind) {
        self.links
            .lock()
            .expect("link registry lock")
            .remove(&(node_id.clone(), platform.clone(), kind));
    }

    /// Registers a counterpart in the run registry and records it on the
    /// source of truth. A failed write-back is logged and retried implicitly
    /// next run, when the search adoption path finds the item again.
    async fn adopt_link(
        &self,
        node_id: &NodeId,
        platform: &PlatformId,
        kind: RemoteKind,
        remote_id: &RemoteId,
    ) {
        {
            let mut links = self.links.lock().expect("link registry lock");
            links.insert(
                (node_id.clone(), platform.clone(), kind),
                remote_id.clone(),
            );
        }
        let link = ExternalLink {
            platform: platform.clone(),
            remote_id: remote_id.clone(),
            remote_kind: kind,
        };
        if let Err(error) = self.source.record_link(node_id, &link).await {
            tracing::warn!(
                node = node_id.as_str(),
                platform = platform.as_str(),
                remote = remote_id.as_str(),
                error = %error,
                "failed to record link on the source of truth"
            );
        }
    }

    fn source_reference(&self, node: &PlanNode) -> ReferenceLine {
        ReferenceLine::new(
            self.source.platform(),
            self.source.canonical_reference(&node.id),
        )
    }

    /// Tracking identifier to embed in this node's titles, or `None` when the
    /// tracking platform has no counterpart yet. The tracking platform itself
    /// keeps plain names.
    fn tracking_marker(&self, node: &PlanNode, platform: &PlatformId) -> Option<String> {
        let tracking = self.tracking.as_ref()?;
        if tracking == platform {
            return None;
        }
        let adapter = self
            .platforms
            .iter()
            .find(|adapter| &adapter.platform() == tracking)?;
        let kind = adapter.kind_for(node.level)?;
        let remote_id = self.registry_link(&node.id, tracking, kind)?;
        is_valid_tracking_id(remote_id.as_str()).then(|| remote_id.as_str().to_owned())
    }

    fn desired_title(&self, node: &PlanNode, platform: &PlatformId) -> String {
        format_title(self.tracking_marker(node, platform).as_deref(), &node.name)
    }

    /// The converged body: the description, then the source reference, then
    /// one reference per sibling platform that already has a counterpart.
    fn desired_body(&self, node: &PlanNode, platform: &PlatformId) -> String {
        let mut references = vec![self.source_reference(node)];
        let mut cross = Vec::new();
        for other in &self.platforms {
            let other_platform = other.platform();
            if &other_platform == platform {
                continue;
            }
            let Some(kind) = other.kind_for(node.level) else {
                continue;
            };
            let Some(remote_id) = self.registry_link(&node.id, &other_platform, kind) else {
                continue;
            };
            cross.push(ReferenceLine::new(
                other_platform,
                other.canonical_reference(&remote_id),
            ));
        }
        cross.sort_by(|a, b| a.platform.cmp(&b.platform));
        references.extend(cross);
        compose_body(&body_without_references(&node.description), &references)
    }

    /// Remote id of the nearest ancestor this platform mirrors. Stops at the
    /// first mirrored level: if that ancestor has no counterpart yet, the
    /// child stays parentless until a later run heals it.
    fn parent_remote(
        &self,
        store: &HierarchyStore,
        node: &PlanNode,
        adapter: &dyn PlatformAdapter,
    ) -> Option<RemoteId> {
        let platform = adapter.platform();
        let mut current = store.parent(&node.id);
        let mut hops = 0;
        while let Some(ancestor) = current {
            if let Some(kind) = adapter.kind_for(ancestor.level) {
                return self.registry_link(&ancestor.id, &platform, kind);
            }
            hops += 1;
            if hops > store.len() {
                return None;
            }
            current = store.parent(&ancestor.id);
        }
        None
    }

    async fn find_candidates(
        &self,
        scope: &ScopeId,
        adapter: &dyn PlatformAdapter,
        node: &PlanNode,
        kind: RemoteKind,
        parent: Option<RemoteId>,
    ) -> Result<Vec<RemoteItem>, AdapterError> {
        let query = SearchQuery {
            kind,
            name: node.name.clone(),
            source_ref: Some(self.source.canonical_reference(&node.id)),
            parent,
        };
        let key = CacheKey::new(scope.clone(), adapter.platform(), query.cache_key());
        if let Some(cached) = self.search_cache.get(&key) {
            return Ok(cached);
        }
        let found = adapter.search(scope, &query).await?;
        self.search_cache.put(key, found.clone());
        Ok(found)
    }

    fn failure_outcome(
        &self,
        platform: &PlatformId,
        operation: &'static str,
        node_id: &NodeId,
        error: &AdapterError,
    ) -> NodeOutcome {
        match error {
            AdapterError::Invalid(detail) => {
                tracing::warn!(
                    node = node_id.as_str(),
                    platform = platform.as_str(),
                    operation,
                    detail = detail.as_str(),
                    "platform rejected the payload, skipping this node"
                );
                NodeOutcome::SkippedValidation {
                    detail: truncate_for_error(detail),
                }
            }
            error if error.is_platform_outage() => {
                tracing::warn!(
                    node = node_id.as_str(),
                    platform = platform.as_str(),
                    operation,
                    error = %error,
                    "platform unavailable, skipping it for the rest of the run"
                );
                self.mark_degraded(platform);
                NodeOutcome::SkippedPlatformDown
            }
            error => {
                tracing::warn!(
                    node = node_id.as_str(),
                    platform = platform.as_str(),
                    operation,
                    error = %error,
                    "platform call failed"
                );
                NodeOutcome::Failed {
                    detail: truncate_for_error(&error.to_string()),
                }
            }
        }
    }

    /// Resolves the node's counterpart on one platform: recorded link first,
    /// then the tiered search match, then create. Never writes to an item it
    /// did not create.
    async fn locate_or_create(
        &self,
        scope: &ScopeId,
        store: &HierarchyStore,
        adapter: &dyn PlatformAdapter,
        node: &PlanNode,
        kind: RemoteKind,
    ) -> SlotOutcome {
        let platform = adapter.platform();

        if let Some(remote_id) = self.registry_link(&node.id, &platform, kind) {
            match adapter.get(&remote_id).await {
                Ok(item) => return SlotOutcome::Existing { remote_id, item },
                Err(AdapterError::NotFound(_)) => {
                    tracing::warn!(
                        node = node.id.as_str(),
                        platform = platform.as_str(),
                        remote = remote_id.as_str(),
                        "recorded link is dangling, searching for a replacement"
                    );
                    self.forget_link(&node.id, &platform, kind);
                }
                Err(error) => {
                    return SlotOutcome::Terminal(
                        self.failure_outcome(&platform, "get", &node.id, &error),
                    );
                }
            }
        }

        let parent = self.parent_remote(store, node, adapter);
        let candidates = match self
            .find_candidates(scope, adapter, node, kind, parent.clone())
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                return SlotOutcome::Terminal(
                    self.failure_outcome(&platform, "search", &node.id, &error),
                );
            }
        };

        match select_match(&candidates, &node.name, &self.source_reference(node)) {
            MatchDecision::One(item) => {
                let remote_id = item.remote_id.clone();
                self.adopt_link(&node.id, &platform, kind, &remote_id).await;
                SlotOutcome::Existing { remote_id, item }
            }
            MatchDecision::Many(candidates) => {
                tracing::warn!(
                    node = node.id.as_str(),
                    platform = platform.as_str(),
                    count = candidates.len(),
                    "ambiguous match, leaving the node untouched on this platform"
                );
                SlotOutcome::Terminal(NodeOutcome::Ambiguous { candidates })
            }
            MatchDecision::None => {
                let title = self.desired_title(node, &platform);
                let body = self.desired_body(node, &platform);
                let request = CreateItemRequest {
                    kind,
                    title: title.clone(),
                    body: body.clone(),
                    target_date: node.target_date_value(),
                    parent: parent.clone(),
                };
                match adapter.create(scope, request).await {
                    Ok(remote_id) => {
                        tracing::info!(
                            node = node.id.as_str(),
                            platform = platform.as_str(),
                            remote = remote_id.as_str(),
                            kind = kind.as_key(),
                            "created remote item"
                        );
                        self.search_cache.invalidate_platform(scope, &platform);
                        self.adopt_link(&node.id, &platform, kind, &remote_id).await;
                        let item = RemoteItem {
                            remote_id: remote_id.clone(),
                            kind,
                            title,
                            body,
                            target_date: node.target_date_value(),
                            parent,
                            release: None,
                        };
                        SlotOutcome::Created { remote_id, item }
                    }
                    Err(error) => SlotOutcome::Terminal(
                        self.failure_outcome(&platform, "create", &node.id, &error),
                    ),
                }
            }
        }
    }

    /// Pairs a project with the platform release matching its name, when the
    /// platform has releases and exactly one matches. Skipped once a release
    /// link is recorded.
    async fn associate_release(
        &self,
        scope: &ScopeId,
        adapter: &dyn PlatformAdapter,
        node: &PlanNode,
    ) {
        let platform = adapter.platform();
        if self
            .registry_link(&node.id, &platform, RemoteKind::Release)
            .is_some()
        {
            return;
        }

        let key = CacheKey::new(scope.clone(), platform.clone(), "releases");
        let releases = match self.release_cache.get(&key) {
            Some(releases) => releases,
            None => match adapter.list_releases(scope).await {
                Ok(releases) => {
                    self.release_cache.put(key, releases.clone());
                    releases
                }
                Err(error) => {
                    if error.is_platform_outage() {
                        self.mark_degraded(&platform);
                    }
                    tracing::warn!(
                        platform = platform.as_str(),
                        error = %error,
                        "listing releases failed, leaving the project unassociated"
                    );
                    return;
                }
            },
        };
        if releases.is_empty() {
            return;
        }

        let wanted = normalize_name(&node.name);
        let exact: Vec<&RemoteRelease> = releases
            .iter()
            .filter(|release| normalize_name(&release.name) == wanted)
            .collect();
        let matched = if exact.is_empty() {
            releases
                .iter()
                .filter(|release| {
                    let have = normalize_name(&release.name);
                    !have.is_empty()
                        && !wanted.is_empty()
                        && (have.contains(&wanted) || wanted.contains(&have))
                })
                .collect()
        } else {
            exact
        };
        match matched.len() {
            0 => {}
            1 => {
                if let Some(release) = matched.first() {
                    tracing::info!(
                        node = node.id.as_str(),
                        platform = platform.as_str(),
                        release = release.remote_id.as_str(),
                        "associated project with release"
                    );
                    self.adopt_link(&node.id, &platform, RemoteKind::Release, &release.remote_id)
                        .await;
                }
            }
            _ => {
                tracing::debug!(
                    node = node.id.as_str(),
                    platform = platform.as_str(),
                    count = matched.len(),
                    "multiple releases match the project name, leaving unassociated"
                );
            }
        }
    }

    /// Converges one located item: structural fields, parent linkage, and the
    /// milestone's release association. Returns whether anything was written.
    async fn finalize(
        &self,
        scope: &ScopeId,
        store: &HierarchyStore,
        adapter: &dyn PlatformAdapter,
        node: &PlanNode,
        kind: RemoteKind,
        item: &RemoteItem,
    ) -> Result<bool, AdapterError> {
        let platform = adapter.platform();
        let remote_id = &item.remote_id;
        let mut wrote = false;

        let mut request = UpdateItemRequest::default();
        let title = self.desired_title(node, &platform);
        if item.title != title {
            request.title = Some(title);
        }
        let body = self.desired_body(node, &platform);
        if item.body != body {
            request.body = Some(body);
        }
        request.target_date = desired_date_change(node, item);
        if !request.is_empty() {
            adapter.update(remote_id, request).await?;
            tracing::info!(
                node = node.id.as_str(),
                platform = platform.as_str(),
                remote = remote_id.as_str(),
                "updated structural fields"
            );
            self.search_cache.invalidate_platform(scope, &platform);
            wrote = true;
        }

        if let Some(parent) = self.parent_remote(store, node, adapter) {
            if item.parent.as_ref() != Some(&parent) {
                adapter.link_child(&parent, remote_id, kind).await?;
                tracing::info!(
                    node = node.id.as_str(),
                    platform = platform.as_str(),
                    remote = remote_id.as_str(),
                    parent = parent.as_str(),
                    "re-parented remote item"
                );
                wrote = true;
            }
        }

        if node.level == NodeLevel::Milestone {
            if let Some(project) = store.parent(&node.id) {
                if let Some(release) =
                    self.registry_link(&project.id, &platform, RemoteKind::Release)
                {
                    if item.release.as_ref() != Some(&release) {
                        adapter
                            .link_child(&release, remote_id, RemoteKind::Release)
                            .await?;
                        tracing::info!(
                            node = node.id.as_str(),
                            platform = platform.as_str(),
                            remote = remote_id.as_str(),
                            release = release.as_str(),
                            "associated milestone with the project release"
                        );
                        wrote = true;
                    }
                }
            }
        }

        Ok(wrote)
    }

    /// Runs the full per-node protocol across every platform: locate or
    /// create everywhere first, then cross-reference and converge each item
    /// with the complete link registry in hand.
    pub async fn reconcile_node(
        &self,
        scope: &ScopeId,
        store: &HierarchyStore,
        node: &PlanNode,
    ) -> NodeReport {
        let mut slots: Vec<(usize, RemoteKind, SlotOutcome)> = Vec::new();
        for (index, adapter) in self.platforms.iter().enumerate() {
            let Some(kind) = adapter.kind_for(node.level) else {
                continue;
            };
            if self.is_degraded(&adapter.platform()) {
                slots.push((
                    index,
                    kind,
                    SlotOutcome::Terminal(NodeOutcome::SkippedPlatformDown),
                ));
                continue;
            }
            let slot = self
                .locate_or_create(scope, store, adapter.as_ref(), node, kind)
                .await;
            slots.push((index, kind, slot));
        }

        if node.level == NodeLevel::Project {
            for adapter in &self.platforms {
                if self.is_degraded(&adapter.platform()) {
                    continue;
                }
                self.associate_release(scope, adapter.as_ref(), node).await;
            }
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        for (index, kind, slot) in slots {
            let adapter = &self.platforms[index];
            let platform = adapter.platform();
            let outcome = match slot {
                SlotOutcome::Terminal(outcome) => outcome,
                SlotOutcome::Created { remote_id, item } => {
                    if !self.is_degraded(&platform) {
                        if let Err(error) = self
                            .finalize(scope, store, adapter.as_ref(), node, kind, &item)
                            .await
                        {
                            // The item exists; the next run's reference pass
                            // completes whatever was left undone here.
                            self.failure_outcome(&platform, "finalize", &node.id, &error);
                        }
                    }
                    NodeOutcome::Created { remote_id }
                }
                SlotOutcome::Existing { remote_id, item } => {
                    if self.is_degraded(&platform) {
                        NodeOutcome::SkippedPlatformDown
                    } else {
                        match self
                            .finalize(scope, store, adapter.as_ref(), node, kind, &item)
                            .await
                        {
                            Ok(true) => NodeOutcome::Updated { remote_id },
                            Ok(false) => NodeOutcome::Unchanged { remote_id },
                            Err(error) => {
                                self.failure_outcome(&platform, "finalize", &node.id, &error)
                            }
                        }
                    }
                }
            };
            outcomes.push(PlatformOutcome { platform, outcome });
        }

        NodeReport {
            node_id: node.id.clone(),
            outcomes,
        }
    }

    /// Applies planned date cascades downstream. An item whose current date
    /// differs from the old inherited value was edited by hand and is left
    /// alone.
    pub async fn apply_cascades(
        &self,
        scope: &ScopeId,
        store: &HierarchyStore,
        planned: &[PlannedCascade],
    ) -> Vec<PropagatedDate> {
        let mut propagated = Vec::new();
        for cascade in planned {
            let Some(node) = store.node(&cascade.node_id) else {
                continue;
            };
            for adapter in &self.platforms {
                let platform = adapter.platform();
                if self.is_degraded(&platform) {
                    continue;
                }
                let Some(kind) = adapter.kind_for(node.level) else {
                    continue;
                };
                let Some(remote_id) = self.registry_link(&node.id, &platform, kind) else {
                    continue;
                };
                let item = match adapter.get(&remote_id).await {
                    Ok(item) => item,
                    Err(error) => {
                        self.failure_outcome(&platform, "get", &node.id, &error);
                        continue;
                    }
                };
                if item.target_date == Some(cascade.target) {
                    continue;
                }
                if item.target_date != Some(cascade.expected) {
                    tracing::debug!(
                        node = node.id.as_str(),
                        platform = platform.as_str(),
                        remote = remote_id.as_str(),
                        "date diverges from the old inherited value, leaving the manual edit"
                    );
                    continue;
                }
                let request = UpdateItemRequest {
                    target_date: Some(Some(cascade.target)),
                    ..UpdateItemRequest::default()
                };
                match adapter.update(&remote_id, request).await {
                    Ok(()) => {
                        tracing::info!(
                            node = node.id.as_str(),
                            platform = platform.as_str(),
                            remote = remote_id.as_str(),
                            from = %cascade.expected,
                            to = %cascade.target,
                            "propagated inherited date"
                        );
                        self.search_cache.invalidate_platform(scope, &platform);
                        propagated.push(PropagatedDate {
                            node_id: node.id.clone(),
                            platform: platform.clone(),
                            remote_id,
                            from: cascade.expected,
                            to: cascade.target,
                        });
                    }
                    Err(error) => {
                        self.failure_outcome(&platform, "update", &node.id, &error);
                    }
                }
            }
        }
        propagated
    }
}

/// Tiered candidate selection: source reference, then exact normalized name,
/// then substring containment. The first tier with candidates decides; more
/// than one match in that tier is ambiguous.
fn select_match(
    candidates: &[RemoteItem],
    node_name: &str,
    source_ref: &ReferenceLine,
) -> MatchDecision {
    let by_ref: Vec<&RemoteItem> = candidates
        .iter()
        .filter(|item| body_contains_reference(&item.body, source_ref))
        .collect();
    if let Some(decision) = decide(by_ref) {
        return decision;
    }

    let wanted = normalize_name(node_name);
    let by_name: Vec<&RemoteItem> = candidates
        .iter()
        .filter(|item| normalize_name(title_name(&item.title)) == wanted)
        .collect();
    if let Some(decision) = decide(by_name) {
        return decision;
    }

    let by_substring: Vec<&RemoteItem> = candidates
        .iter()
        .filter(|item| {
            let have = normalize_name(title_name(&item.title));
            !have.is_empty()
                && !wanted.is_empty()
                && (have.contains(&wanted) || wanted.contains(&have))
        })
        .collect();
    decide(by_substring).unwrap_or(MatchDecision::None)
}

fn decide(tier: Vec<&RemoteItem>) -> Option<MatchDecision> {
    match tier.len() {
        0 => None,
        1 => tier.first().map(|item| MatchDecision::One((*item).clone())),
        _ => Some(MatchDecision::Many(
            tier.iter().map(|item| item.remote_id.clone()).collect(),
        )),
    }
}

/// The date field of an update request. Explicit source dates are forced;
/// inherited dates are owned by the cascade pass and never forced here.
fn desired_date_change(node: &PlanNode, item: &RemoteItem) -> Option<Option<NaiveDate>> {
    match node.target_date {
        Some(target) if target.is_inherited() => None,
        Some(target) => (item.target_date != Some(target.date)).then_some(Some(target.date)),
        None => item.target_date.is_some().then_some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use plansync_adapters::test_support::node;
    use plansync_core::TargetDate;

    fn item(remote_id: &str, title: &str, body: &str) -> RemoteItem {
        RemoteItem {
            remote_id: RemoteId::from(remote_id),
            kind: RemoteKind::Task,
            title: title.to_owned(),
            body: body.to_owned(),
            target_date: None,
            parent: None,
            release: None,
        }
    }

    fn source_ref() -> ReferenceLine {
        ReferenceLine::new("plan", "plan://n-1")
    }

    #[test]
    fn source_reference_tier_wins_over_names() {
        let candidates = vec![
            item("PLAT-1", "Beta rollout", ""),
            item("PLAT-2", "Renamed entirely", "details\n\nRef: plan plan://n-1"),
        ];
        match select_match(&candidates, "Beta rollout", &source_ref()) {
            MatchDecision::One(found) => assert_eq!(found.remote_id.as_str(), "PLAT-2"),
            _ => panic!("expected the referenced item to win"),
        }
    }

    #[test]
    fn exact_name_tier_ignores_title_markers() {
        let candidates = vec![
            item("PLAT-1", "[PLAT-9] Beta Rollout", ""),
            item("PLAT-2", "Beta rollout phase two", ""),
        ];
        match select_match(&candidates, "beta rollout", &source_ref()) {
            MatchDecision::One(found) => assert_eq!(found.remote_id.as_str(), "PLAT-1"),
            _ => panic!("expected the exact-name item to win"),
        }
    }

    #[test]
    fn substring_tier_is_the_last_resort() {
        let candidates = vec![item("PLAT-2", "Beta rollout phase two", "")];
        match select_match(&candidates, "Beta rollout", &source_ref()) {
            MatchDecision::One(found) => assert_eq!(found.remote_id.as_str(), "PLAT-2"),
            _ => panic!("expected the substring item to win"),
        }
    }

    #[test]
    fn two_matches_in_one_tier_are_ambiguous() {
        let candidates = vec![
            item("PLAT-1", "Beta rollout", ""),
            item("PLAT-2", "Beta   ROLLOUT", ""),
        ];
        match select_match(&candidates, "Beta rollout", &source_ref()) {
            MatchDecision::Many(ids) => assert_eq!(ids.len(), 2),
            _ => panic!("expected an ambiguous decision"),
        }
    }

    #[test]
    fn no_candidates_means_no_match() {
        assert!(matches!(
            select_match(&[], "Beta rollout", &source_ref()),
            MatchDecision::None
        ));
    }

    #[test]
    fn explicit_dates_are_forced_and_inherited_dates_are_not() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid date");
        let other = NaiveDate::from_ymd_opt(2026, 6, 1).expect("valid date");

        let mut explicit = node("n-1", NodeLevel::Milestone, "Beta");
        explicit.target_date = Some(TargetDate::explicit(day));
        let mut inherited = node("n-2", NodeLevel::Milestone, "Beta");
        inherited.target_date = Some(TargetDate::inherited(day));
        let undated = node("n-3", NodeLevel::Milestone, "Beta");

        let mut remote = item("PLAT-1", "Beta", "");
        remote.target_date = Some(other);

        assert_eq!(desired_date_change(&explicit, &remote), Some(Some(day)));
        assert_eq!(desired_date_change(&inherited, &remote), None);
        assert_eq!(desired_date_change(&undated, &remote), Some(None));

        remote.target_date = Some(day);
        assert_eq!(desired_date_change(&explicit, &remote), None);
    }
}
