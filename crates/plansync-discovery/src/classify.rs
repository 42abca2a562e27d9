use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use plansync_adapters::{AdapterError, PlatformAdapter, RemoteItem, SourceAdapter};
use plansync_core::{
    ExternalLink, FailedCheck, NodeId, NodeLevel, PlanNode, PlatformId, ReferenceLine, RemoteId,
    RemoteKind, SyncCheck, SyncRecord, body_contains_reference, is_valid_tracking_id, names_match,
    parse_reference_lines, parse_title_marker, title_name, truncate_for_error, word_overlap,
};
use plansync_engine::HierarchyStore;

/// Recorded counterpart whose remote item no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingLink {
    pub node_id: NodeId,
    pub platform: PlatformId,
    pub remote_id: RemoteId,
    pub remote_kind: RemoteKind,
}

/// Per-node inputs for the quality checks, assembled once and applied to
/// every counterpart item.
pub struct CheckContext<'a> {
    pub source_reference: &'a ReferenceLine,
    pub tracking_id: Option<&'a str>,
    pub expected_release: Option<&'a RemoteId>,
    pub similarity_threshold: f64,
}

/// Runs the quality checks against one located counterpart. The item already
/// resolved, so these decide `Synced` versus `Connected`, never `NotSynced`.
pub fn quality_checks(
    node: &PlanNode,
    item: &RemoteItem,
    platform: &PlatformId,
    ctx: &CheckContext<'_>,
) -> Vec<FailedCheck> {
    let mut failed = Vec::new();

    let remote_name = title_name(&item.title);
    if !names_match(&node.name, remote_name, ctx.similarity_threshold) {
        failed.push(FailedCheck {
            platform: platform.clone(),
            check: SyncCheck::NameSimilarity,
            detail: format!(
                "similarity {:.2} below threshold",
                word_overlap(&node.name, remote_name)
            ),
        });
    }

    if !body_contains_reference(&item.body, ctx.source_reference) {
        failed.push(FailedCheck {
            platform: platform.clone(),
            check: SyncCheck::SourceReference,
            detail: format!("body lacks {}", ctx.source_reference.render()),
        });
    }

    if let Some(expected) = ctx.tracking_id {
        match parse_title_marker(&item.title) {
            Some((marker, _)) if marker == expected => {}
            Some((marker, _)) => failed.push(FailedCheck {
                platform: platform.clone(),
                check: SyncCheck::TrackingMarker,
                detail: format!("title marker {marker} instead of {expected}"),
            }),
            None => failed.push(FailedCheck {
                platform: platform.clone(),
                check: SyncCheck::TrackingMarker,
                detail: "title lost its tracking marker".to_owned(),
            }),
        }
    }

    if let Some(release) = ctx.expected_release {
        if item.release.as_ref() != Some(release) {
            failed.push(FailedCheck {
                platform: platform.clone(),
                check: SyncCheck::ReleaseAssociation,
                detail: format!("not associated with release {}", release.as_str()),
            });
        }
    }

    failed
}

/// Read-only classifier: resolves each node's counterparts and grades them
/// into a `SyncRecord` without ever writing to a platform. Accumulates the
/// claimed remote ids and dangling links the wider pass reports afterwards.
pub struct Classifier {
    source: Arc<dyn SourceAdapter>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    tracking: Option<PlatformId>,
    similarity_threshold: f64,
    degraded: BTreeSet<PlatformId>,
    dangling: Vec<DanglingLink>,
    claimed: BTreeSet<(PlatformId, RemoteId)>,
}

impl Classifier {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        mut platforms: Vec<Arc<dyn PlatformAdapter>>,
        tracking: Option<PlatformId>,
        similarity_threshold: f64,
    ) -> Self {
        if let Some(tracking) = &tracking {
            let present = platforms
                .iter()
                .any(|adapter| &adapter.platform() == tracking);
            if !present {
                tracing::warn!(
                    platform = tracking.as_str(),
                    "tracking platform is not being checked, markers will not be verified"
                );
            }
        }
        platforms.sort_by_key(|adapter| adapter.platform());
        Self {
            source,
            platforms,
            tracking,
            similarity_threshold,
            degraded: BTreeSet::new(),
            dangling: Vec::new(),
            claimed: BTreeSet::new(),
        }
    }

    pub fn platforms(&self) -> &[Arc<dyn PlatformAdapter>] {
        &self.platforms
    }

    pub fn mark_degraded(&mut self, platform: &PlatformId) {
        self.degraded.insert(platform.clone());
    }

    pub fn degraded(&self) -> &BTreeSet<PlatformId> {
        &self.degraded
    }

    pub fn degraded_platforms(&self) -> Vec<PlatformId> {
        self.degraded.iter().cloned().collect()
    }

    /// Remote ids the hierarchy accounts for, fed to the orphan scan so
    /// claimed items are never flagged.
    pub fn claimed(&self) -> &BTreeSet<(PlatformId, RemoteId)> {
        &self.claimed
    }

    pub fn dangling(&self) -> &[DanglingLink] {
        &self.dangling
    }

    fn adapter_for(&self, platform: &PlatformId) -> Option<Arc<dyn PlatformAdapter>> {
        self.platforms
            .iter()
            .find(|adapter| &adapter.platform() == platform)
            .cloned()
    }

    fn source_reference(&self, node: &PlanNode) -> ReferenceLine {
        ReferenceLine::new(
            self.source.platform(),
            self.source.canonical_reference(&node.id),
        )
    }

    /// Counterpart id on one platform: the recorded link wins, then
    /// (Issue-level only) a reference embedded in the node's description.
    fn recorded_or_embedded(
        &self,
        node: &PlanNode,
        platform: &PlatformId,
        kind: RemoteKind,
    ) -> Option<RemoteId> {
        if let Some(link) = node.link_for(platform, kind) {
            return Some(link.remote_id.clone());
        }
        if node.level != NodeLevel::Issue {
            return None;
        }
        parse_reference_lines(&node.description)
            .into_iter()
            .find(|line| &line.platform == platform)
            .map(|line| RemoteId::from(line.reference))
    }

    /// The node's counterparts on every checked platform.
    pub fn counterpart_references(&self, node: &PlanNode) -> Vec<ExternalLink> {
        let mut references = Vec::new();
        for adapter in &self.platforms {
            let platform = adapter.platform();
            let Some(kind) = adapter.kind_for(node.level) else {
                continue;
            };
            if let Some(remote_id) = self.recorded_or_embedded(node, &platform, kind) {
                references.push(ExternalLink {
                    platform,
                    remote_id,
                    remote_kind: kind,
                });
            }
        }
        references
    }

    /// Marker expected in this node's title on `platform`, or `None` when no
    /// tracking platform is configured, the platform is the tracking platform
    /// itself, or the tracking counterpart is unknown.
    fn tracking_marker(&self, node: &PlanNode, platform: &PlatformId) -> Option<String> {
        let tracking = self.tracking.as_ref()?;
        if tracking == platform {
            return None;
        }
        let adapter = self.adapter_for(tracking)?;
        let kind = adapter.kind_for(node.level)?;
        let remote_id = self.recorded_or_embedded(node, tracking, kind)?;
        is_valid_tracking_id(remote_id.as_str()).then(|| remote_id.as_str().to_owned())
    }

    /// Release a milestone's counterpart should be associated with: the one
    /// recorded on its parent project for this platform.
    fn expected_release(
        &self,
        store: &HierarchyStore,
        node: &PlanNode,
        platform: &PlatformId,
    ) -> Option<RemoteId> {
        if node.level != NodeLevel::Milestone {
            return None;
        }
        let project = store.parent(&node.id)?;
        project
            .link_for(platform, RemoteKind::Release)
            .map(|link| link.remote_id.clone())
    }

    /// Classifies one node. Returns `None` for nodes no checked platform
    /// mirrors; those carry no counterparts by construction and would skew
    /// the health totals.
    pub async fn classify_node(
        &mut self,
        store: &HierarchyStore,
        node: &PlanNode,
    ) -> Option<SyncRecord> {
        for link in &node.links {
            self.claimed
                .insert((link.platform.clone(), link.remote_id.clone()));
        }

        let mirrored = self
            .platforms
            .iter()
            .any(|adapter| adapter.kind_for(node.level).is_some());
        if !mirrored {
            return None;
        }

        let references = self.counterpart_references(node);
        for link in &references {
            self.claimed
                .insert((link.platform.clone(), link.remote_id.clone()));
        }
        if references.is_empty() {
            tracing::debug!(
                node = node.id.as_str(),
                "no counterpart references, classifying as not synced"
            );
            return Some(SyncRecord::not_synced(node.id.clone()));
        }

        let source_reference = self.source_reference(node);
        let mut failed = Vec::new();
        for link in references {
            let Some(adapter) = self.adapter_for(&link.platform) else {
                continue;
            };
            if self.degraded.contains(&link.platform) {
                failed.push(FailedCheck {
                    platform: link.platform.clone(),
                    check: SyncCheck::RemoteResolves,
                    detail: "platform skipped after earlier failure".to_owned(),
                });
                continue;
            }
            match adapter.get(&link.remote_id).await {
                Ok(item) => {
                    let tracking_id = self.tracking_marker(node, &link.platform);
                    let expected_release = self.expected_release(store, node, &link.platform);
                    let ctx = CheckContext {
                        source_reference: &source_reference,
                        tracking_id: tracking_id.as_deref(),
                        expected_release: expected_release.as_ref(),
                        similarity_threshold: self.similarity_threshold,
                    };
                    failed.extend(quality_checks(node, &item, &link.platform, &ctx));
                }
                Err(AdapterError::NotFound(_)) => {
                    tracing::warn!(
                        node = node.id.as_str(),
                        platform = link.platform.as_str(),
                        remote = link.remote_id.as_str(),
                        "recorded link no longer resolves"
                    );
                    failed.push(FailedCheck {
                        platform: link.platform.clone(),
                        check: SyncCheck::RemoteResolves,
                        detail: format!(
                            "{} not found",
                            adapter.canonical_reference(&link.remote_id)
                        ),
                    });
                    self.dangling.push(DanglingLink {
                        node_id: node.id.clone(),
                        platform: link.platform,
                        remote_id: link.remote_id,
                        remote_kind: link.remote_kind,
                    });
                }
                Err(error) => {
                    if error.is_platform_outage() {
                        tracing::warn!(
                            platform = link.platform.as_str(),
                            error = %error,
                            "platform unavailable, skipping it for the rest of the pass"
                        );
                        self.degraded.insert(link.platform.clone());
                    }
                    failed.push(FailedCheck {
                        platform: link.platform.clone(),
                        check: SyncCheck::RemoteResolves,
                        detail: truncate_for_error(&error.to_string()),
                    });
                }
            }
        }

        Some(SyncRecord::from_checks(node.id.clone(), failed))
    }
}
