use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use plansync_adapters::{PlatformAdapter, SearchQuery, SourceAdapter};
use plansync_core::{
    PlatformId, RemoteId, RemoteKind, ScopeId, normalize_name, parse_reference_lines,
    parse_title_marker, title_name,
};
use plansync_engine::HierarchyStore;

/// Downstream item that carries the tracking title convention but belongs to
/// no hierarchy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedItem {
    pub platform: PlatformId,
    pub remote_id: RemoteId,
    pub kind: RemoteKind,
    pub title: String,
}

#[derive(Debug, Default)]
pub struct OrphanScan {
    pub orphans: Vec<OrphanedItem>,
    /// Platforms whose scan aborted mid-way; their results are partial.
    pub failed_platforms: BTreeSet<PlatformId>,
}

/// True when the item's body references a node that exists on the source of
/// truth. Such an item is re-adoptable by reconciliation and not an orphan.
fn points_home(body: &str, source_platform: &PlatformId, known_refs: &BTreeSet<String>) -> bool {
    parse_reference_lines(body)
        .iter()
        .any(|line| &line.platform == source_platform && known_refs.contains(&line.reference))
}

/// Sweeps each platform for marker-titled items no hierarchy node accounts
/// for. Platforms expose search, not enumeration, so visibility is bounded
/// by what the hierarchy's own names and references can surface. Items whose
/// normalized name exactly matches a mirrored node are skipped: the next
/// reconciliation adopts them instead.
pub async fn scan_orphans(
    source: &dyn SourceAdapter,
    platforms: &[Arc<dyn PlatformAdapter>],
    scope: &ScopeId,
    store: &HierarchyStore,
    claimed: &BTreeSet<(PlatformId, RemoteId)>,
    skip: &BTreeSet<PlatformId>,
) -> OrphanScan {
    let source_platform = source.platform();
    let known_refs: BTreeSet<String> = store
        .traverse()
        .iter()
        .map(|node| source.canonical_reference(&node.id))
        .collect();

    let mut scan = OrphanScan::default();
    for adapter in platforms {
        let platform = adapter.platform();
        if skip.contains(&platform) {
            continue;
        }

        let mut expected_names = BTreeSet::new();
        for node in store.traverse() {
            if let Some(kind) = adapter.kind_for(node.level) {
                expected_names.insert((kind, normalize_name(&node.name)));
            }
        }

        let mut seen = BTreeSet::new();
        'nodes: for node in store.traverse() {
            let Some(kind) = adapter.kind_for(node.level) else {
                continue;
            };
            let query = SearchQuery {
                kind,
                name: node.name.clone(),
                source_ref: Some(source.canonical_reference(&node.id)),
                parent: None,
            };
            let candidates = match adapter.search(scope, &query).await {
                Ok(candidates) => candidates,
                Err(error) => {
                    tracing::warn!(
                        platform = platform.as_str(),
                        error = %error,
                        "orphan scan aborted for this platform"
                    );
                    scan.failed_platforms.insert(platform.clone());
                    break 'nodes;
                }
            };
            for item in candidates {
                let key = (platform.clone(), item.remote_id.clone());
                if claimed.contains(&key) || !seen.insert(item.remote_id.clone()) {
                    continue;
                }
                if parse_title_marker(&item.title).is_none() {
                    continue;
                }
                if points_home(&item.body, &source_platform, &known_refs) {
                    continue;
                }
                let name = normalize_name(title_name(&item.title));
                if expected_names.contains(&(item.kind, name)) {
                    continue;
                }
                tracing::warn!(
                    platform = platform.as_str(),
                    remote = item.remote_id.as_str(),
                    title = item.title.as_str(),
                    "orphaned item matches no hierarchy node"
                );
                scan.orphans.push(OrphanedItem {
                    platform: platform.clone(),
                    remote_id: item.remote_id,
                    kind: item.kind,
                    title: item.title,
                });
            }
        }
    }

    scan.orphans
        .sort_by(|a, b| (&a.platform, &a.remote_id).cmp(&(&b.platform, &b.remote_id)));
    scan
}
