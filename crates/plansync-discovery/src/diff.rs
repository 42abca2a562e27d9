use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plansync_core::{
    Baseline, BaselineKind, ExternalLink, NodeId, PlanNode, ScopeId, SyncRecord, SyncStatus,
};

/// Structural field that differs between a baseline node and its live
/// counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeField {
    Level,
    Name,
    Description,
    Parent,
    TargetDate,
    State,
    SortKey,
    Links,
}

impl NodeField {
    pub fn as_key(&self) -> &'static str {
        match self {
            NodeField::Level => "level",
            NodeField::Name => "name",
            NodeField::Description => "description",
            NodeField::Parent => "parent",
            NodeField::TargetDate => "target_date",
            NodeField::State => "state",
            NodeField::SortKey => "sort_key",
            NodeField::Links => "links",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedNode {
    pub node_id: NodeId,
    pub fields: Vec<NodeField>,
}

/// Node-level delta between two hierarchy snapshots, every list ordered by
/// node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyDelta {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub changed: Vec<ChangedNode>,
}

impl HierarchyDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub node_id: NodeId,
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// Delta of derived classifications between two passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelta {
    /// Classified now, absent from the baseline.
    pub appeared: Vec<NodeId>,
    /// Classified in the baseline, absent now.
    pub disappeared: Vec<NodeId>,
    pub status_changes: Vec<StatusChange>,
}

impl RecordDelta {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty() && self.status_changes.is_empty()
    }
}

/// Everything that moved between a stored baseline and the live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDiff {
    pub scope: ScopeId,
    pub baseline_kind: BaselineKind,
    pub baseline_captured_at: DateTime<Utc>,
    pub nodes: HierarchyDelta,
    pub records: RecordDelta,
}

impl BaselineDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.records.is_empty()
    }
}

fn sorted_links(links: &[ExternalLink]) -> Vec<&ExternalLink> {
    let mut sorted: Vec<&ExternalLink> = links.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.platform, a.remote_kind, &a.remote_id).cmp(&(&b.platform, b.remote_kind, &b.remote_id))
    });
    sorted
}

fn changed_fields(before: &PlanNode, after: &PlanNode) -> Vec<NodeField> {
    let mut fields = Vec::new();
    if before.level != after.level {
        fields.push(NodeField::Level);
    }
    if before.name != after.name {
        fields.push(NodeField::Name);
    }
    if before.description != after.description {
        fields.push(NodeField::Description);
    }
    if before.parent_id != after.parent_id {
        fields.push(NodeField::Parent);
    }
    if before.target_date != after.target_date {
        fields.push(NodeField::TargetDate);
    }
    if before.state != after.state {
        fields.push(NodeField::State);
    }
    if before.sort_key != after.sort_key {
        fields.push(NodeField::SortKey);
    }
    if sorted_links(&before.links) != sorted_links(&after.links) {
        fields.push(NodeField::Links);
    }
    fields
}

pub fn diff_nodes(before: &[PlanNode], after: &[PlanNode]) -> HierarchyDelta {
    let before_by_id: BTreeMap<&NodeId, &PlanNode> =
        before.iter().map(|node| (&node.id, node)).collect();
    let after_by_id: BTreeMap<&NodeId, &PlanNode> =
        after.iter().map(|node| (&node.id, node)).collect();

    let mut delta = HierarchyDelta::default();
    for (id, node) in &after_by_id {
        match before_by_id.get(*id) {
            None => delta.added.push((*id).clone()),
            Some(previous) => {
                let fields = changed_fields(previous, node);
                if !fields.is_empty() {
                    delta.changed.push(ChangedNode {
                        node_id: (*id).clone(),
                        fields,
                    });
                }
            }
        }
    }
    for id in before_by_id.keys() {
        if !after_by_id.contains_key(*id) {
            delta.removed.push((*id).clone());
        }
    }
    delta
}

pub fn diff_records(before: &[SyncRecord], after: &[SyncRecord]) -> RecordDelta {
    let before_by_id: BTreeMap<&NodeId, &SyncRecord> =
        before.iter().map(|record| (&record.node_id, record)).collect();
    let after_by_id: BTreeMap<&NodeId, &SyncRecord> =
        after.iter().map(|record| (&record.node_id, record)).collect();

    let mut delta = RecordDelta::default();
    for (id, record) in &after_by_id {
        match before_by_id.get(*id) {
            None => delta.appeared.push((*id).clone()),
            Some(previous) if previous.status != record.status => {
                delta.status_changes.push(StatusChange {
                    node_id: (*id).clone(),
                    from: previous.status,
                    to: record.status,
                });
            }
            Some(_) => {}
        }
    }
    for id in before_by_id.keys() {
        if !after_by_id.contains_key(*id) {
            delta.disappeared.push((*id).clone());
        }
    }
    delta
}

/// Diffs the live state against a stored baseline. Pure; callers decide
/// which baseline to load and whether it gets consumed.
pub fn diff_against(
    baseline: &Baseline,
    nodes: &[PlanNode],
    records: &[SyncRecord],
) -> BaselineDiff {
    BaselineDiff {
        scope: baseline.scope.clone(),
        baseline_kind: baseline.kind,
        baseline_captured_at: baseline.captured_at,
        nodes: diff_nodes(&baseline.nodes, nodes),
        records: diff_records(&baseline.records, records),
    }
}
