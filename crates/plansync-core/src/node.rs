use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identifiers::{NodeId, PlatformId, RemoteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLevel {
    Initiative,
    Project,
    Milestone,
    Issue,
}

impl NodeLevel {
    pub fn as_key(&self) -> &'static str {
        match self {
            NodeLevel::Initiative => "initiative",
            NodeLevel::Project => "project",
            NodeLevel::Milestone => "milestone",
            NodeLevel::Issue => "issue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Open,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrigin {
    Explicit,
    InheritedFromParent,
}

/// Target date plus where it came from. The origin flag is authoritative for
/// cascade decisions; callers must not infer inheritance by comparing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDate {
    pub date: NaiveDate,
    pub origin: DateOrigin,
}

impl TargetDate {
    pub fn explicit(date: NaiveDate) -> Self {
        Self {
            date,
            origin: DateOrigin::Explicit,
        }
    }

    pub fn inherited(date: NaiveDate) -> Self {
        Self {
            date,
            origin: DateOrigin::InheritedFromParent,
        }
    }

    pub fn is_inherited(&self) -> bool {
        self.origin == DateOrigin::InheritedFromParent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    Epic,
    Release,
    Task,
    Issue,
}

impl RemoteKind {
    pub fn as_key(&self) -> &'static str {
        match self {
            RemoteKind::Epic => "epic",
            RemoteKind::Release => "release",
            RemoteKind::Task => "task",
            RemoteKind::Issue => "issue",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "epic" => Some(RemoteKind::Epic),
            "release" => Some(RemoteKind::Release),
            "task" => Some(RemoteKind::Task),
            "issue" => Some(RemoteKind::Issue),
            _ => None,
        }
    }
}

/// One downstream counterpart of a hierarchy node. At most one link may exist
/// per (platform, kind) pair on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub platform: PlatformId,
    pub remote_id: RemoteId,
    pub remote_kind: RemoteKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub level: NodeLevel,
    pub name: String,
    pub description: String,
    pub parent_id: Option<NodeId>,
    pub target_date: Option<TargetDate>,
    pub state: NodeState,
    pub sort_key: f64,
    pub updated_at: DateTime<Utc>,
    pub links: Vec<ExternalLink>,
}

impl PlanNode {
    pub fn link_for(&self, platform: &PlatformId, kind: RemoteKind) -> Option<&ExternalLink> {
        self.links
            .iter()
            .find(|link| &link.platform == platform && link.remote_kind == kind)
    }

    pub fn links_for_platform(&self, platform: &PlatformId) -> Vec<&ExternalLink> {
        self.links
            .iter()
            .filter(|link| &link.platform == platform)
            .collect()
    }

    pub fn target_date_value(&self) -> Option<NaiveDate> {
        self.target_date.map(|target| target.date)
    }

    pub fn has_inherited_date(&self) -> bool {
        self.target_date
            .map(|target| target.is_inherited())
            .unwrap_or(false)
    }
}
