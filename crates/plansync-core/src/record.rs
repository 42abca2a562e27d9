use serde::{Deserialize, Serialize};

use crate::identifiers::{NodeId, PlatformId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Connected,
    NotSynced,
}

impl SyncStatus {
    pub fn as_key(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Connected => "connected",
            SyncStatus::NotSynced => "not_synced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCheck {
    RemoteResolves,
    NameSimilarity,
    SourceReference,
    TrackingMarker,
    ReleaseAssociation,
}

impl SyncCheck {
    pub fn as_key(&self) -> &'static str {
        match self {
            SyncCheck::RemoteResolves => "remote_resolves",
            SyncCheck::NameSimilarity => "name_similarity",
            SyncCheck::SourceReference => "source_reference",
            SyncCheck::TrackingMarker => "tracking_marker",
            SyncCheck::ReleaseAssociation => "release_association",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub platform: PlatformId,
    pub check: SyncCheck,
    pub detail: String,
}

/// Derived per node by a discovery pass; never persisted between runs except
/// inside a baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub node_id: NodeId,
    pub status: SyncStatus,
    pub failed_checks: Vec<FailedCheck>,
}

impl SyncRecord {
    pub fn not_synced(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: SyncStatus::NotSynced,
            failed_checks: Vec::new(),
        }
    }

    pub fn from_checks(node_id: NodeId, failed_checks: Vec<FailedCheck>) -> Self {
        let status = if failed_checks.is_empty() {
            SyncStatus::Synced
        } else {
            SyncStatus::Connected
        };
        Self {
            node_id,
            status,
            failed_checks,
        }
    }
}
