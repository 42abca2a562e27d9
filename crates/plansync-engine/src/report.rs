use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use plansync_core::{NodeId, PlatformId, RemoteId, ScopeId};

/// What happened to one node on one platform during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Created { remote_id: RemoteId },
    Updated { remote_id: RemoteId },
    Unchanged { remote_id: RemoteId },
    /// More than one remote matched; nothing was written for this node.
    Ambiguous { candidates: Vec<RemoteId> },
    SkippedValidation { detail: String },
    SkippedPlatformDown,
    SkippedCancelled,
    Failed { detail: String },
}

impl NodeOutcome {
    pub fn is_write(&self) -> bool {
        matches!(self, NodeOutcome::Created { .. } | NodeOutcome::Updated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformOutcome {
    pub platform: PlatformId,
    pub outcome: NodeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub outcomes: Vec<PlatformOutcome>,
}

impl NodeReport {
    pub fn outcome_for(&self, platform: &PlatformId) -> Option<&NodeOutcome> {
        self.outcomes
            .iter()
            .find(|entry| &entry.platform == platform)
            .map(|entry| &entry.outcome)
    }
}

/// One inherited date rewritten downstream after its ancestor's date moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedDate {
    pub node_id: NodeId,
    pub platform: PlatformId,
    pub remote_id: RemoteId,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub scope: ScopeId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub nodes: Vec<NodeReport>,
    pub propagated: Vec<PropagatedDate>,
    pub degraded_platforms: Vec<PlatformId>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_platforms.is_empty()
    }

    /// Creates, updates, and date propagations performed by this run. Zero on
    /// a re-run of an already converged hierarchy.
    pub fn write_count(&self) -> usize {
        let node_writes = self
            .nodes
            .iter()
            .flat_map(|node| node.outcomes.iter())
            .filter(|entry| entry.outcome.is_write())
            .count();
        node_writes + self.propagated.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_count_covers_creates_updates_and_propagations() {
        let report = RunReport {
            scope: ScopeId::from("scope-a"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            nodes: vec![NodeReport {
                node_id: NodeId::from("n-1"),
                outcomes: vec![
                    PlatformOutcome {
                        platform: PlatformId::from("jira"),
                        outcome: NodeOutcome::Created {
                            remote_id: RemoteId::from("PLAT-1"),
                        },
                    },
                    PlatformOutcome {
                        platform: PlatformId::from("github"),
                        outcome: NodeOutcome::Unchanged {
                            remote_id: RemoteId::from("GH-1"),
                        },
                    },
                ],
            }],
            propagated: vec![PropagatedDate {
                node_id: NodeId::from("n-2"),
                platform: PlatformId::from("jira"),
                remote_id: RemoteId::from("PLAT-2"),
                from: NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid date"),
                to: NaiveDate::from_ymd_opt(2026, 4, 30).expect("valid date"),
            }],
            degraded_platforms: Vec::new(),
            cancelled: false,
        };

        assert_eq!(report.write_count(), 2);
        assert!(!report.is_degraded());
    }

    #[test]
    fn ambiguous_and_skips_are_not_writes() {
        assert!(!NodeOutcome::Ambiguous { candidates: vec![] }.is_write());
        assert!(!NodeOutcome::SkippedPlatformDown.is_write());
        assert!(
            NodeOutcome::Updated {
                remote_id: RemoteId::from("PLAT-1")
            }
            .is_write()
        );
    }
}
