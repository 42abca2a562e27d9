use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::identifiers::{NodeId, ScopeId};
use crate::node::PlanNode;
use crate::record::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    Comparison,
    Verify,
}

impl BaselineKind {
    pub fn as_key(&self) -> &'static str {
        match self {
            BaselineKind::Comparison => "comparison",
            BaselineKind::Verify => "verify",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "comparison" => Some(BaselineKind::Comparison),
            "verify" => Some(BaselineKind::Verify),
            _ => None,
        }
    }
}

/// Immutable snapshot of a hierarchy subtree and its per-node sync records,
/// used only for diffing. Comparison baselines persist until cleared; a
/// verify baseline lives from just before a reconciliation run until the one
/// verify-mode discovery pass that consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub scope: ScopeId,
    pub kind: BaselineKind,
    pub captured_at: DateTime<Utc>,
    pub nodes: Vec<PlanNode>,
    pub records: Vec<SyncRecord>,
}

impl Baseline {
    pub fn comparison(scope: ScopeId, nodes: Vec<PlanNode>, records: Vec<SyncRecord>) -> Self {
        Self {
            scope,
            kind: BaselineKind::Comparison,
            captured_at: Utc::now(),
            nodes,
            records,
        }
    }

    pub fn verify(scope: ScopeId, nodes: Vec<PlanNode>, records: Vec<SyncRecord>) -> Self {
        Self {
            scope,
            kind: BaselineKind::Verify,
            captured_at: Utc::now(),
            nodes,
            records,
        }
    }

    pub fn captured_on(&self) -> NaiveDate {
        self.captured_at.date_naive()
    }

    pub fn node(&self, id: &NodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn record(&self, id: &NodeId) -> Option<&SyncRecord> {
        self.records.iter().find(|record| &record.node_id == id)
    }
}

/// Injected baseline persistence. The verify slot holds at most one pending
/// baseline per scope; `put` with a verify baseline replaces it, `take_verify`
/// consumes it.
pub trait BaselineStore: Send + Sync {
    fn put(&self, baseline: &Baseline) -> Result<(), SyncError>;
    /// The comparison baseline captured on the given day, the newest if the
    /// day holds several. Absence is `SyncError::BaselineNotFound`.
    fn comparison_on(&self, scope: &ScopeId, day: NaiveDate) -> Result<Baseline, SyncError>;
    fn latest_comparison(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError>;
    fn list_comparisons(&self, scope: &ScopeId) -> Result<Vec<NaiveDate>, SyncError>;
    fn peek_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError>;
    fn take_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError>;
    fn delete_comparison(&self, scope: &ScopeId, day: NaiveDate) -> Result<bool, SyncError>;
    fn clear_scope(&self, scope: &ScopeId) -> Result<usize, SyncError>;
}

pub fn baseline_not_found(scope: &ScopeId, detail: impl Into<String>) -> SyncError {
    SyncError::BaselineNotFound {
        scope: scope.as_str().to_owned(),
        detail: detail.into(),
    }
}

#[derive(Default)]
pub struct InMemoryBaselineStore {
    baselines: Mutex<Vec<Baseline>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaselineStore for InMemoryBaselineStore {
    fn put(&self, baseline: &Baseline) -> Result<(), SyncError> {
        let mut baselines = self.baselines.lock().expect("baseline store lock");
        if baseline.kind == BaselineKind::Verify {
            baselines.retain(|existing| {
                !(existing.kind == BaselineKind::Verify && existing.scope == baseline.scope)
            });
        }
        baselines.push(baseline.clone());
        Ok(())
    }

    fn comparison_on(&self, scope: &ScopeId, day: NaiveDate) -> Result<Baseline, SyncError> {
        let baselines = self.baselines.lock().expect("baseline store lock");
        baselines
            .iter()
            .filter(|baseline| {
                baseline.kind == BaselineKind::Comparison
                    && &baseline.scope == scope
                    && baseline.captured_on() == day
            })
            .max_by_key(|baseline| baseline.captured_at)
            .cloned()
            .ok_or_else(|| baseline_not_found(scope, format!("no comparison baseline for {day}")))
    }

    fn latest_comparison(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let baselines = self.baselines.lock().expect("baseline store lock");
        Ok(baselines
            .iter()
            .filter(|baseline| {
                baseline.kind == BaselineKind::Comparison && &baseline.scope == scope
            })
            .max_by_key(|baseline| baseline.captured_at)
            .cloned())
    }

    fn list_comparisons(&self, scope: &ScopeId) -> Result<Vec<NaiveDate>, SyncError> {
        let baselines = self.baselines.lock().expect("baseline store lock");
        let mut days: Vec<NaiveDate> = baselines
            .iter()
            .filter(|baseline| {
                baseline.kind == BaselineKind::Comparison && &baseline.scope == scope
            })
            .map(|baseline| baseline.captured_on())
            .collect();
        days.sort();
        days.dedup();
        Ok(days)
    }

    fn peek_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let baselines = self.baselines.lock().expect("baseline store lock");
        Ok(baselines
            .iter()
            .find(|baseline| baseline.kind == BaselineKind::Verify && &baseline.scope == scope)
            .cloned())
    }

    fn take_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let mut baselines = self.baselines.lock().expect("baseline store lock");
        let position = baselines
            .iter()
            .position(|baseline| baseline.kind == BaselineKind::Verify && &baseline.scope == scope);
        Ok(position.map(|index| baselines.remove(index)))
    }

    fn delete_comparison(&self, scope: &ScopeId, day: NaiveDate) -> Result<bool, SyncError> {
        let mut baselines = self.baselines.lock().expect("baseline store lock");
        let before = baselines.len();
        baselines.retain(|baseline| {
            !(baseline.kind == BaselineKind::Comparison
                && &baseline.scope == scope
                && baseline.captured_on() == day)
        });
        Ok(baselines.len() < before)
    }

    fn clear_scope(&self, scope: &ScopeId) -> Result<usize, SyncError> {
        let mut baselines = self.baselines.lock().expect("baseline store lock");
        let before = baselines.len();
        baselines.retain(|baseline| &baseline.scope != scope);
        Ok(before - baselines.len())
    }
}
