use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use plansync_core::{NodeLevel, PlanNode, SyncRecord, SyncStatus};

/// Traffic-light band over a percentage score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Red,
    Yellow,
    Green,
}

impl HealthBand {
    /// Below 70 is red, 70 through 90 yellow, above 90 green.
    pub fn from_pct(pct: f64) -> Self {
        if pct < 70.0 {
            HealthBand::Red
        } else if pct <= 90.0 {
            HealthBand::Yellow
        } else {
            HealthBand::Green
        }
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            HealthBand::Red => "red",
            HealthBand::Yellow => "yellow",
            HealthBand::Green => "green",
        }
    }
}

/// Derived health metrics for one scope. Recomputed fresh on every pass;
/// nothing here carries state between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Share of classified nodes that passed every check.
    pub sync_health_pct: f64,
    /// Share of milestone-level nodes carrying a target date.
    pub completeness_pct: f64,
    /// Days since the most recent source-side update.
    pub staleness_days: i64,
    pub band: HealthBand,
}

/// Scores a hierarchy snapshot. Empty inputs score 100 and classify green;
/// the band follows sync health.
pub fn score_health(nodes: &[PlanNode], records: &[SyncRecord], today: NaiveDate) -> HealthReport {
    let sync_health_pct = if records.is_empty() {
        100.0
    } else {
        let synced = records
            .iter()
            .filter(|record| record.status == SyncStatus::Synced)
            .count();
        synced as f64 / records.len() as f64 * 100.0
    };

    let milestones: Vec<&PlanNode> = nodes
        .iter()
        .filter(|node| node.level == NodeLevel::Milestone)
        .collect();
    let completeness_pct = if milestones.is_empty() {
        100.0
    } else {
        let dated = milestones
            .iter()
            .filter(|node| node.target_date.is_some())
            .count();
        dated as f64 / milestones.len() as f64 * 100.0
    };

    let staleness_days = nodes
        .iter()
        .map(|node| node.updated_at.date_naive())
        .max()
        .map(|latest| (today - latest).num_days().max(0))
        .unwrap_or(0);

    HealthReport {
        sync_health_pct,
        completeness_pct,
        staleness_days,
        band: HealthBand::from_pct(sync_health_pct),
    }
}
