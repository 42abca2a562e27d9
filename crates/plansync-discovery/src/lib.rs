//! Read-only discovery: classifies every mirrored node as synced, connected,
//! or not synced, sweeps platforms for orphaned and dangling counterparts,
//! scores scope health, and diffs live state against stored baselines. A
//! discovery pass never writes to a platform.

pub mod classify;
pub mod diff;
pub mod engine;
pub mod health;
pub mod orphans;

pub use classify::{CheckContext, Classifier, DanglingLink, quality_checks};
pub use diff::{
    BaselineDiff, ChangedNode, HierarchyDelta, NodeField, RecordDelta, StatusChange, diff_against,
    diff_nodes, diff_records,
};
pub use engine::{DeltaReport, DiscoveryEngine, DiscoveryOptions, DiscoveryReport};
pub use health::{HealthBand, HealthReport, score_health};
pub use orphans::{OrphanScan, OrphanedItem, scan_orphans};
