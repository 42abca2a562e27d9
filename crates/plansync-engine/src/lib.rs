//! Reconciliation engine: walks a scope's hierarchy from the source of
//! truth, converges every downstream platform on it, and cascades moved
//! target dates afterwards. Runs are idempotent; a converged hierarchy
//! produces zero writes.

pub mod engine;
pub mod hierarchy;
pub mod propagate;
pub mod reconciler;
pub mod report;

pub use engine::{CancelToken, EngineOptions, ReconcileEngine};
pub use hierarchy::HierarchyStore;
pub use propagate::{PlannedCascade, plan_cascades};
pub use reconciler::Reconciler;
pub use report::{NodeOutcome, NodeReport, PlatformOutcome, PropagatedDate, RunReport};
