use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use plansync_adapters::{GovernedPlatform, PlatformAdapter, RetryPolicy, SourceAdapter};
use plansync_config::PlansyncConfig;
use plansync_core::{
    Baseline, BaselineStore, DEFAULT_SIMILARITY_THRESHOLD, NodeId, PlanNode, PlatformId, ScopeId,
    SyncError, SyncRecord, SyncStatus, baseline,
};
use plansync_engine::HierarchyStore;

use crate::classify::{Classifier, DanglingLink};
use crate::diff::{BaselineDiff, diff_against};
use crate::health::{HealthReport, score_health};
use crate::orphans::{OrphanedItem, scan_orphans};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub similarity_threshold: f64,
    /// Platform whose remote key is expected as the bracketed title marker.
    pub tracking: Option<PlatformId>,
    /// Platforms to check. Empty means every registered adapter.
    pub enabled: Vec<PlatformId>,
    pub permits: BTreeMap<PlatformId, usize>,
    pub default_permits: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            tracking: None,
            enabled: Vec::new(),
            permits: BTreeMap::new(),
            default_permits: 4,
        }
    }
}

impl DiscoveryOptions {
    pub fn from_config(config: &PlansyncConfig) -> Self {
        let engine = config.engine_runtime();
        let retry = config.retry_runtime();
        let platforms = config.platform_runtime();
        Self {
            call_timeout: engine.call_timeout,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                initial_backoff: retry.initial_backoff,
                backoff_multiplier: retry.backoff_multiplier,
                max_backoff: retry.max_backoff,
            },
            similarity_threshold: config.similarity_threshold(),
            tracking: platforms.tracking.map(PlatformId::from),
            enabled: platforms
                .enabled
                .iter()
                .map(|platform| PlatformId::from(platform.as_str()))
                .collect(),
            permits: config
                .platforms
                .permits
                .iter()
                .map(|entry| {
                    (
                        PlatformId::from(entry.platform.as_str()),
                        entry.max_in_flight as usize,
                    )
                })
                .collect(),
            default_permits: 4,
        }
    }

    fn permits_for(&self, platform: &PlatformId) -> usize {
        self.permits
            .get(platform)
            .copied()
            .unwrap_or(self.default_permits)
    }
}

/// Everything one discovery pass found for a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub scope: ScopeId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<SyncRecord>,
    pub orphans: Vec<OrphanedItem>,
    pub dangling: Vec<DanglingLink>,
    pub health: HealthReport,
    pub degraded_platforms: Vec<PlatformId>,
}

impl DiscoveryReport {
    pub fn record_for(&self, node_id: &NodeId) -> Option<&SyncRecord> {
        self.records
            .iter()
            .find(|record| &record.node_id == node_id)
    }

    pub fn count_with(&self, status: SyncStatus) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .count()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_platforms.is_empty()
    }
}

/// Discovery pass plus the delta against the baseline it was asked to
/// compare with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub discovery: DiscoveryReport,
    pub delta: BaselineDiff,
}

/// Drives read-only discovery passes: classification, orphan and dangling
/// detection, health scoring, and baseline diffing. Writes nothing to any
/// platform; the only persistence it touches is the baseline store. Adapters
/// are wrapped with permits, timeout, and retry once, at construction.
pub struct DiscoveryEngine {
    source: Arc<dyn SourceAdapter>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    baselines: Arc<dyn BaselineStore>,
    options: DiscoveryOptions,
}

impl DiscoveryEngine {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        baselines: Arc<dyn BaselineStore>,
        options: DiscoveryOptions,
    ) -> Self {
        let platforms = adapters
            .into_iter()
            .filter(|adapter| {
                options.enabled.is_empty() || options.enabled.contains(&adapter.platform())
            })
            .map(|adapter| {
                let permits = options.permits_for(&adapter.platform());
                Arc::new(GovernedPlatform::new(
                    adapter,
                    permits,
                    options.call_timeout,
                    options.retry,
                )) as Arc<dyn PlatformAdapter>
            })
            .collect();
        Self {
            source,
            platforms,
            baselines,
            options,
        }
    }

    /// One plain discovery pass. Only a source failure is fatal; platform
    /// trouble degrades the pass and shows up in the report.
    pub async fn run(&self, scope: &ScopeId) -> Result<DiscoveryReport, SyncError> {
        let (_, report) = self.pass(scope).await?;
        Ok(report)
    }

    /// Runs a pass and stores its outcome as the scope's comparison baseline
    /// for the day.
    pub async fn capture_comparison(&self, scope: &ScopeId) -> Result<DiscoveryReport, SyncError> {
        let (nodes, report) = self.pass(scope).await?;
        let baseline = Baseline::comparison(scope.clone(), nodes, report.records.clone());
        self.baselines.put(&baseline)?;
        tracing::info!(
            scope = scope.as_str(),
            day = %baseline.captured_on(),
            "comparison baseline captured"
        );
        Ok(report)
    }

    /// Runs a pass and stores its outcome in the scope's verify slot,
    /// replacing any pending verify baseline.
    pub async fn capture_verify(&self, scope: &ScopeId) -> Result<DiscoveryReport, SyncError> {
        let (nodes, report) = self.pass(scope).await?;
        let baseline = Baseline::verify(scope.clone(), nodes, report.records.clone());
        self.baselines.put(&baseline)?;
        tracing::info!(scope = scope.as_str(), "verify baseline captured");
        Ok(report)
    }

    /// Verify-mode pass: diffs the live state against the pending verify
    /// baseline and consumes it. The slot is cleared only after the pass
    /// completes, so a failed pass leaves it in place for a retry. Errs with
    /// `BaselineNotFound` when no verify baseline is pending.
    pub async fn verify(&self, scope: &ScopeId) -> Result<DeltaReport, SyncError> {
        let Some(pending) = self.baselines.peek_verify(scope)? else {
            return Err(baseline::baseline_not_found(
                scope,
                "no pending verify baseline",
            ));
        };

        let (nodes, discovery) = self.pass(scope).await?;
        if let Err(error) = self.baselines.take_verify(scope) {
            tracing::warn!(
                scope = scope.as_str(),
                error = %error,
                "failed to clear the consumed verify baseline"
            );
        }

        let delta = diff_against(&pending, &nodes, &discovery.records);
        Ok(DeltaReport { discovery, delta })
    }

    /// Diffs the live state against the comparison baseline captured on
    /// `day`. The baseline is left in place. Errs with `BaselineNotFound`
    /// when no comparison baseline exists for that day.
    pub async fn diff_since(
        &self,
        scope: &ScopeId,
        day: NaiveDate,
    ) -> Result<DeltaReport, SyncError> {
        let baseline = self.baselines.comparison_on(scope, day)?;
        let (nodes, discovery) = self.pass(scope).await?;
        let delta = diff_against(&baseline, &nodes, &discovery.records);
        Ok(DeltaReport { discovery, delta })
    }

    async fn pass(&self, scope: &ScopeId) -> Result<(Vec<PlanNode>, DiscoveryReport), SyncError> {
        let started_at = Utc::now();
        tracing::info!(scope = scope.as_str(), "discovery pass starting");

        let nodes = plansync_adapters::fetch_hierarchy(self.source.as_ref(), scope).await?;
        let store = HierarchyStore::from_nodes(nodes.clone());

        let mut classifier = Classifier::new(
            Arc::clone(&self.source),
            self.platforms.clone(),
            self.options.tracking.clone(),
            self.options.similarity_threshold,
        );

        // Pre-flight; a platform that cannot answer is degraded up front
        // instead of failing node by node.
        for adapter in &self.platforms {
            if let Err(error) = adapter.health_check().await {
                tracing::warn!(
                    platform = adapter.platform().as_str(),
                    error = %error,
                    "health check failed, skipping platform for this pass"
                );
                classifier.mark_degraded(&adapter.platform());
            }
        }

        let mut records = Vec::new();
        for node in store.traverse() {
            if let Some(record) = classifier.classify_node(&store, node).await {
                records.push(record);
            }
        }

        let skip = classifier.degraded().clone();
        let scan = scan_orphans(
            self.source.as_ref(),
            &self.platforms,
            scope,
            &store,
            classifier.claimed(),
            &skip,
        )
        .await;
        for platform in &scan.failed_platforms {
            classifier.mark_degraded(platform);
        }

        let health = score_health(&nodes, &records, Utc::now().date_naive());
        let report = DiscoveryReport {
            scope: scope.clone(),
            started_at,
            finished_at: Utc::now(),
            records,
            orphans: scan.orphans,
            dangling: classifier.dangling().to_vec(),
            health,
            degraded_platforms: classifier.degraded_platforms(),
        };
        tracing::info!(
            scope = scope.as_str(),
            records = report.records.len(),
            synced = report.count_with(SyncStatus::Synced),
            orphans = report.orphans.len(),
            dangling = report.dangling.len(),
            band = report.health.band.as_key(),
            degraded = report.degraded_platforms.len(),
            "discovery pass finished"
        );
        Ok((nodes, report))
    }
}
