use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use plansync_adapters::{GovernedPlatform, PlatformAdapter, RetryPolicy, SourceAdapter};
use plansync_config::PlansyncConfig;
use plansync_core::{BaselineStore, NodeId, PlanNode, PlatformId, ScopeId, SyncError};

use crate::hierarchy::HierarchyStore;
use crate::propagate::plan_cascades;
use crate::reconciler::Reconciler;
use crate::report::{NodeOutcome, NodeReport, PlatformOutcome, RunReport};

/// Cooperative stop flag. Subtrees not yet started when the flag flips are
/// reported as cancelled instead of being reconciled; in-flight calls finish.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub subtree_concurrency: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub search_ttl: Duration,
    /// Platform whose remote key becomes the bracketed title marker.
    pub tracking: Option<PlatformId>,
    /// Platforms to reconcile. Empty means every registered adapter.
    pub enabled: Vec<PlatformId>,
    pub permits: BTreeMap<PlatformId, usize>,
    pub default_permits: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            subtree_concurrency: 4,
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            search_ttl: Duration::from_secs(300),
            tracking: None,
            enabled: Vec::new(),
            permits: BTreeMap::new(),
            default_permits: 4,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &PlansyncConfig) -> Self {
        let engine = config.engine_runtime();
        let retry = config.retry_runtime();
        let platforms = config.platform_runtime();
        Self {
            subtree_concurrency: engine.subtree_concurrency,
            call_timeout: engine.call_timeout,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                initial_backoff: retry.initial_backoff,
                backoff_multiplier: retry.backoff_multiplier,
                max_backoff: retry.max_backoff,
            },
            search_ttl: config.search_ttl(),
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

/// Drives reconciliation runs: fetches the hierarchy, walks subtrees
/// concurrently, and cascades moved dates after the walk. Adapters are
/// wrapped with permits, timeout, and retry once, at construction.
pub struct ReconcileEngine {
    source: Arc<dyn SourceAdapter>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    baselines: Arc<dyn BaselineStore>,
    options: EngineOptions,
    cancel: CancelToken,
}

impl ReconcileEngine {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        baselines: Arc<dyn BaselineStore>,
        options: EngineOptions,
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
            cancel: CancelToken::default(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// One full reconciliation run over a scope. Only a source failure is
    /// fatal; platform trouble degrades the run and shows up in the report.
    pub async fn run(&self, scope: &ScopeId) -> Result<RunReport, SyncError> {
        let started_at = Utc::now();
        tracing::info!(scope = scope.as_str(), "reconciliation run starting");

        let nodes = plansync_adapters::fetch_hierarchy(self.source.as_ref(), scope).await?;
        let store = Arc::new(HierarchyStore::from_nodes(nodes));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.source),
            self.platforms.clone(),
            self.options.tracking.clone(),
            self.options.search_ttl,
        ));
        reconciler.seed_links(&store);

        // Pre-flight; a platform that cannot answer is degraded up front
        // instead of failing node by node.
        for adapter in reconciler.platforms() {
            if let Err(error) = adapter.health_check().await {
                tracing::warn!(
                    platform = adapter.platform().as_str(),
                    error = %error,
                    "health check failed, skipping platform for this run"
                );
                reconciler.mark_degraded(&adapter.platform());
            }
        }

        let prior = self.prior_snapshot(scope);

        let run = Arc::new(RunState {
            reconciler: Arc::clone(&reconciler),
            store: Arc::clone(&store),
            scope: scope.clone(),
            permits: Arc::new(Semaphore::new(self.options.subtree_concurrency.max(1))),
            cancel: self.cancel.clone(),
            reports: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(store.roots().len());
        for root in store.roots() {
            handles.push(tokio::spawn(reconcile_subtree(
                Arc::clone(&run),
                root.clone(),
            )));
        }
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "subtree task panicked");
            }
        }

        let mut node_reports =
            std::mem::take(&mut *run.reports.lock().expect("run report lock"));
        let order: HashMap<&NodeId, usize> = store
            .traverse()
            .iter()
            .enumerate()
            .map(|(index, node)| (&node.id, index))
            .collect();
        node_reports
            .sort_by_key(|report| order.get(&report.node_id).copied().unwrap_or(usize::MAX));

        let cancelled = self.cancel.is_cancelled();
        let propagated = match (&prior, cancelled) {
            (Some(prior), false) => {
                let planned = plan_cascades(prior, &store);
                reconciler.apply_cascades(scope, &store, &planned).await
            }
            _ => Vec::new(),
        };

        let report = RunReport {
            scope: scope.clone(),
            started_at,
            finished_at: Utc::now(),
            nodes: node_reports,
            propagated,
            degraded_platforms: reconciler.degraded_platforms(),
            cancelled,
        };
        tracing::info!(
            scope = scope.as_str(),
            nodes = report.nodes.len(),
            writes = report.write_count(),
            propagated = report.propagated.len(),
            degraded = report.degraded_platforms.len(),
            cancelled = report.cancelled,
            "reconciliation run finished"
        );
        Ok(report)
    }

    /// Prior node snapshot for cascade planning: the pending verify baseline
    /// when one exists, else the latest comparison baseline. Baseline store
    /// trouble skips cascading rather than failing the run.
    fn prior_snapshot(&self, scope: &ScopeId) -> Option<Vec<PlanNode>> {
        match self.baselines.peek_verify(scope) {
            Ok(Some(baseline)) => return Some(baseline.nodes),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    scope = scope.as_str(),
                    error = %error,
                    "baseline lookup failed, skipping date propagation"
                );
                return None;
            }
        }
        match self.baselines.latest_comparison(scope) {
            Ok(Some(baseline)) => Some(baseline.nodes),
            Ok(None) => {
                tracing::info!(
                    scope = scope.as_str(),
                    "no prior baseline, skipping date propagation"
                );
                None
            }
            Err(error) => {
                tracing::warn!(
                    scope = scope.as_str(),
                    error = %error,
                    "baseline lookup failed, skipping date propagation"
                );
                None
            }
        }
    }
}

struct RunState {
    reconciler: Arc<Reconciler>,
    store: Arc<HierarchyStore>,
    scope: ScopeId,
    permits: Arc<Semaphore>,
    cancel: CancelToken,
    reports: Mutex<Vec<NodeReport>>,
}

/// Walks one subtree: the node itself under a concurrency permit, then its
/// children. A single child is awaited directly; siblings fan out as tasks.
/// The permit is released before descending so deep chains cannot exhaust
/// the pool.
fn reconcile_subtree(
    run: Arc<RunState>,
    node_id: NodeId,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if run.cancel.is_cancelled() {
            mark_skipped_subtree(&run, &node_id);
            return;
        }
        let Some(node) = run.store.node(&node_id) else {
            return;
        };

        let permit = match Arc::clone(&run.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let report = run
            .reconciler
            .reconcile_node(&run.scope, &run.store, node)
            .await;
        drop(permit);
        run.reports.lock().expect("run report lock").push(report);

        let children = run.store.children(&node_id).to_vec();
        if children.len() == 1 {
            if let Some(only) = children.into_iter().next() {
                reconcile_subtree(Arc::clone(&run), only).await;
            }
            return;
        }
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            handles.push(tokio::spawn(reconcile_subtree(Arc::clone(&run), child)));
        }
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "subtree task panicked");
            }
        }
    })
}

/// Reports a whole untouched subtree as cancelled, one outcome per platform
/// that would have mirrored each node.
fn mark_skipped_subtree(run: &RunState, node_id: &NodeId) {
    let mut skipped = Vec::new();
    let mut stack = vec![node_id.clone()];
    while let Some(id) = stack.pop() {
        if let Some(node) = run.store.node(&id) {
            let outcomes: Vec<PlatformOutcome> = run
                .reconciler
                .platforms()
                .iter()
                .filter(|adapter| adapter.kind_for(node.level).is_some())
                .map(|adapter| PlatformOutcome {
                    platform: adapter.platform(),
                    outcome: NodeOutcome::SkippedCancelled,
                })
                .collect();
            skipped.push(NodeReport {
                node_id: id.clone(),
                outcomes,
            });
        }
        stack.extend(run.store.children(&id).iter().cloned());
    }
    run.reports.lock().expect("run report lock").extend(skipped);
}
