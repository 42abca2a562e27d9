use std::sync::Arc;

use chrono::NaiveDate;

use plansync_adapters::test_support::{InMemoryPlatform, InMemorySource, child_node, node};
use plansync_adapters::{PlatformAdapter, RetryPolicy, SourceAdapter};
use plansync_core::{
    BaselineKind, BaselineStore, InMemoryBaselineStore, NodeId, NodeLevel, PlanNode, PlatformId,
    ScopeId, SyncError, SyncStatus, TargetDate,
};
use plansync_discovery::{DiscoveryEngine, DiscoveryOptions, NodeField};
use plansync_engine::{EngineOptions, ReconcileEngine};

fn scope() -> ScopeId {
    ScopeId::from("scope-a")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Initiative > project > milestone > issue, one node per level.
fn sample_nodes() -> Vec<PlanNode> {
    let init = node("init-1", NodeLevel::Initiative, "Platform 2026");
    let mut project = child_node("proj-1", NodeLevel::Project, "Auth revamp", "init-1");
    project.description = "Modernize login.".to_owned();
    project.target_date = Some(TargetDate::explicit(date(2026, 6, 30)));
    let mut milestone = child_node("ms-1", NodeLevel::Milestone, "Beta rollout", "proj-1");
    milestone.description = "Ship the beta.".to_owned();
    milestone.target_date = Some(TargetDate::inherited(date(2026, 6, 30)));
    let issue = child_node("is-1", NodeLevel::Issue, "Login page", "ms-1");
    vec![init, project, milestone, issue]
}

fn options() -> DiscoveryOptions {
    DiscoveryOptions {
        tracking: Some(PlatformId::from("jira")),
        retry: RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        ..DiscoveryOptions::default()
    }
}

fn engine(
    source: &Arc<InMemorySource>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    baselines: &Arc<InMemoryBaselineStore>,
) -> DiscoveryEngine {
    DiscoveryEngine::new(
        Arc::clone(source) as Arc<dyn SourceAdapter>,
        platforms,
        Arc::clone(baselines) as Arc<dyn BaselineStore>,
        options(),
    )
}

#[tokio::test]
async fn verify_baseline_is_consumed_exactly_once() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira: Arc<dyn PlatformAdapter> = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let baselines = Arc::new(InMemoryBaselineStore::new());
    let engine = engine(&source, vec![jira], &baselines);

    engine.capture_verify(&scope()).await.expect("capture");
    assert!(baselines.peek_verify(&scope()).expect("peek").is_some());

    let report = engine.verify(&scope()).await.expect("verify pass");
    assert_eq!(report.delta.baseline_kind, BaselineKind::Verify);
    assert!(report.delta.is_empty());

    // Consumed by the pass; a second verify has nothing to diff against.
    assert!(baselines.peek_verify(&scope()).expect("peek").is_none());
    let error = engine.verify(&scope()).await.expect_err("slot is empty");
    assert!(matches!(error, SyncError::BaselineNotFound { .. }));
}

#[tokio::test]
async fn verify_reports_status_movement_across_a_reconciliation() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let github = Arc::new(InMemoryPlatform::issues_only("github", "GH"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone(), github.clone()];
    let baselines = Arc::new(InMemoryBaselineStore::new());
    let engine = engine(&source, platforms.clone(), &baselines);

    let before = engine.capture_verify(&scope()).await.expect("capture");
    assert_eq!(before.count_with(SyncStatus::NotSynced), 3);

    let reconcile = ReconcileEngine::new(
        Arc::clone(&source) as Arc<dyn SourceAdapter>,
        platforms,
        Arc::clone(&baselines) as Arc<dyn BaselineStore>,
        EngineOptions {
            tracking: Some(PlatformId::from("jira")),
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            ..EngineOptions::default()
        },
    );
    reconcile.run(&scope()).await.expect("reconciliation");

    let report = engine.verify(&scope()).await.expect("verify pass");
    assert_eq!(report.discovery.count_with(SyncStatus::Synced), 3);

    let changes = &report.delta.records.status_changes;
    assert_eq!(changes.len(), 3);
    assert!(
        changes
            .iter()
            .all(|change| change.from == SyncStatus::NotSynced && change.to == SyncStatus::Synced)
    );
    assert!(report.delta.records.appeared.is_empty());
    assert!(report.delta.records.disappeared.is_empty());

    // The run recorded the adopted counterparts on the source nodes.
    let changed = &report.delta.nodes.changed;
    assert_eq!(changed.len(), 3);
    assert!(changed.iter().all(|node| node.fields == vec![NodeField::Links]));
}

#[tokio::test]
async fn diff_since_reports_structural_changes_and_keeps_the_baseline() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira: Arc<dyn PlatformAdapter> = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let baselines = Arc::new(InMemoryBaselineStore::new());
    let engine = engine(&source, vec![jira], &baselines);

    engine.capture_comparison(&scope()).await.expect("capture");
    let day = baselines.list_comparisons(&scope()).expect("list")[0];

    let mut reshaped = sample_nodes();
    reshaped.retain(|node| node.id.as_str() != "is-1");
    for node in &mut reshaped {
        match node.id.as_str() {
            "ms-1" => node.name = "GA rollout".to_owned(),
            "proj-1" => node.target_date = Some(TargetDate::explicit(date(2026, 7, 31))),
            _ => {}
        }
    }
    reshaped.push(child_node("is-2", NodeLevel::Issue, "Signup page", "ms-1"));
    source.set_nodes(&scope(), reshaped);

    let report = engine.diff_since(&scope(), day).await.expect("diff");
    assert_eq!(report.delta.baseline_kind, BaselineKind::Comparison);
    assert_eq!(report.delta.nodes.added, vec![NodeId::from("is-2")]);
    assert_eq!(report.delta.nodes.removed, vec![NodeId::from("is-1")]);
    let changed = &report.delta.nodes.changed;
    assert_eq!(changed.len(), 2);
    assert_eq!(changed[0].node_id, NodeId::from("ms-1"));
    assert_eq!(changed[0].fields, vec![NodeField::Name]);
    assert_eq!(changed[1].node_id, NodeId::from("proj-1"));
    assert_eq!(changed[1].fields, vec![NodeField::TargetDate]);

    // Nothing was linked in either pass, so only membership moved.
    assert_eq!(report.delta.records.appeared, vec![NodeId::from("is-2")]);
    assert_eq!(report.delta.records.disappeared, vec![NodeId::from("is-1")]);
    assert!(report.delta.records.status_changes.is_empty());

    // Comparison baselines persist; the same diff works twice.
    assert!(baselines.comparison_on(&scope(), day).is_ok());
    engine.diff_since(&scope(), day).await.expect("second diff");
}

#[tokio::test]
async fn missing_comparison_baseline_is_a_typed_error() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira: Arc<dyn PlatformAdapter> = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let baselines = Arc::new(InMemoryBaselineStore::new());
    let engine = engine(&source, vec![jira], &baselines);

    let error = engine
        .diff_since(&scope(), date(2026, 1, 1))
        .await
        .expect_err("no baseline");
    assert!(matches!(error, SyncError::BaselineNotFound { .. }));
}
