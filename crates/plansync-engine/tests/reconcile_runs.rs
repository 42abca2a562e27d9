use std::sync::Arc;

use chrono::NaiveDate;

use plansync_adapters::test_support::{InMemoryPlatform, InMemorySource, child_node, node};
use plansync_adapters::{
    AdapterError, PlatformAdapter, RemoteItem, RemoteRelease, RetryPolicy, SourceAdapter,
};
use plansync_core::{
    ExternalLink, InMemoryBaselineStore, NodeLevel, PlanNode, PlatformId, RemoteId, RemoteKind,
    ScopeId, TargetDate,
};
use plansync_engine::{EngineOptions, NodeOutcome, ReconcileEngine, RunReport};

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

fn options() -> EngineOptions {
    EngineOptions {
        tracking: Some(PlatformId::from("jira")),
        retry: RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        ..EngineOptions::default()
    }
}

fn engine(
    source: &Arc<InMemorySource>,
    platforms: Vec<Arc<dyn PlatformAdapter>>,
    options: EngineOptions,
) -> ReconcileEngine {
    ReconcileEngine::new(
        Arc::clone(source) as Arc<dyn SourceAdapter>,
        platforms,
        Arc::new(InMemoryBaselineStore::new()),
        options,
    )
}

fn outcome<'a>(report: &'a RunReport, node: &str, platform: &str) -> &'a NodeOutcome {
    report
        .nodes
        .iter()
        .find(|entry| entry.node_id.as_str() == node)
        .and_then(|entry| entry.outcome_for(&PlatformId::from(platform)))
        .expect("outcome present")
}

#[tokio::test]
async fn first_run_creates_everywhere_and_second_run_writes_nothing() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let github = Arc::new(InMemoryPlatform::issues_only("github", "GH"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone(), github.clone()];
    let engine = engine(&source, platforms, options());

    let first = engine.run(&scope()).await.expect("first run");
    assert_eq!(first.nodes.len(), 4);
    assert!(matches!(
        outcome(&first, "ms-1", "jira"),
        NodeOutcome::Created { .. }
    ));
    assert!(matches!(
        outcome(&first, "ms-1", "github"),
        NodeOutcome::Created { .. }
    ));
    assert!(!first.is_degraded());

    // Three creates, plus the milestone body gaining the github reference
    // once that counterpart exists.
    assert_eq!(jira.write_count(), 4);
    assert_eq!(github.write_count(), 1);

    // Tracking platform keeps plain names; the other platform carries the
    // tracking marker.
    let epic = jira.item(&RemoteId::from("PLAT-1")).expect("epic");
    assert_eq!(epic.title, "Auth revamp");
    let task = jira.item(&RemoteId::from("PLAT-2")).expect("task");
    assert_eq!(task.title, "Beta rollout");
    assert_eq!(task.parent, Some(RemoteId::from("PLAT-1")));
    assert!(task.body.contains("Ref: plan plan://ms-1"));
    assert!(task.body.contains("Ref: github github://GH-1"));
    let gh_issue = github.item(&RemoteId::from("GH-1")).expect("issue");
    assert_eq!(gh_issue.title, "[PLAT-2] Beta rollout");
    assert!(gh_issue.body.contains("Ref: jira jira://PLAT-2"));

    let second = engine.run(&scope()).await.expect("second run");
    assert_eq!(second.write_count(), 0);
    assert_eq!(jira.write_count(), 4);
    assert_eq!(github.write_count(), 1);
    for entry in &second.nodes {
        for per_platform in &entry.outcomes {
            assert!(
                matches!(per_platform.outcome, NodeOutcome::Unchanged { .. }),
                "expected {} on {} to be unchanged",
                entry.node_id,
                per_platform.platform
            );
        }
    }
}

#[tokio::test]
async fn ambiguous_candidates_block_every_write_for_the_node() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(
        &scope(),
        vec![node("ms-1", NodeLevel::Milestone, "Beta rollout")],
    );
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    for remote_id in ["PLAT-90", "PLAT-91"] {
        jira.seed_item(
            &scope(),
            RemoteItem {
                remote_id: RemoteId::from(remote_id),
                kind: RemoteKind::Task,
                title: "Beta rollout".to_owned(),
                body: String::new(),
                target_date: None,
                parent: None,
                release: None,
            },
        );
    }
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = engine(&source, platforms, options());

    let report = engine.run(&scope()).await.expect("run");
    match outcome(&report, "ms-1", "jira") {
        NodeOutcome::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
        other => panic!("expected an ambiguous outcome, got {other:?}"),
    }
    assert_eq!(jira.write_count(), 0);
    assert_eq!(jira.items_in_scope(&scope()).len(), 2);
    assert!(source.recorded_links().is_empty());
}

#[tokio::test]
async fn offline_platform_degrades_the_run_and_spares_the_rest() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let github = Arc::new(InMemoryPlatform::issues_only("github", "GH"));
    github.set_offline(Some("maintenance window"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone(), github.clone()];
    let engine = engine(&source, platforms, options());

    let report = engine.run(&scope()).await.expect("run");
    assert_eq!(report.degraded_platforms, vec![PlatformId::from("github")]);
    assert!(report.is_degraded());
    assert!(matches!(
        outcome(&report, "ms-1", "github"),
        NodeOutcome::SkippedPlatformDown
    ));
    assert!(matches!(
        outcome(&report, "ms-1", "jira"),
        NodeOutcome::Created { .. }
    ));
    assert_eq!(github.write_count(), 0);
    assert_eq!(jira.write_count(), 3);
}

#[tokio::test]
async fn lost_tracking_marker_is_restored_without_touching_other_fields() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let github = Arc::new(InMemoryPlatform::issues_only("github", "GH"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone(), github.clone()];
    let engine = engine(&source, platforms, options());

    engine.run(&scope()).await.expect("first run");
    let gh_id = RemoteId::from("GH-1");
    let before = github.item(&gh_id).expect("issue before");
    let writes_before = github.write_count();
    github.set_item_title(&gh_id, "Beta rollout");

    let report = engine.run(&scope()).await.expect("second run");
    assert!(matches!(
        outcome(&report, "ms-1", "github"),
        NodeOutcome::Updated { .. }
    ));
    assert!(matches!(
        outcome(&report, "ms-1", "jira"),
        NodeOutcome::Unchanged { .. }
    ));

    let after = github.item(&gh_id).expect("issue after");
    assert_eq!(after.title, "[PLAT-2] Beta rollout");
    assert_eq!(after.body, before.body);
    assert_eq!(after.target_date, before.target_date);
    assert_eq!(github.write_count(), writes_before + 1);
}

#[tokio::test]
async fn validation_rejection_skips_one_node_not_the_run() {
    let source = Arc::new(InMemorySource::new("plan"));
    let mut milestone = node("ms-1", NodeLevel::Milestone, "Beta rollout");
    milestone.sort_key = 1.0;
    let issue = child_node("is-1", NodeLevel::Issue, "Login page", "ms-1");
    source.set_nodes(&scope(), vec![milestone, issue]);
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    jira.push_failure_for("create", AdapterError::Invalid("summary too long".to_owned()));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = engine(&source, platforms, options());

    let report = engine.run(&scope()).await.expect("run");
    match outcome(&report, "ms-1", "jira") {
        NodeOutcome::SkippedValidation { detail } => {
            assert!(detail.contains("summary too long"));
        }
        other => panic!("expected a validation skip, got {other:?}"),
    }
    assert!(matches!(
        outcome(&report, "is-1", "jira"),
        NodeOutcome::Created { .. }
    ));
    assert!(!report.is_degraded());
    assert_eq!(jira.write_count(), 1);
}

#[tokio::test]
async fn cancelled_run_reports_every_subtree_without_writing() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let github = Arc::new(InMemoryPlatform::issues_only("github", "GH"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone(), github.clone()];
    let engine = engine(&source, platforms, options());
    engine.cancel_token().cancel();

    let report = engine.run(&scope()).await.expect("run");
    assert!(report.cancelled);
    assert_eq!(report.nodes.len(), 4);
    for entry in &report.nodes {
        for per_platform in &entry.outcomes {
            assert!(matches!(per_platform.outcome, NodeOutcome::SkippedCancelled));
        }
    }
    assert_eq!(report.write_count(), 0);
    assert_eq!(jira.write_count(), 0);
    assert_eq!(github.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_degrade_the_platform_mid_run() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let retries = RetryPolicy::default().max_attempts;
    for _ in 0..retries {
        jira.push_failure_for("search", AdapterError::Transient("gateway flapping".to_owned()));
    }
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = engine(
        &source,
        platforms,
        EngineOptions {
            tracking: Some(PlatformId::from("jira")),
            ..EngineOptions::default()
        },
    );

    let report = engine.run(&scope()).await.expect("run");
    assert_eq!(report.degraded_platforms, vec![PlatformId::from("jira")]);
    assert!(matches!(
        outcome(&report, "proj-1", "jira"),
        NodeOutcome::SkippedPlatformDown
    ));
    assert!(matches!(
        outcome(&report, "ms-1", "jira"),
        NodeOutcome::SkippedPlatformDown
    ));
    assert_eq!(jira.write_count(), 0);

    let searches = jira
        .calls()
        .iter()
        .filter(|call| {
            matches!(
                call,
                plansync_adapters::test_support::RecordedCall::Search { .. }
            )
        })
        .count();
    assert_eq!(searches as u32, retries);
}

#[tokio::test]
async fn matching_release_is_linked_to_project_and_milestones() {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), sample_nodes());
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    jira.seed_release(
        &scope(),
        RemoteRelease {
            remote_id: RemoteId::from("REL-1"),
            name: "Auth Revamp".to_owned(),
            target_date: None,
        },
    );
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = engine(&source, platforms, options());

    engine.run(&scope()).await.expect("first run");
    let task = jira.item(&RemoteId::from("PLAT-2")).expect("task");
    assert_eq!(task.release, Some(RemoteId::from("REL-1")));
    let release_link = ExternalLink {
        platform: PlatformId::from("jira"),
        remote_id: RemoteId::from("REL-1"),
        remote_kind: RemoteKind::Release,
    };
    assert!(
        source
            .recorded_links()
            .iter()
            .any(|(node_id, link)| node_id.as_str() == "proj-1" && link == &release_link)
    );

    let writes = jira.write_count();
    let second = engine.run(&scope()).await.expect("second run");
    assert_eq!(second.write_count(), 0);
    assert_eq!(jira.write_count(), writes);
}
