use std::sync::Arc;

use chrono::NaiveDate;

use plansync_adapters::test_support::{InMemoryPlatform, InMemorySource, child_node, node};
use plansync_adapters::{PlatformAdapter, SourceAdapter};
use plansync_core::{
    Baseline, BaselineStore, InMemoryBaselineStore, NodeLevel, PlanNode, PlatformId, RemoteId,
    ScopeId, TargetDate,
};
use plansync_engine::{EngineOptions, ReconcileEngine};

fn scope() -> ScopeId {
    ScopeId::from("scope-a")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Project with an explicit date; milestone and issue inherit it.
fn dated_nodes(project_date: NaiveDate) -> Vec<PlanNode> {
    let mut project = node("proj-1", NodeLevel::Project, "Auth revamp");
    project.target_date = Some(TargetDate::explicit(project_date));
    let mut milestone = child_node("ms-1", NodeLevel::Milestone, "Beta rollout", "proj-1");
    milestone.target_date = Some(TargetDate::inherited(project_date));
    let mut issue = child_node("is-1", NodeLevel::Issue, "Login page", "ms-1");
    issue.target_date = Some(TargetDate::inherited(project_date));
    vec![project, milestone, issue]
}

fn options() -> EngineOptions {
    EngineOptions {
        tracking: Some(PlatformId::from("jira")),
        ..EngineOptions::default()
    }
}

struct Fixture {
    source: Arc<InMemorySource>,
    jira: Arc<InMemoryPlatform>,
    baselines: Arc<InMemoryBaselineStore>,
    engine: ReconcileEngine,
}

/// Runs one reconciliation at the old date and stores it as the comparison
/// baseline, leaving the items holding `old`.
async fn converged_fixture(old: NaiveDate) -> Fixture {
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), dated_nodes(old));
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let baselines = Arc::new(InMemoryBaselineStore::new());
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = ReconcileEngine::new(
        Arc::clone(&source) as Arc<dyn SourceAdapter>,
        platforms,
        Arc::clone(&baselines) as Arc<dyn BaselineStore>,
        options(),
    );

    engine.run(&scope()).await.expect("converging run");
    baselines
        .put(&Baseline::comparison(scope(), dated_nodes(old), Vec::new()))
        .expect("store comparison baseline");

    Fixture {
        source,
        jira,
        baselines,
        engine,
    }
}

#[tokio::test]
async fn moved_parent_date_cascades_to_inheriting_descendants() {
    let old = date(2026, 3, 31);
    let new = date(2026, 4, 30);
    let fixture = converged_fixture(old).await;
    fixture.source.set_nodes(&scope(), dated_nodes(new));

    let report = fixture.engine.run(&scope()).await.expect("cascade run");
    assert_eq!(report.propagated.len(), 2);
    for entry in &report.propagated {
        assert_eq!(entry.from, old);
        assert_eq!(entry.to, new);
    }

    // Explicit project date forced by the update pass, inherited dates by
    // the cascade pass.
    for remote_id in ["PLAT-1", "PLAT-2", "PLAT-3"] {
        let item = fixture
            .jira
            .item(&RemoteId::from(remote_id))
            .expect("item");
        assert_eq!(item.target_date, Some(new), "{remote_id}");
    }
    assert_eq!(report.write_count(), 3);
}

#[tokio::test]
async fn hand_edited_downstream_date_is_left_alone() {
    let old = date(2026, 3, 31);
    let new = date(2026, 4, 30);
    let pinned = date(2026, 5, 15);
    let fixture = converged_fixture(old).await;
    fixture.source.set_nodes(&scope(), dated_nodes(new));
    fixture
        .jira
        .set_item_date(&RemoteId::from("PLAT-2"), Some(pinned));

    let report = fixture.engine.run(&scope()).await.expect("cascade run");
    let propagated: Vec<&str> = report
        .propagated
        .iter()
        .map(|entry| entry.node_id.as_str())
        .collect();
    assert_eq!(propagated, vec!["is-1"]);

    let milestone = fixture
        .jira
        .item(&RemoteId::from("PLAT-2"))
        .expect("milestone item");
    assert_eq!(milestone.target_date, Some(pinned));
    let issue = fixture
        .jira
        .item(&RemoteId::from("PLAT-3"))
        .expect("issue item");
    assert_eq!(issue.target_date, Some(new));
}

#[tokio::test]
async fn without_a_baseline_no_dates_cascade() {
    let old = date(2026, 3, 31);
    let new = date(2026, 4, 30);
    let source = Arc::new(InMemorySource::new("plan"));
    source.set_nodes(&scope(), dated_nodes(old));
    let jira = Arc::new(InMemoryPlatform::tracking("jira", "PLAT"));
    let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![jira.clone()];
    let engine = ReconcileEngine::new(
        Arc::clone(&source) as Arc<dyn SourceAdapter>,
        platforms,
        Arc::new(InMemoryBaselineStore::new()),
        options(),
    );
    engine.run(&scope()).await.expect("converging run");

    source.set_nodes(&scope(), dated_nodes(new));
    let report = engine.run(&scope()).await.expect("second run");
    assert!(report.propagated.is_empty());

    // The explicit project date still moves; the inherited ones wait for a
    // baseline to compare against.
    let epic = jira.item(&RemoteId::from("PLAT-1")).expect("epic");
    assert_eq!(epic.target_date, Some(new));
    let task = jira.item(&RemoteId::from("PLAT-2")).expect("task");
    assert_eq!(task.target_date, Some(old));
}

#[tokio::test]
async fn verify_baseline_feeds_cascades_and_survives_the_run() {
    let old = date(2026, 3, 31);
    let new = date(2026, 4, 30);
    let fixture = converged_fixture(old).await;
    // A pending verify snapshot takes precedence over comparison baselines
    // and must still be there for the verify pass afterwards.
    fixture
        .baselines
        .put(&Baseline::verify(scope(), dated_nodes(old), Vec::new()))
        .expect("store verify baseline");
    fixture.source.set_nodes(&scope(), dated_nodes(new));

    let report = fixture.engine.run(&scope()).await.expect("cascade run");
    assert_eq!(report.propagated.len(), 2);
    assert!(
        fixture
            .baselines
            .peek_verify(&scope())
            .expect("peek verify")
            .is_some()
    );
}
