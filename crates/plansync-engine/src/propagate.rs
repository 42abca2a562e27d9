use std::collections::HashMap;

use chrono::NaiveDate;

use plansync_core::{NodeId, PlanNode};

use crate::hierarchy::HierarchyStore;

/// One inherited date that should move downstream because its governing
/// ancestor's date moved since the prior snapshot. `expected` is the old
/// ancestor date; a downstream item showing anything else was edited by hand
/// and is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCascade {
    pub node_id: NodeId,
    pub expected: NaiveDate,
    pub target: NaiveDate,
}

/// Plans date cascades by comparing the current hierarchy against the nodes of
/// the prior baseline. Pure with respect to platforms; applying the plan is a
/// separate, write-side step.
pub fn plan_cascades(prior: &[PlanNode], store: &HierarchyStore) -> Vec<PlannedCascade> {
    let prior_dates: HashMap<&NodeId, Option<NaiveDate>> = prior
        .iter()
        .map(|node| (&node.id, node.target_date_value()))
        .collect();

    let mut planned = Vec::new();
    for node in store.traverse() {
        if !node.has_inherited_date() {
            continue;
        }
        let Some(ancestor) = store.nearest_dated_ancestor(&node.id) else {
            tracing::debug!(
                node = node.id.as_str(),
                "inherited date without a dated ancestor, nothing to cascade"
            );
            continue;
        };
        let Some(target) = ancestor.target_date_value() else {
            continue;
        };
        let Some(Some(expected)) = prior_dates.get(&ancestor.id).copied() else {
            // Ancestor is new since the snapshot, or had no date then; there
            // is no old value downstream items could still be holding.
            continue;
        };
        if expected == target {
            continue;
        }
        planned.push(PlannedCascade {
            node_id: node.id.clone(),
            expected,
            target,
        });
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use plansync_adapters::test_support::{child_node, node};
    use plansync_core::{NodeLevel, TargetDate};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn tree(project_date: NaiveDate) -> Vec<PlanNode> {
        let mut project = node("proj-1", NodeLevel::Project, "Auth revamp");
        project.target_date = Some(TargetDate::explicit(project_date));
        let mut milestone = child_node("ms-1", NodeLevel::Milestone, "Beta", "proj-1");
        milestone.target_date = Some(TargetDate::inherited(project_date));
        let mut issue = child_node("is-1", NodeLevel::Issue, "Login", "ms-1");
        issue.target_date = Some(TargetDate::inherited(project_date));
        vec![project, milestone, issue]
    }

    #[test]
    fn moved_ancestor_plans_every_inheriting_descendant() {
        let old = date(2026, 3, 31);
        let new = date(2026, 4, 30);
        let prior = tree(old);
        let store = HierarchyStore::from_nodes(tree(new));

        let planned = plan_cascades(&prior, &store);
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|cascade| {
            cascade.expected == old && cascade.target == new
        }));
        let nodes: Vec<&str> = planned
            .iter()
            .map(|cascade| cascade.node_id.as_str())
            .collect();
        assert_eq!(nodes, vec!["ms-1", "is-1"]);
    }

    #[test]
    fn unchanged_ancestor_plans_nothing() {
        let day = date(2026, 3, 31);
        let prior = tree(day);
        let store = HierarchyStore::from_nodes(tree(day));
        assert!(plan_cascades(&prior, &store).is_empty());
    }

    #[test]
    fn explicit_dates_are_never_cascaded() {
        let old = date(2026, 3, 31);
        let pinned = date(2026, 6, 1);
        let prior = tree(old);
        let mut current = tree(date(2026, 4, 30));
        for node in &mut current {
            if node.id.as_str() == "ms-1" {
                node.target_date = Some(TargetDate::explicit(pinned));
            }
        }
        let store = HierarchyStore::from_nodes(current);

        // The milestone itself is pinned; its issue now inherits from it.
        let planned = plan_cascades(&prior, &store);
        assert_eq!(
            planned,
            vec![PlannedCascade {
                node_id: NodeId::from("is-1"),
                expected: old,
                target: pinned,
            }]
        );
    }

    #[test]
    fn ancestor_missing_from_the_snapshot_is_skipped() {
        let new = date(2026, 4, 30);
        let store = HierarchyStore::from_nodes(tree(new));
        assert!(plan_cascades(&[], &store).is_empty());
    }
}
