use std::collections::HashMap;

use plansync_core::{ExternalLink, NodeId, NodeLevel, PlanNode, PlatformId, RemoteKind};

/// Indexed snapshot of one scope's hierarchy, fixed for the duration of a run.
/// Children are ordered by sort key so traversal order is deterministic.
pub struct HierarchyStore {
    nodes: HashMap<NodeId, PlanNode>,
    roots: Vec<NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl HierarchyStore {
    pub fn from_nodes(nodes: Vec<PlanNode>) -> Self {
        let mut by_id: HashMap<NodeId, PlanNode> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            by_id.insert(node.id.clone(), node);
        }

        let mut roots = Vec::new();
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in by_id.values() {
            match &node.parent_id {
                Some(parent) if by_id.contains_key(parent) => {
                    children
                        .entry(parent.clone())
                        .or_default()
                        .push(node.id.clone());
                }
                Some(parent) => {
                    tracing::warn!(
                        node = node.id.as_str(),
                        parent = parent.as_str(),
                        "parent not in hierarchy, treating node as a root"
                    );
                    roots.push(node.id.clone());
                }
                None => roots.push(node.id.clone()),
            }
        }

        let ordering = |a: &NodeId, b: &NodeId, by_id: &HashMap<NodeId, PlanNode>| {
            let left = &by_id[a];
            let right = &by_id[b];
            left.sort_key
                .total_cmp(&right.sort_key)
                .then_with(|| left.id.cmp(&right.id))
        };
        roots.sort_by(|a, b| ordering(a, b, &by_id));
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| ordering(a, b, &by_id));
        }

        Self {
            nodes: by_id,
            roots,
            children,
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: &NodeId) -> Option<&PlanNode> {
        let parent_id = self.nodes.get(id)?.parent_id.as_ref()?;
        self.nodes.get(parent_id)
    }

    /// Every node in depth-first order, each parent before its children.
    pub fn traverse(&self) -> Vec<&PlanNode> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&NodeId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            ordered.push(node);
            stack.extend(self.children(id).iter().rev());
        }
        ordered
    }

    /// The subtree under a node, the node itself excluded, in traversal order.
    pub fn descendants(&self, id: &NodeId) -> Vec<&PlanNode> {
        let mut ordered = Vec::new();
        let mut stack: Vec<&NodeId> = self.children(id).iter().rev().collect();
        while let Some(id) = stack.pop() {
            ordered.push(&self.nodes[id]);
            stack.extend(self.children(id).iter().rev());
        }
        ordered
    }

    pub fn at_level(&self, level: NodeLevel) -> Vec<&PlanNode> {
        self.traverse()
            .into_iter()
            .filter(|node| node.level == level)
            .collect()
    }

    pub fn link(
        &self,
        id: &NodeId,
        platform: &PlatformId,
        kind: RemoteKind,
    ) -> Option<&ExternalLink> {
        self.nodes.get(id)?.link_for(platform, kind)
    }

    /// Closest ancestor carrying a target date, walking toward the root. Hop
    /// count is bounded so a malformed parent chain cannot loop forever.
    pub fn nearest_dated_ancestor(&self, id: &NodeId) -> Option<&PlanNode> {
        let mut current = self.parent(id);
        let mut hops = 0;
        while let Some(node) = current {
            if node.target_date.is_some() {
                return Some(node);
            }
            hops += 1;
            if hops > self.nodes.len() {
                return None;
            }
            current = self.parent(&node.id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use plansync_adapters::test_support::{child_node, node};
    use plansync_core::TargetDate;

    fn sample() -> HierarchyStore {
        let mut init = node("init-1", NodeLevel::Initiative, "Platform 2026");
        init.target_date = Some(TargetDate::explicit(date(2026, 12, 31)));
        let mut proj = child_node("proj-1", NodeLevel::Project, "Auth revamp", "init-1");
        proj.sort_key = 1.0;
        let mut ms_b = child_node("ms-2", NodeLevel::Milestone, "Beta", "proj-1");
        ms_b.sort_key = 2.0;
        let mut ms_a = child_node("ms-1", NodeLevel::Milestone, "Alpha", "proj-1");
        ms_a.sort_key = 1.0;
        let issue = child_node("is-1", NodeLevel::Issue, "Login page", "ms-1");
        HierarchyStore::from_nodes(vec![ms_b, init, issue, proj, ms_a])
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn traversal_visits_parents_first_in_sort_order() {
        let store = sample();
        let order: Vec<&str> = store
            .traverse()
            .into_iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(order, vec!["init-1", "proj-1", "ms-1", "is-1", "ms-2"]);
    }

    #[test]
    fn descendants_exclude_the_node_itself() {
        let store = sample();
        let under: Vec<&str> = store
            .descendants(&NodeId::from("proj-1"))
            .into_iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(under, vec!["ms-1", "is-1", "ms-2"]);
    }

    #[test]
    fn unknown_parent_makes_the_node_a_root() {
        let stray = child_node("ms-9", NodeLevel::Milestone, "Stray", "gone");
        let store = HierarchyStore::from_nodes(vec![stray]);
        assert_eq!(store.roots(), &[NodeId::from("ms-9")]);
    }

    #[test]
    fn nearest_dated_ancestor_skips_undated_levels() {
        let store = sample();
        let ancestor = store
            .nearest_dated_ancestor(&NodeId::from("is-1"))
            .expect("dated ancestor");
        assert_eq!(ancestor.id.as_str(), "init-1");
        assert!(store.nearest_dated_ancestor(&NodeId::from("init-1")).is_none());
    }

    #[test]
    fn level_filter_returns_traversal_order() {
        let store = sample();
        let milestones: Vec<&str> = store
            .at_level(NodeLevel::Milestone)
            .into_iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(milestones, vec!["ms-1", "ms-2"]);
    }
}
