use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Edge changes for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkDiff {
    pub retract: Vec<String>,
    pub add: Vec<String>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.retract.is_empty() && self.add.is_empty()
    }
}

/// Bidirectional link index: target -> referencing documents, and
/// document -> outbound targets. The two maps always mirror each other.
#[derive(Debug, Default, Clone)]
pub struct BacklinkIndex {
    backlinks: HashMap<String, BTreeSet<String>>,
    outbound: HashMap<String, BTreeSet<String>>,
}

impl BacklinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored `(target, document)` edges.
    pub fn from_edges(edges: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut index = Self::new();
        for (target, document) in edges {
            index.insert_edge(&target, &document);
        }
        index
    }

    /// What must change for `document` to reference exactly `targets`.
    pub fn diff(&self, document: &str, targets: &BTreeSet<String>) -> LinkDiff {
        let empty = BTreeSet::new();
        let current = self.outbound.get(document).unwrap_or(&empty);
        LinkDiff {
            retract: current.difference(targets).cloned().collect(),
            add: targets.difference(current).cloned().collect(),
        }
    }

    pub fn apply(&mut self, document: &str, diff: &LinkDiff) {
        for target in &diff.retract {
            self.remove_edge(target, document);
        }
        for target in &diff.add {
            self.insert_edge(target, document);
        }
    }

    /// Documents referencing `target`, sorted.
    pub fn backlinks(&self, target: &str) -> Vec<String> {
        self.backlinks
            .get(target)
            .map(|docs| docs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn outbound(&self, document: &str) -> Vec<String> {
        self.outbound
            .get(document)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.outbound.values().map(BTreeSet::len).sum()
    }

    fn insert_edge(&mut self, target: &str, document: &str) {
        self.backlinks
            .entry(target.to_string())
            .or_default()
            .insert(document.to_string());
        self.outbound
            .entry(document.to_string())
            .or_default()
            .insert(target.to_string());
    }

    fn remove_edge(&mut self, target: &str, document: &str) {
        if let Some(docs) = self.backlinks.get_mut(target) {
            docs.remove(document);
            if docs.is_empty() {
                self.backlinks.remove(target);
            }
        }
        if let Some(targets) = self.outbound.get_mut(document) {
            targets.remove(target);
            if targets.is_empty() {
                self.outbound.remove(document);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let forward = self
            .outbound
            .iter()
            .all(|(doc, targets)| targets.iter().all(|t| self.backlinks.get(t).is_some_and(|d| d.contains(doc))));
        let reverse = self
            .backlinks
            .iter()
            .all(|(target, docs)| docs.iter().all(|d| self.outbound.get(d).is_some_and(|t| t.contains(target))));
        forward && reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_update_replaces_stale_edges() {
        let mut index = BacklinkIndex::new();
        let first = index.diff("d", &set(&["a", "b"]));
        index.apply("d", &first);

        let second = index.diff("d", &set(&["b", "c"]));
        assert_eq!(second.retract, vec!["a"]);
        assert_eq!(second.add, vec!["c"]);
        index.apply("d", &second);

        assert!(index.backlinks("a").is_empty());
        assert_eq!(index.backlinks("b"), vec!["d"]);
        assert_eq!(index.backlinks("c"), vec!["d"]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_multiple_sources_to_same_target() {
        let mut index = BacklinkIndex::new();
        for doc in ["notes", "projects"] {
            let diff = index.diff(doc, &set(&["ideas"]));
            index.apply(doc, &diff);
        }
        assert_eq!(index.backlinks("ideas"), vec!["notes", "projects"]);

        let clear = index.diff("notes", &BTreeSet::new());
        index.apply("notes", &clear);
        assert_eq!(index.backlinks("ideas"), vec!["projects"]);
        assert!(index.outbound("notes").is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_same_targets_is_empty_diff() {
        let mut index = BacklinkIndex::from_edges([("a".to_string(), "d".to_string())]);
        assert!(index.diff("d", &set(&["a"])).is_empty());
        index.apply("d", &LinkDiff::default());
        assert_eq!(index.edge_count(), 1);
    }
}
