//! Resolved dependency forest
//!
//! Nodes live in one arena and refer to each other by index. A node with no
//! callers in the report, or called only by the container itself, is a root.

use super::{ArtifactRef, License, ReportError, ResolutionReport, ResolvedNode};
use std::collections::HashSet;
use std::path::Path;

/// Index of a node in the forest arena
pub type NodeId = usize;

/// The forest of resolved dependencies
#[derive(Debug, Clone, Default)]
pub struct ResolvedForest {
    nodes: Vec<ResolvedNode>,
    children: Vec<Vec<NodeId>>,
    roots: Vec<NodeId>,
}

impl ResolvedForest {
    /// A forest with no nodes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the report at `path`, resolving relative artifact locations
    /// against `root`. A missing report is an empty forest.
    pub fn load(path: &Path, root: &Path) -> Result<Self, ReportError> {
        if !path.exists() {
            return Ok(Self::empty());
        }

        let mut report = ResolutionReport::from_file(path)?;
        for node in &mut report.nodes {
            for artifact in &mut node.artifacts {
                if let Some(location) = artifact.location.as_mut() {
                    if location.is_relative() {
                        *location = root.join(&*location);
                    }
                }
            }
        }
        Ok(Self::from_report(report))
    }

    /// Link report entries into a forest
    pub fn from_report(report: ResolutionReport) -> Self {
        let nodes = report.nodes;
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
        let mut roots = Vec::new();

        for (id, node) in nodes.iter().enumerate() {
            let mut has_parent = false;
            for caller in &node.callers {
                // First matching parent wins
                if let Some(parent) = nodes.iter().position(|p| p.is_caller(caller)) {
                    if parent != id && !children[parent].contains(&id) {
                        children[parent].push(id);
                    }
                    has_parent = true;
                }
            }
            if !has_parent {
                roots.push(id);
            }
        }

        Self {
            nodes,
            children,
            roots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of report entries, evicted ones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &ResolvedNode {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id]
    }

    /// Every non-evicted node reachable from the roots, pre-order, without
    /// duplicates
    ///
    /// Evicted nodes are skipped together with everything below them.
    pub fn all(&self) -> Vec<&ResolvedNode> {
        let mut seen: HashSet<(&str, &str, &str, &str)> = HashSet::new();
        let mut on_path = vec![false; self.nodes.len()];
        let mut result = Vec::new();

        for &root in &self.roots {
            self.collect(root, &mut seen, &mut on_path, &mut result);
        }
        result
    }

    fn collect<'a>(
        &'a self,
        id: NodeId,
        seen: &mut HashSet<(&'a str, &'a str, &'a str, &'a str)>,
        on_path: &mut [bool],
        result: &mut Vec<&'a ResolvedNode>,
    ) {
        let node = &self.nodes[id];
        if node.is_evicted() || on_path[id] {
            return;
        }

        if seen.insert(node.identity()) {
            result.push(node);
        }

        on_path[id] = true;
        for &child in &self.children[id] {
            self.collect(child, seen, on_path, result);
        }
        on_path[id] = false;
    }

    /// Artifacts of every node in [`all`](Self::all), in the same order
    pub fn artifacts(&self) -> Vec<&ArtifactRef> {
        self.all()
            .into_iter()
            .flat_map(|node| node.artifacts.iter())
            .collect()
    }

    /// Distinct licenses, deduplicated by URL
    pub fn licenses(&self) -> Vec<&License> {
        let mut urls = HashSet::new();
        let mut licenses = Vec::new();
        for node in self.all() {
            for license in &node.licenses {
                if urls.insert(license.url.as_str()) {
                    licenses.push(license);
                }
            }
        }
        licenses
    }

    /// Nodes carrying a license with the same URL
    pub fn by_license(&self, license: &License) -> Vec<&ResolvedNode> {
        self.all()
            .into_iter()
            .filter(|node| node.licenses.iter().any(|l| l.url == license.url))
            .collect()
    }

    /// Resolved revision of a module, ignoring evicted nodes
    pub fn version(&self, group: &str, name: &str) -> Option<&str> {
        self.all()
            .into_iter()
            .find(|node| node.group == group && node.name == name)
            .map(|node| node.revision.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Caller;
    use super::*;
    use crate::ledger::ModuleId;
    use std::path::PathBuf;

    fn node(name: &str, revision: &str, callers: &[(&str, &str)]) -> ResolvedNode {
        let mut node = ResolvedNode::new("g", name, revision);
        node.callers = callers
            .iter()
            .map(|(caller, rev)| Caller {
                group: if *caller == "container" { "vessel" } else { "g" }.to_string(),
                name: caller.to_string(),
                revision: rev.to_string(),
                requested: String::new(),
            })
            .collect();
        node
    }

    fn forest(nodes: Vec<ResolvedNode>) -> ResolvedForest {
        ResolvedForest::from_report(ResolutionReport {
            module: ModuleId::default_container(),
            nodes,
        })
    }

    fn names(nodes: Vec<&ResolvedNode>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_shared_child_listed_once() {
        // A -> B -> C and A -> C
        let forest = forest(vec![
            node("a", "1", &[("container", "working")]),
            node("b", "1", &[("a", "1")]),
            node("c", "1", &[("b", "1"), ("a", "1")]),
        ]);

        assert_eq!(forest.roots(), &[0]);
        assert_eq!(forest.children(0), &[1, 2]);
        assert_eq!(forest.children(1), &[2]);
        assert_eq!(names(forest.all()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_evicted_subtree_skipped() {
        let mut old = node("b", "1", &[("a", "1")]);
        old.evicted = Some("latest-revision".to_string());

        let forest = forest(vec![
            node("a", "1", &[("container", "working")]),
            old,
            node("c", "1", &[("b", "1")]),
            node("b", "2", &[("container", "working")]),
        ]);

        // Still linked under its parent
        assert_eq!(forest.children(0), &[1]);
        let all = forest.all();
        assert_eq!(names(all.clone()), vec!["a", "b"]);
        assert_eq!(all[1].revision, "2");
        assert_eq!(forest.version("g", "b"), Some("2"));
    }

    #[test]
    fn test_unlinked_nodes_are_roots() {
        let forest = forest(vec![node("x", "1", &[]), node("y", "1", &[("z", "9")])]);
        assert_eq!(forest.roots(), &[0, 1]);
    }

    #[test]
    fn test_cycle_terminates() {
        let forest = forest(vec![
            node("root", "1", &[("container", "working")]),
            node("a", "1", &[("root", "1"), ("b", "1")]),
            node("b", "1", &[("a", "1")]),
        ]);
        assert_eq!(names(forest.all()), vec!["root", "a", "b"]);
    }

    #[test]
    fn test_licenses_deduplicated_by_url() {
        let apache = License {
            name: "Apache".to_string(),
            url: "https://apache.org/l".to_string(),
        };
        let mut a = node("a", "1", &[]);
        a.licenses.push(apache.clone());
        let mut b = node("b", "1", &[]);
        b.licenses.push(License {
            name: "Apache License".to_string(),
            url: apache.url.clone(),
        });
        let c = node("c", "1", &[]);

        let forest = forest(vec![a, b, c]);
        assert_eq!(forest.licenses().len(), 1);
        assert_eq!(names(forest.by_license(&apache)), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_report_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let forest = ResolvedForest::load(&temp.path().join("none.xml"), temp.path()).unwrap();
        assert!(forest.is_empty());
        assert!(forest.all().is_empty());
    }

    #[test]
    fn test_load_resolves_relative_locations() {
        let temp = tempfile::tempdir().unwrap();
        let mut a = node("a", "1", &[]);
        a.artifacts.push(ArtifactRef {
            name: "a".to_string(),
            kind: "jar".to_string(),
            ext: "jar".to_string(),
            size: None,
            status: "successful".to_string(),
            location: Some(PathBuf::from("cache/a.jar")),
        });
        let report = ResolutionReport {
            module: ModuleId::default_container(),
            nodes: vec![a],
        };
        let path = temp.path().join("report.xml");
        report.to_file(&path).unwrap();

        let forest = ResolvedForest::load(&path, temp.path()).unwrap();
        assert_eq!(
            forest.artifacts()[0].location,
            Some(temp.path().join("cache/a.jar"))
        );
    }
}
