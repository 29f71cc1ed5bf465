//! Catalog engine: resolution against a directory repository
//!
//! Layout: `<repo>/<group>/<name>/<revision>/module.toml`, next to the
//! artifact files `<name>-<revision>[-<classifier>].<ext>`.

use super::{EngineError, ResolutionEngine, ResolveMode, ResolveOutcome, ResolveRequest};
use crate::container::Container;
use crate::ledger::{DependencyLedger, ModuleId};
use crate::report::{ArtifactRef, Caller, License, ResolutionReport, ResolvedNode};
use crate::revision::{Revision, RevisionSpec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "module.toml";
const EVICTED_BY_CONFLICT: &str = "latest-revision";

/// Module metadata (module.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub homepage: String,

    #[serde(default)]
    pub licenses: Vec<MetadataLicense>,

    /// Published artifacts; a single jar when omitted
    #[serde(default)]
    pub artifacts: Option<Vec<MetadataArtifact>>,

    #[serde(default)]
    pub dependencies: Vec<MetadataDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLicense {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataArtifact {
    /// Defaults to the module name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type", default = "default_artifact_type")]
    pub kind: String,

    #[serde(default = "default_artifact_type")]
    pub ext: String,

    #[serde(default)]
    pub classifier: Option<String>,
}

fn default_artifact_type() -> String {
    "jar".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDependency {
    pub group: String,
    pub name: String,
    pub version: String,
}

/// Resolves against a local catalog directory
#[derive(Debug, Clone)]
pub struct CatalogEngine {
    repository: PathBuf,
}

impl CatalogEngine {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    /// The engine configured for `container`; `<root>/repository` by default
    pub fn for_container(container: &Container) -> Self {
        let repository = match &container.config().repository {
            Some(path) => container.absolute_path(path),
            None => container.root().join("repository"),
        };
        Self::new(repository)
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    fn module_dir(&self, group: &str, name: &str) -> PathBuf {
        self.repository.join(group).join(name)
    }

    /// Revisions published for a module
    pub fn available(&self, group: &str, name: &str) -> Result<Vec<Revision>, EngineError> {
        let dir = self.module_dir(group, name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EngineError::Repository { path: dir, source }),
        };

        let mut revisions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::Repository {
                path: dir.clone(),
                source,
            })?;
            if !entry.path().join(METADATA_FILE).is_file() {
                continue;
            }
            if let Ok(revision) = Revision::parse(&entry.file_name().to_string_lossy()) {
                revisions.push(revision);
            }
        }
        revisions.sort();
        Ok(revisions)
    }

    /// Metadata of one published revision
    pub fn metadata(&self, group: &str, name: &str, revision: &str) -> Result<ModuleMetadata, EngineError> {
        let path = self.module_dir(group, name).join(revision).join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|source| EngineError::Repository {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| EngineError::Metadata { path, source })
    }
}

impl ResolutionEngine for CatalogEngine {
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<ResolveOutcome, EngineError> {
        let mut resolution = Resolution::new(self, request.ledger);
        resolution.run(request.mode)?;

        let mut problems = resolution.problems;
        let mut report = ResolutionReport::new(request.ledger.module().clone());
        for node in resolution.nodes.into_iter().filter(|n| n.kept) {
            let mut resolved = node.resolved;
            if !resolved.is_evicted() {
                resolved.artifacts =
                    self.download(request.container, &resolved, &node.metadata, &mut problems)?;
            }
            report.nodes.push(resolved);
        }

        // Only the resolved revisions count; requested specs may differ
        let changed = match ResolutionReport::from_file(request.report_path) {
            Ok(previous) => resolved_revisions(&previous) != resolved_revisions(&report),
            Err(_) => true,
        };
        // A failed resolution leaves the last good report in place
        if problems.is_empty() {
            report.to_file(request.report_path)?;
        }

        tracing::debug!(
            modules = report.nodes.len(),
            changed,
            problems = problems.len(),
            "catalog resolution finished"
        );
        Ok(ResolveOutcome { changed, problems })
    }
}

impl CatalogEngine {
    /// Copy a node's artifacts into `<root>/cache/repository`
    fn download(
        &self,
        container: &Container,
        node: &ResolvedNode,
        metadata: &ModuleMetadata,
        problems: &mut Vec<String>,
    ) -> Result<Vec<ArtifactRef>, EngineError> {
        let default = vec![MetadataArtifact {
            name: None,
            kind: default_artifact_type(),
            ext: default_artifact_type(),
            classifier: None,
        }];
        let published = metadata.artifacts.as_ref().unwrap_or(&default);

        let mut artifacts = Vec::with_capacity(published.len());
        for artifact in published {
            let name = artifact.name.clone().unwrap_or_else(|| node.name.clone());
            let file_name = match &artifact.classifier {
                Some(classifier) => format!("{}-{}-{}.{}", name, node.revision, classifier, artifact.ext),
                None => format!("{}-{}.{}", name, node.revision, artifact.ext),
            };
            let source = self
                .module_dir(&node.group, &node.name)
                .join(&node.revision)
                .join(&file_name);
            let destination = container
                .cache_file("repository")
                .join(&node.group)
                .join(&node.name)
                .join(&node.revision)
                .join(&file_name);

            let mut reference = ArtifactRef {
                name,
                kind: artifact.kind.clone(),
                ext: artifact.ext.clone(),
                size: None,
                status: "failed".to_string(),
                location: None,
            };

            if source.is_file() {
                let size = copy_if_changed(&source, &destination)?;
                reference.size = Some(size);
                reference.status = "successful".to_string();
                reference.location = Some(container.relative_path(&destination));
            } else {
                tracing::warn!(module = %node, file = %file_name, "artifact missing from repository");
                problems.push(format!("download failed: {}:{}:{} {}", node.group, node.name, node.revision, file_name));
            }
            artifacts.push(reference);
        }
        Ok(artifacts)
    }
}

type ResolvedEntry<'a> = (&'a str, &'a str, &'a str, Option<&'a str>, Vec<Option<&'a Path>>);

fn resolved_revisions(report: &ResolutionReport) -> BTreeSet<ResolvedEntry<'_>> {
    report
        .nodes
        .iter()
        .map(|node| {
            (
                node.group.as_str(),
                node.name.as_str(),
                node.revision.as_str(),
                node.evicted.as_deref(),
                node.artifacts.iter().map(|a| a.location.as_deref()).collect(),
            )
        })
        .collect()
}

fn copy_if_changed(source: &Path, destination: &Path) -> Result<u64, EngineError> {
    let download_error = |source_err| EngineError::Download {
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
        source: source_err,
    };

    let content = fs::read(source).map_err(download_error)?;
    let unchanged = fs::read(destination)
        .map(|existing| Sha256::digest(&existing) == Sha256::digest(&content))
        .unwrap_or(false);
    if !unchanged {
        crate::ledger::write_atomically(destination, &content).map_err(download_error)?;
        tracing::debug!(file = %destination.display(), "downloaded");
    }
    Ok(content.len() as u64)
}

/// A pending request for a module
#[derive(Debug, Clone)]
struct Request {
    group: String,
    name: String,
    spec: String,
    caller: Caller,
    explicit: bool,
    force: bool,
    transitive: bool,
}

#[derive(Debug)]
struct NodeState {
    resolved: ResolvedNode,
    metadata: ModuleMetadata,
    forced: bool,
    kept: bool,
}

/// State of one resolution run
struct Resolution<'a> {
    engine: &'a CatalogEngine,
    ledger: &'a DependencyLedger,
    nodes: Vec<NodeState>,
    index: HashMap<(String, String, String), usize>,
    selected: HashMap<(String, String), usize>,
    expanded: HashSet<usize>,
    problems: Vec<String>,
}

impl<'a> Resolution<'a> {
    fn new(engine: &'a CatalogEngine, ledger: &'a DependencyLedger) -> Self {
        Self {
            engine,
            ledger,
            nodes: Vec::new(),
            index: HashMap::new(),
            selected: HashMap::new(),
            expanded: HashSet::new(),
            problems: Vec::new(),
        }
    }

    fn run(&mut self, mode: ResolveMode) -> Result<(), EngineError> {
        let ledger = self.ledger;
        let module = ledger.module();
        let mut queue: VecDeque<Request> = VecDeque::new();

        for dep in ledger.dependencies() {
            if mode == ResolveMode::Strict {
                if let Ok(spec) = RevisionSpec::parse(&dep.version) {
                    if spec.is_dynamic() {
                        self.problems.push(format!(
                            "dynamic revision {} of {}:{} is not allowed in strict mode",
                            dep.version, dep.group, dep.name
                        ));
                        continue;
                    }
                }
            }
            queue.push_back(Request {
                group: dep.group.clone(),
                name: dep.name.clone(),
                spec: dep.version.clone(),
                caller: Caller {
                    group: module.group.clone(),
                    name: module.name.clone(),
                    revision: module.revision.clone(),
                    requested: dep.version.clone(),
                },
                explicit: true,
                force: dep.force,
                transitive: dep.transitive,
            });
        }

        while let Some(request) = queue.pop_front() {
            self.process(request, &mut queue)?;
        }

        self.finish(module);
        Ok(())
    }

    fn process(&mut self, request: Request, queue: &mut VecDeque<Request>) -> Result<(), EngineError> {
        if self.ledger.is_excluded(&request.group, &request.name) {
            tracing::trace!(group = %request.group, name = %request.name, "excluded");
            return Ok(());
        }

        let spec_text = if request.explicit {
            request.spec.as_str()
        } else {
            self.ledger
                .override_for(&request.group, &request.name)
                .unwrap_or(request.spec.as_str())
        };

        let spec = match RevisionSpec::parse(spec_text) {
            Ok(spec) => spec,
            Err(err) => {
                self.problems.push(format!(
                    "{}:{}: {}",
                    request.group, request.name, err
                ));
                return Ok(());
            }
        };

        let available = self.engine.available(&request.group, &request.name)?;
        let Some(revision) = spec.select(&available).cloned() else {
            self.problems.push(format!(
                "unresolved dependency: {}:{}:{}",
                request.group, request.name, spec
            ));
            return Ok(());
        };

        let id = self.node_for(&request.group, &request.name, revision.as_str())?;
        let node = &mut self.nodes[id];
        if !node.resolved.callers.contains(&request.caller) {
            node.resolved.callers.push(request.caller.clone());
        }
        node.forced |= request.explicit && request.force;

        let key = (request.group.clone(), request.name.clone());
        let winner = match self.selected.get(&key) {
            None => id,
            Some(&current) if current == id => id,
            Some(&current) => self.conflict_winner(current, id),
        };
        self.selected.insert(key, winner);

        if winner == id && request.transitive && self.expanded.insert(id) {
            let node = &self.nodes[id];
            let caller = Caller {
                group: node.resolved.group.clone(),
                name: node.resolved.name.clone(),
                revision: node.resolved.revision.clone(),
                requested: String::new(),
            };
            for dep in &node.metadata.dependencies {
                queue.push_back(Request {
                    group: dep.group.clone(),
                    name: dep.name.clone(),
                    spec: dep.version.clone(),
                    caller: Caller {
                        requested: dep.version.clone(),
                        ..caller.clone()
                    },
                    explicit: false,
                    force: false,
                    transitive: true,
                });
            }
        }
        Ok(())
    }

    /// Forced revisions win, otherwise the higher one
    fn conflict_winner(&self, current: usize, candidate: usize) -> usize {
        let a = &self.nodes[current];
        let b = &self.nodes[candidate];
        match (a.forced, b.forced) {
            (true, false) => current,
            (false, true) => candidate,
            _ => {
                let left = Revision::parse(&a.resolved.revision);
                let right = Revision::parse(&b.resolved.revision);
                match (left, right) {
                    (Ok(left), Ok(right)) if right > left => candidate,
                    _ => current,
                }
            }
        }
    }

    fn node_for(&mut self, group: &str, name: &str, revision: &str) -> Result<usize, EngineError> {
        let key = (group.to_string(), name.to_string(), revision.to_string());
        if let Some(&id) = self.index.get(&key) {
            return Ok(id);
        }

        let metadata = self.engine.metadata(group, name, revision)?;
        let mut resolved = ResolvedNode::new(group, name, revision);
        resolved.homepage = metadata.homepage.clone();
        resolved.licenses = metadata
            .licenses
            .iter()
            .map(|l| License {
                name: l.name.clone(),
                url: l.url.clone(),
            })
            .collect();

        let id = self.nodes.len();
        self.nodes.push(NodeState {
            resolved,
            metadata,
            forced: false,
            kept: false,
        });
        self.index.insert(key, id);
        Ok(id)
    }

    /// Mark evictions and keep only nodes reachable through selected ones
    fn finish(&mut self, module: &ModuleId) {
        let selected: HashSet<usize> = self.selected.values().copied().collect();
        for (id, node) in self.nodes.iter_mut().enumerate() {
            node.resolved.evicted = if selected.contains(&id) {
                None
            } else {
                Some(EVICTED_BY_CONFLICT.to_string())
            };
        }

        let mut stack: Vec<usize> = (0..self.nodes.len())
            .filter(|&id| {
                self.nodes[id].resolved.callers.iter().any(|c| {
                    c.group == module.group && c.name == module.name && c.revision == module.revision
                })
            })
            .collect();

        while let Some(id) = stack.pop() {
            if self.nodes[id].kept {
                continue;
            }
            self.nodes[id].kept = true;
            if self.nodes[id].resolved.is_evicted() {
                continue;
            }

            let parent = &self.nodes[id].resolved;
            for (child, node) in self.nodes.iter().enumerate() {
                if !node.kept && node.resolved.callers.iter().any(|c| parent.is_caller(c)) {
                    stack.push(child);
                }
            }
        }

        // Callers pointing at dropped nodes would dangle in the report
        let kept: HashSet<(String, String, String)> = self
            .nodes
            .iter()
            .filter(|n| n.kept)
            .map(|n| {
                (
                    n.resolved.group.clone(),
                    n.resolved.name.clone(),
                    n.resolved.revision.clone(),
                )
            })
            .collect();
        for node in self.nodes.iter_mut().filter(|n| n.kept) {
            node.resolved.callers.retain(|c| {
                (c.group == module.group && c.name == module.name && c.revision == module.revision)
                    || kept.contains(&(c.group.clone(), c.name.clone(), c.revision.clone()))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use crate::report::ResolvedForest;

    struct Catalog {
        root: PathBuf,
    }

    impl Catalog {
        fn publish(&self, group: &str, name: &str, revision: &str, metadata: &str) {
            let dir = self.root.join(group).join(name).join(revision);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(METADATA_FILE), metadata).unwrap();
            fs::write(dir.join(format!("{}-{}.jar", name, revision)), format!("{}:{}", name, revision)).unwrap();
        }
    }

    fn setup() -> (tempfile::TempDir, Container, Catalog, DependencyLedger) {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("container");
        fs::create_dir_all(&root).unwrap();
        let container = Container::with_config(root.clone(), ContainerConfig::default());
        let catalog = Catalog {
            root: temp.path().join("repo"),
        };
        let ledger = DependencyLedger::load(&root.join("dependencies.toml")).unwrap();
        (temp, container, catalog, ledger)
    }

    fn resolve(
        container: &Container,
        catalog: &Catalog,
        ledger: &DependencyLedger,
        mode: ResolveMode,
    ) -> (ResolveOutcome, ResolvedForest) {
        let report_path = container.cache_file("resolution/report.xml");
        let request = ResolveRequest {
            container,
            ledger,
            mode,
            report_path: &report_path,
        };
        let outcome = CatalogEngine::new(&catalog.root).resolve(&request).unwrap();
        let forest = ResolvedForest::load(&report_path, container.root()).unwrap();
        (outcome, forest)
    }

    #[test]
    fn test_dynamic_spec_selects_highest() {
        let (_temp, container, catalog, mut ledger) = setup();
        for revision in ["1.0", "1.3.2", "1.2", "2.0"] {
            catalog.publish("g", "app", revision, "");
        }
        ledger.add("g", "app", "1.+", false, true).unwrap();

        let (outcome, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert!(outcome.changed);
        assert!(outcome.problems.is_empty());
        assert_eq!(forest.version("g", "app"), Some("1.3.2"));

        let artifact = forest.artifacts()[0];
        assert_eq!(artifact.status, "successful");
        let location = artifact.location.as_ref().unwrap();
        assert_eq!(fs::read_to_string(location).unwrap(), "app:1.3.2");
    }

    #[test]
    fn test_unchanged_second_resolution() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish("g", "app", "1.0", "");
        ledger.add("g", "app", "1.0", false, true).unwrap();

        assert!(resolve(&container, &catalog, &ledger, ResolveMode::Dynamic).0.changed);
        assert!(!resolve(&container, &catalog, &ledger, ResolveMode::Dynamic).0.changed);
    }

    #[test]
    fn test_transitive_conflict_evicts_lower() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish(
            "g",
            "app",
            "1.0",
            "[[dependencies]]\ngroup = \"g\"\nname = \"util\"\nversion = \"1.0\"\n",
        );
        catalog.publish(
            "g",
            "web",
            "1.0",
            "[[dependencies]]\ngroup = \"g\"\nname = \"util\"\nversion = \"1.5\"\n",
        );
        catalog.publish("g", "util", "1.0", "");
        catalog.publish("g", "util", "1.5", "");
        ledger.add("g", "app", "1.0", false, true).unwrap();
        ledger.add("g", "web", "1.0", false, true).unwrap();

        let (_, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(forest.version("g", "util"), Some("1.5"));

        let evicted: Vec<_> = (0..forest.len())
            .map(|id| forest.node(id))
            .filter(|n| n.is_evicted())
            .collect();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].revision, "1.0");
        assert!(evicted[0].artifacts.is_empty());
    }

    #[test]
    fn test_forced_explicit_wins() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish(
            "g",
            "app",
            "1.0",
            "[[dependencies]]\ngroup = \"g\"\nname = \"util\"\nversion = \"2.0\"\n",
        );
        catalog.publish("g", "util", "1.0", "");
        catalog.publish("g", "util", "2.0", "");
        ledger.add("g", "util", "1.0", true, true).unwrap();
        ledger.add("g", "app", "1.0", false, true).unwrap();

        let (_, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(forest.version("g", "util"), Some("1.0"));
    }

    #[test]
    fn test_excludes_and_overrides() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish(
            "g",
            "app",
            "1.0",
            "[[dependencies]]\ngroup = \"g\"\nname = \"util\"\nversion = \"1.+\"\n\n\
             [[dependencies]]\ngroup = \"g\"\nname = \"noise\"\nversion = \"1.0\"\n",
        );
        catalog.publish("g", "util", "1.0", "");
        catalog.publish("g", "util", "1.9", "");
        catalog.publish("g", "noise", "1.0", "");
        ledger.add("g", "app", "1.0", false, true).unwrap();
        ledger.exclude("g", "noise").unwrap();
        ledger.override_version("g", "util", "1.0").unwrap();

        let (_, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(forest.version("g", "util"), Some("1.0"));
        assert_eq!(forest.version("g", "noise"), None);
    }

    #[test]
    fn test_intransitive_dependency() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish(
            "g",
            "app",
            "1.0",
            "[[dependencies]]\ngroup = \"g\"\nname = \"util\"\nversion = \"1.0\"\n",
        );
        catalog.publish("g", "util", "1.0", "");
        ledger.add("g", "app", "1.0", false, false).unwrap();

        let (_, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(forest.all().len(), 1);
    }

    #[test]
    fn test_strict_mode_rejects_dynamic() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish("g", "app", "1.0", "");
        ledger.add("g", "app", "1.+", false, true).unwrap();

        let (outcome, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Strict);
        assert_eq!(outcome.problems.len(), 1);
        assert!(forest.is_empty());
    }

    #[test]
    fn test_unresolved_and_failed_download() {
        let (_temp, container, catalog, mut ledger) = setup();
        catalog.publish("g", "app", "1.0", "");
        catalog.publish("g", "broken", "1.0", "[[artifacts]]\ntype = \"jar\"\nclassifier = \"missing\"\n");
        ledger.add("g", "app", "1.0", false, true).unwrap();
        let (_, good) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(good.version("g", "app"), Some("1.0"));

        ledger.add("g", "broken", "1.0", false, true).unwrap();
        ledger.add("g", "ghost", "1.0", false, true).unwrap();
        let (outcome, forest) = resolve(&container, &catalog, &ledger, ResolveMode::Dynamic);
        assert_eq!(outcome.problems.len(), 2);
        assert!(outcome.problems.iter().any(|p| p.starts_with("download failed: g:broken:1.0")));

        // The report on disk is still the last successful one
        assert_eq!(forest.all().len(), 1);
        assert_eq!(forest.version("g", "broken"), None);
    }
}
