//! Dependency orchestration
//!
//! [`Dependencies`] ties a container's ledger, resolution engine, resolved
//! forest, packages and managed artifacts together into the install,
//! uninstall, prune, freeze and reset operations.

use crate::classpath::{self, ClasspathError};
use crate::container::Container;
use crate::engine::{CatalogEngine, EngineError, ResolutionEngine, ResolveOutcome, ResolveRequest};
use crate::hooks::{EntryPoints, HookError};
use crate::ledger::{DependencyLedger, LedgerError, ModuleId};
use crate::lock::ContainerLock;
use crate::managed::{ManagedArtifacts, ManagedError, PruneSummary};
use crate::packaging::{Artifact, Packages, PackagingError, UnpackError};
use crate::pinning::{self, FreezeSummary};
use crate::process::CancelToken;
use crate::report::{self, License, ReportError, ResolvedForest};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

const LEDGER_FILE: &str = "dependencies.toml";
const MANAGED_FILE: &str = "artifacts.json";

const DISCLAIMER: &str = "\
vessel has downloaded software from a repository and installed it in your container.
It is your responsibility to make sure you are allowed to use that software. Neither
the authors of vessel nor the maintainers of the repository are liable for how it is
used. Most free and open source licenses let you use software without warranty, but
restrict how you may redistribute it.

The license information shown by vessel is collected from the repository on a best
effort basis. Check that it is correct for each product you use: licenses can differ
between versions and editions, and some software is offered under several licenses.

Run \"vessel licenses\" to list the licenses of every installed dependency.";

/// Errors from dependency operations
#[derive(Debug, Error)]
pub enum DependenciesError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Managed(#[from] ManagedError),

    #[error(transparent)]
    Packaging(PackagingError),

    #[error(transparent)]
    Classpath(#[from] ClasspathError),

    /// The engine failed outright
    #[error("Some dependencies could not be installed: {0}")]
    Engine(#[from] EngineError),

    /// The engine reported problems
    #[error("Some dependencies could not be installed")]
    Unresolved { problems: Vec<String> },

    /// An artifact could not be unpacked
    #[error("Could not unpack {artifact}: {source}")]
    Unpack {
        artifact: PathBuf,
        source: UnpackError,
    },

    /// A package installer failed
    #[error("Could not install package {archive}: {source}")]
    Installation { archive: PathBuf, source: HookError },

    /// A package uninstaller failed
    #[error("Could not uninstall package {archive}: {source}")]
    Uninstallation { archive: PathBuf, source: HookError },

    /// The container lock could not be taken
    #[error("Could not lock container ({path}): {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<PackagingError> for DependenciesError {
    fn from(err: PackagingError) -> Self {
        match err {
            PackagingError::Installation { archive, source } => {
                DependenciesError::Installation { archive, source }
            }
            PackagingError::Uninstallation { archive, source } => {
                DependenciesError::Uninstallation { archive, source }
            }
            other => DependenciesError::Packaging(other),
        }
    }
}

/// The dependencies of one container
pub struct Dependencies {
    container: Container,
    ledger: DependencyLedger,
    managed: ManagedArtifacts,
    engine: Box<dyn ResolutionEngine>,
    entry_points: EntryPoints,

    // Loaded on first use, dropped after every resolution
    forest: Option<ResolvedForest>,
    packages: Option<Packages>,

    installations: usize,
    disclaimer_printed: bool,
}

impl Dependencies {
    /// Open with the catalog engine configured for the container
    pub fn open(container: Container) -> Result<Self, DependenciesError> {
        let engine = CatalogEngine::for_container(&container);
        Self::with_engine(container, Box::new(engine))
    }

    /// Open with a custom resolution engine
    pub fn with_engine(
        container: Container,
        engine: Box<dyn ResolutionEngine>,
    ) -> Result<Self, DependenciesError> {
        let ledger = DependencyLedger::load(&container.configuration_file(LEDGER_FILE))?;
        let managed = ManagedArtifacts::load(&container.configuration_file(MANAGED_FILE), container.root())?;

        Ok(Self {
            container,
            ledger,
            managed,
            engine,
            entry_points: EntryPoints::new(),
            forest: None,
            packages: None,
            installations: 0,
            disclaimer_printed: false,
        })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn ledger(&self) -> &DependencyLedger {
        &self.ledger
    }

    pub fn managed(&self) -> &ManagedArtifacts {
        &self.managed
    }

    /// In-process entry points available to package hooks
    pub fn entry_points_mut(&mut self) -> &mut EntryPoints {
        &mut self.entry_points
    }

    /// Handle that interrupts the hook subprocess currently being waited on
    ///
    /// Clones share one flag, so it can be cancelled from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.entry_points.cancel_token().clone()
    }

    /// Number of completed installs in this session
    pub fn installations(&self) -> usize {
        self.installations
    }

    pub fn report_path(&self) -> PathBuf {
        report::report_path(&self.container, self.ledger.module())
    }

    pub fn has(&self, group: &str, name: &str, version: Option<&str>) -> bool {
        self.ledger.has(group, name, version)
    }

    pub fn add(
        &mut self,
        group: &str,
        name: &str,
        version: &str,
        force: bool,
        transitive: bool,
    ) -> Result<bool, DependenciesError> {
        Ok(self.ledger.add(group, name, version, force, transitive)?)
    }

    pub fn revise(&mut self, group: &str, name: &str, new_version: &str) -> Result<bool, DependenciesError> {
        Ok(self.ledger.revise(group, name, new_version)?)
    }

    pub fn remove(&mut self, group: &str, name: &str) -> Result<bool, DependenciesError> {
        Ok(self.ledger.remove(group, name)?)
    }

    pub fn exclude(&mut self, group: &str, name: &str) -> Result<bool, DependenciesError> {
        Ok(self.ledger.exclude(group, name)?)
    }

    pub fn override_version(&mut self, group: &str, name: &str, version: &str) -> Result<bool, DependenciesError> {
        Ok(self.ledger.override_version(group, name, version)?)
    }

    /// The forest from the last resolution report
    pub fn resolved(&mut self) -> Result<&ResolvedForest, DependenciesError> {
        let forest = self.take_forest()?;
        Ok(self.forest.insert(forest))
    }

    /// Packages on the current library search path
    pub fn packages(&mut self) -> Result<&Packages, DependenciesError> {
        let packages = self.take_packages()?;
        Ok(self.packages.insert(packages))
    }

    /// The library search path
    pub fn classpath(&mut self, include_system: bool) -> Result<Vec<PathBuf>, DependenciesError> {
        let forest = self.take_forest()?;
        let entries = classpath::classpath(&self.container, &forest, include_system);
        self.forest = Some(forest);
        Ok(entries?)
    }

    /// Distinct licenses with the modules using each
    pub fn licenses(&mut self) -> Result<Vec<(License, Vec<ModuleId>)>, DependenciesError> {
        let forest = self.resolved()?;
        Ok(forest
            .licenses()
            .into_iter()
            .map(|license| {
                let modules = forest
                    .by_license(license)
                    .into_iter()
                    .map(|n| ModuleId::new(&n.group, &n.name, &n.revision))
                    .collect();
                (license.clone(), modules)
            })
            .collect())
    }

    /// Resolve, unpack and run installer hooks
    pub fn install(&mut self, overwrite: bool, verify: bool) -> Result<(), DependenciesError> {
        let _lock = self.lock()?;

        if self.installations == 0 {
            tracing::info!("making sure all dependencies are installed and upgraded");
        }

        let outcome = self.resolve()?;
        if outcome.changed {
            let artifacts = self.artifacts(true, overwrite, verify)?;
            let summary = self.managed.prune(&artifacts)?;
            log_prune(&summary);
            self.print_disclaimer();
        } else {
            self.artifacts(true, overwrite, verify)?;
            tracing::info!("dependencies have not changed since last install");
        }

        self.installations += 1;
        Ok(())
    }

    /// Gather every artifact this container should own
    ///
    /// With `install`, package artifacts are unpacked in order and installer
    /// hooks run once the whole batch is recorded. The managed ledger is
    /// saved even when unpacking fails.
    pub fn artifacts(
        &mut self,
        install: bool,
        overwrite: bool,
        verify: bool,
    ) -> Result<BTreeSet<Artifact>, DependenciesError> {
        let forest = self.take_forest()?;
        let downloads: Vec<PathBuf> = forest
            .artifacts()
            .into_iter()
            .filter_map(|a| a.location.clone())
            .collect();
        self.forest = Some(forest);

        let packages = self.take_packages()?;
        let gathered = self.gather(&packages, &downloads, install, overwrite, verify);
        self.packages = Some(packages);

        let saved = self.managed.save();
        let artifacts = gathered?;
        saved?;

        if install {
            if let Some(packages) = &self.packages {
                packages.install(&self.container, &self.entry_points)?;
            }
        }
        Ok(artifacts)
    }

    /// Run uninstaller hooks and delete every managed file
    pub fn uninstall(&mut self) -> Result<PruneSummary, DependenciesError> {
        let _lock = self.lock()?;

        let packages = self.take_packages()?;
        self.packages = Some(packages);
        if let Some(packages) = &self.packages {
            packages.uninstall(&self.container, &self.entry_points)?;
        }

        let summary = self.managed.prune(&BTreeSet::new())?;
        self.managed.clean()?;
        log_prune(&summary);
        Ok(summary)
    }

    /// Delete managed files that no longer have an origin
    ///
    /// Resolves the current ledger first, so removed declarations take
    /// effect without an install.
    pub fn prune(&mut self) -> Result<PruneSummary, DependenciesError> {
        let _lock = self.lock()?;
        self.resolve()?;
        let artifacts = self.artifacts(false, false, false)?;
        let summary = self.managed.prune(&artifacts)?;
        log_prune(&summary);
        Ok(summary)
    }

    /// Pin every resolved revision in the ledger
    pub fn freeze(&mut self) -> Result<FreezeSummary, DependenciesError> {
        let forest = self.take_forest()?;
        let result = pinning::freeze(&mut self.ledger, &forest);
        self.forest = Some(forest);
        Ok(result?)
    }

    /// Drop all declarations, the last report and the managed records
    pub fn reset(&mut self) -> Result<(), DependenciesError> {
        self.ledger.reset()?;

        let report_path = self.report_path();
        match std::fs::remove_file(&report_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ReportError::Write {
                    path: report_path,
                    source,
                }
                .into())
            }
        }

        self.managed.clean()?;
        self.forest = None;
        self.packages = None;
        Ok(())
    }

    fn resolve(&mut self) -> Result<ResolveOutcome, DependenciesError> {
        let report_path = self.report_path();
        let request = ResolveRequest {
            container: &self.container,
            ledger: &self.ledger,
            mode: self.container.config().resolve_mode,
            report_path: &report_path,
        };
        let outcome = self.engine.resolve(&request)?;

        self.forest = None;
        self.packages = None;

        if outcome.has_problems() {
            for problem in &outcome.problems {
                tracing::warn!(problem = %problem, "resolution problem");
            }
            return Err(DependenciesError::Unresolved {
                problems: outcome.problems,
            });
        }
        Ok(outcome)
    }

    fn gather(
        &mut self,
        packages: &Packages,
        downloads: &[PathBuf],
        install: bool,
        overwrite: bool,
        verify: bool,
    ) -> Result<BTreeSet<Artifact>, DependenciesError> {
        let mut artifacts = BTreeSet::new();

        for location in downloads {
            let Some(artifact) = Artifact::downloaded(&self.container, location) else {
                tracing::debug!(file = %location.display(), "download outside the container, not managed");
                continue;
            };
            self.managed.add(&artifact, true, None)?;
            artifacts.insert(artifact);
        }

        for package in packages {
            for artifact in package.artifacts() {
                if install {
                    match artifact.unpack(&self.container, &self.managed, overwrite, verify) {
                        Ok(unpacked) => self.managed.add(artifact, true, Some(unpacked))?,
                        Err(source) => {
                            self.managed.mark_failed(artifact);
                            return Err(DependenciesError::Unpack {
                                artifact: artifact.target().to_path_buf(),
                                source,
                            });
                        }
                    }
                } else {
                    self.managed.add(artifact, false, None)?;
                }
                artifacts.insert(artifact.clone());
            }
        }
        Ok(artifacts)
    }

    fn take_forest(&mut self) -> Result<ResolvedForest, DependenciesError> {
        match self.forest.take() {
            Some(forest) => Ok(forest),
            None => Ok(ResolvedForest::load(&self.report_path(), self.container.root())?),
        }
    }

    fn take_packages(&mut self) -> Result<Packages, DependenciesError> {
        if let Some(packages) = self.packages.take() {
            return Ok(packages);
        }
        let library_path = self.classpath(false)?;
        Ok(Packages::discover(&self.container, &library_path)?)
    }

    fn lock(&self) -> Result<ContainerLock, DependenciesError> {
        ContainerLock::acquire(&self.container).map_err(|source| DependenciesError::Lock {
            path: self.container.cache_file("vessel.lock"),
            source,
        })
    }

    fn print_disclaimer(&mut self) {
        if self.disclaimer_printed {
            return;
        }
        println!();
        println!("{}", DISCLAIMER);
        println!();
        self.disclaimer_printed = true;
    }
}

fn log_prune(summary: &PruneSummary) {
    if summary.removed.is_empty() {
        return;
    }
    tracing::info!(
        removed = summary.removed.len(),
        deleted = summary.deleted.len(),
        kept = summary.kept.len(),
        "pruned managed artifacts"
    );
}
