//! Vessel Package Manager Library
//!
//! This crate manages the dependencies of a container (a directory tree
//! owned by one project), including:
//! - The dependency ledger (configuration/vessel/dependencies.toml)
//! - Resolution through a pluggable engine and the resolved dependency forest
//! - Package descriptors embedded in library archives
//! - Unpacking of artifacts and the managed artifacts ledger
//! - Install/uninstall hooks
//! - The library search path
//! - Freezing dynamic versions into exact pins

pub mod classpath;
pub mod container;
pub mod dependencies;
pub mod engine;
pub mod hooks;
pub mod ledger;
pub mod lock;
pub mod managed;
pub mod packaging;
pub mod pinning;
pub mod process;
pub mod report;
pub mod revision;

pub use classpath::{classpath, classpath_string, ClasspathError};
pub use container::{find_container_root, Container, ContainerConfig, ContainerError};
pub use dependencies::{Dependencies, DependenciesError};
pub use engine::{
    CatalogEngine, EngineError, ResolutionEngine, ResolveMode, ResolveOutcome, ResolveRequest,
};
pub use hooks::{EntryPoints, HookError};
pub use ledger::{DependencyLedger, DependencySpec, ExcludeRule, LedgerError, ModuleId, OverrideRule};
pub use lock::ContainerLock;
pub use managed::{ManagedArtifactRecord, ManagedArtifacts, ManagedError, PruneSummary};
pub use packaging::{
    Archive, ArchiveError, Artifact, Package, PackageDescriptor, Packages, PackagingError,
    SourceLocation, UnpackError,
};
pub use pinning::{freeze, FreezeSummary};
pub use process::{BackgroundProcesses, CancelToken, ProcessError, ProcessOptions, ProcessOutput};
pub use report::{
    ArtifactRef, Caller, License, NodeId, ReportError, ResolutionReport, ResolvedForest,
    ResolvedNode,
};
pub use revision::{Revision, RevisionError, RevisionSpec};
