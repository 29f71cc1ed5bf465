//! Resolution engine boundary
//!
//! An engine turns the ledger's declarations into a resolution report on
//! disk, downloading artifacts into the container as it goes.

mod catalog;

pub use crate::container::ResolveMode;
pub use catalog::{CatalogEngine, ModuleMetadata};

use crate::container::Container;
use crate::ledger::DependencyLedger;
use crate::report::ReportError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while resolving
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to read the repository
    #[error("Repository error at {path}: {source}")]
    Repository {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed module metadata
    #[error("Invalid module metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to copy an artifact into the container
    #[error("Could not download {from} to {to}: {source}")]
    Download {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Everything an engine needs for one resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub container: &'a Container,

    /// Declarations, excludes and overrides
    pub ledger: &'a DependencyLedger,
    pub mode: ResolveMode,

    /// Where the report must be written
    pub report_path: &'a Path,
}

/// Result of a resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// The report differs from the previous one
    pub changed: bool,

    /// Unresolved modules, failed downloads and rejected specs
    pub problems: Vec<String>,
}

impl ResolveOutcome {
    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// A dependency resolution engine
pub trait ResolutionEngine {
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<ResolveOutcome, EngineError>;
}
