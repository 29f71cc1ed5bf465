//! Artifacts: files a package places into the container

use super::archive::{read_entry, ArchiveError};
use crate::container::Container;
use crate::managed::ManagedArtifacts;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while unpacking an artifact
#[derive(Debug, Error)]
pub enum UnpackError {
    /// The source could not be read
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A plain source file could not be read
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The target could not be written
    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The written file does not match its source
    #[error("Unpacked file {target} does not match {origin}")]
    Verification { target: PathBuf, origin: String },
}

/// Where an artifact's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// An entry inside a library archive
    ArchiveEntry { archive: PathBuf, entry: String },

    /// A plain file found on the library search path
    File(PathBuf),

    /// A file the resolution engine downloaded into the container
    Download(PathBuf),
}

/// A file managed by vessel, identified by its target path
///
/// Equality and ordering only consider the target.
#[derive(Debug, Clone)]
pub struct Artifact {
    target: PathBuf,
    source: SourceLocation,
    volatile: bool,
}

impl Artifact {
    /// `target` is relative to the container root
    pub fn new(target: PathBuf, source: SourceLocation, volatile: bool) -> Self {
        Self {
            target,
            source,
            volatile,
        }
    }

    /// An artifact the resolution engine already placed at `location`
    ///
    /// None if `location` is not inside the container; such files belong
    /// to someone else and are never managed.
    pub fn downloaded(container: &Container, location: &Path) -> Option<Self> {
        let target = location.strip_prefix(container.root()).ok()?;
        if !crate::managed::is_managed_path(&target.to_string_lossy()) {
            return None;
        }
        Some(Self::new(
            target.to_path_buf(),
            SourceLocation::Download(location.to_path_buf()),
            false,
        ))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    /// Ledger key: the target with `/` separators
    pub fn key(&self) -> String {
        self.target.to_string_lossy().replace('\\', "/")
    }

    /// Origin as a URL (`file:` or `file:...!/entry` for archive entries)
    pub fn origin(&self) -> String {
        match &self.source {
            SourceLocation::ArchiveEntry { archive, entry } => {
                format!("{}!/{}", file_url(archive), entry)
            }
            SourceLocation::File(path) | SourceLocation::Download(path) => file_url(path),
        }
    }

    /// Read the source content
    pub fn read_source(&self) -> Result<Vec<u8>, UnpackError> {
        match &self.source {
            SourceLocation::ArchiveEntry { archive, entry } => Ok(read_entry(archive, entry)?),
            SourceLocation::File(path) | SourceLocation::Download(path) => {
                fs::read(path).map_err(|source| UnpackError::Read {
                    path: path.clone(),
                    source,
                })
            }
        }
    }

    /// Write the artifact into the container
    ///
    /// Returns true if the target was written. Volatile artifacts already
    /// installed are never touched again; others are skipped when the target
    /// already has the same content, unless `overwrite` is set.
    pub fn unpack(
        &self,
        container: &Container,
        managed: &ManagedArtifacts,
        overwrite: bool,
        verify: bool,
    ) -> Result<bool, UnpackError> {
        if self.volatile && managed.is_installed(&self.key()) {
            return Ok(false);
        }

        // Downloads already live in the container
        if let SourceLocation::Download(_) = self.source {
            return Ok(false);
        }

        let target = container.absolute_path(&self.target);
        let content = self.read_source()?;
        let digest = Sha256::digest(&content);

        if !overwrite && target.is_file() {
            let existing = fs::read(&target).map_err(|source| UnpackError::Read {
                path: target.clone(),
                source,
            })?;
            if Sha256::digest(&existing) == digest {
                return Ok(false);
            }
        }

        crate::ledger::write_atomically(&target, &content).map_err(|source| UnpackError::Write {
            path: target.clone(),
            source,
        })?;

        if verify {
            let written = fs::read(&target).map_err(|source| UnpackError::Read {
                path: target.clone(),
                source,
            })?;
            if written.len() != content.len() || Sha256::digest(&written) != digest {
                return Err(UnpackError::Verification {
                    target,
                    origin: self.origin(),
                });
            }
        }

        tracing::debug!(
            path = %self.key(),
            sha256 = %hex::encode(digest.as_slice()),
            "wrote artifact"
        );
        Ok(true)
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl Eq for Artifact {}

impl PartialOrd for Artifact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Artifact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.target.cmp(&other.target)
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file:{}", path.display()))
}
