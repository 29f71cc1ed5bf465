//! Managed artifacts ledger (configuration/vessel/artifacts.json)
//!
//! Records every file vessel put into the container, so that files whose
//! origin disappeared can be pruned later.

use crate::packaging::Artifact;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing the managed ledger
#[derive(Debug, Error)]
pub enum ManagedError {
    #[error("Could not read managed artifacts {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not write managed artifacts {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse managed artifacts {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize managed artifacts: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A record would point outside the container
    #[error("Managed path '{0}' is outside the container")]
    OutsideRoot(String),

    /// A pruned file could not be deleted; its record is kept
    #[error("Could not delete {path}: {source}")]
    Delete {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One file owned by vessel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedArtifactRecord {
    /// Path relative to the container root, `/`-separated
    pub path: String,

    /// Where the content came from
    pub origin: String,

    /// Volatile files are installed once and then left to the user
    #[serde(default)]
    pub volatile: bool,

    #[serde(default)]
    pub installed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManagedFile {
    #[serde(default)]
    artifacts: Vec<ManagedArtifactRecord>,
}

/// What a prune pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Records dropped from the ledger
    pub removed: Vec<String>,

    /// Files deleted from disk
    pub deleted: Vec<PathBuf>,

    /// Volatile files left on disk although their record was dropped
    pub kept: Vec<PathBuf>,
}

/// The managed artifacts ledger of one container
#[derive(Debug)]
pub struct ManagedArtifacts {
    path: PathBuf,
    root: PathBuf,
    records: BTreeMap<String, ManagedArtifactRecord>,
}

impl ManagedArtifacts {
    /// Load the ledger at `path` for the container at `root`
    pub fn load(path: &Path, root: &Path) -> Result<Self, ManagedError> {
        let mut records = BTreeMap::new();

        if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ManagedError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: ManagedFile =
                serde_json::from_str(&content).map_err(|source| ManagedError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            for record in file.artifacts {
                if !is_managed_path(&record.path) {
                    return Err(ManagedError::OutsideRoot(record.path));
                }
                records.insert(record.path.clone(), record);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records sorted by path
    pub fn records(&self) -> impl Iterator<Item = &ManagedArtifactRecord> {
        self.records.values()
    }

    pub fn get(&self, path: &str) -> Option<&ManagedArtifactRecord> {
        self.records.get(path)
    }

    pub fn is_installed(&self, path: &str) -> bool {
        self.records.get(path).is_some_and(|r| r.installed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record an artifact
    ///
    /// `installed` is false when the artifact is only being listed; a
    /// listing never demotes an installed record. `unpacked` tells whether
    /// the file was written during this call.
    pub fn add(&mut self, artifact: &Artifact, installed: bool, unpacked: Option<bool>) -> Result<(), ManagedError> {
        let key = artifact.key();
        if !is_managed_path(&key) {
            return Err(ManagedError::OutsideRoot(key));
        }
        let record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| ManagedArtifactRecord {
                path: key.clone(),
                origin: artifact.origin(),
                volatile: artifact.is_volatile(),
                installed: false,
            });

        record.origin = artifact.origin();
        record.volatile = artifact.is_volatile();
        if installed {
            record.installed = true;
        }

        match unpacked {
            Some(true) => tracing::info!(path = %key, "unpacked"),
            Some(false) => tracing::trace!(path = %key, "up to date"),
            None => {}
        }
        Ok(())
    }

    /// Record a failed unpack
    ///
    /// Volatile records that were already installed are left alone.
    pub fn mark_failed(&mut self, artifact: &Artifact) {
        let key = artifact.key();
        if !is_managed_path(&key) {
            return;
        }
        match self.records.get_mut(&key) {
            Some(record) if record.volatile && record.installed => {}
            Some(record) => record.installed = false,
            None => {
                self.records.insert(
                    key.clone(),
                    ManagedArtifactRecord {
                        path: key,
                        origin: artifact.origin(),
                        volatile: artifact.is_volatile(),
                        installed: false,
                    },
                );
            }
        }
    }

    /// Write the ledger
    pub fn save(&self) -> Result<(), ManagedError> {
        let file = ManagedFile {
            artifacts: self.records.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        crate::ledger::write_atomically(&self.path, content.as_bytes()).map_err(|source| {
            ManagedError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Drop every record not in `current` and delete its file
    ///
    /// Volatile files stay on disk; only their record goes. A file that
    /// cannot be deleted keeps its record so that a later prune retries,
    /// and the first such failure is returned once the ledger is saved.
    pub fn prune(&mut self, current: &BTreeSet<Artifact>) -> Result<PruneSummary, ManagedError> {
        let keep: BTreeSet<String> = current.iter().map(Artifact::key).collect();
        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|key| !keep.contains(*key))
            .cloned()
            .collect();

        let mut summary = PruneSummary::default();
        let mut failure = None;
        for key in stale {
            let Some(record) = self.records.get(&key) else {
                continue;
            };

            if !is_managed_path(&record.path) {
                tracing::warn!(path = %record.path, "dropping record outside the container");
            } else {
                let file = self.root.join(&record.path);
                if record.volatile {
                    if file.exists() {
                        summary.kept.push(file);
                    }
                } else {
                    match fs::remove_file(&file) {
                        Ok(()) => {
                            tracing::info!(path = %record.path, "deleted");
                            self.remove_empty_parents(&file);
                            summary.deleted.push(file);
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(source) => {
                            tracing::warn!(path = %record.path, error = %source, "could not delete pruned artifact");
                            failure.get_or_insert(ManagedError::Delete { path: file, source });
                            continue;
                        }
                    }
                }
            }

            self.records.remove(&key);
            summary.removed.push(key);
        }

        self.save()?;
        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Forget every record without touching files
    pub fn clean(&mut self) -> Result<(), ManagedError> {
        self.records.clear();
        self.save()
    }

    fn remove_empty_parents(&self, file: &Path) {
        let mut dir = file.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // Fails (and stops) on the first non-empty directory
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// True if `path` names a file inside the container root
///
/// Managed paths are relative, `/`-separated and never climb out of the root.
pub fn is_managed_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
