//! Packages
//!
//! A package is a library archive on the library search path that carries
//! a descriptor ([`descriptor::DESCRIPTOR_ENTRY`]). The descriptor lists the
//! files the archive contributes to the container and optional install and
//! uninstall hooks.

pub mod archive;
pub mod artifact;
pub mod descriptor;

pub use archive::{Archive, ArchiveError, ArchiveKind};
pub use artifact::{Artifact, SourceLocation, UnpackError};
pub use descriptor::{PackageDescriptor, DESCRIPTOR_ENTRY};

use crate::container::Container;
use crate::hooks::{EntryPoints, HookError};
use archive::safe_entry_path;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading packages or running their hooks
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Malformed descriptor
    #[error("Invalid package descriptor in {archive}: {source}")]
    Descriptor {
        archive: PathBuf,
        source: toml::de::Error,
    },

    /// A listed file is not in the archive
    #[error("Package {archive} lists file '{entry}' which it does not contain")]
    MissingFile { archive: PathBuf, entry: String },

    /// A listed resource is not on the library search path
    #[error("Package {archive} lists resource '{resource}' which is not on the library path")]
    MissingResource { archive: PathBuf, resource: String },

    /// The installer hook failed
    #[error("Could not install package {archive}: {source}")]
    Installation { archive: PathBuf, source: HookError },

    /// The uninstaller hook failed
    #[error("Could not uninstall package {archive}: {source}")]
    Uninstallation { archive: PathBuf, source: HookError },
}

/// One entry of the library search path, as seen by resource lookup
#[derive(Debug)]
enum LibraryEntry {
    Directory(PathBuf),
    Archive(Archive),
}

/// A package found in one archive
#[derive(Debug, Clone)]
pub struct Package {
    archive: PathBuf,
    artifacts: Vec<Artifact>,
    installer: Option<String>,
    uninstaller: Option<String>,
}

impl Package {
    /// Build the package described by `archive`, if it is one
    fn from_archive(
        archive: &Archive,
        library: &[LibraryEntry],
    ) -> Result<Option<Self>, PackagingError> {
        if !archive.contains(DESCRIPTOR_ENTRY) {
            return Ok(None);
        }

        let path = archive.path();
        let raw = archive.read(DESCRIPTOR_ENTRY)?;
        let descriptor = PackageDescriptor::from_str(&String::from_utf8_lossy(&raw)).map_err(
            |source| PackagingError::Descriptor {
                archive: path.to_path_buf(),
                source,
            },
        )?;

        let mut artifacts = Vec::new();

        for prefix in descriptor.folder_prefixes() {
            for entry in archive.entries() {
                let Some(rest) = entry.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                if rest.is_empty() || entry.ends_with('/') {
                    continue;
                }
                artifacts.push(Artifact::new(
                    safe_entry_path(path, rest)?,
                    SourceLocation::ArchiveEntry {
                        archive: path.to_path_buf(),
                        entry: entry.clone(),
                    },
                    descriptor.is_volatile(entry),
                ));
            }
        }

        for file in &descriptor.files {
            if !archive.contains(file) {
                return Err(PackagingError::MissingFile {
                    archive: path.to_path_buf(),
                    entry: file.clone(),
                });
            }
            artifacts.push(Artifact::new(
                safe_entry_path(path, file)?,
                SourceLocation::ArchiveEntry {
                    archive: path.to_path_buf(),
                    entry: file.clone(),
                },
                descriptor.is_volatile(file),
            ));
        }

        for resource in &descriptor.resources {
            let source = find_resource(library, resource).ok_or_else(|| {
                PackagingError::MissingResource {
                    archive: path.to_path_buf(),
                    resource: resource.clone(),
                }
            })?;
            artifacts.push(Artifact::new(
                safe_entry_path(path, resource)?,
                source,
                descriptor.is_volatile(resource),
            ));
        }

        let installer = descriptor.installer().map(str::to_string);
        let uninstaller = descriptor.uninstaller().map(str::to_string);
        if artifacts.is_empty() && installer.is_none() && uninstaller.is_none() {
            return Ok(None);
        }

        // Installed in target order; the first artifact for a target wins
        artifacts.sort();
        artifacts.dedup();

        Ok(Some(Self {
            archive: path.to_path_buf(),
            artifacts,
            installer,
            uninstaller,
        }))
    }

    /// The archive this package came from
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Artifacts in ascending target order
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn installer(&self) -> Option<&str> {
        self.installer.as_deref()
    }

    pub fn uninstaller(&self) -> Option<&str> {
        self.uninstaller.as_deref()
    }

    /// Run the installer hook, if any
    pub fn install(&self, container: &Container, entry_points: &EntryPoints) -> Result<(), PackagingError> {
        let Some(hook) = &self.installer else {
            return Ok(());
        };
        tracing::info!(archive = %self.archive.display(), hook = %hook, "running installer");
        entry_points
            .run(container, hook)
            .map_err(|source| PackagingError::Installation {
                archive: self.archive.clone(),
                source,
            })
    }

    /// Run the uninstaller hook, if any
    pub fn uninstall(&self, container: &Container, entry_points: &EntryPoints) -> Result<(), PackagingError> {
        let Some(hook) = &self.uninstaller else {
            return Ok(());
        };
        tracing::info!(archive = %self.archive.display(), hook = %hook, "running uninstaller");
        entry_points
            .run(container, hook)
            .map_err(|source| PackagingError::Uninstallation {
                archive: self.archive.clone(),
                source,
            })
    }
}

/// Every package on a library search path
#[derive(Debug, Clone, Default)]
pub struct Packages {
    packages: Vec<Package>,
}

impl Packages {
    /// Parse the descriptor of every archive on `library_path`
    pub fn discover(container: &Container, library_path: &[PathBuf]) -> Result<Self, PackagingError> {
        let mut library = Vec::with_capacity(library_path.len());
        for entry in library_path {
            if entry.is_dir() {
                library.push(LibraryEntry::Directory(entry.clone()));
            } else if entry.is_file() && is_library_archive(container, entry) {
                library.push(LibraryEntry::Archive(Archive::open(entry)?));
            }
        }

        let mut packages = Vec::new();
        for entry in &library {
            if let LibraryEntry::Archive(archive) = entry {
                if let Some(package) = Package::from_archive(archive, &library)? {
                    tracing::debug!(
                        archive = %package.archive.display(),
                        artifacts = package.artifacts.len(),
                        "found package"
                    );
                    packages.push(package);
                }
            }
        }

        Ok(Self { packages })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Package> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Run every installer hook, in library path order
    pub fn install(&self, container: &Container, entry_points: &EntryPoints) -> Result<(), PackagingError> {
        for package in &self.packages {
            package.install(container, entry_points)?;
        }
        Ok(())
    }

    /// Run every uninstaller hook, in library path order
    pub fn uninstall(&self, container: &Container, entry_points: &EntryPoints) -> Result<(), PackagingError> {
        for package in &self.packages {
            package.uninstall(container, entry_points)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Packages {
    type Item = &'a Package;
    type IntoIter = std::slice::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.iter()
    }
}

fn is_library_archive(container: &Container, path: &Path) -> bool {
    if container.config().is_archive(path) {
        return true;
    }
    let name = path.to_string_lossy().to_lowercase();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn find_resource(library: &[LibraryEntry], name: &str) -> Option<SourceLocation> {
    library.iter().find_map(|entry| match entry {
        LibraryEntry::Directory(dir) => {
            let candidate = dir.join(name);
            candidate.is_file().then(|| SourceLocation::File(candidate))
        }
        LibraryEntry::Archive(archive) => {
            archive.contains(name).then(|| SourceLocation::ArchiveEntry {
                archive: archive.path().to_path_buf(),
                entry: name.to_string(),
            })
        }
    })
}
