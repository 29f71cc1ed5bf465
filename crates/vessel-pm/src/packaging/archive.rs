//! Library archives (zip-based and tar.gz)

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use zip::ZipArchive;

/// Errors that can occur while reading archives
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O failure on the archive file
    #[error("Could not read archive {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Corrupt zip archive
    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    /// The entry does not exist
    #[error("Entry '{entry}' not found in {archive}")]
    EntryNotFound { archive: PathBuf, entry: String },

    /// Absolute entry name or one that escapes via ".."
    #[error("Unsafe entry '{entry}' in {archive}")]
    UnsafeEntry { archive: PathBuf, entry: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    fn for_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else {
            ArchiveKind::Zip
        }
    }
}

/// An archive file and its entry names
///
/// Directory entries end with `/`. Entry contents are read on demand.
#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
    kind: ArchiveKind,
    entries: Vec<String>,
}

impl Archive {
    /// Open an archive and list its entries
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let kind = ArchiveKind::for_path(path);
        let entries = match kind {
            ArchiveKind::Zip => {
                let mut zip = open_zip(path)?;
                let mut entries = Vec::with_capacity(zip.len());
                for i in 0..zip.len() {
                    let file = zip.by_index(i).map_err(|source| ArchiveError::Zip {
                        path: path.to_path_buf(),
                        source,
                    })?;
                    entries.push(file.name().to_string());
                }
                entries
            }
            ArchiveKind::TarGz => {
                let mut entries = Vec::new();
                let mut tar = open_tar(path)?;
                let iter = tar.entries().map_err(|source| io_error(path, source))?;
                for entry in iter {
                    let entry = entry.map_err(|source| io_error(path, source))?;
                    entries.push(tar_entry_name(path, &entry)?);
                }
                entries
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.iter().any(|e| e == entry)
    }

    /// Read the full content of an entry
    pub fn read(&self, entry: &str) -> Result<Vec<u8>, ArchiveError> {
        read_entry(&self.path, entry)
    }
}

/// Read one entry without listing the archive first
pub fn read_entry(path: &Path, entry: &str) -> Result<Vec<u8>, ArchiveError> {
    let not_found = || ArchiveError::EntryNotFound {
        archive: path.to_path_buf(),
        entry: entry.to_string(),
    };

    match ArchiveKind::for_path(path) {
        ArchiveKind::Zip => {
            let mut zip = open_zip(path)?;
            let mut file = match zip.by_name(entry) {
                Ok(file) => file,
                Err(zip::result::ZipError::FileNotFound) => return Err(not_found()),
                Err(source) => {
                    return Err(ArchiveError::Zip {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)
                .map_err(|source| io_error(path, source))?;
            Ok(bytes)
        }
        ArchiveKind::TarGz => {
            let mut tar = open_tar(path)?;
            let iter = tar.entries().map_err(|source| io_error(path, source))?;
            for item in iter {
                let mut item = item.map_err(|source| io_error(path, source))?;
                if tar_entry_name(path, &item)? == entry {
                    let mut bytes = Vec::new();
                    item.read_to_end(&mut bytes)
                        .map_err(|source| io_error(path, source))?;
                    return Ok(bytes);
                }
            }
            Err(not_found())
        }
    }
}

/// Relative path for an entry name, rejecting absolute names and ".."
pub fn safe_entry_path(archive: &Path, entry: &str) -> Result<PathBuf, ArchiveError> {
    let unsafe_entry = || ArchiveError::UnsafeEntry {
        archive: archive.to_path_buf(),
        entry: entry.to_string(),
    };

    if entry.starts_with('/') || entry.starts_with('\\') {
        return Err(unsafe_entry());
    }

    let mut out = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(unsafe_entry())
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(unsafe_entry());
    }
    Ok(out)
}

fn open_zip(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    })
}

fn open_tar(path: &Path) -> Result<tar::Archive<GzDecoder<File>>, ArchiveError> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

fn tar_entry_name<R: Read>(path: &Path, entry: &tar::Entry<'_, R>) -> Result<String, ArchiveError> {
    let name = entry.path().map_err(|source| io_error(path, source))?;
    let mut name = name.to_string_lossy().replace('\\', "/");
    if entry.header().entry_type().is_dir() && !name.ends_with('/') {
        name.push('/');
    }
    Ok(name)
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}
