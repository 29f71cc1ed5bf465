//! Containers
//!
//! A container is a directory tree whose dependencies are managed by vessel.
//! It is marked by a `.vessel` directory at its root and keeps its state
//! under `configuration/vessel/`.

use crate::process::BackgroundProcesses;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker directory identifying a container root
pub const CONTAINER_MARKER: &str = ".vessel";

/// Errors that can occur when opening or creating a container
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Not a container
    #[error("No container found at {0} (missing .vessel directory)")]
    NotAContainer(PathBuf),

    /// Container already exists
    #[error("Container already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Failed to read or create container files
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the container configuration
    #[error("Failed to parse container configuration {path}: {source}")]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Resolve mode handed to the resolution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// Dynamic specs (1.+, latest.*) are resolved against the repository
    #[default]
    Dynamic,

    /// Only exact revisions are accepted for explicit dependencies
    Strict,
}

/// Container configuration (configuration/vessel/container.toml)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerConfig {
    /// Libraries directory, relative to the root
    #[serde(default = "default_libraries")]
    pub libraries: String,

    /// Compiled-output directory, relative to the libraries directory
    #[serde(default = "default_classes")]
    pub classes: String,

    /// Archive directory, relative to the libraries directory
    #[serde(default = "default_archives")]
    pub archives: String,

    /// File extensions recognized as library archives
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Artifact type that joins the library path
    #[serde(default = "default_installable_type")]
    pub installable_type: String,

    /// Verify unpacked artifacts
    #[serde(default = "default_verify")]
    pub verify: bool,

    /// Resolve mode
    #[serde(default)]
    pub resolve_mode: ResolveMode,

    /// Repository root for the catalog engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<PathBuf>,

    /// Environment variable listing the process's own library locations
    #[serde(default = "default_system_path_variable")]
    pub system_path_variable: String,
}

fn default_libraries() -> String {
    "libraries".to_string()
}

fn default_classes() -> String {
    "classes".to_string()
}

fn default_archives() -> String {
    "jars".to_string()
}

fn default_archive_extensions() -> Vec<String> {
    vec!["jar".to_string(), "zip".to_string()]
}

fn default_installable_type() -> String {
    "jar".to_string()
}

fn default_verify() -> bool {
    true
}

fn default_system_path_variable() -> String {
    "VESSEL_SYSTEM_PATH".to_string()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            libraries: default_libraries(),
            classes: default_classes(),
            archives: default_archives(),
            archive_extensions: default_archive_extensions(),
            installable_type: default_installable_type(),
            verify: default_verify(),
            resolve_mode: ResolveMode::default(),
            repository: None,
            system_path_variable: default_system_path_variable(),
        }
    }
}

impl ContainerConfig {
    /// Parse a configuration from a string
    pub fn from_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// True if the file name carries one of the archive extensions
    pub fn is_archive(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        self.archive_extensions
            .iter()
            .any(|ext| name.ends_with(&format!(".{}", ext)))
    }
}

/// A container session
///
/// Every operation receives the container explicitly; there is no global
/// current container.
#[derive(Debug)]
pub struct Container {
    root: PathBuf,
    config: ContainerConfig,
    background: BackgroundProcesses,
}

impl Container {
    /// Open an existing container
    pub fn open(root: &Path) -> Result<Self, ContainerError> {
        if !root.join(CONTAINER_MARKER).is_dir() {
            return Err(ContainerError::NotAContainer(root.to_path_buf()));
        }
        let root = root.canonicalize().map_err(|source| ContainerError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let config_path = root.join("configuration").join("vessel").join("container.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(|source| ContainerError::Io {
                path: config_path.clone(),
                source,
            })?;
            ContainerConfig::from_str(&content).map_err(|source| ContainerError::Config {
                path: config_path.clone(),
                source,
            })?
        } else {
            ContainerConfig::default()
        };

        Ok(Self::with_config(root, config))
    }

    /// Create a new container at `root` and open it
    pub fn create(root: &Path) -> Result<Self, ContainerError> {
        let marker = root.join(CONTAINER_MARKER);
        if marker.exists() {
            return Err(ContainerError::AlreadyExists(root.to_path_buf()));
        }

        let config = ContainerConfig::default();
        for dir in [
            marker.clone(),
            root.join("configuration").join("vessel"),
            root.join(&config.libraries).join(&config.archives),
            root.join("cache"),
        ] {
            fs::create_dir_all(&dir).map_err(|source| ContainerError::Io { path: dir, source })?;
        }

        Self::open(root)
    }

    /// Build a session from an already-resolved root and configuration
    pub fn with_config(root: PathBuf, config: ContainerConfig) -> Self {
        Self {
            root,
            config,
            background: BackgroundProcesses::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Background processes owned by this session
    pub fn background(&self) -> &BackgroundProcesses {
        &self.background
    }

    /// A file under configuration/vessel/
    pub fn configuration_file(&self, name: &str) -> PathBuf {
        self.root.join("configuration").join("vessel").join(name)
    }

    /// A file under the libraries directory
    pub fn libraries_file(&self, name: &str) -> PathBuf {
        self.root.join(&self.config.libraries).join(name)
    }

    /// A file under cache/
    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.root.join("cache").join(name)
    }

    /// Path relative to the root when inside it, unchanged otherwise
    pub fn relative_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Absolute path for a path relative to the root
    pub fn absolute_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Find the container root by walking up from `start_dir`
pub fn find_container_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        if current.join(CONTAINER_MARKER).is_dir() {
            return Some(current.to_path_buf());
        }

        current = current.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_open() {
        let temp = tempfile::tempdir().unwrap();
        let container = Container::create(temp.path()).unwrap();

        assert!(container.root().join(CONTAINER_MARKER).is_dir());
        assert!(container.libraries_file("jars").is_dir());
        assert!(container.cache_file("").is_dir());
        assert_eq!(container.config(), &ContainerConfig::default());
    }

    #[test]
    fn test_create_twice_fails() {
        let temp = tempfile::tempdir().unwrap();
        Container::create(temp.path()).unwrap();
        let result = Container::create(temp.path());
        assert!(matches!(result, Err(ContainerError::AlreadyExists(_))));
    }

    #[test]
    fn test_open_missing_marker() {
        let temp = tempfile::tempdir().unwrap();
        let result = Container::open(temp.path());
        assert!(matches!(result, Err(ContainerError::NotAContainer(_))));
    }

    #[test]
    fn test_config_defaults_and_overrides() {
        let config = ContainerConfig::from_str(
            r#"
libraries = "lib"
archive-extensions = ["jar"]
verify = false
resolve-mode = "strict"
"#,
        )
        .unwrap();

        assert_eq!(config.libraries, "lib");
        assert_eq!(config.classes, "classes");
        assert_eq!(config.archive_extensions, vec!["jar"]);
        assert!(!config.verify);
        assert_eq!(config.resolve_mode, ResolveMode::Strict);
        assert_eq!(config.installable_type, "jar");
    }

    #[test]
    fn test_open_reads_config() {
        let temp = tempfile::tempdir().unwrap();
        Container::create(temp.path()).unwrap();
        fs::write(
            temp.path().join("configuration/vessel/container.toml"),
            "libraries = \"lib\"\n",
        )
        .unwrap();

        let container = Container::open(temp.path()).unwrap();
        assert!(container.libraries_file("x").ends_with("lib/x"));
    }

    #[test]
    fn test_find_container_root() {
        let temp = tempfile::tempdir().unwrap();
        Container::create(temp.path()).unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_container_root(&nested), Some(temp.path().to_path_buf()));
    }

    #[test]
    fn test_is_archive() {
        let config = ContainerConfig::default();
        assert!(config.is_archive(Path::new("libraries/jars/a.jar")));
        assert!(config.is_archive(Path::new("b.zip")));
        assert!(!config.is_archive(Path::new("c.txt")));
    }

    #[test]
    fn test_relative_path() {
        let container = Container::with_config(PathBuf::from("/c"), ContainerConfig::default());
        assert_eq!(container.relative_path(Path::new("/c/a/b")), PathBuf::from("a/b"));
        assert_eq!(container.relative_path(Path::new("/other")), PathBuf::from("/other"));
        assert_eq!(container.absolute_path(Path::new("a")), PathBuf::from("/c/a"));
    }
}
