//! Library search path assembly

use crate::container::Container;
use crate::report::ResolvedForest;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while assembling the library search path
#[derive(Debug, Error)]
pub enum ClasspathError {
    #[error("Could not create classes directory {path}: {source}")]
    Classes {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Assemble the ordered, duplicate-free library search path
///
/// Order: system locations (when `include_system`), the classes
/// directory, archives found under the archives directory, then downloaded
/// artifacts of the installable type.
pub fn classpath(
    container: &Container,
    forest: &ResolvedForest,
    include_system: bool,
) -> Result<Vec<PathBuf>, ClasspathError> {
    let mut path = LibraryPath::default();
    let config = container.config();

    if include_system {
        if let Some(value) = std::env::var_os(&config.system_path_variable) {
            for entry in std::env::split_paths(&value) {
                if !entry.as_os_str().is_empty() {
                    path.push(entry);
                }
            }
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            path.push(dir);
        }
    }

    let libraries = container.libraries_file("");
    let classes = libraries.join(&config.classes);
    fs::create_dir_all(&classes).map_err(|source| ClasspathError::Classes {
        path: classes.clone(),
        source,
    })?;
    path.push(classes);

    let mut archives = Vec::new();
    scan_archives(container, &libraries.join(&config.archives), &mut archives);
    archives.sort();
    for archive in archives {
        path.push(archive);
    }

    for artifact in forest.artifacts() {
        if artifact.kind != config.installable_type {
            continue;
        }
        if let Some(location) = &artifact.location {
            path.push(container.absolute_path(location));
        }
    }

    Ok(path.entries)
}

/// The library search path joined with the platform separator
pub fn classpath_string(entries: &[PathBuf]) -> Result<OsString, std::env::JoinPathsError> {
    std::env::join_paths(entries)
}

#[derive(Default)]
struct LibraryPath {
    seen: HashSet<PathBuf>,
    entries: Vec<PathBuf>,
}

impl LibraryPath {
    fn push(&mut self, entry: PathBuf) {
        let key = entry.canonicalize().unwrap_or_else(|_| entry.clone());
        if self.seen.insert(key) {
            self.entries.push(entry);
        }
    }
}

fn scan_archives(container: &Container, dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_archives(container, &path, found);
        } else if container.config().is_archive(&path) {
            found.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ModuleId;
    use crate::report::{ArtifactRef, ResolutionReport, ResolvedNode};

    fn artifact(kind: &str, location: Option<&Path>) -> ArtifactRef {
        ArtifactRef {
            name: "lib".to_string(),
            kind: kind.to_string(),
            ext: "jar".to_string(),
            size: None,
            status: "successful".to_string(),
            location: location.map(Path::to_path_buf),
        }
    }

    #[test]
    fn test_order_and_dedup() {
        let temp = tempfile::tempdir().unwrap();
        let container = Container::create(temp.path()).unwrap();
        let jars = container.libraries_file("jars");
        fs::create_dir_all(jars.join("nested")).unwrap();
        fs::write(jars.join("b.jar"), "").unwrap();
        fs::write(jars.join("nested/a.zip"), "").unwrap();
        fs::write(jars.join("notes.txt"), "").unwrap();

        let downloaded = container.cache_file("repository/lib-1.0.jar");
        let mut node = ResolvedNode::new("g", "lib", "1.0");
        node.artifacts = vec![
            artifact("jar", Some(&downloaded)),
            artifact("source", Some(&container.cache_file("repository/lib-1.0-sources.jar"))),
            artifact("jar", None),
            // Already found by the scan
            artifact("jar", Some(&jars.join("b.jar"))),
        ];
        let forest = ResolvedForest::from_report(ResolutionReport {
            module: ModuleId::default_container(),
            nodes: vec![node],
        });

        let entries = classpath(&container, &forest, false).unwrap();
        assert_eq!(
            entries,
            vec![
                container.libraries_file("classes"),
                jars.join("b.jar"),
                jars.join("nested/a.zip"),
                downloaded,
            ]
        );
        assert!(container.libraries_file("classes").is_dir());
    }

    #[test]
    fn test_system_entries_first() {
        let temp = tempfile::tempdir().unwrap();
        let container = Container::create(temp.path()).unwrap();
        let system = temp.path().join("system");
        std::env::set_var("VESSEL_SYSTEM_PATH", &system);

        let entries = classpath(&container, &ResolvedForest::empty(), true).unwrap();
        std::env::remove_var("VESSEL_SYSTEM_PATH");

        assert_eq!(entries[0], system);
        assert!(entries.contains(&container.libraries_file("classes")));
    }

    #[test]
    fn test_unusable_classes_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let container = Container::create(temp.path()).unwrap();
        let classes = container.libraries_file("classes");
        fs::create_dir_all(classes.parent().unwrap()).unwrap();
        fs::write(&classes, "not a directory").unwrap();

        let err = classpath(&container, &ResolvedForest::empty(), false).unwrap_err();
        assert!(matches!(err, ClasspathError::Classes { .. }));
        assert!(err.to_string().contains("classes"));
    }

    #[test]
    fn test_classpath_string() {
        let joined = classpath_string(&[PathBuf::from("a"), PathBuf::from("b")]).unwrap();
        let separator = if cfg!(windows) { ";" } else { ":" };
        assert_eq!(joined, OsString::from(format!("a{}b", separator)));
    }
}
