//! Advisory lock serializing install, uninstall and prune on one container

use crate::container::Container;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive lock on `cache/vessel.lock`, released when dropped
#[derive(Debug)]
pub struct ContainerLock {
    path: PathBuf,
    _file: File,
}

impl ContainerLock {
    /// Block until the container lock is held
    pub fn acquire(container: &Container) -> std::io::Result<Self> {
        let (path, file) = open_lock_file(container)?;
        file.lock_exclusive()?;
        tracing::trace!(path = %path.display(), "acquired container lock");
        Ok(Self { path, _file: file })
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(container: &Container) -> std::io::Result<Option<Self>> {
        let (path, file) = open_lock_file(container)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { path, _file: file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(container: &Container) -> std::io::Result<(PathBuf, File)> {
    let path = container.cache_file("vessel.lock");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)?;
    Ok((path, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp = tempfile::tempdir().unwrap();
        let container = Container::create(temp.path()).unwrap();

        let held = ContainerLock::acquire(&container).unwrap();
        assert!(held.path().ends_with("cache/vessel.lock"));
        assert!(ContainerLock::try_acquire(&container).unwrap().is_none());

        drop(held);
        assert!(ContainerLock::try_acquire(&container).unwrap().is_some());
    }
}
