//! Dependency ledger (configuration/vessel/dependencies.toml)
//!
//! The durable record of a container's explicit dependencies, together with
//! its exclude and override rules. Every successful mutation rewrites the
//! whole file before returning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Failed to read the ledger file
    #[error("Could not read dependencies ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the ledger file
    #[error("Could not write dependencies ledger {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Could not parse dependencies ledger {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to serialize the ledger
    #[error("Failed to serialize dependencies ledger: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Invalid dependencies ledger: {0}")]
    Validation(String),
}

/// Module identity (group, name, revision)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    pub group: String,
    pub name: String,
    pub revision: String,
}

impl ModuleId {
    pub fn new(group: impl Into<String>, name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            revision: revision.into(),
        }
    }

    /// The module every fresh container declares itself as
    pub fn default_container() -> Self {
        Self::new("vessel", "container", "working")
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.revision)
    }
}

/// An explicit dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencySpec {
    pub group: String,
    pub name: String,

    /// Version spec: exact ("1.3.2") or dynamic ("1.+", "latest.integration")
    pub version: String,

    /// Force this version over conflicting transitive requests
    #[serde(default)]
    pub force: bool,

    /// Pull in the dependency's own dependencies
    #[serde(default = "default_transitive")]
    pub transitive: bool,
}

fn default_transitive() -> bool {
    true
}

impl DependencySpec {
    fn is(&self, group: &str, name: &str) -> bool {
        self.group == group && self.name == name
    }
}

/// Exclude rule: the module is dropped wherever it appears
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludeRule {
    pub group: String,
    pub name: String,
}

/// Override rule: pins the revision of a transitive dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideRule {
    pub group: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct LedgerFile {
    module: Option<ModuleId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<DependencySpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    excludes: Vec<ExcludeRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    overrides: Vec<OverrideRule>,
}

/// The dependency ledger of one container
#[derive(Debug, Clone)]
pub struct DependencyLedger {
    path: PathBuf,
    module: ModuleId,
    dependencies: Vec<DependencySpec>,
    excludes: Vec<ExcludeRule>,
    overrides: Vec<OverrideRule>,
}

impl DependencyLedger {
    /// Load the ledger, or start an empty one if the file does not exist
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(path).map_err(|source| LedgerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: LedgerFile = toml::from_str(&content).map_err(|source| LedgerError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let ledger = Self {
            path: path.to_path_buf(),
            module: file.module.unwrap_or_else(ModuleId::default_container),
            dependencies: file.dependencies,
            excludes: file.excludes,
            overrides: file.overrides,
        };
        ledger.validate()?;
        Ok(ledger)
    }

    /// An empty, unsaved ledger
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            module: ModuleId::default_container(),
            dependencies: Vec::new(),
            excludes: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Validate every entry
    pub fn validate(&self) -> Result<(), LedgerError> {
        for dep in &self.dependencies {
            check_coordinates(&dep.group, &dep.name)?;
            if dep.version.trim().is_empty() {
                return Err(LedgerError::Validation(format!(
                    "Dependency '{}:{}' has empty version",
                    dep.group, dep.name
                )));
            }
        }
        for rule in &self.excludes {
            check_coordinates(&rule.group, &rule.name)?;
        }
        for rule in &self.overrides {
            check_coordinates(&rule.group, &rule.name)?;
            if rule.version.trim().is_empty() {
                return Err(LedgerError::Validation(format!(
                    "Override '{}:{}' has empty version",
                    rule.group, rule.name
                )));
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The container's own module identity
    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    pub fn excludes(&self) -> &[ExcludeRule] {
        &self.excludes
    }

    pub fn overrides(&self) -> &[OverrideRule] {
        &self.overrides
    }

    /// Get an explicit dependency
    pub fn get(&self, group: &str, name: &str) -> Option<&DependencySpec> {
        self.dependencies.iter().find(|d| d.is(group, name))
    }

    /// True if the dependency is explicit, optionally with a particular version
    pub fn has(&self, group: &str, name: &str, version: Option<&str>) -> bool {
        self.dependencies
            .iter()
            .any(|d| d.is(group, name) && version.map_or(true, |v| d.version == v))
    }

    /// True if the module is excluded
    pub fn is_excluded(&self, group: &str, name: &str) -> bool {
        self.excludes.iter().any(|r| r.group == group && r.name == name)
    }

    /// The override version for a module, if any
    pub fn override_for(&self, group: &str, name: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|r| r.group == group && r.name == name)
            .map(|r| r.version.as_str())
    }

    /// Add an explicit dependency
    ///
    /// Returns false, without writing, if (group, name) is already declared.
    pub fn add(
        &mut self,
        group: &str,
        name: &str,
        version: &str,
        force: bool,
        transitive: bool,
    ) -> Result<bool, LedgerError> {
        if self.has(group, name, None) {
            return Ok(false);
        }

        self.commit(|next| {
            next.dependencies.push(DependencySpec {
                group: group.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                force,
                transitive,
            })
        })?;
        Ok(true)
    }

    /// Change the version of an explicit dependency
    ///
    /// Returns false if the dependency is absent or already at `new_version`.
    pub fn revise(&mut self, group: &str, name: &str, new_version: &str) -> Result<bool, LedgerError> {
        if !self.has(group, name, None) || self.has(group, name, Some(new_version)) {
            return Ok(false);
        }

        self.commit(|next| {
            for dep in next.dependencies.iter_mut().filter(|d| d.is(group, name)) {
                dep.version = new_version.to_string();
            }
        })?;
        Ok(true)
    }

    /// Remove an explicit dependency
    pub fn remove(&mut self, group: &str, name: &str) -> Result<bool, LedgerError> {
        if !self.has(group, name, None) {
            return Ok(false);
        }

        self.commit(|next| next.dependencies.retain(|d| !d.is(group, name)))?;
        Ok(true)
    }

    /// Exclude a module from resolution
    pub fn exclude(&mut self, group: &str, name: &str) -> Result<bool, LedgerError> {
        if self.is_excluded(group, name) {
            return Ok(false);
        }

        self.commit(|next| {
            next.excludes.push(ExcludeRule {
                group: group.to_string(),
                name: name.to_string(),
            })
        })?;
        Ok(true)
    }

    /// Pin the version of a (usually transitive) module
    ///
    /// Returns false if the module already has an override rule.
    pub fn override_version(
        &mut self,
        group: &str,
        name: &str,
        version: &str,
    ) -> Result<bool, LedgerError> {
        if self.override_for(group, name).is_some() {
            return Ok(false);
        }

        self.commit(|next| {
            next.overrides.push(OverrideRule {
                group: group.to_string(),
                name: name.to_string(),
                version: version.to_string(),
            })
        })?;
        Ok(true)
    }

    /// Replace every explicit dependency and persist
    pub fn replace_dependencies(&mut self, dependencies: Vec<DependencySpec>) -> Result<(), LedgerError> {
        self.commit(|next| next.dependencies = dependencies)
    }

    /// Revoke all dependencies and rules
    pub fn reset(&mut self) -> Result<(), LedgerError> {
        self.commit(|next| {
            next.dependencies.clear();
            next.excludes.clear();
            next.overrides.clear();
        })
    }

    /// Apply `change` to a copy, validate and save it, then adopt it
    ///
    /// On any error the ledger in memory is left as it was.
    fn commit(&mut self, change: impl FnOnce(&mut Self)) -> Result<(), LedgerError> {
        let mut next = self.clone();
        change(&mut next);
        next.validate()?;
        next.save()?;
        *self = next;
        Ok(())
    }

    /// Render the ledger as TOML
    pub fn to_toml(&self) -> Result<String, LedgerError> {
        let file = LedgerFile {
            module: Some(self.module.clone()),
            dependencies: self.dependencies.clone(),
            excludes: self.excludes.clone(),
            overrides: self.overrides.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Write the full ledger (temporary file, then rename)
    pub fn save(&self) -> Result<(), LedgerError> {
        let content = self.to_toml()?;
        write_atomically(&self.path, content.as_bytes()).map_err(|source| LedgerError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn check_coordinates(group: &str, name: &str) -> Result<(), LedgerError> {
    if group.trim().is_empty() || name.trim().is_empty() {
        return Err(LedgerError::Validation(format!(
            "Group and name cannot be empty (got '{}:{}')",
            group, name
        )));
    }
    Ok(())
}

/// Write a file through a sibling temporary file and a rename
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, DependencyLedger) {
        let temp = tempfile::tempdir().unwrap();
        let ledger = DependencyLedger::load(&temp.path().join("dependencies.toml")).unwrap();
        (temp, ledger)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_temp, ledger) = ledger();
        assert!(ledger.dependencies().is_empty());
        assert_eq!(ledger.module(), &ModuleId::default_container());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_add_and_has() {
        let (_temp, mut ledger) = ledger();
        assert!(ledger.add("org.example", "lib", "1.+", false, true).unwrap());

        assert!(ledger.has("org.example", "lib", None));
        assert!(ledger.has("org.example", "lib", Some("1.+")));
        assert!(!ledger.has("org.example", "lib", Some("2.0")));
        assert!(!ledger.has("org.example", "other", None));
    }

    #[test]
    fn test_blank_versions_rejected() {
        let (_temp, mut ledger) = ledger();
        for version in ["", "  "] {
            let result = ledger.add("g", "n", version, false, true);
            assert!(matches!(result, Err(LedgerError::Validation(_))));
            let result = ledger.override_version("g", "t", version);
            assert!(matches!(result, Err(LedgerError::Validation(_))));
        }
        assert!(ledger.dependencies().is_empty());
        assert!(ledger.overrides().is_empty());
        assert!(!ledger.path().exists());

        ledger.add("g", "n", "1.0", false, true).unwrap();
        assert!(matches!(ledger.revise("g", "n", " "), Err(LedgerError::Validation(_))));
        assert_eq!(ledger.get("g", "n").unwrap().version, "1.0");

        let reloaded = DependencyLedger::load(ledger.path()).unwrap();
        assert_eq!(reloaded.get("g", "n").unwrap().version, "1.0");
    }

    #[test]
    fn test_failed_save_leaves_memory_untouched() {
        let temp = tempfile::tempdir().unwrap();
        // A directory where the ledger file should be makes every save fail
        let path = temp.path().join("dependencies.toml");
        fs::create_dir_all(&path).unwrap();
        let mut ledger = DependencyLedger::empty(&path);

        assert!(matches!(ledger.add("g", "n", "1.0", false, true), Err(LedgerError::Write { .. })));
        assert!(ledger.dependencies().is_empty());
        assert!(matches!(ledger.override_version("g", "t", "2.0"), Err(LedgerError::Write { .. })));
        assert_eq!(ledger.override_for("g", "t"), None);
    }

    #[test]
    fn test_add_existing_with_other_version() {
        let (_temp, mut ledger) = ledger();
        assert!(ledger.add("g", "n", "1.0", false, true).unwrap());
        assert!(!ledger.add("g", "n", "2.0", false, true).unwrap());
        assert_eq!(ledger.get("g", "n").unwrap().version, "1.0");
    }

    #[test]
    fn test_revise() {
        let (_temp, mut ledger) = ledger();
        ledger.add("g", "n", "1.+", true, false).unwrap();

        assert!(ledger.revise("g", "n", "1.3.2").unwrap());
        assert!(!ledger.revise("g", "n", "1.3.2").unwrap());
        assert!(!ledger.revise("g", "missing", "1.0").unwrap());

        let dep = ledger.get("g", "n").unwrap();
        assert_eq!(dep.version, "1.3.2");
        assert!(dep.force);
        assert!(!dep.transitive);
    }

    #[test]
    fn test_remove_keeps_order() {
        let (_temp, mut ledger) = ledger();
        ledger.add("g", "a", "1", false, true).unwrap();
        ledger.add("g", "b", "1", false, true).unwrap();
        ledger.add("g", "c", "1", false, true).unwrap();

        assert!(ledger.remove("g", "b").unwrap());
        assert!(!ledger.remove("g", "b").unwrap());

        let names: Vec<_> = ledger.dependencies().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_exclude_and_override_are_unique() {
        let (_temp, mut ledger) = ledger();
        assert!(ledger.exclude("g", "x").unwrap());
        assert!(!ledger.exclude("g", "x").unwrap());
        assert!(ledger.is_excluded("g", "x"));

        assert!(ledger.override_version("g", "y", "2.1").unwrap());
        assert!(!ledger.override_version("g", "y", "2.2").unwrap());
        assert_eq!(ledger.override_for("g", "y"), Some("2.1"));
    }

    #[test]
    fn test_persisted_on_every_mutation() {
        let (temp, mut ledger) = ledger();
        let path = temp.path().join("dependencies.toml");

        ledger.add("g", "n", "1.0", false, true).unwrap();
        ledger.exclude("g", "x").unwrap();
        ledger.override_version("g", "y", "2.0").unwrap();

        let reloaded = DependencyLedger::load(&path).unwrap();
        assert_eq!(reloaded.dependencies(), ledger.dependencies());
        assert_eq!(reloaded.excludes(), ledger.excludes());
        assert_eq!(reloaded.overrides(), ledger.overrides());
    }

    #[test]
    fn test_reset() {
        let (temp, mut ledger) = ledger();
        ledger.add("g", "n", "1.0", false, true).unwrap();
        ledger.exclude("g", "x").unwrap();
        ledger.reset().unwrap();

        let reloaded = DependencyLedger::load(&temp.path().join("dependencies.toml")).unwrap();
        assert!(reloaded.dependencies().is_empty());
        assert!(reloaded.excludes().is_empty());
    }

    #[test]
    fn test_empty_coordinates_rejected() {
        let (_temp, mut ledger) = ledger();
        assert!(matches!(
            ledger.add("", "n", "1.0", false, true),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("dependencies.toml");
        fs::write(&path, "dependencies = 3").unwrap();

        let err = DependencyLedger::load(&path).unwrap_err();
        assert!(err.to_string().contains("dependencies.toml"));
    }
}
