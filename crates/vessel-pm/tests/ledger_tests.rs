//! Integration tests for the dependency ledger file

use std::fs;
use tempfile::TempDir;
use vessel_pm::{DependencyLedger, LedgerError};

#[test]
fn test_add_is_idempotent_on_disk() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dependencies.toml");

    let mut ledger = DependencyLedger::load(&path).unwrap();
    assert!(ledger.add("org.example", "web", "2.+", false, true).unwrap());
    assert!(ledger.add("org.example", "util", "1.0", true, false).unwrap());
    let first = fs::read(&path).unwrap();

    assert!(!ledger.add("org.example", "web", "2.+", false, true).unwrap());
    assert_eq!(fs::read(&path).unwrap(), first);

    // Same through a freshly loaded ledger
    let mut reloaded = DependencyLedger::load(&path).unwrap();
    assert!(!reloaded.add("org.example", "util", "1.0", true, false).unwrap());
    assert_eq!(fs::read(&path).unwrap(), first);
}

#[test]
fn test_declarations_survive_reload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dependencies.toml");

    let mut ledger = DependencyLedger::load(&path).unwrap();
    ledger.add("org.example", "web", "2.+", true, false).unwrap();
    ledger.exclude("org.example", "legacy").unwrap();
    ledger.override_version("org.example", "log", "1.2").unwrap();

    let reloaded = DependencyLedger::load(&path).unwrap();
    let web = reloaded.get("org.example", "web").unwrap();
    assert_eq!(web.version, "2.+");
    assert!(web.force);
    assert!(!web.transitive);
    assert!(reloaded.is_excluded("org.example", "legacy"));
    assert_eq!(reloaded.override_for("org.example", "log"), Some("1.2"));
}

#[test]
fn test_remove_and_reset() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dependencies.toml");

    let mut ledger = DependencyLedger::load(&path).unwrap();
    ledger.add("org.example", "web", "2.0", false, true).unwrap();
    ledger.add("org.example", "util", "1.0", false, true).unwrap();

    assert!(ledger.remove("org.example", "web").unwrap());
    assert!(!ledger.remove("org.example", "web").unwrap());
    assert_eq!(ledger.dependencies().len(), 1);

    ledger.reset().unwrap();
    let reloaded = DependencyLedger::load(&path).unwrap();
    assert!(reloaded.dependencies().is_empty());
    assert!(reloaded.excludes().is_empty());
}

#[test]
fn test_broken_ledger_is_reported_with_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dependencies.toml");
    fs::write(&path, "[[dependencies]]\ngroup = 3\n").unwrap();

    let err = DependencyLedger::load(&path).unwrap_err();
    assert!(matches!(err, LedgerError::Parse { .. }));
    assert!(err.to_string().contains("dependencies.toml"));
}
