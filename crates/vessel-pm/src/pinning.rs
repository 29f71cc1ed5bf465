//! Version pinning
//!
//! Freezing replaces dynamic specs with the revisions last resolved, so
//! that the next resolution reproduces the same forest.

use crate::ledger::{DependencyLedger, LedgerError, ModuleId};
use crate::report::{NodeId, ResolvedForest};

/// What a freeze changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeSummary {
    /// Explicit dependencies revised to their resolved revision
    pub revised: Vec<ModuleId>,

    /// Transitive dependencies pinned through an override rule
    pub overridden: Vec<ModuleId>,
}

impl FreezeSummary {
    pub fn is_empty(&self) -> bool {
        self.revised.is_empty() && self.overridden.is_empty()
    }
}

/// Pin every resolved revision in the ledger
///
/// Evicted nodes and everything below them are skipped.
pub fn freeze(ledger: &mut DependencyLedger, forest: &ResolvedForest) -> Result<FreezeSummary, LedgerError> {
    let mut summary = FreezeSummary::default();
    let mut visited = vec![false; forest.len()];

    for &root in forest.roots() {
        freeze_node(ledger, forest, root, &mut visited, &mut summary)?;
    }
    Ok(summary)
}

fn freeze_node(
    ledger: &mut DependencyLedger,
    forest: &ResolvedForest,
    id: NodeId,
    visited: &mut [bool],
    summary: &mut FreezeSummary,
) -> Result<(), LedgerError> {
    let node = forest.node(id);
    if node.is_evicted() || visited[id] {
        return Ok(());
    }
    visited[id] = true;

    let module = ModuleId::new(&node.group, &node.name, &node.revision);
    if ledger.has(&node.group, &node.name, None) {
        if ledger.revise(&node.group, &node.name, &node.revision)? {
            tracing::info!(module = %module, "froze explicit dependency");
            summary.revised.push(module);
        }
    } else if ledger.override_version(&node.group, &node.name, &node.revision)? {
        tracing::info!(module = %module, "froze implicit dependency");
        summary.overridden.push(module);
    }

    for &child in forest.children(id) {
        freeze_node(ledger, forest, child, visited, summary)?;
    }
    Ok(())
}
