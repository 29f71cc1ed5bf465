//! Revisions and revision specs
//!
//! Revisions are free-form version strings ("1.3.2", "2.0-rc1"). Specs are
//! what a ledger declares: an exact revision, a dynamic prefix ("1.+") or a
//! latest marker ("latest.integration").

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while parsing revision specs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevisionError {
    /// Empty revision or spec
    #[error("Empty revision")]
    Empty,

    /// Malformed spec
    #[error("Invalid revision spec: {0}")]
    InvalidSpec(String),
}

/// A concrete revision, ordered component by component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

#[derive(Debug, PartialEq, Eq)]
enum Component<'a> {
    Number(u64),
    Text(&'a str),
}

impl Revision {
    /// Parse a revision string
    pub fn parse(s: &str) -> Result<Self, RevisionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RevisionError::Empty);
        }
        Ok(Revision(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> Vec<Component<'_>> {
        self.0
            .split(['.', '-', '_'])
            .filter(|part| !part.is_empty())
            .map(|part| match part.parse::<u64>() {
                Ok(n) => Component::Number(n),
                Err(_) => Component::Text(part),
            })
            .collect()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.components();
        let right = other.components();

        for pair in left.iter().zip(right.iter()) {
            let ord = match pair {
                (Component::Number(a), Component::Number(b)) => a.cmp(b),
                (Component::Text(a), Component::Text(b)) => a.cmp(b),
                // Numbers sort after qualifiers: 1.0.1 > 1.0.beta
                (Component::Number(_), Component::Text(_)) => Ordering::Greater,
                (Component::Text(_), Component::Number(_)) => Ordering::Less,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }

        // A trailing qualifier marks a pre-release (1.0-rc1 < 1.0),
        // a trailing number a later release (1.0 < 1.0.1).
        match left.len().cmp(&right.len()) {
            Ordering::Equal => self.0.cmp(&other.0),
            Ordering::Greater => match left[right.len()] {
                Component::Number(_) => Ordering::Greater,
                Component::Text(_) => Ordering::Less,
            },
            Ordering::Less => match right[left.len()] {
                Component::Number(_) => Ordering::Less,
                Component::Text(_) => Ordering::Greater,
            },
        }
    }
}

/// A declared revision spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSpec {
    /// Exact revision (1.3.2)
    Exact(Revision),

    /// Dynamic prefix (1.+ matches 1.0, 1.3.2, ...; + matches anything)
    Prefix(String),

    /// Latest available revision (latest.integration, latest.release)
    Latest(String),
}

impl RevisionSpec {
    /// Parse a spec string
    pub fn parse(s: &str) -> Result<Self, RevisionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RevisionError::Empty);
        }

        if let Some(status) = s.strip_prefix("latest.") {
            if status.is_empty() {
                return Err(RevisionError::InvalidSpec(s.to_string()));
            }
            return Ok(RevisionSpec::Latest(status.to_string()));
        }

        if let Some(prefix) = s.strip_suffix('+') {
            if prefix.contains('+') {
                return Err(RevisionError::InvalidSpec(s.to_string()));
            }
            return Ok(RevisionSpec::Prefix(prefix.to_string()));
        }

        if s.contains('+') {
            return Err(RevisionError::InvalidSpec(s.to_string()));
        }

        Ok(RevisionSpec::Exact(Revision::parse(s)?))
    }

    /// True for specs whose result depends on what the repository offers
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, RevisionSpec::Exact(_))
    }

    /// Check if a revision satisfies this spec
    pub fn matches(&self, revision: &Revision) -> bool {
        match self {
            RevisionSpec::Exact(r) => r == revision,
            RevisionSpec::Prefix(prefix) => revision.as_str().starts_with(prefix.as_str()),
            RevisionSpec::Latest(_) => true,
        }
    }

    /// Pick the highest revision satisfying this spec
    pub fn select<'a>(&self, available: &'a [Revision]) -> Option<&'a Revision> {
        available.iter().filter(|r| self.matches(r)).max()
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpec::Exact(r) => write!(f, "{}", r),
            RevisionSpec::Prefix(p) => write!(f, "{}+", p),
            RevisionSpec::Latest(status) => write!(f, "latest.{}", status),
        }
    }
}
