//! Install and uninstall hooks
//!
//! A hook string names an entry point followed by its arguments, separated
//! by whitespace. Entry points registered in-process take precedence; any
//! other name is run as a subprocess in the container root.

use crate::container::Container;
use crate::process::{self, CancelToken, ProcessError, ProcessOptions};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while running a hook
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook string has no entry point
    #[error("Empty hook")]
    Empty,

    /// An in-process entry point failed
    #[error("Entry point '{name}' failed: {message}")]
    EntryPoint { name: String, message: String },

    /// The subprocess failed
    #[error(transparent)]
    Process(#[from] ProcessError),
}

type EntryPoint = Box<dyn Fn(&Container, &[String]) -> Result<(), String> + Send + Sync>;

/// Registered in-process entry points
#[derive(Default)]
pub struct EntryPoints {
    entries: BTreeMap<String, EntryPoint>,
    cancel: CancelToken,
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoints")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: &str, entry: F)
    where
        F: Fn(&Container, &[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Box::new(entry));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Token that interrupts a running subprocess hook
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run a hook string
    pub fn run(&self, container: &Container, hook: &str) -> Result<(), HookError> {
        let mut parts = hook.split_whitespace();
        let name = parts.next().ok_or(HookError::Empty)?;
        let args: Vec<String> = parts.map(str::to_string).collect();

        if let Some(entry) = self.entries.get(name) {
            tracing::debug!(entry_point = name, ?args, "running in-process hook");
            return entry(container, &args).map_err(|message| HookError::EntryPoint {
                name: name.to_string(),
                message,
            });
        }

        tracing::debug!(entry_point = name, ?args, "running hook as subprocess");
        let options = ProcessOptions {
            wait: true,
            cwd: Some(container.root().to_path_buf()),
        };
        process::execute(name, &args, &options, Some(&self.cancel), container.background())?;
        Ok(())
    }
}
