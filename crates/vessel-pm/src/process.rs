//! Subprocess execution for package hooks

use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur while running a subprocess
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Could not start the process
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("Failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("'{command}' exited unsuccessfully (code {code:?})")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: Vec<String>,
    },

    /// The wait was cancelled and the process killed
    #[error("'{command}' was interrupted")]
    Interrupted { command: String },
}

/// Flag used to abandon a blocking wait
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How to run a subprocess
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Block until the process exits
    pub wait: bool,

    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            wait: true,
            cwd: None,
        }
    }
}

/// Result of a finished (or detached) subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; None for background processes
    pub code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Children started in background mode
///
/// Still-running children are killed when the registry is dropped.
#[derive(Debug, Default)]
pub struct BackgroundProcesses {
    children: Mutex<Vec<Child>>,
}

impl BackgroundProcesses {
    pub fn register(&self, child: Child) {
        self.children.lock().push(child);
    }

    /// Number of children that have not exited yet
    pub fn running(&self) -> usize {
        let mut children = self.children.lock();
        children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        children.len()
    }

    /// Kill every child that is still running
    pub fn terminate_all(&self) {
        for mut child in self.children.lock().drain(..) {
            if let Ok(None) = child.try_wait() {
                tracing::debug!(pid = child.id(), "terminating background process");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

impl Drop for BackgroundProcesses {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

/// Run `command` with `args`
///
/// In wait mode the output of both streams is logged line by line and
/// collected. Otherwise the child is handed to `background` and its output
/// is discarded.
pub fn execute(
    command: &str,
    args: &[String],
    options: &ProcessOptions,
    cancel: Option<&CancelToken>,
    background: &BackgroundProcesses,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(command);
    cmd.args(args).stdin(Stdio::null());
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }

    if !options.wait {
        let child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;
        tracing::info!(command, pid = child.id(), "started background process");
        background.register(child);
        return Ok(ProcessOutput::default());
    }

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;
    tracing::debug!(command, ?args, pid = child.id(), "started process");

    let stdout = child.stdout.take().map(|s| drain(command, "stdout", s));
    let stderr = child.stderr.take().map(|s| drain(command, "stderr", s));

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    tracing::warn!(command, pid = child.id(), "interrupting process");
                    let _ = child.kill();
                    let _ = child.wait();
                    join(stdout);
                    join(stderr);
                    return Err(ProcessError::Interrupted {
                        command: command.to_string(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                join(stdout);
                join(stderr);
                return Err(ProcessError::Wait {
                    command: command.to_string(),
                    source,
                });
            }
        }
    };

    let output = ProcessOutput {
        code: status.code(),
        stdout: join(stdout),
        stderr: join(stderr),
    };

    if !status.success() {
        return Err(ProcessError::Failed {
            command: command.to_string(),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(command: &str, stream: &'static str, source: R) -> JoinHandle<Vec<String>> {
    let command = command.to_string();
    thread::spawn(move || {
        let mut lines = Vec::new();
        for line in BufReader::new(source).lines() {
            let Ok(line) = line else { break };
            tracing::info!(target: "vessel::process", command = %command, stream, "{}", line);
            lines.push(line);
        }
        lines
    })
}

fn join(handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_collects_both_streams() {
        let background = BackgroundProcesses::default();
        let output = execute(
            "sh",
            &args(&["-c", "echo out; echo err 1>&2"]),
            &ProcessOptions::default(),
            None,
            &background,
        )
        .unwrap();

        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout, vec!["out"]);
        assert_eq!(output.stderr, vec!["err"]);
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let background = BackgroundProcesses::default();
        let result = execute(
            "sh",
            &args(&["-c", "echo broken 1>&2; exit 3"]),
            &ProcessOptions::default(),
            None,
            &background,
        );

        match result {
            Err(ProcessError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, vec!["broken"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_command() {
        let background = BackgroundProcesses::default();
        let result = execute(
            "vessel-no-such-command",
            &[],
            &ProcessOptions::default(),
            None,
            &background,
        );
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let background = BackgroundProcesses::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = execute(
            "sleep",
            &args(&["5"]),
            &ProcessOptions::default(),
            Some(&cancel),
            &background,
        );
        assert!(matches!(result, Err(ProcessError::Interrupted { .. })));
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let background = BackgroundProcesses::default();
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let started = std::time::Instant::now();
        let result = execute(
            "sleep",
            &args(&["5"]),
            &ProcessOptions::default(),
            Some(&cancel),
            &background,
        );
        canceller.join().unwrap();

        assert!(matches!(result, Err(ProcessError::Interrupted { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_background_children_terminated() {
        let background = BackgroundProcesses::default();
        let options = ProcessOptions {
            wait: false,
            cwd: None,
        };
        execute("sleep", &args(&["30"]), &options, None, &background).unwrap();
        assert_eq!(background.running(), 1);

        background.terminate_all();
        assert_eq!(background.running(), 0);
    }

    #[test]
    fn test_working_directory() {
        let temp = tempfile::tempdir().unwrap();
        let background = BackgroundProcesses::default();
        let options = ProcessOptions {
            wait: true,
            cwd: Some(temp.path().to_path_buf()),
        };
        execute("sh", &args(&["-c", "touch marker"]), &options, None, &background).unwrap();
        assert!(temp.path().join("marker").exists());
    }
}
