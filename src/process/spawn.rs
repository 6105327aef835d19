//! Process spawning and lifecycle management.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::io::{LineReader, ProcessWriter};
use crate::{Error, Result};

/// Everything needed to start one kind of keybase subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<String>,
    env_vars: HashMap<String, String>,
    inherit_env: bool,
}

impl ProcessSpec {
    /// Describe `program` run with `args`, inheriting the parent environment.
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env_vars: HashMap::new(),
            inherit_env: true,
        }
    }

    /// Replace the extra environment variables.
    pub fn with_env(mut self, env_vars: HashMap<String, String>) -> Self {
        self.env_vars = env_vars;
        self
    }

    /// Whether the parent environment is passed through.
    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// The binary being run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The argument list.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a tokio Command with all three standard streams piped.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if !self.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&self.env_vars);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Start the process.
    pub fn spawn(&self) -> Result<KeybaseProcess> {
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| spawn_error(e, &self.program))?;

        let stdin = child.stdin.take().map(ProcessWriter::new);
        let stdout = child.stdout.take().map(LineReader::new);
        let stderr = child.stderr.take().map(LineReader::new);

        tracing::debug!(
            program = %self.program.display(),
            args = ?self.args,
            pid = child.id(),
            "spawned keybase process"
        );

        Ok(KeybaseProcess {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Run to completion with stdin closed and collect its output.
    pub async fn output(&self) -> Result<std::process::Output> {
        let mut cmd = self.command();
        cmd.stdin(Stdio::null());
        cmd.output()
            .await
            .map_err(|e| spawn_error(e, &self.program))
    }
}

/// Map a spawn failure, reporting a missing binary as a locator error.
pub(crate) fn spawn_error(e: std::io::Error, program: &Path) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::BinaryNotFound {
            searched: program.display().to_string(),
        }
    } else {
        Error::ProcessSpawn(e)
    }
}

/// A running keybase subprocess.
///
/// The stream halves can each be taken once and moved to their own tasks.
///
/// # Cancellation
///
/// Dropping a `KeybaseProcess` kills the subprocess if it's still running.
pub struct KeybaseProcess {
    child: Child,
    stdin: Option<ProcessWriter>,
    stdout: Option<LineReader<ChildStdout>>,
    stderr: Option<LineReader<ChildStderr>>,
}

impl KeybaseProcess {
    /// Take the stdin writer.
    pub fn take_writer(&mut self) -> Option<ProcessWriter> {
        self.stdin.take()
    }

    /// Take the stdout line reader.
    pub fn take_reader(&mut self) -> Option<LineReader<ChildStdout>> {
        self.stdout.take()
    }

    /// Take the stderr line reader.
    pub fn take_stderr_reader(&mut self) -> Option<LineReader<ChildStderr>> {
        self.stderr.take()
    }

    /// Get the process ID, if it is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Try to kill the process without waiting.
    pub fn start_kill(&mut self) -> Result<()> {
        self.child.start_kill().map_err(Error::io)
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(Error::io)
    }
}

impl Drop for KeybaseProcess {
    fn drop(&mut self) {
        let _ = self.start_kill();
    }
}
