//! Session-per-call access to a managed host.
//!
//! A [`Transport`] knows how to open a [`Session`] to one host. Managers never
//! hold a session across calls: [`RemoteHost::session`] opens one, runs a
//! closure against it on a blocking thread, and drops it on every exit path.
//! Calls against the same host are serialized by a process-wide lock.

pub mod local;
pub mod lock;
pub mod ssh;

#[cfg(test)]
pub(crate) mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{TargetConfig, TargetKind};
use crate::error::{Error, Result};

pub use local::LocalTransport;
pub use ssh::{Credentials, SshTransport};

/// A program invocation. Arguments are quoted when rendered for a remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn systemctl(action: &str, unit: &str) -> Self {
        Self::new("systemctl").arg(action).arg(unit)
    }

    /// Single shell-safe command line.
    pub fn to_shell(&self) -> String {
        let mut line = shell_quote(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One open connection to a host.
pub trait Session: Send {
    fn exec(&mut self, command: &RemoteCommand) -> Result<CommandOutput>;

    /// `None` when the file does not exist.
    fn read_file(&mut self, path: &Path) -> Result<Option<String>>;

    /// Replaces `path` atomically: the new contents are written next to it and
    /// renamed over the target, keeping the old file mode when there was one.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    /// Returns whether a file was removed.
    fn remove_file(&mut self, path: &Path) -> Result<bool>;
}

pub trait Transport: Send + Sync {
    fn host(&self) -> &str;

    fn connect(&self) -> Result<Box<dyn Session>>;
}

pub fn from_settings(target: &TargetConfig) -> Result<Arc<dyn Transport>> {
    match target.kind {
        TargetKind::Ssh => Ok(Arc::new(SshTransport::from_settings(target)?)),
        TargetKind::Local => Ok(Arc::new(LocalTransport::new())),
    }
}

#[derive(Clone)]
pub struct RemoteHost {
    transport: Arc<dyn Transport>,
}

impl RemoteHost {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    /// Runs `f` against a fresh session while holding the host lock.
    ///
    /// The lock is held by the blocking task itself, so dropping the returned
    /// future does not release it before the session has finished.
    pub async fn session<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = lock::host_lock(self.transport.host()).lock_owned().await;

        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut session = transport.connect()?;
            debug!("Opened session to {}", transport.host());
            f(session.as_mut())
        })
        .await?
    }

    /// Runs commands in order in one session, stopping at the first failure.
    /// Commands that already ran are not undone.
    pub async fn execute_batch(&self, commands: Vec<RemoteCommand>) -> Result<Vec<CommandOutput>> {
        let host = self.host().to_string();
        self.session(move |session| run_commands(session, &host, &commands))
            .await
    }
}

pub(crate) fn run_commands(
    session: &mut dyn Session,
    host: &str,
    commands: &[RemoteCommand],
) -> Result<Vec<CommandOutput>> {
    let mut outputs = Vec::with_capacity(commands.len());

    for command in commands {
        info!("Executing on {}: {}", host, command);
        let output = session.exec(command)?;

        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            debug!("{}: {}", command.program, stdout);
        }

        if !output.success() {
            return Err(Error::CommandFailed {
                command: command.to_shell(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            warn!("{}: {}", command.program, stderr);
        }

        outputs.push(output);
    }

    Ok(outputs)
}

/// POSIX single-quote escaping; plain words are left untouched.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));

    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
