use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("host key for {host} rejected: {reason}")]
    HostKey { host: String, reason: String },

    #[error("authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("zone file {} does not exist", .0.display())]
    ZoneFileMissing(PathBuf),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }
}
