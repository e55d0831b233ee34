use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;
use uuid::Uuid;

use super::{CommandOutput, RemoteCommand, Session, Transport};
use crate::error::{Error, Result};

/// Manages the machine the tool runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn host(&self) -> &str {
        "localhost"
    }

    fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(LocalSession))
    }
}

struct LocalSession;

impl Session for LocalSession {
    fn exec(&mut self, command: &RemoteCommand) -> Result<CommandOutput> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            // Killed by a signal: no exit code.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        let temp = temp_path(path)?;
        let previous = match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let written = (|| -> io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            if let Some(meta) = &previous {
                // Owner before mode: chown clears setuid/setgid bits.
                chown(&temp, Some(meta.uid()), Some(meta.gid()))?;
                fs::set_permissions(&temp, fs::Permissions::from_mode(meta.permissions().mode()))?;
            }
            fs::rename(&temp, path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!("Wrote {} bytes to {}", contents.len(), path.display());
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sibling of `path` so the final rename stays on one filesystem.
pub(crate) fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::invalid(format!("{} has no file name", path.display())))?;

    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(format!(".dnsmgr-{}.tmp", Uuid::new_v4().simple()));

    Ok(path.with_file_name(temp_name))
}
