// In-memory host used by unit tests.
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CommandOutput, RemoteCommand, Session, Transport};
use crate::error::{Error, Result};

#[derive(Default)]
struct HostState {
    files: BTreeMap<PathBuf, String>,
    commands: Vec<String>,
    failures: HashMap<String, (i32, String)>,
    failing_writes: Vec<PathBuf>,
    refuse_connections: bool,
    sessions_opened: usize,
}

#[derive(Clone)]
pub struct MemoryTransport {
    host: String,
    state: Arc<Mutex<HostState>>,
}

impl MemoryTransport {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    pub fn put_file(&self, path: &str, contents: &str) {
        self.state().files.insert(PathBuf::from(path), contents.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(Path::new(path)).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn fail_command(&self, command: &str, status: i32, stderr: &str) {
        self.state()
            .failures
            .insert(command.to_string(), (status, stderr.to_string()));
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.state().failing_writes.push(PathBuf::from(path));
    }

    pub fn refuse_connections(&self) {
        self.state().refuse_connections = true;
    }
}

impl Transport for MemoryTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn connect(&self) -> Result<Box<dyn Session>> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(Error::Connect {
                host: self.host.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }
        state.sessions_opened += 1;

        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<HostState>>,
}

impl Session for MemorySession {
    fn exec(&mut self, command: &RemoteCommand) -> Result<CommandOutput> {
        let line = command.to_shell();
        let mut state = self.state.lock().unwrap();
        state.commands.push(line.clone());

        Ok(match state.failures.get(&line) {
            Some((status, stderr)) => CommandOutput {
                status: *status,
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            None => CommandOutput::default(),
        })
    }

    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().files.get(path).cloned())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_writes.iter().any(|p| p == path) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("write to {} denied", path.display()),
            )));
        }
        state.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<bool> {
        Ok(self.state.lock().unwrap().files.remove(path).is_some())
    }
}
