use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ssh2::{
    CheckResult, ErrorCode, FileStat, HostKeyType, KnownHostFileKind, KnownHosts, OpenFlags,
    OpenType, Session as Ssh2Session,
};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::local::temp_path;
use super::{CommandOutput, RemoteCommand, Session, Transport};
use crate::config::{HostKeyPolicy, Secret, TargetConfig};
use crate::error::{Error, Result};

// libssh2 LIBSSH2_FX_NO_SUCH_FILE
const SFTP_NO_SUCH_FILE: i32 = 2;
const DEFAULT_FILE_MODE: i32 = 0o644;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    port: u16,
    credentials: Credentials,
    known_hosts: Option<PathBuf>,
    host_key_policy: HostKeyPolicy,
    timeout: Duration,
}

impl SshTransport {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: 22,
            credentials,
            known_hosts: TargetConfig::default().known_hosts_path(),
            host_key_policy: HostKeyPolicy::Strict,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(target: &TargetConfig) -> Result<Self> {
        if target.host.is_empty() || target.username.is_empty() {
            return Err(Error::invalid("ssh target needs a host and a username"));
        }

        Ok(Self {
            host: target.host.clone(),
            port: target.port,
            credentials: Credentials {
                username: target.username.clone(),
                password: target.password.clone(),
            },
            known_hosts: target.known_hosts_path(),
            host_key_policy: target.host_key_policy,
            timeout: Duration::from_secs(target.timeout_secs),
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>, policy: HostKeyPolicy) -> Self {
        self.known_hosts = Some(path.into());
        self.host_key_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open_tcp(&self) -> Result<TcpStream> {
        let connect_err = |source: io::Error| Error::Connect {
            host: self.host.clone(),
            source,
        };

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(connect_err)?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout)).map_err(connect_err)?;
                    stream.set_write_timeout(Some(self.timeout)).map_err(connect_err)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(connect_err(last_err))
    }

    fn verify_host_key(&self, session: &Ssh2Session) -> Result<()> {
        let rejected = |reason: String| Error::HostKey {
            host: self.host.clone(),
            reason,
        };

        let path = self
            .known_hosts
            .as_deref()
            .ok_or_else(|| rejected("no known_hosts file configured".to_string()))?;
        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| rejected("server sent no host key".to_string()))?;

        let mut known_hosts = session.known_hosts()?;
        let existing = load_known_hosts(&mut known_hosts, path);

        match known_hosts.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(rejected(format!(
                "key does not match the entry in {}",
                path.display()
            ))),
            CheckResult::NotFound => match self.host_key_policy {
                HostKeyPolicy::Strict => Err(rejected(format!(
                    "host is not listed in {}",
                    path.display()
                ))),
                HostKeyPolicy::AcceptNew => {
                    let entry = known_hosts_entry(&self.host, self.port);
                    let line = known_hosts_line(&entry, key_type, key).ok_or_else(|| {
                        rejected("server sent a host key of unknown type".to_string())
                    })?;
                    append_known_host(path, &existing, &line)?;
                    warn!("Recorded new host key for {} in {}", entry, path.display());
                    Ok(())
                }
            },
            CheckResult::Failure => Err(rejected("known_hosts lookup failed".to_string())),
        }
    }
}

impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn connect(&self) -> Result<Box<dyn Session>> {
        let tcp = self.open_tcp()?;

        let mut session = Ssh2Session::new()?;
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake()?;

        self.verify_host_key(&session)?;

        let username = &self.credentials.username;
        if session
            .userauth_password(username, self.credentials.password.expose())
            .is_err()
            || !session.authenticated()
        {
            return Err(Error::Auth {
                host: self.host.clone(),
                user: username.clone(),
            });
        }

        info!("Connected to {}@{}:{}", username, self.host, self.port);
        Ok(Box::new(SshSession { session }))
    }
}

struct SshSession {
    session: Ssh2Session,
}

impl SshSession {
    fn run(&self, line: &str) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.exec(line)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        Ok(CommandOutput {
            status: channel.exit_status()?,
            stdout,
            stderr,
        })
    }
}

/// `[host]:port` for non-default ports, as OpenSSH writes it.
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn key_type_name(key_type: HostKeyType) -> Option<&'static str> {
    match key_type {
        HostKeyType::Rsa => Some("ssh-rsa"),
        HostKeyType::Dss => Some("ssh-dss"),
        HostKeyType::Ecdsa256 => Some("ecdsa-sha2-nistp256"),
        HostKeyType::Ecdsa384 => Some("ecdsa-sha2-nistp384"),
        HostKeyType::Ecdsa521 => Some("ecdsa-sha2-nistp521"),
        HostKeyType::Ed25519 => Some("ssh-ed25519"),
        HostKeyType::Unknown => None,
    }
}

fn known_hosts_line(entry: &str, key_type: HostKeyType, key: &[u8]) -> Option<String> {
    let name = key_type_name(key_type)?;
    Some(format!("{} {} {}\n", entry, name, BASE64.encode(key)))
}

/// Entries worth handing to libssh2, with 1-based line numbers.
fn known_hosts_entries(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Loads what libssh2 understands from `path` and returns the raw file.
///
/// Lines it rejects (`@cert-authority`, `@revoked`, unsupported key types)
/// are skipped with a warning. An unreadable file loads nothing.
fn load_known_hosts(known_hosts: &mut KnownHosts, path: &Path) -> String {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return String::new(),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return String::new();
        }
    };

    for (number, line) in known_hosts_entries(&contents) {
        if let Err(e) = known_hosts.read_str(line, KnownHostFileKind::OpenSSH) {
            warn!("Skipping {}:{}: {}", path.display(), number, e);
        }
    }

    contents
}

/// Appends one entry, leaving everything already in the file untouched.
fn append_known_host(path: &Path, existing: &str, line: &str) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.write_all(line.as_bytes())
}

fn is_missing(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

/// Mode and ownership a replacement file takes over from the one it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Replacement {
    mode: i32,
    owner: Option<(u32, u32)>,
}

impl Replacement {
    fn from_existing(existing: Option<&FileStat>) -> Self {
        let mode = existing
            .and_then(|stat| stat.perm)
            .map(|perm| (perm & 0o7777) as i32)
            .unwrap_or(DEFAULT_FILE_MODE);
        let owner = existing.and_then(|stat| Some((stat.uid?, stat.gid?)));

        Self { mode, owner }
    }

    /// Attributes for `setstat`; `None` when a new file keeps the defaults.
    fn file_stat(&self) -> Option<FileStat> {
        let (uid, gid) = self.owner?;
        Some(FileStat {
            size: None,
            uid: Some(uid),
            gid: Some(gid),
            perm: Some(self.mode as u32),
            atime: None,
            mtime: None,
        })
    }
}

impl Session for SshSession {
    fn exec(&mut self, command: &RemoteCommand) -> Result<CommandOutput> {
        self.run(&command.to_shell())
    }

    fn read_file(&mut self, path: &Path) -> Result<Option<String>> {
        let sftp = self.session.sftp()?;
        let mut file = match sftp.open(path) {
            Ok(file) => file,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        let sftp = self.session.sftp()?;
        let existing = match sftp.stat(path) {
            Ok(stat) => Some(stat),
            Err(e) if is_missing(&e) => None,
            Err(e) => return Err(e.into()),
        };
        let replacement = Replacement::from_existing(existing.as_ref());

        let temp = temp_path(path)?;
        let written = (|| -> Result<()> {
            let mut file = sftp.open_mode(
                &temp,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                replacement.mode,
                OpenType::File,
            )?;
            file.write_all(contents.as_bytes())?;
            drop(file);

            if let Some(stat) = replacement.file_stat() {
                sftp.setstat(&temp, stat)?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            let _ = sftp.unlink(&temp);
            return Err(e);
        }

        // SFTPv3 rename refuses to replace an existing target, so let the
        // remote rename(2) do it.
        let rename = RemoteCommand::new("mv")
            .arg("-f")
            .arg(temp.to_string_lossy())
            .arg(path.to_string_lossy());
        let output = self.run(&rename.to_shell())?;
        if !output.success() {
            let _ = sftp.unlink(&temp);
            return Err(Error::CommandFailed {
                command: rename.to_shell(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        debug!("Wrote {} bytes to {}", contents.len(), path.display());
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<bool> {
        let sftp = self.session.sftp()?;
        match sftp.unlink(path) {
            Ok(()) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "dnsmgr done", None) {
            debug!("Disconnect failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetConfig {
        TargetConfig {
            host: "192.168.1.100".to_string(),
            username: "root".to_string(),
            password: Secret::new("password"),
            known_hosts: Some(PathBuf::from("/tmp/known_hosts")),
            ..TargetConfig::default()
        }
    }

    #[test]
    fn test_from_settings() {
        let transport = SshTransport::from_settings(&target()).unwrap();
        assert_eq!(transport.host(), "192.168.1.100");
        assert_eq!(transport.port, 22);
        assert_eq!(transport.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(transport.timeout, Duration::from_secs(30));
        assert!(!format!("{:?}", transport).contains("\"password\""));
    }

    #[test]
    fn test_from_settings_requires_host_and_user() {
        let mut missing_host = target();
        missing_host.host.clear();
        assert!(SshTransport::from_settings(&missing_host).is_err());

        let mut missing_user = target();
        missing_user.username.clear();
        assert!(SshTransport::from_settings(&missing_user).is_err());
    }

    #[test]
    fn test_connect_refused_is_typed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = SshTransport::new(
            "127.0.0.1",
            Credentials {
                username: "root".to_string(),
                password: Secret::new("password"),
            },
        )
        .with_port(port)
        .with_timeout(Duration::from_secs(2));

        assert!(matches!(transport.connect(), Err(Error::Connect { .. })));
    }

    fn ed25519_blob(fill: u8) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&11u32.to_be_bytes());
        blob.extend_from_slice(b"ssh-ed25519");
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[fill; 32]);
        blob
    }

    #[test]
    fn test_is_missing_only_for_no_such_file() {
        assert!(is_missing(&ssh2::Error::new(ErrorCode::SFTP(2), "no such file")));
        assert!(!is_missing(&ssh2::Error::new(ErrorCode::SFTP(3), "permission denied")));
        assert!(!is_missing(&ssh2::Error::new(ErrorCode::Session(-9), "timed out")));
    }

    #[test]
    fn test_replacement_keeps_mode_and_owner() {
        let existing = FileStat {
            size: Some(120),
            uid: Some(0),
            gid: Some(25),
            perm: Some(0o100640),
            atime: None,
            mtime: None,
        };

        let replacement = Replacement::from_existing(Some(&existing));
        assert_eq!(
            replacement,
            Replacement {
                mode: 0o640,
                owner: Some((0, 25)),
            }
        );

        let stat = replacement.file_stat().unwrap();
        assert_eq!((stat.uid, stat.gid, stat.perm), (Some(0), Some(25), Some(0o640)));
        assert_eq!(stat.size, None);
    }

    #[test]
    fn test_replacement_for_new_file() {
        let replacement = Replacement::from_existing(None);
        assert_eq!(replacement.mode, 0o644);
        assert_eq!(replacement.owner, None);
        assert!(replacement.file_stat().is_none());

        // A server that reports no ownership leaves it to the default.
        let partial = FileStat {
            size: None,
            uid: Some(0),
            gid: None,
            perm: Some(0o600),
            atime: None,
            mtime: None,
        };
        let replacement = Replacement::from_existing(Some(&partial));
        assert_eq!(replacement.mode, 0o600);
        assert_eq!(replacement.owner, None);
    }

    #[test]
    fn test_known_hosts_entry_brackets_custom_ports() {
        assert_eq!(known_hosts_entry("dns1.example.com", 22), "dns1.example.com");
        assert_eq!(known_hosts_entry("dns1.example.com", 2222), "[dns1.example.com]:2222");
        assert_eq!(known_hosts_entry("10.0.0.5", 2200), "[10.0.0.5]:2200");
    }

    #[test]
    fn test_known_hosts_line() {
        let line = known_hosts_line("[10.0.0.5]:2200", HostKeyType::Ed25519, b"key").unwrap();
        assert_eq!(line, "[10.0.0.5]:2200 ssh-ed25519 a2V5\n");

        let line = known_hosts_line("dns1", HostKeyType::Ecdsa256, &[0xfb, 0xff]).unwrap();
        assert_eq!(line, "dns1 ecdsa-sha2-nistp256 +/8=\n");

        assert_eq!(key_type_name(HostKeyType::Rsa), Some("ssh-rsa"));
        assert_eq!(key_type_name(HostKeyType::Ecdsa521), Some("ecdsa-sha2-nistp521"));
        assert!(known_hosts_line("dns1", HostKeyType::Unknown, b"key").is_none());
    }

    #[test]
    fn test_known_hosts_entries_skip_comments_and_blanks() {
        let contents = "# managed by ops\n\ndns1 ssh-ed25519 AAAA\n  \n@revoked * ssh-rsa AAAA\n";
        let entries: Vec<_> = known_hosts_entries(contents).collect();
        assert_eq!(
            entries,
            vec![(3, "dns1 ssh-ed25519 AAAA"), (5, "@revoked * ssh-rsa AAAA")]
        );
    }

    #[test]
    fn test_load_known_hosts_survives_unsupported_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let key = ed25519_blob(7);
        let contents = format!(
            "# fleet keys\n@cert-authority *.example.com ssh-ed25519 {ca}\nnot-a-key-line\ndns1.example.com ssh-ed25519 {key}\n",
            ca = BASE64.encode(ed25519_blob(1)),
            key = BASE64.encode(&key),
        );
        fs::write(&path, &contents).unwrap();

        let session = Ssh2Session::new().unwrap();
        let mut known_hosts = session.known_hosts().unwrap();
        let loaded = load_known_hosts(&mut known_hosts, &path);

        assert_eq!(loaded, contents);
        assert!(matches!(
            known_hosts.check_port("dns1.example.com", 22, &key),
            CheckResult::Match
        ));
    }

    #[test]
    fn test_load_known_hosts_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let session = Ssh2Session::new().unwrap();
        let mut known_hosts = session.known_hosts().unwrap();

        assert_eq!(load_known_hosts(&mut known_hosts, &dir.path().join("absent")), "");
    }

    #[test]
    fn test_append_known_host_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let existing = "# fleet keys\n@cert-authority *.example.com ssh-ed25519 AAAA";
        fs::write(&path, existing).unwrap();

        append_known_host(&path, existing, "[10.0.0.5]:2200 ssh-ed25519 a2V5\n").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# fleet keys\n@cert-authority *.example.com ssh-ed25519 AAAA\n[10.0.0.5]:2200 ssh-ed25519 a2V5\n"
        );
    }

    #[test]
    fn test_append_known_host_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh").join("known_hosts");

        append_known_host(&path, "", "dns1 ssh-ed25519 a2V5\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "dns1 ssh-ed25519 a2V5\n");
    }

    /// Needs a reachable sshd with password auth:
    /// `DNSMGR_TEST_SSH_HOST`, `DNSMGR_TEST_SSH_USER`, `DNSMGR_TEST_SSH_PASSWORD`
    /// and optionally `DNSMGR_TEST_SSH_PORT`.
    #[test]
    #[ignore]
    fn test_session_against_live_sshd() {
        let env = |name: &str| std::env::var(name).unwrap_or_default();
        let host = env("DNSMGR_TEST_SSH_HOST");
        assert!(!host.is_empty(), "DNSMGR_TEST_SSH_HOST is not set");
        let port = env("DNSMGR_TEST_SSH_PORT").parse().unwrap_or(22);

        let dir = tempfile::tempdir().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        let transport = SshTransport::new(
            host,
            Credentials {
                username: env("DNSMGR_TEST_SSH_USER"),
                password: Secret::new(env("DNSMGR_TEST_SSH_PASSWORD")),
            },
        )
        .with_port(port)
        .with_known_hosts(&known_hosts, HostKeyPolicy::AcceptNew)
        .with_timeout(Duration::from_secs(10));

        let mut session = transport.connect().unwrap();
        let recorded = fs::read_to_string(&known_hosts).unwrap();
        assert_eq!(recorded.lines().count(), 1);

        let path = PathBuf::from(format!("/tmp/dnsmgr-{}.conf", uuid::Uuid::new_v4().simple()));
        assert_eq!(session.read_file(&path).unwrap(), None);

        session.write_file(&path, "server=8.8.8.8\n").unwrap();
        session
            .exec(&RemoteCommand::new("chmod").arg("640").arg(path.to_string_lossy()))
            .unwrap();
        session.write_file(&path, "server=1.1.1.1\n").unwrap();
        assert_eq!(session.read_file(&path).unwrap().as_deref(), Some("server=1.1.1.1\n"));

        let mode = session
            .exec(&RemoteCommand::new("stat").arg("-c").arg("%a").arg(path.to_string_lossy()))
            .unwrap();
        assert_eq!(mode.stdout.trim(), "640");

        let listing = session
            .exec(&RemoteCommand::new("ls").arg("-a").arg("/tmp"))
            .unwrap();
        assert!(!listing.stdout.contains(".dnsmgr-"));

        assert!(session.remove_file(&path).unwrap());
        assert!(!session.remove_file(&path).unwrap());
        drop(session);

        // The recorded key is accepted on the next connection, also under strict.
        let strict = transport.with_known_hosts(&known_hosts, HostKeyPolicy::Strict);
        assert!(strict.connect().is_ok());
        assert_eq!(fs::read_to_string(&known_hosts).unwrap(), recorded);
    }
}
