use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::validators::{validate_record_token, validate_unit_name};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub named: NamedConfig,
    #[serde(default)]
    pub dnsmasq: DnsmasqConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    #[default]
    Ssh,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only hosts already listed in known_hosts are accepted.
    #[default]
    Strict,
    /// Unknown hosts are recorded on first contact; changed keys are still rejected.
    AcceptNew,
}

/// A password that stays out of logs and `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Secret,
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedConfig {
    #[serde(default = "default_named_conf")]
    pub conf_path: PathBuf,
    #[serde(default = "default_zone_dir")]
    pub zone_dir: PathBuf,
    #[serde(default = "default_named_service")]
    pub service: String,
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
    #[serde(default)]
    pub soa: SoaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    #[serde(default = "default_primary_ns")]
    pub primary_ns: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_refresh")]
    pub refresh: u32,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_expire")]
    pub expire: u32,
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsmasqConfig {
    #[serde(default = "default_dnsmasq_conf")]
    pub conf_path: PathBuf,
    #[serde(default = "default_dnsmasq_service")]
    pub service: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_named_conf() -> PathBuf {
    PathBuf::from("/etc/named.conf")
}

fn default_zone_dir() -> PathBuf {
    PathBuf::from("/var/named")
}

fn default_named_service() -> String {
    "named".to_string()
}

fn default_ttl() -> u32 {
    86400
}

fn default_primary_ns() -> String {
    "ns1.yourdomain.com.".to_string()
}

fn default_admin_email() -> String {
    "admin.yourdomain.com.".to_string()
}

fn default_refresh() -> u32 {
    7200
}

fn default_retry() -> u32 {
    3600
}

fn default_expire() -> u32 {
    2419200
}

fn default_negative_ttl() -> u32 {
    86400
}

fn default_dnsmasq_conf() -> PathBuf {
    PathBuf::from("/etc/dnsmasq.conf")
}

fn default_dnsmasq_service() -> String {
    "dnsmasq".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::default(),
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            password: Secret::default(),
            known_hosts: None,
            host_key_policy: HostKeyPolicy::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for NamedConfig {
    fn default() -> Self {
        Self {
            conf_path: default_named_conf(),
            zone_dir: default_zone_dir(),
            service: default_named_service(),
            default_ttl: default_ttl(),
            soa: SoaConfig::default(),
        }
    }
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            primary_ns: default_primary_ns(),
            admin_email: default_admin_email(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            negative_ttl: default_negative_ttl(),
        }
    }
}

impl Default for DnsmasqConfig {
    fn default() -> Self {
        Self {
            conf_path: default_dnsmasq_conf(),
            service: default_dnsmasq_service(),
        }
    }
}

impl TargetConfig {
    /// known_hosts file to verify against, falling back to the user's OpenSSH one.
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        self.known_hosts
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
    }
}

impl Settings {
    pub fn load(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("DNSMGR").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.kind == TargetKind::Ssh {
            if self.target.host.is_empty() {
                return Err(Error::invalid("target.host is required for ssh targets"));
            }
            if self.target.username.is_empty() {
                return Err(Error::invalid("target.username is required for ssh targets"));
            }
        }

        if self.target.timeout_secs == 0 {
            return Err(Error::invalid("target.timeout_secs must be greater than zero"));
        }

        for (key, path) in [
            ("named.conf_path", &self.named.conf_path),
            ("named.zone_dir", &self.named.zone_dir),
            ("dnsmasq.conf_path", &self.dnsmasq.conf_path),
        ] {
            require_absolute(key, path)?;
        }

        for (key, unit) in [
            ("named.service", &self.named.service),
            ("dnsmasq.service", &self.dnsmasq.service),
        ] {
            if !validate_unit_name(unit) {
                return Err(Error::invalid(format!("{}: invalid unit name {:?}", key, unit)));
            }
        }

        // Both land verbatim in every new zone's SOA record.
        for (key, name) in [
            ("named.soa.primary_ns", &self.named.soa.primary_ns),
            ("named.soa.admin_email", &self.named.soa.admin_email),
        ] {
            if !validate_record_token(name) {
                return Err(Error::invalid(format!("{}: invalid name {:?}", key, name)));
            }
        }

        Ok(())
    }
}

fn require_absolute(key: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::invalid(format!("{} must be an absolute path, got {}", key, path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_stock_layout() {
        let settings = Settings::default();
        assert_eq!(settings.named.conf_path, PathBuf::from("/etc/named.conf"));
        assert_eq!(settings.named.zone_dir, PathBuf::from("/var/named"));
        assert_eq!(settings.named.default_ttl, 86400);
        assert_eq!(settings.named.soa.expire, 2419200);
        assert_eq!(settings.dnsmasq.conf_path, PathBuf::from("/etc/dnsmasq.conf"));
        assert_eq!(settings.target.port, 22);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[target]
host = "192.168.1.100"
username = "root"
password = "hunter2"
host_key_policy = "accept-new"

[named]
zone_dir = "/srv/named"

[named.soa]
primary_ns = "ns1.example.com."
"#
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.target.host, "192.168.1.100");
        assert_eq!(settings.target.password.expose(), "hunter2");
        assert_eq!(settings.target.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(settings.named.zone_dir, PathBuf::from("/srv/named"));
        assert_eq!(settings.named.soa.primary_ns, "ns1.example.com.");
        assert_eq!(settings.named.soa.refresh, 7200);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_incomplete_ssh_target() {
        let settings = Settings::default();
        assert!(settings.validate().is_err());

        let mut local = Settings::default();
        local.target.kind = TargetKind::Local;
        assert!(local.validate().is_ok());

        local.named.zone_dir = PathBuf::from("named");
        assert!(local.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsafe_soa_names() {
        let mut settings = Settings::default();
        settings.target.kind = TargetKind::Local;

        settings.named.soa.primary_ns = "ns1.example.com.\nevil IN A 6.6.6.6".to_string();
        assert!(settings.validate().is_err());

        settings.named.soa.primary_ns = "ns1.example.com.".to_string();
        settings.named.soa.admin_email = "hostmaster example.com.".to_string();
        assert!(settings.validate().is_err());

        settings.named.soa.admin_email = String::new();
        assert!(settings.validate().is_err());

        settings.named.soa.admin_email = "hostmaster.example.com.".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}
