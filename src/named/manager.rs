use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::conf::{self, ZoneDeclaration};
use super::record_types::ResourceRecord;
use super::zone_file::{bump_serial, initial_serial, ZoneDescriptor};
use crate::config::NamedConfig;
use crate::error::{Error, Result};
use crate::transport::{run_commands, RemoteCommand, RemoteHost};
use crate::validators::{validate_domain_name, validate_ttl};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ZoneCreation {
    Created(ZoneDescriptor),
    AlreadyExists { domain: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneDeletion {
    pub declaration_removed: bool,
    pub zone_file_removed: bool,
}

/// Manages master zones of a BIND `named` instance.
pub struct ZoneManager {
    host: RemoteHost,
    config: NamedConfig,
}

impl ZoneManager {
    pub fn new(host: RemoteHost, config: NamedConfig) -> Self {
        Self { host, config }
    }

    pub fn descriptor(&self, domain: &str, ttl: Option<u32>) -> Result<ZoneDescriptor> {
        if !validate_domain_name(domain) {
            return Err(Error::invalid(format!("invalid domain name {:?}", domain)));
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if !validate_ttl(ttl) {
            return Err(Error::invalid(format!("TTL {} out of range", ttl)));
        }
        Ok(ZoneDescriptor::new(domain, ttl, &self.config.zone_dir))
    }

    pub async fn list_zones(&self) -> Result<Vec<ZoneDeclaration>> {
        let conf_path = self.config.conf_path.clone();
        self.host
            .session(move |session| {
                let conf = session.read_file(&conf_path)?.unwrap_or_default();
                Ok(conf::parse_zones(&conf))
            })
            .await
    }

    /// A missing `named.conf` counts as "not present"; transport errors do not.
    pub async fn is_zone_present(&self, domain: &str) -> Result<bool> {
        let zone = self.descriptor(domain, None)?;
        let conf_path = self.config.conf_path.clone();
        self.host
            .session(move |session| {
                let conf = session.read_file(&conf_path)?.unwrap_or_default();
                Ok(conf::find_zone(&conf, &zone.domain).is_some())
            })
            .await
    }

    /// Declares the zone in `named.conf` and writes a fresh zone file with
    /// SOA and NS records. A zone that is already declared is left alone.
    pub async fn create_zone(&self, domain: &str, ttl: Option<u32>) -> Result<ZoneCreation> {
        let zone = self.descriptor(domain, ttl)?;
        let conf_path = self.config.conf_path.clone();
        let soa = self.config.soa.clone();
        let host = self.host.host().to_string();

        self.host
            .session(move |session| {
                let conf = session.read_file(&conf_path)?.unwrap_or_default();
                if conf::find_zone(&conf, &zone.domain).is_some() {
                    warn!(
                        "Zone {} already exists in {}, skipping creation",
                        zone.domain,
                        conf_path.display()
                    );
                    return Ok(ZoneCreation::AlreadyExists {
                        domain: zone.domain,
                    });
                }

                let statement = zone.render_statement()?;
                let header = zone.render_header(&soa, initial_serial(Utc::now().date_naive()))?;

                session.write_file(&conf_path, &conf::append_zone(&conf, &statement))?;
                session.write_file(&zone.zone_file, &header)?;

                info!(
                    "Zone {} created on {} with {} as primary name server",
                    zone.domain, host, soa.primary_ns
                );
                Ok(ZoneCreation::Created(zone))
            })
            .await
    }

    /// Appends the records in order and bumps the SOA serial. Returns the
    /// number of records written.
    pub async fn add_records(&self, domain: &str, records: &[ResourceRecord]) -> Result<usize> {
        let zone = self.descriptor(domain, None)?;
        for record in records {
            record.validate()?;
        }
        if records.is_empty() {
            return Ok(0);
        }

        let lines: Vec<String> = records.iter().map(ResourceRecord::to_zone_line).collect();

        self.host
            .session(move |session| {
                let current = session
                    .read_file(&zone.zone_file)?
                    .ok_or_else(|| Error::ZoneFileMissing(zone.zone_file.clone()))?;

                let mut updated = match bump_serial(&current, Utc::now().date_naive()) {
                    Some((bumped, serial)) => {
                        info!("Zone {} serial is now {}", zone.domain, serial);
                        bumped
                    }
                    None => {
                        warn!("No SOA record in {}, serial left as is", zone.zone_file.display());
                        current
                    }
                };

                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                for line in &lines {
                    updated.push_str(line);
                    updated.push('\n');
                }

                session.write_file(&zone.zone_file, &updated)?;
                info!("Added {} record(s) to zone {}", lines.len(), zone.domain);
                Ok(lines.len())
            })
            .await
    }

    /// Removes the zone statement and zone file, then restarts `named`. The
    /// restart happens even when the zone was not declared.
    pub async fn delete_zone(&self, domain: &str) -> Result<ZoneDeletion> {
        let zone = self.descriptor(domain, None)?;
        let conf_path = self.config.conf_path.clone();
        let restart = RemoteCommand::systemctl("restart", &self.config.service);
        let host = self.host.host().to_string();

        self.host
            .session(move |session| {
                let mut deletion = ZoneDeletion::default();

                if let Some(conf) = session.read_file(&conf_path)? {
                    if let Some(updated) = conf::remove_zone(&conf, &zone.domain) {
                        session.write_file(&conf_path, &updated)?;
                        deletion.declaration_removed = true;
                    }
                }
                if !deletion.declaration_removed {
                    warn!("Zone {} is not declared in {}", zone.domain, conf_path.display());
                }

                deletion.zone_file_removed = session.remove_file(&zone.zone_file)?;

                run_commands(session, &host, &[restart])?;
                info!("Zone {} deleted from {}", zone.domain, host);
                Ok(deletion)
            })
            .await
    }

    pub async fn restart_named(&self) -> Result<()> {
        self.host
            .execute_batch(vec![RemoteCommand::systemctl("restart", &self.config.service)])
            .await?;
        info!("Restarted {} on {}", self.config.service, self.host.host());
        Ok(())
    }
}
