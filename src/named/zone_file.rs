use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

use super::conf::normalize_domain;
use crate::config::SoaConfig;
use crate::error::Result;

const ZONE_STATEMENT: &str = r#"zone "{{ domain }}" { type master; file "{{ file }}"; };"#;

const ZONE_HEADER: &str = r#"$TTL {{ ttl }}
@   IN  SOA {{ soa.primary_ns }} {{ soa.admin_email }} (
            {{ serial }}  ; Serial
            {{ soa.refresh }}  ; Refresh
            {{ soa.retry }}  ; Retry
            {{ soa.expire }}  ; Expire
            {{ soa.negative_ttl }} )  ; Negative Cache TTL

; Name servers
@   IN  NS  {{ soa.primary_ns }}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDescriptor {
    pub domain: String,
    pub ttl: u32,
    pub zone_file: PathBuf,
}

impl ZoneDescriptor {
    /// Zone data lives at `<zone_dir>/db.<domain>`.
    pub fn new(domain: &str, ttl: u32, zone_dir: &Path) -> Self {
        let domain = normalize_domain(domain);
        let zone_file = zone_dir.join(format!("db.{}", domain));
        Self {
            domain,
            ttl,
            zone_file,
        }
    }

    pub fn render_statement(&self) -> Result<String> {
        let mut context = Context::new();
        context.insert("domain", &self.domain);
        context.insert("file", &self.zone_file.to_string_lossy());
        Ok(Tera::one_off(ZONE_STATEMENT, &context, false)?)
    }

    pub fn render_header(&self, soa: &SoaConfig, serial: u32) -> Result<String> {
        let mut context = Context::new();
        context.insert("ttl", &self.ttl);
        context.insert("soa", soa);
        context.insert("serial", &serial);
        Ok(Tera::one_off(ZONE_HEADER, &context, false)?)
    }
}

/// `YYYYMMDD01` for `today`.
pub fn initial_serial(today: NaiveDate) -> u32 {
    today.year() as u32 * 1_000_000 + today.month() * 10_000 + today.day() * 100 + 1
}

/// The serial must always grow; prefer the date form once it overtakes `current`.
pub fn next_serial(current: u32, today: NaiveDate) -> u32 {
    current.saturating_add(1).max(initial_serial(today))
}

/// Rewrites the SOA serial in `zone` in place. Returns the new text and the
/// new serial, or `None` when no SOA record is found.
pub fn bump_serial(zone: &str, today: NaiveDate) -> Option<(String, u32)> {
    let re = Regex::new(r"(?i)\bSOA\s+\S+\s+\S+\s+\(?\s*(\d+)").unwrap();
    let serial = re.captures(zone)?.get(1)?;
    let current: u32 = serial.as_str().parse().ok()?;
    let next = next_serial(current, today);

    let mut updated = String::with_capacity(zone.len() + 2);
    updated.push_str(&zone[..serial.start()]);
    updated.push_str(&next.to_string());
    updated.push_str(&zone[serial.end()..]);
    Some((updated, next))
}
