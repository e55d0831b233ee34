use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::validators::{validate_record_token, validate_record_value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecordType {
    A,
    AAAA,
    CNAME,
    MX,
    TXT,
    PTR,
    NS,
    SRV,
    CAA,
    /// Any other mnemonic; written to the zone file as given.
    Other(String),
}

impl FromStr for DnsRecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !validate_record_token(s) {
            return Err(Error::invalid(format!("invalid record type {:?}", s)));
        }

        Ok(match s.to_uppercase().as_str() {
            "A" => DnsRecordType::A,
            "AAAA" => DnsRecordType::AAAA,
            "CNAME" => DnsRecordType::CNAME,
            "MX" => DnsRecordType::MX,
            "TXT" => DnsRecordType::TXT,
            "PTR" => DnsRecordType::PTR,
            "NS" => DnsRecordType::NS,
            "SRV" => DnsRecordType::SRV,
            "CAA" => DnsRecordType::CAA,
            other => DnsRecordType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            DnsRecordType::A => "A",
            DnsRecordType::AAAA => "AAAA",
            DnsRecordType::CNAME => "CNAME",
            DnsRecordType::MX => "MX",
            DnsRecordType::TXT => "TXT",
            DnsRecordType::PTR => "PTR",
            DnsRecordType::NS => "NS",
            DnsRecordType::SRV => "SRV",
            DnsRecordType::CAA => "CAA",
            DnsRecordType::Other(other) => other,
        };
        f.write_str(mnemonic)
    }
}

impl Serialize for DnsRecordType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DnsRecordType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One `<name> IN <type> <value>` line of a zone file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub record_type: DnsRecordType,
    pub name: String,
    pub value: String,
}

impl ResourceRecord {
    pub fn new(record_type: DnsRecordType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            record_type,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn a(name: impl Into<String>, ip: std::net::Ipv4Addr) -> Self {
        Self::new(DnsRecordType::A, name, ip.to_string())
    }

    pub fn cname(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(DnsRecordType::CNAME, name, target)
    }

    /// Only checks that the record stays a single zone-file line.
    pub fn validate(&self) -> Result<()> {
        if !validate_record_token(&self.name) {
            return Err(Error::invalid(format!("invalid record name {:?}", self.name)));
        }
        if !validate_record_token(&self.record_type.to_string()) {
            return Err(Error::invalid(format!("invalid record type {:?}", self.record_type)));
        }
        if !validate_record_value(&self.value) {
            return Err(Error::invalid(format!(
                "invalid value {:?} for record {}",
                self.value, self.name
            )));
        }
        Ok(())
    }

    pub fn to_zone_line(&self) -> String {
        format!("{} IN {} {}", self.name, self.record_type, self.value.trim())
    }
}

/// Parses the `TYPE:NAME:VALUE` shorthand; the value may itself contain colons.
impl FromStr for ResourceRecord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(record_type), Some(name), Some(value)) => {
                let record = ResourceRecord::new(record_type.parse()?, name, value);
                record.validate()?;
                Ok(record)
            }
            _ => Err(Error::invalid(format!(
                "expected TYPE:NAME:VALUE, got {:?}",
                s
            ))),
        }
    }
}
