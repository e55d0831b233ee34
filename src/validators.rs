use regex::Regex;
use std::net::IpAddr;
use std::str::FromStr;

/// Accepts an optional trailing dot (fully qualified form).
pub fn validate_domain_name(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    let parts: Vec<&str> = domain.split('.').collect();
    if parts.is_empty() || parts.len() > 127 {
        return false;
    }

    for part in parts {
        if part.is_empty() || part.len() > 63 {
            return false;
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return false;
        }
        if part.starts_with('-') || part.ends_with('-') {
            return false;
        }
    }

    true
}

pub fn validate_unit_name(unit: &str) -> bool {
    let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9:_.@\-]{0,254}$").unwrap();
    re.is_match(unit)
}

/// A record name or type must be a single non-empty zone-file token.
pub fn validate_record_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Record values may contain spaces (MX priority, TXT strings) but must stay on one line.
pub fn validate_record_value(value: &str) -> bool {
    !value.trim().is_empty() && !value.chars().any(|c| c == '\n' || c == '\r' || c == '\0')
}

pub fn validate_ttl(ttl: u32) -> bool {
    ttl <= 2147483647 // RFC 2181 caps TTLs at 2^31 - 1
}

/// dnsmasq `server=` value: `<ip>[#port]` or `/<domain>/[<ip>[#port]]`.
pub fn validate_upstream_server(server: &str) -> bool {
    let (domains, target) = match server.strip_prefix('/') {
        Some(rest) => match rest.rfind('/') {
            Some(idx) => (Some(&rest[..idx]), &rest[idx + 1..]),
            None => return false,
        },
        None => (None, server),
    };

    if let Some(domains) = domains {
        if !domains.split('/').all(validate_domain_name) {
            return false;
        }
        if target.is_empty() {
            return true;
        }
    }

    let (addr, port) = match target.split_once('#') {
        Some((addr, port)) => (addr, Some(port)),
        None => (target, None),
    };

    if let Some(port) = port {
        if u16::from_str(port).map(|p| p == 0).unwrap_or(true) {
            return false;
        }
    }

    IpAddr::from_str(addr).is_ok()
}
