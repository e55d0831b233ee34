pub mod config;
pub mod dnsmasq;
pub mod error;
pub mod named;
pub mod transport;
pub mod validators;

pub use config::Settings;
pub use dnsmasq::DnsmasqManager;
pub use error::{Error, Result};
pub use named::{ResourceRecord, ZoneManager};
pub use transport::{RemoteHost, Transport};
