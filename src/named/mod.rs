pub mod conf;
pub mod manager;
pub mod record_types;
pub mod zone_file;

pub use conf::ZoneDeclaration;
pub use manager::{ZoneCreation, ZoneDeletion, ZoneManager};
pub use record_types::{DnsRecordType, ResourceRecord};
pub use zone_file::ZoneDescriptor;
