pub mod settings;

pub use settings::{
    DnsmasqConfig, HostKeyPolicy, NamedConfig, Secret, Settings, SoaConfig, TargetConfig,
    TargetKind,
};
