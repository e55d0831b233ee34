use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dnsmgr::named::{ZoneCreation, ZoneDeletion};
use dnsmgr::{transport, DnsmasqManager, RemoteHost, ResourceRecord, Settings, ZoneManager};

#[derive(Parser, Debug)]
#[command(name = "dnsmgr")]
#[command(about = "Configure named (BIND) zones and dnsmasq on remote hosts over SSH", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/dnsmgr.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage zones declared in named.conf
    #[command(subcommand)]
    Zone(ZoneCommand),
    /// Manage records in a zone file
    #[command(subcommand)]
    Record(RecordCommand),
    /// Control the named service
    #[command(subcommand)]
    Named(NamedCommand),
    /// Configure dnsmasq
    #[command(subcommand)]
    Dnsmasq(DnsmasqCommand),
}

#[derive(Subcommand, Debug)]
enum ZoneCommand {
    Create {
        domain: String,
        #[arg(long)]
        ttl: Option<u32>,
    },
    /// Exits with status 1 when the zone is not declared
    Exists { domain: String },
    List,
    Delete { domain: String },
}

#[derive(Subcommand, Debug)]
enum RecordCommand {
    Add {
        domain: String,
        /// TYPE:NAME:VALUE, repeatable
        #[arg(short, long = "record")]
        records: Vec<ResourceRecord>,
        /// JSON list or TOML `[[record]]` tables of {type, name, value}
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum NamedCommand {
    Restart,
}

#[derive(Subcommand, Debug)]
enum DnsmasqCommand {
    Configure {
        upstream: String,
        #[arg(long)]
        cache_size: Option<u32>,
    },
}

#[derive(Deserialize)]
struct RecordFile {
    record: Vec<ResourceRecord>,
}

fn load_records(path: &Path) -> Result<Vec<ResourceRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let records = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str::<RecordFile>(&raw)
            .with_context(|| format!("parsing {}", path.display()))?
            .record,
        _ => serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?,
    };

    Ok(records)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dnsmgr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = Settings::load(&args.config)?;
    settings.validate()?;

    let host = RemoteHost::new(transport::from_settings(&settings.target)?);
    info!("Managing {}", host.host());

    match args.command {
        Command::Zone(cmd) => {
            let zones = ZoneManager::new(host, settings.named.clone());
            match cmd {
                ZoneCommand::Create { domain, ttl } => match zones.create_zone(&domain, ttl).await? {
                    ZoneCreation::Created(zone) => {
                        println!("created {} ({})", zone.domain, zone.zone_file.display())
                    }
                    ZoneCreation::AlreadyExists { domain } => println!("{} already exists", domain),
                },
                ZoneCommand::Exists { domain } => {
                    let present = zones.is_zone_present(&domain).await?;
                    println!("{}", present);
                    if !present {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                ZoneCommand::List => {
                    for zone in zones.list_zones().await? {
                        println!("{}", serde_json::to_string(&zone)?);
                    }
                }
                ZoneCommand::Delete { domain } => {
                    let ZoneDeletion {
                        declaration_removed,
                        zone_file_removed,
                    } = zones.delete_zone(&domain).await?;
                    println!(
                        "deleted {} (declaration: {}, zone file: {})",
                        domain, declaration_removed, zone_file_removed
                    );
                }
            }
        }
        Command::Record(RecordCommand::Add {
            domain,
            mut records,
            from,
        }) => {
            if let Some(path) = from {
                records.extend(load_records(&path)?);
            }
            if records.is_empty() {
                anyhow::bail!("no records given; use --record or --from");
            }

            let zones = ZoneManager::new(host, settings.named.clone());
            let added = zones.add_records(&domain, &records).await?;
            println!("added {} record(s) to {}", added, domain);
        }
        Command::Named(NamedCommand::Restart) => {
            ZoneManager::new(host, settings.named.clone())
                .restart_named()
                .await?;
            println!("restarted {}", settings.named.service);
        }
        Command::Dnsmasq(DnsmasqCommand::Configure {
            upstream,
            cache_size,
        }) => {
            DnsmasqManager::new(host, settings.dnsmasq.clone())
                .configure(&upstream, cache_size)
                .await?;
            println!("dnsmasq forwards to {}", upstream);
        }
    }

    Ok(ExitCode::SUCCESS)
}
