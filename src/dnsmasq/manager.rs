use tracing::info;

use crate::config::DnsmasqConfig;
use crate::error::{Error, Result};
use crate::transport::{run_commands, RemoteCommand, RemoteHost};
use crate::validators::validate_upstream_server;

/// Drives dnsmasq as a plain forwarding cache.
pub struct DnsmasqManager {
    host: RemoteHost,
    config: DnsmasqConfig,
}

pub fn render_config(upstream: &str, cache_size: u32) -> String {
    format!("server={}\ncache-size={}\n", upstream, cache_size)
}

impl DnsmasqManager {
    pub fn new(host: RemoteHost, config: DnsmasqConfig) -> Self {
        Self { host, config }
    }

    /// Replaces the whole configuration with one upstream server and a cache
    /// size (0 disables caching), then enables and restarts the service.
    pub async fn configure(&self, upstream: &str, cache_size: Option<u32>) -> Result<()> {
        if !validate_upstream_server(upstream) {
            return Err(Error::invalid(format!("invalid upstream server {:?}", upstream)));
        }

        let contents = render_config(upstream, cache_size.unwrap_or(0));
        let conf_path = self.config.conf_path.clone();
        let commands = vec![
            RemoteCommand::systemctl("enable", &self.config.service),
            RemoteCommand::systemctl("restart", &self.config.service),
        ];
        let host = self.host.host().to_string();

        self.host
            .session(move |session| {
                session.write_file(&conf_path, &contents)?;
                run_commands(session, &host, &commands)?;
                Ok(())
            })
            .await?;

        info!("dnsmasq on {} now forwards to {}", self.host.host(), upstream);
        Ok(())
    }
}
