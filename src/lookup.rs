use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};

use crate::address::ServerAddress;
use crate::errors::ProbeError;

/// Shared DNS service for the probes.
pub struct Lookup {
    resolver: TokioResolver,
}

impl Lookup {
    pub fn cloudflare() -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build();

        info!("DNS resolver configured: Cloudflare 1.1.1.1 / 1.0.0.1");
        Self { resolver }
    }

    async fn lookup_ip(&self, host: &str) -> Result<IpAddr, ProbeError> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .ok_or_else(|| ProbeError::Lookup(format!("no IP address found for {}", host))),
            Err(e) => Err(ProbeError::Lookup(format!("{}: {}", host, e))),
        }
    }

    pub async fn resolve_socket(&self, addr: &ServerAddress, default_port: u16) -> Result<SocketAddr, ProbeError> {
        let ip = match addr.ip() {
            Some(ip) => ip,
            None => self.lookup_ip(&addr.host).await?,
        };
        Ok(SocketAddr::new(ip, addr.port_or(default_port)))
    }

    /// Looks up `_minecraft._tcp.<host>`. Any failure just means "no record".
    pub async fn minecraft_srv(&self, addr: &ServerAddress) -> Option<ServerAddress> {
        if addr.ip().is_some() {
            return None;
        }
        let name = format!("_minecraft._tcp.{}", addr.host);
        match self.resolver.srv_lookup(name.as_str()).await {
            Ok(lookup) => lookup.iter().next().map(|srv| {
                let target = srv.target().to_utf8();
                ServerAddress {
                    host: target.trim_end_matches('.').to_string(),
                    port: Some(srv.port()),
                }
            }),
            Err(e) => {
                debug!("No SRV record for {}: {}", name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_literals_skip_dns() {
        let lookup = Lookup::cloudflare();
        let addr: ServerAddress = "127.0.0.1".parse().unwrap();
        let socket = lookup.resolve_socket(&addr, 25565).await.unwrap();
        assert_eq!(socket, "127.0.0.1:25565".parse().unwrap());
        assert!(lookup.minecraft_srv(&addr).await.is_none());
    }
}
