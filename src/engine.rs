use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::address::ServerAddress;
use crate::config::{GroupServer, MonitorConfig};
use crate::errors::{ProbeError, ResolveError};
use crate::icon::IconExtractor;
use crate::lookup::Lookup;
use crate::models::{ProtocolVariant, StatusOutcome};
use crate::motd;
use crate::probe::{BedrockProbe, JavaProbe, ProbeReport, ProtocolProbe, JAVA_DEFAULT_PORT};

/// Configured fallbacks consulted when a request leaves something out.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    pub global_default_server: String,
    pub global_default_icon: String,
    pub groups: BTreeMap<i64, GroupServer>,
}

impl From<&MonitorConfig> for Defaults {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            global_default_server: config.global_default_server.clone(),
            global_default_icon: config.global_default_icon.clone(),
            groups: config.groups.clone(),
        }
    }
}

impl Defaults {
    /// Requested address, else the group's server, else the global default.
    fn address_for(&self, requested: &str, group_id: Option<i64>) -> Option<String> {
        let group_server = group_id
            .and_then(|id| self.groups.get(&id))
            .map(|group| group.server_address.as_str());

        [Some(requested), group_server, Some(self.global_default_server.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|address| !address.is_empty())
            .map(str::to_string)
    }

    fn group_icon(&self, group_id: Option<i64>) -> &str {
        group_id
            .and_then(|id| self.groups.get(&id))
            .map(|group| group.default_icon.as_str())
            .unwrap_or("")
    }
}

/// Races the Java and Bedrock probes and settles on one status.
pub struct StatusResolver {
    java: Arc<dyn ProtocolProbe>,
    bedrock: Arc<dyn ProtocolProbe>,
    icons: IconExtractor,
    defaults: RwLock<Defaults>,
}

impl StatusResolver {
    pub fn new(java: Arc<dyn ProtocolProbe>, bedrock: Arc<dyn ProtocolProbe>, icons: IconExtractor, defaults: Defaults) -> Self {
        Self {
            java,
            bedrock,
            icons,
            defaults: RwLock::new(defaults),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        let lookup = Arc::new(Lookup::cloudflare());
        info!("Probe timeout: {} ms", config.probe_timeout_ms);
        Self::new(
            Arc::new(JavaProbe::new(Arc::clone(&lookup), config.probe_timeout_ms)),
            Arc::new(BedrockProbe::new(lookup, config.probe_timeout_ms)),
            IconExtractor::new(config.avatar_url_template.clone(), config.avatar_timeout_ms),
            Defaults::from(config),
        )
    }

    pub async fn set_defaults(&self, defaults: Defaults) {
        *self.defaults.write().await = defaults;
    }

    /// Applies the fallbacks and probe timeout of a changed configuration.
    pub async fn reconfigure(&self, config: &MonitorConfig) {
        self.java.set_timeout(config.probe_timeout_ms);
        self.bedrock.set_timeout(config.probe_timeout_ms);
        self.set_defaults(Defaults::from(config)).await;
    }

    pub async fn resolve(&self, address: &str) -> Result<StatusOutcome, ResolveError> {
        self.resolve_for_group(address, None).await
    }

    /// Resolves `address` (or the group's / global default server when it
    /// is empty). Offline servers come back as `Err`, never as a panic.
    pub async fn resolve_for_group(&self, address: &str, group_id: Option<i64>) -> Result<StatusOutcome, ResolveError> {
        let (raw_address, group_icon, global_icon) = {
            let defaults = self.defaults.read().await;
            let raw_address = defaults
                .address_for(address, group_id)
                .ok_or_else(|| ResolveError::Address("no server address given and no default configured".into()))?;
            (
                raw_address,
                defaults.group_icon(group_id).to_string(),
                defaults.global_default_icon.clone(),
            )
        };
        let server: ServerAddress = raw_address.parse()?;

        let first = self.race(&raw_address, &server).await?;
        let report = if first.needs_recheck {
            self.recheck_java(&server, first).await
        } else {
            first
        };

        let icon = self
            .icons
            .extract(report.status.icon.as_deref(), group_id, &group_icon, &global_icon)
            .await;

        info!(
            "{} answered as {} {} ({}/{} players, {:.1}ms)",
            raw_address,
            report.variant,
            report.status.version,
            report.status.online_players,
            report.status.max_players,
            report.status.latency_ms
        );

        Ok(StatusOutcome {
            address: raw_address,
            protocol_variant: report.variant,
            version: report.status.version,
            online_players: report.status.online_players,
            max_players: report.status.max_players,
            latency_ms: report.status.latency_ms,
            icon,
            motd_tokens: motd::decode(&report.status.motd),
        })
    }

    /// First success wins. Completed probes are drained before waiting on
    /// the rest; dropping `pending` cancels whatever is still in flight.
    async fn race(&self, raw_address: &str, server: &ServerAddress) -> Result<ProbeReport, ResolveError> {
        let mut pending: FuturesUnordered<_> = [&self.java, &self.bedrock]
            .into_iter()
            .map(|probe| guarded(probe.as_ref(), server))
            .collect();

        let mut failures = Vec::with_capacity(pending.len());
        while let Some((variant, result)) = pending.next().await {
            match result {
                Ok(report) => {
                    debug!("{} won the race for {}", variant, raw_address);
                    return Ok(report);
                }
                Err(e) => {
                    debug!("{} probe of {} failed: {}", variant, raw_address, e);
                    failures.push((variant, e));
                }
            }
        }

        Err(classify_failures(raw_address, &server.host, failures))
    }

    /// A Bedrock answer on a host that also speaks Java is reported as Java.
    async fn recheck_java(&self, server: &ServerAddress, bedrock: ProbeReport) -> ProbeReport {
        let java_addr = server.with_port(JAVA_DEFAULT_PORT);
        match guarded(self.java.as_ref(), &java_addr).await {
            (_, Ok(java)) => {
                debug!("{} also answers Java, preferring it", java_addr);
                java
            }
            (_, Err(e)) => {
                debug!("Java recheck of {} failed ({}), keeping Bedrock", java_addr, e);
                ProbeReport {
                    needs_recheck: false,
                    ..bedrock
                }
            }
        }
    }
}

async fn guarded(probe: &dyn ProtocolProbe, server: &ServerAddress) -> (ProtocolVariant, Result<ProbeReport, ProbeError>) {
    let variant = probe.variant();
    let result = match AssertUnwindSafe(probe.probe(server)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} probe of {} panicked", variant, server);
            Err(ProbeError::Panicked)
        }
    };
    (variant, result)
}

fn classify_failures(raw_address: &str, host: &str, mut failures: Vec<(ProtocolVariant, ProbeError)>) -> ResolveError {
    failures.sort_by_key(|(variant, _)| *variant);

    if !failures.is_empty() && failures.iter().all(|(_, e)| e.is_lookup()) {
        return ResolveError::Address(format!("cannot resolve host '{}'", host));
    }

    let reason = failures
        .iter()
        .map(|(variant, e)| format!("{}: {}", variant, e))
        .collect::<Vec<_>>()
        .join("; ");
    ResolveError::Connectivity {
        address: raw_address.to_string(),
        reason,
    }
}
