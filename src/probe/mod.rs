pub mod bedrock;
pub mod java;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::address::ServerAddress;
use crate::errors::ProbeError;
use crate::models::ProtocolVariant;

pub use bedrock::BedrockProbe;
pub use java::JavaProbe;

pub const JAVA_DEFAULT_PORT: u16 = 25565;
pub const BEDROCK_DEFAULT_PORT: u16 = 19132;

/// Status fields as a probe read them off the wire, before MOTD and icon
/// normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatus {
    pub version: String,
    pub online_players: i64,
    pub max_players: i64,
    pub latency_ms: f64,
    pub motd: serde_json::Value,
    pub icon: Option<String>,
}

/// A successful probe. `needs_recheck` marks results that only count once
/// the Java protocol has been ruled out on its conventional port.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub variant: ProtocolVariant,
    pub status: RawStatus,
    pub needs_recheck: bool,
}

#[async_trait]
pub trait ProtocolProbe: Send + Sync {
    fn variant(&self) -> ProtocolVariant;

    /// One handshake. Applies the protocol's default port when `addr` has none.
    async fn probe(&self, addr: &ServerAddress) -> Result<ProbeReport, ProbeError>;

    /// Budget for one whole probe, applied from the next probe on.
    fn set_timeout(&self, timeout_ms: u64);
}

pub(crate) async fn within<T, F>(timeout_ms: u64, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout_ms)),
    }
}
