use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;

use super::{within, ProbeReport, ProtocolProbe, RawStatus, BEDROCK_DEFAULT_PORT};
use crate::address::ServerAddress;
use crate::errors::ProbeError;
use crate::lookup::Lookup;
use crate::models::ProtocolVariant;

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1c;
pub(crate) const OFFLINE_MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];
// id + time + server guid + magic
const PONG_HEADER_LEN: usize = 1 + 8 + 8 + 16;

/// RakNet unconnected ping over UDP.
pub struct BedrockProbe {
    lookup: Arc<Lookup>,
    timeout_ms: AtomicU64,
}

impl BedrockProbe {
    pub fn new(lookup: Arc<Lookup>, timeout_ms: u64) -> Self {
        Self {
            lookup,
            timeout_ms: AtomicU64::new(timeout_ms),
        }
    }

    async fn query(target: SocketAddr) -> Result<RawStatus, ProbeError> {
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(ProbeError::from_io)?;
        socket.connect(target).await.map_err(ProbeError::from_io)?;

        let started = Instant::now();
        socket.send(&ping_packet()).await.map_err(ProbeError::from_io)?;

        // Largest payload a UDP datagram can carry.
        let mut buf = vec![0u8; 65_507];
        let n = socket.recv(&mut buf).await.map_err(ProbeError::from_io)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut status = parse_pong(&buf[..n])?;
        status.latency_ms = latency_ms;
        Ok(status)
    }
}

#[async_trait]
impl ProtocolProbe for BedrockProbe {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Bedrock
    }

    async fn probe(&self, addr: &ServerAddress) -> Result<ProbeReport, ProbeError> {
        let status = within(self.timeout_ms.load(Ordering::Relaxed), async {
            let target = self.lookup.resolve_socket(addr, BEDROCK_DEFAULT_PORT).await?;
            Self::query(target).await
        })
        .await?;

        Ok(ProbeReport {
            variant: ProtocolVariant::Bedrock,
            status,
            needs_recheck: true,
        })
    }

    fn set_timeout(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }
}

fn ping_packet() -> Vec<u8> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    let client_guid: i64 = rand::random();

    let mut packet = Vec::with_capacity(33);
    packet.push(UNCONNECTED_PING);
    packet.extend_from_slice(&now_ms.to_be_bytes());
    packet.extend_from_slice(&OFFLINE_MAGIC);
    packet.extend_from_slice(&client_guid.to_be_bytes());
    packet
}

/// Parses `edition;motd;protocol;version;online;max;...` out of a pong.
/// Latency is left at zero for the caller to fill in.
pub(crate) fn parse_pong(packet: &[u8]) -> Result<RawStatus, ProbeError> {
    if packet.first() != Some(&UNCONNECTED_PONG) {
        return Err(ProbeError::Protocol("not an unconnected pong".into()));
    }
    if packet.len() < PONG_HEADER_LEN + 2 {
        return Err(ProbeError::Protocol("pong too short".into()));
    }
    if packet[17..PONG_HEADER_LEN] != OFFLINE_MAGIC {
        return Err(ProbeError::Protocol("bad offline message magic".into()));
    }

    let len = u16::from_be_bytes([packet[PONG_HEADER_LEN], packet[PONG_HEADER_LEN + 1]]) as usize;
    let start = PONG_HEADER_LEN + 2;
    let server_id = packet
        .get(start..start + len)
        .ok_or_else(|| ProbeError::Protocol("truncated server id".into()))?;
    let server_id = String::from_utf8_lossy(server_id);

    let fields: Vec<&str> = server_id.split(';').collect();
    if fields.len() < 6 {
        return Err(ProbeError::Protocol(format!("server id has {} fields", fields.len())));
    }
    let number = |i: usize| {
        fields[i]
            .trim()
            .parse::<i64>()
            .map_err(|_| ProbeError::Protocol(format!("field {} is not a number: '{}'", i, fields[i])))
    };

    Ok(RawStatus {
        version: fields[3].to_string(),
        online_players: number(4)?,
        max_players: number(5)?,
        latency_ms: 0.0,
        motd: serde_json::Value::String(fields[1].to_string()),
        icon: None,
    })
}
