use async_trait::async_trait;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{within, ProbeReport, ProtocolProbe, RawStatus, JAVA_DEFAULT_PORT};
use crate::address::ServerAddress;
use crate::errors::ProbeError;
use crate::lookup::Lookup;
use crate::models::ProtocolVariant;

const PROTOCOL_VERSION: i32 = 47;
const MAX_PACKET_LEN: usize = 1 << 21;

/// Server List Ping over TCP.
pub struct JavaProbe {
    lookup: Arc<Lookup>,
    timeout_ms: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    version: VersionInfo,
    #[serde(default)]
    players: PlayersInfo,
    #[serde(default)]
    description: serde_json::Value,
    favicon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PlayersInfo {
    online: i64,
    max: i64,
}

impl JavaProbe {
    pub fn new(lookup: Arc<Lookup>, timeout_ms: u64) -> Self {
        Self {
            lookup,
            timeout_ms: AtomicU64::new(timeout_ms),
        }
    }

    async fn target(&self, addr: &ServerAddress) -> ServerAddress {
        if addr.port.is_some() {
            return addr.clone();
        }
        match self.lookup.minecraft_srv(addr).await {
            Some(srv) => {
                debug!("SRV record redirects {} to {}", addr, srv);
                srv
            }
            None => addr.with_port(JAVA_DEFAULT_PORT),
        }
    }

    async fn query(socket: SocketAddr, target: &ServerAddress) -> Result<RawStatus, ProbeError> {
        let mut stream = TcpStream::connect(socket).await.map_err(ProbeError::from_io)?;
        let started = Instant::now();

        let mut handshake = Vec::new();
        write_varint(&mut handshake, 0x00);
        write_varint(&mut handshake, PROTOCOL_VERSION);
        write_string(&mut handshake, &target.host);
        handshake.extend_from_slice(&target.port_or(JAVA_DEFAULT_PORT).to_be_bytes());
        write_varint(&mut handshake, 1);
        send_packet(&mut stream, &handshake).await?;
        send_packet(&mut stream, &[0x00]).await?;

        let body = read_packet(&mut stream).await?;
        let status_rtt = started.elapsed();
        let mut cursor = body.as_slice();
        let id = read_varint_from(&mut cursor)?;
        if id != 0x00 {
            return Err(ProbeError::Protocol(format!("expected status response, got packet {:#04x}", id)));
        }
        let json = read_string_from(&mut cursor)?;
        let response: StatusResponse =
            serde_json::from_str(&json).map_err(|e| ProbeError::Protocol(format!("status JSON: {}", e)))?;

        // Some servers hang up instead of answering the ping; fall back to the
        // status round trip for latency.
        let latency = match ping(&mut stream).await {
            Ok(rtt) => rtt,
            Err(e) => {
                debug!("Ping after status failed for {}: {}", target, e);
                status_rtt.as_secs_f64() * 1000.0
            }
        };

        Ok(RawStatus {
            version: response.version.name,
            online_players: response.players.online,
            max_players: response.players.max,
            latency_ms: latency,
            motd: response.description,
            icon: response.favicon,
        })
    }
}

#[async_trait]
impl ProtocolProbe for JavaProbe {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Java
    }

    async fn probe(&self, addr: &ServerAddress) -> Result<ProbeReport, ProbeError> {
        let status = within(self.timeout_ms.load(Ordering::Relaxed), async {
            let target = self.target(addr).await;
            let socket = self.lookup.resolve_socket(&target, JAVA_DEFAULT_PORT).await?;
            Self::query(socket, &target).await
        })
        .await?;

        Ok(ProbeReport {
            variant: ProtocolVariant::Java,
            status,
            needs_recheck: false,
        })
    }

    fn set_timeout(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }
}

async fn ping<S>(stream: &mut S) -> Result<f64, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload: i64 = rand::random();
    let mut packet = Vec::with_capacity(9);
    write_varint(&mut packet, 0x01);
    packet.extend_from_slice(&payload.to_be_bytes());

    let started = Instant::now();
    send_packet(stream, &packet).await?;
    let pong = read_packet(stream).await?;
    let rtt = started.elapsed().as_secs_f64() * 1000.0;

    let mut cursor = pong.as_slice();
    let id = read_varint_from(&mut cursor)?;
    if id != 0x01 || cursor != &payload.to_be_bytes()[..] {
        return Err(ProbeError::Protocol("pong does not match ping".into()));
    }
    Ok(rtt)
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) fn read_varint_from(cursor: &mut &[u8]) -> Result<i32, ProbeError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| ProbeError::Protocol("truncated VarInt".into()))?;
        *cursor = rest;
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt too long".into()))
}

pub(crate) fn read_string_from(cursor: &mut &[u8]) -> Result<String, ProbeError> {
    let len = read_varint_from(cursor)?;
    let len = usize::try_from(len).map_err(|_| ProbeError::Protocol("negative string length".into()))?;
    if cursor.len() < len {
        return Err(ProbeError::Protocol("truncated string".into()));
    }
    let (bytes, rest) = cursor.split_at(len);
    *cursor = rest;
    String::from_utf8(bytes.to_vec()).map_err(|e| ProbeError::Protocol(e.to_string()))
}

pub(crate) async fn send_packet<S>(stream: &mut S, body: &[u8]) -> Result<(), ProbeError>
where
    S: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(body.len() + 5);
    write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(body);
    stream.write_all(&frame).await.map_err(ProbeError::from_io)?;
    stream.flush().await.map_err(ProbeError::from_io)
}

pub(crate) async fn read_packet<S>(stream: &mut S) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut len: u32 = 0;
    let mut complete = false;
    for i in 0..5 {
        let byte = stream.read_u8().await.map_err(ProbeError::from_io)?;
        len |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            complete = true;
            break;
        }
    }
    if !complete {
        return Err(ProbeError::Protocol("frame length VarInt too long".into()));
    }
    let len = len as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(ProbeError::Protocol(format!("frame length {} out of range", len)));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(ProbeError::from_io)?;
    Ok(body)
}
