use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A server the monitor keeps an eye on, built from a group's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub address: String,
    pub group_id: i64,
    pub need_scan: bool,
}

impl ServerTarget {
    pub fn new(address: impl Into<String>, group_id: i64) -> Self {
        Self {
            address: address.into(),
            group_id,
            need_scan: true,
        }
    }

    /// Two targets are the same monitored server when address and group match.
    pub fn same_server(&self, other: &ServerTarget) -> bool {
        self.address == other.address && self.group_id == other.group_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVariant {
    Java,
    Bedrock,
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Java => f.write_str("Java"),
            ProtocolVariant::Bedrock => f.write_str("Bedrock"),
        }
    }
}

/// One element of a decoded MOTD, in the order a renderer should draw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MotdToken {
    Text(String),
    Color(String),
    Format(MotdFormat),
    /// The server supplied no MOTD at all.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotdFormat {
    Bold,
    Italic,
    Underlined,
    Strikethrough,
    Obfuscated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOutcome {
    pub address: String,
    pub protocol_variant: ProtocolVariant,
    pub version: String,
    pub online_players: i64,
    pub max_players: i64,
    pub latency_ms: f64,
    /// Base64-encoded image, without any `data:` prefix.
    pub icon: String,
    pub motd_tokens: Vec<MotdToken>,
}

impl StatusOutcome {
    /// Concatenated text runs of the MOTD, ignoring control markers.
    pub fn motd_text(&self) -> String {
        self.motd_tokens
            .iter()
            .filter_map(|token| match token {
                MotdToken::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorEntry {
    pub target: ServerTarget,
    pub state: EntryState,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

impl MonitorEntry {
    pub fn new(target: ServerTarget) -> Self {
        Self {
            target,
            state: EntryState::Unknown,
            last_checked: None,
            last_message: None,
        }
    }

    pub fn is_down(&self) -> bool {
        self.state == EntryState::Down
    }
}
