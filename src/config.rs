use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::address::ServerAddress;
use crate::errors::ConfigError;
use crate::icon::{self, DEFAULT_AVATAR_URL};
use crate::models::ServerTarget;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub scanner_enable: bool,
    #[serde(default)]
    pub global_default_server: String,
    #[serde(default)]
    pub global_default_icon: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_avatar_timeout")]
    pub avatar_timeout_ms: u64,
    #[serde(default = "default_avatar_url")]
    pub avatar_url_template: String,
    #[serde(default)]
    pub groups: BTreeMap<i64, GroupServer>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_ms: u64,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GroupServer {
    #[serde(default)]
    pub server_address: String,
    #[serde(default)]
    pub need_scan: bool,
    #[serde(default)]
    pub default_icon: String,
}

fn default_ping_interval() -> u64 { 60 }
fn default_timeout() -> u64 { 3500 }
fn default_avatar_timeout() -> u64 { 5000 }
fn default_avatar_url() -> String { DEFAULT_AVATAR_URL.to_string() }
fn default_webhook_timeout() -> u64 { 10_000 }
fn default_api_port() -> u16 { 3000 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enable: false,
            scanner_enable: false,
            global_default_server: String::new(),
            global_default_icon: String::new(),
            ping_interval_seconds: default_ping_interval(),
            probe_timeout_ms: default_timeout(),
            avatar_timeout_ms: default_avatar_timeout(),
            avatar_url_template: default_avatar_url(),
            groups: BTreeMap::new(),
            webhook_url: None,
            webhook_timeout_ms: default_webhook_timeout(),
            api_port: default_api_port(),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_interval(self.ping_interval_seconds)?;
        check_server_address(ConfigField::GlobalDefaultServer, &self.global_default_server)?;
        check_icon(ConfigField::GlobalDefaultIcon, &self.global_default_icon)?;
        for group in self.groups.values() {
            check_server_address(ConfigField::ServerAddress, &group.server_address)?;
            check_icon(ConfigField::DefaultIcon, &group.default_icon)?;
        }
        Ok(())
    }

    /// Targets the periodic monitor should watch, in group order.
    pub fn scan_targets(&self) -> Vec<ServerTarget> {
        self.groups
            .iter()
            .filter(|(_, group)| group.need_scan && !group.server_address.trim().is_empty())
            .map(|(&group_id, group)| ServerTarget {
                address: group.server_address.trim().to_string(),
                group_id,
                need_scan: true,
            })
            .collect()
    }

    pub fn get(&self, field: ConfigField, group_id: Option<i64>) -> Result<String, ConfigError> {
        check_scope(field, group_id)?;
        Ok(match field {
            ConfigField::Enable => self.enable.to_string(),
            ConfigField::ScannerEnable => self.scanner_enable.to_string(),
            ConfigField::GlobalDefaultServer => self.global_default_server.clone(),
            ConfigField::GlobalDefaultIcon => self.global_default_icon.clone(),
            ConfigField::PingIntervalSeconds => self.ping_interval_seconds.to_string(),
            ConfigField::ProbeTimeoutMs => self.probe_timeout_ms.to_string(),
            ConfigField::WebhookUrl => self.webhook_url.clone().unwrap_or_default(),
            ConfigField::ServerAddress => self.group(field, group_id)?.server_address.clone(),
            ConfigField::NeedScan => self.group(field, group_id)?.need_scan.to_string(),
            ConfigField::DefaultIcon => self.group(field, group_id)?.default_icon.clone(),
        })
    }

    /// Parses `value` for `field` and stores it. Group fields create the
    /// group entry if it does not exist yet.
    pub fn set(&mut self, field: ConfigField, value: &str, group_id: Option<i64>) -> Result<(), ConfigError> {
        check_scope(field, group_id)?;
        let value = value.trim();
        match field {
            ConfigField::Enable => self.enable = parse_bool(field, value)?,
            ConfigField::ScannerEnable => self.scanner_enable = parse_bool(field, value)?,
            ConfigField::GlobalDefaultServer => {
                check_server_address(field, value)?;
                self.global_default_server = value.to_string();
            }
            ConfigField::GlobalDefaultIcon => {
                check_icon(field, value)?;
                self.global_default_icon = value.to_string();
            }
            ConfigField::PingIntervalSeconds => {
                let interval = parse_number(field, value)?;
                check_interval(interval)?;
                self.ping_interval_seconds = interval;
            }
            ConfigField::ProbeTimeoutMs => self.probe_timeout_ms = parse_number(field, value)?,
            ConfigField::WebhookUrl => {
                self.webhook_url = (!value.is_empty()).then(|| value.to_string());
            }
            ConfigField::ServerAddress => {
                check_server_address(field, value)?;
                self.group_mut(field, group_id)?.server_address = value.to_string();
            }
            ConfigField::NeedScan => {
                let need_scan = parse_bool(field, value)?;
                self.group_mut(field, group_id)?.need_scan = need_scan;
            }
            ConfigField::DefaultIcon => {
                check_icon(field, value)?;
                self.group_mut(field, group_id)?.default_icon = value.to_string();
            }
        }
        Ok(())
    }

    fn group(&self, field: ConfigField, group_id: Option<i64>) -> Result<&GroupServer, ConfigError> {
        let group_id = group_id.ok_or_else(|| invalid(field, "requires a group id"))?;
        self.groups.get(&group_id).ok_or(ConfigError::UnknownGroup(group_id))
    }

    fn group_mut(&mut self, field: ConfigField, group_id: Option<i64>) -> Result<&mut GroupServer, ConfigError> {
        let group_id = group_id.ok_or_else(|| invalid(field, "requires a group id"))?;
        Ok(self.groups.entry(group_id).or_default())
    }
}

/// Every setting reachable by name from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    Enable,
    ScannerEnable,
    GlobalDefaultServer,
    GlobalDefaultIcon,
    PingIntervalSeconds,
    ProbeTimeoutMs,
    WebhookUrl,
    ServerAddress,
    NeedScan,
    DefaultIcon,
}

impl ConfigField {
    pub const ALL: [ConfigField; 10] = [
        ConfigField::Enable,
        ConfigField::ScannerEnable,
        ConfigField::GlobalDefaultServer,
        ConfigField::GlobalDefaultIcon,
        ConfigField::PingIntervalSeconds,
        ConfigField::ProbeTimeoutMs,
        ConfigField::WebhookUrl,
        ConfigField::ServerAddress,
        ConfigField::NeedScan,
        ConfigField::DefaultIcon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConfigField::Enable => "enable",
            ConfigField::ScannerEnable => "scanner_enable",
            ConfigField::GlobalDefaultServer => "global_default_server",
            ConfigField::GlobalDefaultIcon => "global_default_icon",
            ConfigField::PingIntervalSeconds => "ping_interval_seconds",
            ConfigField::ProbeTimeoutMs => "probe_timeout_ms",
            ConfigField::WebhookUrl => "webhook_url",
            ConfigField::ServerAddress => "server_address",
            ConfigField::NeedScan => "need_scan",
            ConfigField::DefaultIcon => "default_icon",
        }
    }

    /// Per-group settings; the rest are global.
    pub fn is_group_field(&self) -> bool {
        matches!(
            self,
            ConfigField::ServerAddress | ConfigField::NeedScan | ConfigField::DefaultIcon
        )
    }
}

impl FromStr for ConfigField {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == name)
            .ok_or_else(|| ConfigError::UnknownField(name.to_string()))
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn invalid(field: ConfigField, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn check_scope(field: ConfigField, group_id: Option<i64>) -> Result<(), ConfigError> {
    match group_id {
        Some(_) if !field.is_group_field() => Err(invalid(field, "is a global setting, not a group setting")),
        _ => Ok(()),
    }
}

fn parse_bool(field: ConfigField, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, format!("'{}' is not a boolean", value))),
    }
}

fn parse_number(field: ConfigField, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| invalid(field, format!("'{}' is not a non-negative integer", value)))
}

fn check_interval(interval: u64) -> Result<(), ConfigError> {
    if interval >= 1 {
        Ok(())
    } else {
        Err(invalid(ConfigField::PingIntervalSeconds, "must be at least 1"))
    }
}

fn check_server_address(field: ConfigField, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Ok(());
    }
    value
        .parse::<ServerAddress>()
        .map(|_| ())
        .map_err(|e| invalid(field, e.to_string()))
}

fn check_icon(field: ConfigField, value: &str) -> Result<(), ConfigError> {
    let encoded = icon::strip_data_url(value);
    if encoded.is_empty() {
        return Ok(());
    }
    STANDARD
        .decode(encoded)
        .map(|_| ())
        .map_err(|e| invalid(field, format!("not valid base64: {}", e)))
}
