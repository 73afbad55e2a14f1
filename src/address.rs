use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::errors::ResolveError;

/// A host with an optional explicit port, as typed by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl ServerAddress {
    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Same host, pinned to `port`.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port: Some(port),
        }
    }
}

impl FromStr for ServerAddress {
    type Err = ResolveError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::Address("address is empty".into()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ResolveError::Address(format!("'{}' contains whitespace", raw)));
        }

        let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ResolveError::Address(format!("unclosed '[' in '{}'", raw)))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(ResolveError::Address(format!("unexpected '{}' after ']'", tail))),
                },
            }
        } else if raw.matches(':').count() > 1 {
            // Bare IPv6 literal, no port.
            (raw, None)
        } else {
            match raw.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (raw, None),
            }
        };

        if host.is_empty() {
            return Err(ResolveError::Address(format!("'{}' has no host", raw)));
        }

        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => {
                    return Err(ResolveError::Address(format!("invalid port '{}' in '{}'", port, raw)))
                }
                Ok(port) => Some(port),
            },
            None => None,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bracketed = self.host.contains(':');
        match (self.port, bracketed) {
            (Some(port), true) => write!(f, "[{}]:{}", self.host, port),
            (Some(port), false) => write!(f, "{}:{}", self.host, port),
            (None, _) => f.write_str(&self.host),
        }
    }
}
