use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::net::{CompanyId, DEFAULT_PORT, NEW_COMPANY, REVISION};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub playas: CompanyId,
    pub revision: String,
    pub language: u8,
    pub unique_id: String,
    pub game_password: String,
    pub company_password: String,
    pub connect_timeout_secs: u64,
    pub ack_interval: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "Player".into(),
            playas: NEW_COMPANY,
            revision: REVISION.into(),
            language: 0,
            unique_id: generate_unique_id(),
            game_password: String::new(),
            company_password: String::new(),
            connect_timeout_secs: 5,
            ack_interval: 8,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// 32 hex digits identifying this installation to the server.
fn generate_unique_id() -> String {
    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    hasher.write_u64(nanos);
    let high = hasher.finish();
    hasher.write_u64(high);
    let low = hasher.finish();
    format!("{:016x}{:016x}", high, low)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("empty server address")]
    Empty,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("invalid company {0:?}")]
    InvalidCompany(String),
    #[error("unterminated IPv6 address {0:?}")]
    UnterminatedBracket(String),
}

/// A `host[:port][#company]` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub company: Option<CompanyId>,
}

impl ConnectTarget {
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let input = input.trim();
        let (address, company) = match input.rsplit_once('#') {
            Some((address, company)) => {
                let id = company
                    .parse::<CompanyId>()
                    .map_err(|_| TargetError::InvalidCompany(company.to_string()))?;
                (address, Some(id))
            }
            None => (input, None),
        };

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| TargetError::UnterminatedBracket(address.to_string()))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(TargetError::InvalidPort(after.to_string())),
            }
        } else if address.matches(':').count() == 1 {
            let (host, port) = address.split_once(':').unwrap_or((address, ""));
            (host, Some(port))
        } else {
            (address, None)
        };

        if host.is_empty() {
            return Err(TargetError::Empty);
        }
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| TargetError::InvalidPort(port.to_string()))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            company,
        })
    }

    pub fn resolve(&self) -> std::io::Result<Option<SocketAddr>> {
        Ok((self.host.as_str(), self.port).to_socket_addrs()?.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SPECTATOR;

    #[test]
    fn test_parse_host_only() {
        let target = ConnectTarget::parse("example.org").unwrap();
        assert_eq!(target.host, "example.org");
        assert_eq!(target.port, DEFAULT_PORT);
        assert_eq!(target.company, None);
    }

    #[test]
    fn test_parse_port_and_company() {
        let target = ConnectTarget::parse("10.0.0.2:4000#3").unwrap();
        assert_eq!(target.host, "10.0.0.2");
        assert_eq!(target.port, 4000);
        assert_eq!(target.company, Some(3));

        let spectator = ConnectTarget::parse("host#255").unwrap();
        assert_eq!(spectator.company, Some(SPECTATOR));
        assert_eq!(spectator.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_ipv6() {
        let target = ConnectTarget::parse("[::1]:3980").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 3980);

        let bare = ConnectTarget::parse("[fe80::1]").unwrap();
        assert_eq!(bare.host, "fe80::1");
        assert_eq!(bare.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ConnectTarget::parse(""), Err(TargetError::Empty));
        assert_eq!(ConnectTarget::parse(":3979"), Err(TargetError::Empty));
        assert!(matches!(
            ConnectTarget::parse("host:port"),
            Err(TargetError::InvalidPort(_))
        ));
        assert!(matches!(
            ConnectTarget::parse("host#999"),
            Err(TargetError::InvalidCompany(_))
        ));
        assert!(matches!(
            ConnectTarget::parse("[::1:3979"),
            Err(TargetError::UnterminatedBracket(_))
        ));
    }

    #[test]
    fn test_unique_id_shape() {
        let config = ClientConfig::default();
        assert_eq!(config.unique_id.len(), 32);
        assert!(config.unique_id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
