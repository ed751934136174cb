use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;

use revtun_client::ClientConfig;

use crate::error::ManagerError;

/// Tunnel registry configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Address tunnel listeners bind to
    pub bind_addr: IpAddr,
    /// First port of the tunnel port pool
    pub port_start: u16,
    /// Number of ports in the pool, which is also the tunnel capacity
    pub port_count: u16,
    /// Per-tunnel cap on sockets from the client machine
    pub max_tcp_sockets: usize,
    /// Grace periods applied to every tunnel
    pub client: ClientConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_start: 8767,
            port_count: 10,
            max_tcp_sockets: 10,
            client: ClientConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Inclusive bounds of the port pool
    pub fn port_range(&self) -> Result<RangeInclusive<u16>, ManagerError> {
        if self.port_count == 0 {
            return Err(ManagerError::InvalidConfig(
                "port count must be at least 1".to_string(),
            ));
        }
        if self.port_start == 0 {
            return Err(ManagerError::InvalidConfig(
                "port start must not be 0".to_string(),
            ));
        }

        let end = self
            .port_start
            .checked_add(self.port_count - 1)
            .ok_or_else(|| {
                ManagerError::InvalidConfig(format!(
                    "port range {} + {} exceeds 65535",
                    self.port_start, self.port_count
                ))
            })?;

        Ok(self.port_start..=end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.port_range().unwrap(), 8767..=8776);
        assert_eq!(config.max_tcp_sockets, 10);
        assert_eq!(config.client.initial_grace, Duration::from_secs(10));
        assert_eq!(config.client.reconnect_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_port_range_bounds() {
        let config = ManagerConfig {
            port_start: 65530,
            port_count: 6,
            ..Default::default()
        };
        assert_eq!(config.port_range().unwrap(), 65530..=65535);

        let overflow = ManagerConfig {
            port_start: 65530,
            port_count: 7,
            ..Default::default()
        };
        assert!(matches!(
            overflow.port_range(),
            Err(ManagerError::InvalidConfig(_))
        ));

        let empty = ManagerConfig {
            port_count: 0,
            ..Default::default()
        };
        assert!(empty.port_range().is_err());
    }
}
