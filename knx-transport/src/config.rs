//! Link configuration and the resolved establishment strategy

use crate::ip::{IpRouterLink, IpTunnelLink, RouterSettings, TunnelSettings};
use crate::link::{LinkStrategy, TransportLink};
use crate::serial::{SerialLink, SerialSettings};
use async_trait::async_trait;
use knx_core::{KnxError, KnxResult};

/// Transport variant selection
///
/// The variant is chosen by configuration and resolved exactly once into a
/// [`ConfiguredLink`] strategy; the connection manager never branches on the
/// variant again. The secure variants use the same media as their plain
/// counterparts; payload security is layered on top by the secure session.
#[derive(Debug, Clone)]
pub enum LinkConfig {
    /// IP tunnel to a single gateway
    Tunnel(TunnelSettings),
    /// IP router (multicast)
    Router(RouterSettings),
    /// IP tunnel with payload security
    SecureTunnel(TunnelSettings),
    /// IP router with payload security
    SecureRouter(RouterSettings),
    /// Serial gateway
    Serial(SerialSettings),
}

impl LinkConfig {
    /// Check whether this variant requires configured key material
    pub fn is_secure(&self) -> bool {
        matches!(self, LinkConfig::SecureTunnel(_) | LinkConfig::SecureRouter(_))
    }

    /// Human-readable identification of the configured medium
    pub fn describe(&self) -> String {
        match self {
            LinkConfig::Tunnel(s) => format!("ip tunnel {}", s.gateway),
            LinkConfig::Router(s) => format!("ip router {}:{}", s.group, s.port),
            LinkConfig::SecureTunnel(s) => format!("secure ip tunnel {}", s.gateway),
            LinkConfig::SecureRouter(s) => format!("secure ip router {}:{}", s.group, s.port),
            LinkConfig::Serial(s) => format!("serial {}", s.port_name),
        }
    }
}

/// Link establishment strategy resolved from a [`LinkConfig`]
///
/// Construction validates the configuration; validation failures are
/// configuration errors and therefore fatal for the caller (no automatic
/// retry is scheduled for them).
#[derive(Debug, Clone)]
pub struct ConfiguredLink {
    config: LinkConfig,
}

impl ConfiguredLink {
    /// Resolve a configuration into an establishment strategy
    ///
    /// # Errors
    /// Returns `KnxError::Configuration` if a mandatory parameter is missing
    /// or malformed
    pub fn new(config: LinkConfig) -> KnxResult<Self> {
        match &config {
            LinkConfig::Serial(s) => {
                if s.port_name.is_empty() {
                    return Err(KnxError::Configuration(
                        "Serial port name must not be empty".to_string(),
                    ));
                }
                if s.baud_rate == 0 {
                    return Err(KnxError::Configuration(
                        "Serial baud rate must be greater than zero".to_string(),
                    ));
                }
            }
            LinkConfig::Tunnel(s) | LinkConfig::SecureTunnel(s) => {
                if s.gateway.port() == 0 {
                    return Err(KnxError::Configuration(
                        "Tunnel gateway port must not be zero".to_string(),
                    ));
                }
            }
            LinkConfig::Router(s) | LinkConfig::SecureRouter(s) => {
                if !s.group.is_multicast() {
                    return Err(KnxError::Configuration(format!(
                        "Router group {} is not a multicast address",
                        s.group
                    )));
                }
            }
        }
        Ok(Self { config })
    }

    /// Get the underlying configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

#[async_trait]
impl LinkStrategy for ConfiguredLink {
    async fn establish(&self) -> KnxResult<Box<dyn TransportLink>> {
        let mut link: Box<dyn TransportLink> = match &self.config {
            LinkConfig::Tunnel(s) | LinkConfig::SecureTunnel(s) => {
                Box::new(IpTunnelLink::new(s.clone()))
            }
            LinkConfig::Router(s) | LinkConfig::SecureRouter(s) => {
                Box::new(IpRouterLink::new(s.clone()))
            }
            LinkConfig::Serial(s) => Box::new(SerialLink::new(s.clone())),
        };
        link.open().await?;
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialFraming;
    use std::net::Ipv4Addr;

    #[test]
    fn test_configuration_validation() {
        let bad_serial = LinkConfig::Serial(SerialSettings::new(String::new(), 19200));
        assert!(matches!(
            ConfiguredLink::new(bad_serial),
            Err(KnxError::Configuration(_))
        ));

        let bad_group = LinkConfig::Router(RouterSettings::with_group(
            Ipv4Addr::new(192, 168, 1, 1),
            3671,
        ));
        assert!(matches!(
            ConfiguredLink::new(bad_group),
            Err(KnxError::Configuration(_))
        ));

        let good = LinkConfig::Serial(SerialSettings::with_framing(
            "/dev/ttyAMA0".to_string(),
            19200,
            SerialFraming::Base,
        ));
        assert!(ConfiguredLink::new(good).is_ok());
    }

    #[test]
    fn test_secure_variant_detection() {
        let gateway = "192.168.1.19:3671".parse().unwrap();
        assert!(LinkConfig::SecureTunnel(TunnelSettings::new(gateway)).is_secure());
        assert!(!LinkConfig::Tunnel(TunnelSettings::new(gateway)).is_secure());
    }
}
