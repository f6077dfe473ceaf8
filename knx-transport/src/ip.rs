//! IP transport links (unicast tunnel, multicast router)

use crate::link::{EVENT_CHANNEL_CAPACITY, LinkEvent, TransportLink};
use async_trait::async_trait;
use knx_core::{KnxError, KnxResult};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const MAX_DATAGRAM_SIZE: usize = 1024;

/// IP tunnel link settings
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub gateway: SocketAddr,
    pub local: Option<SocketAddr>,
    pub connect_timeout: Duration,
}

impl TunnelSettings {
    /// Create new tunnel settings with the default connect timeout
    pub fn new(gateway: SocketAddr) -> Self {
        Self {
            gateway,
            local: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Create tunnel settings with an explicit connect timeout
    pub fn with_timeout(gateway: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            gateway,
            local: None,
            connect_timeout,
        }
    }
}

/// IP tunnel link to a single gateway (UDP unicast)
#[derive(Debug)]
pub struct IpTunnelLink {
    settings: TunnelSettings,
    socket: Option<Arc<UdpSocket>>,
    events: Option<mpsc::Receiver<LinkEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl IpTunnelLink {
    /// Create a new, unopened tunnel link
    pub fn new(settings: TunnelSettings) -> Self {
        Self {
            settings,
            socket: None,
            events: None,
            reader: None,
        }
    }
}

/// Spawn the inbound reader for a connected socket
///
/// The reader feeds complete datagrams into the event channel and reports
/// an unsolicited close on the first receive error.
fn spawn_connected_reader(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv(&mut buf).await {
                Ok(n) => {
                    if tx.send(LinkEvent::Frame(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(LinkEvent::Closed {
                            reason: e.to_string(),
                            initiated: false,
                        })
                        .await;
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl TransportLink for IpTunnelLink {
    async fn open(&mut self) -> KnxResult<()> {
        if self.socket.is_some() {
            return Err(KnxError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Link has already been opened",
            )));
        }

        let local = self
            .settings
            .local
            .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
        let socket = UdpSocket::bind(local).await?;

        tokio::time::timeout(
            self.settings.connect_timeout,
            socket.connect(self.settings.gateway),
        )
        .await
        .map_err(|_| KnxError::Timeout)??;

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.reader = Some(spawn_connected_reader(socket.clone(), tx));
        self.events = Some(rx);
        self.socket = Some(socket);
        log::debug!("Tunnel link open to {}", self.settings.gateway);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.socket.take().is_some() {
            log::debug!("Tunnel link to {} closed", self.settings.gateway);
        }
        self.events = None;
    }

    async fn send_frame(&mut self, frame: &[u8]) -> KnxResult<()> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            KnxError::LinkClosed("Tunnel link not open".to_string())
        })?;
        socket.send(frame).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.events.take()
    }

    fn describe(&self) -> String {
        format!("ip tunnel {}", self.settings.gateway)
    }
}

impl Drop for IpTunnelLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// IP router link settings
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub group: Ipv4Addr,
    pub port: u16,
    pub interface: Ipv4Addr,
}

impl RouterSettings {
    /// Create router settings for the standard multicast group
    pub fn new() -> Self {
        Self {
            group: Ipv4Addr::new(224, 0, 23, 12),
            port: 3671,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Create router settings for a custom multicast group
    pub fn with_group(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// IP router link (UDP multicast)
#[derive(Debug)]
pub struct IpRouterLink {
    settings: RouterSettings,
    socket: Option<Arc<UdpSocket>>,
    events: Option<mpsc::Receiver<LinkEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl IpRouterLink {
    /// Create a new, unopened router link
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            settings,
            socket: None,
            events: None,
            reader: None,
        }
    }
}

#[async_trait]
impl TransportLink for IpRouterLink {
    async fn open(&mut self) -> KnxResult<()> {
        if self.socket.is_some() {
            return Err(KnxError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Link has already been opened",
            )));
        }

        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.settings.port)).await?;
        socket.join_multicast_v4(self.settings.group, self.settings.interface)?;

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader_socket = socket.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                match reader_socket.recv_from(&mut buf).await {
                    Ok((n, _peer)) => {
                        if tx.send(LinkEvent::Frame(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(LinkEvent::Closed {
                                reason: e.to_string(),
                                initiated: false,
                            })
                            .await;
                        break;
                    }
                }
            }
        }));
        self.events = Some(rx);
        self.socket = Some(socket);
        log::debug!(
            "Router link joined {}:{}",
            self.settings.group,
            self.settings.port
        );
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(socket) = self.socket.take() {
            let _ = socket.leave_multicast_v4(self.settings.group, self.settings.interface);
            log::debug!(
                "Router link left {}:{}",
                self.settings.group,
                self.settings.port
            );
        }
        self.events = None;
    }

    async fn send_frame(&mut self, frame: &[u8]) -> KnxResult<()> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            KnxError::LinkClosed("Router link not open".to_string())
        })?;
        socket
            .send_to(frame, (self.settings.group, self.settings.port))
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.events.take()
    }

    fn describe(&self) -> String {
        format!("ip router {}:{}", self.settings.group, self.settings.port)
    }
}

impl Drop for IpRouterLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_settings() {
        let gateway: SocketAddr = "192.168.1.19:3671".parse().unwrap();
        let settings = TunnelSettings::new(gateway);
        assert_eq!(settings.gateway, gateway);
        assert!(settings.local.is_none());
    }

    #[test]
    fn test_router_settings_default_group() {
        let settings = RouterSettings::new();
        assert_eq!(settings.group, Ipv4Addr::new(224, 0, 23, 12));
        assert_eq!(settings.port, 3671);
    }

    #[tokio::test]
    async fn test_send_on_unopened_tunnel_fails() {
        let gateway: SocketAddr = "127.0.0.1:3671".parse().unwrap();
        let mut link = IpTunnelLink::new(TunnelSettings::new(gateway));
        assert!(!link.is_open());
        assert!(link.send_frame(&[0x00]).await.is_err());
    }
}
