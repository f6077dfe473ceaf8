//! Read/write/response primitive for application-layer group communication

use crate::manager::{ClientInner, KnxClient};
use crate::registry::ListenerRegistry;
use knx_core::frame::{self, BusFrame, Destination};
use knx_core::{GroupAddress, GroupEventKind, IndividualAddress, KnxError, KnxResult};
use knx_security::SecureSession;
use knx_transport::{LinkEvent, TransportLink};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Pending response from an individually-addressed device request
struct DeviceWaiter {
    device: IndividualAddress,
    service: u16,
    tx: oneshot::Sender<Vec<u8>>,
}

/// Bus communicator over one transport link
///
/// Owns the link for the lifetime of one connection and is torn down and
/// rebuilt together with it. Inbound traffic is pumped off the link's event
/// stream: group events go through the listener registry, device responses
/// complete registered waiters, and an unsolicited close is surfaced to the
/// connection manager.
pub struct BusCommunicator {
    link: tokio::sync::Mutex<Box<dyn TransportLink>>,
    secure: Option<Arc<SecureSession>>,
    source: IndividualAddress,
    response_timeout: Duration,
    waiters: Arc<Mutex<Vec<DeviceWaiter>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    description: String,
}

impl BusCommunicator {
    /// Create a communicator over an opened link
    pub(crate) fn new(
        link: Box<dyn TransportLink>,
        secure: Option<Arc<SecureSession>>,
        source: IndividualAddress,
        response_timeout: Duration,
    ) -> Self {
        let description = link.describe();
        Self {
            link: tokio::sync::Mutex::new(link),
            secure,
            source,
            response_timeout,
            waiters: Arc::new(Mutex::new(Vec::new())),
            pump: Mutex::new(None),
            description,
        }
    }

    /// Human-readable identification of the underlying medium
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Check whether the underlying link is usable
    pub async fn is_link_open(&self) -> bool {
        self.link.lock().await.is_open()
    }

    /// Send a group read, write or response
    ///
    /// Payloads for groups with a configured key are sealed and sent under
    /// the secure service marker. The response timeout bounds the send.
    ///
    /// # Errors
    /// Returns `KnxError::Timeout` when the link does not accept the frame
    /// in time, or the link's own error otherwise
    pub async fn send_group(
        &self,
        service: u16,
        destination: GroupAddress,
        asdu: &[u8],
    ) -> KnxResult<()> {
        let (wire_service, payload) = match &self.secure {
            Some(secure) if secure.group_key(destination).is_some() => (
                frame::SECURE_DATA,
                secure.seal(destination, service, asdu)?,
            ),
            _ => (service, asdu.to_vec()),
        };

        let encoded = BusFrame::group(self.source, destination, wire_service, payload).encode();
        let mut link = self.link.lock().await;
        tokio::time::timeout(self.response_timeout, link.send_frame(&encoded))
            .await
            .map_err(|_| KnxError::Timeout)?
    }

    /// Send an individually-addressed frame without awaiting a response
    pub async fn send_to_device(
        &self,
        device: IndividualAddress,
        service: u16,
        asdu: &[u8],
    ) -> KnxResult<()> {
        let encoded = BusFrame::individual(self.source, device, service, asdu.to_vec()).encode();
        let mut link = self.link.lock().await;
        tokio::time::timeout(self.response_timeout, link.send_frame(&encoded))
            .await
            .map_err(|_| KnxError::Timeout)?
    }

    /// Send a device request and await the matching response
    ///
    /// # Returns
    /// `Ok(Some(asdu))` on a response, `Ok(None)` when the device does not
    /// answer within the timeout or the request is cancelled by teardown
    ///
    /// # Errors
    /// Returns the link's error when the request itself cannot be sent
    pub async fn request_from_device(
        &self,
        device: IndividualAddress,
        request_service: u16,
        response_service: u16,
        asdu: &[u8],
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().push(DeviceWaiter {
            device,
            service: response_service,
            tx,
        });

        if let Err(e) = self.send_to_device(device, request_service, asdu).await {
            self.remove_waiter(device, response_service);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            // waiter dropped: the connection is being torn down
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.remove_waiter(device, response_service);
                Ok(None)
            }
        }
    }

    fn remove_waiter(&self, device: IndividualAddress, service: u16) {
        self.waiters
            .lock()
            .unwrap()
            .retain(|w| !(w.device == device && w.service == service));
    }

    /// Start the inbound pump for this connection
    ///
    /// Consumes the link's event stream; must be called exactly once, after
    /// which all inbound frames route through the listener registry and the
    /// waiter table. The pump never blocks on listener logic.
    pub(crate) fn start_pump(
        &self,
        mut events: mpsc::Receiver<LinkEvent>,
        registry: Arc<ListenerRegistry>,
        client: Weak<ClientInner>,
    ) {
        let secure = self.secure.clone();
        let waiters = self.waiters.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LinkEvent::Frame(bytes) => {
                        let frame = match BusFrame::decode(&bytes) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::debug!("Discarding undecodable frame: {}", e);
                                continue;
                            }
                        };
                        Self::route_frame(frame, &secure, &waiters, &registry, &client);
                    }
                    LinkEvent::Closed { initiated: true, .. } => break,
                    LinkEvent::Closed {
                        reason,
                        initiated: false,
                    } => {
                        log::warn!("Link closed unexpectedly: {}", reason);
                        if let Some(inner) = client.upgrade() {
                            KnxClient::from_inner(inner).on_link_lost(reason).await;
                        }
                        break;
                    }
                }
            }
        });
        *self.pump.lock().unwrap() = Some(handle);
    }

    fn route_frame(
        frame: BusFrame,
        secure: &Option<Arc<SecureSession>>,
        waiters: &Arc<Mutex<Vec<DeviceWaiter>>>,
        registry: &Arc<ListenerRegistry>,
        client: &Weak<ClientInner>,
    ) {
        match frame.destination {
            Destination::Individual(_) => {
                let mut waiters = waiters.lock().unwrap();
                if let Some(pos) = waiters
                    .iter()
                    .position(|w| w.device == frame.source && w.service == frame.service)
                {
                    let waiter = waiters.remove(pos);
                    let _ = waiter.tx.send(frame.asdu);
                }
            }
            Destination::Group(destination) => {
                let (kind, asdu) = if frame.service == frame::SECURE_DATA {
                    let keyed = secure
                        .as_ref()
                        .filter(|s| s.group_key(destination).is_some());
                    match keyed {
                        Some(session) => match session.open(destination, &frame.asdu) {
                            Ok((service, plain)) => {
                                (GroupEventKind::from_service(service), plain)
                            }
                            Err(e) => {
                                log::debug!(
                                    "Failed to open secured frame for {}: {}",
                                    destination,
                                    e
                                );
                                return;
                            }
                        },
                        None => {
                            registry.flag_secured_without_key(destination, frame.asdu.len());
                            return;
                        }
                    }
                } else {
                    (frame.kind(), frame.asdu)
                };

                if let Some(inner) = client.upgrade() {
                    let client = KnxClient::from_inner(inner);
                    registry.dispatch(&client, frame.source, destination, kind, asdu);
                }
            }
        }
    }

    /// Stop the inbound pump
    pub(crate) fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
        // outstanding waiters resolve as "not available"
        self.waiters.lock().unwrap().clear();
    }

    /// Close the underlying link
    pub(crate) async fn close_link(&self) {
        self.link.lock().await.close().await;
    }
}

impl std::fmt::Debug for BusCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusCommunicator")
            .field("description", &self.description)
            .field("source", &self.source)
            .finish()
    }
}
