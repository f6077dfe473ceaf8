//! Connection manager: client state machine, connect/disconnect sequencing
//! and the reconnect-on-failure policy

use crate::codec::{RawCodec, ValueCodec};
use crate::communicator::BusCommunicator;
use crate::config::ClientConfig;
use crate::management::ManagementFacility;
use crate::read_queue::ReadQueue;
use crate::registry::{GroupAddressListener, ListenerRegistry, TrafficKey};
use crate::state::ClientState;
use crate::status::{ConnectionStatus, OfflineDetail, StatusCallback};
use knx_core::frame;
use knx_core::{
    GroupAddress, IndividualAddress, KnxError, KnxResult, OutboundSpec, ReadDatapoint,
};
use knx_security::SecureSession;
use knx_transport::{ConfiguredLink, LinkStrategy};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Settle delay before reopening the medium; some transports cannot be
/// immediately reopened after a teardown
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Delay of the very first automatic reconnect, regardless of the
/// configured period
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Attempts per outbound write or read-response
const MAX_SEND_ATTEMPTS: u32 = 2;

/// Resource set of one connection
///
/// Built completely, then swapped in as one unit; never mutated
/// field-by-field. All four parts (link inside the communicator, secure
/// session, management facility, communicator) are torn down together and
/// rebuilt together on reconnect.
pub(crate) struct ConnectionResources {
    pub(crate) communicator: Arc<BusCommunicator>,
    pub(crate) management: ManagementFacility,
    pub(crate) secure: Option<Arc<SecureSession>>,
}

impl ConnectionResources {
    /// Tear down in order: communicator pump, management, secure session,
    /// link
    async fn release(&self) {
        self.communicator.stop_pump();
        // management facility and secure session carry no tasks; they are
        // dropped with this struct
        self.communicator.close_link().await;
    }
}

/// Owner of the at-most-one pending reconnect timer
///
/// Scheduling a new timer always cancels the prior one; the invariant is
/// enforced here instead of by null checks scattered across methods.
struct ReconnectTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectTimer {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Cancel any prior timer and schedule a connect attempt after `delay`
    fn schedule(&self, delay: Duration, client: KnxClient) {
        let mut guard = self.handle.lock().unwrap();
        if let Some(prev) = guard.take() {
            prev.abort();
        }
        log::debug!("Scheduling reconnect in {:?}", delay);
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the attempt runs in its own task so that cancelling this
            // timer never aborts an attempt already underway
            tokio::spawn(async move {
                client.connect().await;
            });
        }));
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    strategy: Arc<dyn LinkStrategy>,
    codec: Arc<dyn ValueCodec>,
    status: Arc<dyn StatusCallback>,
    state: Mutex<ClientState>,
    /// Guards connect/dispose: at most one connect-or-teardown sequence
    /// runs at a time
    connect_gate: tokio::sync::Mutex<()>,
    /// Current resource set; readers snapshot, never block on the gate
    resources: RwLock<Option<Arc<ConnectionResources>>>,
    reconnect: ReconnectTimer,
    drain: Mutex<Option<JoinHandle<()>>>,
    read_queue: ReadQueue,
    registry: Arc<ListenerRegistry>,
    cancel: watch::Sender<bool>,
    initial_reconnect_done: AtomicBool,
}

/// KNX bus client
///
/// Maintains a long-lived connection to one bus medium, multiplexes inbound
/// bus events to registered listeners and serializes outbound read/write
/// requests while tolerating transient link failures. Cheap to clone; all
/// clones share one client instance.
#[derive(Clone)]
pub struct KnxClient {
    inner: Arc<ClientInner>,
}

impl KnxClient {
    /// Create a client from its configuration
    ///
    /// # Errors
    /// Returns `KnxError::Configuration` if the transport configuration is
    /// unusable
    pub fn new(config: ClientConfig, status: Arc<dyn StatusCallback>) -> KnxResult<Self> {
        let strategy = Arc::new(ConfiguredLink::new(config.link.clone())?);
        Ok(Self::with_parts(config, strategy, Arc::new(RawCodec), status))
    }

    /// Create a client from explicit collaborators
    ///
    /// Hosts use this to supply their own link strategy or datapoint value
    /// codec.
    pub fn with_parts(
        config: ClientConfig,
        strategy: Arc<dyn LinkStrategy>,
        codec: Arc<dyn ValueCodec>,
        status: Arc<dyn StatusCallback>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config,
                strategy,
                codec,
                status,
                state: Mutex::new(ClientState::Init),
                connect_gate: tokio::sync::Mutex::new(()),
                resources: RwLock::new(None),
                reconnect: ReconnectTimer::new(),
                drain: Mutex::new(None),
                read_queue: ReadQueue::new(),
                registry: Arc::new(ListenerRegistry::new()),
                cancel,
                initial_reconnect_done: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ClientState {
        *self.inner.state.lock().unwrap()
    }

    /// Check whether the client currently holds an open link
    pub async fn is_connected(&self) -> bool {
        match self.snapshot() {
            Some(resources) => resources.communicator.is_link_open().await,
            None => false,
        }
    }

    /// Connect to the bus
    ///
    /// Guarded so only one connection attempt runs at a time; a concurrent
    /// call waits and then succeeds immediately if the first one connected.
    /// Disposed clients refuse silently. Failures are reported through the
    /// status callback; recoverable ones schedule a reconnect per policy,
    /// configuration errors do not.
    ///
    /// # Returns
    /// `true` when the client is connected on return
    pub async fn connect(&self) -> bool {
        let _gate = self.inner.connect_gate.lock().await;

        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ClientState::Disposed => return false,
                ClientState::Init | ClientState::Interrupted => *state = ClientState::Running,
                ClientState::Running => {}
            }
        }

        if self.is_connected().await {
            return true;
        }

        match self.try_connect().await {
            Ok(()) => {
                self.inner.reconnect.cancel();
                self.inner.status.update_status(ConnectionStatus::Online);
                log::info!("Connected to {}", self.inner.config.link.describe());
                true
            }
            Err(e) if e.is_cancellation() => {
                self.set_state(ClientState::Interrupted);
                self.release_connection().await;
                if !self.state().is_disposed() {
                    self.schedule_reconnect();
                }
                log::debug!("Connection attempt interrupted");
                false
            }
            Err(e) if e.is_configuration() => {
                self.release_connection().await;
                log::error!("Configuration error: {}", e);
                self.inner.status.update_status(ConnectionStatus::offline(
                    OfflineDetail::ConfigurationError,
                    e.to_string(),
                ));
                false
            }
            Err(e) => {
                self.release_connection().await;
                log::warn!(
                    "Connecting to {} failed: {}",
                    self.inner.config.link.describe(),
                    e
                );
                self.inner.status.update_status(ConnectionStatus::offline(
                    OfflineDetail::CommunicationError,
                    format!("{}: {}", self.inner.config.link.describe(), e),
                ));
                self.schedule_reconnect();
                false
            }
        }
    }

    /// Shut the client down
    ///
    /// Terminal and idempotent: cancels any pending reconnect, interrupts a
    /// connect attempt in flight, releases the connection and refuses every
    /// later connect attempt.
    pub async fn dispose(&self) {
        // signal first so an in-flight connect observes the cancellation at
        // its next suspension point and releases the gate
        self.inner.cancel.send_replace(true);
        let _gate = self.inner.connect_gate.lock().await;
        self.set_state(ClientState::Disposed);
        self.inner.reconnect.cancel();
        self.release_connection().await;
        log::debug!("Client disposed");
    }

    /// Enqueue a group read; idempotent per address
    pub fn read_datapoint(&self, address: GroupAddress) {
        let datapoint = ReadDatapoint::new(address, self.inner.config.read_retry_limit);
        if self.inner.read_queue.enqueue(datapoint) {
            log::trace!("Queued read of {}", address);
        }
    }

    /// Write a value to a group address
    ///
    /// Blocks up to the response timeout per attempt and raises the final
    /// error on exhaustion.
    pub async fn write_value(&self, spec: &OutboundSpec) -> KnxResult<()> {
        self.send_spec(frame::GROUP_WRITE, spec).await
    }

    /// Answer a group read request with a value
    pub async fn respond_with_value(&self, spec: &OutboundSpec) -> KnxResult<()> {
        self.send_spec(frame::GROUP_RESPONSE, spec).await
    }

    /// Register a bus event listener
    pub fn register_listener(&self, listener: Arc<dyn GroupAddressListener>) -> bool {
        self.inner.registry.register(listener)
    }

    /// Unregister a bus event listener
    pub fn unregister_listener(&self, listener: &Arc<dyn GroupAddressListener>) -> bool {
        self.inner.registry.unregister(listener)
    }

    /// Snapshot the unmatched-traffic diagnostic counters
    pub fn unknown_traffic(&self) -> HashMap<TrafficKey, u64> {
        self.inner.registry.unknown_traffic()
    }

    /// Check whether a device address is responsive
    ///
    /// Reports `false` when the client is not connected.
    pub async fn is_reachable(&self, device: IndividualAddress) -> KnxResult<bool> {
        match self.snapshot() {
            Some(resources) => {
                resources
                    .management
                    .is_reachable(device, self.inner.config.response_timeout)
                    .await
            }
            None => Ok(false),
        }
    }

    /// Restart a device (best-effort)
    pub async fn restart_device(&self, device: IndividualAddress) -> KnxResult<()> {
        match self.snapshot() {
            Some(resources) => resources.management.restart_device(device).await,
            None => {
                log::debug!("Not connected, cannot restart {}", device);
                Ok(())
            }
        }
    }

    /// Read a device descriptor; `Ok(None)` when unavailable
    pub async fn read_device_descriptor(
        &self,
        device: IndividualAddress,
        descriptor_type: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        match self.snapshot() {
            Some(resources) => {
                resources
                    .management
                    .read_device_descriptor(device, descriptor_type, timeout)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Read an interface-object property; `Ok(None)` when unavailable
    pub async fn read_property(
        &self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        elements: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        match self.snapshot() {
            Some(resources) => {
                resources
                    .management
                    .read_property(device, object_index, property_id, start, elements, timeout)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Write an interface-object property; `Ok(None)` when unavailable
    #[allow(clippy::too_many_arguments)]
    pub async fn write_property(
        &self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        elements: u8,
        data: &[u8],
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        match self.snapshot() {
            Some(resources) => {
                resources
                    .management
                    .write_property(
                        device,
                        object_index,
                        property_id,
                        start,
                        elements,
                        data,
                        timeout,
                    )
                    .await
            }
            None => Ok(None),
        }
    }

    /// Read bytes from a device's memory; `Ok(None)` when unavailable
    pub async fn read_memory(
        &self,
        device: IndividualAddress,
        address: u16,
        count: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        match self.snapshot() {
            Some(resources) => {
                resources
                    .management
                    .read_memory(device, address, count, timeout)
                    .await
            }
            None => Ok(None),
        }
    }

    // ---- internals -------------------------------------------------------

    fn snapshot(&self) -> Option<Arc<ConnectionResources>> {
        self.inner.resources.read().unwrap().clone()
    }

    fn set_state(&self, new_state: ClientState) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.validate_transition(new_state) {
            log::warn!(
                "Unexpected state transition {} -> {}",
                state.as_str(),
                new_state.as_str()
            );
        }
        *state = new_state;
    }

    /// Race a future against client cancellation
    async fn interruptible<T>(&self, fut: impl Future<Output = T>) -> KnxResult<T> {
        let mut cancel = self.inner.cancel.subscribe();
        tokio::select! {
            _ = cancel.wait_for(|cancelled| *cancelled) => Err(KnxError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// The connect sequence proper; caller holds the gate
    async fn try_connect(&self) -> KnxResult<()> {
        // release whatever a previous attempt left behind; safe on a
        // partially-initialized state
        self.release_connection().await;

        // some media cannot be reopened immediately after teardown
        self.interruptible(tokio::time::sleep(SETTLE_DELAY)).await?;

        let mut link = self.interruptible(self.inner.strategy.establish()).await??;

        let secure = if self.inner.config.link.is_secure() || !self.inner.config.keyring.is_empty()
        {
            if self.inner.config.link.is_secure() && self.inner.config.keyring.is_empty() {
                link.close().await;
                return Err(KnxError::Configuration(
                    "Secure link variant requires configured key material".to_string(),
                ));
            }
            // absorb the caller-owned keys by copying, never by moving
            Some(Arc::new(SecureSession::from_keyring(
                &self.inner.config.keyring,
            )))
        } else {
            None
        };

        let events = link.take_events().ok_or_else(|| {
            KnxError::Protocol("Link produced no event stream".to_string())
        })?;

        let communicator = Arc::new(BusCommunicator::new(
            link,
            secure.clone(),
            self.inner.config.source_address,
            self.inner.config.response_timeout,
        ));
        communicator.start_pump(
            events,
            self.inner.registry.clone(),
            Arc::downgrade(&self.inner),
        );
        let management = ManagementFacility::new(communicator.clone());

        let resources = Arc::new(ConnectionResources {
            communicator,
            management,
            secure,
        });
        *self.inner.resources.write().unwrap() = Some(resources);

        self.start_drain_job();
        Ok(())
    }

    /// Release the current connection resources
    ///
    /// Stops the drain job, tears down the resource set in order and clears
    /// the read queue (in-flight reads are meaningless without a link). The
    /// listener registry survives.
    async fn release_connection(&self) {
        if let Some(drain) = self.inner.drain.lock().unwrap().take() {
            drain.abort();
        }
        let resources = self.inner.resources.write().unwrap().take();
        if let Some(resources) = resources {
            resources.release().await;
        }
        self.inner.read_queue.clear();
    }

    /// Schedule a reconnect per policy
    ///
    /// The very first automatic reconnect uses a short fixed delay; later
    /// ones use the configured period. A zero period disables automatic
    /// reconnection entirely.
    fn schedule_reconnect(&self) {
        if self.state().is_disposed() {
            return;
        }
        let period = self.inner.config.reconnect_period;
        if period.is_zero() {
            log::debug!("Automatic reconnection is disabled");
            return;
        }
        let delay = if self.inner.initial_reconnect_done.swap(true, Ordering::SeqCst) {
            period
        } else {
            INITIAL_RECONNECT_DELAY
        };
        self.inner.reconnect.schedule(delay, self.clone());
    }

    /// Handle an unsolicited close signalled by the transport
    pub(crate) async fn on_link_lost(&self, reason: String) {
        if self.state().is_disposed() {
            return;
        }
        self.inner.status.update_status(ConnectionStatus::offline(
            OfflineDetail::CommunicationError,
            format!("{}: {}", self.inner.config.link.describe(), reason),
        ));
        self.schedule_reconnect();
    }

    /// Start the read-queue drain job on a fixed-delay schedule
    fn start_drain_job(&self) {
        let client = self.clone();
        let pause = self.inner.config.read_pause;
        let mut guard = self.inner.drain.lock().unwrap();
        if let Some(prev) = guard.take() {
            prev.abort();
        }
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(pause).await;
                client.drain_one().await;
            }
        }));
    }

    /// One drain tick: issue at most one queued read
    ///
    /// A bad datapoint never stops the poller; every outcome returns to the
    /// next tick.
    async fn drain_one(&self) {
        let Some(resources) = self.snapshot() else {
            return;
        };

        if !resources.communicator.is_link_open().await {
            if !self.inner.reconnect.is_pending() && !self.state().is_disposed() {
                log::debug!("Link not usable, attempting reconnect");
                let client = self.clone();
                tokio::spawn(async move {
                    client.connect().await;
                });
            }
            return;
        }

        let Some(mut datapoint) = self.inner.read_queue.pop() else {
            return;
        };

        // groups secured with a listening key cannot be read from this
        // client; skip without consuming a retry
        if let Some(secure) = &resources.secure {
            if secure.is_listen_only(datapoint.address()) {
                log::debug!(
                    "Skipping read of {}: only a listening key is configured",
                    datapoint.address()
                );
                return;
            }
        }

        let attempt = datapoint.register_attempt();
        match resources
            .communicator
            .send_group(frame::GROUP_READ, datapoint.address(), &[])
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => {}
            Err(e) if e.is_recoverable() => {
                if datapoint.exhausted() {
                    log::warn!(
                        "Giving up reading {} after {} attempts: {}",
                        datapoint.address(),
                        attempt,
                        e
                    );
                } else {
                    log::debug!(
                        "Read attempt {} of {} failed: {}",
                        attempt,
                        datapoint.address(),
                        e
                    );
                    self.inner.read_queue.requeue(datapoint);
                }
            }
            Err(e) => {
                log::error!("Unexpected error reading {}: {}", datapoint.address(), e);
            }
        }
    }

    /// Send a write or read-response with bounded retries
    async fn send_spec(&self, service: u16, spec: &OutboundSpec) -> KnxResult<()> {
        let Some(resources) = self.snapshot() else {
            return Err(KnxError::LinkClosed("Not connected".to_string()));
        };

        // a group the client can only listen to is never written to
        if let Some(secure) = &resources.secure {
            if secure.is_listen_only(spec.group_address) {
                log::debug!(
                    "Refusing to send to {}: only a listening key is configured",
                    spec.group_address
                );
                return Ok(());
            }
        }

        let asdu = self.inner.codec.encode(&spec.dpt, &spec.value)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match resources
                .communicator
                .send_group(service, spec.group_address, &asdu)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_SEND_ATTEMPTS => {
                    log::debug!(
                        "Send attempt {}/{} to {} failed: {}",
                        attempt,
                        MAX_SEND_ATTEMPTS,
                        spec.group_address,
                        e
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Send attempt {}/{} to {} failed: {}",
                        attempt,
                        MAX_SEND_ATTEMPTS,
                        spec.group_address,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for KnxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnxClient")
            .field("state", &self.state())
            .field("link", &self.inner.config.link.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MockValueCodec;
    use crate::registry::TrafficClass;
    use crate::testutil::{CollectingListener, RecordingStatus, TestStrategy};
    use knx_core::frame::{BusFrame, Destination};
    use knx_core::DptValue;
    use knx_security::{GroupKey, KeyDirection, Keyring};
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn ga(main: u8, middle: u8, sub: u8) -> GroupAddress {
        GroupAddress::new(main, middle, sub).unwrap()
    }

    fn peer() -> IndividualAddress {
        IndividualAddress::new(1, 1, 200).unwrap()
    }

    fn test_config() -> ClientConfig {
        let gateway = "192.168.1.19:3671".parse().unwrap();
        let mut config = ClientConfig::new(
            knx_transport::LinkConfig::Tunnel(knx_transport::TunnelSettings::new(gateway)),
            IndividualAddress::new(1, 1, 10).unwrap(),
        );
        config.reconnect_period = Duration::from_secs(10);
        config
    }

    fn test_client(
        config: ClientConfig,
    ) -> (KnxClient, Arc<TestStrategy>, Arc<RecordingStatus>) {
        let strategy = TestStrategy::new();
        let status = RecordingStatus::new();
        let client = KnxClient::with_parts(
            config,
            strategy.clone(),
            Arc::new(RawCodec),
            status.clone(),
        );
        (client, strategy, status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reports_online_exactly_once() {
        let (client, strategy, status) = test_client(test_config());

        assert!(client.connect().await);
        assert_eq!(strategy.establish_count(), 1);
        assert_eq!(status.all(), vec![ConnectionStatus::Online]);
        assert!(client.is_connected().await);
        assert_eq!(client.state(), ClientState::Running);

        // already connected: succeed immediately, no second attempt
        assert!(client.connect().await);
        assert_eq!(strategy.establish_count(), 1);
        assert_eq!(status.online_count(), 1);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_queue_dedups_and_drains_one_per_tick() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        let a1 = ga(1, 0, 1);
        let a2 = ga(1, 0, 2);
        client.read_datapoint(a1);
        client.read_datapoint(a2);
        client.read_datapoint(a1);
        assert_eq!(client.inner.read_queue.len(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.shared.attempts(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.shared.attempts(), 2);

        let frames = handle.shared.sent_frames();
        let first = BusFrame::decode(&frames[0]).unwrap();
        assert_eq!(first.service, frame::GROUP_READ);
        assert_eq!(first.destination, Destination::Group(a1));
        let second = BusFrame::decode(&frames[1]).unwrap();
        assert_eq!(second.destination, Destination::Group(a2));

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_exhaust_and_drop_permanently() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();
        handle.shared.fail_sends.store(true, AtomicOrdering::SeqCst);

        let address = ga(1, 0, 7);
        client.read_datapoint(address);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.shared.attempts(), 3);
        assert!(client.inner.read_queue.is_empty());

        // dropped entries are never retried without a fresh request
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.shared.attempts(), 3);

        client.read_datapoint(address);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.shared.attempts(), 4);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_succeeds_on_final_attempt() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        handle
            .shared
            .fail_next_sends
            .store((MAX_SEND_ATTEMPTS - 1) as usize, AtomicOrdering::SeqCst);
        let spec = OutboundSpec::new("1.001", ga(1, 0, 7), DptValue::Bit(true));
        assert!(client.write_value(&spec).await.is_ok());
        assert_eq!(handle.shared.attempts(), MAX_SEND_ATTEMPTS as usize);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_exhaustion_raises_the_final_error() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();
        handle.shared.fail_sends.store(true, AtomicOrdering::SeqCst);

        let spec = OutboundSpec::new("1.001", ga(1, 0, 7), DptValue::Bit(false));
        let err = client.write_value(&spec).await.unwrap_err();
        assert!(matches!(err, KnxError::LinkClosed(_)));
        assert_eq!(handle.shared.attempts(), MAX_SEND_ATTEMPTS as usize);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_dispatch_and_unknown_counter() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        let shared_addr = ga(2, 0, 1);
        let other = ga(2, 0, 2);
        let disjoint = ga(3, 0, 1);
        let l1 = CollectingListener::new(vec![shared_addr, other]);
        let l2 = CollectingListener::new(vec![shared_addr]);
        let l3 = CollectingListener::new(vec![disjoint]);
        assert!(client.register_listener(l1.clone()));
        assert!(client.register_listener(l2.clone()));
        assert!(client.register_listener(l3.clone()));
        // at-most-once membership
        assert!(!client.register_listener(l1.clone()));

        handle
            .inject(BusFrame::group(peer(), shared_addr, frame::GROUP_WRITE, vec![0x01]).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            l1.received(),
            vec![("write", peer(), shared_addr, vec![0x01])]
        );
        assert_eq!(
            l2.received(),
            vec![("write", peer(), shared_addr, vec![0x01])]
        );
        assert!(l3.received().is_empty());
        assert!(client.unknown_traffic().is_empty());

        // unmatched destination counts exactly once
        let stray = ga(5, 0, 5);
        handle
            .inject(BusFrame::group(peer(), stray, frame::GROUP_WRITE, vec![0x01, 0x02]).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let counters = client.unknown_traffic();
        assert_eq!(
            counters[&TrafficKey {
                destination: stray,
                class: TrafficClass::Write,
                payload_len: 2
            }],
            1
        );

        // unrecognized service codes classify as diagnostics, never throw
        handle
            .inject(BusFrame::group(peer(), shared_addr, 0x155, vec![0xEE]).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let counters = client.unknown_traffic();
        assert_eq!(
            counters[&TrafficKey {
                destination: shared_addr,
                class: TrafficClass::Unknown,
                payload_len: 1
            }],
            1
        );
        assert_eq!(l1.received().len(), 1);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_responses_reach_listeners() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        let address = ga(2, 1, 1);
        let listener = CollectingListener::new(vec![address]);
        client.register_listener(listener.clone());

        handle
            .inject(BusFrame::group(peer(), address, frame::GROUP_RESPONSE, vec![0x17]).encode())
            .await;
        handle
            .inject(BusFrame::group(peer(), address, frame::GROUP_READ, vec![]).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = listener.received();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "response");
        assert_eq!(events[1].0, "read");

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_close_goes_offline_and_reconnects() {
        let (client, strategy, status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        handle.drop_link("gateway vanished").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            status.last(),
            Some(ConnectionStatus::Offline {
                detail: OfflineDetail::CommunicationError,
                ..
            })
        ));

        // the first automatic reconnect uses the short fixed delay
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(strategy.establish_count(), 2);
        assert_eq!(status.last(), Some(ConnectionStatus::Online));
        assert!(client.is_connected().await);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_schedules_reconnect() {
        let (client, strategy, status) = test_client(test_config());
        strategy.fail_establish.store(true, AtomicOrdering::SeqCst);

        assert!(!client.connect().await);
        assert_eq!(strategy.establish_count(), 1);
        assert!(matches!(
            status.last(),
            Some(ConnectionStatus::Offline {
                detail: OfflineDetail::CommunicationError,
                ..
            })
        ));

        strategy.fail_establish.store(false, AtomicOrdering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(strategy.establish_count(), 2);
        assert_eq!(status.last(), Some(ConnectionStatus::Online));

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_the_pending_reconnect() {
        let (client, strategy, _status) = test_client(test_config());
        strategy.fail_establish.store(true, AtomicOrdering::SeqCst);

        // first failure schedules the short initial timer, the second
        // reschedules with the configured period, cancelling the first
        assert!(!client.connect().await);
        assert!(!client.connect().await);
        assert_eq!(strategy.establish_count(), 2);
        assert!(client.inner.reconnect.is_pending());

        // the cancelled 1 s timer must not fire
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(strategy.establish_count(), 2);

        // the 10 s replacement does
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(strategy.establish_count(), 3);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_disables_automatic_reconnect() {
        let mut config = test_config();
        config.reconnect_period = Duration::ZERO;
        let (client, strategy, _status) = test_client(config);
        strategy.fail_establish.store(true, AtomicOrdering::SeqCst);

        assert!(!client.connect().await);
        assert!(!client.inner.reconnect.is_pending());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(strategy.establish_count(), 1);

        // manual reconnect still works
        strategy.fail_establish.store(false, AtomicOrdering::SeqCst);
        assert!(client.connect().await);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_terminal_and_idempotent() {
        let (client, strategy, status) = test_client(test_config());
        assert!(client.connect().await);

        client.dispose().await;
        assert_eq!(client.state(), ClientState::Disposed);
        assert!(!client.is_connected().await);

        client.dispose().await;
        assert!(!client.connect().await);
        assert_eq!(strategy.establish_count(), 1);
        assert_eq!(status.all(), vec![ConnectionStatus::Online]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_the_pending_reconnect() {
        let (client, strategy, _status) = test_client(test_config());
        strategy.fail_establish.store(true, AtomicOrdering::SeqCst);

        assert!(!client.connect().await);
        assert!(client.inner.reconnect.is_pending());

        client.dispose().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(strategy.establish_count(), 1);
        assert_eq!(client.state(), ClientState::Disposed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_interrupts_a_connect_in_flight() {
        let (client, strategy, status) = test_client(test_config());

        let connecting = client.clone();
        let connect_task = tokio::spawn(async move { connecting.connect().await });
        // land inside the settle delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.dispose().await;

        assert!(!connect_task.await.unwrap());
        assert_eq!(strategy.establish_count(), 0);
        assert_eq!(client.state(), ClientState::Disposed);
        // interruption is quiet: no status noise
        assert!(status.all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_attempts_lazy_reconnect_when_link_unusable() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();

        handle.shared.force_closed.store(true, AtomicOrdering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(strategy.establish_count() >= 2);
        assert!(client.is_connected().await);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_only_group_is_never_written_or_read() {
        let mut config = test_config();
        let secured = ga(4, 0, 1);
        let mut keyring = Keyring::new();
        keyring.insert_group_key(
            secured,
            GroupKey::new(&[0x11; 16], KeyDirection::ListenOnly).unwrap(),
        );
        config.keyring = keyring;
        let (client, strategy, _status) = test_client(config);
        assert!(client.connect().await);
        let handle = strategy.handle();

        // writes are refused quietly, with no attempt on the bus
        let spec = OutboundSpec::new("1.001", secured, DptValue::Bit(true));
        assert!(client.write_value(&spec).await.is_ok());
        assert_eq!(handle.shared.attempts(), 0);

        // queued reads are skipped without consuming a retry
        client.read_datapoint(secured);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(handle.shared.attempts(), 0);
        assert!(client.inner.read_queue.is_empty());

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_secured_group_roundtrip_and_missing_key_flagging() {
        let mut config = test_config();
        let secured = ga(4, 0, 2);
        let mut keyring = Keyring::new();
        keyring.insert_group_key(
            secured,
            GroupKey::new(&[0x22; 16], KeyDirection::Originate).unwrap(),
        );
        config.keyring = keyring.clone();
        let (client, strategy, _status) = test_client(config);
        assert!(client.connect().await);
        let handle = strategy.handle();

        // outbound payloads travel sealed under the secure marker
        let spec = OutboundSpec::new("1.001", secured, DptValue::Bit(true));
        client.write_value(&spec).await.unwrap();
        let sent = BusFrame::decode(&handle.shared.sent_frames()[0]).unwrap();
        assert_eq!(sent.service, frame::SECURE_DATA);
        assert_ne!(sent.asdu, vec![0x01]);

        // inbound sealed frames dispatch as their embedded plain kind
        let listener = CollectingListener::new(vec![secured]);
        client.register_listener(listener.clone());
        let session = SecureSession::from_keyring(&keyring);
        let sealed = session.seal(secured, frame::GROUP_WRITE, &[0x2A]).unwrap();
        handle
            .inject(BusFrame::group(peer(), secured, frame::SECURE_DATA, sealed).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            listener.received(),
            vec![("write", peer(), secured, vec![0x2A])]
        );

        // sealed frames for an unkeyed group are flagged, not dispatched
        let unkeyed = ga(4, 0, 9);
        handle
            .inject(BusFrame::group(peer(), unkeyed, frame::SECURE_DATA, vec![0xFF; 20]).encode())
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            client.unknown_traffic()[&TrafficKey {
                destination: unkeyed,
                class: TrafficClass::SecuredWithoutKey,
                payload_len: 20
            }],
            1
        );

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_variant_without_keys_is_a_fatal_config_error() {
        let mut config = test_config();
        let gateway = "192.168.1.19:3671".parse().unwrap();
        config.link =
            knx_transport::LinkConfig::SecureTunnel(knx_transport::TunnelSettings::new(gateway));
        let (client, strategy, status) = test_client(config);

        assert!(!client.connect().await);
        assert_eq!(strategy.establish_count(), 1);
        assert!(matches!(
            status.last(),
            Some(ConnectionStatus::Offline {
                detail: OfflineDetail::ConfigurationError,
                ..
            })
        ));

        // configuration errors never schedule a retry
        assert!(!client.inner.reconnect.is_pending());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(strategy.establish_count(), 1);

        client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_reachable_probe() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();
        let device = peer();

        // a silent device is not reachable
        assert!(!client.is_reachable(device).await.unwrap());

        // a responding device is
        let probing = client.clone();
        let probe = tokio::spawn(async move { probing.is_reachable(device).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle
            .inject(
                BusFrame::individual(
                    device,
                    IndividualAddress::new(1, 1, 10).unwrap(),
                    frame::DEVICE_DESCRIPTOR_RESPONSE,
                    vec![0x07, 0xB0],
                )
                .encode(),
            )
            .await;
        assert!(probe.await.unwrap().unwrap());

        // disconnected clients degrade gracefully
        client.dispose().await;
        assert!(!client.is_reachable(device).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_device_sends_the_restart_service() {
        let (client, strategy, _status) = test_client(test_config());
        assert!(client.connect().await);
        let handle = strategy.handle();
        let device = peer();

        client.restart_device(device).await.unwrap();
        let frames = handle.shared.sent_frames();
        let sent = BusFrame::decode(frames.last().unwrap()).unwrap();
        assert_eq!(sent.service, frame::RESTART);
        assert_eq!(sent.destination, Destination::Individual(device));

        client.dispose().await;
        // best-effort: a disconnected client is a no-op
        client.restart_device(device).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_codec_failure_prevents_send_attempts() {
        let mut codec = MockValueCodec::new();
        codec
            .expect_encode()
            .returning(|_, _| Err(KnxError::InvalidData("unsupported dpt".to_string())));

        let strategy = TestStrategy::new();
        let status = RecordingStatus::new();
        let client = KnxClient::with_parts(
            test_config(),
            strategy.clone(),
            Arc::new(codec),
            status,
        );
        assert!(client.connect().await);
        let handle = strategy.handle();

        let spec = OutboundSpec::new("9.001", ga(1, 0, 7), DptValue::Float(21.5));
        let err = client.write_value(&spec).await.unwrap_err();
        assert!(matches!(err, KnxError::InvalidData(_)));
        assert_eq!(handle.shared.attempts(), 0);

        client.dispose().await;
    }
}
