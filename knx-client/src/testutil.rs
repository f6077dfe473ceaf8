//! Shared test fixtures: a scriptable in-memory transport, a recording
//! status callback and a collecting listener

use crate::manager::KnxClient;
use crate::registry::GroupAddressListener;
use crate::status::{ConnectionStatus, StatusCallback};
use async_trait::async_trait;
use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};
use knx_transport::{LinkEvent, LinkStrategy, TransportLink};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared state of one test link, visible to the test after establishment
pub(crate) struct TestLinkShared {
    /// Successfully "sent" frames
    pub sent: Mutex<Vec<Vec<u8>>>,
    /// All send attempts, including failed ones
    pub attempted: AtomicUsize,
    /// Fail every send while set
    pub fail_sends: AtomicBool,
    /// Fail exactly this many upcoming sends
    pub fail_next_sends: AtomicUsize,
    /// Make the link report itself as no longer usable
    pub force_closed: AtomicBool,
}

impl TestLinkShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            attempted: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_next_sends: AtomicUsize::new(0),
            force_closed: AtomicBool::new(false),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempted.load(Ordering::SeqCst)
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

/// Handle to the most recently established test link
#[derive(Clone)]
pub(crate) struct TestHandle {
    pub event_tx: mpsc::Sender<LinkEvent>,
    pub shared: Arc<TestLinkShared>,
}

impl TestHandle {
    /// Inject an inbound frame
    pub async fn inject(&self, frame: Vec<u8>) {
        self.event_tx
            .send(LinkEvent::Frame(frame))
            .await
            .expect("pump should be alive");
    }

    /// Simulate an unsolicited link loss
    pub async fn drop_link(&self, reason: &str) {
        self.event_tx
            .send(LinkEvent::Closed {
                reason: reason.to_string(),
                initiated: false,
            })
            .await
            .expect("pump should be alive");
    }
}

struct TestLink {
    shared: Arc<TestLinkShared>,
    events: Option<mpsc::Receiver<LinkEvent>>,
    open: bool,
}

#[async_trait]
impl TransportLink for TestLink {
    async fn open(&mut self) -> KnxResult<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn send_frame(&mut self, frame: &[u8]) -> KnxResult<()> {
        self.shared.attempted.fetch_add(1, Ordering::SeqCst);
        let fail_once = self
            .shared
            .fail_next_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once || self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(KnxError::LinkClosed("injected send failure".to_string()));
        }
        self.shared.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open && !self.shared.force_closed.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.events.take()
    }

    fn describe(&self) -> String {
        "test link".to_string()
    }
}

/// Link strategy producing scriptable in-memory links
pub(crate) struct TestStrategy {
    pub establishes: AtomicUsize,
    pub fail_establish: AtomicBool,
    current: Mutex<Option<TestHandle>>,
}

impl TestStrategy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            establishes: AtomicUsize::new(0),
            fail_establish: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }

    /// Handle to the most recently established link
    pub fn handle(&self) -> TestHandle {
        self.current
            .lock()
            .unwrap()
            .clone()
            .expect("no link established yet")
    }

    pub fn establish_count(&self) -> usize {
        self.establishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkStrategy for TestStrategy {
    async fn establish(&self) -> KnxResult<Box<dyn TransportLink>> {
        self.establishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_establish.load(Ordering::SeqCst) {
            return Err(KnxError::LinkClosed(
                "injected establish failure".to_string(),
            ));
        }
        let (event_tx, events) = mpsc::channel(64);
        let shared = TestLinkShared::new();
        *self.current.lock().unwrap() = Some(TestHandle {
            event_tx,
            shared: shared.clone(),
        });
        Ok(Box::new(TestLink {
            shared,
            events: Some(events),
            open: true,
        }))
    }
}

/// Status callback recording every transition
#[derive(Default)]
pub(crate) struct RecordingStatus {
    events: Mutex<Vec<ConnectionStatus>>,
}

impl RecordingStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<ConnectionStatus> {
        self.events.lock().unwrap().clone()
    }

    pub fn online_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_online())
            .count()
    }

    pub fn last(&self) -> Option<ConnectionStatus> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl StatusCallback for RecordingStatus {
    fn update_status(&self, status: ConnectionStatus) {
        self.events.lock().unwrap().push(status);
    }
}

/// Listener recording every callback it receives
pub(crate) struct CollectingListener {
    addresses: Vec<GroupAddress>,
    pub events: Mutex<Vec<(&'static str, IndividualAddress, GroupAddress, Vec<u8>)>>,
}

impl CollectingListener {
    pub fn new(addresses: Vec<GroupAddress>) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<(&'static str, IndividualAddress, GroupAddress, Vec<u8>)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl GroupAddressListener for CollectingListener {
    fn listens_to(&self, destination: GroupAddress) -> bool {
        self.addresses.contains(&destination)
    }

    async fn on_group_write(
        &self,
        _client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    ) {
        self.events
            .lock()
            .unwrap()
            .push(("write", source, destination, asdu.to_vec()));
    }

    async fn on_group_read(
        &self,
        _client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    ) {
        self.events
            .lock()
            .unwrap()
            .push(("read", source, destination, asdu.to_vec()));
    }

    async fn on_group_read_response(
        &self,
        _client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    ) {
        self.events
            .lock()
            .unwrap()
            .push(("response", source, destination, asdu.to_vec()));
    }
}
