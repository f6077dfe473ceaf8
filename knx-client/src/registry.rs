//! Listener registry and inbound dispatch bookkeeping

use crate::manager::KnxClient;
use async_trait::async_trait;
use knx_core::{GroupAddress, GroupEventKind, IndividualAddress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Classification of inbound traffic for the diagnostic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    Write,
    Read,
    Response,
    /// Unrecognized service code
    Unknown,
    /// Secure-marked frame for which no decryption key is configured
    ///
    /// Counted separately because the transport would otherwise have
    /// discarded these frames without any observable signal.
    SecuredWithoutKey,
}

impl From<GroupEventKind> for TrafficClass {
    fn from(kind: GroupEventKind) -> Self {
        match kind {
            GroupEventKind::Write => TrafficClass::Write,
            GroupEventKind::Read => TrafficClass::Read,
            GroupEventKind::Response => TrafficClass::Response,
            GroupEventKind::Unknown(_) => TrafficClass::Unknown,
        }
    }
}

/// Diagnostic key for unmatched inbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrafficKey {
    pub destination: GroupAddress,
    pub class: TrafficClass,
    pub payload_len: usize,
}

/// Subscriber interested in a set of group addresses
///
/// Callbacks are scheduled asynchronously; slow listener logic never blocks
/// the inbound-frame path. The payload is the opaque ASDU; decoding it is
/// the listener's (or its value codec's) business.
#[async_trait]
pub trait GroupAddressListener: Send + Sync {
    /// Address-interest predicate
    fn listens_to(&self, destination: GroupAddress) -> bool;

    /// A group value write arrived
    async fn on_group_write(
        &self,
        client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    );

    /// A group value read request arrived
    async fn on_group_read(
        &self,
        client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    );

    /// A group value read response arrived
    async fn on_group_read_response(
        &self,
        client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        asdu: &[u8],
    );
}

/// Set of subscribers plus unmatched-traffic accounting
///
/// The registry survives reconnects; listener membership is not invalidated
/// by a link bounce. Membership is at-most-once per listener instance.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn GroupAddressListener>>>,
    unknown: Mutex<HashMap<TrafficKey, u64>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    ///
    /// # Returns
    /// `true` if added, `false` if this instance was already registered
    pub fn register(&self, listener: Arc<dyn GroupAddressListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener
    ///
    /// # Returns
    /// `true` if the instance was registered and has been removed
    pub fn unregister(&self, listener: &Arc<dyn GroupAddressListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Get the number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }

    /// Dispatch one inbound group event
    ///
    /// Every listener whose predicate matches the destination gets its
    /// callback scheduled on the task pool; when none matches, the
    /// unmatched counter for (destination, class, payload length) is
    /// incremented by exactly one. Unrecognized service codes are counted
    /// only.
    pub fn dispatch(
        &self,
        client: &KnxClient,
        source: IndividualAddress,
        destination: GroupAddress,
        kind: GroupEventKind,
        asdu: Vec<u8>,
    ) {
        if let GroupEventKind::Unknown(code) = kind {
            log::debug!(
                "Unrecognized service code 0x{:03X} for {} ({} bytes)",
                code,
                destination,
                asdu.len()
            );
            self.count(TrafficKey {
                destination,
                class: TrafficClass::Unknown,
                payload_len: asdu.len(),
            });
            return;
        }

        let matched: Vec<Arc<dyn GroupAddressListener>> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .filter(|l| l.listens_to(destination))
            .cloned()
            .collect();

        if matched.is_empty() {
            log::debug!(
                "No listener for {} {} ({} bytes)",
                kind.as_str(),
                destination,
                asdu.len()
            );
            self.count(TrafficKey {
                destination,
                class: kind.into(),
                payload_len: asdu.len(),
            });
            return;
        }

        for listener in matched {
            let client = client.clone();
            let asdu = asdu.clone();
            tokio::spawn(async move {
                match kind {
                    GroupEventKind::Write => {
                        listener
                            .on_group_write(&client, source, destination, &asdu)
                            .await
                    }
                    GroupEventKind::Read => {
                        listener
                            .on_group_read(&client, source, destination, &asdu)
                            .await
                    }
                    GroupEventKind::Response => {
                        listener
                            .on_group_read_response(&client, source, destination, &asdu)
                            .await
                    }
                    GroupEventKind::Unknown(_) => {}
                }
            });
        }
    }

    /// Flag a secure-marked frame that could not be opened for lack of a key
    pub fn flag_secured_without_key(&self, destination: GroupAddress, payload_len: usize) {
        log::debug!(
            "Discarding secured frame for {} ({} bytes): no key configured",
            destination,
            payload_len
        );
        self.count(TrafficKey {
            destination,
            class: TrafficClass::SecuredWithoutKey,
            payload_len,
        });
    }

    /// Snapshot the unmatched-traffic counters
    pub fn unknown_traffic(&self) -> HashMap<TrafficKey, u64> {
        self.unknown.lock().unwrap().clone()
    }

    fn count(&self, key: TrafficKey) {
        *self.unknown.lock().unwrap().entry(key).or_insert(0) += 1;
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
