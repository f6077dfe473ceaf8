//! Transport link abstraction
//!
//! A transport link moves opaque, already-encoded bus frames between the
//! client and one physical or logical medium. The client stack never talks
//! to sockets or serial ports directly; it owns exactly one link at a time
//! and rebuilds it from scratch on every reconnect.

use async_trait::async_trait;
use knx_core::KnxResult;
use tokio::sync::mpsc;

/// Capacity of the inbound event channel between a link and its consumer
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notification emitted by a transport link
#[derive(Debug)]
pub enum LinkEvent {
    /// A complete inbound frame
    Frame(Vec<u8>),
    /// The medium was closed
    ///
    /// `initiated` is true when the close was requested by the application's
    /// own teardown; an unsolicited close (`initiated == false`) triggers
    /// the connection manager's link-loss handling.
    Closed { reason: String, initiated: bool },
}

/// Interface to one bus medium
///
/// # Lifecycle
/// 1. **Create**: from the resolved link configuration
/// 2. **Open**: establish the medium; inbound traffic starts flowing
/// 3. **Use**: `send_frame` outbound, drain `take_events` inbound
/// 4. **Close**: release the medium; the link is not reusable afterwards
///
/// # Why a Trait?
/// The connection manager treats every medium variant identically; only the
/// establishment strategy differs. A trait object keeps the manager free of
/// per-variant branching and makes links trivial to fake in tests.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Open the medium
    ///
    /// # Errors
    /// Returns error if the medium cannot be established
    async fn open(&mut self) -> KnxResult<()>;

    /// Close the medium and stop the inbound reader
    ///
    /// Safe to call on a link that never opened or already closed.
    async fn close(&mut self);

    /// Send one raw frame
    ///
    /// # Errors
    /// Returns error if the link is not open or the medium rejects the write
    async fn send_frame(&mut self, frame: &[u8]) -> KnxResult<()>;

    /// Check if the link is open
    fn is_open(&self) -> bool;

    /// Take the inbound event receiver
    ///
    /// Available exactly once after a successful `open()`; subsequent calls
    /// return `None`.
    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>>;

    /// Human-readable identification of the medium, used in logs and status
    /// descriptions
    fn describe(&self) -> String;
}

/// Link establishment strategy
///
/// Resolved once from the transport configuration when the client is built;
/// every (re)connect asks the same strategy for a fresh, opened link.
#[async_trait]
pub trait LinkStrategy: Send + Sync {
    /// Establish a new, opened transport link
    async fn establish(&self) -> KnxResult<Box<dyn TransportLink>>;
}
