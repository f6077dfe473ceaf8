//! Client configuration

use knx_core::IndividualAddress;
use knx_security::Keyring;
use knx_transport::LinkConfig;
use std::time::Duration;

/// Configuration for one KNX client instance
///
/// # Defaults
/// - Response timeout: 2 s
/// - Read retry limit: 3 attempts per datapoint
/// - Read pause: 50 ms between consecutive bus reads (duty-cycle pacing)
/// - Reconnect period: 60 s; a zero period disables automatic reconnection
///   entirely (manual reconnect only)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transport variant to connect through
    pub link: LinkConfig,
    /// The client's own device address on the bus
    pub source_address: IndividualAddress,
    /// Key material for secured groups and devices; may be empty
    pub keyring: Keyring,
    /// Timeout applied to each read/write bus request
    pub response_timeout: Duration,
    /// Attempts per queued datapoint read before it is dropped
    pub read_retry_limit: u32,
    /// Pause between consecutive outbound bus reads
    pub read_pause: Duration,
    /// Delay between losing a connection and the next automatic attempt
    pub reconnect_period: Duration,
}

impl ClientConfig {
    /// Create a configuration with default timings
    pub fn new(link: LinkConfig, source_address: IndividualAddress) -> Self {
        Self {
            link,
            source_address,
            keyring: Keyring::new(),
            response_timeout: Duration::from_secs(2),
            read_retry_limit: 3,
            read_pause: Duration::from_millis(50),
            reconnect_period: Duration::from_secs(60),
        }
    }

    /// Set the key material
    pub fn with_keyring(mut self, keyring: Keyring) -> Self {
        self.keyring = keyring;
        self
    }

    /// Set the automatic reconnect period (zero disables)
    pub fn with_reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = period;
        self
    }
}
