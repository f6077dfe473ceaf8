//! knx_rs - Rust client for the KNX field bus
//!
//! This library maintains a long-lived connection to a KNX bus medium,
//! multiplexes inbound bus events to interested subscribers and serializes
//! outbound read/write requests while tolerating transient link failures.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `knx-core`: addresses, frames, datapoint value objects, error handling
//! - `knx-transport`: transport links (IP tunnel, IP router, serial)
//! - `knx-security`: key material and the secure session
//! - `knx-client`: connection manager, read scheduler, listener dispatch,
//!   management facility
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use knx::client::{ClientConfig, KnxClient, ConnectionStatus, StatusCallback};
//! use knx::transport::{LinkConfig, TunnelSettings};
//! use knx::{GroupAddress, IndividualAddress};
//!
//! struct LogStatus;
//!
//! impl StatusCallback for LogStatus {
//!     fn update_status(&self, status: ConnectionStatus) {
//!         println!("status: {:?}", status);
//!     }
//! }
//!
//! # async fn run() -> knx::KnxResult<()> {
//! let config = ClientConfig::new(
//!     LinkConfig::Tunnel(TunnelSettings::new("192.168.1.19:3671".parse().unwrap())),
//!     IndividualAddress::new(1, 1, 10)?,
//! );
//! let client = KnxClient::new(config, Arc::new(LogStatus))?;
//! client.connect().await;
//! client.read_datapoint(GroupAddress::new(1, 0, 7)?);
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use knx_core::{
    BusFrame, Destination, DptValue, GroupAddress, GroupEventKind, InboundSpec,
    IndividualAddress, KnxError, KnxResult, OutboundSpec, ReadDatapoint,
};

// Re-export client API
pub mod client {
    pub use knx_client::*;
}

// Re-export transport layer
pub mod transport {
    pub use knx_transport::*;
}

// Re-export security layer
pub mod security {
    pub use knx_security::*;
}
