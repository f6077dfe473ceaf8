//! Transport links for the KNX field-bus client
//!
//! This crate provides the [`TransportLink`] abstraction and its medium
//! variants (IP tunnel, IP router, serial gateway), plus the configuration
//! type that resolves a variant selection into a single establishment
//! strategy.

pub mod config;
pub mod ip;
pub mod link;
pub mod serial;

pub use config::{ConfiguredLink, LinkConfig};
pub use ip::{IpRouterLink, IpTunnelLink, RouterSettings, TunnelSettings};
pub use link::{EVENT_CHANNEL_CAPACITY, LinkEvent, LinkStrategy, TransportLink};
pub use serial::{SerialFraming, SerialLink, SerialSettings};
