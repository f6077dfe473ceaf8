//! Secure session layer for the KNX field-bus client
//!
//! This crate owns per-group and per-device cryptographic key material and
//! the sealing/opening of application-layer payloads for the encrypted link
//! variants. Key derivation and provisioning are the host's concern; keys
//! arrive here fully formed.

pub mod keyring;
pub mod session;

pub use keyring::{DeviceKey, GroupKey, KeyDirection, Keyring};
pub use session::SecureSession;
