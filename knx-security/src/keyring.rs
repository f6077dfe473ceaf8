//! Key material configuration

use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};
use std::collections::HashMap;

/// Direction a group key may be used in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    /// The client may originate traffic for the group
    Originate,
    /// The client only decrypts traffic it receives for the group
    ListenOnly,
}

/// Cryptographic key for one group address
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey {
    key: [u8; 16],
    direction: KeyDirection,
}

impl GroupKey {
    /// Create a group key
    ///
    /// # Errors
    /// Returns `KnxError::Security` if the key is not 16 bytes
    pub fn new(key: &[u8], direction: KeyDirection) -> KnxResult<Self> {
        let key: [u8; 16] = key.try_into().map_err(|_| {
            KnxError::Security(format!(
                "Invalid group key length: expected 16 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { key, direction })
    }

    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    /// Get the permitted direction
    pub fn direction(&self) -> KeyDirection {
        self.direction
    }

    /// Check if the key is restricted to listening
    pub fn is_listen_only(&self) -> bool {
        self.direction == KeyDirection::ListenOnly
    }
}

// key bytes stay out of Debug output
impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKey")
            .field("direction", &self.direction)
            .finish()
    }
}

/// Management key for one device address
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKey {
    key: [u8; 16],
}

impl DeviceKey {
    /// Create a device key
    ///
    /// # Errors
    /// Returns `KnxError::Security` if the key is not 16 bytes
    pub fn new(key: &[u8]) -> KnxResult<Self> {
        let key: [u8; 16] = key.try_into().map_err(|_| {
            KnxError::Security(format!(
                "Invalid device key length: expected 16 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey").finish()
    }
}

/// Caller-owned key material for the secure session
///
/// The keyring stays owned by the host configuration; building a secure
/// session clones the material so the wrapping layer never destroys
/// caller-owned key state.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    group_keys: HashMap<GroupAddress, GroupKey>,
    device_keys: HashMap<IndividualAddress, DeviceKey>,
}

impl Keyring {
    /// Create an empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key for a group address
    pub fn insert_group_key(&mut self, address: GroupAddress, key: GroupKey) {
        self.group_keys.insert(address, key);
    }

    /// Add or replace the key for a device address
    pub fn insert_device_key(&mut self, address: IndividualAddress, key: DeviceKey) {
        self.device_keys.insert(address, key);
    }

    /// Look up the key for a group address
    pub fn group_key(&self, address: GroupAddress) -> Option<&GroupKey> {
        self.group_keys.get(&address)
    }

    /// Look up the key for a device address
    pub fn device_key(&self, address: IndividualAddress) -> Option<&DeviceKey> {
        self.device_keys.get(&address)
    }

    /// Check whether any key material is configured
    pub fn is_empty(&self) -> bool {
        self.group_keys.is_empty() && self.device_keys.is_empty()
    }

    pub(crate) fn group_keys(&self) -> &HashMap<GroupAddress, GroupKey> {
        &self.group_keys
    }

    pub(crate) fn device_keys(&self) -> &HashMap<IndividualAddress, DeviceKey> {
        &self.device_keys
    }
}
