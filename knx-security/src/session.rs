//! Secure session over one transport link

use crate::keyring::{DeviceKey, GroupKey, Keyring};
use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};
use rand::RngCore;
use std::collections::HashMap;

const NONCE_LEN: usize = 12;

/// Secure session holding the key material for one connection
///
/// The session absorbs the configured keyring by cloning it: the caller's
/// key state survives session teardown, so a reconnect rebuilds the session
/// from the same configuration without re-provisioning.
///
/// Sealed payloads carry `nonce || ciphertext`, with the destination address
/// bound as associated data so a frame replayed to a different group fails
/// authentication.
pub struct SecureSession {
    group_keys: HashMap<GroupAddress, GroupKey>,
    device_keys: HashMap<IndividualAddress, DeviceKey>,
}

impl SecureSession {
    /// Build a session from the caller's keyring (copied, not moved)
    pub fn from_keyring(keyring: &Keyring) -> Self {
        let session = Self {
            group_keys: keyring.group_keys().clone(),
            device_keys: keyring.device_keys().clone(),
        };
        log::debug!(
            "Secure session created with {} group key(s), {} device key(s)",
            session.group_keys.len(),
            session.device_keys.len()
        );
        session
    }

    /// Check whether any key material is present
    pub fn is_secured(&self) -> bool {
        !self.group_keys.is_empty() || !self.device_keys.is_empty()
    }

    /// Look up the key for a group address, regardless of direction
    pub fn group_key(&self, address: GroupAddress) -> Option<&GroupKey> {
        self.group_keys.get(&address)
    }

    /// Look up an originating key for a group address
    ///
    /// Returns `None` both when no key is configured (plain group) and when
    /// the configured key is listen-only.
    pub fn originating_key(&self, address: GroupAddress) -> Option<&GroupKey> {
        self.group_keys
            .get(&address)
            .filter(|key| !key.is_listen_only())
    }

    /// Check whether a group is secured with a listen-only key
    pub fn is_listen_only(&self, address: GroupAddress) -> bool {
        self.group_keys
            .get(&address)
            .is_some_and(|key| key.is_listen_only())
    }

    /// Look up the management key for a device address
    pub fn device_key(&self, address: IndividualAddress) -> Option<&DeviceKey> {
        self.device_keys.get(&address)
    }

    /// Seal an application payload for a group destination
    ///
    /// # Errors
    /// Returns `KnxError::Security` if no key is configured for the address
    /// or encryption fails
    pub fn seal(&self, address: GroupAddress, service: u16, asdu: &[u8]) -> KnxResult<Vec<u8>> {
        let key = self.group_keys.get(&address).ok_or_else(|| {
            KnxError::Security(format!("No group key configured for {}", address))
        })?;

        let mut plaintext = Vec::with_capacity(2 + asdu.len());
        plaintext.extend_from_slice(&service.to_be_bytes());
        plaintext.extend_from_slice(asdu);

        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.key()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = address.raw().to_be_bytes();
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| KnxError::Security(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a sealed payload received for a group destination
    ///
    /// # Returns
    /// The embedded service code and plain ASDU
    ///
    /// # Errors
    /// Returns `KnxError::Security` if no key is configured for the address,
    /// the payload is malformed, or authentication fails
    pub fn open(&self, address: GroupAddress, data: &[u8]) -> KnxResult<(u16, Vec<u8>)> {
        let key = self.group_keys.get(&address).ok_or_else(|| {
            KnxError::Security(format!("No group key configured for {}", address))
        })?;

        if data.len() < NONCE_LEN {
            return Err(KnxError::Security(format!(
                "Sealed payload too short: {} bytes",
                data.len()
            )));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.key()));
        let aad = address.raw().to_be_bytes();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| KnxError::Security(format!("Decryption failed: {}", e)))?;

        if plaintext.len() < 2 {
            return Err(KnxError::Security(
                "Sealed payload missing service code".to_string(),
            ));
        }
        let service = u16::from_be_bytes([plaintext[0], plaintext[1]]);
        Ok((service, plaintext[2..].to_vec()))
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("group_keys", &self.group_keys.len())
            .field("device_keys", &self.device_keys.len())
            .finish()
    }
}
