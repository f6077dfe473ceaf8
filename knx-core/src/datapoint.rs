//! Datapoint value objects used by the read scheduler and the write path

use crate::address::GroupAddress;
use std::hash::{Hash, Hasher};

/// A pending group read with retry accounting
///
/// Queue identity is defined solely by the bus address: two entries for the
/// same address are the same queue member regardless of their retry counts.
/// This is what makes enqueue-by-address idempotent and is relied upon by
/// the read queue's dedup invariant, so equality deliberately ignores
/// `retries` and `limit`.
#[derive(Debug, Clone)]
pub struct ReadDatapoint {
    address: GroupAddress,
    retries: u32,
    limit: u32,
}

impl ReadDatapoint {
    /// Create a new read entry with zero consumed retries
    ///
    /// # Arguments
    ///
    /// * `address` - Group address to read
    /// * `limit` - Maximum number of attempts before the entry is dropped
    pub fn new(address: GroupAddress, limit: u32) -> Self {
        Self {
            address,
            retries: 0,
            limit,
        }
    }

    /// Get the group address
    pub fn address(&self) -> GroupAddress {
        self.address
    }

    /// Get the number of attempts consumed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Get the retry limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Consume one attempt and return the new attempt count
    ///
    /// The queue consumer calls this before issuing each read.
    pub fn register_attempt(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    /// Check whether the retry limit has been reached
    pub fn exhausted(&self) -> bool {
        self.retries >= self.limit
    }
}

impl PartialEq for ReadDatapoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ReadDatapoint {}

impl Hash for ReadDatapoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Typed datapoint value
///
/// Semantic conversion between these values and ASDU bytes belongs to the
/// value-encoding collaborator; this layer only transports them.
#[derive(Debug, Clone, PartialEq)]
pub enum DptValue {
    Bit(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Raw(Vec<u8>),
}

/// Outbound write or read-response request
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSpec {
    pub dpt: String,
    pub group_address: GroupAddress,
    pub value: DptValue,
}

impl OutboundSpec {
    pub fn new(dpt: impl Into<String>, group_address: GroupAddress, value: DptValue) -> Self {
        Self {
            dpt: dpt.into(),
            group_address,
            value,
        }
    }

    /// Address-match predicate used by response routing
    pub fn matches(&self, address: GroupAddress) -> bool {
        self.group_address == address
    }
}

/// Inbound datapoint description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSpec {
    pub dpt: String,
    pub group_address: GroupAddress,
}

impl InboundSpec {
    pub fn new(dpt: impl Into<String>, group_address: GroupAddress) -> Self {
        Self {
            dpt: dpt.into(),
            group_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn addr(main: u8, middle: u8, sub: u8) -> GroupAddress {
        GroupAddress::new(main, middle, sub).unwrap()
    }

    #[test]
    fn test_equality_by_address_only() {
        let a = ReadDatapoint::new(addr(1, 0, 7), 3);
        let mut b = ReadDatapoint::new(addr(1, 0, 7), 99);
        b.register_attempt();
        assert_eq!(a, b);

        let hash = |dp: &ReadDatapoint| {
            let mut h = DefaultHasher::new();
            dp.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));

        let c = ReadDatapoint::new(addr(1, 0, 8), 3);
        assert_ne!(a, c);
    }

    #[test]
    fn test_retry_accounting() {
        let mut dp = ReadDatapoint::new(addr(2, 1, 1), 3);
        assert_eq!(dp.retries(), 0);
        assert!(!dp.exhausted());
        assert_eq!(dp.register_attempt(), 1);
        assert_eq!(dp.register_attempt(), 2);
        assert!(!dp.exhausted());
        assert_eq!(dp.register_attempt(), 3);
        assert!(dp.exhausted());
    }

    #[test]
    fn test_outbound_spec_matches() {
        let spec = OutboundSpec::new("1.001", addr(1, 0, 7), DptValue::Bit(true));
        assert!(spec.matches(addr(1, 0, 7)));
        assert!(!spec.matches(addr(1, 0, 8)));
    }
}
