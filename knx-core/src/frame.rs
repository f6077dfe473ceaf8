//! Bus frame model and service codes
//!
//! The frame codec here is the seam between the communicator and the
//! transport links; it carries the application-layer payload (ASDU) as an
//! opaque byte sequence. The medium's own wire encoding lives inside the
//! transport implementations and is not modeled at this layer.

use crate::address::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, KnxResult};

/// Group value read request
pub const GROUP_READ: u16 = 0x000;
/// Group value read response
pub const GROUP_RESPONSE: u16 = 0x040;
/// Group value write
pub const GROUP_WRITE: u16 = 0x080;
/// Memory read request
pub const MEMORY_READ: u16 = 0x200;
/// Memory read response
pub const MEMORY_RESPONSE: u16 = 0x240;
/// Device descriptor read request
pub const DEVICE_DESCRIPTOR_READ: u16 = 0x300;
/// Device descriptor read response
pub const DEVICE_DESCRIPTOR_RESPONSE: u16 = 0x340;
/// Device restart
pub const RESTART: u16 = 0x380;
/// Property value read request
pub const PROPERTY_VALUE_READ: u16 = 0x3D5;
/// Property value read response
pub const PROPERTY_VALUE_RESPONSE: u16 = 0x3D6;
/// Property value write
pub const PROPERTY_VALUE_WRITE: u16 = 0x3D7;
/// Secure application data marker
pub const SECURE_DATA: u16 = 0x3F1;

/// Kind of group communication event carried by a frame
///
/// Event kinds are distinguished on the wire by a small integer service
/// code. Unrecognized codes classify as `Unknown` for diagnostics and must
/// never produce an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupEventKind {
    /// Group value write
    Write,
    /// Group value read request
    Read,
    /// Group value read response
    Response,
    /// Any other service code (diagnostic-only classification)
    Unknown(u16),
}

impl GroupEventKind {
    /// Classify a service code
    pub fn from_service(service: u16) -> Self {
        match service {
            GROUP_WRITE => GroupEventKind::Write,
            GROUP_READ => GroupEventKind::Read,
            GROUP_RESPONSE => GroupEventKind::Response,
            other => GroupEventKind::Unknown(other),
        }
    }

    /// Get the service code for this kind
    pub fn service(&self) -> u16 {
        match self {
            GroupEventKind::Write => GROUP_WRITE,
            GroupEventKind::Read => GROUP_READ,
            GroupEventKind::Response => GROUP_RESPONSE,
            GroupEventKind::Unknown(code) => *code,
        }
    }

    /// Get human-readable kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupEventKind::Write => "Write",
            GroupEventKind::Read => "Read",
            GroupEventKind::Response => "Response",
            GroupEventKind::Unknown(_) => "Unknown",
        }
    }
}

/// Frame destination: a group of devices or a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Group(GroupAddress),
    Individual(IndividualAddress),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Group(addr) => write!(f, "{}", addr),
            Destination::Individual(addr) => write!(f, "{}", addr),
        }
    }
}

/// Application-layer bus frame
///
/// Carries a source device address, a group or individual destination, the
/// service code and the opaque ASDU payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    pub source: IndividualAddress,
    pub destination: Destination,
    pub service: u16,
    pub asdu: Vec<u8>,
}

// destination marker bytes in the encoded form
const DST_GROUP: u8 = 0x00;
const DST_INDIVIDUAL: u8 = 0x01;

impl BusFrame {
    /// Create a group-addressed frame
    pub fn group(source: IndividualAddress, destination: GroupAddress, service: u16, asdu: Vec<u8>) -> Self {
        Self {
            source,
            destination: Destination::Group(destination),
            service,
            asdu,
        }
    }

    /// Create an individually-addressed frame
    pub fn individual(
        source: IndividualAddress,
        destination: IndividualAddress,
        service: u16,
        asdu: Vec<u8>,
    ) -> Self {
        Self {
            source,
            destination: Destination::Individual(destination),
            service,
            asdu,
        }
    }

    /// Classify the group event kind of this frame
    pub fn kind(&self) -> GroupEventKind {
        GroupEventKind::from_service(self.service)
    }

    /// Encode the frame to bytes
    ///
    /// # Format
    /// ```text
    /// Destination marker (1 byte): 0x00 group, 0x01 individual
    /// Source address (2 bytes, big-endian)
    /// Destination address (2 bytes, big-endian)
    /// Service code (2 bytes, big-endian)
    /// ASDU (variable)
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + self.asdu.len());
        let (marker, dst_raw) = match self.destination {
            Destination::Group(addr) => (DST_GROUP, addr.raw()),
            Destination::Individual(addr) => (DST_INDIVIDUAL, addr.raw()),
        };
        out.push(marker);
        out.extend_from_slice(&self.source.raw().to_be_bytes());
        out.extend_from_slice(&dst_raw.to_be_bytes());
        out.extend_from_slice(&self.service.to_be_bytes());
        out.extend_from_slice(&self.asdu);
        out
    }

    /// Decode a frame from bytes
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` if the buffer is shorter than the
    /// fixed header or carries an unknown destination marker. An
    /// unrecognized service code is NOT an error; it decodes normally and
    /// classifies as `GroupEventKind::Unknown`.
    pub fn decode(data: &[u8]) -> KnxResult<Self> {
        if data.len() < 7 {
            return Err(KnxError::InvalidData(format!(
                "Frame too short: expected at least 7 bytes, got {}",
                data.len()
            )));
        }

        let source = IndividualAddress::from_raw(u16::from_be_bytes([data[1], data[2]]));
        let dst_raw = u16::from_be_bytes([data[3], data[4]]);
        let destination = match data[0] {
            DST_GROUP => Destination::Group(GroupAddress::from_raw(dst_raw)),
            DST_INDIVIDUAL => Destination::Individual(IndividualAddress::from_raw(dst_raw)),
            other => {
                return Err(KnxError::InvalidData(format!(
                    "Unknown destination marker: 0x{:02X}",
                    other
                )));
            }
        };
        let service = u16::from_be_bytes([data[5], data[6]]);

        Ok(Self {
            source,
            destination,
            service,
            asdu: data[7..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> IndividualAddress {
        IndividualAddress::new(1, 1, 10).unwrap()
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = BusFrame::group(
            source(),
            GroupAddress::new(2, 3, 4).unwrap(),
            GROUP_WRITE,
            vec![0x01, 0x02],
        );
        let decoded = BusFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.kind(), GroupEventKind::Write);
    }

    #[test]
    fn test_unknown_service_code_is_not_an_error() {
        let frame = BusFrame::group(source(), GroupAddress::new(1, 0, 1).unwrap(), 0x2A7, vec![]);
        let decoded = BusFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.kind(), GroupEventKind::Unknown(0x2A7));
        assert_eq!(decoded.kind().as_str(), "Unknown");
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        assert!(BusFrame::decode(&[0x00, 0x11, 0x02]).is_err());
    }

    #[test]
    fn test_individual_destination() {
        let frame = BusFrame::individual(
            source(),
            IndividualAddress::new(1, 1, 200).unwrap(),
            DEVICE_DESCRIPTOR_READ,
            vec![0x00],
        );
        let decoded = BusFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.destination, frame.destination);
        assert!(matches!(decoded.kind(), GroupEventKind::Unknown(_)));
    }
}
