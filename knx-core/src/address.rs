use crate::error::{KnxError, KnxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 3-level group address identifying a set of devices on the bus
///
/// Group addresses are 16-bit identifiers split into main (5 bits),
/// middle (3 bits) and sub (8 bits) levels, written as "main/middle/sub".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Create a new group address from its three levels
    ///
    /// # Arguments
    ///
    /// * `main` - Main group (0-31)
    /// * `middle` - Middle group (0-7)
    /// * `sub` - Sub group (0-255)
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` if a level is out of range
    pub fn new(main: u8, middle: u8, sub: u8) -> KnxResult<Self> {
        if main > 0x1F {
            return Err(KnxError::InvalidData(format!(
                "Main group out of range: expected 0-31, got {}",
                main
            )));
        }
        if middle > 0x07 {
            return Err(KnxError::InvalidData(format!(
                "Middle group out of range: expected 0-7, got {}",
                middle
            )));
        }
        Ok(Self {
            raw: ((main as u16) << 11) | ((middle as u16) << 8) | sub as u16,
        })
    }

    /// Create a group address from its raw 16-bit representation
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Parse a group address from "main/middle/sub" notation
    ///
    /// # Arguments
    ///
    /// * `s` - String representation, e.g. "1/0/7"
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` if the format or a level is invalid
    pub fn from_string(s: &str) -> KnxResult<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(KnxError::InvalidData(format!(
                "Invalid group address format: {}",
                s
            )));
        }

        let mut levels = [0u8; 3];
        for (i, part) in parts.iter().enumerate() {
            levels[i] = part.parse::<u8>().map_err(|_| {
                KnxError::InvalidData(format!("Invalid group address level: {}", part))
            })?;
        }

        Self::new(levels[0], levels[1], levels[2])
    }

    /// Get the raw 16-bit representation
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Get the main group (5 bits)
    pub fn main(&self) -> u8 {
        (self.raw >> 11) as u8
    }

    /// Get the middle group (3 bits)
    pub fn middle(&self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Get the sub group (8 bits)
    pub fn sub(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> KnxResult<Self> {
        Self::from_string(s)
    }
}

/// Individual (device) address identifying a single device on the bus
///
/// Individual addresses are 16-bit identifiers split into area (4 bits),
/// line (4 bits) and device (8 bits), written as "area.line.device".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Create a new individual address from its three parts
    ///
    /// # Arguments
    ///
    /// * `area` - Area (0-15)
    /// * `line` - Line (0-15)
    /// * `device` - Device (0-255)
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` if a part is out of range
    pub fn new(area: u8, line: u8, device: u8) -> KnxResult<Self> {
        if area > 0x0F {
            return Err(KnxError::InvalidData(format!(
                "Area out of range: expected 0-15, got {}",
                area
            )));
        }
        if line > 0x0F {
            return Err(KnxError::InvalidData(format!(
                "Line out of range: expected 0-15, got {}",
                line
            )));
        }
        Ok(Self {
            raw: ((area as u16) << 12) | ((line as u16) << 8) | device as u16,
        })
    }

    /// Create an individual address from its raw 16-bit representation
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Parse an individual address from "area.line.device" notation
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` if the format or a part is invalid
    pub fn from_string(s: &str) -> KnxResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(KnxError::InvalidData(format!(
                "Invalid individual address format: {}",
                s
            )));
        }

        let mut levels = [0u8; 3];
        for (i, part) in parts.iter().enumerate() {
            levels[i] = part.parse::<u8>().map_err(|_| {
                KnxError::InvalidData(format!("Invalid individual address part: {}", part))
            })?;
        }

        Self::new(levels[0], levels[1], levels[2])
    }

    /// Get the raw 16-bit representation
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Get the area (4 bits)
    pub fn area(&self) -> u8 {
        (self.raw >> 12) as u8
    }

    /// Get the line (4 bits)
    pub fn line(&self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Get the device (8 bits)
    pub fn device(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> KnxResult<Self> {
        Self::from_string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_address_roundtrip() {
        let addr = GroupAddress::new(1, 0, 7).unwrap();
        assert_eq!(addr.main(), 1);
        assert_eq!(addr.middle(), 0);
        assert_eq!(addr.sub(), 7);
        assert_eq!(addr.to_string(), "1/0/7");
        assert_eq!(GroupAddress::from_string("1/0/7").unwrap(), addr);
        assert_eq!(GroupAddress::from_raw(addr.raw()), addr);
    }

    #[test]
    fn test_group_address_bounds() {
        assert!(GroupAddress::new(31, 7, 255).is_ok());
        assert!(GroupAddress::new(32, 0, 0).is_err());
        assert!(GroupAddress::new(0, 8, 0).is_err());
        assert!(GroupAddress::from_string("1/2").is_err());
        assert!(GroupAddress::from_string("1/2/x").is_err());
    }

    #[test]
    fn test_individual_address_roundtrip() {
        let addr = IndividualAddress::new(1, 1, 200).unwrap();
        assert_eq!(addr.to_string(), "1.1.200");
        assert_eq!(IndividualAddress::from_string("1.1.200").unwrap(), addr);
        assert!(IndividualAddress::new(16, 0, 0).is_err());
        assert!(IndividualAddress::new(0, 16, 0).is_err());
    }
}
