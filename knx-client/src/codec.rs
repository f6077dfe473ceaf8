//! Seam to the datapoint value-encoding collaborator
//!
//! Semantic conversion between typed values and ASDU bytes is device
//! knowledge that lives outside this crate. The client only needs a narrow
//! encode/decode interface; hosts plug in their own implementation.

use knx_core::{DptValue, KnxError, KnxResult};

/// Datapoint-type aware value conversion
#[cfg_attr(test, mockall::automock)]
pub trait ValueCodec: Send + Sync {
    /// Encode a typed value into ASDU bytes for the given datapoint type
    fn encode(&self, dpt: &str, value: &DptValue) -> KnxResult<Vec<u8>>;

    /// Decode ASDU bytes into a typed value for the given datapoint type
    fn decode(&self, dpt: &str, asdu: &[u8]) -> KnxResult<DptValue>;
}

/// Structural passthrough codec
///
/// Encodes values by their structural representation without any
/// datapoint-type semantics. Sufficient for raw-byte hosts and for tests;
/// real deployments supply a datapoint-type aware implementation.
#[derive(Debug, Clone, Default)]
pub struct RawCodec;

impl ValueCodec for RawCodec {
    fn encode(&self, _dpt: &str, value: &DptValue) -> KnxResult<Vec<u8>> {
        match value {
            DptValue::Bit(v) => Ok(vec![u8::from(*v)]),
            DptValue::Unsigned(v) => {
                let bytes = v.to_be_bytes();
                let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
                Ok(bytes[skip..].to_vec())
            }
            DptValue::Signed(v) => Ok(v.to_be_bytes().to_vec()),
            DptValue::Float(v) => Ok(v.to_be_bytes().to_vec()),
            DptValue::Text(v) => Ok(v.as_bytes().to_vec()),
            DptValue::Raw(v) => Ok(v.clone()),
        }
    }

    fn decode(&self, _dpt: &str, asdu: &[u8]) -> KnxResult<DptValue> {
        if asdu.is_empty() {
            return Err(KnxError::InvalidData("Empty ASDU".to_string()));
        }
        Ok(DptValue::Raw(asdu.to_vec()))
    }
}
