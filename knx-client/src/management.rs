//! Device inspection and management primitives

use crate::communicator::BusCommunicator;
use knx_core::frame;
use knx_core::{IndividualAddress, KnxError, KnxResult};
use std::sync::Arc;
use std::time::Duration;

// property element count is 4 bits, the start index 12 bits
const MAX_ELEMENTS: u8 = 0x0F;
const MAX_START_INDEX: u16 = 0x0FFF;

/// Validate a property element range
///
/// Shared by the property read and write paths so both enforce identical
/// bounds.
fn check_element_range(start: u16, elements: u8) -> KnxResult<()> {
    if start > MAX_START_INDEX {
        return Err(KnxError::InvalidData(format!(
            "Property start index out of range: expected 0-{}, got {}",
            MAX_START_INDEX, start
        )));
    }
    if elements == 0 || elements > MAX_ELEMENTS {
        return Err(KnxError::InvalidData(format!(
            "Property element count out of range: expected 1-{}, got {}",
            MAX_ELEMENTS, elements
        )));
    }
    Ok(())
}

/// Scoped handle for a management destination
///
/// Held for the duration of one best-effort management exchange; dropping
/// it releases the destination whether or not the exchange succeeded.
struct DestinationGuard {
    device: IndividualAddress,
}

impl DestinationGuard {
    fn new(device: IndividualAddress) -> Self {
        log::trace!("Acquiring management destination {}", device);
        Self { device }
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        log::trace!("Releasing management destination {}", self.device);
    }
}

/// Device-inspection primitive built atop the communicator
///
/// Each operation is individually safe to retry and cancel; interruption
/// during a read surfaces as "not available" (`Ok(None)` / `Ok(false)`)
/// rather than an unexpected fault. Multi-step inspection sequencing is an
/// external collaborator's concern.
#[derive(Debug)]
pub struct ManagementFacility {
    comm: Arc<BusCommunicator>,
}

impl ManagementFacility {
    pub(crate) fn new(comm: Arc<BusCommunicator>) -> Self {
        Self { comm }
    }

    /// Check whether a device address is responsive
    ///
    /// Implemented as an address-occupancy probe: a descriptor request that
    /// any live device answers.
    pub async fn is_reachable(
        &self,
        device: IndividualAddress,
        timeout: Duration,
    ) -> KnxResult<bool> {
        match self
            .comm
            .request_from_device(
                device,
                frame::DEVICE_DESCRIPTOR_READ,
                frame::DEVICE_DESCRIPTOR_RESPONSE,
                &[0x00],
                timeout,
            )
            .await
        {
            Ok(response) => Ok(response.is_some()),
            Err(e) if e.is_cancellation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Restart a device (best-effort, no confirmation on the bus)
    pub async fn restart_device(&self, device: IndividualAddress) -> KnxResult<()> {
        let _guard = DestinationGuard::new(device);
        log::debug!("Restarting device {}", device);
        self.comm
            .send_to_device(device, frame::RESTART, &[0x00])
            .await
    }

    /// Read a device descriptor
    ///
    /// # Returns
    /// `Ok(None)` when the device does not answer within the timeout or the
    /// read is interrupted
    pub async fn read_device_descriptor(
        &self,
        device: IndividualAddress,
        descriptor_type: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        self.request(
            device,
            frame::DEVICE_DESCRIPTOR_READ,
            frame::DEVICE_DESCRIPTOR_RESPONSE,
            &[descriptor_type],
            timeout,
        )
        .await
    }

    /// Read elements of an interface-object property
    ///
    /// # Arguments
    /// * `object_index` - Interface object index within the device
    /// * `property_id` - Property identifier
    /// * `start` - First element index (0-4095)
    /// * `elements` - Number of elements to read (1-15)
    /// * `timeout` - Response deadline
    ///
    /// # Errors
    /// Returns `KnxError::InvalidData` when the element range is out of
    /// bounds
    pub async fn read_property(
        &self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        elements: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        check_element_range(start, elements)?;
        let asdu = Self::property_asdu(object_index, property_id, start, elements, &[]);
        self.request(
            device,
            frame::PROPERTY_VALUE_READ,
            frame::PROPERTY_VALUE_RESPONSE,
            &asdu,
            timeout,
        )
        .await
    }

    /// Write elements of an interface-object property
    ///
    /// The element range passes through the same validator as the read
    /// path.
    pub async fn write_property(
        &self,
        device: IndividualAddress,
        object_index: u8,
        property_id: u8,
        start: u16,
        elements: u8,
        data: &[u8],
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        check_element_range(start, elements)?;
        let asdu = Self::property_asdu(object_index, property_id, start, elements, data);
        self.request(
            device,
            frame::PROPERTY_VALUE_WRITE,
            frame::PROPERTY_VALUE_RESPONSE,
            &asdu,
            timeout,
        )
        .await
    }

    /// Read bytes from a device's memory
    pub async fn read_memory(
        &self,
        device: IndividualAddress,
        address: u16,
        count: u8,
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        let mut asdu = vec![count];
        asdu.extend_from_slice(&address.to_be_bytes());
        self.request(
            device,
            frame::MEMORY_READ,
            frame::MEMORY_RESPONSE,
            &asdu,
            timeout,
        )
        .await
    }

    async fn request(
        &self,
        device: IndividualAddress,
        request_service: u16,
        response_service: u16,
        asdu: &[u8],
        timeout: Duration,
    ) -> KnxResult<Option<Vec<u8>>> {
        match self
            .comm
            .request_from_device(device, request_service, response_service, asdu, timeout)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) if e.is_cancellation() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn property_asdu(
        object_index: u8,
        property_id: u8,
        start: u16,
        elements: u8,
        data: &[u8],
    ) -> Vec<u8> {
        let mut asdu = Vec::with_capacity(4 + data.len());
        asdu.push(object_index);
        asdu.push(property_id);
        asdu.push((elements << 4) | ((start >> 8) as u8 & 0x0F));
        asdu.push((start & 0xFF) as u8);
        asdu.extend_from_slice(data);
        asdu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestStrategy;
    use knx_transport::LinkStrategy;

    #[tokio::test]
    async fn test_range_violations_reject_on_both_paths_before_any_bus_traffic() {
        let strategy = TestStrategy::new();
        let mut link = strategy.establish().await.unwrap();
        let _ = link.take_events();
        let comm = Arc::new(BusCommunicator::new(
            link,
            None,
            IndividualAddress::new(1, 1, 10).unwrap(),
            Duration::from_millis(100),
        ));
        let facility = ManagementFacility::new(comm);
        let device = IndividualAddress::new(1, 1, 200).unwrap();
        let timeout = Duration::from_millis(100);

        // read and write share one validator: identical bounds on each path
        assert!(matches!(
            facility
                .read_property(device, 1, 56, MAX_START_INDEX + 1, 1, timeout)
                .await,
            Err(KnxError::InvalidData(_))
        ));
        assert!(matches!(
            facility
                .write_property(device, 1, 56, MAX_START_INDEX + 1, 1, &[], timeout)
                .await,
            Err(KnxError::InvalidData(_))
        ));
        assert!(matches!(
            facility.read_property(device, 1, 56, 0, 0, timeout).await,
            Err(KnxError::InvalidData(_))
        ));
        assert!(matches!(
            facility
                .write_property(device, 1, 56, 0, 0, &[], timeout)
                .await,
            Err(KnxError::InvalidData(_))
        ));
        assert_eq!(strategy.handle().shared.attempts(), 0);
    }

    #[test]
    fn test_element_range_bounds() {
        assert!(check_element_range(0, 1).is_ok());
        assert!(check_element_range(MAX_START_INDEX, MAX_ELEMENTS).is_ok());
        assert!(check_element_range(MAX_START_INDEX + 1, 1).is_err());
        assert!(check_element_range(0, 0).is_err());
        assert!(check_element_range(0, MAX_ELEMENTS + 1).is_err());
    }

    #[test]
    fn test_property_asdu_layout() {
        let asdu = ManagementFacility::property_asdu(1, 56, 0x123, 5, &[0xAA]);
        assert_eq!(asdu, vec![1, 56, 0x51, 0x23, 0xAA]);
    }
}
