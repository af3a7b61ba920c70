use uuid::Uuid;

use crate::device::id::DeviceId;
use crate::error::TransportError;

pub mod btle;
pub mod scan;

/// Capabilities of a native bluetooth stack.
///
/// Every call only starts the operation. Completion (or failure) is reported later as a
/// [`crate::device::types::TransportEvent`]. An `Err` means the request could not even be
/// issued.
pub trait Transport {
    fn connect(&self, id: &DeviceId) -> Result<(), TransportError>;

    fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError>;

    fn read_characteristic(&self, id: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<(), TransportError>;

    fn write_characteristic(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;
}
