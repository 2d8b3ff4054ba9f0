//! Device identity.

use sync_types::DeviceId;

/// Supplies the id sent with every batch request.
pub trait DeviceIdProvider: Send + Sync {
    /// This device's id. Must be stable across calls.
    fn device_id(&self) -> DeviceId;
}

/// A device id fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDeviceId(DeviceId);

impl FixedDeviceId {
    /// Wrap an existing id.
    pub fn new(device_id: DeviceId) -> Self {
        Self(device_id)
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(DeviceId::random())
    }
}

impl DeviceIdProvider for FixedDeviceId {
    fn device_id(&self) -> DeviceId {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_id_is_stable() {
        let provider = FixedDeviceId::random();
        assert_eq!(provider.device_id(), provider.device_id());
        assert_eq!(
            FixedDeviceId::new(DeviceId::new("d1")).device_id(),
            DeviceId::new("d1")
        );
    }
}
