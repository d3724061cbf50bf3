//! Pluggable BLE transport seam.
//!
//! The physical Bluetooth layer (scanning, GATT connect, characteristic
//! write/notify) lives behind these traits. The library only needs this
//! narrow surface; production backends wrap a platform BLE stack, tests use
//! an in-memory mock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Invoked when the transport detects a dropped link. Receives the device
/// address; may be called from any thread.
pub type DisconnectListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked with each raw notification payload; may be called from any thread.
pub type NotifyListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// One advertised GATT service and its characteristic UUIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: String,
    pub characteristics: Vec<String>,
}

/// Scans for nearby BLE devices.
#[async_trait]
pub trait BleScanner: Send + Sync {
    /// Scan for up to `timeout` and return every device seen.
    async fn discover(&self, timeout: Duration) -> anyhow::Result<Vec<Arc<dyn DeviceHandle>>>;
}

/// A single discovered BLE device, connectable and reconnectable.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Advertised name, if the device broadcast one.
    fn name(&self) -> Option<String>;

    /// Stable transport address.
    fn address(&self) -> String;

    /// Open the link. The listener fires on every disconnect the transport
    /// detects, intentional or not; filtering is the caller's job.
    async fn connect(
        &self,
        on_disconnect: DisconnectListener,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    /// GATT services advertised by the connected device.
    async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError>;

    /// Write `payload` to the characteristic, without response.
    async fn write(
        &self,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to notifications on the characteristic.
    async fn subscribe(
        &self,
        characteristic_uuid: &str,
        on_notify: NotifyListener,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic_uuid: &str) -> Result<(), TransportError>;
}
