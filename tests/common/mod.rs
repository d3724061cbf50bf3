//! In-memory BLE transport used by the integration tests.
//!
//! `MockDevice` records every characteristic write and answers through the
//! subscribed notification listener, either with scripted responses or with a
//! default `OK;` acknowledgement.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use toyhub::{
    BleScanner, DeviceHandle, DisconnectListener, NotifyListener, ServiceInfo, TransportError,
};

pub const SERVICE_UUID: &str = "42300001-0023-4bd4-bbd5-a6920e4c5653";
pub const TX_UUID: &str = "42300002-0023-4BD4-BBD5-A6920E4C5653";
pub const RX_UUID: &str = "42300003-0023-4BD4-BBD5-A6920E4C5653";

pub fn lovense_service() -> ServiceInfo {
    ServiceInfo {
        uuid: SERVICE_UUID.to_string(),
        characteristics: vec![TX_UUID.to_string(), RX_UUID.to_string()],
    }
}

pub struct MockDevice {
    name: Option<String>,
    address: String,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    auto_ack: AtomicBool,
    services: Mutex<Vec<ServiceInfo>>,
    writes: Mutex<Vec<(String, Vec<u8>)>>,
    scripted: Mutex<VecDeque<String>>,
    notify: Mutex<Option<NotifyListener>>,
    disconnect_listener: Mutex<Option<DisconnectListener>>,
}

impl MockDevice {
    pub fn new(name: &str, address: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name.to_string()),
            address: address.to_string(),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            auto_ack: AtomicBool::new(true),
            services: Mutex::new(vec![lovense_service()]),
            writes: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            notify: Mutex::new(None),
            disconnect_listener: Mutex::new(None),
        })
    }

    /// Queue a response delivered for the next write, ahead of the auto-ack.
    pub fn script_response(&self, response: &str) {
        self.scripted
            .lock()
            .unwrap()
            .push_back(response.to_string());
    }

    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        *self.services.lock().unwrap() = services;
    }

    /// Synchronous view of the link state, for assertions from test threads.
    pub fn connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Commands written so far, decoded as strings.
    pub fn written_commands(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).to_string())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Push an unsolicited notification, as the device would over BLE.
    pub fn emit_notification(&self, payload: &[u8]) {
        let listener = self.notify.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(payload);
        }
    }

    /// Simulate the transport losing the link.
    pub fn fire_disconnect(&self) {
        self.set_connected(false);
        let listener = self.disconnect_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(&self.address);
        }
    }
}

#[async_trait]
impl DeviceHandle for MockDevice {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self, on_disconnect: DisconnectListener) -> Result<(), TransportError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Other(anyhow::anyhow!("connection refused")));
        }
        *self.disconnect_listener.lock().unwrap() = Some(on_disconnect);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // Real transports report every disconnect, intentional or not.
        let listener = self.disconnect_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(&self.address);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        Ok(self.services.lock().unwrap().clone())
    }

    async fn write(&self, characteristic_uuid: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic_uuid.to_string(), payload.to_vec()));
        let response = self.scripted.lock().unwrap().pop_front().or_else(|| {
            self.auto_ack
                .load(Ordering::SeqCst)
                .then(|| "OK;".to_string())
        });
        if let Some(response) = response {
            let listener = self.notify.lock().unwrap().clone();
            if let Some(listener) = listener {
                listener(response.as_bytes());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _characteristic_uuid: &str,
        on_notify: NotifyListener,
    ) -> Result<(), TransportError> {
        *self.notify.lock().unwrap() = Some(on_notify);
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic_uuid: &str) -> Result<(), TransportError> {
        *self.notify.lock().unwrap() = None;
        Ok(())
    }
}

pub struct MockScanner {
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockScanner {
    pub fn new(devices: Vec<Arc<MockDevice>>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
        })
    }
}

#[async_trait]
impl BleScanner for MockScanner {
    async fn discover(&self, _timeout: Duration) -> anyhow::Result<Vec<Arc<dyn DeviceHandle>>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|device| device.clone() as Arc<dyn DeviceHandle>)
            .collect())
    }
}
