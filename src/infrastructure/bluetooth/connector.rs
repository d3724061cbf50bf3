//! Discovery and connection fan-out for Lovense toys.
//!
//! Turns scan results into ready protocol sessions: filter by the vendor name
//! prefix, connect concurrently, resolve the TX/RX characteristics by the
//! vendor UUID rule and start notifications. Each record in a batch succeeds
//! or fails on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::models::{validate_model_name, ToyInfo};
use crate::error::{Error, Result, TransportError};
use crate::infrastructure::bluetooth::protocol::{self, CharacteristicRole};
use crate::infrastructure::bluetooth::session::{LovenseToy, PowerOffListener, Toy};
use crate::infrastructure::transport::{BleScanner, DeviceHandle, DisconnectListener};

pub struct LovenseConnector {
    scanner: Arc<dyn BleScanner>,
    on_unexpected_disconnect: DisconnectListener,
    on_power_off: PowerOffListener,
    /// Raw handles from the last scan, keyed by address, consumed by
    /// `create_toys`.
    discovered: Mutex<HashMap<String, Arc<dyn DeviceHandle>>>,
    /// Sessions currently holding their transport link, keyed by address.
    /// Used to suppress rediscovery and to filter intentional disconnects.
    live: Mutex<HashMap<String, Arc<dyn Toy>>>,
}

impl LovenseConnector {
    pub fn new(
        scanner: Arc<dyn BleScanner>,
        on_unexpected_disconnect: DisconnectListener,
        on_power_off: PowerOffListener,
    ) -> Self {
        info!("Lovense connector initialized");
        Self {
            scanner,
            on_unexpected_disconnect,
            on_power_off,
            discovered: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Scan for Lovense toys.
    ///
    /// Devices whose advertising name does not start with `LVS-` are ignored,
    /// as are devices that already have a live session. Matching handles are
    /// cached for the subsequent `create_toys` call; the returned records
    /// carry empty model names.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<ToyInfo>> {
        info!("scanning for Lovense devices for {timeout:?}");
        let devices = self
            .scanner
            .discover(timeout)
            .await
            .map_err(|error| Error::Transport(TransportError::Other(error)))?;

        let mut cached = HashMap::new();
        let mut records = Vec::new();
        {
            let live = self.live.lock().unwrap();
            for device in devices {
                let Some(name) = device.name() else { continue };
                if !name.starts_with(protocol::NAME_PREFIX) {
                    continue;
                }
                let address = device.address();
                if live.contains_key(&address) {
                    debug!("skipping {address}, already connected");
                    continue;
                }
                records.push(ToyInfo::new(name, address.clone()));
                cached.insert(address, device);
            }
        }
        *self.discovered.lock().unwrap() = cached;
        debug!("discovered {} Lovense devices", records.len());
        Ok(records)
    }

    /// Connect every record concurrently and return one outcome per record,
    /// in input order. A failing record never aborts its neighbors.
    pub async fn create_toys(
        self: &Arc<Self>,
        to_connect: &[ToyInfo],
    ) -> Vec<Result<Arc<LovenseToy>>> {
        info!("connecting to {} Lovense devices", to_connect.len());
        if to_connect.is_empty() {
            return Vec::new();
        }
        let attempts = to_connect
            .iter()
            .map(|record| self.create_toy(record.clone()));
        let outcomes = join_all(attempts).await;
        let connected = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        debug!("connected to {connected}/{} Lovense devices", to_connect.len());
        outcomes
    }

    async fn create_toy(self: &Arc<Self>, record: ToyInfo) -> Result<Arc<LovenseToy>> {
        validate_model_name(&record.model_name, &record.toy_id)?;

        let handle = self
            .discovered
            .lock()
            .unwrap()
            .get(&record.toy_id)
            .cloned()
            .ok_or_else(|| {
                Error::connection(&record.toy_id, "device was not seen in the last scan")
            })?;

        let listener = self.disconnect_listener();
        handle.connect(listener.clone()).await.map_err(|error| {
            Error::connection(
                &record.toy_id,
                format!("error connecting to {}: {error}", record.model_name),
            )
        })?;

        // Past this point the link is up; tear it down again if the
        // characteristic discovery or the subscription fails.
        let toy = match self.finish_setup(&record, handle.clone(), listener).await {
            Ok(toy) => toy,
            Err(error) => {
                if let Err(cleanup) = handle.disconnect().await {
                    warn!("cleanup disconnect failed for {}: {cleanup}", record.toy_id);
                }
                return Err(error);
            }
        };

        self.live
            .lock()
            .unwrap()
            .insert(record.toy_id.clone(), toy.clone());
        Ok(toy)
    }

    /// Put a session back on the live list after a successful reconnect, so
    /// disconnect filtering and rediscovery suppression keep working.
    pub(crate) fn mark_live(&self, address: &str, toy: Arc<dyn Toy>) {
        self.live.lock().unwrap().insert(address.to_string(), toy);
    }

    async fn finish_setup(
        &self,
        record: &ToyInfo,
        handle: Arc<dyn DeviceHandle>,
        listener: DisconnectListener,
    ) -> Result<Arc<LovenseToy>> {
        let services = handle.services().await.map_err(|error| {
            Error::connection(&record.toy_id, format!("service discovery failed: {error}"))
        })?;
        let tx_uuid = protocol::resolve_characteristic(&services, CharacteristicRole::Tx)
            .ok_or_else(|| Error::connection(&record.toy_id, "unable to find tx UUID"))?;
        let rx_uuid = protocol::resolve_characteristic(&services, CharacteristicRole::Rx)
            .ok_or_else(|| Error::connection(&record.toy_id, "unable to find rx UUID"))?;

        let toy = Arc::new(LovenseToy::new(
            handle,
            tx_uuid,
            rx_uuid,
            &record.model_name,
            listener,
            self.on_power_off.clone(),
        )?);
        toy.start_notifications().await?;
        Ok(toy)
    }

    /// The listener handed to the transport. Fires on every disconnect the
    /// transport notices; only unexpected ones reach the hub.
    fn disconnect_listener(self: &Arc<Self>) -> DisconnectListener {
        let connector: Weak<LovenseConnector> = Arc::downgrade(self);
        Arc::new(move |address: &str| {
            let Some(connector) = connector.upgrade() else {
                return;
            };
            let toy = connector.live.lock().unwrap().remove(address);
            if let Some(toy) = toy {
                if !toy.intentional_disconnect() {
                    (connector.on_unexpected_disconnect)(address);
                }
            }
        })
    }
}
