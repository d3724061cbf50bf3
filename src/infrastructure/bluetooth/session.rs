//! Per-toy protocol session.
//!
//! [`LovenseToy`] turns the raw transport handle into a reliable
//! one-command-at-a-time request/response channel and layers the semantic
//! commands (levels, battery, status, power-off) on top. The [`Toy`] trait is
//! the capability seam other toy families would implement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::models::{
    model_commands, supports_rotation, validate_model_name, AIR_LEVEL_COMMAND, AIR_LEVEL_MAX,
    MAX_LEVEL,
};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::transport::{DeviceHandle, DisconnectListener, NotifyListener};

/// Default wait for a toy's response to a single command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Invoked with the device address when the toy announces a physical
/// power-off; may fire from whatever thread delivers notifications.
pub type PowerOffListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Capability surface of a connected toy.
///
/// Sessions are produced by the connector and are single-use: after
/// [`Toy::disconnect`] the object is dead and a fresh discovery/connect cycle
/// is required.
#[async_trait]
pub trait Toy: Send + Sync {
    fn model_name(&self) -> String;

    /// Change the active model. Fails with a validation error (and leaves the
    /// session untouched) when the name is not in the capability table.
    fn set_model_name(&self, model_name: &str) -> Result<()>;

    /// Bluetooth advertising name.
    fn name(&self) -> &str;

    /// Stable transport address.
    fn address(&self) -> &str;

    /// Whether the last disconnect was requested by the caller, as opposed to
    /// detected by the transport.
    fn intentional_disconnect(&self) -> bool;

    async fn is_connected(&self) -> bool;

    /// Begin listening for responses. Called by the connector during setup;
    /// calling it again is a no-op.
    async fn start_notifications(&self) -> Result<()>;

    /// Best-effort teardown: stop the toy, drop the subscription, close the
    /// link. Never fails; individual step failures are logged.
    async fn disconnect(&self);

    /// Re-open the transport link after an unexpected drop, reusing the
    /// original disconnect listener.
    async fn reconnect_transport(&self) -> Result<()>;

    /// Set the primary capability (0-20, clamped). True iff acknowledged.
    async fn intensity1(&self, level: i32) -> bool;

    /// Set the secondary capability (0-20, clamped). True without sending
    /// anything when the model has no secondary capability.
    async fn intensity2(&self, level: i32) -> bool;

    /// Drive both capabilities to zero.
    async fn stop(&self) -> bool;

    /// Toggle rotation direction. True without sending anything when the
    /// model cannot rotate.
    async fn rotate_change_direction(&self) -> bool;

    /// Battery percentage, or `None` on timeout/garbage.
    async fn get_battery_level(&self) -> Option<u8>;

    /// Status code (2 = normal), or `None` on timeout/garbage.
    async fn get_status(&self) -> Option<i32>;

    /// Production batch string, or `None`.
    async fn get_batch_number(&self) -> Option<String>;

    /// Device type/firmware/address triple, or `None`.
    async fn get_device_type(&self) -> Option<String>;

    /// Send an arbitrary protocol command and return the raw response.
    async fn direct_command(&self, command: &str) -> Option<String>;

    /// Turn the toy off; only the physical button can bring it back.
    async fn power_off(&self) -> bool;
}

/// Protocol session for one Lovense toy.
pub struct LovenseToy {
    handle: Arc<dyn DeviceHandle>,
    tx_uuid: String,
    rx_uuid: String,
    name: String,
    address: String,
    model_name: Mutex<String>,
    notifications_started: AtomicBool,
    intentional_disconnect: AtomicBool,
    on_disconnect: DisconnectListener,
    on_power_off: PowerOffListener,
    response_tx: mpsc::UnboundedSender<String>,
    /// Holding this lock serializes command exchanges *and* grants exclusive
    /// access to the response queue, so a second command can never consume
    /// the first command's response.
    command_lock: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl LovenseToy {
    pub fn new(
        handle: Arc<dyn DeviceHandle>,
        tx_uuid: String,
        rx_uuid: String,
        model_name: &str,
        on_disconnect: DisconnectListener,
        on_power_off: PowerOffListener,
    ) -> Result<Self> {
        let address = handle.address();
        validate_model_name(model_name, &address)?;
        let name = handle.name().unwrap_or_default();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        Ok(Self {
            handle,
            tx_uuid,
            rx_uuid,
            name,
            address,
            model_name: Mutex::new(model_name.to_string()),
            notifications_started: AtomicBool::new(false),
            intentional_disconnect: AtomicBool::new(false),
            on_disconnect,
            on_power_off,
            response_tx,
            command_lock: tokio::sync::Mutex::new(response_rx),
        })
    }

    /// Send a framed command over the write characteristic. Returns false on
    /// a dead link or a transport error; nothing at protocol level can fail
    /// loud enough to justify an error here.
    async fn send_command(&self, command: &str) -> bool {
        if !self.handle.is_connected().await {
            return false;
        }
        let payload = protocol::frame_command(command);
        match self.handle.write(&self.tx_uuid, &payload).await {
            Ok(()) => {
                info!(
                    "sent command to {} at {}: {}",
                    self.model_name(),
                    self.address,
                    command.trim_end_matches(protocol::TERMINATOR)
                );
                true
            }
            Err(error) => {
                warn!(
                    "error sending command to {} at {}: {error}",
                    self.model_name(),
                    self.address
                );
                false
            }
        }
    }

    /// One full request/response exchange.
    ///
    /// Serialized by the command lock. Stale responses left over from an
    /// earlier timed-out exchange are discarded before sending. Every failure
    /// mode (notifications never started, send failure, timeout) degrades to
    /// `None`.
    async fn execute(&self, command: &str, timeout: Duration) -> Option<String> {
        debug!(
            "executing command {command} on {} at {}",
            self.model_name(),
            self.address
        );
        let mut responses = self.command_lock.lock().await;

        if !self.notifications_started.load(Ordering::SeqCst) {
            warn!(
                "notifications not started for {} at {}",
                self.model_name(),
                self.address
            );
            return None;
        }

        while responses.try_recv().is_ok() {}

        if !self.send_command(command).await {
            warn!(
                "failed to send command {command} to {} at {}",
                self.model_name(),
                self.address
            );
            return None;
        }

        match tokio::time::timeout(timeout, responses.recv()).await {
            Ok(Some(response)) => {
                debug!(
                    "received response from {} at {}: {response}",
                    self.model_name(),
                    self.address
                );
                Some(response)
            }
            Ok(None) => {
                warn!("response channel closed for {}", self.address);
                None
            }
            Err(_) => {
                warn!(
                    "timeout waiting for response from {} at {}",
                    self.model_name(),
                    self.address
                );
                None
            }
        }
    }

    /// Clamp and send a level-bearing command, e.g. `Vibrate:15`.
    async fn level_command(&self, command_name: &str, level: i32, max_level: i32) -> bool {
        let level = level.clamp(0, max_level);
        let command = format!("{command_name}:{level}");
        self.execute(&command, COMMAND_TIMEOUT).await.as_deref() == Some(protocol::ACK_RESPONSE)
    }

    fn primary_command(&self) -> Option<&'static str> {
        model_commands(&self.model_name()).map(|commands| commands.primary_command)
    }

    fn secondary_command(&self) -> Option<&'static str> {
        model_commands(&self.model_name()).and_then(|commands| commands.secondary_command)
    }
}

#[async_trait]
impl Toy for LovenseToy {
    fn model_name(&self) -> String {
        self.model_name.lock().unwrap().clone()
    }

    fn set_model_name(&self, model_name: &str) -> Result<()> {
        validate_model_name(model_name, &self.address)?;
        *self.model_name.lock().unwrap() = model_name.to_string();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn intentional_disconnect(&self) -> bool {
        self.intentional_disconnect.load(Ordering::SeqCst)
    }

    async fn is_connected(&self) -> bool {
        self.handle.is_connected().await
    }

    async fn start_notifications(&self) -> Result<()> {
        if self.notifications_started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let sender = self.response_tx.clone();
        let address = self.address.clone();
        let model = self.model_name();
        let power_off = self.on_power_off.clone();
        let listener: NotifyListener = Arc::new(move |payload: &[u8]| {
            let message = String::from_utf8_lossy(payload);
            let message = protocol::strip_terminators(&message).to_string();
            debug!("notification from {model} at {address}: {message}");
            let power_off_seen = message
                .trim()
                .eq_ignore_ascii_case(protocol::POWER_OFF_NOTIFICATION);
            // Responses are only ever consumed on the engine thread; this
            // send is the thread-safe hand-off out of the transport thread.
            let _ = sender.send(message);
            if power_off_seen {
                power_off(&address);
            }
        });
        self.handle
            .subscribe(&self.rx_uuid, listener)
            .await
            .map_err(|error| {
                Error::connection(
                    &self.address,
                    format!("could not start notifications: {error}"),
                )
            })?;
        self.notifications_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        if !self.stop().await {
            debug!(
                "stop during disconnect was not acknowledged by {} at {}",
                self.model_name(),
                self.address
            );
        }
        if self.notifications_started.swap(false, Ordering::SeqCst) {
            if let Err(error) = self.handle.unsubscribe(&self.rx_uuid).await {
                warn!(
                    "error stopping notifications for {} at {}: {error}",
                    self.model_name(),
                    self.address
                );
            }
        }
        match self.handle.disconnect().await {
            Ok(()) => info!("disconnected from {} at {}", self.model_name(), self.address),
            Err(error) => warn!(
                "disconnect error for {} at {}: {error}",
                self.model_name(),
                self.address
            ),
        }
    }

    async fn reconnect_transport(&self) -> Result<()> {
        if self.handle.is_connected().await {
            return Ok(());
        }
        self.handle
            .connect(self.on_disconnect.clone())
            .await
            .map_err(|error| {
                Error::connection(&self.address, format!("reconnect failed: {error}"))
            })
    }

    async fn intensity1(&self, level: i32) -> bool {
        // The model name is validated on every write, so the lookup cannot
        // realistically miss.
        let Some(command) = self.primary_command() else {
            return false;
        };
        self.level_command(command, level, MAX_LEVEL).await
    }

    async fn intensity2(&self, level: i32) -> bool {
        let Some(command) = self.secondary_command() else {
            return true;
        };
        if command == AIR_LEVEL_COMMAND {
            // The air pump takes 0-5; callers stay on the 0-20 scale.
            let scaled = level.clamp(0, MAX_LEVEL) / 4;
            return self.level_command(command, scaled, AIR_LEVEL_MAX).await;
        }
        self.level_command(command, level, MAX_LEVEL).await
    }

    async fn stop(&self) -> bool {
        let primary = self.intensity1(0).await;
        let secondary = self.intensity2(0).await;
        primary && secondary
    }

    async fn rotate_change_direction(&self) -> bool {
        if !supports_rotation(&self.model_name()) {
            return true;
        }
        self.execute(protocol::ROTATE_CHANGE_COMMAND, COMMAND_TIMEOUT)
            .await
            .as_deref()
            == Some(protocol::ACK_RESPONSE)
    }

    async fn get_battery_level(&self) -> Option<u8> {
        let Some(response) = self.execute(protocol::BATTERY_COMMAND, COMMAND_TIMEOUT).await
        else {
            warn!(
                "failed to retrieve battery level for {} at {}",
                self.model_name(),
                self.address
            );
            return None;
        };
        let level = protocol::parse_battery(&response);
        if level.is_none() {
            warn!(
                "invalid battery response for {} at {}: {response}",
                self.model_name(),
                self.address
            );
        }
        level
    }

    async fn get_status(&self) -> Option<i32> {
        let Some(response) = self.execute(protocol::STATUS_COMMAND, COMMAND_TIMEOUT).await
        else {
            warn!(
                "failed to retrieve status for {} at {}",
                self.model_name(),
                self.address
            );
            return None;
        };
        let status = protocol::parse_status(&response);
        if status.is_none() {
            warn!(
                "invalid status response for {} at {}: {response}",
                self.model_name(),
                self.address
            );
        }
        status
    }

    async fn get_batch_number(&self) -> Option<String> {
        self.execute(protocol::BATCH_COMMAND, COMMAND_TIMEOUT).await
    }

    async fn get_device_type(&self) -> Option<String> {
        self.execute(protocol::DEVICE_TYPE_COMMAND, COMMAND_TIMEOUT)
            .await
    }

    async fn direct_command(&self, command: &str) -> Option<String> {
        self.execute(command, COMMAND_TIMEOUT).await
    }

    async fn power_off(&self) -> bool {
        self.execute(protocol::POWER_OFF_COMMAND, COMMAND_TIMEOUT)
            .await
            .as_deref()
            == Some(protocol::ACK_RESPONSE)
    }
}
