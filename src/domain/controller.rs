//! High-level per-toy controller.
//!
//! Wraps a protocol session in a synchronous API. Commands are queued and
//! executed by the hub's communication loop; optional callbacks report each
//! command's outcome. The controller also owns the toy's [`PatternPlayer`]
//! and keeps manual commands and pattern playback from fighting each other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use crate::domain::models::{model_commands, supports_rotation, MAX_LEVEL};
use crate::domain::pattern::{PatternPlayer, PatternSegment, TickAction};
use crate::infrastructure::bluetooth::session::Toy;

/// Callback for commands that either succeed or fail.
pub type AckCallback = Box<dyn FnOnce(bool) + Send>;

/// A queued command: a lazy future that runs the toy call and delivers its
/// own callback when the hub drains the queue.
type QueuedCommand = BoxFuture<'static, ()>;

pub struct ToyController {
    toy: Arc<dyn Toy>,
    toy_id: String,
    queue: Mutex<VecDeque<QueuedCommand>>,
    player: Mutex<PatternPlayer>,
    connected: AtomicBool,
}

impl std::fmt::Debug for ToyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToyController")
            .field("toy_id", &self.toy_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ToyController {
    pub fn new(toy: Arc<dyn Toy>, toy_id: impl Into<String>) -> Self {
        let toy_id = toy_id.into();
        info!("controller initialized for {toy_id}");
        Self {
            toy,
            toy_id,
            queue: Mutex::new(VecDeque::new()),
            player: Mutex::new(PatternPlayer::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn toy_id(&self) -> &str {
        &self.toy_id
    }

    pub fn model_name(&self) -> String {
        self.toy.model_name()
    }

    /// While disconnected, commands queue instead of executing; they drain
    /// once the hub re-registers the controller.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.player.lock().unwrap().is_paused()
    }

    pub fn is_blocked(&self) -> bool {
        self.player.lock().unwrap().is_blocked()
    }

    /// Display names of the toy's capabilities; the second entry is `None`
    /// for single-capability models.
    pub fn intensity_names(&self) -> (String, Option<String>) {
        match model_commands(&self.toy.model_name()) {
            Some(commands) => (
                commands.primary_name.to_string(),
                commands.secondary_name.map(str::to_string),
            ),
            None => (String::new(), None),
        }
    }

    pub fn intensity_max_value(&self) -> i32 {
        MAX_LEVEL
    }

    pub fn change_rotate_direction_available(&self) -> bool {
        supports_rotation(&self.toy.model_name())
    }

    /// Set the primary capability level (0-20, clamped).
    ///
    /// Rejected immediately (callback gets `false`) while blocked. With a
    /// running pattern the pattern is paused first so the next tick does not
    /// overwrite the manual level.
    pub fn intensity1(&self, level: i32, callback: Option<AckCallback>) {
        if self.is_blocked() {
            if let Some(callback) = callback {
                callback(false);
            }
            return;
        }
        self.player.lock().unwrap().pause_for_manual();
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                let acknowledged = toy.intensity1(level).await;
                if let Some(callback) = callback {
                    callback(acknowledged);
                }
            }
            .boxed(),
        );
    }

    /// Set the secondary capability level; same contract as [`Self::intensity1`].
    pub fn intensity2(&self, level: i32, callback: Option<AckCallback>) {
        if self.is_blocked() {
            if let Some(callback) = callback {
                callback(false);
            }
            return;
        }
        self.player.lock().unwrap().pause_for_manual();
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                let acknowledged = toy.intensity2(level).await;
                if let Some(callback) = callback {
                    callback(acknowledged);
                }
            }
            .boxed(),
        );
    }

    /// Drive both capabilities to zero. Pauses a running pattern.
    pub fn stop(&self, callback: Option<AckCallback>) {
        self.player.lock().unwrap().pause_for_manual();
        self.enqueue_stop(callback);
    }

    /// Toggle rotation direction; a no-op success on models without rotation.
    pub fn change_rotate_direction(&self, callback: Option<AckCallback>) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                let acknowledged = toy.rotate_change_direction().await;
                if let Some(callback) = callback {
                    callback(acknowledged);
                }
            }
            .boxed(),
        );
    }

    pub fn get_battery_level(&self, callback: impl FnOnce(Option<u8>) + Send + 'static) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                callback(toy.get_battery_level().await);
            }
            .boxed(),
        );
    }

    pub fn get_status(&self, callback: impl FnOnce(Option<i32>) + Send + 'static) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                callback(toy.get_status().await);
            }
            .boxed(),
        );
    }

    pub fn get_batch_number(&self, callback: impl FnOnce(Option<String>) + Send + 'static) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                callback(toy.get_batch_number().await);
            }
            .boxed(),
        );
    }

    pub fn get_device_type(&self, callback: impl FnOnce(Option<String>) + Send + 'static) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                callback(toy.get_device_type().await);
            }
            .boxed(),
        );
    }

    /// Gather a human-readable summary (battery, status, batch, names) in one
    /// queued command.
    pub fn get_information(
        &self,
        callback: impl FnOnce(HashMap<String, String>) + Send + 'static,
    ) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                let battery = toy.get_battery_level().await;
                let status = toy.get_status().await;
                let batch = toy.get_batch_number().await;
                let device_type = toy.get_device_type().await;

                let mut info = HashMap::new();
                info.insert(
                    "Battery level".to_string(),
                    battery
                        .map(|level| format!("{level}%"))
                        .unwrap_or_else(|| "Unknown".to_string()),
                );
                info.insert(
                    "Status".to_string(),
                    status
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "Unknown".to_string()),
                );
                info.insert(
                    "Batch number".to_string(),
                    batch.unwrap_or_else(|| "Unknown".to_string()),
                );
                info.insert("Bluetooth Name".to_string(), toy.name().to_string());
                info.insert(
                    "Device type".to_string(),
                    device_type.unwrap_or_else(|| "Unknown".to_string()),
                );
                callback(info);
            }
            .boxed(),
        );
    }

    /// Send a raw protocol command and deliver the raw response.
    pub fn direct_command(
        &self,
        command: impl Into<String>,
        callback: impl FnOnce(Option<String>) + Send + 'static,
    ) {
        let command = command.into();
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                callback(toy.direct_command(&command).await);
            }
            .boxed(),
        );
    }

    /// Replace the playback pattern. An empty pattern clears playback and
    /// silences the toy. With `reset_time` false the elapsed position carries
    /// over to the new segment list.
    pub fn set_pattern(
        &self,
        pattern: Vec<PatternSegment>,
        wraparound: bool,
        reset_time: bool,
    ) {
        info!(
            "setting pattern for {} ({} segments, wraparound={wraparound})",
            self.toy_id,
            pattern.len()
        );
        let needs_stop = self
            .player
            .lock()
            .unwrap()
            .set_pattern(pattern, wraparound, reset_time);
        if needs_stop {
            self.enqueue_stop(None);
        }
    }

    /// Pause or resume pattern playback. Returns the new pause state.
    pub fn toggle_pause(&self) -> bool {
        info!("toggle pause for {}", self.toy_id);
        let now_paused = self.player.lock().unwrap().toggle_pause();
        if now_paused {
            self.enqueue_stop(None);
        }
        now_paused
    }

    /// Block or unblock the toy. Returns the new block state.
    pub fn toggle_block(&self) -> bool {
        info!("toggle block for {}", self.toy_id);
        let now_blocked = self.player.lock().unwrap().toggle_block();
        if now_blocked {
            self.enqueue_stop(None);
        }
        now_blocked
    }

    /// Elapsed pattern time in milliseconds (frozen while paused).
    pub fn get_pattern_time(&self) -> u64 {
        self.player.lock().unwrap().pattern_time()
    }

    /// Intensities the pattern prescribes at position `time_ms`.
    pub fn get_pattern_values(&self, time_ms: u64) -> (i32, i32) {
        self.player.lock().unwrap().values_at(time_ms)
    }

    // ------------------------------------------------------------------
    // Hub-facing internals
    // ------------------------------------------------------------------

    pub(crate) fn toy(&self) -> Arc<dyn Toy> {
        self.toy.clone()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// One communication frame, run on the engine thread: drain the queue,
    /// then advance the pattern. No lock is held across an await.
    pub(crate) async fn process_communication(&self) {
        if !self.connected() {
            return;
        }
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some(command) = next else { break };
            command.await;
        }

        let action = self.player.lock().unwrap().tick();
        match action {
            TickAction::Idle => {}
            TickAction::SendStop => {
                self.toy.stop().await;
            }
            TickAction::SetLevels {
                intensity1,
                intensity2,
            } => {
                if let Some(level) = intensity1 {
                    self.toy.intensity1(level).await;
                }
                if let Some(level) = intensity2 {
                    self.toy.intensity2(level).await;
                }
            }
        }
    }

    fn enqueue(&self, command: QueuedCommand) {
        self.queue.lock().unwrap().push_back(command);
    }

    /// Queue a stop without touching the pause state; used by the pattern
    /// transitions, which manage pause/block themselves.
    fn enqueue_stop(&self, callback: Option<AckCallback>) {
        let toy = self.toy.clone();
        self.enqueue(
            async move {
                let acknowledged = toy.stop().await;
                if let Some(callback) = callback {
                    callback(acknowledged);
                }
            }
            .boxed(),
        );
    }
}
