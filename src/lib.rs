//! Host-side control library for Lovense Bluetooth LE toys.
//!
//! Discovers toys, speaks the semicolon-terminated ASCII command protocol
//! over the vendor's two GATT characteristics, and exposes a synchronous
//! command-queue API on top of a background async engine, so plain
//! application code can drive many toys concurrently without touching an
//! async runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         ToyHub                           │
//! │   (registry, 50ms communication loop, battery polling,   │
//! │    reconnection and power-off lifecycle)                 │
//! └───────┬──────────────────┬───────────────────┬───────────┘
//!         │                  │                   │
//!         ▼                  ▼                   ▼
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │    Engine    │   │ ToyController │   │ LovenseConnector │
//! │ (sync↔async  │   │ (queue +      │   │ (discover +      │
//! │  bridge)     │   │  PatternPlayer)│  │  connect fan-out)│
//! └──────────────┘   └───────┬───────┘   └────────┬─────────┘
//!                            │                    │
//!                            ▼                    ▼
//!                     ┌────────────┐      ┌───────────────┐
//!                     │ LovenseToy │ ───▶ │  BLE transport│
//!                     │ (protocol  │      │  (trait seam) │
//!                     │  session)  │      └───────────────┘
//!                     └────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use toyhub::{HubConfig, ToyHub};
//!
//! # fn run(scanner: Arc<dyn toyhub::BleScanner>) -> toyhub::Result<()> {
//! let hub = ToyHub::new(scanner, HubConfig::default())?;
//! let mut toys = hub.discover_toys_blocking(Duration::from_secs(5))?;
//! toys[0].model_name = "Lush".to_string();
//! let controllers = hub.connect_toys_blocking(&toys, Duration::from_secs(30))?;
//! if let Ok(toy) = &controllers[0] {
//!     toy.intensity1(15, None);
//! }
//! hub.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod engine;
pub mod error;
pub mod hub;
pub mod infrastructure;

pub use domain::controller::{AckCallback, ToyController};
pub use domain::models::{
    model_commands, model_names, supports_rotation, validate_model_name, ModelCommands, ToyInfo,
    LOVENSE_MODELS, MAX_LEVEL, ROTATION_MODELS,
};
pub use domain::pattern::{PatternPlayer, PatternSegment, TickAction};
pub use engine::{Engine, RecurringTask};
pub use error::{EngineError, Error, Result, TransportError};
pub use hub::{
    BatteryConsumer, ErrorConsumer, HubConfig, ToyEventConsumer, ToyHub,
    BATTERY_UPDATE_INTERVAL, COMMUNICATION_FPS,
};
pub use infrastructure::bluetooth::connector::LovenseConnector;
pub use infrastructure::bluetooth::session::{LovenseToy, PowerOffListener, Toy};
pub use infrastructure::cache::ModelCache;
pub use infrastructure::logging::{init_logging, LogSettings, LoggingGuard};
pub use infrastructure::transport::{
    BleScanner, DeviceHandle, DisconnectListener, NotifyListener, ServiceInfo,
};
