//! Bluetooth Module
//!
//! Lovense-specific BLE plumbing on top of the transport seam.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    LovenseConnector                      │
//! │   (discovery + concurrent connect, produces sessions)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!              ┌────────┴────────┐
//!              ▼                 ▼
//!       ┌────────────┐    ┌──────────┐
//!       │ LovenseToy │    │ Protocol │
//!       │            │    │          │
//!       │ - command  │    │ - UUIDs  │
//!       │   exchange │    │ - framing│
//!       │ - notify   │    │ - parsing│
//!       │   handling │    │          │
//!       └────────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - command keywords, framing and the vendor UUID rule
//! - [`session`] - per-toy request/response session and the [`session::Toy`] trait
//! - [`connector`] - discovery and connection fan-out

pub mod connector;
pub mod protocol;
pub mod session;

pub use connector::LovenseConnector;
pub use session::{LovenseToy, Toy};
