//! Infrastructure layer: transport seam, Lovense protocol plumbing,
//! persistence and logging.

pub mod bluetooth;
pub mod cache;
pub mod logging;
pub mod transport;
