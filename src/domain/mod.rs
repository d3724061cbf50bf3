//! Domain layer: toy catalog, pattern playback and the per-toy controller.

pub mod controller;
pub mod models;
pub mod pattern;
