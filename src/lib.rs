//! Stable photo sync
//!
//! Compression, signed-URL upload and background retry of horse photos and
//! routine step evidence for the stable management clients.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
