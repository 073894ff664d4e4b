//! Tileserver-rs library
//!
//! This module exposes the core functionality for testing and embedding.

pub mod cache_control;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod render;
pub mod routes;
pub mod sources;
pub mod state;
pub mod styles;
pub mod telemetry;
pub mod tilemath;
pub mod wmts;
pub mod worker;

// Re-export key types for convenience
pub use config::Config;
pub use error::{Result, TileServerError};
pub use sources::manager::SourceManager;
pub use sources::TileJson;
pub use state::AppState;
pub use styles::{StyleInfo, StyleManager};

// Re-export render types for testing
pub use render::overlay;
pub use render::{ImageFormat, StaticType};
