//! # pcmbridge-core
//!
//! Core types, configuration, and error handling for the pcmbridge audio bridge.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BridgeConfig, FileConfig, OutputKind, StreamingConfig};
pub use error::{Error, Result};
pub use types::*;
