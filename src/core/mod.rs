//! Core engine types and utilities

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{FrustumConfig, StreamingConfig};
pub use error::{Error, FormatError};
pub use types::*;
