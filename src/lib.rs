//! Citystream - tile streaming for large tiled 3D city models
//!
//! A city is stored as one container file: chunk 0 describes the scene
//! (materials, tile bounds, animation path) and every other chunk holds the
//! geometry of one tile. [`TileStreamer`] culls the tiles against the camera
//! frustum each frame, decodes visible ones on a background thread and
//! evicts tiles that stay out of view.

pub mod container;
pub mod core;
pub mod math;
pub mod scene;
pub mod streaming;

pub use crate::core::{Error, FormatError, Result, StreamingConfig};
pub use crate::scene::{MemoryScene, SceneSink, SharedScene};
pub use crate::streaming::{FrameStats, TileStreamer};
