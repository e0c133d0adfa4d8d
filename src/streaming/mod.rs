//! Tile residency: visibility culling, background paging and eviction

pub mod culling;
pub mod pager;
pub mod resources;
pub mod streamer;
pub mod tile;

pub use culling::CullingNode;
pub use pager::{LoadedTile, TileDecoder, TilePager};
pub use resources::TileResourceContainer;
pub use streamer::{FrameStats, TileStreamer};
pub use tile::{Tile, TileAction, TileId, TileState};
