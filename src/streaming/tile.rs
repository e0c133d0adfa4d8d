//! Tiles and their residency state machine
//!
//! ```text
//! Unrequested -> QueuedForLoad -> (Loading) -> Resident -> PendingEviction -> Unrequested
//!                      |                          ^              |
//!                      +-- cancelled -------------|--------------+-- visible again
//! ```
//!
//! `Loading` is only entered when a cancellation arrives too late: the pager
//! had already started decoding, so the tile will still be delivered.

use crate::math::Aabb;
use crate::scene::citymodel::TileDescriptor;

use super::resources::TileResourceContainer;

/// Position of a tile in the scene's tile list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TileState {
    #[default]
    Unrequested,
    QueuedForLoad,
    /// Decode already started; a delivery is on its way.
    Loading,
    Resident,
    PendingEviction,
}

/// What a visibility update asks of the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileAction {
    None,
    /// Submit the tile to the pager.
    RequestLoad,
    /// Try to take the tile back out of the pager queue.
    CancelLoad,
    /// Add the tile to the eviction set.
    ScheduleEviction,
    /// Remove the tile from the eviction set.
    CancelEviction,
}

/// One streamable unit of the city.
#[derive(Debug)]
pub struct Tile {
    descriptor: TileDescriptor,
    state: TileState,
    countdown: u32,
    resources: Option<TileResourceContainer>,
}

impl Tile {
    pub fn new(descriptor: TileDescriptor) -> Self {
        Self {
            descriptor,
            state: TileState::Unrequested,
            countdown: 0,
            resources: None,
        }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.descriptor.bounds
    }

    /// Chunk holding this tile's payload.
    pub fn chunk_index(&self) -> u32 {
        self.descriptor.index
    }

    pub fn descriptor(&self) -> &TileDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Frames left before eviction; only meaningful while `PendingEviction`.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn resources(&self) -> Option<&TileResourceContainer> {
        self.resources.as_ref()
    }

    /// Whether the tile's geometry is in the scene (resident or about to be
    /// evicted).
    pub fn is_attached(&self) -> bool {
        matches!(self.state, TileState::Resident | TileState::PendingEviction)
    }

    /// The tile passed the visibility test this frame.
    pub fn mark_visible(&mut self) -> TileAction {
        match self.state {
            TileState::Unrequested => {
                self.state = TileState::QueuedForLoad;
                TileAction::RequestLoad
            }
            TileState::PendingEviction => {
                self.state = TileState::Resident;
                self.countdown = 0;
                TileAction::CancelEviction
            }
            TileState::QueuedForLoad | TileState::Loading | TileState::Resident => TileAction::None,
        }
    }

    /// The tile failed the visibility test this frame.
    pub fn mark_invisible(&mut self, eviction_countdown: u32) -> TileAction {
        match self.state {
            TileState::QueuedForLoad => TileAction::CancelLoad,
            TileState::Resident => {
                self.state = TileState::PendingEviction;
                self.countdown = eviction_countdown;
                TileAction::ScheduleEviction
            }
            TileState::Unrequested | TileState::Loading | TileState::PendingEviction => {
                TileAction::None
            }
        }
    }

    /// Outcome of a [`TileAction::CancelLoad`]: whether the pager still had
    /// the tile queued.
    pub fn cancel_result(&mut self, removed: bool) {
        if self.state != TileState::QueuedForLoad {
            return;
        }
        self.state = if removed {
            TileState::Unrequested
        } else {
            TileState::Loading
        };
    }

    /// Attach a delivered payload. A delivery the tile was not waiting for
    /// is handed back so the caller can tear it down.
    pub fn attach(&mut self, container: TileResourceContainer) -> Result<(), TileResourceContainer> {
        match self.state {
            TileState::QueuedForLoad | TileState::Loading => {
                self.state = TileState::Resident;
                self.resources = Some(container);
                Ok(())
            }
            _ => Err(container),
        }
    }

    /// The pager could not decode this tile.
    pub fn load_failed(&mut self) {
        if matches!(self.state, TileState::QueuedForLoad | TileState::Loading) {
            self.state = TileState::Unrequested;
        }
    }

    /// Count one frame towards eviction. Returns the payload to destroy
    /// once the countdown runs out.
    pub fn tick_eviction(&mut self) -> Option<TileResourceContainer> {
        if self.state != TileState::PendingEviction {
            return None;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return None;
        }
        self.state = TileState::Unrequested;
        self.resources.take()
    }

    /// Drop back to `Unrequested`, handing out whatever is attached.
    pub fn reset(&mut self) -> Option<TileResourceContainer> {
        self.state = TileState::Unrequested;
        self.countdown = 0;
        self.resources.take()
    }

    pub(crate) fn resources_mut(&mut self) -> Option<&mut TileResourceContainer> {
        self.resources.as_mut()
    }
}
