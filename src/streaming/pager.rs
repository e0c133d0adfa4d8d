//! Background tile pager
//!
//! One worker thread decodes queued tiles in FIFO order. The queue lock is
//! released while a tile is decoding, so the main thread can keep adding,
//! cancelling and draining. Cancellation only reaches tiles that have not
//! started yet.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::core::error::Error;
use crate::core::types::Result;

use super::resources::TileResourceContainer;
use super::tile::TileId;

/// Decodes one tile's payload. Runs on the pager thread.
pub trait TileDecoder: Send + 'static {
    fn decode(&mut self, tile: TileId) -> Result<TileResourceContainer>;
}

/// A finished decode, successful or not.
#[derive(Debug)]
pub struct LoadedTile {
    pub tile: TileId,
    pub result: Result<TileResourceContainer>,
    /// Decode time in milliseconds
    pub load_time_ms: f32,
}

#[derive(Default)]
struct PagerState {
    queue: VecDeque<TileId>,
    delivered: Vec<LoadedTile>,
    in_flight: Option<TileId>,
    cancelled: bool,
}

struct Shared {
    state: Mutex<PagerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request/cancel/drain queue around a single decoding thread.
pub struct TilePager {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TilePager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("TilePager")
            .field("queued", &state.queue.len())
            .field("delivered", &state.delivered.len())
            .field("in_flight", &state.in_flight)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl TilePager {
    /// Spawn the worker thread around `decoder`.
    pub fn start<D: TileDecoder>(decoder: D) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PagerState::default()),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tile-pager".to_string())
            .spawn(move || run(worker_shared, decoder))
            .map_err(|e| Error::Worker(format!("failed to spawn pager thread: {}", e)))?;
        log::debug!("Tile pager started");

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue a batch of tiles, keeping their order.
    pub fn add(&self, tiles: &[TileId]) {
        if tiles.is_empty() {
            return;
        }
        let was_empty = {
            let mut state = self.shared.lock();
            let was_empty = state.queue.is_empty();
            state.queue.extend(tiles.iter().copied());
            was_empty
        };
        if was_empty {
            self.shared.wake.notify_one();
        }
    }

    /// Take tiles back out of the queue. Returns the ones that were still
    /// waiting; anything already decoding or delivered is unaffected.
    pub fn remove(&self, tiles: &[TileId]) -> Vec<TileId> {
        if tiles.is_empty() {
            return Vec::new();
        }
        let mut state = self.shared.lock();
        let mut removed = Vec::new();
        state.queue.retain(|tile| {
            if tiles.contains(tile) {
                removed.push(*tile);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Everything finished since the last call.
    pub fn get(&self) -> Vec<LoadedTile> {
        mem::take(&mut self.shared.lock().delivered)
    }

    /// Tiles still waiting for the worker. Advisory only.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// No queued tile and no decode in progress.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.queue.is_empty() && state.in_flight.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker. A decode in progress is finished first; queued
    /// tiles are dropped. Calling this again does nothing.
    pub fn terminate(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.shared.lock();
            state.cancelled = true;
            state.queue.clear();
        }
        self.shared.wake.notify_all();
        if worker.join().is_err() {
            log::error!("Tile pager worker panicked");
        }
        log::debug!("Tile pager terminated");
    }
}

impl Drop for TilePager {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run<D: TileDecoder>(shared: Arc<Shared>, mut decoder: D) {
    loop {
        let tile = {
            let mut state = shared.lock();
            loop {
                if state.cancelled {
                    return;
                }
                if let Some(tile) = state.queue.pop_front() {
                    state.in_flight = Some(tile);
                    break tile;
                }
                state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let start = Instant::now();
        let result = decoder.decode(tile);
        let load_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        match &result {
            Ok(_) => log::trace!("Decoded tile {:?} in {:.2}ms", tile, load_time_ms),
            Err(e) => log::error!("Failed to decode tile {:?}: {}", tile, e),
        }

        let mut state = shared.lock();
        state.in_flight = None;
        state.delivered.push(LoadedTile {
            tile,
            result,
            load_time_ms,
        });
    }
}
