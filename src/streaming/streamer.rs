//! Per-frame tile streaming
//!
//! Each frame the frustum is moved to the camera, the culling tree sorts
//! tiles into visible and invisible, and the pager is fed with the tiles to
//! load or cancel. Finished tiles are drained and attached; tiles that have
//! been invisible for `eviction_countdown` frames are torn down.
//!
//! The whole pass runs under the scene lock. The pager thread takes the same
//! lock for each scene mutation while decoding, never while it holds the
//! pager queue lock, so the two cannot deadlock.

use std::collections::BTreeSet;
use std::path::Path;

use crate::container::reader::Reader;
use crate::core::config::StreamingConfig;
use crate::core::error::Error;
use crate::core::types::{Mat4, Result, Vec3};
use crate::math::{Frustum, Ray, ALL_PLANES};
use crate::scene::citymodel::{CitymodelScene, TileDescriptor};
use crate::scene::sink::{SceneSink, SharedScene};

use super::culling::CullingNode;
use super::pager::{TileDecoder, TilePager};
use super::resources::TileResourceContainer;
use super::tile::{Tile, TileAction, TileId, TileState};

/// What one frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub visible: usize,
    /// Tiles submitted to the pager
    pub requested: usize,
    /// Tiles taken back out of the pager queue
    pub cancelled: usize,
    /// Tiles drained from the pager
    pub delivered: usize,
    /// Tiles torn down
    pub evicted: usize,
    /// Pager queue depth after the frame
    pub queued: usize,
}

/// Pager-side decoder: owns the reader once the scene chunk is decoded.
struct ReaderDecoder<S: SceneSink> {
    reader: Reader<S>,
    tiles: Vec<TileDescriptor>,
}

impl<S: SceneSink + 'static> TileDecoder for ReaderDecoder<S> {
    fn decode(&mut self, tile: TileId) -> Result<TileResourceContainer> {
        let descriptor = self
            .tiles
            .get(tile.0 as usize)
            .copied()
            .ok_or_else(|| Error::Worker(format!("no tile {:?} in scene", tile)))?;
        self.reader.read_tile(&descriptor)
    }
}

/// Streams the tiles of one container into a scene sink.
pub struct TileStreamer<S: SceneSink + 'static> {
    scene: SharedScene<S>,
    config: StreamingConfig,
    frustum: Frustum,
    citymodel: CitymodelScene,
    global: Option<TileResourceContainer>,
    tiles: Vec<Tile>,
    culling_tree: Option<CullingNode>,
    pending_eviction: BTreeSet<TileId>,
    pager: TilePager,
    frame: u64,
}

impl<S: SceneSink + 'static> TileStreamer<S> {
    /// Open a container, decode its scene chunk and start the pager.
    pub fn open(path: impl AsRef<Path>, scene: SharedScene<S>, config: StreamingConfig) -> Result<Self> {
        Self::open_with_decoder(path, scene, config, Ok)
    }

    /// `open`, with the pager's decoder built by `wrap` around the reader.
    fn open_with_decoder<D: TileDecoder>(
        path: impl AsRef<Path>,
        scene: SharedScene<S>,
        config: StreamingConfig,
        wrap: impl FnOnce(ReaderDecoder<S>) -> Result<D>,
    ) -> Result<Self> {
        config.validate()?;

        let effects = scene.with(|s| {
            config
                .effects
                .iter()
                .map(|name| s.create_effect(name))
                .collect::<Vec<_>>()
        });
        let mut reader = Reader::open(path, scene.clone(), effects)?;

        let mut global = TileResourceContainer::new();
        let citymodel = match reader.read_scene(&mut global) {
            Ok(citymodel) => citymodel,
            Err(e) => {
                scene.with(|s| global.destroy(s));
                return Err(e);
            }
        };
        scene.with(|s| global.publish(s));

        let tiles: Vec<Tile> = citymodel.tiles.iter().copied().map(Tile::new).collect();
        let leaves: Vec<(TileId, _)> = tiles
            .iter()
            .enumerate()
            .map(|(i, tile)| (TileId(i as u32), *tile.bounds()))
            .collect();
        let culling_tree = CullingNode::build(&leaves);
        if let Some(tree) = &culling_tree {
            log::info!(
                "Culling tree over {} tiles, depth {}, bounds {:?}",
                tree.tile_count(),
                tree.depth(),
                tree.bounds()
            );
        }

        let started = wrap(ReaderDecoder {
            reader,
            tiles: citymodel.tiles.clone(),
        })
        .and_then(TilePager::start);
        let pager = match started {
            Ok(pager) => pager,
            Err(e) => {
                scene.with(|s| global.destroy(s));
                return Err(e);
            }
        };

        Ok(Self {
            scene,
            frustum: Frustum::from_config(&config.frustum),
            config,
            citymodel,
            global: Some(global),
            tiles,
            culling_tree,
            pending_eviction: BTreeSet::new(),
            pager,
            frame: 0,
        })
    }

    /// Run one frame with the camera at `camera_to_world`.
    ///
    /// A tile that failed to decode is fatal and comes back as `Err` once
    /// the rest of the frame's bookkeeping is done.
    pub fn do_frame(&mut self, camera_to_world: &Mat4) -> Result<FrameStats> {
        self.frame += 1;
        self.frustum.transform(camera_to_world);

        let scene = self.scene.clone();
        let mut sink = scene.lock();
        let mut stats = FrameStats::default();

        let mut to_request = Vec::new();
        let mut to_cancel = Vec::new();
        if let Some(tree) = &self.culling_tree {
            let tiles = &mut self.tiles;
            let pending = &mut self.pending_eviction;
            let countdown = self.config.eviction_countdown;
            tree.compute_visible(ALL_PLANES, &self.frustum, &mut |id, visible| {
                let Some(tile) = tiles.get_mut(id.0 as usize) else {
                    return;
                };
                let action = if visible {
                    stats.visible += 1;
                    tile.mark_visible()
                } else {
                    tile.mark_invisible(countdown)
                };
                match action {
                    TileAction::RequestLoad => to_request.push(id),
                    TileAction::CancelLoad => to_cancel.push(id),
                    TileAction::ScheduleEviction => {
                        pending.insert(id);
                    }
                    TileAction::CancelEviction => {
                        pending.remove(&id);
                    }
                    TileAction::None => {}
                }
            });
        }

        self.pager.add(&to_request);
        stats.requested = to_request.len();

        let removed = self.pager.remove(&to_cancel);
        stats.cancelled = removed.len();
        for id in &to_cancel {
            if let Some(tile) = self.tiles.get_mut(id.0 as usize) {
                tile.cancel_result(removed.contains(id));
            }
        }

        let mut failure = None;
        for loaded in self.pager.get() {
            stats.delivered += 1;
            let Some(tile) = self.tiles.get_mut(loaded.tile.0 as usize) else {
                log::warn!("Delivery for unknown tile {:?} ignored", loaded.tile);
                if let Ok(container) = loaded.result {
                    container.destroy(&mut *sink);
                }
                continue;
            };
            match loaded.result {
                Ok(container) => match tile.attach(container) {
                    Ok(()) => {
                        if let Some(resources) = tile.resources_mut() {
                            resources.publish(&mut *sink);
                        }
                        log::debug!("Tile {:?} resident ({:.1}ms)", loaded.tile, loaded.load_time_ms);
                    }
                    Err(container) => {
                        log::warn!(
                            "Tile {:?} delivered in state {:?}, discarding",
                            loaded.tile,
                            tile.state()
                        );
                        container.destroy(&mut *sink);
                    }
                },
                Err(e) => {
                    tile.load_failed();
                    failure.get_or_insert(e);
                }
            }
        }

        let tiles = &mut self.tiles;
        self.pending_eviction.retain(|id| {
            let Some(tile) = tiles.get_mut(id.0 as usize) else {
                return false;
            };
            if let Some(container) = tile.tick_eviction() {
                container.destroy(&mut *sink);
                stats.evicted += 1;
                log::debug!("Tile {:?} evicted", id);
            }
            tile.state() == TileState::PendingEviction
        });

        stats.queued = self.pager.queued_count();
        drop(sink);

        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// No tile is queued, decoding or waiting to be drained.
    pub fn is_settled(&self) -> bool {
        self.pager.is_idle()
            && self
                .tiles
                .iter()
                .all(|t| !matches!(t.state(), TileState::QueuedForLoad | TileState::Loading))
    }

    /// Nearest point where a ray from `origin` along `direction` hits
    /// attached tile geometry.
    pub fn pick(&self, origin: Vec3, direction: Vec3) -> Option<Vec3> {
        let ray = Ray::new(origin, direction);
        let mut candidates = Vec::new();
        self.culling_tree.as_ref()?.tiles_along_ray(&ray, &mut candidates);

        let mut nearest = f32::MAX;
        let mut hit = false;
        for id in candidates {
            if let Some(resources) = self.tiles.get(id.0 as usize).and_then(Tile::resources) {
                hit |= resources.compute_intersection(&ray, &mut nearest);
            }
        }
        hit.then(|| ray.at(nearest))
    }

    /// Stop the pager and tear down every tile and the scene chunk's
    /// objects. Safe to call more than once.
    pub fn shutdown(&mut self) {
        // The worker may need the scene lock to finish its decode
        self.pager.terminate();

        let mut sink = self.scene.lock();
        let mut destroyed = 0;
        for tile in &mut self.tiles {
            if let Some(container) = tile.reset() {
                container.destroy(&mut *sink);
                destroyed += 1;
            }
        }
        for loaded in self.pager.get() {
            if let Ok(container) = loaded.result {
                container.destroy(&mut *sink);
            }
        }
        self.pending_eviction.clear();
        if let Some(global) = self.global.take() {
            global.destroy(&mut *sink);
            log::info!("Tile streamer shut down ({} tiles released)", destroyed);
        }
    }

    pub fn citymodel(&self) -> &CitymodelScene {
        &self.citymodel
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.0 as usize)
    }

    /// Tiles whose geometry is attached.
    pub fn resident_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_attached()).count()
    }

    pub fn pending_eviction_count(&self) -> usize {
        self.pending_eviction.len()
    }

    /// Objects created while decoding the scene chunk.
    pub fn global_resources(&self) -> Option<&TileResourceContainer> {
        self.global.as_ref()
    }

    pub fn culling_tree(&self) -> Option<&CullingNode> {
        self.culling_tree.as_ref()
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn scene(&self) -> &SharedScene<S> {
        &self.scene
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }
}

impl<S: SceneSink + 'static> std::fmt::Debug for TileStreamer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStreamer")
            .field("tiles", &self.tiles.len())
            .field("resident", &self.resident_count())
            .field("pending_eviction", &self.pending_eviction.len())
            .field("frame", &self.frame)
            .field("pager", &self.pager)
            .finish()
    }
}

impl<S: SceneSink + 'static> Drop for TileStreamer<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::container::fixture::{quad_city, quad_tile_chunk, scene_chunk, write_container, RecordWriter};
    use crate::container::object::ObjectTag;
    use crate::core::error::FormatError;
    use crate::math::Aabb;
    use crate::scene::memory::MemoryScene;
    use crate::scene::sink::SceneObjectKind;
    use std::sync::mpsc::{self, Receiver, Sender};

    /// Camera 50m above `target`, looking straight down.
    fn above(target: Vec3) -> Mat4 {
        Mat4::from_translation(target + Vec3::new(0.0, 0.0, 50.0))
    }

    /// Looking straight up, away from every tile.
    fn away() -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, 50.0)) * Mat4::from_rotation_x(std::f32::consts::PI)
    }

    fn config(countdown: u32) -> StreamingConfig {
        StreamingConfig {
            eviction_countdown: countdown,
            ..Default::default()
        }
    }

    /// Run frames with the same camera until the streamer settles.
    fn settle(streamer: &mut TileStreamer<MemoryScene>, camera: &Mat4) -> FrameStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut total = FrameStats::default();
        loop {
            let stats = streamer.do_frame(camera).unwrap();
            total.requested += stats.requested;
            total.delivered += stats.delivered;
            if streamer.is_settled() || Instant::now() > deadline {
                return total;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Announces each tile and holds its decode until released.
    struct GatedDecoder {
        inner: ReaderDecoder<MemoryScene>,
        started: Sender<TileId>,
        release: Receiver<()>,
    }

    impl TileDecoder for GatedDecoder {
        fn decode(&mut self, tile: TileId) -> Result<TileResourceContainer> {
            let _ = self.started.send(tile);
            let _ = self.release.recv();
            self.inner.decode(tile)
        }
    }

    fn open_gated(
        file: &tempfile::NamedTempFile,
        shared: &SharedScene<MemoryScene>,
    ) -> (TileStreamer<MemoryScene>, Receiver<TileId>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let streamer = TileStreamer::open_with_decoder(file.path(), shared.clone(), config(3), |inner| {
            Ok(GatedDecoder {
                inner,
                started: started_tx,
                release: release_rx,
            })
        })
        .unwrap();
        (streamer, started_rx, release_tx)
    }

    /// Frames with the same camera until something is delivered.
    fn until_delivered(streamer: &mut TileStreamer<MemoryScene>, camera: &Mat4) -> FrameStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = streamer.do_frame(camera).unwrap();
            if stats.delivered > 0 {
                return stats;
            }
            assert!(Instant::now() < deadline, "nothing delivered");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_late_cancel_is_attached_then_evictable() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let (mut streamer, started, release) = open_gated(&file, &shared);

        assert_eq!(streamer.do_frame(&above(Vec3::new(0.5, 0.5, 0.0))).unwrap().requested, 1);
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), TileId(0));

        // Already decoding, so the cancel cannot take it back
        let stats = streamer.do_frame(&away()).unwrap();
        assert_eq!(stats.cancelled, 0);
        assert_eq!(streamer.tile(TileId(0)).unwrap().state(), TileState::Loading);

        release.send(()).unwrap();
        until_delivered(&mut streamer, &away());
        let tile = streamer.tile(TileId(0)).unwrap();
        assert_eq!(tile.state(), TileState::Resident);
        let (mesh, _) = tile.resources().unwrap().mesh_nodes()[0];
        assert!(shared.lock().in_render_list(mesh));

        streamer.do_frame(&away()).unwrap();
        assert_eq!(streamer.tile(TileId(0)).unwrap().state(), TileState::PendingEviction);
        assert_eq!(streamer.pending_eviction_count(), 1);
    }

    #[test]
    fn test_cancel_before_decode_starts() {
        let file = quad_city(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)]);
        let shared = SharedScene::new(MemoryScene::new());
        let (mut streamer, started, release) = open_gated(&file, &shared);

        assert_eq!(streamer.do_frame(&above(Vec3::new(1.5, 0.5, 0.0))).unwrap().requested, 2);
        let first = started.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = if first == TileId(0) { TileId(1) } else { TileId(0) };

        let stats = streamer.do_frame(&away()).unwrap();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(streamer.tile(second).unwrap().state(), TileState::Unrequested);

        release.send(()).unwrap();
        until_delivered(&mut streamer, &away());
        assert_eq!(streamer.tile(first).unwrap().state(), TileState::Resident);
        assert!(streamer.is_settled());
    }

    #[test]
    fn test_unexpected_delivery_is_destroyed() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared.clone(), config(3)).unwrap();
        let (objects, resources) = {
            let guard = shared.lock();
            (guard.object_count(), guard.resource_count())
        };

        // Nobody asked for this tile
        streamer.pager.add(&[TileId(0)]);
        let stats = until_delivered(&mut streamer, &away());
        assert_eq!(stats.delivered, 1);

        let tile = streamer.tile(TileId(0)).unwrap();
        assert_eq!(tile.state(), TileState::Unrequested);
        assert!(tile.resources().is_none());
        let guard = shared.lock();
        assert_eq!(guard.object_count(), objects);
        assert_eq!(guard.resource_count(), resources);
        assert!(guard.render_list().is_empty());
        assert_eq!(guard.order_violations(), 0);
    }

    #[test]
    fn test_delivery_for_unknown_tile_ignored() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared, config(3)).unwrap();

        streamer.pager.add(&[TileId(42)]);
        let stats = until_delivered(&mut streamer, &away());
        assert_eq!(stats.delivered, 1);
        assert_eq!(streamer.resident_count(), 0);
    }

    #[test]
    fn test_pager_failure_releases_scene_objects() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let result = TileStreamer::open_with_decoder(file.path(), shared.clone(), config(3), |_| {
            Err::<ReaderDecoder<MemoryScene>, _>(Error::Worker("no pager thread".into()))
        });
        assert!(matches!(result, Err(Error::Worker(_))));

        let guard = shared.lock();
        assert_eq!(guard.object_count(), 0);
        assert_eq!(guard.resource_count(), 0);
    }

    #[test]
    fn test_single_tile_end_to_end() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared.clone(), config(30)).unwrap();

        let citymodel = streamer.citymodel();
        assert_eq!(citymodel.materials.len(), 2);
        assert_eq!(citymodel.tiles.len(), 1);
        assert!(citymodel.carsor.is_none());
        assert!(citymodel.animation_path.is_empty());
        assert!(citymodel.names.is_empty());

        let total = settle(&mut streamer, &above(Vec3::new(0.5, 0.5, 0.0)));
        assert_eq!(total.requested, 1);
        assert_eq!(total.delivered, 1);

        let tile = streamer.tile(TileId(0)).unwrap();
        assert_eq!(tile.state(), TileState::Resident);
        let resources = tile.resources().unwrap();
        assert_eq!(resources.geometry_nodes().len(), 1);
        assert_eq!(resources.mesh_nodes().len(), 1);

        let guard = shared.lock();
        let (mesh, _) = resources.mesh_nodes()[0];
        assert!(guard.in_render_list(mesh));
        assert_eq!(guard.render_list().len(), 1);
        let setup = guard.object(mesh).unwrap().mesh.unwrap();
        assert_eq!(setup.appearance, streamer.citymodel().materials[0].appearance);
        assert_eq!(guard.count_of(SceneObjectKind::Appearance), 2);
    }

    #[test]
    fn test_invisible_tiles_are_not_requested() {
        let file = quad_city(&[Vec3::ZERO, Vec3::new(500.0, 0.0, 0.0)]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared, config(30)).unwrap();

        let stats = streamer.do_frame(&above(Vec3::new(0.5, 0.5, 0.0))).unwrap();
        assert_eq!(stats.visible, 1);
        assert_eq!(stats.requested, 1);
        assert_eq!(streamer.tile(TileId(1)).unwrap().state(), TileState::Unrequested);
    }

    #[test]
    fn test_eviction_after_countdown() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared.clone(), config(3)).unwrap();
        settle(&mut streamer, &above(Vec3::new(0.5, 0.5, 0.0)));
        assert_eq!(streamer.resident_count(), 1);

        let first = streamer.do_frame(&away()).unwrap();
        assert_eq!(first.evicted, 0);
        assert_eq!(streamer.tile(TileId(0)).unwrap().state(), TileState::PendingEviction);
        assert_eq!(streamer.do_frame(&away()).unwrap().evicted, 0);
        assert_eq!(streamer.do_frame(&away()).unwrap().evicted, 1);

        let tile = streamer.tile(TileId(0)).unwrap();
        assert_eq!(tile.state(), TileState::Unrequested);
        assert!(tile.resources().is_none());
        assert_eq!(streamer.pending_eviction_count(), 0);

        let guard = shared.lock();
        assert!(guard.render_list().is_empty());
        assert_eq!(guard.count_of(SceneObjectKind::MeshNode), 0);
        assert_eq!(guard.count_of(SceneObjectKind::GeometryBinding), 0);
        // Global materials survive
        assert_eq!(guard.count_of(SceneObjectKind::Appearance), 2);
        assert_eq!(guard.order_violations(), 0);
    }

    #[test]
    fn test_visible_again_before_countdown() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared, config(3)).unwrap();
        let camera = above(Vec3::new(0.5, 0.5, 0.0));
        settle(&mut streamer, &camera);

        streamer.do_frame(&away()).unwrap();
        streamer.do_frame(&away()).unwrap();
        let back = streamer.do_frame(&camera).unwrap();
        assert_eq!(back.requested, 0);
        assert_eq!(streamer.tile(TileId(0)).unwrap().state(), TileState::Resident);

        // Countdown starts over
        for _ in 0..2 {
            assert_eq!(streamer.do_frame(&away()).unwrap().evicted, 0);
        }
        assert!(streamer.tile(TileId(0)).unwrap().resources().is_some());
        assert_eq!(streamer.do_frame(&away()).unwrap().evicted, 1);
    }

    #[test]
    fn test_pick_hits_resident_geometry() {
        let file = quad_city(&[Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared, config(30)).unwrap();
        assert!(streamer.pick(Vec3::new(0.5, 0.5, 10.0), Vec3::NEG_Z).is_none());

        settle(&mut streamer, &above(Vec3::new(2.0, 0.5, 0.0)));
        let hit = streamer.pick(Vec3::new(3.5, 0.5, 10.0), Vec3::NEG_Z).unwrap();
        assert!(hit.abs_diff_eq(Vec3::new(3.5, 0.5, 0.0), 1e-4));
        assert!(streamer.pick(Vec3::new(2.0, 0.5, 10.0), Vec3::NEG_Z).is_none());
    }

    #[test]
    fn test_failed_tile_is_fatal() {
        let mut broken = RecordWriter::new();
        broken.u32(77);
        let tiles = [Aabb::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0))];
        let file = write_container(&[scene_chunk(2, &tiles, &[]), broken.into_bytes()]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared, config(30)).unwrap();

        let camera = above(Vec3::new(0.5, 0.5, 0.0));
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match streamer.do_frame(&camera) {
                Err(e) => break e,
                Ok(_) if Instant::now() > deadline => panic!("tile never delivered"),
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
            }
        };
        assert!(matches!(err, Error::Format(FormatError::UnknownTag(77))));
        assert_eq!(streamer.tile(TileId(0)).unwrap().state(), TileState::Unrequested);
    }

    #[test]
    fn test_scene_chunk_must_be_scene() {
        let mut w = RecordWriter::new();
        w.node(ObjectTag::Node, Vec3::ZERO, 0);
        let file = write_container(&[w.into_bytes(), quad_tile_chunk(Vec3::ZERO)]);
        let shared = SharedScene::new(MemoryScene::new());
        let err = TileStreamer::open(file.path(), shared.clone(), config(30)).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UnexpectedObject { expected: "scene", .. })
        ));
        assert_eq!(shared.lock().object_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let file = quad_city(&[Vec3::ZERO]);
        let shared = SharedScene::new(MemoryScene::new());
        assert!(matches!(
            TileStreamer::open(file.path(), shared, config(0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let file = quad_city(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)]);
        let shared = SharedScene::new(MemoryScene::new());
        let mut streamer = TileStreamer::open(file.path(), shared.clone(), config(30)).unwrap();
        settle(&mut streamer, &above(Vec3::new(1.5, 0.5, 0.0)));
        assert_eq!(streamer.resident_count(), 2);

        streamer.shutdown();
        streamer.shutdown();
        let guard = shared.lock();
        assert_eq!(guard.object_count(), 0);
        assert_eq!(guard.resource_count(), 0);
        assert!(guard.render_list().is_empty());
        assert_eq!(guard.order_violations(), 0);
    }

    #[test]
    fn test_drop_while_loading() {
        let origins: Vec<Vec3> = (0..16).map(|i| Vec3::new(i as f32 * 0.5, 0.0, 0.0)).collect();
        let file = quad_city(&origins);
        let shared = SharedScene::new(MemoryScene::new());
        {
            let mut streamer = TileStreamer::open(file.path(), shared.clone(), config(30)).unwrap();
            streamer.do_frame(&above(Vec3::new(4.0, 0.5, 0.0))).unwrap();
        }
        let guard = shared.lock();
        assert_eq!(guard.object_count(), 0);
        assert_eq!(guard.resource_count(), 0);
    }
}
