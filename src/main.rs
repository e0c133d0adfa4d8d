//! Citystream - headless streaming driver
//!
//! Streams a city container into an in-memory scene, driving the camera
//! along the scene's animation path (or hovering over the city when it has
//! none), and logs what every frame did.
//!
//! Usage: citystream --file city.bin [--config streaming.json] [--frames 600]
//!        [--tilt 60] [--distance 40] [--pick]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use citystream::core::types::{Mat4, Vec3};
use citystream::core::{logging, Error, Result, StreamingConfig};
use citystream::scene::{CitymodelScene, MemoryScene, SharedScene};
use citystream::streaming::TileStreamer;

struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
    frames: usize,
    tilt: f32,
    distance: f32,
    pick: bool,
}

fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(file) = parse_str_arg(&args, "--file") else {
        eprintln!("Usage: citystream --file <container> [--config <json>] [--frames N] [--tilt DEG] [--distance M] [--pick]");
        return ExitCode::FAILURE;
    };
    let args = Args {
        file: PathBuf::from(file),
        config: parse_str_arg(&args, "--config").map(PathBuf::from),
        frames: parse_usize_arg(&args, "--frames").unwrap_or(600),
        tilt: parse_f32_arg(&args, "--tilt").unwrap_or(60.0),
        distance: parse_f32_arg(&args, "--distance").unwrap_or(40.0),
        pick: args.iter().any(|a| a == "--pick"),
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => StreamingConfig::load(path)?,
        None => StreamingConfig::default(),
    };
    log::info!("Config: {:?}", config);

    let scene = SharedScene::new(MemoryScene::new());
    let start = Instant::now();
    let mut streamer = TileStreamer::open(&args.file, scene.clone(), config)?;
    log::info!(
        "Opened {:?} in {:.1}ms: {} tiles",
        args.file,
        start.elapsed().as_secs_f32() * 1000.0,
        streamer.tiles().len()
    );

    let path_len = streamer.citymodel().animation_path.len();
    let frames = if path_len == 0 { args.frames } else { args.frames.min(path_len) };
    if frames == 0 {
        return Err(Error::Config("nothing to stream: zero frames".into()));
    }

    let run_start = Instant::now();
    for frame in 0..frames {
        let camera = camera_for_frame(streamer.citymodel(), frame, args.tilt, args.distance);
        let stats = streamer.do_frame(&camera)?;
        log::debug!("Frame {}: {:?}", frame, stats);
        if frame % 100 == 0 {
            log::info!(
                "Frame {}: {} visible, {} resident, {} queued",
                frame,
                stats.visible,
                streamer.resident_count(),
                stats.queued
            );
        }

        if args.pick {
            let eye = camera.transform_point3(Vec3::ZERO);
            let forward = camera.transform_vector3(Vec3::NEG_Z);
            if let Some(hit) = streamer.pick(eye, forward) {
                log::debug!("Frame {}: looking at {:?}", frame, hit);
            }
        }
    }

    let elapsed = run_start.elapsed().as_secs_f32();
    log::info!(
        "{} frames in {:.2}s ({:.1} fps), {} tiles resident",
        frames,
        elapsed,
        frames as f32 / elapsed.max(f32::EPSILON),
        streamer.resident_count()
    );
    {
        let sink = scene.lock();
        log::info!(
            "Scene: {} objects, {} resources, {} mesh nodes in render list",
            sink.object_count(),
            sink.resource_count(),
            sink.render_list().len()
        );
    }

    streamer.shutdown();
    Ok(())
}

/// Chase camera along the animation path, or a fixed view over the city
/// center when the scene has no path.
fn camera_for_frame(citymodel: &CitymodelScene, frame: usize, tilt: f32, distance: f32) -> Mat4 {
    match citymodel.animation_path.key(frame) {
        Some(key) => key.follow_camera(tilt, distance),
        None => {
            let bounds = citymodel.bounds();
            let center = if bounds.is_empty() { Vec3::ZERO } else { bounds.center() };
            Mat4::from_translation(center)
                * Mat4::from_rotation_x(tilt.to_radians())
                * Mat4::from_translation(Vec3::new(0.0, 0.0, distance))
        }
    }
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
