use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{Receiver, unbounded};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use vista::config::RendererConfig;
use vista::renderer::{FrameInput, RegionRenderer};
use vista::terrain::{NoiseTerrain, default_block_table};
use vista::visibility::ShadowProjector;
use vista_geom::{Aabb, Vec3};
use vista_gpu::HeadlessBackend;
use vista_mesh_cpu::FaceCullingMesher;
use vista_runtime::Diagnostics;
use vista_voxel::BlockTable;

#[derive(Parser, Debug)]
#[command(name = "vista", about = "Headless region build and visibility demo")]
struct Args {
    /// Renderer config (TOML). Reloaded on change when --watch is set.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block table (TOML). Defaults to the built-in terrain blocks.
    #[arg(long)]
    blocks: Option<PathBuf>,

    #[arg(long, default_value_t = 1337)]
    seed: i32,

    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Camera speed in blocks per frame along +x.
    #[arg(long, default_value_t = 0.5)]
    speed: f32,

    /// Frame at which the camera jumps 1000 blocks away (0 disables).
    #[arg(long, default_value_t = 0)]
    teleport_at: u64,

    #[arg(long, default_value_t = false)]
    watch: bool,

    /// off, error, warn, info, debug or trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn watch_config(path: PathBuf) -> Receiver<()> {
    let (tx, rx) = unbounded::<()>();
    std::thread::spawn(move || {
        use notify::{EventKind, RecursiveMode, Watcher};
        match notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => {
                        let _ = tx.send(());
                    }
                    _ => {}
                }
            }
        }) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(path.as_path(), RecursiveMode::NonRecursive) {
                    log::warn!("cannot watch {}: {e}", path.display());
                    return;
                }
                loop {
                    std::thread::sleep(Duration::from_secs(3600));
                }
            }
            Err(e) => log::warn!("config watcher unavailable: {e}"),
        }
    });
    rx
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|e| format!("bad --log-level {:?}: {e}", args.log_level))?;
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let config = match &args.config {
        Some(p) => RendererConfig::from_path(p)?,
        None => RendererConfig::default(),
    };
    let table = match &args.blocks {
        Some(p) => BlockTable::from_path(p)?,
        None => default_block_table(),
    };
    let reload_rx = match (&args.config, args.watch) {
        (Some(p), true) => Some(watch_config(p.clone())),
        _ => None,
    };

    let diag = Arc::new(Diagnostics::default());
    let terrain = Arc::new(NoiseTerrain::new(args.seed, table));
    let mut renderer = RegionRenderer::new(
        config,
        terrain.clone(),
        Arc::new(FaceCullingMesher),
        HeadlessBackend::new(),
        Arc::clone(&diag),
    )?;

    let forward = Vec3::new(1.0, 0.0, 0.0);
    let sun = |_: usize, b: &Aabb| b.max.y > 0.0;
    let mut camera = Vec3::new(8.0, terrain.height_at(8, 8) as f32 + 12.0, 8.0);

    for frame in 1..=args.frames {
        if let Some(rx) = &reload_rx {
            if rx.try_iter().count() > 0 {
                if let Some(p) = &args.config {
                    match RendererConfig::from_path(p) {
                        Ok(cfg) => renderer.apply_config(cfg),
                        Err(e) => log::warn!("config reload failed: {e}"),
                    }
                }
            }
        }
        if args.teleport_at != 0 && frame == args.teleport_at {
            camera = camera + Vec3::new(1000.0, 0.0, 0.0);
            log::info!("teleported to {camera:?}");
        }
        camera = camera + forward * args.speed;

        let eye = camera;
        let frustum = move |c: Vec3| (c - eye).dot(forward) > -24.0;
        let stats = renderer.prepare_frame(FrameInput {
            camera,
            frustum: &frustum,
            shadow: Some(&sun as &dyn ShadowProjector),
        });
        renderer.upload();
        let list = renderer.draw_list();
        renderer.end_frame(list.frame);

        if frame % 60 == 0 {
            log::info!("{}", renderer.debug_summary());
            log::debug!(
                "frame {frame}: {} solid, {} translucent draws; {stats:?}",
                list.solid.len(),
                list.translucent.len()
            );
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    log::info!("{:?}", diag.snapshot());
    Ok(())
}
