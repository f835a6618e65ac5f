use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use vista::config::{BuildsConfig, RegionsConfig, RendererConfig};
use vista::{Everything, FrameInput, FrameStats, Pass, RegionRenderer};
use vista_geom::Vec3;
use vista_gpu::HeadlessBackend;
use vista_mesh_cpu::{FaceCullingMesher, Mesher, OcclusionSummary, RegionMesh};
use vista_runtime::Diagnostics;
use vista_voxel::{Block, BlockClass, BlockTable, MemoryWorld, RegionCoord, VoxelSnapshot};

const STONE: Block = Block::new(1);
const WATER: Block = Block::new(5);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn table() -> BlockTable {
    BlockTable::new()
        .with("air", 0, BlockClass::Air)
        .with("stone", 1, BlockClass::Opaque)
        .with("water", 5, BlockClass::Translucent)
}

fn config() -> RendererConfig {
    RendererConfig {
        regions: RegionsConfig {
            view_radius: 2,
            retention_radius: 4,
            near_distance_sq: 2,
            min_region_y: 0,
            max_region_y: 1,
            index_bits_xz: 7,
            ..RegionsConfig::default()
        },
        builds: BuildsConfig {
            worker_threads: 2,
            ..BuildsConfig::default()
        },
        ..RendererConfig::default()
    }
}

/// Stone in every ry = 0 region within `r` columns of the origin.
fn stone_floor(r: i32) -> Arc<MemoryWorld> {
    let world = MemoryWorld::new(table());
    for rx in -r..=r {
        for rz in -r..=r {
            world.fill_region(RegionCoord::new(rx, 0, rz), STONE);
        }
    }
    Arc::new(world)
}

fn renderer_with(world: Arc<MemoryWorld>, mesher: Arc<dyn Mesher>) -> RegionRenderer<HeadlessBackend> {
    RegionRenderer::new(
        config(),
        world,
        mesher,
        HeadlessBackend::new(),
        Arc::new(Diagnostics::default()),
    )
    .unwrap()
}

fn renderer(world: Arc<MemoryWorld>) -> RegionRenderer<HeadlessBackend> {
    renderer_with(world, Arc::new(FaceCullingMesher))
}

fn wait_for_builds(r: &mut RegionRenderer<HeadlessBackend>) {
    let start = Instant::now();
    loop {
        let busy = r.builds_pending() > 0;
        r.upload();
        if !busy {
            return;
        }
        assert!(start.elapsed() < Duration::from_secs(10), "builds never finished");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn frame(r: &mut RegionRenderer<HeadlessBackend>, camera: Vec3) -> FrameStats {
    let stats = r.prepare_frame(FrameInput {
        camera,
        frustum: &Everything,
        shadow: None,
    });
    wait_for_builds(r);
    let list = r.draw_list();
    r.end_frame(list.frame);
    stats
}

/// Runs frames until two in a row queue nothing.
fn settle(r: &mut RegionRenderer<HeadlessBackend>, camera: Vec3) {
    let mut quiet = 0;
    for _ in 0..200 {
        let before = r.diagnostics().builds_queued.get();
        frame(r, camera);
        if r.diagnostics().builds_queued.get() == before {
            quiet += 1;
            if quiet == 2 {
                return;
            }
        } else {
            quiet = 0;
        }
    }
    panic!("pipeline never settled");
}

const ABOVE_FLOOR: Vec3 = Vec3::new(8.0, 24.0, 8.0);

#[test]
fn floor_below_the_camera_is_built_and_drawn() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);

    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    assert!(below.is_near());
    assert!(matches!(below.build_state().occlusion, OcclusionSummary::Full));
    assert!(!below.drawable(Pass::Solid).is_disposed());
    assert!(below.drawable(Pass::Translucent).is_disposed());

    let list = r.draw_list();
    assert!(list.solid.iter().any(|d| d.region == below.coord()));
    assert!(list.translucent.is_empty());
    r.end_frame(list.frame);
    assert_eq!(r.allocator().outstanding(), 0);
}

#[test]
fn identical_rebuild_leaves_versions_alone() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);

    let ov = r.visibility().occluder_version();
    let iv = r.visibility().input_version();
    let completed = r.diagnostics().builds_completed.get();

    assert!(r.schedule_rebuild(8, 8, 8, true));
    settle(&mut r, ABOVE_FLOOR);

    assert!(r.diagnostics().builds_completed.get() > completed);
    assert_eq!(r.visibility().occluder_version(), ov);
    assert_eq!(r.visibility().input_version(), iv);
}

#[test]
fn removing_a_drawn_occluder_invalidates_the_raster() {
    init_logs();
    let world = stone_floor(3);
    let mut r = renderer(Arc::clone(&world));
    settle(&mut r, ABOVE_FLOOR);
    let ov = r.visibility().occluder_version();

    world.fill_region(RegionCoord::new(0, 0, 0), Block::AIR);
    assert!(r.schedule_rebuild(8, 8, 8, true));
    settle(&mut r, ABOVE_FLOOR);

    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    assert!(matches!(below.build_state().occlusion, OcclusionSummary::Empty));
    assert!(below.drawable(Pass::Solid).is_disposed());
    assert!(r.visibility().occluder_version() > ov);
}

#[test]
fn still_camera_reuses_cached_raster_results() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);

    let tests = r.diagnostics().raster_tests.get();
    let hits = r.diagnostics().raster_cache_hits.get();
    frame(&mut r, ABOVE_FLOOR);
    assert_eq!(r.diagnostics().raster_tests.get(), tests);
    assert!(r.diagnostics().raster_cache_hits.get() > hits);
}

#[test]
fn teleport_closes_far_columns() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);
    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();

    let far = ABOVE_FLOOR + Vec3::new(1000.0, 0.0, 0.0);
    let stats = frame(&mut r, far);
    assert!(stats.position.scheduled_close > 0);
    assert!(stats.closed > 0);
    assert!(below.is_closed());
    assert!(!below.is_near());
    assert!(below.drawable(Pass::Solid).is_disposed());
    assert!(r.get_region_if_exists(below.coord()).is_none());
    assert!(r.diagnostics().columns_closed.get() > 0);

    settle(&mut r, far);
    assert_eq!(r.backend().live_buffers(), 0);
    assert_eq!(r.allocator().outstanding(), 0);
}

#[test]
fn retained_buffers_outlive_close_until_frame_end() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);

    let list = r.draw_list();
    let below = RegionCoord::new(0, 0, 0);
    let item = list.solid.iter().find(|d| d.region == below).copied().unwrap();

    r.prepare_frame(FrameInput {
        camera: ABOVE_FLOOR + Vec3::new(1000.0, 0.0, 0.0),
        frustum: &Everything,
        shadow: None,
    });
    wait_for_builds(&mut r);
    assert!(r.backend().is_live(item.buffer));

    r.end_frame(list.frame);
    assert!(!r.backend().is_live(item.buffer));
    assert!(!r.buffers().release(item.buffer, list.frame));
}

struct SlowMesher(Duration);

impl Mesher for SlowMesher {
    fn mesh(&self, snap: &VoxelSnapshot, table: &BlockTable) -> RegionMesh {
        std::thread::sleep(self.0);
        FaceCullingMesher.mesh(snap, table)
    }
}

#[test]
fn closing_cancels_queued_and_running_builds() {
    init_logs();
    let mut r = renderer_with(stone_floor(3), Arc::new(SlowMesher(Duration::from_millis(20))));
    r.prepare_frame(FrameInput {
        camera: ABOVE_FLOOR,
        frustum: &Everything,
        shadow: None,
    });
    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    assert!(below.is_queued());

    let far = ABOVE_FLOOR + Vec3::new(1000.0, 0.0, 0.0);
    frame(&mut r, far);
    settle(&mut r, far);

    assert!(below.is_closed());
    assert!(below.drawable(Pass::Solid).is_disposed());
    assert!(r.diagnostics().builds_cancelled.get() > 0);
    assert_eq!(r.backend().live_buffers(), 0);
    assert_eq!(r.allocator().outstanding(), 0);
}

/// Records how many meshes of the same region run at once.
#[derive(Default)]
struct OverlapMesher {
    active: Mutex<HashMap<RegionCoord, usize>>,
    max_overlap: AtomicUsize,
}

impl Mesher for OverlapMesher {
    fn mesh(&self, snap: &VoxelSnapshot, table: &BlockTable) -> RegionMesh {
        {
            let mut active = self.active.lock();
            let n = active.entry(snap.origin).or_default();
            *n += 1;
            self.max_overlap.fetch_max(*n, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(3));
        let mesh = FaceCullingMesher.mesh(snap, table);
        *self.active.lock().entry(snap.origin).or_default() -= 1;
        mesh
    }
}

#[test]
fn a_region_never_builds_twice_at_once() {
    init_logs();
    let mesher = Arc::new(OverlapMesher::default());
    let mut r = renderer_with(stone_floor(3), mesher.clone());
    settle(&mut r, ABOVE_FLOOR);
    let completed = r.diagnostics().builds_completed.get();

    for _ in 0..40 {
        r.schedule_rebuild(8, 8, 8, true);
        r.prepare_frame(FrameInput {
            camera: ABOVE_FLOOR,
            frustum: &Everything,
            shadow: None,
        });
        r.upload();
        std::thread::sleep(Duration::from_millis(1));
    }
    settle(&mut r, ABOVE_FLOOR);

    assert_eq!(mesher.max_overlap.load(Ordering::SeqCst), 1);
    assert!(r.diagnostics().builds_completed.get() >= completed + 2);
    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    assert!(!below.is_queued());
    assert!(!below.drawable(Pass::Solid).is_disposed());
}

#[test]
fn moving_camera_resorts_translucent_geometry() {
    init_logs();
    let world = MemoryWorld::new(table());
    world.fill_region(RegionCoord::new(0, 0, 0), WATER);
    let mut r = renderer(Arc::new(world));

    settle(&mut r, Vec3::new(1.0, 20.0, 1.0));
    let water = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    assert!(water.build_state().translucent.is_some());
    let first = water.drawable(Pass::Translucent).buffer().unwrap();
    let builds = r.diagnostics().builds_completed.get();

    settle(&mut r, Vec3::new(15.0, 20.0, 15.0));
    assert!(r.diagnostics().resorts.get() > 0);
    assert_eq!(r.diagnostics().builds_completed.get(), builds);
    assert_eq!(
        water.resort_position_version(),
        r.visibility().position_version()
    );
    let resorted = water.drawable(Pass::Translucent).buffer().unwrap();
    assert_ne!(first, resorted);
    assert!(!r.backend().is_live(first));
}

#[test]
fn reset_rebuilds_everything() {
    init_logs();
    let mut r = renderer(stone_floor(3));
    settle(&mut r, ABOVE_FLOOR);
    let below = r.get_region_if_exists(RegionCoord::new(0, 0, 0)).unwrap();
    let generation = below.build_state().generation;

    r.reset();
    assert!(below.drawable(Pass::Solid).is_disposed());
    assert!(below.needs_rebuild());
    assert!(r.buffers().is_empty());
    assert_eq!(r.allocator().outstanding(), 0);
    assert!(r.visibility().visible_regions().is_empty());

    settle(&mut r, ABOVE_FLOOR);
    assert!(below.build_state().generation > generation);
    assert!(!below.drawable(Pass::Solid).is_disposed());
}
