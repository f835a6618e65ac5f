//! Camera and shadow visibility: occluder versioning, the occluder raster, and the
//! potentially visible sets built from region occlusion summaries.

mod pvs;
mod raster;
mod shadow;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use vista_geom::{Aabb, Vec3};
use vista_mesh_cpu::OcclusionSummary;
use vista_runtime::Diagnostics;

use crate::config::OcclusionConfig;
use crate::region::{Region, VisibilityState, VisibilityStatus};

pub use raster::AngularOccluderRaster;
pub use shadow::{ShadowProjector, ShadowSets};

/// Per-frame frustum test against a region's bounding-box center.
pub trait Frustum {
    fn test(&self, center: Vec3) -> bool;
}

impl<F: Fn(Vec3) -> bool> Frustum for F {
    fn test(&self, center: Vec3) -> bool {
        self(center)
    }
}

/// Frustum that accepts everything.
pub struct Everything;

impl Frustum for Everything {
    fn test(&self, _: Vec3) -> bool {
        true
    }
}

/// Versions handed out by [`TerrainVisibility::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameVersions {
    pub frustum: u64,
    pub occluder: u64,
    pub position: u64,
}

struct CameraState {
    position: Vec3,
    /// Where the camera was when the occluder raster was last invalidated for movement.
    raster_anchor: Option<Vec3>,
    /// Where the camera was when the position version last advanced.
    resort_anchor: Option<Vec3>,
}

/// Versioned visibility state shared by the render thread and build workers.
pub struct TerrainVisibility {
    config: RwLock<OcclusionConfig>,
    occluder_version: AtomicU64,
    frustum_version: AtomicU64,
    position_version: AtomicU64,
    /// Bumped whenever any region's occlusion summary changes.
    input_version: AtomicU64,
    pvs_iteration: AtomicU64,
    /// Last camera iteration whose walk finished; 0 before the first one.
    completed_iteration: AtomicU64,
    /// Farthest squared region distance drawn into the current raster; -1 when empty.
    max_drawn_distance: AtomicI64,
    needs_iteration: AtomicBool,
    camera: Mutex<CameraState>,
    raster: Mutex<AngularOccluderRaster>,
    camera_set: Mutex<Vec<Arc<Region>>>,
    shadow: Mutex<ShadowSets>,
    diag: Arc<Diagnostics>,
}

impl TerrainVisibility {
    pub fn new(config: OcclusionConfig, diag: Arc<Diagnostics>) -> Self {
        let raster = AngularOccluderRaster::new(config.raster_width, config.raster_height);
        Self {
            config: RwLock::new(config),
            occluder_version: AtomicU64::new(1),
            frustum_version: AtomicU64::new(0),
            position_version: AtomicU64::new(1),
            input_version: AtomicU64::new(0),
            pvs_iteration: AtomicU64::new(0),
            completed_iteration: AtomicU64::new(0),
            max_drawn_distance: AtomicI64::new(-1),
            needs_iteration: AtomicBool::new(true),
            camera: Mutex::new(CameraState {
                position: Vec3::ZERO,
                raster_anchor: None,
                resort_anchor: None,
            }),
            raster: Mutex::new(raster),
            camera_set: Mutex::new(Vec::new()),
            shadow: Mutex::new(ShadowSets::default()),
            diag,
        }
    }

    /// Applies reloaded thresholds. Raster dimensions only change with a new renderer.
    pub fn set_config(&self, config: OcclusionConfig) {
        let enabled_changed = self.config.read().enabled != config.enabled;
        *self.config.write() = config;
        if enabled_changed {
            self.invalidate_occluders("occlusion toggled");
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    #[inline]
    pub fn occluder_version(&self) -> u64 {
        self.occluder_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frustum_version(&self) -> u64 {
        self.frustum_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn position_version(&self) -> u64 {
        self.position_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn input_version(&self) -> u64 {
        self.input_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn pvs_iteration(&self) -> u64 {
        self.pvs_iteration.load(Ordering::Acquire)
    }

    #[inline]
    pub fn completed_iteration(&self) -> u64 {
        self.completed_iteration.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_drawn_distance(&self) -> i64 {
        self.max_drawn_distance.load(Ordering::Acquire)
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera.lock().position
    }

    pub fn request_iteration(&self) {
        self.needs_iteration.store(true, Ordering::Release);
    }

    pub fn needs_iteration(&self) -> bool {
        self.needs_iteration.load(Ordering::Acquire)
    }

    /// Starts a frame: records the camera, bumps the frustum version, and advances the
    /// occluder and position versions when the camera moved far enough.
    pub fn begin_frame(&self, camera: Vec3) -> FrameVersions {
        let (move_threshold, resort_threshold) = {
            let c = self.config.read();
            (c.camera_move_threshold, c.resort_move_threshold)
        };
        let (moved, resort) = {
            let mut cam = self.camera.lock();
            cam.position = camera;
            let moved = match cam.raster_anchor {
                Some(a) => a.distance_sq(camera) > move_threshold * move_threshold,
                None => true,
            };
            if moved {
                cam.raster_anchor = Some(camera);
            }
            let resort = match cam.resort_anchor {
                Some(a) => a.distance_sq(camera) > resort_threshold * resort_threshold,
                None => true,
            };
            if resort {
                cam.resort_anchor = Some(camera);
            }
            (moved, resort)
        };
        if moved {
            self.invalidate_occluders("camera moved");
        }
        if resort {
            self.position_version.fetch_add(1, Ordering::AcqRel);
        }
        FrameVersions {
            frustum: self.frustum_version.fetch_add(1, Ordering::AcqRel) + 1,
            occluder: self.occluder_version(),
            position: self.position_version(),
        }
    }

    /// Forces the occluder raster to be redrawn before the next visibility test.
    pub fn invalidate_occluders(&self, why: &str) {
        let v = self.occluder_version.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_drawn_distance.store(-1, Ordering::Release);
        self.needs_iteration.store(true, Ordering::Release);
        self.diag.occluder_invalidations.inc();
        log::trace!(target: "visibility", "occluder version {v}: {why}");
    }

    /// Called by a build worker after publishing a summary that differs from the previous
    /// one. Records the region's new occlusion-input version and invalidates the raster
    /// when the change could alter what has been rasterized.
    pub fn on_occlusion_changed(&self, region: &Region, summary: &OcclusionSummary) {
        let v = self.input_version.fetch_add(1, Ordering::AcqRel) + 1;
        region.set_occlusion_input_version(v);
        self.needs_iteration.store(true, Ordering::Release);

        // Serializes with draw_occluders on the render thread.
        let _raster = self.raster.lock();
        let current = self.occluder_version();
        let drawn = region.camera.drawn_occluder_version() == current;
        if !(summary.can_occlude() || drawn) || !region.in_frustum() {
            return;
        }
        if drawn {
            if region.camera.drawn_input_version() != region.occlusion_input_version() {
                self.invalidate_occluders("drawn occluder changed");
            }
        } else if region.distance_sq() < self.max_drawn_distance() {
            self.invalidate_occluders("new occluder inside draw horizon");
        }
    }

    /// Raster test for one region, cached per occluder version. Visible regions have their
    /// occluders drawn into the raster.
    pub fn test_visibility(&self, region: &Region) -> bool {
        let enabled = self.is_enabled();
        let ov = self.occluder_version();
        let mut raster = self.raster.lock();
        if raster.version() != ov {
            raster.reset(self.camera_position(), ov);
        }
        if region.is_near() || !enabled {
            region.camera.store(ov, true);
            if enabled {
                self.draw_occluders(&mut raster, region, ov);
            }
            return true;
        }
        if let Some(v) = region.camera.cached(ov) {
            self.diag.raster_cache_hits.inc();
            return v;
        }
        self.diag.raster_tests.inc();
        let visible = raster.test(&region.aabb());
        region.camera.store(ov, visible);
        if visible {
            self.draw_occluders(&mut raster, region, ov);
        }
        visible
    }

    fn draw_occluders(&self, raster: &mut AngularOccluderRaster, region: &Region, ov: u64) {
        if region.camera.drawn_occluder_version() == ov {
            return;
        }
        let input = region.occlusion_input_version();
        let st = region.build_state();
        let boxes: Vec<Aabb> = st.occlusion.occluders(region.origin());
        for b in &boxes {
            raster.draw_box(b);
        }
        region.camera.mark_drawn(ov, input);
        if !boxes.is_empty() {
            self.max_drawn_distance
                .fetch_max(region.distance_sq(), Ordering::AcqRel);
        }
    }

    /// Whether a build of `region` could contribute to a frame: it is near, was found
    /// visible by the latest completed camera iteration (or the one in progress), or
    /// belongs to a shadow cascade.
    pub fn is_potentially_visible(&self, region: &Region) -> bool {
        if region.is_closed() {
            return false;
        }
        if region.is_near() {
            return true;
        }
        let done = self.completed_iteration();
        let reached = done != 0 && region.camera.pvs_iteration() >= done;
        if reached && region.camera.status() == VisibilityStatus::Visible {
            return true;
        }
        region.shadow.cascades(self.shadow.lock().version()) != 0
    }

    /// Regions found visible by the latest camera iteration, in discovery order.
    pub fn visible_regions(&self) -> Vec<Arc<Region>> {
        self.camera_set.lock().clone()
    }

    pub fn shadow_sets(&self) -> ShadowSets {
        self.shadow.lock().clone()
    }

    /// Drops every per-region result and the raster, as after losing the GPU context.
    pub fn reset(&self) {
        self.camera_set.lock().clear();
        self.shadow.lock().clear();
        {
            let mut cam = self.camera.lock();
            cam.raster_anchor = None;
            cam.resort_anchor = None;
        }
        self.position_version.fetch_add(1, Ordering::AcqRel);
        self.invalidate_occluders("reset");
    }

    pub fn raster_coverage(&self) -> f32 {
        self.raster.lock().coverage()
    }
}
