use std::fmt::Write as _;
use std::sync::Arc;

use rayon::ThreadPoolBuildError;
use vista_geom::Vec3;
use vista_gpu::{BufferAllocator, GpuBackend, GpuBufferId, GpuBufferTable};
use vista_mesh_cpu::Mesher;
use vista_runtime::{Diagnostics, UploadQueue, resolve_worker_threads};
use vista_voxel::{REGION_SIZE, RegionCoord, VoxelSource};

use crate::build::{BuildScheduler, UploadTarget};
use crate::config::RendererConfig;
use crate::region::{Pass, Region, VisibilityState, VisibilityStatus};
use crate::resort;
use crate::storage::{PositionUpdate, RegionStorage, Thresholds};
use crate::visibility::{FrameVersions, Frustum, ShadowProjector, TerrainVisibility};

/// What the host supplies each frame.
pub struct FrameInput<'a> {
    pub camera: Vec3,
    pub frustum: &'a dyn Frustum,
    pub shadow: Option<&'a dyn ShadowProjector>,
}

/// Summary of one [`RegionRenderer::prepare_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub versions: FrameVersions,
    pub position: PositionUpdate,
    pub created: usize,
    pub closed: usize,
    pub visible: usize,
    pub queued: usize,
    pub resorts: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawItem {
    pub region: RegionCoord,
    pub buffer: GpuBufferId,
    pub vertex_count: u32,
}

/// Geometry to draw this frame. Every buffer listed is retained until
/// [`RegionRenderer::end_frame`] is called with `frame`.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    pub frame: u64,
    /// Front to back.
    pub solid: Vec<DrawItem>,
    /// Back to front.
    pub translucent: Vec<DrawItem>,
    /// Solid geometry per shadow cascade.
    pub shadow: Vec<Vec<DrawItem>>,
}

impl DrawList {
    pub fn is_empty(&self) -> bool {
        self.solid.is_empty() && self.translucent.is_empty() && self.shadow.iter().all(Vec::is_empty)
    }
}

/// Facade the host drives from its render thread.
pub struct RegionRenderer<B: GpuBackend + 'static> {
    config: RendererConfig,
    backend: B,
    storage: Arc<RegionStorage>,
    visibility: Arc<TerrainVisibility>,
    allocator: Arc<BufferAllocator>,
    buffers: Arc<GpuBufferTable>,
    uploads: UploadQueue<UploadTarget>,
    scheduler: BuildScheduler,
    diag: Arc<Diagnostics>,
    frame: u64,
}

impl<B: GpuBackend + 'static> RegionRenderer<B> {
    pub fn new(
        config: RendererConfig,
        source: Arc<dyn VoxelSource>,
        mesher: Arc<dyn Mesher>,
        backend: B,
        diag: Arc<Diagnostics>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let config = config.validated();
        let storage = Arc::new(RegionStorage::new(&config.regions, Arc::clone(&diag)));
        let visibility = Arc::new(TerrainVisibility::new(
            config.occlusion.clone(),
            Arc::clone(&diag),
        ));
        let allocator = Arc::new(BufferAllocator::new(config.allocator.clone()));
        let buffers = Arc::new(GpuBufferTable::new());
        let uploads = UploadQueue::new();
        let threads = resolve_worker_threads(config.builds.worker_threads);
        let scheduler = BuildScheduler::new(
            threads,
            config.builds.reprioritize_delta,
            source,
            mesher,
            Arc::clone(&storage),
            Arc::clone(&visibility),
            Arc::clone(&allocator),
            Arc::clone(&buffers),
            uploads.sender(),
            Arc::clone(&diag),
        )?;
        log::info!(
            target: "build",
            "region renderer up: view {} / retention {} regions, {threads} workers",
            config.regions.view_radius,
            config.regions.retention_radius
        );
        Ok(Self {
            config,
            backend,
            storage,
            visibility,
            allocator,
            buffers,
            uploads,
            scheduler,
            diag,
            frame: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Applies reloaded thresholds without restarting workers. Storage layout, raster size
    /// and allocator settings keep their startup values.
    pub fn apply_config(&mut self, config: RendererConfig) {
        let config = config.validated();
        self.storage.set_thresholds(Thresholds::from(&config.regions));
        self.visibility.set_config(config.occlusion.clone());
        self.config.regions.view_radius = config.regions.view_radius;
        self.config.regions.retention_radius = config.regions.retention_radius;
        self.config.regions.near_distance_sq = config.regions.near_distance_sq;
        self.config.builds.max_snapshots_per_frame = config.builds.max_snapshots_per_frame;
        self.config.occlusion = config.occlusion;
        self.config.shadow = config.shadow;
        log::info!(target: "storage", "renderer config reloaded");
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diag
    }

    pub fn storage(&self) -> &RegionStorage {
        &self.storage
    }

    pub fn visibility(&self) -> &TerrainVisibility {
        &self.visibility
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    pub fn buffers(&self) -> &GpuBufferTable {
        &self.buffers
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Runs the per-frame passes: region creation, position update, closes, camera and
    /// shadow visibility, resort and build scheduling.
    pub fn prepare_frame(&mut self, input: FrameInput<'_>) -> FrameStats {
        self.frame += 1;
        let versions = self.visibility.begin_frame(input.camera);
        let created = self.storage.ensure_regions_around(input.camera);
        let position = self.storage.update_region_position_and_visibility(
            input.camera,
            input.frustum,
            versions.frustum,
        );
        let closed = self.storage.close_regions_on_render_thread(&self.buffers);

        let visible = self.visibility.iterate_camera(&self.storage, input.camera);
        let shadow = self.visibility.iterate_shadow(
            &self.storage,
            input.camera,
            &self.config.shadow.cascade_radii,
            input.shadow,
        );

        self.scheduler.drain_requeued();
        let resorts = resort::schedule(&visible, versions.position, &self.scheduler);

        let mut candidates: Vec<Arc<Region>> = visible.clone();
        for i in 0..shadow.cascade_count() {
            candidates.extend(shadow.cascade(i).iter().cloned());
        }
        candidates.sort_by_key(|r| (!r.is_important(), r.distance_sq(), Arc::as_ptr(r) as usize));
        candidates.dedup_by(|a, b| Arc::ptr_eq(a, b));
        let queued = self
            .scheduler
            .schedule(&candidates, self.config.builds.max_snapshots_per_frame);

        let stats = FrameStats {
            frame: self.frame,
            versions,
            position,
            created,
            closed,
            visible: visible.len(),
            queued,
            resorts,
        };
        log::debug!(target: "build", "frame {}: {stats:?}", self.frame);
        stats
    }

    /// Position pass on its own, for hosts that drive the passes individually.
    pub fn update_region_position_and_visibility(
        &self,
        camera: Vec3,
        frustum: &dyn Frustum,
    ) -> PositionUpdate {
        let v = self.visibility.begin_frame(camera);
        self.storage
            .update_region_position_and_visibility(camera, frustum, v.frustum)
    }

    pub fn close_regions_on_render_thread(&self) -> usize {
        self.storage.close_regions_on_render_thread(&self.buffers)
    }

    pub fn get_or_create_region(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        self.storage.get_or_create_region(coord)
    }

    pub fn get_region_if_exists(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        self.storage.get_region_if_exists(coord)
    }

    /// Block `(x, y, z)` changed. Marks its region dirty, plus the neighbors whose border
    /// layer holds the block. Returns false if no region holds the block.
    pub fn schedule_rebuild(&self, x: i32, y: i32, z: i32, urgent: bool) -> bool {
        let coord = RegionCoord::from_block(x, y, z);
        let Some(region) = self.storage.get_region_if_exists(coord) else {
            return false;
        };
        self.mark_for_rebuild(&region, urgent);

        let last = REGION_SIZE as i32 - 1;
        let side = |v: i32| match v & last {
            0 => -1,
            l if l == last => 1,
            _ => 0,
        };
        for (dx, dy, dz) in [(side(x), 0, 0), (0, side(y), 0), (0, 0, side(z))] {
            if (dx, dy, dz) == (0, 0, 0) {
                continue;
            }
            if let Some(n) = self.storage.get_region_if_exists(coord.offset(dx, dy, dz)) {
                self.mark_for_rebuild(&n, false);
            }
        }
        true
    }

    fn mark_for_rebuild(&self, region: &Region, urgent: bool) {
        region.mark_dirty(urgent);
        if region.camera.status() != VisibilityStatus::Unevaluated {
            self.visibility.request_iteration();
        }
    }

    /// Drains the upload queue and deletes buffers that are disposed and unretained.
    /// Returns whether anything happened.
    pub fn upload(&mut self) -> bool {
        let ran = self.uploads.drain(&mut self.backend);
        let collected = self.buffers.collect(&mut self.backend);
        if ran > 0 {
            log::trace!(target: "upload", "{ran} uploads, {collected} buffers deleted");
        }
        ran > 0 || collected > 0
    }

    fn item(region: &Region, pass: Pass) -> Option<DrawItem> {
        let d = region.drawable(pass);
        if d.is_disposed() {
            return None;
        }
        let (buffer, vertex_count) = d.draw_args()?;
        Some(DrawItem {
            region: region.coord(),
            buffer,
            vertex_count,
        })
    }

    /// Drawables of the regions found visible this frame. Every listed buffer is retained
    /// against the frame number.
    pub fn draw_list(&self) -> DrawList {
        let owner = self.frame;
        let mut visible = self.visibility.visible_regions();
        visible.sort_by_key(|r| r.distance_sq());

        let mut list = DrawList {
            frame: owner,
            ..DrawList::default()
        };
        let retain = |item: DrawItem| self.buffers.retain(item.buffer, owner).then_some(item);
        list.solid = visible
            .iter()
            .filter_map(|r| Self::item(r, Pass::Solid))
            .filter_map(retain)
            .collect();
        list.translucent = visible
            .iter()
            .rev()
            .filter_map(|r| Self::item(r, Pass::Translucent))
            .filter_map(retain)
            .collect();
        let shadow = self.visibility.shadow_sets();
        list.shadow = (0..shadow.cascade_count())
            .map(|i| {
                shadow
                    .cascade(i)
                    .iter()
                    .filter_map(|r| Self::item(r, Pass::Solid))
                    .filter_map(retain)
                    .collect()
            })
            .collect();
        list
    }

    /// Releases the retentions taken by [`draw_list`](Self::draw_list) for `frame` and
    /// deletes what that frees. Returns the number of buffers deleted.
    pub fn end_frame(&mut self, frame: u64) -> usize {
        self.buffers.release_owner(frame);
        self.buffers.collect(&mut self.backend)
    }

    /// Recovers from a lost GPU context: pending uploads are dropped, every build is
    /// invalidated and re-queued, buffer ids are forgotten and staging memory reclaimed.
    pub fn reset(&mut self) {
        let dropped = self.uploads.clear();
        let regions = self.storage.regions();
        for r in &regions {
            r.reset_for_context_loss();
        }
        let forgotten = self.buffers.forget_all();
        let reclaimed = self.allocator.force_release_all();
        self.visibility.reset();
        log::info!(
            target: "upload",
            "context reset: {} regions, {dropped} uploads dropped, {forgotten} buffer ids forgotten, {reclaimed} allocations reclaimed",
            regions.len()
        );
    }

    /// No build queued or running and no upload waiting.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle() && self.uploads.pending() == 0
    }

    /// Builds queued or running on the worker pool.
    pub fn builds_pending(&self) -> usize {
        let (queued, in_flight) = self.scheduler.queue_debug_counts();
        queued + in_flight
    }

    pub fn debug_summary(&self) -> String {
        let (queued, in_flight) = self.scheduler.queue_debug_counts();
        let d = self.diag.snapshot();
        let mut s = String::new();
        let _ = write!(
            s,
            "regions {} in {} columns | builds q{queued} f{in_flight} done {} | visible {} | occ v{} horizon {} | uploads {} pending {} | alloc {} KiB",
            self.storage.region_count(),
            self.storage.column_count(),
            d.builds_completed,
            self.visibility.visible_regions().len(),
            self.visibility.occluder_version(),
            self.visibility.max_drawn_distance(),
            d.uploads,
            self.uploads.pending(),
            self.allocator.in_use_bytes() / 1024,
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vista_gpu::{DrawableGeometry, HeadlessBackend};

    #[test]
    fn only_live_geometry_is_listed() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let region = Region::new(RegionCoord::new(0, 0, 0));
        let id = gpu.create_buffer(&[0; 36]);
        table.register(id);
        region.replace_drawable(Pass::Solid, DrawableGeometry::new(id, 1), &table);

        let item = RegionRenderer::<HeadlessBackend>::item(&region, Pass::Solid).unwrap();
        assert_eq!(item.buffer, id);
        assert_eq!(item.vertex_count, 1);
        assert!(RegionRenderer::<HeadlessBackend>::item(&region, Pass::Translucent).is_none());
    }
}
