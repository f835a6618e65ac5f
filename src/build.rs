use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rayon::ThreadPoolBuildError;
use vista_gpu::{AllocError, BufferAllocator, DrawableGeometry, GpuBackend, GpuBufferTable, NativeBuffer};
use vista_mesh_cpu::{
    Face, MeshBuild, Mesher, OcclusionScratch, TranslucentSortState, compute_occlusion,
};
use vista_runtime::{Diagnostics, PoolTask, Priority, PriorityPool, UploadSender};
use vista_voxel::{RegionCoord, RegionInput, VoxelSnapshot, VoxelSource};

use crate::region::{BuildInput, Pass, Region, RegionBuildState};
use crate::resort;
use crate::storage::RegionStorage;
use crate::visibility::TerrainVisibility;

/// Render-thread side of an upload: the device plus the id table it shares with drawables.
pub type UploadTarget = dyn GpuBackend;

/// Scratch owned by one worker slot and reused for every task it runs.
pub struct WorkerContext {
    pub slot: usize,
    pub scratch: OcclusionScratch,
}

impl WorkerContext {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            scratch: OcclusionScratch::default(),
        }
    }
}

/// Everything a build task needs besides its region.
pub(crate) struct BuildShared {
    pub source: Arc<dyn VoxelSource>,
    pub mesher: Arc<dyn Mesher>,
    pub storage: Arc<RegionStorage>,
    pub visibility: Arc<TerrainVisibility>,
    pub allocator: Arc<BufferAllocator>,
    pub buffers: Arc<GpuBufferTable>,
    pub uploads: UploadSender<UploadTarget>,
    pub requeue: Sender<Arc<Region>>,
    pub diag: Arc<Diagnostics>,
}

impl BuildShared {
    /// Voxel data for all six neighbors is loaded. Neighbors outside the stored vertical
    /// range never hold a build back.
    fn neighbors_loaded(&self, coord: RegionCoord) -> bool {
        Face::ALL.iter().all(|f| {
            let (dx, dy, dz) = f.delta();
            let n = coord.offset(dx, dy, dz);
            !self.storage.contains_y(n.ry) || self.source.is_region_loaded(n)
        })
    }
}

/// Staged geometry for one pass, waiting for the render thread.
pub(crate) struct StagedPass {
    pub buffer: NativeBuffer,
    pub vertex_count: u32,
}

impl StagedPass {
    pub fn stage(allocator: &BufferAllocator, mesh: &MeshBuild) -> Result<Option<Self>, AllocError> {
        if mesh.is_empty() {
            return Ok(None);
        }
        let buffer = allocator.allocate_with(&mesh.to_bytes())?;
        Ok(Some(Self {
            buffer,
            vertex_count: mesh.vertex_count() as u32,
        }))
    }

    pub fn discard(self, allocator: &BufferAllocator) {
        let mut buffer = self.buffer;
        allocator.release(&mut buffer);
    }

    /// Creates the device buffer, frees the staging block and installs the geometry.
    pub fn install(
        staged: Option<Self>,
        gpu: &mut UploadTarget,
        region: &Region,
        pass: Pass,
        allocator: &BufferAllocator,
        buffers: &GpuBufferTable,
    ) {
        let next = match staged {
            Some(mut s) => {
                let id = gpu.create_buffer(s.buffer.as_slice());
                buffers.register(id);
                allocator.release(&mut s.buffer);
                DrawableGeometry::new(id, s.vertex_count)
            }
            None => DrawableGeometry::DISPOSED,
        };
        region.replace_drawable(pass, next, buffers);
    }
}

pub(crate) struct BuildTask {
    pub region: Arc<Region>,
    pub shared: Arc<BuildShared>,
}

impl PoolTask<WorkerContext> for BuildTask {
    fn priority(&self) -> Priority {
        Priority::new(self.region.is_important(), self.region.distance_sq())
    }

    fn run(&mut self, ctx: &mut WorkerContext) {
        let epoch = self.region.epoch();
        match self.region.take_input() {
            BuildInput::Idle => {}
            BuildInput::Invalid => {
                self.shared.diag.builds_cancelled.inc();
                log::trace!(target: "build", "{:?}: invalid input, dropped", self.region.coord());
            }
            BuildInput::Empty => self.install_empty(epoch),
            BuildInput::ResortOnly => resort::run(&self.region, &self.shared, epoch),
            BuildInput::Pending(snap) => self.build(ctx, snap, epoch),
        }
        self.finish();
    }

    fn panicked(&mut self) {
        self.shared.diag.builds_failed.inc();
        self.region.mark_dirty(false);
        self.finish();
    }
}

impl BuildTask {
    fn finish(&self) {
        self.region.finish_queued();
        if self.region.has_pending_input() && !self.region.is_closed() {
            let _ = self.shared.requeue.send(Arc::clone(&self.region));
        }
    }

    fn install_empty(&self, epoch: u64) {
        let r = &self.region;
        let sh = &self.shared;
        if r.is_cancelled(epoch) {
            sh.diag.builds_cancelled.inc();
            return;
        }
        let prev = r.build_state();
        let next = Arc::new(RegionBuildState {
            generation: prev.generation + 1,
            ..RegionBuildState::unbuilt()
        });
        let prev = r.swap_build_state(Arc::clone(&next));
        if prev.occlusion != next.occlusion {
            sh.visibility.on_occlusion_changed(r, &next.occlusion);
        }
        r.clear_important();
        sh.diag.builds_empty.inc();
        log::trace!(target: "build", "{:?}: empty", r.coord());

        let region = Arc::clone(r);
        let allocator = Arc::clone(&sh.allocator);
        let buffers = Arc::clone(&sh.buffers);
        sh.uploads.push(Box::new(move |gpu: &mut UploadTarget| {
            if region.is_cancelled(epoch) {
                return;
            }
            StagedPass::install(None, gpu, &region, Pass::Solid, &allocator, &buffers);
            StagedPass::install(None, gpu, &region, Pass::Translucent, &allocator, &buffers);
        }));
    }

    fn build(&self, ctx: &mut WorkerContext, snap: Box<VoxelSnapshot>, epoch: u64) {
        let r = &self.region;
        let sh = &self.shared;
        if r.is_cancelled(epoch) {
            sh.diag.builds_cancelled.inc();
            return;
        }
        if !sh.visibility.is_potentially_visible(r) || !sh.neighbors_loaded(r.coord()) {
            r.mark_dirty(false);
            sh.diag.builds_rescheduled.inc();
            log::trace!(target: "build", "{:?}: not ready, rescheduled", r.coord());
            return;
        }
        sh.diag.builds_started.inc();

        let table = sh.source.block_table();
        let mesh = sh.mesher.mesh(&snap, table);
        let occlusion = compute_occlusion(&snap, table, &mut ctx.scratch);
        let position_version = sh.visibility.position_version();
        let camera_local = sh.visibility.camera_position() - r.origin();
        let translucent =
            TranslucentSortState::new(mesh.translucent).map(|t| t.sorted_for(camera_local));

        let solid = match StagedPass::stage(&sh.allocator, &mesh.solid) {
            Ok(s) => s,
            Err(e) => return self.fail(e),
        };
        let trans = match translucent.as_ref().map(|t| StagedPass::stage(&sh.allocator, &t.ordered_mesh())) {
            Some(Err(e)) => {
                if let Some(s) = solid {
                    s.discard(&sh.allocator);
                }
                return self.fail(e);
            }
            Some(Ok(s)) => s,
            None => None,
        };

        if r.is_cancelled(epoch) {
            for s in [solid, trans].into_iter().flatten() {
                s.discard(&sh.allocator);
            }
            sh.diag.builds_cancelled.inc();
            log::trace!(target: "build", "{:?}: cancelled after meshing", r.coord());
            return;
        }

        let VoxelSnapshot { attachments, .. } = *snap;
        let prev = r.build_state();
        let next = Arc::new(RegionBuildState {
            occlusion,
            attachments: attachments.into(),
            translucent,
            generation: prev.generation + 1,
        });
        let prev = r.swap_build_state(Arc::clone(&next));
        if prev.occlusion != next.occlusion {
            sh.visibility.on_occlusion_changed(r, &next.occlusion);
        }
        r.set_resort_position_version(position_version);
        r.clear_important();
        sh.diag.builds_completed.inc();
        log::trace!(
            target: "build",
            "{:?}: build #{} on worker {}",
            r.coord(),
            next.generation,
            ctx.slot
        );

        let region = Arc::clone(r);
        let allocator = Arc::clone(&sh.allocator);
        let buffers = Arc::clone(&sh.buffers);
        let diag = Arc::clone(&sh.diag);
        sh.uploads.push(Box::new(move |gpu: &mut UploadTarget| {
            if region.is_cancelled(epoch) {
                for s in [solid, trans].into_iter().flatten() {
                    s.discard(&allocator);
                }
                return;
            }
            StagedPass::install(solid, gpu, &region, Pass::Solid, &allocator, &buffers);
            StagedPass::install(trans, gpu, &region, Pass::Translucent, &allocator, &buffers);
            diag.uploads.inc();
        }));
    }

    /// Allocation failure: the region keeps its last-good build and is not retried.
    fn fail(&self, e: AllocError) {
        self.shared.diag.builds_failed.inc();
        log::warn!(target: "build", "{:?}: build failed: {e}", self.region.coord());
    }
}

/// Render-thread front end of the build pool.
pub struct BuildScheduler {
    pool: PriorityPool<WorkerContext>,
    shared: Arc<BuildShared>,
    requeue_rx: Receiver<Arc<Region>>,
}

impl BuildScheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        threads: usize,
        reprioritize_delta: i64,
        source: Arc<dyn VoxelSource>,
        mesher: Arc<dyn Mesher>,
        storage: Arc<RegionStorage>,
        visibility: Arc<TerrainVisibility>,
        allocator: Arc<BufferAllocator>,
        buffers: Arc<GpuBufferTable>,
        uploads: UploadSender<UploadTarget>,
        diag: Arc<Diagnostics>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let (requeue, requeue_rx) = unbounded();
        let pool = PriorityPool::new(
            threads,
            "vista-build",
            reprioritize_delta,
            Arc::clone(&diag),
            WorkerContext::new,
        )?;
        Ok(Self {
            pool,
            shared: Arc::new(BuildShared {
                source,
                mesher,
                storage,
                visibility,
                allocator,
                buffers,
                uploads,
                requeue,
                diag,
            }),
            requeue_rx,
        })
    }

    /// Submits a task for `region` unless one is already queued or running.
    pub fn submit(&self, region: Arc<Region>) -> bool {
        if !region.try_mark_queued() {
            return false;
        }
        self.shared.diag.builds_queued.inc();
        self.pool.submit(Box::new(BuildTask {
            region,
            shared: Arc::clone(&self.shared),
        }));
        true
    }

    /// Resubmits regions whose mailbox was refilled while their previous task ran.
    pub fn drain_requeued(&self) -> usize {
        let mut n = 0;
        for r in self.requeue_rx.try_iter() {
            if !r.is_closed() && r.has_pending_input() && self.submit(r) {
                n += 1;
            }
        }
        n
    }

    /// Snapshots dirty, potentially visible regions in `candidates` order and queues their
    /// builds. At most `max_snapshots` voxel snapshots are taken.
    pub fn schedule(&self, candidates: &[Arc<Region>], max_snapshots: usize) -> usize {
        let sh = &self.shared;
        let mut snapshots = 0;
        let mut queued = 0;
        for r in candidates {
            if snapshots >= max_snapshots {
                break;
            }
            if r.is_closed() || !r.needs_rebuild() || !sh.visibility.is_potentially_visible(r) {
                continue;
            }
            if !r.take_dirty() {
                continue;
            }
            let input = match sh.source.snapshot_region(r.coord()) {
                RegionInput::Unavailable => {
                    r.mark_dirty(false);
                    continue;
                }
                RegionInput::Empty => BuildInput::Empty,
                RegionInput::Snapshot(s) => {
                    snapshots += 1;
                    sh.diag.snapshots_taken.inc();
                    BuildInput::Pending(s)
                }
            };
            if !r.offer_input(input) {
                continue;
            }
            if self.submit(Arc::clone(r)) {
                queued += 1;
            }
        }
        if queued > 0 {
            log::debug!(target: "build", "queued {queued} builds ({snapshots} snapshots)");
        }
        queued
    }

    /// Queues a translucent-only resort for `region`.
    pub fn schedule_resort(&self, region: &Arc<Region>) -> bool {
        if !region.offer_input(BuildInput::ResortOnly) {
            return false;
        }
        self.submit(Arc::clone(region));
        true
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.pool.threads()
    }

    /// (queued, in flight)
    pub fn queue_debug_counts(&self) -> (usize, usize) {
        self.pool.queue_debug_counts()
    }

    pub fn is_idle(&self) -> bool {
        self.pool.is_idle() && self.requeue_rx.is_empty()
    }
}
