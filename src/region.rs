use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use vista_geom::{Aabb, Vec3};
use vista_gpu::{DrawableGeometry, GpuBufferTable};
use vista_mesh_cpu::{Face, OcclusionSummary, TranslucentSortState};
use vista_voxel::{Attachment, RegionCoord, VoxelSnapshot};

/// Pending work in a region's single-slot mailbox.
#[derive(Debug)]
pub enum BuildInput {
    Idle,
    /// The region was closed; no build may ever be installed again.
    Invalid,
    /// Only the translucent pass needs reordering.
    ResortOnly,
    /// Voxel data is known to be empty; install an empty build without meshing.
    Empty,
    Pending(Box<VoxelSnapshot>),
}

impl BuildInput {
    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, BuildInput::Idle)
    }

    fn name(&self) -> &'static str {
        match self {
            BuildInput::Idle => "idle",
            BuildInput::Invalid => "invalid",
            BuildInput::ResortOnly => "resort",
            BuildInput::Empty => "empty",
            BuildInput::Pending(_) => "pending",
        }
    }
}

/// Immutable result of a region's latest successful build.
#[derive(Debug, Clone)]
pub struct RegionBuildState {
    pub occlusion: OcclusionSummary,
    pub attachments: Arc<[Attachment]>,
    pub translucent: Option<TranslucentSortState>,
    /// Number of builds installed into this region so far; 0 for the unbuilt state.
    pub generation: u64,
}

impl RegionBuildState {
    pub fn unbuilt() -> Self {
        Self {
            occlusion: OcclusionSummary::Empty,
            attachments: Arc::from(Vec::new()),
            translucent: None,
            generation: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum VisibilityStatus {
    Unevaluated = 0,
    Visible = 1,
    Occluded = 2,
}

impl VisibilityStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => VisibilityStatus::Visible,
            2 => VisibilityStatus::Occluded,
            _ => VisibilityStatus::Unevaluated,
        }
    }
}

/// Per-consumer visibility bookkeeping attached to a region.
pub trait VisibilityState {
    fn status(&self) -> VisibilityStatus;

    /// Cached verdict if it was computed against `occluder_version`.
    fn cached(&self, occluder_version: u64) -> Option<bool>;

    fn store(&self, occluder_version: u64, visible: bool);

    fn reset(&self);
}

/// Camera-view visibility of one region.
#[derive(Default)]
pub struct CameraVisibility {
    status: AtomicU8,
    result_version: AtomicU64,
    /// Occluder version whose raster holds this region's occluders (0 = none).
    drawn_occluder_version: AtomicU64,
    /// Occlusion-input version those occluders were drawn from.
    drawn_input_version: AtomicU64,
    /// Last PVS iteration that reached this region, and the faces it was entered through.
    pvs_iteration: AtomicU64,
    entry_faces: AtomicU8,
}

impl VisibilityState for CameraVisibility {
    fn status(&self) -> VisibilityStatus {
        VisibilityStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn cached(&self, occluder_version: u64) -> Option<bool> {
        if self.result_version.load(Ordering::Acquire) != occluder_version {
            return None;
        }
        match self.status() {
            VisibilityStatus::Visible => Some(true),
            VisibilityStatus::Occluded => Some(false),
            VisibilityStatus::Unevaluated => None,
        }
    }

    fn store(&self, occluder_version: u64, visible: bool) {
        let s = if visible {
            VisibilityStatus::Visible
        } else {
            VisibilityStatus::Occluded
        };
        self.status.store(s as u8, Ordering::Release);
        self.result_version.store(occluder_version, Ordering::Release);
    }

    fn reset(&self) {
        self.status.store(VisibilityStatus::Unevaluated as u8, Ordering::Release);
        self.result_version.store(0, Ordering::Release);
        self.drawn_occluder_version.store(0, Ordering::Release);
        self.drawn_input_version.store(0, Ordering::Release);
        self.pvs_iteration.store(0, Ordering::Release);
        self.entry_faces.store(0, Ordering::Release);
    }
}

impl CameraVisibility {
    #[inline]
    pub fn drawn_occluder_version(&self) -> u64 {
        self.drawn_occluder_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn drawn_input_version(&self) -> u64 {
        self.drawn_input_version.load(Ordering::Acquire)
    }

    pub fn mark_drawn(&self, occluder_version: u64, input_version: u64) {
        self.drawn_input_version.store(input_version, Ordering::Release);
        self.drawn_occluder_version.store(occluder_version, Ordering::Release);
    }

    /// Records that iteration `iter` reached this region through `face`. Returns true on
    /// the first visit of that iteration.
    pub fn visit(&self, iter: u64, entry: u8) -> bool {
        if self.pvs_iteration.swap(iter, Ordering::AcqRel) == iter {
            self.entry_faces.fetch_or(entry, Ordering::AcqRel);
            false
        } else {
            self.entry_faces.store(entry, Ordering::Release);
            true
        }
    }

    #[inline]
    pub fn pvs_iteration(&self) -> u64 {
        self.pvs_iteration.load(Ordering::Acquire)
    }

    #[inline]
    pub fn entry_faces(&self) -> u8 {
        self.entry_faces.load(Ordering::Acquire)
    }
}

/// Shadow-projector visibility: which cascades the region was selected into, and when.
#[derive(Default)]
pub struct ShadowVisibility {
    cascades: AtomicU8,
    version: AtomicU64,
}

impl ShadowVisibility {
    pub fn set(&self, version: u64, cascades: u8) {
        self.cascades.store(cascades, Ordering::Release);
        self.version.store(version, Ordering::Release);
    }

    /// Cascade bits if they were computed for `version`.
    pub fn cascades(&self, version: u64) -> u8 {
        if self.version.load(Ordering::Acquire) == version {
            self.cascades.load(Ordering::Acquire)
        } else {
            0
        }
    }

    pub fn reset(&self) {
        self.cascades.store(0, Ordering::Release);
        self.version.store(0, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Solid,
    Translucent,
}

/// Distance value for regions the position pass has not reached.
pub const DISTANCE_UNSET: i64 = i64::MAX;

/// One cubic region of the world: its build state, mailbox, drawables and visibility.
pub struct Region {
    coord: RegionCoord,
    input: Mutex<BuildInput>,
    queued: AtomicBool,
    /// Bumped by close and context reset; builds started under an older epoch are dropped.
    epoch: AtomicU64,
    build_state: Mutex<Arc<RegionBuildState>>,
    needs_rebuild: AtomicBool,
    important: AtomicBool,
    closed: AtomicBool,
    solid: Mutex<DrawableGeometry>,
    translucent: Mutex<DrawableGeometry>,
    neighbors: Mutex<[Weak<Region>; 6]>,

    // Written only by the position pass.
    distance_sq: AtomicI64,
    near: AtomicBool,
    in_frustum: AtomicBool,
    frustum_version: AtomicU64,

    pub camera: CameraVisibility,
    pub shadow: ShadowVisibility,
    occlusion_input_version: AtomicU64,
    resort_position_version: AtomicU64,
}

impl Region {
    pub fn new(coord: RegionCoord) -> Self {
        Self {
            coord,
            input: Mutex::new(BuildInput::Idle),
            queued: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            build_state: Mutex::new(Arc::new(RegionBuildState::unbuilt())),
            needs_rebuild: AtomicBool::new(true),
            important: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            solid: Mutex::new(DrawableGeometry::DISPOSED),
            translucent: Mutex::new(DrawableGeometry::DISPOSED),
            neighbors: Mutex::new(Default::default()),
            distance_sq: AtomicI64::new(DISTANCE_UNSET),
            near: AtomicBool::new(false),
            in_frustum: AtomicBool::new(false),
            frustum_version: AtomicU64::new(0),
            camera: CameraVisibility::default(),
            shadow: ShadowVisibility::default(),
            occlusion_input_version: AtomicU64::new(0),
            resort_position_version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.coord.origin()
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        self.coord.aabb()
    }

    // ---- mailbox ----

    /// Places `input` in the mailbox. A full build (snapshot or empty) replaces whatever is
    /// pending; a resort never displaces a full build. Returns false once closed.
    pub fn offer_input(&self, input: BuildInput) -> bool {
        let mut slot = self.input.lock();
        match (&*slot, &input) {
            (BuildInput::Invalid, _) => false,
            (BuildInput::Pending(_) | BuildInput::Empty, BuildInput::ResortOnly) => true,
            (_, BuildInput::Idle | BuildInput::Invalid) => {
                debug_assert!(false, "offer_input called with {}", input.name());
                false
            }
            _ => {
                *slot = input;
                true
            }
        }
    }

    /// Takes pending input, leaving `Idle`. `Invalid` is permanent and stays in place.
    pub fn take_input(&self) -> BuildInput {
        let mut slot = self.input.lock();
        if matches!(*slot, BuildInput::Invalid) {
            return BuildInput::Invalid;
        }
        std::mem::replace(&mut *slot, BuildInput::Idle)
    }

    /// Whether the mailbox holds work a worker has not taken yet.
    pub fn has_pending_input(&self) -> bool {
        !matches!(*self.input.lock(), BuildInput::Idle | BuildInput::Invalid)
    }

    /// Claims the single in-flight slot. The caller must submit a build task on success.
    #[inline]
    pub fn try_mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn finish_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// True when work started under `epoch` must be discarded.
    #[inline]
    pub fn is_cancelled(&self, epoch: u64) -> bool {
        self.is_closed() || self.epoch() != epoch
    }

    // ---- build state ----

    pub fn build_state(&self) -> Arc<RegionBuildState> {
        Arc::clone(&self.build_state.lock())
    }

    /// Publishes `next`, returning the state it replaced.
    pub fn swap_build_state(&self, next: Arc<RegionBuildState>) -> Arc<RegionBuildState> {
        std::mem::replace(&mut *self.build_state.lock(), next)
    }

    /// Publishes `next` only if `expected` is still current.
    pub fn replace_build_state_if(
        &self,
        expected: &Arc<RegionBuildState>,
        next: Arc<RegionBuildState>,
    ) -> bool {
        let mut cur = self.build_state.lock();
        if !Arc::ptr_eq(&cur, expected) {
            return false;
        }
        *cur = next;
        true
    }

    // ---- dirty flags ----

    pub fn mark_dirty(&self, important: bool) {
        if important {
            self.important.store(true, Ordering::Release);
        }
        self.needs_rebuild.store(true, Ordering::Release);
    }

    /// Clears and returns the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.needs_rebuild.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_important(&self) -> bool {
        self.important.load(Ordering::Acquire)
    }

    pub fn clear_important(&self) {
        self.important.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---- drawables (render thread) ----

    pub fn drawable(&self, pass: Pass) -> DrawableGeometry {
        match pass {
            Pass::Solid => self.solid.lock().clone(),
            Pass::Translucent => self.translucent.lock().clone(),
        }
    }

    /// Installs `next` for `pass` and disposes the geometry it replaces.
    pub fn replace_drawable(&self, pass: Pass, next: DrawableGeometry, buffers: &GpuBufferTable) {
        let slot = match pass {
            Pass::Solid => &self.solid,
            Pass::Translucent => &self.translucent,
        };
        let mut old = std::mem::replace(&mut *slot.lock(), next);
        old.dispose(buffers);
    }

    // ---- neighbors ----

    /// Neighbor across `face`, resolving and registering the link on first use.
    pub fn neighbor(
        self: &Arc<Self>,
        face: Face,
        lookup: impl FnOnce(RegionCoord) -> Option<Arc<Region>>,
    ) -> Option<Arc<Region>> {
        if let Some(n) = self.neighbors.lock()[face.index()].upgrade() {
            if !n.is_closed() {
                return Some(n);
            }
        }
        if self.is_closed() {
            return None;
        }
        let (dx, dy, dz) = face.delta();
        let n = lookup(self.coord.offset(dx, dy, dz))?;
        if n.is_closed() {
            return None;
        }
        self.neighbors.lock()[face.index()] = Arc::downgrade(&n);
        n.neighbors.lock()[face.opposite().index()] = Arc::downgrade(self);
        Some(n)
    }

    fn sever_neighbors(&self) {
        let links = std::mem::take(&mut *self.neighbors.lock());
        for (i, w) in links.iter().enumerate() {
            if let Some(n) = w.upgrade() {
                let back = Face::from_index(i).opposite().index();
                n.neighbors.lock()[back] = Weak::new();
            }
        }
    }

    // ---- position pass ----

    pub fn set_position(&self, distance_sq: i64, near: bool, in_frustum: bool, frustum_version: u64) {
        self.distance_sq.store(distance_sq, Ordering::Release);
        self.near.store(near, Ordering::Release);
        self.in_frustum.store(in_frustum, Ordering::Release);
        self.frustum_version.store(frustum_version, Ordering::Release);
    }

    #[inline]
    pub fn distance_sq(&self) -> i64 {
        self.distance_sq.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_near(&self) -> bool {
        self.near.load(Ordering::Acquire)
    }

    #[inline]
    pub fn in_frustum(&self) -> bool {
        self.in_frustum.load(Ordering::Acquire)
    }

    /// 0 until the position pass has tested this region.
    #[inline]
    pub fn frustum_version(&self) -> u64 {
        self.frustum_version.load(Ordering::Acquire)
    }

    // ---- versions ----

    #[inline]
    pub fn occlusion_input_version(&self) -> u64 {
        self.occlusion_input_version.load(Ordering::Acquire)
    }

    pub fn set_occlusion_input_version(&self, v: u64) {
        self.occlusion_input_version.store(v, Ordering::Release);
    }

    #[inline]
    pub fn resort_position_version(&self) -> u64 {
        self.resort_position_version.load(Ordering::Acquire)
    }

    pub fn set_resort_position_version(&self, v: u64) {
        self.resort_position_version.store(v, Ordering::Release);
    }

    // ---- lifecycle ----

    /// Permanently retires the region: cancels pending and in-flight builds, disposes
    /// drawables, severs neighbor links and resets visibility. Render thread only.
    pub fn close(&self, buffers: &GpuBufferTable) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.input.lock() = BuildInput::Invalid;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.solid.lock().dispose(buffers);
        self.translucent.lock().dispose(buffers);
        self.sever_neighbors();
        self.camera.reset();
        self.shadow.reset();
        self.near.store(false, Ordering::Release);
        self.in_frustum.store(false, Ordering::Release);
        self.frustum_version.store(0, Ordering::Release);
        self.distance_sq.store(DISTANCE_UNSET, Ordering::Release);
        log::trace!(target: "storage", "closed region {:?}", self.coord);
    }

    /// Forgets GPU state after the device lost its buffers and schedules a rebuild.
    pub fn reset_for_context_loss(&self) {
        if self.is_closed() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut slot = self.input.lock();
            if !matches!(*slot, BuildInput::Invalid) {
                *slot = BuildInput::Idle;
            }
        }
        *self.solid.lock() = DrawableGeometry::DISPOSED;
        *self.translucent.lock() = DrawableGeometry::DISPOSED;
        self.resort_position_version.store(0, Ordering::Release);
        self.camera.reset();
        self.mark_dirty(false);
    }

    pub fn debug_string(&self) -> String {
        let st = self.build_state();
        let mut s = String::new();
        let _ = write!(
            s,
            "region {:?} d2={} near={} frustum={}@{} input={} queued={} dirty={} closed={}",
            (self.coord.rx, self.coord.ry, self.coord.rz),
            self.distance_sq(),
            self.is_near(),
            self.in_frustum(),
            self.frustum_version(),
            self.input.lock().name(),
            self.is_queued(),
            self.needs_rebuild(),
            self.is_closed(),
        );
        let occ = match &st.occlusion {
            OcclusionSummary::Empty => "empty".to_string(),
            OcclusionSummary::Full => "full".to_string(),
            OcclusionSummary::Partial { links, boxes } => {
                format!("partial(links={:#011x}, boxes={})", links.bits(), boxes.len())
            }
        };
        let _ = write!(
            s,
            " build#{} occ={} attach={} translucent={} vis={:?}@{}",
            st.generation,
            occ,
            st.attachments.len(),
            st.translucent.as_ref().map_or(0, |t| t.quad_count()),
            self.camera.status(),
            self.camera.result_version.load(Ordering::Relaxed),
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vista_gpu::{GpuBackend, HeadlessBackend};

    fn snap() -> BuildInput {
        BuildInput::Pending(Box::new(VoxelSnapshot::new(RegionCoord::new(0, 0, 0))))
    }

    #[test]
    fn mailbox_holds_at_most_one_request() {
        let r = Region::new(RegionCoord::new(0, 0, 0));
        assert!(r.offer_input(snap()));
        assert!(r.offer_input(snap()));
        assert!(matches!(r.take_input(), BuildInput::Pending(_)));
        assert!(r.take_input().is_idle());
    }

    #[test]
    fn resort_never_displaces_a_full_build() {
        let r = Region::new(RegionCoord::new(0, 0, 0));
        assert!(r.offer_input(BuildInput::Empty));
        assert!(r.offer_input(BuildInput::ResortOnly));
        assert!(matches!(r.take_input(), BuildInput::Empty));
        assert!(r.offer_input(BuildInput::ResortOnly));
        assert!(r.offer_input(snap()));
        assert!(matches!(r.take_input(), BuildInput::Pending(_)));
    }

    #[test]
    fn close_invalidates_permanently() {
        let table = GpuBufferTable::new();
        let r = Region::new(RegionCoord::new(0, 0, 0));
        let epoch = r.epoch();
        r.offer_input(snap());
        r.close(&table);
        assert!(r.is_cancelled(epoch));
        assert!(matches!(r.take_input(), BuildInput::Invalid));
        assert!(!r.offer_input(snap()));
        assert!(matches!(r.take_input(), BuildInput::Invalid));
    }

    #[test]
    fn single_in_flight_slot() {
        let r = Region::new(RegionCoord::new(0, 0, 0));
        assert!(r.try_mark_queued());
        assert!(!r.try_mark_queued());
        r.finish_queued();
        assert!(r.try_mark_queued());
    }

    #[test]
    fn neighbors_link_both_ways_and_sever_on_close() {
        let table = GpuBufferTable::new();
        let a = Arc::new(Region::new(RegionCoord::new(0, 0, 0)));
        let b = Arc::new(Region::new(RegionCoord::new(1, 0, 0)));
        let b2 = Arc::clone(&b);
        let got = a.neighbor(Face::PosX, move |c| {
            assert_eq!(c, RegionCoord::new(1, 0, 0));
            Some(b2)
        });
        assert!(Arc::ptr_eq(&got.unwrap(), &b));
        let back = b.neighbor(Face::NegX, |_| panic!("link should already be registered"));
        assert!(Arc::ptr_eq(&back.unwrap(), &a));
        b.close(&table);
        assert!(a.neighbor(Face::PosX, |_| None).is_none());
    }

    #[test]
    fn replacing_drawables_disposes_the_old_one() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let r = Region::new(RegionCoord::new(0, 0, 0));
        let first = gpu.create_buffer(&[0; 4]);
        table.register(first);
        r.replace_drawable(Pass::Solid, DrawableGeometry::new(first, 4), &table);
        let second = gpu.create_buffer(&[0; 4]);
        table.register(second);
        r.replace_drawable(Pass::Solid, DrawableGeometry::new(second, 4), &table);
        assert_eq!(table.collect(&mut gpu), 1);
        assert!(!gpu.is_live(first));
        assert_eq!(r.drawable(Pass::Solid).buffer(), Some(second));
    }

    #[test]
    fn visibility_cache_is_keyed_by_occluder_version() {
        let r = Region::new(RegionCoord::new(0, 0, 0));
        assert_eq!(r.camera.cached(1), None);
        r.camera.store(1, false);
        assert_eq!(r.camera.cached(1), Some(false));
        assert_eq!(r.camera.cached(2), None);
        assert_eq!(r.camera.status(), VisibilityStatus::Occluded);
    }
}
