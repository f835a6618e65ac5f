use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use vista_geom::Vec3;
use vista_gpu::GpuBufferTable;
use vista_runtime::Diagnostics;
use vista_voxel::{ColumnCoord, RegionCoord, RegionIndexer};

use crate::config::RegionsConfig;
use crate::region::Region;
use crate::visibility::Frustum;

/// Every region sharing one horizontal coordinate, in wrapping vertical slots.
pub struct RegionColumn {
    coord: ColumnCoord,
    indexer: RegionIndexer,
    regions: RwLock<Vec<Option<Arc<Region>>>>,
    closed: AtomicBool,
}

impl RegionColumn {
    fn new(coord: ColumnCoord, indexer: RegionIndexer) -> Self {
        Self {
            coord,
            indexer,
            regions: RwLock::new(vec![None; indexer.vertical_capacity()]),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn coord(&self) -> ColumnCoord {
        self.coord
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn get(&self, ry: i32) -> Option<Arc<Region>> {
        let i = self.indexer.vertical_slot(ry);
        self.regions
            .read()
            .get(i)?
            .as_ref()
            .filter(|r| r.coord().ry == ry)
            .cloned()
    }

    /// Returns the region at `ry` and whether it was created by this call. `None` once
    /// the column is closed or when the slot holds another height.
    fn get_or_create(&self, ry: i32) -> Option<(Arc<Region>, bool)> {
        let i = self.indexer.vertical_slot(ry);
        if let Some(Some(r)) = self.regions.read().get(i) {
            return (r.coord().ry == ry).then(|| (Arc::clone(r), false));
        }
        let mut regions = self.regions.write();
        if self.is_closed() || i >= regions.len() {
            return None;
        }
        if let Some(r) = &regions[i] {
            if r.coord().ry != ry {
                log::warn!(
                    target: "storage",
                    "vertical slot {i} of {:?} holds ry {}, not {ry}",
                    self.coord,
                    r.coord().ry
                );
                return None;
            }
            return Some((Arc::clone(r), false));
        }
        let r = Arc::new(Region::new(self.coord.region(ry)));
        regions[i] = Some(Arc::clone(&r));
        Some((r, true))
    }

    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.regions.read().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and drops every region. Returns how many were closed.
    fn close(&self, buffers: &GpuBufferTable) -> usize {
        self.closed.store(true, Ordering::Release);
        let regions = std::mem::take(&mut *self.regions.write());
        let mut n = 0;
        for r in regions.into_iter().flatten() {
            r.close(buffers);
            n += 1;
        }
        n
    }
}

/// Distance thresholds that may change while the renderer runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub view_radius: i32,
    pub retention_radius: i32,
    pub near_distance_sq: i64,
}

impl From<&RegionsConfig> for Thresholds {
    fn from(c: &RegionsConfig) -> Self {
        Self {
            view_radius: c.view_radius,
            retention_radius: c.retention_radius,
            near_distance_sq: c.near_distance_sq,
        }
    }
}

/// Result of one position pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PositionUpdate {
    pub columns: usize,
    pub regions: usize,
    pub near: usize,
    pub in_frustum: usize,
    /// Columns moved to the close queue this pass.
    pub scheduled_close: usize,
}

/// Two-level region table: a wrapping slot per column, a vertical array per column.
pub struct RegionStorage {
    indexer: RegionIndexer,
    min_y: i32,
    max_y: i32,
    thresholds: RwLock<Thresholds>,
    columns: RwLock<Vec<Option<Arc<RegionColumn>>>>,
    close_queue: Mutex<Vec<Arc<RegionColumn>>>,
    diag: Arc<Diagnostics>,
}

impl RegionStorage {
    pub fn new(config: &RegionsConfig, diag: Arc<Diagnostics>) -> Self {
        let indexer = config.indexer();
        Self {
            indexer,
            min_y: config.min_region_y,
            max_y: config.max_region_y,
            thresholds: RwLock::new(Thresholds::from(config)),
            columns: RwLock::new(vec![None; indexer.column_capacity()]),
            close_queue: Mutex::new(Vec::new()),
            diag,
        }
    }

    #[inline]
    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    /// Applies new distance thresholds; retention stays within the collision-free radius.
    pub fn set_thresholds(&self, mut t: Thresholds) {
        t.retention_radius = t.retention_radius.min(self.indexer.max_collision_free_radius());
        t.view_radius = t.view_radius.min(t.retention_radius);
        log::info!(target: "storage", "thresholds updated: {t:?}");
        *self.thresholds.write() = t;
    }

    #[inline]
    pub fn contains_y(&self, ry: i32) -> bool {
        (self.min_y..=self.max_y).contains(&ry)
    }

    #[inline]
    pub fn vertical_range(&self) -> (i32, i32) {
        (self.min_y, self.max_y)
    }

    fn column(&self, col: ColumnCoord) -> Option<Arc<RegionColumn>> {
        let slot = self.indexer.column_slot(col);
        let columns = self.columns.read();
        columns[slot]
            .as_ref()
            .filter(|c| c.coord == col && !c.is_closed())
            .cloned()
    }

    fn get_or_create_column(&self, col: ColumnCoord) -> Arc<RegionColumn> {
        if let Some(c) = self.column(col) {
            return c;
        }
        let slot = self.indexer.column_slot(col);
        let mut columns = self.columns.write();
        if let Some(c) = &columns[slot] {
            if c.coord == col && !c.is_closed() {
                return Arc::clone(c);
            }
            if c.coord != col {
                log::warn!(
                    target: "storage",
                    "column slot {slot} collision: {:?} evicts {:?}",
                    col,
                    c.coord
                );
            }
            self.close_queue.lock().push(Arc::clone(c));
        }
        let c = Arc::new(RegionColumn::new(col, self.indexer));
        columns[slot] = Some(Arc::clone(&c));
        c
    }

    /// Region at `coord`, created with its column on first use. `None` outside the
    /// vertical bounds.
    pub fn get_or_create_region(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        if !self.contains_y(coord.ry) {
            return None;
        }
        let (r, created) = self.get_or_create_column(coord.column()).get_or_create(coord.ry)?;
        if created {
            self.diag.regions_created.inc();
            log::trace!(target: "storage", "created region {coord:?}");
        }
        Some(r)
    }

    pub fn get_region_if_exists(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        if !self.contains_y(coord.ry) {
            return None;
        }
        self.column(coord.column())?.get(coord.ry)
    }

    /// Creates every region within the view radius of `camera`.
    pub fn ensure_regions_around(&self, camera: Vec3) -> usize {
        let view = self.thresholds().view_radius;
        let center = RegionCoord::from_position(camera).column();
        let view_sq = i64::from(view) * i64::from(view);
        let mut created = 0;
        for dx in -view..=view {
            for dz in -view..=view {
                let col = ColumnCoord::new(center.cx + dx, center.cz + dz);
                if col.distance_sq(center) > view_sq {
                    continue;
                }
                let column = self.get_or_create_column(col);
                for ry in self.min_y..=self.max_y {
                    if let Some((_, true)) = column.get_or_create(ry) {
                        self.diag.regions_created.inc();
                        created += 1;
                    }
                }
            }
        }
        if created > 0 {
            log::debug!(target: "storage", "created {created} regions around {center:?}");
        }
        created
    }

    pub fn columns(&self) -> Vec<Arc<RegionColumn>> {
        self.columns.read().iter().flatten().cloned().collect()
    }

    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.columns().iter().flat_map(|c| c.regions()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.read().iter().flatten().count()
    }

    pub fn region_count(&self) -> usize {
        self.columns().iter().map(|c| c.len()).sum()
    }

    pub fn pending_close(&self) -> usize {
        self.close_queue.lock().len()
    }

    /// Per-frame position pass; the only writer of region distance and frustum fields.
    /// Columns beyond retention, and empty ones, leave the table and wait for
    /// [`close_regions_on_render_thread`](Self::close_regions_on_render_thread). Their
    /// regions are marked far and out of frustum right away.
    pub fn update_region_position_and_visibility(
        &self,
        camera: Vec3,
        frustum: &dyn Frustum,
        frustum_version: u64,
    ) -> PositionUpdate {
        let t = self.thresholds();
        let cam = RegionCoord::from_position(camera);
        let retention_sq = i64::from(t.retention_radius) * i64::from(t.retention_radius);
        let mut out = PositionUpdate::default();

        let mut far = Vec::new();
        {
            let mut columns = self.columns.write();
            for slot in columns.iter_mut() {
                let Some(c) = slot else { continue };
                let beyond = c.coord.distance_sq(cam.column()) > retention_sq;
                if beyond || c.is_closed() || c.is_empty() {
                    if let Some(c) = slot.take() {
                        far.push(c);
                    }
                }
            }
        }
        out.scheduled_close = far.len();
        for c in &far {
            for r in c.regions() {
                r.set_position(r.coord().distance_sq(cam), false, false, frustum_version);
            }
        }
        if !far.is_empty() {
            log::debug!(
                target: "storage",
                "{} columns beyond retention radius {} or empty",
                far.len(),
                t.retention_radius
            );
            self.close_queue.lock().extend(far);
        }

        for c in self.columns() {
            out.columns += 1;
            for r in c.regions() {
                let d = r.coord().distance_sq(cam);
                let near = d <= t.near_distance_sq;
                let in_frustum = frustum.test(r.coord().center());
                r.set_position(d, near, in_frustum, frustum_version);
                out.regions += 1;
                out.near += near as usize;
                out.in_frustum += in_frustum as usize;
            }
        }
        out
    }

    /// Closes queued columns. Must run on the thread that owns GPU resources.
    pub fn close_regions_on_render_thread(&self, buffers: &GpuBufferTable) -> usize {
        let queued = std::mem::take(&mut *self.close_queue.lock());
        let mut closed = 0;
        for c in &queued {
            let n = c.close(buffers);
            self.diag.regions_closed.add(n as u64);
            self.diag.columns_closed.inc();
            closed += n;
        }
        if !queued.is_empty() {
            log::debug!(
                target: "storage",
                "closed {} columns ({closed} regions)",
                queued.len()
            );
        }
        closed
    }
}
