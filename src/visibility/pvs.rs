use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use vista_geom::Vec3;
use vista_mesh_cpu::Face;
use vista_voxel::RegionCoord;

use super::TerrainVisibility;
use crate::region::Region;
use crate::storage::RegionStorage;

impl TerrainVisibility {
    /// Breadth-first flood from the camera's region through open shared faces.
    ///
    /// A region is entered only if the position pass has tested it this session, it lies in
    /// the frustum (or is near), and it is no closer to the camera than the region it is
    /// entered from. A region passes sight on from face `a` to face `b` only if its
    /// occlusion summary links them; near regions pass it on through every face. Occluded
    /// regions end their branch. Returns the visible regions in discovery order.
    pub fn iterate_camera(&self, storage: &RegionStorage, camera: Vec3) -> Vec<Arc<Region>> {
        let iter = self.pvs_iteration.fetch_add(1, Ordering::AcqRel) + 1;
        self.needs_iteration.store(false, Ordering::Release);
        self.diag.pvs_iterations.inc();

        let mut out = Vec::new();
        let start = match start_region(storage, camera) {
            Some(r) if r.frustum_version() != 0 => r,
            _ => {
                self.camera_set.lock().clear();
                self.completed_iteration.store(iter, Ordering::Release);
                return out;
            }
        };

        let lookup = |c: RegionCoord| storage.get_region_if_exists(c);
        let mut queue = VecDeque::new();
        start.camera.visit(iter, 0);
        queue.push_back(start);

        while let Some(r) = queue.pop_front() {
            if !self.test_visibility(&r) {
                continue;
            }
            let entry = r.camera.entry_faces();
            let st = r.build_state();
            for exit in Face::ALL {
                let passes = entry == 0
                    || r.is_near()
                    || Face::ALL
                        .iter()
                        .any(|&e| entry & e.bit() != 0 && st.occlusion.sees_through(e, exit));
                if !passes {
                    continue;
                }
                let Some(n) = r.neighbor(exit, lookup) else {
                    continue;
                };
                if n.frustum_version() == 0 {
                    continue;
                }
                if !n.is_near() && (!n.in_frustum() || n.distance_sq() < r.distance_sq()) {
                    continue;
                }
                if n.camera.visit(iter, exit.opposite().bit()) {
                    queue.push_back(n);
                }
            }
            out.push(r);
        }

        log::debug!(
            target: "visibility",
            "pvs #{iter}: {} visible, occluder v{}, horizon {}",
            out.len(),
            self.occluder_version(),
            self.max_drawn_distance()
        );
        *self.camera_set.lock() = out.clone();
        self.completed_iteration.store(iter, Ordering::Release);
        out
    }
}

/// Region holding the camera, or the nearest existing one in its column when the camera
/// is above or below the stored range.
fn start_region(storage: &RegionStorage, camera: Vec3) -> Option<Arc<Region>> {
    let c = RegionCoord::from_position(camera);
    let (lo, hi) = storage.vertical_range();
    storage.get_region_if_exists(RegionCoord::new(c.rx, c.ry.clamp(lo, hi), c.rz))
}
