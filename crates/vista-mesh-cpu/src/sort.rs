use std::sync::Arc;

use vista_geom::Vec3;

use crate::mesh_build::MeshBuild;

/// Translucent geometry plus the quad order it was last drawn in.
///
/// The geometry is shared between generations; only the order changes on a resort. Orders
/// are permutations of `0..quad_count`, serialized as little-endian `u32`s.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslucentSortState {
    geometry: Arc<MeshBuild>,
    centers: Arc<[Vec3]>,
    order: Arc<[u32]>,
}

impl TranslucentSortState {
    /// Wraps freshly built geometry in mesher order. `None` when there is nothing to sort.
    pub fn new(geometry: MeshBuild) -> Option<Self> {
        if geometry.is_empty() {
            return None;
        }
        let centers: Arc<[Vec3]> = (0..geometry.quad_count())
            .map(|q| geometry.quad_center(q))
            .collect();
        let order: Arc<[u32]> = (0..geometry.quad_count() as u32).collect();
        Some(Self {
            geometry: Arc::new(geometry),
            centers,
            order,
        })
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Reorders quads back-to-front as seen from `camera_local` (region-local camera
    /// position). Stable: quads at equal distance keep their previous relative order.
    pub fn sorted_for(&self, camera_local: Vec3) -> Self {
        let mut order = self.order.to_vec();
        order.sort_by(|&a, &b| {
            let da = self.centers[a as usize].distance_sq(camera_local);
            let db = self.centers[b as usize].distance_sq(camera_local);
            db.total_cmp(&da)
        });
        Self {
            geometry: Arc::clone(&self.geometry),
            centers: Arc::clone(&self.centers),
            order: order.into(),
        }
    }

    pub fn save_order(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.order.len() * 4);
        for q in self.order.iter() {
            out.extend_from_slice(&q.to_le_bytes());
        }
        out
    }

    /// Same geometry with an order previously produced by [`save_order`](Self::save_order).
    /// Rejects byte strings that are not a permutation of this geometry's quads.
    pub fn with_saved_order(&self, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != self.quad_count() * 4 {
            return None;
        }
        let mut seen = vec![false; self.quad_count()];
        let mut order = Vec::with_capacity(self.quad_count());
        for chunk in bytes.chunks_exact(4) {
            let q = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let slot = seen.get_mut(q as usize)?;
            if *slot {
                return None;
            }
            *slot = true;
            order.push(q);
        }
        Some(Self {
            geometry: Arc::clone(&self.geometry),
            centers: Arc::clone(&self.centers),
            order: order.into(),
        })
    }

    /// Geometry laid out in draw order, ready for upload.
    pub fn ordered_mesh(&self) -> MeshBuild {
        let mut out = MeshBuild::default();
        out.reserve_quads(self.quad_count());
        for &q in self.order.iter() {
            out.push_quad_from(&self.geometry, q as usize);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Face;

    fn row(n: usize) -> MeshBuild {
        let mut mb = MeshBuild::default();
        for i in 0..n {
            mb.add_cell_face(Face::PosY, Vec3::new(i as f32, 0.0, 0.0), [0, 0, 0, 160]);
        }
        mb
    }

    #[test]
    fn empty_geometry_has_no_state() {
        assert!(TranslucentSortState::new(MeshBuild::default()).is_none());
    }

    #[test]
    fn far_quads_come_first() {
        let s = TranslucentSortState::new(row(4)).unwrap();
        let sorted = s.sorted_for(Vec3::new(-10.0, 0.0, 0.0));
        assert_eq!(sorted.order(), &[3, 2, 1, 0]);
        let back = sorted.sorted_for(Vec3::new(20.0, 0.0, 0.0));
        assert_eq!(back.order(), &[0, 1, 2, 3]);
    }

    #[test]
    fn ties_keep_previous_order() {
        let s = TranslucentSortState::new(row(2)).unwrap();
        let reversed = s.with_saved_order(&[1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let sorted = reversed.sorted_for(Vec3::new(1.0, 5.0, 0.5));
        assert_eq!(sorted.order(), &[1, 0]);
    }

    #[test]
    fn rejects_malformed_orders() {
        let s = TranslucentSortState::new(row(2)).unwrap();
        assert!(s.with_saved_order(&[0, 0, 0, 0]).is_none());
        assert!(s.with_saved_order(&[0, 0, 0, 0, 0, 0, 0, 0]).is_none());
        assert!(s.with_saved_order(&[0, 0, 0, 0, 7, 0, 0, 0]).is_none());
    }

    #[test]
    fn ordered_mesh_follows_order() {
        let s = TranslucentSortState::new(row(3)).unwrap();
        let sorted = s.sorted_for(Vec3::new(-5.0, 0.0, 0.0));
        let m = sorted.ordered_mesh();
        assert_eq!(m.quad_count(), 3);
        assert_eq!(m.quad_center(0), Vec3::new(2.5, 1.0, 0.5));
    }
}
