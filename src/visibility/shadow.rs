use std::sync::Arc;

use vista_geom::{Aabb, Vec3};
use vista_voxel::RegionCoord;

use super::TerrainVisibility;
use crate::region::Region;
use crate::storage::RegionStorage;

/// Host-side test for the secondary (shadow) view. `cascade` indexes the configured radii.
pub trait ShadowProjector {
    fn test(&self, cascade: usize, bounds: &Aabb) -> bool;
}

impl<F: Fn(usize, &Aabb) -> bool> ShadowProjector for F {
    fn test(&self, cascade: usize, bounds: &Aabb) -> bool {
        self(cascade, bounds)
    }
}

/// Regions selected for each shadow cascade by one shadow iteration.
#[derive(Clone, Default)]
pub struct ShadowSets {
    version: u64,
    cascades: Vec<Vec<Arc<Region>>>,
}

impl ShadowSets {
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cascade(&self, i: usize) -> &[Arc<Region>] {
        self.cascades.get(i).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cascade_count(&self) -> usize {
        self.cascades.len()
    }

    pub(super) fn clear(&mut self) {
        self.version += 1;
        self.cascades.clear();
    }
}

impl TerrainVisibility {
    /// Rebuilds the shadow sets. Each region gets one bit per cascade whose horizontal
    /// radius contains it and whose projector test accepts it. Without a projector the
    /// sets are emptied.
    pub fn iterate_shadow(
        &self,
        storage: &RegionStorage,
        camera: Vec3,
        radii: &[i32],
        projector: Option<&dyn ShadowProjector>,
    ) -> ShadowSets {
        let mut sets = self.shadow.lock();
        sets.clear();
        let version = sets.version;
        let Some(projector) = projector else {
            return sets.clone();
        };
        self.diag.shadow_iterations.inc();

        let radii = &radii[..radii.len().min(8)];
        sets.cascades = vec![Vec::new(); radii.len()];
        let center = RegionCoord::from_position(camera).column();
        for column in storage.columns() {
            let d = column.coord().distance_sq(center);
            let within: Vec<usize> = radii
                .iter()
                .enumerate()
                .filter(|(_, r)| d <= i64::from(**r) * i64::from(**r))
                .map(|(i, _)| i)
                .collect();
            if within.is_empty() {
                continue;
            }
            for region in column.regions() {
                if region.frustum_version() == 0 {
                    continue;
                }
                let bounds = region.aabb();
                let mut bits = 0u8;
                for &i in &within {
                    if projector.test(i, &bounds) {
                        bits |= 1 << i;
                        sets.cascades[i].push(Arc::clone(&region));
                    }
                }
                region.shadow.set(version, bits);
            }
        }
        for c in sets.cascades.iter_mut() {
            c.sort_by_key(|r| r.distance_sq());
        }
        log::debug!(
            target: "visibility",
            "shadow v{version}: {:?}",
            sets.cascades.iter().map(Vec::len).collect::<Vec<_>>()
        );
        sets.clone()
    }
}
