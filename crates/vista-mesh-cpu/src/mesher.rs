use vista_geom::Vec3;
use vista_voxel::{Block, BlockClass, BlockTable, REGION_SIZE, VoxelSnapshot};

use crate::constants::{OPAQUE_ALPHA, TRANSLUCENT_ALPHA};
use crate::face::Face;
use crate::mesh_build::MeshBuild;

/// Geometry for one region, split by render pass.
#[derive(Default, Clone, Debug)]
pub struct RegionMesh {
    pub solid: MeshBuild,
    pub translucent: MeshBuild,
}

impl RegionMesh {
    pub fn is_empty(&self) -> bool {
        self.solid.is_empty() && self.translucent.is_empty()
    }
}

/// Turns a voxel snapshot into region-local geometry. Must be pure: equal snapshots yield
/// equal meshes, and it may run on any worker thread.
pub trait Mesher: Send + Sync {
    fn mesh(&self, snap: &VoxelSnapshot, table: &BlockTable) -> RegionMesh;
}

/// One quad per exposed cell face, colored by block id.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaceCullingMesher;

impl FaceCullingMesher {
    fn color_of(b: Block, class: BlockClass) -> [u8; 4] {
        let h = (b.id as u32).wrapping_mul(0x9E37_79B9) ^ (b.state as u32).wrapping_mul(0x85EB_CA6B);
        let alpha = if class == BlockClass::Translucent {
            TRANSLUCENT_ALPHA
        } else {
            OPAQUE_ALPHA
        };
        [
            96 + (h >> 24) as u8 % 128,
            96 + (h >> 16) as u8 % 128,
            96 + (h >> 8) as u8 % 128,
            alpha,
        ]
    }
}

impl Mesher for FaceCullingMesher {
    fn mesh(&self, snap: &VoxelSnapshot, table: &BlockTable) -> RegionMesh {
        let mut out = RegionMesh::default();
        let n = REGION_SIZE as i32;
        for y in 0..n {
            for z in 0..n {
                for x in 0..n {
                    let here = snap.get(x, y, z);
                    let class = table.class_of(here);
                    if class == BlockClass::Air {
                        continue;
                    }
                    let rgba = Self::color_of(here, class);
                    let cell = Vec3::new(x as f32, y as f32, z as f32);
                    for face in Face::ALL {
                        let (dx, dy, dz) = face.delta();
                        let there = snap.get(x + dx, y + dy, z + dz);
                        let exposed = match (class, table.class_of(there)) {
                            (_, BlockClass::Opaque) => false,
                            (BlockClass::Translucent, BlockClass::Translucent) => there.id != here.id,
                            _ => true,
                        };
                        if !exposed {
                            continue;
                        }
                        let target = if class.is_opaque() {
                            &mut out.solid
                        } else {
                            &mut out.translucent
                        };
                        target.add_cell_face(face, cell, rgba);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vista_voxel::RegionCoord;

    fn table() -> BlockTable {
        BlockTable::new()
            .with("stone", 1, BlockClass::Opaque)
            .with("glass", 2, BlockClass::Translucent)
            .with("water", 3, BlockClass::Translucent)
    }

    #[test]
    fn lone_block_emits_six_faces() {
        let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
        s.set(4, 4, 4, Block::new(1));
        let m = FaceCullingMesher.mesh(&s, &table());
        assert_eq!(m.solid.quad_count(), 6);
        assert!(m.translucent.is_empty());
    }

    #[test]
    fn shared_faces_are_culled() {
        let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
        s.set(4, 4, 4, Block::new(1));
        s.set(5, 4, 4, Block::new(1));
        let m = FaceCullingMesher.mesh(&s, &table());
        assert_eq!(m.solid.quad_count(), 10);
    }

    #[test]
    fn border_neighbors_cull_but_never_emit() {
        let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
        s.set(0, 0, 0, Block::new(1));
        s.set(-1, 0, 0, Block::new(1));
        s.set(16, 3, 3, Block::new(1));
        let m = FaceCullingMesher.mesh(&s, &table());
        assert_eq!(m.solid.quad_count(), 5);
    }

    #[test]
    fn translucent_runs_merge_only_with_same_block() {
        let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
        s.set(4, 4, 4, Block::new(2));
        s.set(5, 4, 4, Block::new(2));
        s.set(6, 4, 4, Block::new(3));
        let m = FaceCullingMesher.mesh(&s, &table());
        assert!(m.solid.is_empty());
        // 2 glass cells share one face pair; glass/water keep both faces.
        assert_eq!(m.translucent.quad_count(), 16);
    }

    #[test]
    fn translucent_next_to_opaque_is_hidden_on_that_side() {
        let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
        s.set(4, 4, 4, Block::new(1));
        s.set(4, 5, 4, Block::new(2));
        let m = FaceCullingMesher.mesh(&s, &table());
        assert_eq!(m.translucent.quad_count(), 5);
        assert_eq!(m.solid.quad_count(), 6);
    }
}
