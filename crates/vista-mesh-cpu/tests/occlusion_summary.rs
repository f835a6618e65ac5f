use proptest::prelude::*;
use vista_mesh_cpu::{Face, OcclusionScratch, OcclusionSummary, compute_occlusion};
use vista_voxel::{Block, BlockClass, BlockTable, RegionCoord, VoxelSnapshot};

fn table() -> BlockTable {
    BlockTable::new().with("stone", 1, BlockClass::Opaque)
}

fn snapshot(solid: &[bool]) -> VoxelSnapshot {
    let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
    for (i, &o) in solid.iter().enumerate() {
        let (x, y, z) = ((i % 16) as i32, (i / 256) as i32, ((i / 16) % 16) as i32);
        if o {
            s.set(x, y, z, Block::new(1));
        }
    }
    s
}

#[test]
fn border_blocks_do_not_change_the_summary() {
    let mut sc = OcclusionScratch::default();
    let mut s = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
    for a in -1..=16 {
        for b in -1..=16 {
            s.set(-1, a, b, Block::new(1));
            s.set(16, a, b, Block::new(1));
        }
    }
    assert_eq!(compute_occlusion(&s, &table(), &mut sc), OcclusionSummary::Empty);
}

#[test]
fn tunnel_links_only_its_ends() {
    let mut sc = OcclusionScratch::default();
    let mut solid = vec![true; 4096];
    for x in 0..16 {
        solid[(8 * 16 + 8) * 16 + x] = false;
    }
    let sum = compute_occlusion(&snapshot(&solid), &table(), &mut sc);
    assert!(sum.sees_through(Face::NegX, Face::PosX));
    assert!(!sum.sees_through(Face::NegX, Face::PosY));
    assert!(!sum.is_open(Face::PosZ));
    assert!(sum.can_occlude());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn links_are_symmetric_and_boxes_cover_exactly_the_opaque_cells(
        solid in prop::collection::vec(prop::bool::weighted(0.3), 4096)
    ) {
        let mut sc = OcclusionScratch::default();
        let sum = compute_occlusion(&snapshot(&solid), &table(), &mut sc);
        for a in Face::ALL {
            for b in Face::ALL {
                prop_assert_eq!(sum.sees_through(a, b), sum.sees_through(b, a));
            }
        }
        if let OcclusionSummary::Partial { boxes, .. } = &sum {
            let mut covered = vec![false; 4096];
            for bx in boxes.iter() {
                for y in bx.min[1]..bx.max[1] {
                    for z in bx.min[2]..bx.max[2] {
                        for x in bx.min[0]..bx.max[0] {
                            let i = (y as usize * 16 + z as usize) * 16 + x as usize;
                            prop_assert!(solid[i]);
                            prop_assert!(!covered[i]);
                            covered[i] = true;
                        }
                    }
                }
            }
            // Only small boxes may be dropped, so coverage never exceeds the opaque set.
            prop_assert!(covered.iter().filter(|c| **c).count() <= solid.iter().filter(|c| **c).count());
        }
    }

    #[test]
    fn equal_inputs_give_equal_summaries(
        solid in prop::collection::vec(prop::bool::weighted(0.5), 4096)
    ) {
        let mut sc = OcclusionScratch::default();
        let snap = snapshot(&solid);
        let a = compute_occlusion(&snap, &table(), &mut sc);
        let b = compute_occlusion(&snap.clone(), &table(), &mut OcclusionScratch::default());
        prop_assert_eq!(a, b);
    }
}
