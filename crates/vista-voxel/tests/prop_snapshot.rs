use proptest::prelude::*;
use vista_voxel::{Block, RegionCoord, SNAPSHOT_EDGE, VoxelSnapshot};

fn local() -> impl Strategy<Value = i32> {
    -1i32..=16
}

#[test]
fn idx_is_unique_and_in_range() {
    let snap = VoxelSnapshot::new(RegionCoord::new(0, 0, 0));
    let expect = SNAPSHOT_EDGE * SNAPSHOT_EDGE * SNAPSHOT_EDGE;
    let mut seen = vec![false; expect];
    for y in -1..=16 {
        for z in -1..=16 {
            for x in -1..=16 {
                let i = snap.idx(x, y, z);
                assert!(i < expect);
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
    }
    assert!(seen.into_iter().all(|b| b));
}

proptest! {
    // set then get returns the stored block; out-of-range reads are air
    #[test]
    fn set_get_agree(x in local(), y in local(), z in local(), id in 1u16..1000) {
        let mut snap = VoxelSnapshot::new(RegionCoord::new(2, -1, 7));
        snap.set(x, y, z, Block::new(id));
        prop_assert_eq!(snap.get(x, y, z), Block::new(id));
        prop_assert_eq!(snap.get(x, 17, z), Block::AIR);
        prop_assert_eq!(snap.get(-2, y, z), Block::AIR);
    }

    // from_world_fn samples world coordinates relative to the region origin
    #[test]
    fn from_world_fn_offsets_by_origin(rx in -50i32..50, ry in -4i32..4, rz in -50i32..50) {
        let origin = RegionCoord::new(rx, ry, rz);
        let (bx, by, bz) = origin.origin_block();
        let snap = VoxelSnapshot::from_world_fn(origin, |x, y, z| {
            if (x, y, z) == (bx - 1, by + 5, bz + 16) { Block::new(9) } else { Block::AIR }
        });
        prop_assert_eq!(snap.get(-1, 5, 16), Block::new(9));
        prop_assert!(snap.is_interior_empty());
    }
}
