use proptest::prelude::*;
use vista_voxel::{ColumnCoord, RegionIndexer};

fn center() -> impl Strategy<Value = (i32, i32)> {
    (-1_000_000i32..=1_000_000, -1_000_000i32..=1_000_000)
}

proptest! {
    // Distinct columns inside the supported radius never share a slot
    #[test]
    fn columns_within_radius_do_not_collide(
        bits in 2u32..=8,
        (cx, cz) in center(),
        a in (any::<i16>(), any::<i16>()),
        b in (any::<i16>(), any::<i16>()),
    ) {
        let idx = RegionIndexer::new(bits, 5);
        let r = idx.max_collision_free_radius();
        let wrap = |v: i16| i32::from(v).rem_euclid(2 * r + 1) - r;
        let ca = ColumnCoord::new(cx + wrap(a.0), cz + wrap(a.1));
        let cb = ColumnCoord::new(cx + wrap(b.0), cz + wrap(b.1));
        if ca != cb {
            prop_assert_ne!(idx.column_slot(ca), idx.column_slot(cb));
        } else {
            prop_assert_eq!(idx.column_slot(ca), idx.column_slot(cb));
        }
    }

    // Slots always land inside the table
    #[test]
    fn slots_are_in_range(bits in 1u32..=10, bits_y in 1u32..=8, x in any::<i32>(), y in any::<i32>(), z in any::<i32>()) {
        let idx = RegionIndexer::new(bits, bits_y);
        prop_assert!(idx.column_slot(ColumnCoord::new(x, z)) < idx.column_capacity());
        prop_assert!(idx.vertical_slot(y) < idx.vertical_capacity());
    }

    // Heights within one vertical span get distinct slots
    #[test]
    fn vertical_slots_within_capacity_are_distinct(bits_y in 1u32..=8, base in -100_000i32..100_000, a in any::<u8>(), b in any::<u8>()) {
        let idx = RegionIndexer::new(6, bits_y);
        let cap = idx.vertical_capacity() as i32;
        let (ya, yb) = (base + i32::from(a) % cap, base + i32::from(b) % cap);
        prop_assert_eq!(ya == yb, idx.vertical_slot(ya) == idx.vertical_slot(yb));
    }
}
