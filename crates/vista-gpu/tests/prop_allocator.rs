use proptest::prelude::*;
use vista_gpu::{AllocError, AllocatorConfig, BufferAllocator};

proptest! {
    #[test]
    fn block_size_is_smallest_admissible_power_of_two(req in 1usize..(64 << 20)) {
        let alloc = BufferAllocator::new(AllocatorConfig::default());
        let size = alloc.block_size_for(req).unwrap();
        prop_assert!(size.is_power_of_two());
        prop_assert!(size >= req);
        prop_assert!(size >= 4096);
        prop_assert!(size == 4096 || size / 2 < req);
    }

    #[test]
    fn in_use_matches_outstanding_blocks(reqs in prop::collection::vec(1usize..20_000, 1..40)) {
        let alloc = BufferAllocator::new(AllocatorConfig::default());
        let mut bufs = Vec::new();
        let mut expected = 0;
        for r in reqs {
            match alloc.allocate(r) {
                Ok(b) => {
                    expected += b.capacity();
                    bufs.push(b);
                }
                Err(e) => prop_assert!(false, "unexpected {e}"),
            }
        }
        prop_assert_eq!(alloc.in_use_bytes(), expected);
        for (i, b) in bufs.iter_mut().enumerate() {
            if i % 2 == 0 {
                expected -= b.capacity();
                alloc.release(b);
                alloc.release(b);
            }
        }
        prop_assert_eq!(alloc.in_use_bytes(), expected);
        for b in &mut bufs {
            alloc.release(b);
        }
        prop_assert_eq!(alloc.in_use_bytes(), 0);
    }
}

#[test]
fn oversize_is_rejected_not_clamped() {
    let alloc = BufferAllocator::new(AllocatorConfig::default());
    assert!(matches!(
        alloc.block_size_for((64 << 20) + 1),
        Err(AllocError::TooLarge { .. })
    ));
}
