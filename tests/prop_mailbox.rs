use proptest::prelude::*;
use vista::{BuildInput, Region};
use vista_gpu::GpuBufferTable;
use vista_voxel::{RegionCoord, VoxelSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Idle,
    Invalid,
    Resort,
    Empty,
    Pending,
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Snapshot,
    Empty,
    Resort,
    Take,
    Close,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Snapshot),
        2 => Just(Op::Empty),
        4 => Just(Op::Resort),
        4 => Just(Op::Take),
        1 => Just(Op::Close),
    ]
}

fn kind(input: &BuildInput) -> Slot {
    match input {
        BuildInput::Idle => Slot::Idle,
        BuildInput::Invalid => Slot::Invalid,
        BuildInput::ResortOnly => Slot::Resort,
        BuildInput::Empty => Slot::Empty,
        BuildInput::Pending(_) => Slot::Pending,
    }
}

proptest! {
    #[test]
    fn mailbox_matches_model(ops in proptest::collection::vec(op(), 1..64)) {
        let coord = RegionCoord::new(0, 0, 0);
        let region = Region::new(coord);
        let table = GpuBufferTable::new();
        let mut model = Slot::Idle;

        for op in ops {
            match op {
                Op::Snapshot | Op::Empty | Op::Resort => {
                    let (input, next) = match op {
                        Op::Snapshot => (BuildInput::Pending(Box::new(VoxelSnapshot::new(coord))), Slot::Pending),
                        Op::Empty => (BuildInput::Empty, Slot::Empty),
                        _ => (BuildInput::ResortOnly, Slot::Resort),
                    };
                    let accepted = region.offer_input(input);
                    prop_assert_eq!(accepted, model != Slot::Invalid);
                    let keeps_build = next == Slot::Resort && matches!(model, Slot::Pending | Slot::Empty);
                    if accepted && !keeps_build {
                        model = next;
                    }
                }
                Op::Take => {
                    let taken = region.take_input();
                    prop_assert_eq!(kind(&taken), model);
                    if model != Slot::Invalid {
                        model = Slot::Idle;
                    }
                }
                Op::Close => {
                    region.close(&table);
                    model = Slot::Invalid;
                }
            }
            prop_assert_eq!(
                region.has_pending_input(),
                !matches!(model, Slot::Idle | Slot::Invalid)
            );
        }
    }
}
