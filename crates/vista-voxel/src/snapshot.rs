use crate::block::Block;
use crate::coord::{REGION_SIZE, RegionCoord};

/// Edge of a snapshot: the region plus one border layer on each side.
pub const SNAPSHOT_EDGE: usize = REGION_SIZE + 2;

/// Entity-like content inside a region that the host draws itself
/// (block entities, signs, item frames).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Block position in world coordinates.
    pub pos: (i32, i32, i32),
    pub kind: u32,
}

/// Immutable copy of one region's voxels plus a one-block border of its neighbors.
///
/// Local coordinates run from `-1` to `REGION_SIZE` inclusive on every axis; `0..16` is
/// the region itself.
#[derive(Clone, Debug)]
pub struct VoxelSnapshot {
    pub origin: RegionCoord,
    pub blocks: Vec<Block>,
    pub attachments: Vec<Attachment>,
}

impl VoxelSnapshot {
    pub fn new(origin: RegionCoord) -> Self {
        Self {
            origin,
            blocks: vec![Block::AIR; SNAPSHOT_EDGE * SNAPSHOT_EDGE * SNAPSHOT_EDGE],
            attachments: Vec::new(),
        }
    }

    /// Fills every cell (border included) from a world-coordinate lookup.
    pub fn from_world_fn(origin: RegionCoord, mut f: impl FnMut(i32, i32, i32) -> Block) -> Self {
        let mut snap = Self::new(origin);
        let (bx, by, bz) = origin.origin_block();
        let hi = REGION_SIZE as i32;
        for y in -1..=hi {
            for z in -1..=hi {
                for x in -1..=hi {
                    let i = snap.idx(x, y, z);
                    snap.blocks[i] = f(bx + x, by + y, bz + z);
                }
            }
        }
        snap
    }

    #[inline]
    pub fn idx(&self, x: i32, y: i32, z: i32) -> usize {
        debug_assert!(Self::in_bounds(x, y, z), "snapshot index out of range");
        let e = SNAPSHOT_EDGE;
        ((y + 1) as usize * e + (z + 1) as usize) * e + (x + 1) as usize
    }

    #[inline]
    pub fn in_bounds(x: i32, y: i32, z: i32) -> bool {
        let hi = REGION_SIZE as i32;
        (-1..=hi).contains(&x) && (-1..=hi).contains(&y) && (-1..=hi).contains(&z)
    }

    /// Block at local coordinates; air outside the bordered volume.
    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> Block {
        if !Self::in_bounds(x, y, z) {
            return Block::AIR;
        }
        self.blocks[self.idx(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, z: i32, b: Block) {
        if Self::in_bounds(x, y, z) {
            let i = self.idx(x, y, z);
            self.blocks[i] = b;
        }
    }

    /// True when the region interior holds nothing but air. Border cells are ignored.
    pub fn is_interior_empty(&self) -> bool {
        let hi = REGION_SIZE as i32;
        for y in 0..hi {
            for z in 0..hi {
                for x in 0..hi {
                    if !self.get(x, y, z).is_air() {
                        return false;
                    }
                }
            }
        }
        self.attachments.is_empty()
    }
}
