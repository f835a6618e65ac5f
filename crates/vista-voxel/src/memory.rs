use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::block::{Block, BlockTable};
use crate::coord::{REGION_SIZE, RegionCoord};
use crate::snapshot::{Attachment, VoxelSnapshot};
use crate::source::{RegionInput, VoxelSource};

/// Sparse in-memory world. Useful as a host stand-in for tools and tests.
pub struct MemoryWorld {
    table: BlockTable,
    blocks: RwLock<HashMap<(i32, i32, i32), Block>>,
    attachments: RwLock<HashMap<(i32, i32, i32), u32>>,
    loaded: RwLock<HashSet<RegionCoord>>,
    /// When set, every region counts as loaded.
    all_loaded: bool,
}

impl MemoryWorld {
    pub fn new(table: BlockTable) -> Self {
        Self {
            table,
            blocks: RwLock::new(HashMap::new()),
            attachments: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashSet::new()),
            all_loaded: true,
        }
    }

    /// A world where regions must be marked loaded explicitly.
    pub fn with_explicit_loading(table: BlockTable) -> Self {
        Self {
            all_loaded: false,
            ..Self::new(table)
        }
    }

    pub fn set_block(&self, x: i32, y: i32, z: i32, b: Block) {
        let mut blocks = self.blocks.write();
        if b.is_air() {
            blocks.remove(&(x, y, z));
        } else {
            blocks.insert((x, y, z), b);
        }
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Block {
        self.blocks
            .read()
            .get(&(x, y, z))
            .copied()
            .unwrap_or(Block::AIR)
    }

    /// Fills a whole region interior with `b`.
    pub fn fill_region(&self, coord: RegionCoord, b: Block) {
        let (bx, by, bz) = coord.origin_block();
        let n = REGION_SIZE as i32;
        let mut blocks = self.blocks.write();
        for y in 0..n {
            for z in 0..n {
                for x in 0..n {
                    let key = (bx + x, by + y, bz + z);
                    if b.is_air() {
                        blocks.remove(&key);
                    } else {
                        blocks.insert(key, b);
                    }
                }
            }
        }
    }

    pub fn add_attachment(&self, x: i32, y: i32, z: i32, kind: u32) {
        self.attachments.write().insert((x, y, z), kind);
    }

    pub fn mark_loaded(&self, coord: RegionCoord) {
        self.loaded.write().insert(coord);
    }

    pub fn mark_unloaded(&self, coord: RegionCoord) {
        self.loaded.write().remove(&coord);
    }
}

impl VoxelSource for MemoryWorld {
    fn snapshot_region(&self, origin: RegionCoord) -> RegionInput {
        if !self.is_region_loaded(origin) {
            return RegionInput::Unavailable;
        }
        let mut snap = {
            let blocks = self.blocks.read();
            VoxelSnapshot::from_world_fn(origin, |x, y, z| {
                blocks.get(&(x, y, z)).copied().unwrap_or(Block::AIR)
            })
        };
        {
            let (bx, by, bz) = origin.origin_block();
            let n = REGION_SIZE as i32;
            let attachments = self.attachments.read();
            let mut found: Vec<Attachment> = attachments
                .iter()
                .filter(|((x, y, z), _)| {
                    (bx..bx + n).contains(x) && (by..by + n).contains(y) && (bz..bz + n).contains(z)
                })
                .map(|(&pos, &kind)| Attachment { pos, kind })
                .collect();
            found.sort_by_key(|a| a.pos);
            snap.attachments = found;
        }
        if snap.is_interior_empty() {
            return RegionInput::Empty;
        }
        RegionInput::Snapshot(Box::new(snap))
    }

    fn is_region_loaded(&self, coord: RegionCoord) -> bool {
        self.all_loaded || self.loaded.read().contains(&coord)
    }

    fn block_table(&self) -> &BlockTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockClass;

    fn table() -> BlockTable {
        BlockTable::new().with("stone", 1, BlockClass::Opaque)
    }

    #[test]
    fn empty_region_reports_empty() {
        let w = MemoryWorld::new(table());
        assert!(matches!(
            w.snapshot_region(RegionCoord::new(0, 0, 0)),
            RegionInput::Empty
        ));
    }

    #[test]
    fn snapshot_includes_border_layer() {
        let w = MemoryWorld::new(table());
        w.set_block(0, 0, 0, Block::new(1));
        w.set_block(-1, 0, 0, Block::new(1));
        let RegionInput::Snapshot(snap) = w.snapshot_region(RegionCoord::new(0, 0, 0)) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.get(0, 0, 0), Block::new(1));
        assert_eq!(snap.get(-1, 0, 0), Block::new(1));
        assert_eq!(snap.get(1, 0, 0), Block::AIR);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let w = MemoryWorld::new(table());
        w.set_block(3, 3, 3, Block::new(1));
        let RegionInput::Snapshot(snap) = w.snapshot_region(RegionCoord::new(0, 0, 0)) else {
            panic!("expected snapshot");
        };
        w.set_block(3, 3, 3, Block::AIR);
        assert_eq!(snap.get(3, 3, 3), Block::new(1));
    }

    #[test]
    fn explicit_loading_gates_snapshots() {
        let w = MemoryWorld::with_explicit_loading(table());
        let c = RegionCoord::new(0, 0, 0);
        assert!(matches!(w.snapshot_region(c), RegionInput::Unavailable));
        w.mark_loaded(c);
        assert!(matches!(w.snapshot_region(c), RegionInput::Empty));
    }
}
