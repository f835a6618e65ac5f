use fastnoise_lite::{FastNoiseLite, NoiseType};
use hashbrown::HashMap;
use vista_voxel::{
    Block, BlockClass, BlockTable, REGION_SIZE, RegionCoord, RegionInput, VoxelSnapshot, VoxelSource,
};

pub const STONE: Block = Block::new(1);
pub const DIRT: Block = Block::new(2);
pub const GRASS: Block = Block::new(3);
pub const SAND: Block = Block::new(4);
pub const WATER: Block = Block::new(5);

pub fn default_block_table() -> BlockTable {
    BlockTable::new()
        .with("air", 0, BlockClass::Air)
        .with("stone", STONE.id, BlockClass::Opaque)
        .with("dirt", DIRT.id, BlockClass::Opaque)
        .with("grass", GRASS.id, BlockClass::Opaque)
        .with("sand", SAND.id, BlockClass::Opaque)
        .with("water", WATER.id, BlockClass::Translucent)
}

/// Height-noise world for the demo binary. Every region counts as loaded.
pub struct NoiseTerrain {
    noise: FastNoiseLite,
    table: BlockTable,
    min_height: i32,
    max_height: i32,
    sea_level: i32,
}

impl NoiseTerrain {
    pub fn new(seed: i32, table: BlockTable) -> Self {
        let mut noise = FastNoiseLite::with_seed(seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(0.01));
        Self {
            noise,
            table,
            min_height: 8,
            max_height: 96,
            sea_level: 40,
        }
    }

    /// Surface height (exclusive) of column `(x, z)`.
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let h = self.noise.get_noise_2d(x as f32, z as f32);
        let span = (self.max_height - self.min_height) as f32;
        ((h + 1.0) * 0.5 * span) as i32 + self.min_height
    }

    fn block_at(&self, y: i32, height: i32) -> Block {
        if y < height {
            if y == height - 1 {
                if height <= self.sea_level + 1 { SAND } else { GRASS }
            } else if y + 3 >= height {
                DIRT
            } else {
                STONE
            }
        } else if y < self.sea_level {
            WATER
        } else {
            Block::AIR
        }
    }
}

impl VoxelSource for NoiseTerrain {
    fn snapshot_region(&self, origin: RegionCoord) -> RegionInput {
        let (bx, by, bz) = origin.origin_block();
        let n = REGION_SIZE as i32;
        let mut heights = HashMap::with_capacity((REGION_SIZE + 2) * (REGION_SIZE + 2));
        for z in bz - 1..=bz + n {
            for x in bx - 1..=bx + n {
                heights.insert((x, z), self.height_at(x, z));
            }
        }
        let top = heights.values().copied().max().unwrap_or(0).max(self.sea_level);
        if by - 1 >= top {
            return RegionInput::Empty;
        }
        let snap = VoxelSnapshot::from_world_fn(origin, |x, y, z| {
            let h = heights.get(&(x, z)).copied().unwrap_or(0);
            self.block_at(y, h)
        });
        if snap.is_interior_empty() {
            return RegionInput::Empty;
        }
        RegionInput::Snapshot(Box::new(snap))
    }

    fn is_region_loaded(&self, _coord: RegionCoord) -> bool {
        true
    }

    fn block_table(&self) -> &BlockTable {
        &self.table
    }
}
