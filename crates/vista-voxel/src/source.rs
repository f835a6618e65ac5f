use crate::block::BlockTable;
use crate::coord::RegionCoord;
use crate::snapshot::VoxelSnapshot;

/// What the host hands back when asked for a region's voxels.
#[derive(Debug)]
pub enum RegionInput {
    Snapshot(Box<VoxelSnapshot>),
    /// The region is known to contain nothing drawable.
    Empty,
    /// Voxel data is not loaded yet; ask again later.
    Unavailable,
}

/// Host world interface. Implementations must be callable from any thread; snapshots
/// must be self-contained copies that later world mutation cannot affect.
pub trait VoxelSource: Send + Sync {
    fn snapshot_region(&self, origin: RegionCoord) -> RegionInput;

    /// Whether voxel data for `coord` is loaded. Regions outside the world's vertical
    /// range should report `true` so they never hold back a build.
    fn is_region_loaded(&self, coord: RegionCoord) -> bool;

    fn block_table(&self) -> &BlockTable;
}
