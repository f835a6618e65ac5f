//! Voxel-side inputs of the region pipeline: blocks, region coordinates, snapshots and
//! the host world interface.
#![forbid(unsafe_code)]

pub mod block;
pub mod coord;
pub mod index;
pub mod memory;
pub mod snapshot;
pub mod source;

pub use block::{Block, BlockClass, BlockTable};
pub use coord::{ColumnCoord, REGION_SHIFT, REGION_SIZE, RegionCoord};
pub use index::RegionIndexer;
pub use memory::MemoryWorld;
pub use snapshot::{Attachment, SNAPSHOT_EDGE, VoxelSnapshot};
pub use source::{RegionInput, VoxelSource};
