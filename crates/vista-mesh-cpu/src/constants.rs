//! Shared constants for vista-mesh-cpu.

pub(crate) const REGION_CELLS: usize = vista_voxel::REGION_SIZE
    * vista_voxel::REGION_SIZE
    * vista_voxel::REGION_SIZE;

// Greedy box extraction stops keeping boxes beyond this; the smallest are dropped first.
pub(crate) const MAX_OCCLUDER_BOXES: usize = 192;

// Colors
pub(crate) const OPAQUE_ALPHA: u8 = 255;
pub(crate) const TRANSLUCENT_ALPHA: u8 = 160;
