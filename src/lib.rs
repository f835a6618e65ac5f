//! Region build pipeline for voxel terrain: storage of fixed-size regions around the
//! camera, background meshing with cancellation, occlusion-culled visibility, translucent
//! resorting and GPU upload bookkeeping.

pub mod build;
pub mod config;
pub mod region;
pub mod renderer;
pub mod resort;
pub mod storage;
pub mod terrain;
pub mod visibility;

pub use config::RendererConfig;
pub use region::{BuildInput, Pass, Region, RegionBuildState, VisibilityStatus};
pub use renderer::{DrawItem, DrawList, FrameInput, FrameStats, RegionRenderer};
pub use storage::{PositionUpdate, RegionColumn, RegionStorage};
pub use visibility::{Everything, Frustum, ShadowProjector, ShadowSets, TerrainVisibility};
