//! CPU-side region geometry: face meshing, occlusion summaries and translucent ordering.
#![forbid(unsafe_code)]

mod constants;
pub mod face;
pub mod mesh_build;
pub mod mesher;
pub mod occlusion;
pub mod sort;

pub use face::Face;
pub use mesh_build::{MeshBuild, VERTEX_STRIDE};
pub use mesher::{FaceCullingMesher, Mesher, RegionMesh};
pub use occlusion::{FaceLinks, OccluderBox, OcclusionScratch, OcclusionSummary, compute_occlusion};
pub use sort::TranslucentSortState;
