use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use vista_gpu::AllocatorConfig;
use vista_voxel::RegionIndexer;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub builds: BuildsConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub occlusion: OcclusionConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegionsConfig {
    /// Regions are created and built within this horizontal radius (in regions).
    #[serde(default = "default_view_radius")]
    pub view_radius: i32,
    /// Columns beyond this horizontal radius are closed.
    #[serde(default = "default_retention_radius")]
    pub retention_radius: i32,
    /// Squared region distance at or below which a region counts as near.
    #[serde(default = "default_near_distance_sq")]
    pub near_distance_sq: i64,
    #[serde(default = "default_min_region_y")]
    pub min_region_y: i32,
    #[serde(default = "default_max_region_y")]
    pub max_region_y: i32,
    #[serde(default = "default_index_bits_xz")]
    pub index_bits_xz: u32,
    #[serde(default = "default_index_bits_y")]
    pub index_bits_y: u32,
}

fn default_view_radius() -> i32 {
    12
}
fn default_retention_radius() -> i32 {
    16
}
fn default_near_distance_sq() -> i64 {
    3
}
fn default_min_region_y() -> i32 {
    -4
}
fn default_max_region_y() -> i32 {
    15
}
fn default_index_bits_xz() -> u32 {
    6
}
fn default_index_bits_y() -> u32 {
    5
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            view_radius: default_view_radius(),
            retention_radius: default_retention_radius(),
            near_distance_sq: default_near_distance_sq(),
            min_region_y: default_min_region_y(),
            max_region_y: default_max_region_y(),
            index_bits_xz: default_index_bits_xz(),
            index_bits_y: default_index_bits_y(),
        }
    }
}

impl RegionsConfig {
    pub fn indexer(&self) -> RegionIndexer {
        RegionIndexer::new(self.index_bits_xz, self.index_bits_y)
    }

    #[inline]
    pub fn contains_y(&self, ry: i32) -> bool {
        (self.min_region_y..=self.max_region_y).contains(&ry)
    }

    pub fn height(&self) -> usize {
        (self.max_region_y - self.min_region_y + 1).max(0) as usize
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BuildsConfig {
    /// 0 picks one less than the available cores.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_max_snapshots_per_frame")]
    pub max_snapshots_per_frame: usize,
    /// Queued builds whose squared distance moved by more than this are re-queued.
    #[serde(default = "default_reprioritize_delta")]
    pub reprioritize_delta: i64,
}

fn default_max_snapshots_per_frame() -> usize {
    64
}
fn default_reprioritize_delta() -> i64 {
    4
}

impl Default for BuildsConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_snapshots_per_frame: default_max_snapshots_per_frame(),
            reprioritize_delta: default_reprioritize_delta(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OcclusionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_raster_width")]
    pub raster_width: usize,
    #[serde(default = "default_raster_height")]
    pub raster_height: usize,
    /// Camera travel (world units) that forces the occluder raster to be redrawn.
    #[serde(default = "default_move_threshold")]
    pub camera_move_threshold: f32,
    /// Camera travel (world units) that triggers translucent resorting.
    #[serde(default = "default_move_threshold")]
    pub resort_move_threshold: f32,
}

fn default_true() -> bool {
    true
}
fn default_raster_width() -> usize {
    256
}
fn default_raster_height() -> usize {
    128
}
fn default_move_threshold() -> f32 {
    1.0
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            raster_width: default_raster_width(),
            raster_height: default_raster_height(),
            camera_move_threshold: default_move_threshold(),
            resort_move_threshold: default_move_threshold(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ShadowConfig {
    /// Horizontal radius (regions) of each cascade, innermost first. At most 8.
    #[serde(default = "default_cascade_radii")]
    pub cascade_radii: Vec<i32>,
}

fn default_cascade_radii() -> Vec<i32> {
    vec![4, 8, 16]
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            cascade_radii: default_cascade_radii(),
        }
    }
}

impl RendererConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: RendererConfig = toml::from_str(toml_str)?;
        Ok(cfg.validated())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Clamps values that would break storage or visibility invariants.
    pub fn validated(mut self) -> Self {
        let r = &mut self.regions;
        let max_radius = r.indexer().max_collision_free_radius();
        if r.retention_radius > max_radius {
            log::warn!(
                target: "storage",
                "retention_radius {} exceeds collision-free radius {max_radius} for {} index bits; clamping",
                r.retention_radius,
                r.index_bits_xz
            );
            r.retention_radius = max_radius;
        }
        if r.view_radius > r.retention_radius {
            log::warn!(
                target: "storage",
                "view_radius {} exceeds retention_radius {}; clamping",
                r.view_radius,
                r.retention_radius
            );
            r.view_radius = r.retention_radius;
        }
        let span = r.max_region_y - r.min_region_y + 1;
        if span > r.indexer().vertical_capacity() as i32 {
            let bits = r.index_bits_y;
            while r.index_bits_y < 8 && span > r.indexer().vertical_capacity() as i32 {
                r.index_bits_y += 1;
            }
            log::warn!(
                target: "storage",
                "vertical range {span} regions exceeds {bits} index bits; using {}",
                r.index_bits_y
            );
            let cap = r.indexer().vertical_capacity() as i32;
            if span > cap {
                r.max_region_y = r.min_region_y + cap - 1;
            }
        }
        if self.shadow.cascade_radii.len() > 8 {
            self.shadow.cascade_radii.truncate(8);
        }
        self.occlusion.raster_width = self.occlusion.raster_width.max(8);
        self.occlusion.raster_height = self.occlusion.raster_height.max(4);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vista_gpu::AllocatorKind;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.regions.view_radius, 12);
        assert_eq!(cfg.regions.retention_radius, 16);
        assert_eq!(cfg.regions.near_distance_sq, 3);
        assert_eq!(cfg.builds.max_snapshots_per_frame, 64);
        assert_eq!(cfg.allocator.kind, AllocatorKind::Pooled);
        assert_eq!(cfg.shadow.cascade_radii, vec![4, 8, 16]);
        assert!(cfg.occlusion.enabled);
    }

    #[test]
    fn sections_override_fields() {
        let cfg = RendererConfig::from_toml_str(
            r#"
            [regions]
            view_radius = 4
            retention_radius = 6
            [allocator]
            kind = "system"
            budget_bytes = 1048576
            [occlusion]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.regions.view_radius, 4);
        assert_eq!(cfg.regions.retention_radius, 6);
        assert_eq!(cfg.allocator.kind, AllocatorKind::System);
        assert_eq!(cfg.allocator.budget_bytes, 1 << 20);
        assert_eq!(cfg.allocator.min_block_bytes, 4096);
        assert!(!cfg.occlusion.enabled);
    }

    #[test]
    fn radii_are_clamped_to_the_indexer() {
        let cfg = RendererConfig::from_toml_str(
            r#"
            [regions]
            view_radius = 100
            retention_radius = 100
            index_bits_xz = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.regions.retention_radius, 15);
        assert_eq!(cfg.regions.view_radius, 15);
    }

    #[test]
    fn vertical_bits_grow_to_fit_the_range() {
        let cfg = RendererConfig::from_toml_str(
            r#"
            [regions]
            min_region_y = -8
            max_region_y = 40
            index_bits_y = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.regions.index_bits_y, 6);
        assert_eq!(cfg.regions.max_region_y, 40);

        let capped = RendererConfig::from_toml_str(
            r#"
            [regions]
            min_region_y = 0
            max_region_y = 999
            "#,
        )
        .unwrap();
        assert_eq!(capped.regions.index_bits_y, 8);
        assert_eq!(capped.regions.max_region_y, 255);
    }
}
