use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: u16,
    pub state: u16,
}

impl Block {
    pub const AIR: Block = Block { id: 0, state: 0 };

    #[inline]
    pub const fn new(id: u16) -> Self {
        Self { id, state: 0 }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self.id == 0
    }
}

/// How a block participates in meshing and occlusion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockClass {
    #[default]
    Air,
    /// Fully opaque cube: hides neighbor faces and blocks sight through the region.
    Opaque,
    /// Blended geometry drawn in the translucent pass; never occludes.
    Translucent,
}

impl BlockClass {
    #[inline]
    pub fn is_opaque(self) -> bool {
        matches!(self, BlockClass::Opaque)
    }
}

/// Block id → class lookup. Ids without an entry are treated as air.
#[derive(Clone, Debug, Default)]
pub struct BlockTable {
    classes: Vec<BlockClass>,
    by_name: HashMap<String, u16>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overrides) the class for `id`.
    pub fn with(mut self, name: &str, id: u16, class: BlockClass) -> Self {
        self.insert(name, id, class);
        self
    }

    pub fn insert(&mut self, name: &str, id: u16, class: BlockClass) {
        let i = id as usize;
        if self.classes.len() <= i {
            self.classes.resize(i + 1, BlockClass::Air);
        }
        self.classes[i] = if id == 0 { BlockClass::Air } else { class };
        self.by_name.insert(name.to_string(), id);
    }

    #[inline]
    pub fn class_of(&self, b: Block) -> BlockClass {
        self.classes
            .get(b.id as usize)
            .copied()
            .unwrap_or(BlockClass::Air)
    }

    #[inline]
    pub fn is_opaque(&self, b: Block) -> bool {
        self.class_of(b).is_opaque()
    }

    pub fn id_by_name(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: BlocksConfig = toml::from_str(toml_str)?;
        let mut table = BlockTable::new();
        let mut entries: Vec<(String, BlockEntry)> = cfg.blocks.into_iter().collect();
        // Stable order so duplicate ids resolve the same way on every load.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, entry) in entries {
            let (id, class) = match entry {
                BlockEntry::Id(id) => (id, BlockClass::Opaque),
                BlockEntry::Detail { id, class } => (id, class.unwrap_or(BlockClass::Opaque)),
            };
            table.insert(&name, id, class);
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}

// --- Config ---

#[derive(Deserialize)]
pub struct BlocksConfig {
    pub blocks: HashMap<String, BlockEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum BlockEntry {
    // Simple: stone = 1 (opaque)
    Id(u16),
    // Detailed: glass = { id = 2, class = "translucent" }
    Detail { id: u16, class: Option<BlockClass> },
}
