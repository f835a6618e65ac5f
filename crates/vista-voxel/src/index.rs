use crate::coord::ColumnCoord;

/// Maps coordinates onto a wrapping, power-of-two slot table.
///
/// Two columns whose horizontal coordinates differ by less than `1 << bits_xz` on both
/// axes never share a slot, so every column loaded within
/// [`RegionIndexer::max_collision_free_radius`] of the observer has a unique slot.
/// Vertical slots wrap the same way with `bits_y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionIndexer {
    bits_xz: u32,
    bits_y: u32,
}

impl RegionIndexer {
    pub fn new(bits_xz: u32, bits_y: u32) -> Self {
        debug_assert!(bits_xz > 0 && bits_xz <= 12, "bits_xz out of range");
        debug_assert!(bits_y > 0 && bits_y <= 8, "bits_y out of range");
        Self { bits_xz, bits_y }
    }

    #[inline]
    pub fn column_capacity(&self) -> usize {
        1usize << (2 * self.bits_xz)
    }

    #[inline]
    pub fn vertical_capacity(&self) -> usize {
        1usize << self.bits_y
    }

    /// Largest observer radius (in regions) for which column slots are collision-free.
    #[inline]
    pub fn max_collision_free_radius(&self) -> i32 {
        ((1i32 << self.bits_xz) - 1) / 2
    }

    #[inline]
    pub fn column_slot(&self, col: ColumnCoord) -> usize {
        let mask = (1i32 << self.bits_xz) - 1;
        (((col.cx & mask) as usize) << self.bits_xz) | ((col.cz & mask) as usize)
    }

    #[inline]
    pub fn vertical_slot(&self, ry: i32) -> usize {
        (ry & ((1i32 << self.bits_y) - 1)) as usize
    }
}

impl Default for RegionIndexer {
    fn default() -> Self {
        Self::new(6, 5)
    }
}
