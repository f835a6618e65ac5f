use vista_geom::{Aabb, Vec3};

/// Edge length of a region in blocks.
pub const REGION_SIZE: usize = 16;
/// `log2(REGION_SIZE)`, used to quantize block coordinates.
pub const REGION_SHIFT: u32 = 4;

/// Integer-quantized region origin: block coordinates shifted right by [`REGION_SHIFT`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    pub rx: i32,
    pub ry: i32,
    pub rz: i32,
}

impl RegionCoord {
    #[inline]
    pub const fn new(rx: i32, ry: i32, rz: i32) -> Self {
        Self { rx, ry, rz }
    }

    /// Region containing the block at `(x, y, z)`.
    #[inline]
    pub const fn from_block(x: i32, y: i32, z: i32) -> Self {
        Self {
            rx: x >> REGION_SHIFT,
            ry: y >> REGION_SHIFT,
            rz: z >> REGION_SHIFT,
        }
    }

    /// Region containing a world-space position.
    #[inline]
    pub fn from_position(p: Vec3) -> Self {
        let (x, y, z) = p.floor_i32();
        Self::from_block(x, y, z)
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            rx: self.rx + dx,
            ry: self.ry + dy,
            rz: self.rz + dz,
        }
    }

    #[inline]
    pub fn column(self) -> ColumnCoord {
        ColumnCoord::new(self.rx, self.rz)
    }

    /// Squared distance in region units.
    #[inline]
    pub fn distance_sq(self, other: RegionCoord) -> i64 {
        let dx = i64::from(self.rx - other.rx);
        let dy = i64::from(self.ry - other.ry);
        let dz = i64::from(self.rz - other.rz);
        dx * dx + dy * dy + dz * dz
    }

    /// Minimum block corner.
    #[inline]
    pub const fn origin_block(self) -> (i32, i32, i32) {
        (
            self.rx << REGION_SHIFT,
            self.ry << REGION_SHIFT,
            self.rz << REGION_SHIFT,
        )
    }

    #[inline]
    pub fn origin(self) -> Vec3 {
        let (x, y, z) = self.origin_block();
        Vec3::new(x as f32, y as f32, z as f32)
    }

    #[inline]
    pub fn aabb(self) -> Aabb {
        Aabb::cube(self.origin(), REGION_SIZE as f32)
    }

    #[inline]
    pub fn center(self) -> Vec3 {
        self.origin() + Vec3::splat(REGION_SIZE as f32 * 0.5)
    }
}

impl From<(i32, i32, i32)> for RegionCoord {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<RegionCoord> for (i32, i32, i32) {
    fn from(value: RegionCoord) -> Self {
        (value.rx, value.ry, value.rz)
    }
}

/// Horizontal coordinate shared by every region of one column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColumnCoord {
    pub cx: i32,
    pub cz: i32,
}

impl ColumnCoord {
    #[inline]
    pub const fn new(cx: i32, cz: i32) -> Self {
        Self { cx, cz }
    }

    #[inline]
    pub fn region(self, ry: i32) -> RegionCoord {
        RegionCoord::new(self.cx, ry, self.cz)
    }

    #[inline]
    pub fn distance_sq(self, other: ColumnCoord) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dz = i64::from(self.cz - other.cz);
        dx * dx + dz * dz
    }
}
