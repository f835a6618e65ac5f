use std::sync::Arc;

use vista_geom::{Aabb, Vec3};
use vista_voxel::{BlockTable, REGION_SIZE, VoxelSnapshot};

use crate::constants::{MAX_OCCLUDER_BOXES, REGION_CELLS};
use crate::face::Face;

const N: usize = REGION_SIZE;

/// Symmetric 6x6 face connectivity. Bit `a * 6 + b` is set when some open path inside the
/// region joins face `a` to face `b`; `a == b` means face `a` touches open space at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FaceLinks(u64);

impl FaceLinks {
    pub const NONE: FaceLinks = FaceLinks(0);
    pub const ALL: FaceLinks = FaceLinks((1u64 << 36) - 1);

    #[inline]
    pub fn link(&mut self, a: Face, b: Face) {
        self.0 |= 1u64 << (a.index() * 6 + b.index());
        self.0 |= 1u64 << (b.index() * 6 + a.index());
    }

    #[inline]
    pub fn sees(self, a: Face, b: Face) -> bool {
        self.0 & (1u64 << (a.index() * 6 + b.index())) != 0
    }

    #[inline]
    pub fn is_open(self, f: Face) -> bool {
        self.sees(f, f)
    }

    /// One bit per face (see [`Face::bit`]) that touches open space.
    pub fn open_mask(self) -> u8 {
        Face::ALL
            .iter()
            .filter(|f| self.is_open(**f))
            .fold(0, |m, f| m | f.bit())
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }
}

/// Opaque axis-aligned box in region-local cells; `max` is exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OccluderBox {
    pub min: [u8; 3],
    pub max: [u8; 3],
}

impl OccluderBox {
    pub fn volume(&self) -> u32 {
        (0..3)
            .map(|i| (self.max[i] - self.min[i]) as u32)
            .product()
    }

    pub fn to_aabb(&self, origin: Vec3) -> Aabb {
        let v = |a: [u8; 3]| Vec3::new(a[0] as f32, a[1] as f32, a[2] as f32);
        Aabb::new(origin + v(self.min), origin + v(self.max))
    }
}

/// Compact description of how a region blocks sight, computed once per build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OcclusionSummary {
    /// Nothing opaque: every face sees every face and nothing is hidden behind it.
    Empty,
    /// Every cell opaque.
    Full,
    Partial {
        links: FaceLinks,
        boxes: Arc<[OccluderBox]>,
    },
}

impl OcclusionSummary {
    /// Whether a sight line entering through `from` may leave through `to`.
    pub fn sees_through(&self, from: Face, to: Face) -> bool {
        match self {
            OcclusionSummary::Empty => true,
            OcclusionSummary::Full => false,
            OcclusionSummary::Partial { links, .. } => links.sees(from, to),
        }
    }

    pub fn is_open(&self, f: Face) -> bool {
        self.sees_through(f, f)
    }

    pub fn can_occlude(&self) -> bool {
        match self {
            OcclusionSummary::Empty => false,
            OcclusionSummary::Full => true,
            OcclusionSummary::Partial { boxes, .. } => !boxes.is_empty(),
        }
    }

    /// World-space occluder volumes for a region whose minimum corner is `origin`.
    pub fn occluders(&self, origin: Vec3) -> Vec<Aabb> {
        match self {
            OcclusionSummary::Empty => Vec::new(),
            OcclusionSummary::Full => vec![Aabb::cube(origin, N as f32)],
            OcclusionSummary::Partial { boxes, .. } => {
                boxes.iter().map(|b| b.to_aabb(origin)).collect()
            }
        }
    }
}

/// Reusable buffers for [`compute_occlusion`]; one per worker.
pub struct OcclusionScratch {
    opaque: Vec<bool>,
    visited: Vec<bool>,
    queue: Vec<u16>,
}

impl Default for OcclusionScratch {
    fn default() -> Self {
        Self {
            opaque: vec![false; REGION_CELLS],
            visited: vec![false; REGION_CELLS],
            queue: Vec::with_capacity(REGION_CELLS),
        }
    }
}

#[inline]
fn cell(x: usize, y: usize, z: usize) -> usize {
    (y * N + z) * N + x
}

#[inline]
fn unpack(i: usize) -> (usize, usize, usize) {
    (i % N, i / (N * N), (i / N) % N)
}

fn boundary_faces(x: usize, y: usize, z: usize) -> u8 {
    let mut m = 0;
    if x == 0 {
        m |= Face::NegX.bit();
    }
    if x == N - 1 {
        m |= Face::PosX.bit();
    }
    if y == 0 {
        m |= Face::NegY.bit();
    }
    if y == N - 1 {
        m |= Face::PosY.bit();
    }
    if z == 0 {
        m |= Face::NegZ.bit();
    }
    if z == N - 1 {
        m |= Face::PosZ.bit();
    }
    m
}

/// Summarizes the interior of `snap`. Border cells do not participate.
pub fn compute_occlusion(
    snap: &VoxelSnapshot,
    table: &BlockTable,
    scratch: &mut OcclusionScratch,
) -> OcclusionSummary {
    let mut opaque_count = 0usize;
    for y in 0..N {
        for z in 0..N {
            for x in 0..N {
                let o = table.is_opaque(snap.get(x as i32, y as i32, z as i32));
                scratch.opaque[cell(x, y, z)] = o;
                opaque_count += o as usize;
            }
        }
    }
    if opaque_count == 0 {
        return OcclusionSummary::Empty;
    }
    if opaque_count == REGION_CELLS {
        return OcclusionSummary::Full;
    }
    let links = flood_links(scratch);
    let boxes = extract_boxes(scratch);
    OcclusionSummary::Partial {
        links,
        boxes: boxes.into(),
    }
}

fn flood_links(scratch: &mut OcclusionScratch) -> FaceLinks {
    let OcclusionScratch {
        opaque,
        visited,
        queue,
    } = scratch;
    visited.copy_from_slice(opaque);
    let mut links = FaceLinks::NONE;
    for seed in 0..REGION_CELLS {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.clear();
        queue.push(seed as u16);
        let mut mask = 0u8;
        let mut head = 0;
        while head < queue.len() {
            let i = queue[head] as usize;
            head += 1;
            let (x, y, z) = unpack(i);
            mask |= boundary_faces(x, y, z);
            for f in Face::ALL {
                let (dx, dy, dz) = f.delta();
                let (nx, ny, nz) = (x as i32 + dx, y as i32 + dy, z as i32 + dz);
                if !(0..N as i32).contains(&nx)
                    || !(0..N as i32).contains(&ny)
                    || !(0..N as i32).contains(&nz)
                {
                    continue;
                }
                let j = cell(nx as usize, ny as usize, nz as usize);
                if !visited[j] {
                    visited[j] = true;
                    queue.push(j as u16);
                }
            }
        }
        for a in Face::ALL {
            if mask & a.bit() == 0 {
                continue;
            }
            for b in Face::ALL {
                if mask & b.bit() != 0 {
                    links.link(a, b);
                }
            }
        }
    }
    links
}

fn extract_boxes(scratch: &mut OcclusionScratch) -> Vec<OccluderBox> {
    let OcclusionScratch {
        opaque, visited, ..
    } = scratch;
    // `visited` now marks claimed opaque cells.
    visited.fill(false);
    let free = |v: &[bool], x: usize, y: usize, z: usize| {
        let i = cell(x, y, z);
        opaque[i] && !v[i]
    };
    let mut boxes = Vec::new();
    for y in 0..N {
        for z in 0..N {
            for x in 0..N {
                if !free(visited, x, y, z) {
                    continue;
                }
                let mut x1 = x + 1;
                while x1 < N && free(visited, x1, y, z) {
                    x1 += 1;
                }
                let mut z1 = z + 1;
                while z1 < N && (x..x1).all(|xx| free(visited, xx, y, z1)) {
                    z1 += 1;
                }
                let mut y1 = y + 1;
                while y1 < N && (z..z1).all(|zz| (x..x1).all(|xx| free(visited, xx, y1, zz))) {
                    y1 += 1;
                }
                for yy in y..y1 {
                    for zz in z..z1 {
                        for xx in x..x1 {
                            visited[cell(xx, yy, zz)] = true;
                        }
                    }
                }
                boxes.push(OccluderBox {
                    min: [x as u8, y as u8, z as u8],
                    max: [x1 as u8, y1 as u8, z1 as u8],
                });
            }
        }
    }
    if boxes.len() > MAX_OCCLUDER_BOXES {
        log::trace!(
            target: "occlusion",
            "dropping {} small occluder boxes",
            boxes.len() - MAX_OCCLUDER_BOXES
        );
        boxes.sort_by(|a, b| b.volume().cmp(&a.volume()));
        boxes.truncate(MAX_OCCLUDER_BOXES);
    }
    boxes
}
