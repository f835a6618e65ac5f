use vista_geom::Vec3;

use crate::face::Face;

/// Bytes per vertex in [`MeshBuild::to_bytes`]: position, normal and uv as `f32`, color as
/// four `u8`.
pub const VERTEX_STRIDE: usize = (3 + 3 + 2) * 4 + 4;

/// Quad soup in region-local coordinates. Every four consecutive vertices form one quad;
/// the renderer draws them with a shared quad index pattern.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct MeshBuild {
    pub pos: Vec<f32>,
    pub norm: Vec<f32>,
    pub uv: Vec<f32>,
    pub col: Vec<u8>,
}

impl MeshBuild {
    /// Clears all arrays but retains capacity for reuse across builds.
    #[inline]
    pub fn clear_keep_capacity(&mut self) {
        self.pos.clear();
        self.norm.clear();
        self.uv.clear();
        self.col.clear();
    }

    /// Pre-reserve capacity for approximately `n_quads` quads worth of data.
    #[inline]
    pub fn reserve_quads(&mut self, n_quads: usize) {
        self.pos.reserve(n_quads * 4 * 3);
        self.norm.reserve(n_quads * 4 * 3);
        self.uv.reserve(n_quads * 4 * 2);
        self.col.reserve(n_quads * 4 * 4);
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.vertex_count() / 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// Appends a quad with explicit per-vertex UVs. Winding is corrected to face `n`.
    pub fn add_quad_uv(
        &mut self,
        a: Vec3,
        b: Vec3,
        c: Vec3,
        d: Vec3,
        n: Vec3,
        mut uvs: [(f32, f32); 4],
        rgba: [u8; 4],
    ) {
        let mut vs = [a, d, c, b];
        let e1 = vs[1] - vs[0];
        let e2 = vs[2] - vs[0];
        let cross = Vec3::new(
            e1.y * e2.z - e1.z * e2.y,
            e1.z * e2.x - e1.x * e2.z,
            e1.x * e2.y - e1.y * e2.x,
        );
        if cross.dot(n) < 0.0 {
            vs.swap(1, 3);
            uvs.swap(1, 3);
        }
        for i in 0..4 {
            self.pos.extend_from_slice(&[vs[i].x, vs[i].y, vs[i].z]);
            self.norm.extend_from_slice(&[n.x, n.y, n.z]);
            self.uv.extend_from_slice(&[uvs[i].0, -uvs[i].1]);
            self.col.extend_from_slice(&rgba);
        }
    }

    /// Emits the `face` side of the unit cell whose minimum corner is `cell`.
    pub fn add_cell_face(&mut self, face: Face, cell: Vec3, rgba: [u8; 4]) {
        let o = cell;
        let (a, b, c, d) = match face {
            Face::PosY => {
                let y = o.y + 1.0;
                (
                    Vec3::new(o.x, y, o.z),
                    Vec3::new(o.x + 1.0, y, o.z),
                    Vec3::new(o.x + 1.0, y, o.z + 1.0),
                    Vec3::new(o.x, y, o.z + 1.0),
                )
            }
            Face::NegY => (
                Vec3::new(o.x, o.y, o.z + 1.0),
                Vec3::new(o.x + 1.0, o.y, o.z + 1.0),
                Vec3::new(o.x + 1.0, o.y, o.z),
                o,
            ),
            Face::PosX => {
                let x = o.x + 1.0;
                (
                    Vec3::new(x, o.y + 1.0, o.z + 1.0),
                    Vec3::new(x, o.y + 1.0, o.z),
                    Vec3::new(x, o.y, o.z),
                    Vec3::new(x, o.y, o.z + 1.0),
                )
            }
            Face::NegX => (
                Vec3::new(o.x, o.y + 1.0, o.z),
                Vec3::new(o.x, o.y + 1.0, o.z + 1.0),
                Vec3::new(o.x, o.y, o.z + 1.0),
                o,
            ),
            Face::PosZ => {
                let z = o.z + 1.0;
                (
                    Vec3::new(o.x + 1.0, o.y + 1.0, z),
                    Vec3::new(o.x, o.y + 1.0, z),
                    Vec3::new(o.x, o.y, z),
                    Vec3::new(o.x + 1.0, o.y, z),
                )
            }
            Face::NegZ => (
                Vec3::new(o.x, o.y + 1.0, o.z),
                Vec3::new(o.x + 1.0, o.y + 1.0, o.z),
                Vec3::new(o.x + 1.0, o.y, o.z),
                o,
            ),
        };
        let uv_from = |p: Vec3| match face {
            Face::PosY | Face::NegY => (p.x, p.z),
            Face::PosX | Face::NegX => (p.z, p.y),
            Face::PosZ | Face::NegZ => (p.x, p.y),
        };
        let uvs = [uv_from(a), uv_from(d), uv_from(c), uv_from(b)];
        self.add_quad_uv(a, b, c, d, face.normal(), uvs, rgba);
    }

    /// Mean of quad `q`'s four corners.
    pub fn quad_center(&self, q: usize) -> Vec3 {
        let mut sum = Vec3::ZERO;
        for v in q * 4..q * 4 + 4 {
            sum += Vec3::new(self.pos[v * 3], self.pos[v * 3 + 1], self.pos[v * 3 + 2]);
        }
        sum / 4.0
    }

    /// Copies quad `q` of `src` onto the end of `self`.
    pub fn push_quad_from(&mut self, src: &MeshBuild, q: usize) {
        let v0 = q * 4;
        self.pos.extend_from_slice(&src.pos[v0 * 3..(v0 + 4) * 3]);
        self.norm.extend_from_slice(&src.norm[v0 * 3..(v0 + 4) * 3]);
        self.uv.extend_from_slice(&src.uv[v0 * 2..(v0 + 4) * 2]);
        self.col.extend_from_slice(&src.col[v0 * 4..(v0 + 4) * 4]);
    }

    /// Interleaved little-endian vertex data, `VERTEX_STRIDE` bytes per vertex.
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.vertex_count();
        let mut out = Vec::with_capacity(n * VERTEX_STRIDE);
        for v in 0..n {
            for f in &self.pos[v * 3..v * 3 + 3] {
                out.extend_from_slice(&f.to_le_bytes());
            }
            for f in &self.norm[v * 3..v * 3 + 3] {
                out.extend_from_slice(&f.to_le_bytes());
            }
            for f in &self.uv[v * 2..v * 2 + 2] {
                out.extend_from_slice(&f.to_le_bytes());
            }
            out.extend_from_slice(&self.col[v * 4..v * 4 + 4]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_faces_wind_along_their_normal() {
        for face in Face::ALL {
            let mut mb = MeshBuild::default();
            mb.add_cell_face(face, Vec3::new(2.0, 3.0, 4.0), [1, 2, 3, 4]);
            assert_eq!(mb.quad_count(), 1);
            let p = |i: usize| Vec3::new(mb.pos[i * 3], mb.pos[i * 3 + 1], mb.pos[i * 3 + 2]);
            let e1 = p(1) - p(0);
            let e2 = p(2) - p(0);
            let cross = Vec3::new(
                e1.y * e2.z - e1.z * e2.y,
                e1.z * e2.x - e1.x * e2.z,
                e1.x * e2.y - e1.y * e2.x,
            );
            assert!(cross.dot(face.normal()) > 0.0, "{face:?}");
        }
    }

    #[test]
    fn quad_center_sits_on_the_face() {
        let mut mb = MeshBuild::default();
        mb.add_cell_face(Face::PosY, Vec3::ZERO, [0; 4]);
        assert_eq!(mb.quad_center(0), Vec3::new(0.5, 1.0, 0.5));
    }

    #[test]
    fn to_bytes_uses_vertex_stride() {
        let mut mb = MeshBuild::default();
        mb.add_cell_face(Face::NegZ, Vec3::ZERO, [9; 4]);
        mb.add_cell_face(Face::PosZ, Vec3::ZERO, [9; 4]);
        assert_eq!(mb.to_bytes().len(), 8 * VERTEX_STRIDE);
    }
}
