use std::f32::consts::{FRAC_PI_2, PI, TAU};

use vista_geom::{Aabb, Vec3};

/// Camera-centred coverage/depth grid over azimuth and elevation.
///
/// Occluders are rasterized conservatively: a bin is covered only when the rays through
/// all four of its corners hit the box, and it stores the farthest exit distance. Tests
/// use the box's angular bounds grown by one bin and its nearest distance, so a region is
/// reported occluded only when every bin it could touch is covered closer than it.
pub struct AngularOccluderRaster {
    width: usize,
    height: usize,
    origin: Vec3,
    version: u64,
    depth: Vec<f32>,
    corner_dirs: Vec<Vec3>,
    drawn_boxes: usize,
}

/// Angular bounds in fractional bin units; `u_max` may exceed `width` when wrapping.
#[derive(Clone, Copy, Debug)]
struct BinRect {
    u_min: f32,
    u_max: f32,
    v_min: f32,
    v_max: f32,
    full_turn: bool,
}

impl AngularOccluderRaster {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(8);
        let height = height.max(4);
        let mut corner_dirs = Vec::with_capacity((width + 1) * (height + 1));
        for j in 0..=height {
            let el = -FRAC_PI_2 + PI * j as f32 / height as f32;
            for i in 0..=width {
                let az = -PI + TAU * i as f32 / width as f32;
                corner_dirs.push(Vec3::new(el.cos() * az.cos(), el.sin(), el.cos() * az.sin()));
            }
        }
        Self {
            width,
            height,
            origin: Vec3::ZERO,
            version: 0,
            depth: vec![f32::INFINITY; width * height],
            corner_dirs,
            drawn_boxes: 0,
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    #[inline]
    pub fn drawn_boxes(&self) -> usize {
        self.drawn_boxes
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Clears coverage and re-centres the grid for occluder version `version`.
    pub fn reset(&mut self, origin: Vec3, version: u64) {
        self.origin = origin;
        self.version = version;
        self.depth.fill(f32::INFINITY);
        self.drawn_boxes = 0;
    }

    /// Fraction of bins holding any occluder.
    pub fn coverage(&self) -> f32 {
        let covered = self.depth.iter().filter(|d| d.is_finite()).count();
        covered as f32 / self.depth.len() as f32
    }

    fn rect(&self, b: &Aabb) -> BinRect {
        let o = self.origin;
        let (min, max) = (b.min - o, b.max - o);

        // Horizontal distance range from the camera to the box footprint.
        let cx = 0f32.clamp(min.x, max.x);
        let cz = 0f32.clamp(min.z, max.z);
        let r_min = (cx * cx + cz * cz).sqrt();
        let r_max = [min.x.abs().max(max.x.abs()), min.z.abs().max(max.z.abs())];
        let r_max = (r_max[0] * r_max[0] + r_max[1] * r_max[1]).sqrt();

        let el_hi = if max.y >= 0.0 { max.y.atan2(r_min) } else { max.y.atan2(r_max) };
        let el_lo = if min.y <= 0.0 { min.y.atan2(r_min) } else { min.y.atan2(r_max) };
        let v_min = (el_lo + FRAC_PI_2) / PI * self.height as f32;
        let v_max = (el_hi + FRAC_PI_2) / PI * self.height as f32;

        let inside_footprint = r_min == 0.0;
        if inside_footprint {
            return BinRect {
                u_min: 0.0,
                u_max: self.width as f32,
                v_min,
                v_max,
                full_turn: true,
            };
        }
        let mid = cz.atan2(cx);
        let (mut lo, mut hi) = (0f32, 0f32);
        for (x, z) in [(min.x, min.z), (min.x, max.z), (max.x, min.z), (max.x, max.z)] {
            let mut d = z.atan2(x) - mid;
            if d > PI {
                d -= TAU;
            } else if d < -PI {
                d += TAU;
            }
            lo = lo.min(d);
            hi = hi.max(d);
        }
        if hi - lo >= PI {
            return BinRect {
                u_min: 0.0,
                u_max: self.width as f32,
                v_min,
                v_max,
                full_turn: true,
            };
        }
        let scale = self.width as f32 / TAU;
        BinRect {
            u_min: (mid + lo + PI) * scale,
            u_max: (mid + hi + PI) * scale,
            v_min,
            v_max,
            full_turn: false,
        }
    }

    #[inline]
    fn bin(&self, u: i64, v: usize) -> usize {
        v * self.width + u.rem_euclid(self.width as i64) as usize
    }

    /// Distance along `dir` at which the ray from the origin leaves `b`, if it hits.
    fn exit_distance(&self, b: &Aabb, dir: Vec3) -> Option<f32> {
        let o = self.origin;
        let mut t0 = 0f32;
        let mut t1 = f32::INFINITY;
        for (oa, da, lo, hi) in [
            (o.x, dir.x, b.min.x, b.max.x),
            (o.y, dir.y, b.min.y, b.max.y),
            (o.z, dir.z, b.min.z, b.max.z),
        ] {
            if da.abs() < 1e-9 {
                if oa < lo || oa > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / da;
            let (a, c) = ((lo - oa) * inv, (hi - oa) * inv);
            let (a, c) = if a <= c { (a, c) } else { (c, a) };
            t0 = t0.max(a);
            t1 = t1.min(c);
            if t0 > t1 {
                return None;
            }
        }
        Some(t1)
    }

    /// Rasterizes one occluder box. Boxes that contain the camera are skipped.
    pub fn draw_box(&mut self, b: &Aabb) {
        if b.contains_point(self.origin) {
            return;
        }
        let r = self.rect(b);
        let v0 = (r.v_min.floor().max(0.0)) as usize;
        let v1 = (r.v_max.ceil() as usize).min(self.height);
        let (u0, u1) = if r.full_turn {
            (0, self.width as i64)
        } else {
            (r.u_min.floor() as i64, r.u_max.ceil() as i64)
        };
        let stride = self.width + 1;
        for v in v0..v1 {
            for u in u0..u1 {
                let i = u.rem_euclid(self.width as i64) as usize;
                let corners = [
                    v * stride + i,
                    v * stride + i + 1,
                    (v + 1) * stride + i,
                    (v + 1) * stride + i + 1,
                ];
                let mut far = 0f32;
                let mut covered = true;
                for c in corners {
                    match self.exit_distance(b, self.corner_dirs[c]) {
                        Some(t) => far = far.max(t),
                        None => {
                            covered = false;
                            break;
                        }
                    }
                }
                if covered {
                    let slot = self.bin(u, v);
                    if far < self.depth[slot] {
                        self.depth[slot] = far;
                    }
                }
            }
        }
        self.drawn_boxes += 1;
    }

    /// Whether any part of `b` may be visible past the drawn occluders.
    pub fn test(&self, b: &Aabb) -> bool {
        if b.contains_point(self.origin) {
            return true;
        }
        let r = self.rect(b);
        let near = b.distance_sq_to(self.origin).sqrt();
        let v0 = (r.v_min.floor() as i64 - 1).max(0) as usize;
        let v1 = ((r.v_max.ceil() as i64 + 1).max(0) as usize).min(self.height);
        let (u0, u1) = if r.full_turn {
            (0, self.width as i64)
        } else {
            (r.u_min.floor() as i64 - 1, r.u_max.ceil() as i64 + 1)
        };
        for v in v0..v1 {
            for u in u0..u1 {
                if self.depth[self.bin(u, v)] > near {
                    return true;
                }
            }
        }
        false
    }
}
