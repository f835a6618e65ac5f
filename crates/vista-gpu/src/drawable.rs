use crate::backend::GpuBufferId;
use crate::table::GpuBufferTable;

/// Uploaded geometry for one render pass of one region.
///
/// Disposal moves the handle to a sentinel state that must never be drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawableGeometry {
    buffer: Option<GpuBufferId>,
    vertex_count: u32,
}

impl DrawableGeometry {
    pub const DISPOSED: DrawableGeometry = DrawableGeometry {
        buffer: None,
        vertex_count: 0,
    };

    pub fn new(buffer: GpuBufferId, vertex_count: u32) -> Self {
        Self {
            buffer: Some(buffer),
            vertex_count,
        }
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.buffer.is_none()
    }

    #[inline]
    pub fn buffer(&self) -> Option<GpuBufferId> {
        self.buffer
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Buffer and vertex count to draw.
    pub fn draw_args(&self) -> Option<(GpuBufferId, u32)> {
        debug_assert!(!self.is_disposed(), "drawing disposed geometry");
        self.buffer.map(|b| (b, self.vertex_count))
    }

    /// Hands the buffer to `table` for deferred deletion. Idempotent.
    pub fn dispose(&mut self, table: &GpuBufferTable) {
        if let Some(id) = self.buffer.take() {
            table.dispose(id);
        }
        self.vertex_count = 0;
    }
}

impl Default for DrawableGeometry {
    fn default() -> Self {
        Self::DISPOSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuBackend, HeadlessBackend};

    #[test]
    fn dispose_twice_disposes_once() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let id = gpu.create_buffer(&[0; 36]);
        table.register(id);
        let mut d = DrawableGeometry::new(id, 1);
        d.dispose(&table);
        d.dispose(&table);
        assert!(d.is_disposed());
        assert_eq!(table.collect(&mut gpu), 1);
    }

    #[test]
    fn live_geometry_yields_draw_args() {
        let mut gpu = HeadlessBackend::new();
        let id = gpu.create_buffer(&[0; 72]);
        assert_eq!(DrawableGeometry::new(id, 2).draw_args(), Some((id, 2)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "drawing disposed geometry")]
    fn drawing_disposed_geometry_asserts() {
        let _ = DrawableGeometry::DISPOSED.draw_args();
    }
}
