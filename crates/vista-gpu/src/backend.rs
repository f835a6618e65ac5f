use hashbrown::HashMap;

/// Backend-assigned buffer name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuBufferId(pub u32);

/// Graphics device seam. Only ever called from the render thread.
pub trait GpuBackend {
    fn create_buffer(&mut self, bytes: &[u8]) -> GpuBufferId;
    fn delete_buffer(&mut self, id: GpuBufferId);
}

/// In-memory backend for tools and tests.
#[derive(Default)]
pub struct HeadlessBackend {
    next: u32,
    buffers: HashMap<GpuBufferId, Vec<u8>>,
    pub created: u64,
    pub deleted: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn contents(&self, id: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    pub fn is_live(&self, id: GpuBufferId) -> bool {
        self.buffers.contains_key(&id)
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&mut self, bytes: &[u8]) -> GpuBufferId {
        self.next += 1;
        let id = GpuBufferId(self.next);
        self.buffers.insert(id, bytes.to_vec());
        self.created += 1;
        id
    }

    fn delete_buffer(&mut self, id: GpuBufferId) {
        let existed = self.buffers.remove(&id).is_some();
        debug_assert!(existed, "deleting unknown gpu buffer {id:?}");
        self.deleted += 1;
    }
}
