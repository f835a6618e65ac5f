use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuBufferId};

/// Logical holder of a buffer retention, typically a frame id.
pub type RetainOwner = u64;

#[derive(Default)]
struct Entry {
    retainers: HashSet<RetainOwner>,
    disposed: bool,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<GpuBufferId, Entry>,
    doomed: Vec<GpuBufferId>,
}

/// Retain/release bookkeeping for live GPU buffers.
///
/// A buffer is handed to the backend for deletion only once it has been disposed and no
/// owner retains it. Callable from any thread; deletion itself happens in
/// [`collect`](Self::collect) on the render thread.
#[derive(Default)]
pub struct GpuBufferTable {
    state: Mutex<TableState>,
}

impl GpuBufferTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: GpuBufferId) {
        let prev = self.state.lock().entries.insert(id, Entry::default());
        debug_assert!(prev.is_none(), "gpu buffer {id:?} registered twice");
    }

    /// Adds `owner` to `id`'s retainers. Returns false for unknown or disposed buffers,
    /// which must not be drawn.
    pub fn retain(&self, id: GpuBufferId, owner: RetainOwner) -> bool {
        let mut st = self.state.lock();
        match st.entries.get_mut(&id) {
            Some(e) if !e.disposed => {
                e.retainers.insert(owner);
                true
            }
            _ => {
                debug_assert!(false, "retaining unknown or disposed gpu buffer {id:?}");
                false
            }
        }
    }

    /// Drops `owner`'s retention. Releasing an owner that does not hold `id` is a no-op.
    pub fn release(&self, id: GpuBufferId, owner: RetainOwner) -> bool {
        let mut st = self.state.lock();
        let TableState { entries, doomed } = &mut *st;
        let Some(e) = entries.get_mut(&id) else {
            return false;
        };
        if !e.retainers.remove(&owner) {
            return false;
        }
        if e.disposed && e.retainers.is_empty() {
            doomed.push(id);
        }
        true
    }

    /// Releases every retention held by `owner`.
    pub fn release_owner(&self, owner: RetainOwner) -> usize {
        let mut st = self.state.lock();
        let TableState { entries, doomed } = &mut *st;
        let mut n = 0;
        for (id, e) in entries.iter_mut() {
            if e.retainers.remove(&owner) {
                n += 1;
                if e.disposed && e.retainers.is_empty() {
                    doomed.push(*id);
                }
            }
        }
        n
    }

    /// Marks `id` as no longer wanted. Idempotent.
    pub fn dispose(&self, id: GpuBufferId) {
        let mut st = self.state.lock();
        let TableState { entries, doomed } = &mut *st;
        let Some(e) = entries.get_mut(&id) else {
            return;
        };
        if e.disposed {
            return;
        }
        e.disposed = true;
        if e.retainers.is_empty() {
            doomed.push(id);
        }
    }

    pub fn retainers(&self, id: GpuBufferId) -> usize {
        self.state
            .lock()
            .entries
            .get(&id)
            .map_or(0, |e| e.retainers.len())
    }

    pub fn is_tracked(&self, id: GpuBufferId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every disposed, unretained buffer. Render thread only.
    pub fn collect(&self, backend: &mut dyn GpuBackend) -> usize {
        let doomed = {
            let mut st = self.state.lock();
            let doomed = std::mem::take(&mut st.doomed);
            for id in &doomed {
                st.entries.remove(id);
            }
            doomed
        };
        for id in &doomed {
            backend.delete_buffer(*id);
        }
        if !doomed.is_empty() {
            log::trace!(target: "upload", "deleted {} gpu buffers", doomed.len());
        }
        doomed.len()
    }

    /// Forgets every buffer without deleting it, for when the device's names are already
    /// gone (context loss).
    pub fn forget_all(&self) -> usize {
        let mut st = self.state.lock();
        let n = st.entries.len();
        st.entries.clear();
        st.doomed.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn disposed_buffer_waits_for_retainers() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let id = gpu.create_buffer(&[1, 2, 3]);
        table.register(id);
        assert!(table.retain(id, 7));
        table.dispose(id);
        assert_eq!(table.collect(&mut gpu), 0);
        assert!(gpu.is_live(id));
        assert!(table.release(id, 7));
        assert_eq!(table.collect(&mut gpu), 1);
        assert!(!gpu.is_live(id));
        assert!(!table.is_tracked(id));
    }

    #[test]
    fn release_is_never_negative() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let id = gpu.create_buffer(&[0]);
        table.register(id);
        table.retain(id, 1);
        assert!(table.release(id, 1));
        assert!(!table.release(id, 1));
        assert!(!table.release(id, 2));
        assert_eq!(table.retainers(id), 0);
        assert_eq!(table.collect(&mut gpu), 0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let id = gpu.create_buffer(&[0]);
        table.register(id);
        table.dispose(id);
        table.dispose(id);
        assert_eq!(table.collect(&mut gpu), 1);
        assert_eq!(gpu.deleted, 1);
    }

    #[test]
    fn release_owner_drops_all_of_a_frame() {
        let mut gpu = HeadlessBackend::new();
        let table = GpuBufferTable::new();
        let a = gpu.create_buffer(&[0]);
        let b = gpu.create_buffer(&[0]);
        table.register(a);
        table.register(b);
        table.retain(a, 3);
        table.retain(b, 3);
        table.retain(b, 4);
        table.dispose(a);
        table.dispose(b);
        assert_eq!(table.release_owner(3), 2);
        assert_eq!(table.collect(&mut gpu), 1);
        assert!(gpu.is_live(b));
    }
}
