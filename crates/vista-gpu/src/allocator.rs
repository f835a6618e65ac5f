use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

/// Allocation failures. Never swallowed: callers decide whether to degrade or abort.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("invalid allocation size: {0} bytes")]
    InvalidSize(usize),

    #[error("allocation of {requested} bytes exceeds the {max} byte block limit")]
    TooLarge { requested: usize, max: usize },

    #[error("allocation budget exhausted: requested {requested}, {in_use} of {budget} bytes in use")]
    Exhausted {
        requested: usize,
        budget: usize,
        in_use: usize,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    /// Released blocks are kept in per-size free lists and handed out again.
    #[default]
    Pooled,
    /// Every block comes from and returns to the global allocator.
    System,
}

fn default_min_block_bytes() -> usize {
    4096
}
fn default_max_block_bytes() -> usize {
    64 << 20
}
fn default_budget_bytes() -> usize {
    1 << 30
}
fn default_pool_depth() -> usize {
    16
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default)]
    pub kind: AllocatorKind,
    #[serde(default = "default_min_block_bytes")]
    pub min_block_bytes: usize,
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: usize,
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: usize,
    /// Free blocks kept per size class when pooled.
    #[serde(default = "default_pool_depth")]
    pub pool_depth: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            kind: AllocatorKind::default(),
            min_block_bytes: default_min_block_bytes(),
            max_block_bytes: default_max_block_bytes(),
            budget_bytes: default_budget_bytes(),
            pool_depth: default_pool_depth(),
        }
    }
}

/// Block of native staging memory handed out by [`BufferAllocator`].
///
/// `capacity` is the rounded block size; `len` is how much of it holds data.
#[derive(Debug)]
pub struct NativeBuffer {
    id: u64,
    data: Vec<u8>,
    len: usize,
}

impl NativeBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copies `bytes` to the start of the block. The block must be large enough.
    pub fn fill(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.data.len(), "native buffer overflow");
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
    }
}

#[derive(Default)]
struct AllocState {
    /// Outstanding allocations: id -> block size.
    outstanding: HashMap<u64, usize>,
    in_use: usize,
    free: HashMap<usize, Vec<Vec<u8>>>,
}

/// Thread-safe staging memory allocator with leak tracking and bulk reclaim.
pub struct BufferAllocator {
    config: AllocatorConfig,
    state: Mutex<AllocState>,
    next_id: AtomicU64,
}

impl BufferAllocator {
    pub fn new(mut config: AllocatorConfig) -> Self {
        config.min_block_bytes = config.min_block_bytes.max(1).next_power_of_two();
        log::info!(
            target: "alloc",
            "buffer allocator: {:?}, blocks {}..={} bytes, budget {} bytes",
            config.kind,
            config.min_block_bytes,
            config.max_block_bytes,
            config.budget_bytes
        );
        Self {
            config,
            state: Mutex::new(AllocState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Size class `min_bytes` rounds to.
    pub fn block_size_for(&self, min_bytes: usize) -> Result<usize, AllocError> {
        if min_bytes == 0 {
            return Err(AllocError::InvalidSize(min_bytes));
        }
        let size = min_bytes
            .max(self.config.min_block_bytes)
            .checked_next_power_of_two()
            .ok_or(AllocError::InvalidSize(min_bytes))?;
        if size > self.config.max_block_bytes {
            return Err(AllocError::TooLarge {
                requested: min_bytes,
                max: self.config.max_block_bytes,
            });
        }
        Ok(size)
    }

    pub fn allocate(&self, min_bytes: usize) -> Result<NativeBuffer, AllocError> {
        let size = self.block_size_for(min_bytes)?;
        let mut st = self.state.lock();
        if st.in_use + size > self.config.budget_bytes {
            return Err(AllocError::Exhausted {
                requested: size,
                budget: self.config.budget_bytes,
                in_use: st.in_use,
            });
        }
        let recycled = match self.config.kind {
            AllocatorKind::Pooled => st.free.get_mut(&size).and_then(|list| list.pop()),
            AllocatorKind::System => None,
        };
        let data = recycled.unwrap_or_else(|| vec![0u8; size]);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        st.outstanding.insert(id, size);
        st.in_use += size;
        log::trace!(target: "alloc", "allocate #{id}: {size} bytes");
        Ok(NativeBuffer { id, data, len: 0 })
    }

    /// Allocates a block and copies `bytes` into it.
    pub fn allocate_with(&self, bytes: &[u8]) -> Result<NativeBuffer, AllocError> {
        let mut buf = self.allocate(bytes.len())?;
        buf.fill(bytes);
        Ok(buf)
    }

    /// Returns `buf`'s memory. No-op for buffers that are no longer tracked (already
    /// released, or issued before [`force_release_all`](Self::force_release_all)).
    /// Returns whether anything was released.
    pub fn release(&self, buf: &mut NativeBuffer) -> bool {
        let mut st = self.state.lock();
        let Some(size) = st.outstanding.remove(&buf.id) else {
            return false;
        };
        st.in_use -= size;
        let data = std::mem::take(&mut buf.data);
        buf.len = 0;
        if self.config.kind == AllocatorKind::Pooled && data.len() == size {
            let depth = self.config.pool_depth;
            let list = st.free.entry(size).or_default();
            if list.len() < depth {
                list.push(data);
            }
        }
        log::trace!(target: "alloc", "release #{}: {size} bytes", buf.id);
        true
    }

    /// Forgets every outstanding allocation and drops pooled blocks. Handles issued before
    /// this call must not be used; releasing them later is a no-op.
    pub fn force_release_all(&self) -> usize {
        let mut st = self.state.lock();
        let n = st.outstanding.len();
        st.outstanding.clear();
        st.free.clear();
        st.in_use = 0;
        if n > 0 {
            log::info!(target: "alloc", "force-released {n} outstanding allocations");
        }
        n
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    pub fn in_use_bytes(&self) -> usize {
        self.state.lock().in_use
    }

    pub fn pooled_bytes(&self) -> usize {
        self.state
            .lock()
            .free
            .iter()
            .map(|(size, list)| size * list.len())
            .sum()
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if !st.outstanding.is_empty() {
            log::warn!(
                target: "alloc",
                "allocator dropped with {} outstanding allocations ({} bytes)",
                st.outstanding.len(),
                st.in_use
            );
        }
    }
}
