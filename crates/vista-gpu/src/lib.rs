//! GPU-facing resource layer: native staging memory, backend buffer ids and their
//! retain/release bookkeeping.
#![forbid(unsafe_code)]

mod allocator;
mod backend;
mod drawable;
mod table;

pub use allocator::{AllocError, AllocatorConfig, AllocatorKind, BufferAllocator, NativeBuffer};
pub use backend::{GpuBackend, GpuBufferId, HeadlessBackend};
pub use drawable::DrawableGeometry;
pub use table::{GpuBufferTable, RetainOwner};
