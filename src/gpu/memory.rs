//! CPU memory backend
//!
//! Buffers are plain heap allocations with the row alignment a scanout
//! allocator would impose. Used for headless playback, benchmarks and tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use super::{
    plane_exports, AllocationRequest, BufferAllocator, BufferHandle, DamageRect, GpuBuffer, PlaneExport,
    PresentationSurface,
};
use crate::error::PipelineError;
use crate::video::ReleaseToken;

/// Row alignment applied to every buffer
pub const MEMORY_STRIDE_ALIGNMENT: u32 = 64;

#[derive(Debug, Default)]
struct AllocatorState {
    next_handle: Cell<u64>,
    budget: Option<usize>,
    fail_next: Cell<bool>,
    /// Shared with every buffer; the next map of any of them fails
    fail_next_map: Rc<Cell<bool>>,
    /// Bytes held by live buffers
    in_use: Rc<Cell<usize>>,
}

/// Allocates buffers from the heap; clones share handles and budget
#[derive(Debug, Clone, Default)]
pub struct MemoryAllocator {
    state: Rc<AllocatorState>,
}

impl MemoryAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses to hold more than `bytes` at once
    pub fn with_budget(bytes: usize) -> Self {
        Self {
            state: Rc::new(AllocatorState {
                budget: Some(bytes),
                ..Default::default()
            }),
        }
    }

    /// Make the next allocation fail
    pub fn fail_next_allocation(&self) {
        self.state.fail_next.set(true);
    }

    /// Make the next `map_write` of any buffer from this allocator fail
    pub fn fail_next_map(&self) {
        self.state.fail_next_map.set(true);
    }

    /// Bytes held by buffers that are still alive
    pub fn bytes_in_use(&self) -> usize {
        self.state.in_use.get()
    }
}

impl BufferAllocator for MemoryAllocator {
    type Buffer = MemoryBuffer;

    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<MemoryBuffer, PipelineError> {
        if self.state.fail_next.replace(false) {
            return Err(request.failure("allocation rejected"));
        }

        let layout = request.layout;
        let stride = layout.allocation.row_bytes().next_multiple_of(MEMORY_STRIDE_ALIGNMENT);
        let size = layout.allocation_size(stride);

        let in_use = self.state.in_use.get();
        if let Some(budget) = self.state.budget {
            if in_use + size > budget {
                return Err(request.failure(format!(
                    "out of memory: {} bytes requested, {} of {} in use",
                    size, in_use, budget
                )));
            }
        }
        self.state.in_use.set(in_use + size);

        let handle = BufferHandle(self.state.next_handle.get());
        self.state.next_handle.set(handle.0 + 1);

        tracing::trace!(%handle, stride, size, format = %layout.gpu_format, "Allocated memory buffer");

        Ok(MemoryBuffer {
            handle,
            stride,
            data: vec![0; size],
            planes: plane_exports(layout, stride),
            in_use: Rc::clone(&self.state.in_use),
            fail_next_map: Rc::clone(&self.state.fail_next_map),
            fail_map: false,
            maps: 0,
            unmaps: 0,
        })
    }
}

/// Heap-backed buffer
#[derive(Debug)]
pub struct MemoryBuffer {
    handle: BufferHandle,
    stride: u32,
    data: Vec<u8>,
    planes: Vec<PlaneExport>,
    in_use: Rc<Cell<usize>>,
    fail_next_map: Rc<Cell<bool>>,
    fail_map: bool,
    maps: u32,
    unmaps: u32,
}

impl MemoryBuffer {
    /// Current buffer contents
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Make every following `map_write` fail
    pub fn set_map_failure(&mut self, fail: bool) {
        self.fail_map = fail;
    }

    /// Whether a mapping is outstanding
    pub fn is_mapped(&self) -> bool {
        self.maps != self.unmaps
    }

    /// Number of successful maps
    pub fn map_count(&self) -> u32 {
        self.maps
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        self.in_use.set(self.in_use.get().saturating_sub(self.data.len()));
    }
}

/// Write access to a [`MemoryBuffer`]
pub struct MemoryMapping<'a> {
    buffer: &'a mut MemoryBuffer,
}

impl Deref for MemoryMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer.data
    }
}

impl DerefMut for MemoryMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.data
    }
}

impl Drop for MemoryMapping<'_> {
    fn drop(&mut self) {
        self.buffer.unmaps += 1;
    }
}

impl GpuBuffer for MemoryBuffer {
    type Mapping<'a> = MemoryMapping<'a>;

    fn handle(&self) -> BufferHandle {
        self.handle
    }

    fn stride(&self) -> u32 {
        self.stride
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn planes(&self) -> &[PlaneExport] {
        &self.planes
    }

    fn map_write(&mut self) -> Result<MemoryMapping<'_>, PipelineError> {
        if self.fail_map || self.fail_next_map.replace(false) {
            return Err(PipelineError::MapFailure(format!("{} cannot be mapped", self.handle)));
        }
        self.maps += 1;
        Ok(MemoryMapping { buffer: self })
    }
}

/// When a [`HeadlessSurface`] gives buffers back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// The previously shown buffer is released when a new one is submitted
    #[default]
    OnNextSubmit,
    /// Buffers are held until [`HeadlessSurface::release_oldest`] or
    /// [`HeadlessSurface::release_all`] is called
    Manual,
}

/// Surface without a display; keeps release tokens the way a compositor would
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    mode: ReleaseMode,
    held: VecDeque<(BufferHandle, ReleaseToken)>,
    submissions: u64,
    last_damage: Option<DamageRect>,
    last_handle: Option<BufferHandle>,
}

impl HeadlessSurface {
    pub fn new(mode: ReleaseMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Release the buffer that has been held the longest
    pub fn release_oldest(&mut self) -> Option<BufferHandle> {
        let (handle, token) = self.held.pop_front()?;
        token.release();
        Some(handle)
    }

    /// Release every held buffer
    pub fn release_all(&mut self) -> usize {
        let count = self.held.len();
        for (_, token) in self.held.drain(..) {
            token.release();
        }
        count
    }

    /// Buffers currently owned by the surface
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn last_damage(&self) -> Option<DamageRect> {
        self.last_damage
    }

    /// Buffer shown most recently
    pub fn last_handle(&self) -> Option<BufferHandle> {
        self.last_handle
    }
}

impl<B: GpuBuffer> PresentationSurface<B> for HeadlessSurface {
    fn submit(&mut self, buffer: &B, damage: DamageRect, token: ReleaseToken) {
        if self.mode == ReleaseMode::OnNextSubmit {
            self.release_all();
        }
        self.held.push_back((buffer.handle(), token));
        self.submissions += 1;
        self.last_damage = Some(damage);
        self.last_handle = Some(buffer.handle());
    }

    fn detach(&mut self) {
        if !self.held.is_empty() {
            tracing::debug!(held = self.held.len(), "Detaching surface, dropping pending releases");
        }
        self.held.clear();
        self.last_handle = None;
    }
}
