//! Fixed ring of presentation buffers
//!
//! Each presented stream owns N buffers (three by default). A slot is busy
//! from the moment it is submitted to the display until the display sends
//! its release event, and while busy it owns the decoded frame it was filled
//! from. Slots are only ever written while free.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryIter};

use crate::error::{PipelineError, PoolError};
use crate::gpu::{AllocationRequest, BufferAllocator};
use crate::video::PlaneLayout;

/// Default number of buffers per stream (triple buffering)
pub const DEFAULT_BUFFER_COUNT: usize = 3;

/// Smallest pool that still lets the decoder run ahead of the display
pub const MIN_BUFFER_COUNT: usize = 2;

/// Which presented stream a pool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Overlay,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// Identity of a slot within one generation of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub stream: StreamKind,
    pub index: usize,
    pub generation: u64,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.stream, self.index, self.generation)
    }
}

/// The display is done with a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub slot: SlotId,
}

/// Handed to the display with each submission; fires at most once
#[derive(Debug)]
pub struct ReleaseToken {
    slot: SlotId,
    sender: Sender<ReleaseEvent>,
}

impl ReleaseToken {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Signal that the display no longer reads the buffer
    pub fn release(self) {
        // The inbox is gone once its stream is closed; nothing left to free
        let _ = self.sender.send(ReleaseEvent { slot: self.slot });
    }
}

/// Receiving end of release events for one stream
#[derive(Debug)]
pub struct ReleaseInbox {
    sender: Sender<ReleaseEvent>,
    receiver: Receiver<ReleaseEvent>,
}

impl ReleaseInbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Token that reports `slot` back to this inbox
    pub fn token(&self, slot: SlotId) -> ReleaseToken {
        ReleaseToken {
            slot,
            sender: self.sender.clone(),
        }
    }

    /// Events received so far, without blocking
    pub fn pending(&self) -> TryIter<'_, ReleaseEvent> {
        self.receiver.try_iter()
    }
}

impl Default for ReleaseInbox {
    fn default() -> Self {
        Self::new()
    }
}

/// One pooled buffer and its ownership state
#[derive(Debug)]
pub struct BufferSlot<B, F> {
    pub buffer: B,
    busy: bool,
    frame: Option<F>,
}

impl<B, F> BufferSlot<B, F> {
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Frame kept alive while the display reads this slot
    pub fn frame(&self) -> Option<&F> {
        self.frame.as_ref()
    }
}

/// Ring of N buffers for one stream
///
/// `B` is the GPU buffer type, `F` the decoded frame type that a busy slot
/// keeps alive.
#[derive(Debug)]
pub struct BufferPool<B, F> {
    stream: StreamKind,
    count: usize,
    generation: u64,
    layout: PlaneLayout,
    slots: Vec<BufferSlot<B, F>>,
}

impl<B, F> BufferPool<B, F> {
    /// Allocate `count` buffers for `layout`
    pub fn new<A>(
        allocator: &mut A,
        stream: StreamKind,
        count: usize,
        layout: PlaneLayout,
    ) -> Result<Self, PipelineError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        let mut pool = Self {
            stream,
            count: count.max(MIN_BUFFER_COUNT),
            generation: 0,
            layout,
            slots: Vec::new(),
        };
        pool.allocate_slots(allocator)?;
        Ok(pool)
    }

    fn allocate_slots<A>(&mut self, allocator: &mut A) -> Result<(), PipelineError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        let request = AllocationRequest::new(&self.layout);
        let mut slots = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            slots.push(BufferSlot {
                buffer: allocator.allocate(&request)?,
                busy: false,
                frame: None,
            });
        }
        self.slots = slots;

        tracing::info!(
            stream = %self.stream,
            count = self.count,
            generation = self.generation,
            format = %self.layout.gpu_format,
            width = self.layout.width,
            height = self.layout.height,
            "Allocated buffer pool"
        );
        Ok(())
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    /// Number of live slots (0 after a failed resize or destroy)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.busy).count()
    }

    fn id(&self, index: usize) -> SlotId {
        SlotId {
            stream: self.stream,
            index,
            generation: self.generation,
        }
    }

    fn index_of(&self, id: SlotId) -> Result<usize, PoolError> {
        if id.stream != self.stream || id.generation != self.generation || id.index >= self.slots.len() {
            return Err(PoolError::StaleSlot(id));
        }
        Ok(id.index)
    }

    /// First free slot in index order; the slot stays free until submitted
    pub fn acquire_free_slot(&self) -> Option<SlotId> {
        self.slots.iter().position(|slot| !slot.busy).map(|index| self.id(index))
    }

    pub fn slot(&self, id: SlotId) -> Option<&BufferSlot<B, F>> {
        let index = self.index_of(id).ok()?;
        self.slots.get(index)
    }

    pub fn buffer(&self, id: SlotId) -> Result<&B, PoolError> {
        let index = self.index_of(id)?;
        Ok(&self.slots[index].buffer)
    }

    /// Writable buffer of a free slot, together with the pool layout
    pub fn split_for_write(&mut self, id: SlotId) -> Result<(&mut B, &PlaneLayout), PoolError> {
        let index = self.index_of(id)?;
        let slot = &mut self.slots[index];
        if slot.busy {
            return Err(PoolError::SlotBusy(id));
        }
        Ok((&mut slot.buffer, &self.layout))
    }

    /// Hand the slot to the display; `frame` stays alive until release
    pub fn mark_submitted(&mut self, id: SlotId, frame: Option<F>) -> Result<(), PoolError> {
        let index = self.index_of(id)?;
        let slot = &mut self.slots[index];
        if slot.busy {
            return Err(PoolError::SlotBusy(id));
        }
        slot.busy = true;
        slot.frame = frame;
        tracing::trace!(slot = %id, "Slot submitted");
        Ok(())
    }

    /// The display is done with the slot; returns whether it became free
    pub fn on_released(&mut self, id: SlotId) -> bool {
        let Ok(index) = self.index_of(id) else {
            tracing::debug!(slot = %id, generation = self.generation, "Ignoring release of stale slot");
            return false;
        };
        let slot = &mut self.slots[index];
        if !slot.busy {
            return false;
        }
        slot.busy = false;
        slot.frame = None;
        tracing::trace!(slot = %id, "Slot released");
        true
    }

    /// Destroy every slot, busy or not; outstanding ids become stale
    pub fn destroy(&mut self) {
        if !self.slots.is_empty() {
            tracing::debug!(
                stream = %self.stream,
                busy = self.busy_count(),
                "Destroying buffer pool"
            );
        }
        self.slots.clear();
        self.generation += 1;
    }

    /// Replace every slot with a fresh one for `layout`
    ///
    /// Pending releases are not awaited. On allocation failure the pool is
    /// left empty.
    pub fn resize<A>(&mut self, allocator: &mut A, layout: PlaneLayout) -> Result<(), PipelineError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        self.destroy();
        self.layout = layout;
        self.allocate_slots(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuBuffer, MemoryAllocator, MemoryBuffer};
    use crate::video::{describe, DecoderFormat};
    use std::rc::Rc;

    fn pool(allocator: &mut MemoryAllocator) -> BufferPool<MemoryBuffer, Rc<()>> {
        let layout = describe(DecoderFormat::Yuv420p, 64, 32).unwrap();
        BufferPool::new(allocator, StreamKind::Video, DEFAULT_BUFFER_COUNT, layout).unwrap()
    }

    #[test]
    fn test_slot_display() {
        let id = SlotId {
            stream: StreamKind::Overlay,
            index: 2,
            generation: 5,
        };
        assert_eq!(id.to_string(), "overlay#2@5");
    }

    #[test]
    fn test_at_most_three_in_flight() {
        let mut allocator = MemoryAllocator::new();
        let mut pool = pool(&mut allocator);
        assert_eq!(pool.len(), 3);

        let mut submitted = Vec::new();
        for expected in 0..3 {
            let id = pool.acquire_free_slot().unwrap();
            assert_eq!(id.index, expected);
            pool.mark_submitted(id, None).unwrap();
            submitted.push(id);
        }
        assert_eq!(pool.busy_count(), 3);
        assert_eq!(pool.acquire_free_slot(), None);

        assert!(pool.on_released(submitted[1]));
        assert_eq!(pool.acquire_free_slot(), Some(submitted[1]));
    }

    #[test]
    fn test_acquire_does_not_mark_busy() {
        let mut allocator = MemoryAllocator::new();
        let pool = pool(&mut allocator);
        let first = pool.acquire_free_slot().unwrap();
        assert_eq!(pool.acquire_free_slot(), Some(first));
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn test_busy_slot_cannot_be_resubmitted() {
        let mut allocator = MemoryAllocator::new();
        let mut pool = pool(&mut allocator);
        let id = pool.acquire_free_slot().unwrap();
        pool.mark_submitted(id, None).unwrap();

        assert_eq!(pool.mark_submitted(id, None), Err(PoolError::SlotBusy(id)));
        assert!(matches!(pool.split_for_write(id), Err(PoolError::SlotBusy(_))));
    }

    #[test]
    fn test_release_drops_frame_once() {
        let mut allocator = MemoryAllocator::new();
        let mut pool = pool(&mut allocator);
        let frame = Rc::new(());
        let id = pool.acquire_free_slot().unwrap();

        pool.mark_submitted(id, Some(Rc::clone(&frame))).unwrap();
        assert_eq!(Rc::strong_count(&frame), 2);
        assert!(pool.slot(id).unwrap().frame().is_some());

        assert!(pool.on_released(id));
        assert_eq!(Rc::strong_count(&frame), 1);
        assert!(!pool.on_released(id));
    }

    #[test]
    fn test_resize_makes_old_ids_stale() {
        let mut allocator = MemoryAllocator::new();
        let mut pool = pool(&mut allocator);
        let frame = Rc::new(());
        let old = pool.acquire_free_slot().unwrap();
        pool.mark_submitted(old, Some(Rc::clone(&frame))).unwrap();

        let layout = describe(DecoderFormat::Yuv420p, 128, 96).unwrap();
        pool.resize(&mut allocator, layout.clone()).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.layout(), &layout);
        assert_eq!(Rc::strong_count(&frame), 1);
        for index in 0..3 {
            let id = SlotId {
                stream: StreamKind::Video,
                index,
                generation: pool.generation(),
            };
            let buffer = pool.buffer(id).unwrap();
            assert_eq!(buffer.size(), layout.allocation_size(buffer.stride()));
        }

        assert!(!pool.on_released(old));
        assert_eq!(pool.mark_submitted(old, None), Err(PoolError::StaleSlot(old)));
    }

    #[test]
    fn test_failed_resize_leaves_pool_empty() {
        let mut allocator = MemoryAllocator::new();
        let mut pool = pool(&mut allocator);
        allocator.fail_next_allocation();

        let layout = describe(DecoderFormat::Yuv420p, 128, 96).unwrap();
        assert!(matches!(
            pool.resize(&mut allocator, layout),
            Err(PipelineError::AllocationFailure { .. })
        ));
        assert!(pool.is_empty());
        assert_eq!(pool.acquire_free_slot(), None);
        assert_eq!(allocator.bytes_in_use(), 0);
    }

    #[test]
    fn test_resize_frees_before_allocating() {
        let layout = describe(DecoderFormat::Nv12, 64, 64).unwrap();
        let per_buffer = layout.allocation_size(64);
        let mut allocator = MemoryAllocator::with_budget(per_buffer * 3);

        let mut pool: BufferPool<MemoryBuffer, ()> =
            BufferPool::new(&mut allocator, StreamKind::Video, 3, layout.clone()).unwrap();
        pool.resize(&mut allocator, layout).unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_count_has_a_floor() {
        let mut allocator = MemoryAllocator::new();
        let layout = describe(DecoderFormat::Nv12, 16, 16).unwrap();
        let pool: BufferPool<MemoryBuffer, ()> = BufferPool::new(&mut allocator, StreamKind::Video, 1, layout).unwrap();
        assert_eq!(pool.len(), MIN_BUFFER_COUNT);
    }

    #[test]
    fn test_release_token_reaches_inbox() {
        let inbox = ReleaseInbox::new();
        let id = SlotId {
            stream: StreamKind::Video,
            index: 0,
            generation: 0,
        };
        let token = inbox.token(id);
        assert_eq!(token.slot(), id);
        token.release();
        assert_eq!(inbox.pending().collect::<Vec<_>>(), vec![ReleaseEvent { slot: id }]);
        assert_eq!(inbox.pending().count(), 0);
    }
}
