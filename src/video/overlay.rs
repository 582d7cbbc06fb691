//! Overlay (subtitle) stream
//!
//! A second presented stream on top of the video: a strip in the lower
//! middle of the window, backed by its own ARGB8888 buffer pool. Each redraw
//! fills a free buffer with a solid colour; text rendering is not done here.

use super::convert::fill_solid;
use super::format::{describe, DecoderFormat};
use super::pool::{BufferPool, ReleaseInbox, SlotId, StreamKind, DEFAULT_BUFFER_COUNT};
use crate::error::PipelineError;
use crate::gpu::{BufferAllocator, DamageRect, PresentationSurface};

/// Horizontal margin, in percent of the window width
const MARGIN_HORIZONTAL: u32 = 40;
/// Vertical margin, in percent of the window height
const MARGIN_VERTICAL: u32 = 85;

/// Position and size of a surface within the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Where the overlay sits inside a window `area`
pub fn overlay_rect(area: Allocation) -> Allocation {
    Allocation {
        x: area.x + (area.width * MARGIN_HORIZONTAL / 100) as i32,
        y: area.y + (area.height * MARGIN_VERTICAL / 100) as i32,
        width: area.width * 2 / 10,
        height: area.height / 20,
    }
}

/// Overlay surface with its own buffers and release inbox
pub struct OverlayStream<A, P>
where
    A: BufferAllocator,
{
    allocator: A,
    surface: P,
    inbox: ReleaseInbox,
    pool: Option<BufferPool<A::Buffer, ()>>,
    buffer_count: usize,
    color: u32,
    allocation: Allocation,
}

impl<A, P> OverlayStream<A, P>
where
    A: BufferAllocator,
    P: PresentationSurface<A::Buffer>,
{
    /// Overlay filled with `color` (ARGB); buffers are created on the first resize
    pub fn new(allocator: A, surface: P, color: u32) -> Self {
        Self {
            allocator,
            surface,
            inbox: ReleaseInbox::new(),
            pool: None,
            buffer_count: DEFAULT_BUFFER_COUNT,
            color,
            allocation: Allocation::default(),
        }
    }

    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    pub fn pool(&self) -> Option<&BufferPool<A::Buffer, ()>> {
        self.pool.as_ref()
    }

    pub fn surface(&self) -> &P {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut P {
        &mut self.surface
    }

    /// Follow a window resize: clear the surface and recreate every buffer
    pub fn resize(&mut self, window: Allocation) -> Result<Allocation, PipelineError> {
        let allocation = overlay_rect(window);
        self.allocation = allocation;
        self.surface.detach();

        if allocation.width == 0 || allocation.height == 0 {
            if let Some(pool) = self.pool.as_mut() {
                pool.destroy();
            }
            return Ok(allocation);
        }

        let layout = describe(DecoderFormat::Bgra, allocation.width, allocation.height)?;
        match self.pool.as_mut() {
            Some(pool) => pool.resize(&mut self.allocator, layout)?,
            None => {
                self.pool = Some(BufferPool::new(
                    &mut self.allocator,
                    StreamKind::Overlay,
                    self.buffer_count,
                    layout,
                )?);
            }
        }
        tracing::debug!(?allocation, "Overlay resized");
        Ok(allocation)
    }

    /// Draw into a free buffer and present it; `None` when nothing was drawn
    pub fn redraw(&mut self) -> Option<SlotId> {
        let pool = self.pool.as_mut()?;
        for event in self.inbox.pending() {
            pool.on_released(event.slot);
        }

        let slot = pool.acquire_free_slot()?;
        let (buffer, layout) = pool.split_for_write(slot).ok()?;
        if let Err(err) = fill_solid(buffer, layout, self.color) {
            tracing::warn!(slot = %slot, "Skipping overlay redraw: {}", err);
            return None;
        }

        pool.mark_submitted(slot, None).ok()?;
        let buffer = pool.buffer(slot).ok()?;
        self.surface.submit(
            buffer,
            DamageRect::full(self.allocation.width, self.allocation.height),
            self.inbox.token(slot),
        );
        Some(slot)
    }

    /// Stop presenting and free the buffers
    pub fn close(&mut self) {
        self.surface.detach();
        if let Some(pool) = self.pool.as_mut() {
            pool.destroy();
        }
    }
}
