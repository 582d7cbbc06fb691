//! Presentation coordinator
//!
//! Drives one video stream through decode → pick free buffer → convert →
//! submit → await release. Each call to [`PresentationCoordinator::tick`]
//! is one redraw request from the display loop and presents at most one
//! frame.

use serde::{Deserialize, Serialize};

use super::convert::convert;
use super::decoder::{DecodePump, MediaSource, PumpStats, StreamInfo};
use super::format::{describe, PlaneLayout};
use super::frame::FrameData;
use super::hdr::{HdrMetadataSink, HdrState};
use super::pool::{BufferPool, ReleaseInbox, SlotId, StreamKind, DEFAULT_BUFFER_COUNT};
use crate::error::PipelineError;
use crate::gpu::{BufferAllocator, DamageRect, PresentationSurface};
use crate::telemetry::PipelineStats;

/// What to do with a decoded frame when every buffer is still on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Keep the frame and present it on the next tick that finds a free buffer
    #[default]
    HoldPending,
    /// Discard the frame and decode a new one next tick
    DropFrame,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was submitted from this slot
    Presented(SlotId),
    /// No buffer was free; try again on the next tick
    Deferred,
    /// The frame could not be converted and was discarded
    Dropped,
    /// The decoder has no more frames
    EndOfStream,
}

/// Construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub buffer_count: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Owns the decode pump, the video buffer pool and the display side of one stream
pub struct PresentationCoordinator<S, A, P, H>
where
    S: MediaSource,
    A: BufferAllocator,
{
    pump: DecodePump<S>,
    allocator: A,
    surface: P,
    hdr_sink: H,
    hdr: HdrState,
    pool: BufferPool<A::Buffer, S::Frame>,
    inbox: ReleaseInbox,
    pending: Option<S::Frame>,
    policy: BackpressurePolicy,
    stats: PipelineStats,
}

impl<S, A, P, H> PresentationCoordinator<S, A, P, H>
where
    S: MediaSource,
    A: BufferAllocator,
    P: PresentationSurface<A::Buffer>,
    H: HdrMetadataSink,
{
    /// Set up buffers for the stream `source` decodes
    ///
    /// Fails without presenting anything if the decoder format has no GPU
    /// mapping or the buffers cannot be allocated.
    pub fn open(
        source: S,
        mut allocator: A,
        surface: P,
        mut hdr_sink: H,
        options: CoordinatorOptions,
    ) -> Result<Self, PipelineError> {
        // Unsupported formats fail here, before anything is allocated
        let info = source.stream_info().clone();
        let layout = describe(info.format, info.width, info.height)?;

        hdr_sink.set_chromaticities(info.primaries.into());

        let pool = BufferPool::new(&mut allocator, StreamKind::Video, options.buffer_count, layout)?;

        tracing::info!(
            "Presenting {} {}x{} as {} ({} buffers, {:?})",
            info.format,
            info.width,
            info.height,
            pool.layout().gpu_format,
            pool.len(),
            options.backpressure
        );

        Ok(Self {
            pump: DecodePump::new(source),
            allocator,
            surface,
            hdr_sink,
            hdr: HdrState::default(),
            pool,
            inbox: ReleaseInbox::new(),
            pending: None,
            policy: options.backpressure,
            stats: PipelineStats::default(),
        })
    }

    /// Return released buffers to the pool; returns how many became free
    pub fn process_releases(&mut self) -> usize {
        let mut freed = 0;
        for event in self.inbox.pending() {
            // Events for destroyed buffers carry an old generation
            if self.pool.on_released(event.slot) {
                self.stats.releases += 1;
                freed += 1;
            } else {
                self.stats.stale_releases += 1;
            }
        }
        freed
    }

    /// Present the next frame if a buffer is free
    ///
    /// Per-frame failures are absorbed and reported as [`TickOutcome::Dropped`];
    /// only errors that end the stream are returned.
    pub fn tick(&mut self) -> Result<TickOutcome, PipelineError> {
        self.process_releases();

        // A frame held back by an earlier tick goes first
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.pump.next_frame()? {
                Some(frame) => {
                    self.stats.decoded += 1;
                    frame
                }
                None => return Ok(TickOutcome::EndOfStream),
            },
        };

        // Buffers always match the frames being decoded
        if !self.matches_layout(&frame) {
            let layout = describe(frame.format(), frame.width(), frame.height())?;
            self.reconfigure(layout)?;
        }

        let Some(slot) = self.pool.acquire_free_slot() else {
            self.stats.deferred_ticks += 1;
            match self.policy {
                BackpressurePolicy::HoldPending => {
                    tracing::trace!("All buffers busy, holding frame");
                    self.pending = Some(frame);
                }
                BackpressurePolicy::DropFrame => {
                    tracing::debug!("All buffers busy, dropping frame");
                    self.stats.dropped += 1;
                }
            }
            return Ok(TickOutcome::Deferred);
        };

        // Nothing reaches the surface unless the whole frame was written
        let (buffer, layout) = self.pool.split_for_write(slot)?;
        if let Err(err) = convert(buffer, &frame, layout) {
            if err.is_fatal() {
                return Err(err);
            }
            tracing::warn!(slot = %slot, "Dropping frame: {}", err);
            self.stats.dropped += 1;
            return Ok(TickOutcome::Dropped);
        }

        self.hdr.apply(&mut self.hdr_sink, &frame.hdr_metadata());

        // Busy before submit, so a surface that releases at once finds it busy
        let damage = DamageRect::full(frame.width(), frame.height());
        self.pool.mark_submitted(slot, Some(frame))?;
        let buffer = self.pool.buffer(slot)?;
        self.surface.submit(buffer, damage, self.inbox.token(slot));

        self.stats.presented += 1;
        tracing::trace!(slot = %slot, "Presented frame");
        Ok(TickOutcome::Presented(slot))
    }

    fn matches_layout(&self, frame: &S::Frame) -> bool {
        let layout = self.pool.layout();
        frame.width() == layout.width && frame.height() == layout.height && frame.format() == layout.decoder_format
    }

    /// Recreate every buffer for a new frame geometry
    ///
    /// Buffers on screen are abandoned rather than awaited; their late
    /// release events are ignored.
    fn reconfigure(&mut self, layout: PlaneLayout) -> Result<(), PipelineError> {
        tracing::info!(
            "Stream changed to {} {}x{}, reallocating buffers",
            layout.decoder_format,
            layout.width,
            layout.height
        );
        self.surface.detach();
        self.pool.resize(&mut self.allocator, layout)?;
        self.stats.reconfigurations += 1;
        Ok(())
    }

    /// Stop presenting and free every buffer
    pub fn close(&mut self) {
        self.surface.detach();
        self.hdr.reset(&mut self.hdr_sink);
        self.pending = None;
        self.pool.destroy();
    }

    pub fn stream_info(&self) -> &StreamInfo {
        self.pump.stream_info()
    }

    pub fn layout(&self) -> &PlaneLayout {
        self.pool.layout()
    }

    pub fn pool(&self) -> &BufferPool<A::Buffer, S::Frame> {
        &self.pool
    }

    pub fn surface(&self) -> &P {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut P {
        &mut self.surface
    }

    pub fn hdr_sink(&self) -> &H {
        &self.hdr_sink
    }

    /// Allocator shared with other streams of the same display
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn has_pending_frame(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn pump_stats(&self) -> PumpStats {
        self.pump.stats()
    }
}
