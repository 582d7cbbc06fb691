//! Frame-to-buffer video pipeline
//!
//! Decodes video with FFmpeg via the `ffmpeg-next` crate and presents each
//! frame from a small pool of GPU-importable buffers. Buffers are filled on
//! the CPU in the layout the display expects (YUV420, NV12, P010/P012/P016)
//! and handed back by asynchronous release events.

mod convert;
mod coordinator;
mod decoder;
mod format;
mod frame;
mod hdr;
mod overlay;
mod pool;

pub use convert::{convert, fill_solid};
pub use coordinator::{BackpressurePolicy, CoordinatorOptions, PresentationCoordinator, TickOutcome};
pub use decoder::{DecodePump, FfmpegSource, MediaSource, PumpState, PumpStats, Received, StreamInfo, StreamPacket};
pub use format::{
    describe, AllocationGeometry, DecoderFormat, Endian, GpuFormat, PlaneGeometry, PlaneLayout, PlanePlacement, Repack,
};
pub use frame::{FrameData, VideoFrame};
pub use hdr::{
    Chromaticities, ColorPrimaries, ContentLightLevel, Eotf, Fixed, HdrMetadata, HdrMetadataRecord, HdrMetadataSink,
    HdrState, HdrTransition, LoggingHdrSink, MasteringDisplay,
};
pub use overlay::{overlay_rect, Allocation, OverlayStream};
pub use pool::{
    BufferPool, BufferSlot, ReleaseEvent, ReleaseInbox, ReleaseToken, SlotId, StreamKind, DEFAULT_BUFFER_COUNT,
    MIN_BUFFER_COUNT,
};
