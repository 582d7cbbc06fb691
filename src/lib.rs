//! HDR Video Player Library
//!
//! Decodes video with FFmpeg and presents each frame from a small pool of
//! display buffers, passing HDR mastering metadata through to the surface.

pub mod error;
pub mod gpu;
pub mod settings;
pub mod telemetry;
pub mod video;

pub use error::{PipelineError, PoolError};
pub use gpu::{BufferAllocator, GpuBuffer, PresentationSurface};
pub use settings::{Backend, ConfigError, PlayerConfig};
pub use telemetry::{init_logging, PipelineStats};
pub use video::{
    BackpressurePolicy, BufferPool, CoordinatorOptions, DecodePump, FfmpegSource, HdrMetadata, OverlayStream,
    PlaneLayout, PresentationCoordinator, TickOutcome, VideoFrame,
};
