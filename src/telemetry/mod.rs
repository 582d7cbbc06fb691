//! Telemetry and logging infrastructure
//!
//! Provides structured logging with tracing and pipeline statistics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{FrameProfiler, FrameStats, PipelineStats};
