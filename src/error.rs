//! Error taxonomy for the frame-to-buffer pipeline
//!
//! Allocation and format errors abort stream startup. Map, decode and
//! conversion errors only cost the current frame.

use thiserror::Error;

use crate::video::{GpuFormat, SlotId};

/// Errors produced by the decode → convert → present pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The allocator could not provide a buffer (memory exhaustion, import rejected)
    #[error("failed to allocate {format} buffer {width}x{height}: {reason}")]
    AllocationFailure {
        format: GpuFormat,
        width: u32,
        height: u32,
        reason: String,
    },

    /// A buffer could not be mapped for CPU writes
    #[error("failed to map buffer: {0}")]
    MapFailure(String),

    /// The decoder rejected a packet or failed to produce a frame
    #[error("decode error: {0}")]
    DecodeError(String),

    /// The decoder output format has no GPU buffer mapping
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Frame dimensions cannot back a buffer
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Frame planes did not fit the buffer geometry
    #[error("frame conversion failed: {0}")]
    ConversionFailure(String),

    /// Slot bookkeeping was violated
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Failed to open the input file
    #[error("failed to open input {path}: {reason}")]
    Open { path: String, reason: String },

    /// The input has no video stream
    #[error("no video stream found in input")]
    NoVideoStream,

    /// No usable GPU adapter or device
    #[error("GPU device unavailable: {0}")]
    DeviceUnavailable(String),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl PipelineError {
    /// Whether this error ends the stream rather than just the current frame
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::MapFailure(_)
                | PipelineError::DecodeError(_)
                | PipelineError::ConversionFailure(_)
        )
    }
}

/// Contract violations on buffer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The slot belongs to a pool generation that was destroyed
    #[error("slot {0} is stale")]
    StaleSlot(SlotId),

    /// The slot is still owned by the display
    #[error("slot {0} is still busy")]
    SlotBusy(SlotId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::StreamKind;

    #[test]
    fn test_error_display() {
        let err = PipelineError::NoVideoStream;
        assert_eq!(err.to_string(), "no video stream found in input");

        let err = PipelineError::UnsupportedFormat("gray".to_string());
        assert_eq!(err.to_string(), "unsupported pixel format: gray");
    }

    #[test]
    fn test_fatality() {
        assert!(!PipelineError::MapFailure("busy".into()).is_fatal());
        assert!(!PipelineError::DecodeError("corrupt".into()).is_fatal());
        assert!(PipelineError::UnsupportedFormat("gray".into()).is_fatal());
        assert!(PipelineError::AllocationFailure {
            format: GpuFormat::P010,
            width: 16,
            height: 16,
            reason: "oom".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_pool_error_display() {
        let slot = SlotId {
            stream: StreamKind::Video,
            index: 1,
            generation: 2,
        };
        assert_eq!(PoolError::SlotBusy(slot).to_string(), "slot video#1@2 is still busy");
    }
}
