//! GPU buffer and presentation seams
//!
//! The pipeline only talks to the GPU through these traits:
//! - [`BufferAllocator`] creates CPU-mappable buffers that the display can import
//! - [`GpuBuffer`] maps a buffer for writing and reports its export parameters
//! - [`PresentationSurface`] shows a buffer and later hands it back via a [`ReleaseToken`]
//!
//! Two backends are provided: [`memory`] (plain CPU memory, headless) and
//! [`wgpu_backend`].

pub mod memory;
pub mod wgpu_backend;

use std::fmt;
use std::ops::DerefMut;

use crate::error::PipelineError;
use crate::video::{PlaneLayout, ReleaseToken};

pub use memory::{HeadlessSurface, MemoryAllocator, MemoryBuffer, ReleaseMode};
pub use wgpu_backend::{GpuContext, WgpuAllocator, WgpuBuffer, WgpuPresenter};

/// Buffer memory layout modifier; only linear layouts are CPU writable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modifier {
    #[default]
    Linear,
}

impl Modifier {
    /// DRM format modifier value
    pub const fn value(self) -> u64 {
        match self {
            Modifier::Linear => 0,
        }
    }
}

/// Parameters for one buffer allocation
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: &'a PlaneLayout,
    pub modifier: Modifier,
}

impl<'a> AllocationRequest<'a> {
    pub fn new(layout: &'a PlaneLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            layout,
            modifier: Modifier::Linear,
        }
    }

    /// Error for this request, with the allocator's reason attached
    pub fn failure(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::AllocationFailure {
            format: self.layout.gpu_format,
            width: self.width,
            height: self.height,
            reason: reason.into(),
        }
    }
}

/// Offset and stride of one plane, as announced to the display on import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneExport {
    pub offset: u32,
    pub stride: u32,
}

/// Opaque identity of an allocated buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf-{}", self.0)
    }
}

/// A GPU-importable buffer with CPU write access
pub trait GpuBuffer {
    /// Writable view of the whole buffer; unmaps when dropped
    type Mapping<'a>: DerefMut<Target = [u8]>
    where
        Self: 'a;

    fn handle(&self) -> BufferHandle;

    /// Bytes per row as chosen by the allocator
    fn stride(&self) -> u32;

    fn size(&self) -> usize;

    /// Export parameters for each plane
    fn planes(&self) -> &[PlaneExport];

    /// Map the buffer for CPU writes
    fn map_write(&mut self) -> Result<Self::Mapping<'_>, PipelineError>;
}

/// Creates buffers for a given layout
pub trait BufferAllocator {
    type Buffer: GpuBuffer;

    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<Self::Buffer, PipelineError>;
}

/// Compute export parameters for every plane of `layout` at `stride`
pub fn plane_exports(layout: &PlaneLayout, stride: u32) -> Vec<PlaneExport> {
    layout
        .placements(stride)
        .into_iter()
        .map(|placement| PlaneExport {
            offset: placement.offset as u32,
            stride: placement.stride as u32,
        })
        .collect()
}

/// Region of a surface that changed with a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DamageRect {
    /// The whole `width`x`height` frame
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Display-side consumer of buffers
///
/// The surface holds `token` for as long as it reads from `buffer` and
/// releases it exactly once when done.
pub trait PresentationSurface<B> {
    fn submit(&mut self, buffer: &B, damage: DamageRect, token: ReleaseToken);

    /// Stop showing anything; pending tokens are dropped without firing
    fn detach(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{describe, DecoderFormat};

    #[test]
    fn test_linear_modifier() {
        assert_eq!(Modifier::default(), Modifier::Linear);
        assert_eq!(Modifier::Linear.value(), 0);
    }

    #[test]
    fn test_request_failure_carries_format() {
        let layout = describe(DecoderFormat::Nv12, 64, 32).unwrap();
        let request = AllocationRequest::new(&layout);
        let err = request.failure("out of memory");
        assert_eq!(err.to_string(), "failed to allocate NV12 buffer 64x32: out of memory");
    }

    #[test]
    fn test_plane_exports_nv12() {
        let layout = describe(DecoderFormat::Nv12, 64, 32).unwrap();
        let exports = plane_exports(&layout, 128);
        assert_eq!(
            exports,
            vec![
                PlaneExport { offset: 0, stride: 128 },
                PlaneExport {
                    offset: 128 * 32,
                    stride: 128
                },
            ]
        );
    }

    #[test]
    fn test_full_damage() {
        let damage = DamageRect::full(1920, 1080);
        assert_eq!((damage.x, damage.y, damage.width, damage.height), (0, 0, 1920, 1080));
    }
}
