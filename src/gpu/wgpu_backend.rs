//! wgpu backend
//!
//! Buffers are `MAP_WRITE | COPY_SRC` wgpu buffers whose rows are padded to
//! `COPY_BYTES_PER_ROW_ALIGNMENT`, so the display can consume them directly
//! as a texture copy source. The presenter copies a submitted buffer into
//! its texture and fires the release token once the GPU has finished that
//! copy. Completion callbacks run inside [`GpuContext::poll`], on the
//! polling thread.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use super::{
    plane_exports, AllocationRequest, BufferAllocator, BufferHandle, DamageRect, GpuBuffer, PlaneExport,
    PresentationSurface,
};
use crate::error::PipelineError;
use crate::video::ReleaseToken;

/// Shared GPU resources: one device used by every stream
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a context without a window surface
    pub async fn new_headless() -> Result<Self, PipelineError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| PipelineError::DeviceUnavailable("no suitable GPU adapter".to_string()))?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("HDR Video Player Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Run completion callbacks (buffer maps, submitted-work-done)
    pub fn poll(&self, wait: bool) {
        let maintain = if wait { wgpu::Maintain::Wait } else { wgpu::Maintain::Poll };
        self.device.poll(maintain);
    }
}

/// Allocates mappable wgpu buffers; clones share the context
#[derive(Clone)]
pub struct WgpuAllocator {
    context: Arc<GpuContext>,
    next_handle: Arc<AtomicU64>,
}

impl WgpuAllocator {
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self {
            context,
            next_handle: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl BufferAllocator for WgpuAllocator {
    type Buffer = WgpuBuffer;

    fn allocate(&mut self, request: &AllocationRequest<'_>) -> Result<WgpuBuffer, PipelineError> {
        let layout = request.layout;
        let stride = layout
            .allocation
            .row_bytes()
            .next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = layout.allocation_size(stride) as u64;

        let device = &self.context.device;
        let max = device.limits().max_buffer_size;
        if size > max {
            return Err(request.failure(format!("{} bytes exceeds the device limit of {}", size, max)));
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} frame buffer", layout.gpu_format)),
            size,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            buffer.destroy();
            return Err(request.failure(err.to_string()));
        }

        let handle = BufferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(%handle, stride, size, format = %layout.gpu_format, "Allocated wgpu buffer");

        Ok(WgpuBuffer {
            context: Arc::clone(&self.context),
            buffer,
            handle,
            stride,
            texel_width: layout.allocation.texel_width,
            rows: layout.allocation.rows,
            bytes_per_texel: layout.allocation.bytes_per_texel,
            planes: plane_exports(layout, stride),
        })
    }
}

/// A wgpu buffer holding one frame
pub struct WgpuBuffer {
    context: Arc<GpuContext>,
    buffer: wgpu::Buffer,
    handle: BufferHandle,
    stride: u32,
    texel_width: u32,
    rows: u32,
    bytes_per_texel: u32,
    planes: Vec<PlaneExport>,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl Drop for WgpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}

/// Mapped range of a [`WgpuBuffer`]; unmaps when dropped
pub struct WgpuMapping<'a> {
    view: Option<wgpu::BufferViewMut<'a>>,
    buffer: &'a wgpu::Buffer,
}

impl Deref for WgpuMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.view.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for WgpuMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.view.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for WgpuMapping<'_> {
    fn drop(&mut self) {
        // The view must be gone before unmap
        self.view.take();
        self.buffer.unmap();
    }
}

impl GpuBuffer for WgpuBuffer {
    type Mapping<'a> = WgpuMapping<'a>;

    fn handle(&self) -> BufferHandle {
        self.handle
    }

    fn stride(&self) -> u32 {
        self.stride
    }

    fn size(&self) -> usize {
        self.buffer.size() as usize
    }

    fn planes(&self) -> &[PlaneExport] {
        &self.planes
    }

    fn map_write(&mut self) -> Result<WgpuMapping<'_>, PipelineError> {
        let buffer: &wgpu::Buffer = &self.buffer;
        let slice = buffer.slice(..);

        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Write, move |result| {
            let _ = tx.send(result);
        });
        self.context.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::MapFailure(format!("{}: {}", self.handle, e))),
            Err(_) => return Err(PipelineError::MapFailure(format!("{}: map never completed", self.handle))),
        }

        Ok(WgpuMapping {
            view: Some(slice.get_mapped_range_mut()),
            buffer,
        })
    }
}

/// Texture format that reinterprets buffer texels of this size
pub fn texel_format(bytes_per_texel: u32) -> Option<wgpu::TextureFormat> {
    match bytes_per_texel {
        1 => Some(wgpu::TextureFormat::R8Unorm),
        2 => Some(wgpu::TextureFormat::Rg8Unorm),
        4 => Some(wgpu::TextureFormat::Rgba8Unorm),
        _ => None,
    }
}

struct PresentTarget {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

/// Presents buffers by copying them into a sampled texture
pub struct WgpuPresenter {
    context: Arc<GpuContext>,
    target: Option<PresentTarget>,
    /// Bumped on detach; callbacks from an older epoch do not release
    epoch: Arc<AtomicU64>,
    submissions: u64,
}

impl WgpuPresenter {
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self {
            context,
            target: None,
            epoch: Arc::new(AtomicU64::new(0)),
            submissions: 0,
        }
    }

    /// Texture holding the most recently presented buffer
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.target.as_ref().map(|target| &target.texture)
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn target_for(&mut self, width: u32, height: u32, format: wgpu::TextureFormat) -> &wgpu::Texture {
        let reuse = matches!(
            &self.target,
            Some(t) if t.width == width && t.height == height && t.format == format
        );
        if !reuse {
            self.target = None;
        }

        let device = &self.context.device;
        let target = self.target.get_or_insert_with(|| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Presented frame"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            tracing::debug!(width, height, ?format, "Created presentation texture");
            PresentTarget {
                texture,
                width,
                height,
                format,
            }
        });
        &target.texture
    }
}

impl PresentationSurface<WgpuBuffer> for WgpuPresenter {
    fn submit(&mut self, buffer: &WgpuBuffer, damage: DamageRect, token: ReleaseToken) {
        let max = self.context.device.limits().max_texture_dimension_2d;
        let fits_texture = buffer.texel_width <= max && buffer.rows <= max;
        let Some(format) = texel_format(buffer.bytes_per_texel).filter(|_| fits_texture) else {
            tracing::warn!(
                handle = %buffer.handle,
                texel_width = buffer.texel_width,
                rows = buffer.rows,
                "Buffer cannot be shown as a texture, releasing it unseen"
            );
            token.release();
            return;
        };

        let context = Arc::clone(&self.context);
        let texture = self.target_for(buffer.texel_width, buffer.rows, format);

        let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Copy Encoder"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(buffer.stride),
                    rows_per_image: Some(buffer.rows),
                },
            },
            texture.as_image_copy(),
            wgpu::Extent3d {
                width: buffer.texel_width,
                height: buffer.rows,
                depth_or_array_layers: 1,
            },
        );
        context.queue.submit(Some(encoder.finish()));

        let epoch = Arc::clone(&self.epoch);
        let submitted_in = epoch.load(Ordering::Acquire);
        context.queue.on_submitted_work_done(move || {
            if epoch.load(Ordering::Acquire) == submitted_in {
                token.release();
            }
        });

        self.submissions += 1;
        tracing::trace!(handle = %buffer.handle, ?damage, "Submitted buffer copy");
    }

    fn detach(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.target = None;
    }
}
