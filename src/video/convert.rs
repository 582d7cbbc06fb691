//! Frame → buffer conversion
//!
//! Writes the planes of a decoded frame into a mapped GPU buffer at the
//! offsets and strides given by its [`PlaneLayout`]. 8-bit formats are row
//! copies; high bit depth formats are widened into the MSB-aligned,
//! little-endian, semi-planar layout of P010/P012/P016.
//!
//! Source planes are validated before the buffer is mapped, so a rejected
//! frame leaves the buffer untouched. The mapping is released on every exit
//! path when its guard drops.

use crate::error::PipelineError;
use crate::gpu::GpuBuffer;
use crate::video::format::{Endian, PlaneGeometry, Repack};
use crate::video::{FrameData, PlaneLayout};

/// Source plane validated against the geometry the layout needs
struct SourcePlane<'a> {
    data: &'a [u8],
    linesize: usize,
}

impl<'a> SourcePlane<'a> {
    fn row(&self, row: usize, len: usize) -> &'a [u8] {
        let start = row * self.linesize;
        &self.data[start..start + len]
    }
}

fn source_planes<'a, F: FrameData + ?Sized>(
    frame: &'a F,
    layout: &PlaneLayout,
) -> Result<Vec<SourcePlane<'a>>, PipelineError> {
    let geometry = layout
        .decoder_format
        .source_planes(layout.width, layout.height)
        .ok_or_else(|| PipelineError::UnsupportedFormat(layout.decoder_format.name().to_string()))?;

    geometry
        .iter()
        .enumerate()
        .map(|(index, plane)| {
            let data = frame
                .plane(index)
                .ok_or_else(|| PipelineError::ConversionFailure(format!("frame has no plane {}", index)))?;
            let linesize = frame.linesize(index);
            check_plane(index, plane, data.len(), linesize)?;
            Ok(SourcePlane { data, linesize })
        })
        .collect()
}

fn check_plane(index: usize, plane: &PlaneGeometry, len: usize, linesize: usize) -> Result<(), PipelineError> {
    let row_bytes = plane.row_bytes as usize;
    if plane.rows == 0 {
        return Ok(());
    }
    if linesize < row_bytes {
        return Err(PipelineError::ConversionFailure(format!(
            "plane {} line size {} is shorter than a row of {} bytes",
            index, linesize, row_bytes
        )));
    }
    let needed = (plane.rows as usize - 1) * linesize + row_bytes;
    if len < needed {
        return Err(PipelineError::ConversionFailure(format!(
            "plane {} holds {} bytes, {} rows need {}",
            index, len, plane.rows, needed
        )));
    }
    Ok(())
}

/// Write `frame` into `buffer` according to `layout`
///
/// Map failures surface as [`PipelineError::MapFailure`]; frames whose
/// geometry does not match the layout as [`PipelineError::ConversionFailure`].
pub fn convert<B, F>(buffer: &mut B, frame: &F, layout: &PlaneLayout) -> Result<(), PipelineError>
where
    B: GpuBuffer,
    F: FrameData + ?Sized,
{
    if frame.width() != layout.width || frame.height() != layout.height {
        return Err(PipelineError::ConversionFailure(format!(
            "frame is {}x{}, buffers are {}x{}",
            frame.width(),
            frame.height(),
            layout.width,
            layout.height
        )));
    }
    if frame.format() != layout.decoder_format {
        return Err(PipelineError::ConversionFailure(format!(
            "frame format {} does not match buffer format {}",
            frame.format(),
            layout.decoder_format
        )));
    }

    // Allocators may pad rows; the planes must still fit
    let stride = buffer.stride();
    if !layout.fits(stride) || buffer.size() < layout.allocation_size(stride) {
        return Err(PipelineError::ConversionFailure(format!(
            "buffer of {} bytes with stride {} cannot hold the {} layout",
            buffer.size(),
            stride,
            layout.gpu_format
        )));
    }

    // Validate every source plane before touching the buffer
    let sources = source_planes(frame, layout)?;
    let placements = layout.placements(stride);

    let mut mapping = buffer.map_write()?;
    let dst: &mut [u8] = &mut mapping;

    match layout.repack {
        Repack::Copy => {
            // Row by row, as source and destination strides differ
            for ((plane, placement), source) in layout.planes.iter().zip(&placements).zip(&sources) {
                let row_bytes = plane.row_bytes as usize;
                for row in 0..plane.rows as usize {
                    let start = placement.offset + row * placement.stride;
                    dst[start..start + row_bytes].copy_from_slice(source.row(row, row_bytes));
                }
            }
        }
        Repack::Shift { shift, endian } => {
            // Luma: widen each sample in place
            let luma = &layout.planes[0];
            let luma_bytes = luma.row_bytes as usize;
            for row in 0..luma.rows as usize {
                let start = placements[0].offset + row * placements[0].stride;
                shift_row(&mut dst[start..start + luma_bytes], sources[0].row(row, luma_bytes), shift, endian);
            }

            // Chroma: U and V planes merge into one UV plane
            let chroma = &layout.planes[1];
            let chroma_bytes = chroma.row_bytes as usize;
            // Each source plane supplies half of a destination row
            let half = chroma_bytes / 2;
            for row in 0..chroma.rows as usize {
                let start = placements[1].offset + row * placements[1].stride;
                interleave_row(
                    &mut dst[start..start + chroma_bytes],
                    sources[1].row(row, half),
                    sources[2].row(row, half),
                    shift,
                    endian,
                );
            }
        }
    }

    Ok(())
}

#[inline]
fn widen(sample: &[u8], shift: u32, endian: Endian) -> [u8; 2] {
    // Right-aligned source, MSB-aligned little-endian destination
    let value = endian.read_u16([sample[0], sample[1]]);
    (value << shift).to_le_bytes()
}

fn shift_row(dst: &mut [u8], src: &[u8], shift: u32, endian: Endian) {
    for (out, sample) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
        out.copy_from_slice(&widen(sample, shift, endian));
    }
}

/// U into even samples and V into odd samples of one chroma row
fn interleave_row(dst: &mut [u8], u: &[u8], v: &[u8], shift: u32, endian: Endian) {
    for ((out, u), v) in dst.chunks_exact_mut(4).zip(u.chunks_exact(2)).zip(v.chunks_exact(2)) {
        out[..2].copy_from_slice(&widen(u, shift, endian));
        out[2..].copy_from_slice(&widen(v, shift, endian));
    }
}

/// Fill every pixel of a single-plane ARGB8888 buffer with `argb`
pub fn fill_solid<B: GpuBuffer>(buffer: &mut B, layout: &PlaneLayout, argb: u32) -> Result<(), PipelineError> {
    let stride = buffer.stride() as usize;
    let plane = layout.planes[0];
    let row_bytes = plane.row_bytes as usize;
    let pixel = argb.to_le_bytes();

    let mut mapping = buffer.map_write()?;
    for row in 0..plane.rows as usize {
        let start = row * stride;
        let Some(line) = mapping.get_mut(start..start + row_bytes) else {
            return Err(PipelineError::ConversionFailure(format!("row {} lies outside the buffer", row)));
        };
        for out in line.chunks_exact_mut(4) {
            out.copy_from_slice(&pixel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{AllocationRequest, BufferAllocator, MemoryAllocator, MemoryBuffer};
    use crate::video::{describe, DecoderFormat, VideoFrame};

    fn allocate(layout: &PlaneLayout) -> MemoryBuffer {
        MemoryAllocator::new().allocate(&AllocationRequest::new(layout)).unwrap()
    }

    fn patterned(format: DecoderFormat, width: u32, height: u32) -> VideoFrame {
        let mut frame = VideoFrame::alloc(format, width, height, 32).unwrap();
        for (p, plane) in frame.planes.iter_mut().enumerate() {
            for (i, byte) in plane.iter_mut().enumerate() {
                *byte = (i * 7 + p * 31) as u8;
            }
        }
        frame
    }

    fn le16(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn test_yuv420_copy_with_padded_stride() {
        let (w, h) = (37, 21);
        let layout = describe(DecoderFormat::Yuv420p, w, h).unwrap();
        let frame = patterned(DecoderFormat::Yuv420p, w, h);
        let mut buffer = allocate(&layout);
        assert!(buffer.stride() as usize > layout.allocation.row_bytes() as usize);

        convert(&mut buffer, &frame, &layout).unwrap();
        assert!(!buffer.is_mapped());

        let out = buffer.contents();
        let placements = layout.placements(buffer.stride());
        for (p, plane) in layout.planes.iter().enumerate() {
            for row in 0..plane.rows as usize {
                let dst = placements[p].offset + row * placements[p].stride;
                let src = row * frame.linesizes[p];
                let len = plane.row_bytes as usize;
                assert_eq!(&out[dst..dst + len], &frame.planes[p][src..src + len], "plane {} row {}", p, row);
            }
        }
    }

    #[test]
    fn test_nv12_copy() {
        let (w, h) = (16, 10);
        let layout = describe(DecoderFormat::Nv12, w, h).unwrap();
        let frame = patterned(DecoderFormat::Nv12, w, h);
        let mut buffer = allocate(&layout);

        convert(&mut buffer, &frame, &layout).unwrap();

        let stride = buffer.stride() as usize;
        let out = buffer.contents();
        let uv = stride * h as usize;
        assert_eq!(&out[uv..uv + 16], &frame.planes[1][..16]);
        assert_eq!(&out[uv + 4 * stride..uv + 4 * stride + 16], &frame.planes[1][4 * 32..4 * 32 + 16]);
    }

    #[test]
    fn test_p010_shift_by_six() {
        let (w, h) = (6, 4);
        let format = DecoderFormat::Yuv420p10(Endian::Little);
        let layout = describe(format, w, h).unwrap();
        let mut frame = VideoFrame::alloc(format, w, h, 1).unwrap();
        for y in 0..h as usize {
            for x in 0..w as usize {
                frame.put_u16(0, x, y, ((y * 100 + x) as u16) & 0x3FF);
            }
        }
        for y in 0..2 {
            for x in 0..3 {
                frame.put_u16(1, x, y, 0x3FF - x as u16);
                frame.put_u16(2, x, y, 0x200 + y as u16);
            }
        }
        let mut buffer = allocate(&layout);

        convert(&mut buffer, &frame, &layout).unwrap();

        let stride = buffer.stride() as usize;
        let out = buffer.contents();
        for y in 0..h as usize {
            for x in 0..w as usize {
                let v = ((y * 100 + x) as u16) & 0x3FF;
                assert_eq!(le16(out, y * stride + 2 * x), v << 6);
            }
        }
        let uv = stride * h as usize;
        for y in 0..2 {
            for x in 0..3 {
                let at = uv + y * stride + 4 * x;
                assert_eq!(le16(out, at), (0x3FF - x as u16) << 6);
                assert_eq!(le16(out, at + 2), (0x200 + y as u16) << 6);
            }
        }
    }

    #[test]
    fn test_p010_every_ten_bit_value() {
        // 32x32 luma holds each of the 1024 values once
        let (w, h) = (32usize, 32usize);
        let format = DecoderFormat::Yuv420p10(Endian::Little);
        let layout = describe(format, w as u32, h as u32).unwrap();
        let mut frame = VideoFrame::alloc(format, w as u32, h as u32, 64).unwrap();
        for y in 0..h {
            for x in 0..w {
                frame.put_u16(0, x, y, (y * w + x) as u16);
            }
        }
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                let v = (y * w / 2 + x) as u16;
                frame.put_u16(1, x, y, v * 4);
                frame.put_u16(2, x, y, 0x3FF - v * 4);
            }
        }
        let mut buffer = allocate(&layout);

        convert(&mut buffer, &frame, &layout).unwrap();

        let stride = buffer.stride() as usize;
        let out = buffer.contents();
        for y in 0..h {
            for x in 0..w {
                let v = (y * w + x) as u16;
                assert_eq!(le16(out, y * stride + 2 * x), v << 6, "luma {}", v);
            }
        }
        let uv = stride * h;
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                let v = (y * w / 2 + x) as u16;
                let at = uv + y * stride + 4 * x;
                assert_eq!(le16(out, at), (v * 4) << 6);
                assert_eq!(le16(out, at + 2), (0x3FF - v * 4) << 6);
            }
        }
    }

    #[test]
    fn test_p012_big_endian_source() {
        let format = DecoderFormat::Yuv420p12(Endian::Big);
        let layout = describe(format, 2, 2).unwrap();
        let mut frame = VideoFrame::alloc(format, 2, 2, 1).unwrap();
        frame.put_u16(0, 1, 0, 0x0ABC);
        frame.put_u16(1, 0, 0, 0x0123);
        frame.put_u16(2, 0, 0, 0x0FFF);
        let mut buffer = allocate(&layout);

        convert(&mut buffer, &frame, &layout).unwrap();

        let stride = buffer.stride() as usize;
        let out = buffer.contents();
        assert_eq!(le16(out, 2), 0xABC0);
        assert_eq!(le16(out, stride * 2), 0x1230);
        assert_eq!(le16(out, stride * 2 + 2), 0xFFF0);
    }

    #[test]
    fn test_p016_is_unshifted() {
        let format = DecoderFormat::Yuv420p16(Endian::Little);
        let layout = describe(format, 2, 2).unwrap();
        let mut frame = VideoFrame::alloc(format, 2, 2, 1).unwrap();
        frame.put_u16(0, 0, 1, 0xBEEF);
        let mut buffer = allocate(&layout);

        convert(&mut buffer, &frame, &layout).unwrap();
        assert_eq!(le16(buffer.contents(), buffer.stride() as usize), 0xBEEF);
    }

    #[test]
    fn test_short_plane_is_rejected_before_mapping() {
        let layout = describe(DecoderFormat::Yuv420p, 16, 16).unwrap();
        let mut frame = patterned(DecoderFormat::Yuv420p, 16, 16);
        frame.planes[2].truncate(10);
        let mut buffer = allocate(&layout);

        let err = convert(&mut buffer, &frame, &layout).unwrap_err();
        assert!(matches!(err, PipelineError::ConversionFailure(_)));
        assert_eq!(buffer.map_count(), 0);
        assert!(buffer.contents().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mismatched_dimensions() {
        let layout = describe(DecoderFormat::Yuv420p, 16, 16).unwrap();
        let frame = patterned(DecoderFormat::Yuv420p, 32, 16);
        let mut buffer = allocate(&layout);
        assert!(matches!(
            convert(&mut buffer, &frame, &layout),
            Err(PipelineError::ConversionFailure(_))
        ));
    }

    #[test]
    fn test_map_failure() {
        let layout = describe(DecoderFormat::Nv12, 16, 16).unwrap();
        let frame = patterned(DecoderFormat::Nv12, 16, 16);
        let mut buffer = allocate(&layout);
        buffer.set_map_failure(true);

        assert!(matches!(
            convert(&mut buffer, &frame, &layout),
            Err(PipelineError::MapFailure(_))
        ));
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn test_fill_solid() {
        let layout = describe(DecoderFormat::Bgra, 5, 3).unwrap();
        let mut buffer = allocate(&layout);
        fill_solid(&mut buffer, &layout, 0x8011_2233).unwrap();

        let stride = buffer.stride() as usize;
        let out = buffer.contents();
        assert_eq!(&out[..4], &[0x33, 0x22, 0x11, 0x80]);
        assert_eq!(&out[2 * stride + 16..2 * stride + 20], &[0x33, 0x22, 0x11, 0x80]);
        assert_eq!(out[2 * stride + 20], 0);
        assert!(!buffer.is_mapped());
    }
}
