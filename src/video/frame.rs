//! Decoded video frame representation
//!
//! [`FrameData`] is what the converter reads from: per-plane bytes with
//! their line sizes, plus HDR side data. It is implemented for FFmpeg's
//! decoder-owned frames (no copy; the buffer slot keeps the frame alive until
//! the display releases it) and for the owned [`VideoFrame`].

use std::mem;
use std::ptr;

use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::side_data::Type as SideDataType;

use super::format::{DecoderFormat, Endian};
use super::hdr::{ContentLightLevel, HdrMetadata, MasteringDisplay};
use crate::error::PipelineError;

/// Read access to a decoded picture
pub trait FrameData {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn format(&self) -> DecoderFormat;

    /// Bytes of plane `index`, or `None` if the frame has fewer planes
    fn plane(&self, index: usize) -> Option<&[u8]>;

    /// Distance in bytes between rows of plane `index`
    fn linesize(&self, index: usize) -> usize;

    /// Mastering display and content light level side data, as decoded
    fn hdr_metadata(&self) -> HdrMetadata;

    /// Presentation timestamp in stream time base units
    fn pts(&self) -> Option<i64> {
        None
    }
}

/// A decoded frame that owns its planes
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: DecoderFormat,
    pub planes: Vec<Vec<u8>>,
    pub linesizes: Vec<usize>,
    pub hdr: HdrMetadata,
    pub pts: Option<i64>,
}

impl VideoFrame {
    /// Zeroed frame with every line size rounded up to `align` bytes
    pub fn alloc(format: DecoderFormat, width: u32, height: u32, align: usize) -> Result<Self, PipelineError> {
        let geometry = format
            .source_planes(width, height)
            .ok_or_else(|| PipelineError::UnsupportedFormat(format.name().to_string()))?;

        let align = align.max(1);
        let mut planes = Vec::with_capacity(geometry.len());
        let mut linesizes = Vec::with_capacity(geometry.len());
        for plane in geometry {
            let linesize = (plane.row_bytes as usize).next_multiple_of(align);
            planes.push(vec![0; linesize * plane.rows as usize]);
            linesizes.push(linesize);
        }

        Ok(Self {
            width,
            height,
            format,
            planes,
            linesizes,
            hdr: HdrMetadata::default(),
            pts: None,
        })
    }

    /// Store a 16-bit sample at column `x` of row `y` in plane `index`
    pub fn put_u16(&mut self, index: usize, x: usize, y: usize, value: u16) {
        let endian = match self.format {
            DecoderFormat::Yuv420p10(endian)
            | DecoderFormat::Yuv420p12(endian)
            | DecoderFormat::Yuv420p16(endian) => endian,
            _ => Endian::Little,
        };
        let offset = y * self.linesizes[index] + x * 2;
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.planes[index][offset..offset + 2].copy_from_slice(&bytes);
    }
}

impl FrameData for VideoFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> DecoderFormat {
        self.format
    }

    fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(Vec::as_slice)
    }

    fn linesize(&self, index: usize) -> usize {
        self.linesizes.get(index).copied().unwrap_or(0)
    }

    fn hdr_metadata(&self) -> HdrMetadata {
        self.hdr
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }
}

impl From<Pixel> for DecoderFormat {
    fn from(pixel: Pixel) -> Self {
        match pixel {
            Pixel::YUV420P => DecoderFormat::Yuv420p,
            Pixel::NV12 => DecoderFormat::Nv12,
            Pixel::YUV420P10LE => DecoderFormat::Yuv420p10(Endian::Little),
            Pixel::YUV420P10BE => DecoderFormat::Yuv420p10(Endian::Big),
            Pixel::YUV420P12LE => DecoderFormat::Yuv420p12(Endian::Little),
            Pixel::YUV420P12BE => DecoderFormat::Yuv420p12(Endian::Big),
            Pixel::YUV420P16LE => DecoderFormat::Yuv420p16(Endian::Little),
            Pixel::YUV420P16BE => DecoderFormat::Yuv420p16(Endian::Big),
            Pixel::BGRA => DecoderFormat::Bgra,
            other => DecoderFormat::Other(other.descriptor().map(|d| d.name()).unwrap_or("unknown")),
        }
    }
}

fn rational(value: ffi::AVRational) -> f64 {
    if value.den == 0 {
        0.0
    } else {
        value.num as f64 / value.den as f64
    }
}

/// Copy a C side-data struct out of its byte buffer
fn read_side_data<T: Copy>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < mem::size_of::<T>() {
        return None;
    }
    // SAFETY: the length was checked and T is a plain C struct
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

impl FrameData for ffmpeg_next::frame::Video {
    fn width(&self) -> u32 {
        ffmpeg_next::frame::Video::width(self)
    }

    fn height(&self) -> u32 {
        ffmpeg_next::frame::Video::height(self)
    }

    fn format(&self) -> DecoderFormat {
        ffmpeg_next::frame::Video::format(self).into()
    }

    fn plane(&self, index: usize) -> Option<&[u8]> {
        if index >= self.planes() {
            return None;
        }
        Some(self.data(index))
    }

    fn linesize(&self, index: usize) -> usize {
        if index >= self.planes() {
            return 0;
        }
        self.stride(index)
    }

    fn hdr_metadata(&self) -> HdrMetadata {
        let mastering = self
            .side_data(SideDataType::MasteringDisplayMetadata)
            .and_then(|side| read_side_data::<ffi::AVMasteringDisplayMetadata>(side.data()))
            .map(|raw| MasteringDisplay {
                primaries: raw.display_primaries.map(|xy| [rational(xy[0]), rational(xy[1])]),
                white_point: [rational(raw.white_point[0]), rational(raw.white_point[1])],
                min_luminance: rational(raw.min_luminance),
                max_luminance: rational(raw.max_luminance),
                has_primaries: raw.has_primaries != 0,
                has_luminance: raw.has_luminance != 0,
            });

        let content_light = self
            .side_data(SideDataType::ContentLightLevel)
            .and_then(|side| read_side_data::<ffi::AVContentLightMetadata>(side.data()))
            .map(|raw| ContentLightLevel {
                max_cll: raw.MaxCLL as u32,
                max_fall: raw.MaxFALL as u32,
            });

        HdrMetadata {
            mastering,
            content_light,
        }
    }

    fn pts(&self) -> Option<i64> {
        ffmpeg_next::frame::Frame::pts(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_aligns_linesizes() {
        let frame = VideoFrame::alloc(DecoderFormat::Yuv420p, 33, 17, 32).unwrap();
        assert_eq!(frame.linesizes, vec![64, 32, 32]);
        assert_eq!(frame.planes[0].len(), 64 * 17);
        assert_eq!(frame.planes[1].len(), 32 * 9);
        assert!(frame.hdr_metadata().is_empty());
    }

    #[test]
    fn test_alloc_rejects_unknown_format() {
        let err = VideoFrame::alloc(DecoderFormat::Other("gray"), 16, 16, 1).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_put_u16_respects_endianness() {
        let mut frame = VideoFrame::alloc(DecoderFormat::Yuv420p10(Endian::Big), 4, 2, 1).unwrap();
        frame.put_u16(0, 1, 1, 0x0123);
        let offset = frame.linesizes[0] + 2;
        assert_eq!(&frame.planes[0][offset..offset + 2], &[0x01, 0x23]);
    }

    #[test]
    fn test_missing_plane() {
        let frame = VideoFrame::alloc(DecoderFormat::Nv12, 8, 8, 1).unwrap();
        assert!(frame.plane(1).is_some());
        assert!(frame.plane(2).is_none());
        assert_eq!(frame.linesize(2), 0);
    }

    #[test]
    fn test_pixel_mapping() {
        assert_eq!(DecoderFormat::from(Pixel::YUV420P10LE), DecoderFormat::Yuv420p10(Endian::Little));
        assert_eq!(DecoderFormat::from(Pixel::YUV420P12BE), DecoderFormat::Yuv420p12(Endian::Big));
        assert_eq!(DecoderFormat::from(Pixel::NV12), DecoderFormat::Nv12);
        assert!(matches!(DecoderFormat::from(Pixel::GRAY8), DecoderFormat::Other(_)));
    }
}
