//! Pixel format mapping
//!
//! Maps a decoder pixel format to the GPU buffer format it is presented in,
//! and describes where each plane lives inside the allocated buffer.
//!
//! Supported families:
//! - 8-bit 4:2:0 planar (YUV420, three planes) and semi-planar (NV12)
//! - 10/12/16-bit 4:2:0 planar, repacked into semi-planar P010/P012/P016
//! - packed 32-bit BGRA for auxiliary (overlay) surfaces

use std::fmt;
use std::ops::Range;

use crate::error::PipelineError;

/// Byte order of 16-bit samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Read one 16-bit sample
    #[inline]
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        }
    }
}

/// Pixel format of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderFormat {
    /// 8-bit 4:2:0, three planes
    Yuv420p,
    /// 8-bit 4:2:0, luma + interleaved chroma
    Nv12,
    /// 10-bit 4:2:0, three planes, samples right-aligned in 16 bits
    Yuv420p10(Endian),
    /// 12-bit 4:2:0, three planes
    Yuv420p12(Endian),
    /// 16-bit 4:2:0, three planes
    Yuv420p16(Endian),
    /// Packed 8-bit BGRA
    Bgra,
    /// Anything the decoder produced that has no mapping
    Other(&'static str),
}

impl DecoderFormat {
    /// Significant bits per sample
    pub fn bit_depth(self) -> Option<u32> {
        match self {
            DecoderFormat::Yuv420p | DecoderFormat::Nv12 | DecoderFormat::Bgra => Some(8),
            DecoderFormat::Yuv420p10(_) => Some(10),
            DecoderFormat::Yuv420p12(_) => Some(12),
            DecoderFormat::Yuv420p16(_) => Some(16),
            DecoderFormat::Other(_) => None,
        }
    }

    /// Short human readable name
    pub fn name(self) -> &'static str {
        match self {
            DecoderFormat::Yuv420p => "yuv420p",
            DecoderFormat::Nv12 => "nv12",
            DecoderFormat::Yuv420p10(Endian::Little) => "yuv420p10le",
            DecoderFormat::Yuv420p10(Endian::Big) => "yuv420p10be",
            DecoderFormat::Yuv420p12(Endian::Little) => "yuv420p12le",
            DecoderFormat::Yuv420p12(Endian::Big) => "yuv420p12be",
            DecoderFormat::Yuv420p16(Endian::Little) => "yuv420p16le",
            DecoderFormat::Yuv420p16(Endian::Big) => "yuv420p16be",
            DecoderFormat::Bgra => "bgra",
            DecoderFormat::Other(name) => name,
        }
    }

    /// Geometry of the planes a decoder hands out for this format,
    /// as `(row_bytes, rows)` per plane
    pub fn source_planes(self, width: u32, height: u32) -> Option<Vec<PlaneGeometry>> {
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        let planes = match self {
            DecoderFormat::Yuv420p => vec![
                PlaneGeometry::new(height, width),
                PlaneGeometry::new(ch, cw),
                PlaneGeometry::new(ch, cw),
            ],
            DecoderFormat::Nv12 => vec![PlaneGeometry::new(height, width), PlaneGeometry::new(ch, cw * 2)],
            DecoderFormat::Yuv420p10(_) | DecoderFormat::Yuv420p12(_) | DecoderFormat::Yuv420p16(_) => vec![
                PlaneGeometry::new(height, width * 2),
                PlaneGeometry::new(ch, cw * 2),
                PlaneGeometry::new(ch, cw * 2),
            ],
            DecoderFormat::Bgra => vec![PlaneGeometry::new(height, width * 4)],
            DecoderFormat::Other(_) => return None,
        };
        Some(planes)
    }
}

impl fmt::Display for DecoderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// Format of the GPU buffer a frame is presented from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFormat {
    Yuv420,
    Nv12,
    P010,
    P012,
    P016,
    Argb8888,
}

impl GpuFormat {
    /// DRM fourcc code
    pub const fn fourcc(self) -> u32 {
        match self {
            GpuFormat::Yuv420 => fourcc(b'Y', b'U', b'1', b'2'),
            GpuFormat::Nv12 => fourcc(b'N', b'V', b'1', b'2'),
            GpuFormat::P010 => fourcc(b'P', b'0', b'1', b'0'),
            GpuFormat::P012 => fourcc(b'P', b'0', b'1', b'2'),
            GpuFormat::P016 => fourcc(b'P', b'0', b'1', b'6'),
            GpuFormat::Argb8888 => fourcc(b'A', b'R', b'2', b'4'),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GpuFormat::Yuv420 => "YUV420",
            GpuFormat::Nv12 => "NV12",
            GpuFormat::P010 => "P010",
            GpuFormat::P012 => "P012",
            GpuFormat::P016 => "P016",
            GpuFormat::Argb8888 => "ARGB8888",
        }
    }
}

impl fmt::Display for GpuFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How samples move from the decoder planes into the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repack {
    /// Byte-for-byte row copies, one source plane per destination plane
    Copy,
    /// 16-bit samples shifted left by `shift`; the two source chroma planes
    /// are interleaved into one destination plane
    Shift { shift: u32, endian: Endian },
}

/// Rows and row width of one plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub rows: u32,
    pub row_bytes: u32,
}

impl PlaneGeometry {
    pub const fn new(rows: u32, row_bytes: u32) -> Self {
        Self { rows, row_bytes }
    }
}

/// Where a plane starts inside a buffer and how far apart its rows are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanePlacement {
    pub offset: usize,
    pub stride: usize,
}

/// Shape requested from the allocator, in texels of the allocation format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationGeometry {
    pub texel_width: u32,
    pub rows: u32,
    pub bytes_per_texel: u32,
}

impl AllocationGeometry {
    /// Minimum stride the allocator may return
    pub fn row_bytes(&self) -> u32 {
        self.texel_width * self.bytes_per_texel
    }
}

/// Complete description of how a frame of one format and size is stored in a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneLayout {
    pub decoder_format: DecoderFormat,
    pub gpu_format: GpuFormat,
    pub width: u32,
    pub height: u32,
    /// Destination planes, in buffer order
    pub planes: Vec<PlaneGeometry>,
    pub repack: Repack,
    pub allocation: AllocationGeometry,
}

impl PlaneLayout {
    /// Plane placements for a buffer with the given allocator stride
    pub fn placements(&self, stride: u32) -> Vec<PlanePlacement> {
        let s = stride as usize;
        let h = self.height as usize;
        match self.gpu_format {
            GpuFormat::Yuv420 => vec![
                PlanePlacement { offset: 0, stride: s },
                PlanePlacement { offset: s * h, stride: s / 2 },
                PlanePlacement { offset: s * h * 3 / 2, stride: s / 2 },
            ],
            GpuFormat::Nv12 | GpuFormat::P010 | GpuFormat::P012 | GpuFormat::P016 => vec![
                PlanePlacement { offset: 0, stride: s },
                PlanePlacement { offset: s * h, stride: s },
            ],
            GpuFormat::Argb8888 => vec![PlanePlacement { offset: 0, stride: s }],
        }
    }

    /// Byte range written for each plane
    pub fn plane_extents(&self, stride: u32) -> Vec<Range<usize>> {
        self.planes
            .iter()
            .zip(self.placements(stride))
            .map(|(plane, placement)| {
                let rows = plane.rows.max(1) as usize;
                let end = placement.offset + (rows - 1) * placement.stride + plane.row_bytes as usize;
                placement.offset..end
            })
            .collect()
    }

    /// Total bytes backing a buffer with this stride
    pub fn allocation_size(&self, stride: u32) -> usize {
        stride as usize * self.allocation.rows as usize
    }

    /// Whether every plane fits a buffer of this stride without overlapping another
    pub fn fits(&self, stride: u32) -> bool {
        if stride < self.allocation.row_bytes() {
            return false;
        }
        let placements = self.placements(stride);
        if self
            .planes
            .iter()
            .zip(&placements)
            .any(|(plane, placement)| plane.row_bytes as usize > placement.stride)
        {
            return false;
        }

        let size = self.allocation_size(stride);
        let extents = self.plane_extents(stride);
        if extents.iter().any(|extent| extent.end > size) {
            return false;
        }
        extents.iter().enumerate().all(|(i, a)| {
            extents[i + 1..]
                .iter()
                .all(|b| a.end <= b.start || b.end <= a.start)
        })
    }
}

/// Describe how frames of `format` at `width`x`height` are laid out in a GPU buffer
pub fn describe(format: DecoderFormat, width: u32, height: u32) -> Result<PlaneLayout, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions { width, height });
    }

    let cw = width.div_ceil(2);
    let ch = height.div_ceil(2);

    let (gpu_format, planes, repack, allocation) = match format {
        DecoderFormat::Yuv420p => (
            GpuFormat::Yuv420,
            vec![
                PlaneGeometry::new(height, width),
                PlaneGeometry::new(ch, cw),
                PlaneGeometry::new(ch, cw),
            ],
            Repack::Copy,
            // GR88 texels, U and V stacked below luma at half stride
            AllocationGeometry {
                texel_width: cw,
                rows: height * 2,
                bytes_per_texel: 2,
            },
        ),
        DecoderFormat::Nv12 => (
            GpuFormat::Nv12,
            vec![PlaneGeometry::new(height, width), PlaneGeometry::new(ch, cw * 2)],
            Repack::Copy,
            AllocationGeometry {
                texel_width: cw,
                rows: height + ch,
                bytes_per_texel: 2,
            },
        ),
        DecoderFormat::Yuv420p10(endian) => shifted(GpuFormat::P010, 10, endian, width, height),
        DecoderFormat::Yuv420p12(endian) => shifted(GpuFormat::P012, 12, endian, width, height),
        DecoderFormat::Yuv420p16(endian) => shifted(GpuFormat::P016, 16, endian, width, height),
        DecoderFormat::Bgra => (
            GpuFormat::Argb8888,
            vec![PlaneGeometry::new(height, width * 4)],
            Repack::Copy,
            AllocationGeometry {
                texel_width: width,
                rows: height,
                bytes_per_texel: 4,
            },
        ),
        DecoderFormat::Other(name) => return Err(PipelineError::UnsupportedFormat(name.to_string())),
    };

    Ok(PlaneLayout {
        decoder_format: format,
        gpu_format,
        width,
        height,
        planes,
        repack,
        allocation,
    })
}

fn shifted(
    gpu_format: GpuFormat,
    bit_depth: u32,
    endian: Endian,
    width: u32,
    height: u32,
) -> (GpuFormat, Vec<PlaneGeometry>, Repack, AllocationGeometry) {
    let cw = width.div_ceil(2);
    let ch = height.div_ceil(2);
    (
        gpu_format,
        vec![
            PlaneGeometry::new(height, width * 2),
            // U/V pairs, 4 bytes per chroma sample position
            PlaneGeometry::new(ch, cw * 4),
        ],
        Repack::Shift {
            shift: 16 - bit_depth,
            endian,
        },
        AllocationGeometry {
            texel_width: cw * 2,
            rows: height + ch,
            bytes_per_texel: 2,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DecoderFormat; 8] = [
        DecoderFormat::Yuv420p,
        DecoderFormat::Nv12,
        DecoderFormat::Yuv420p10(Endian::Little),
        DecoderFormat::Yuv420p10(Endian::Big),
        DecoderFormat::Yuv420p12(Endian::Little),
        DecoderFormat::Yuv420p12(Endian::Big),
        DecoderFormat::Yuv420p16(Endian::Little),
        DecoderFormat::Bgra,
    ];

    #[test]
    fn test_yuv420p_maps_to_three_plane_copy() {
        let layout = describe(DecoderFormat::Yuv420p, 1920, 1080).unwrap();
        assert_eq!(layout.gpu_format, GpuFormat::Yuv420);
        assert_eq!(layout.repack, Repack::Copy);
        assert_eq!(layout.planes.len(), 3);
        assert_eq!(layout.planes[0], PlaneGeometry::new(1080, 1920));
        assert_eq!(layout.planes[1], PlaneGeometry::new(540, 960));
        assert_eq!(layout.planes[2], PlaneGeometry::new(540, 960));
    }

    #[test]
    fn test_shift_derived_from_bit_depth() {
        let shift_of = |format| match describe(format, 64, 64).unwrap().repack {
            Repack::Shift { shift, .. } => shift,
            Repack::Copy => panic!("expected shift repack"),
        };
        assert_eq!(shift_of(DecoderFormat::Yuv420p10(Endian::Little)), 6);
        assert_eq!(shift_of(DecoderFormat::Yuv420p12(Endian::Little)), 4);
        assert_eq!(shift_of(DecoderFormat::Yuv420p16(Endian::Big)), 0);
    }

    #[test]
    fn test_high_bit_depth_targets() {
        assert_eq!(
            describe(DecoderFormat::Yuv420p10(Endian::Big), 8, 8).unwrap().gpu_format,
            GpuFormat::P010
        );
        assert_eq!(
            describe(DecoderFormat::Yuv420p12(Endian::Little), 8, 8).unwrap().gpu_format,
            GpuFormat::P012
        );
        assert_eq!(
            describe(DecoderFormat::Yuv420p16(Endian::Little), 8, 8).unwrap().gpu_format,
            GpuFormat::P016
        );
    }

    #[test]
    fn test_unsupported_format() {
        let err = describe(DecoderFormat::Other("gray"), 64, 64).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(name) if name == "gray"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(
            describe(DecoderFormat::Yuv420p, 0, 10),
            Err(PipelineError::InvalidDimensions { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_planes_fit_without_overlap() {
        let sizes = [(1, 1), (2, 2), (3, 5), (17, 9), (640, 360), (1279, 719), (1920, 1080)];
        for format in ALL {
            for (width, height) in sizes {
                let layout = describe(format, width, height).unwrap();
                let minimum = layout.allocation.row_bytes();
                for stride in [minimum, minimum.next_multiple_of(64), minimum.next_multiple_of(256)] {
                    assert!(
                        layout.fits(stride),
                        "{} {}x{} stride {} does not fit",
                        format,
                        width,
                        height,
                        stride
                    );
                }
            }
        }
    }

    #[test]
    fn test_narrow_stride_rejected() {
        let layout = describe(DecoderFormat::Bgra, 100, 10).unwrap();
        assert!(!layout.fits(399));
        assert!(layout.fits(400));
    }

    #[test]
    fn test_fourcc_codes() {
        assert_eq!(GpuFormat::P010.fourcc(), 0x3031_3050);
        assert_eq!(GpuFormat::Nv12.fourcc(), 0x3231_564e);
        assert_eq!(GpuFormat::Yuv420.fourcc(), 0x3231_5559);
        assert_eq!(GpuFormat::Argb8888.fourcc(), 0x3432_5241);
    }

    #[test]
    fn test_source_planes_match_destination_rows() {
        let source = DecoderFormat::Yuv420p10(Endian::Little).source_planes(5, 3).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source[0], PlaneGeometry::new(3, 10));
        assert_eq!(source[1], PlaneGeometry::new(2, 6));
        assert!(DecoderFormat::Other("gray").source_planes(4, 4).is_none());
    }
}
