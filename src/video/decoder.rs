//! Decode pump over an FFmpeg demuxer/decoder pair
//!
//! [`DecodePump::next_frame`] yields exactly one decoded frame per call:
//! frames already buffered in the decoder are drained before another packet
//! is read, packets of other streams are discarded, and packets the decoder
//! rejects are logged and skipped. At end of input the decoder is flushed and
//! its remaining frames handed out before the pump reports end of stream.

use std::path::Path;

use ffmpeg_next::color::Primaries;

use super::format::DecoderFormat;
use super::frame::FrameData;
use super::hdr::ColorPrimaries;
use crate::error::PipelineError;

/// Errors tolerated from a flushed decoder before giving up on its tail
const MAX_DRAIN_ERRORS: u32 = 8;

/// A demuxed packet that knows which stream it belongs to
pub trait StreamPacket {
    fn stream_index(&self) -> usize;
}

impl StreamPacket for ffmpeg_next::Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }
}

/// Result of asking the decoder for a frame
#[derive(Debug)]
pub enum Received<F> {
    Frame(F),
    /// The decoder needs another packet first
    WouldBlock,
    /// The decoder was flushed and has no frames left
    Drained,
}

/// Properties of the selected video stream, known after open
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    pub format: DecoderFormat,
    pub primaries: ColorPrimaries,
    pub codec_name: String,
    /// Frames per second; 0 when the container does not say
    pub frame_rate: f64,
}

/// Demuxer and decoder of one input
pub trait MediaSource {
    type Packet: StreamPacket;
    type Frame: FrameData;

    fn stream_info(&self) -> &StreamInfo;

    /// Next packet of any stream, or `None` at end of input
    fn read_packet(&mut self) -> Option<Self::Packet>;

    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), PipelineError>;

    /// Enter draining mode
    fn send_eof(&mut self) -> Result<(), PipelineError>;

    fn receive_frame(&mut self) -> Result<Received<Self::Frame>, PipelineError>;
}

/// Where the pump is in its read/decode cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpState {
    #[default]
    Idle,
    PacketRead,
    /// Last packet belonged to another stream
    Filtered,
    Decoding,
    FrameReady,
    NoMoreData,
}

/// Counters kept by the pump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub packets_read: u64,
    pub packets_filtered: u64,
    pub decode_errors: u64,
    pub frames_decoded: u64,
}

/// Pulls packets through the decoder one frame at a time
pub struct DecodePump<S: MediaSource> {
    source: S,
    state: PumpState,
    stats: PumpStats,
    flushed: bool,
    drain_errors: u32,
}

impl<S: MediaSource> DecodePump<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: PumpState::Idle,
            stats: PumpStats::default(),
            flushed: false,
            drain_errors: 0,
        }
    }

    pub fn stream_info(&self) -> &StreamInfo {
        self.source.stream_info()
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_finished(&self) -> bool {
        self.state == PumpState::NoMoreData
    }

    fn finish(&mut self) -> Option<S::Frame> {
        if self.state != PumpState::NoMoreData {
            tracing::info!(
                frames = self.stats.frames_decoded,
                packets = self.stats.packets_read,
                filtered = self.stats.packets_filtered,
                errors = self.stats.decode_errors,
                "End of stream"
            );
        }
        self.state = PumpState::NoMoreData;
        None
    }

    /// Decode the next frame of the selected stream
    ///
    /// `Ok(None)` means end of stream; every later call returns it again.
    /// Only errors that make further decoding impossible are returned.
    pub fn next_frame(&mut self) -> Result<Option<S::Frame>, PipelineError> {
        if self.state == PumpState::NoMoreData {
            return Ok(None);
        }

        loop {
            // Drain what the decoder already has before feeding it more
            match self.source.receive_frame() {
                Ok(Received::Frame(frame)) => {
                    self.stats.frames_decoded += 1;
                    self.state = PumpState::FrameReady;
                    return Ok(Some(frame));
                }
                Ok(Received::Drained) => return Ok(self.finish()),
                // A flushed decoder that still wants input has nothing left
                Ok(Received::WouldBlock) if self.flushed => {
                    tracing::debug!("Flushed decoder asked for more input");
                    return Ok(self.finish());
                }
                Ok(Received::WouldBlock) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    self.stats.decode_errors += 1;
                    tracing::warn!("Skipping undecodable frame: {}", err);
                    // No more input is coming, so only retry the tail a few times
                    if self.flushed {
                        self.drain_errors += 1;
                        if self.drain_errors >= MAX_DRAIN_ERRORS {
                            return Ok(self.finish());
                        }
                        continue;
                    }
                }
            }

            // End of input: switch the decoder to draining mode
            let Some(packet) = self.source.read_packet() else {
                tracing::debug!("End of input, flushing decoder");
                self.source.send_eof()?;
                self.flushed = true;
                continue;
            };

            self.stats.packets_read += 1;
            self.state = PumpState::PacketRead;

            // Audio, subtitles and other video streams are not ours
            let wanted = self.source.stream_info().stream_index;
            if packet.stream_index() != wanted {
                self.stats.packets_filtered += 1;
                self.state = PumpState::Filtered;
                tracing::trace!(stream = packet.stream_index(), "Discarding packet of other stream");
                continue;
            }

            // A rejected packet costs its frames, not the stream
            self.state = PumpState::Decoding;
            match self.source.send_packet(&packet) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    self.stats.decode_errors += 1;
                    tracing::warn!("Skipping packet the decoder rejected: {}", err);
                }
            }
        }
    }
}

impl From<Primaries> for ColorPrimaries {
    fn from(primaries: Primaries) -> Self {
        match primaries {
            Primaries::BT709 => ColorPrimaries::Bt709,
            Primaries::BT470M => ColorPrimaries::Bt470M,
            Primaries::BT470BG => ColorPrimaries::Bt470Bg,
            Primaries::SMPTE170M => ColorPrimaries::Smpte170M,
            Primaries::SMPTE240M => ColorPrimaries::Smpte240M,
            Primaries::SMPTE428 => ColorPrimaries::Smpte428,
            Primaries::SMPTE431 => ColorPrimaries::Smpte431,
            Primaries::SMPTE432 => ColorPrimaries::Smpte432,
            Primaries::BT2020 => ColorPrimaries::Bt2020,
            _ => ColorPrimaries::Unspecified,
        }
    }
}

/// FFmpeg demuxer plus software video decoder for one file
pub struct FfmpegSource {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    info: StreamInfo,
}

impl FfmpegSource {
    /// Open `path` and set up a decoder for its best video stream
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        // Safe to call more than once
        ffmpeg_next::init()?;

        let path = path.as_ref();
        let input = ffmpeg_next::format::input(&path).map_err(|e| PipelineError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(PipelineError::NoVideoStream)?;
        let stream_index = stream.index();

        // Frame rate for pacing; 0/0 when the container does not know
        let rate = stream.avg_frame_rate();
        let frame_rate = if rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::DecodeError(format!("failed to create decoder: {}", e)))?;

        let codec_name = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let info = StreamInfo {
            stream_index,
            width: decoder.width(),
            height: decoder.height(),
            format: decoder.format().into(),
            primaries: decoder.color_primaries().into(),
            codec_name,
            frame_rate,
        };

        tracing::info!(
            "Opened {}: {} {}x{} {} @ {:.2} fps (stream {})",
            path.display(),
            info.codec_name,
            info.width,
            info.height,
            info.format,
            info.frame_rate,
            info.stream_index
        );

        Ok(Self { input, decoder, info })
    }
}

impl MediaSource for FfmpegSource {
    type Packet = ffmpeg_next::Packet;
    type Frame = ffmpeg_next::frame::Video;

    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Option<ffmpeg_next::Packet> {
        self.input.packets().next().map(|(_, packet)| packet)
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::Packet) -> Result<(), PipelineError> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| PipelineError::DecodeError(e.to_string()))
    }

    fn send_eof(&mut self) -> Result<(), PipelineError> {
        self.decoder.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<ffmpeg_next::frame::Video>, PipelineError> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Received::Frame(frame)),
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => Ok(Received::WouldBlock),
            Err(ffmpeg_next::Error::Eof) => Ok(Received::Drained),
            Err(e) => Err(PipelineError::DecodeError(e.to_string())),
        }
    }
}
