//! Decoder and converter collaborators.
//!
//! The engine never looks inside compressed data itself. It hands packets to
//! a [`VideoDecoder`] / [`AudioDecoder`] and reshapes their output with a
//! [`VideoConverter`] / [`AudioConverter`] into the fixed layouts the picture
//! ring and the output device expect. Built in are raw I420 video and
//! interleaved PCM S16 audio, which is what the synthetic source produces.

use serde::Serialize;

use crate::buffer::{AudioBuffer, AudioSpec};
use crate::queue::Packet;
use crate::video::picture::Picture;

const RAW_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    I420,
    Gray8,
}

impl PixelFormat {
    fn to_byte(self) -> u8 {
        match self {
            PixelFormat::I420 => 0,
            PixelFormat::Gray8 => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PixelFormat::I420),
            1 => Some(PixelFormat::Gray8),
            _ => None,
        }
    }

    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        match self {
            PixelFormat::I420 => luma + 2 * chroma_len(width, height),
            PixelFormat::Gray8 => luma,
        }
    }
}

pub fn chroma_len(width: u32, height: u32) -> usize {
    (width as usize).div_ceil(2) * (height as usize).div_ceil(2)
}

/// Codec parameters of a demuxed stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CodecParams {
    RawVideo { width: u32, height: u32, frame_rate: f64 },
    PcmS16 { spec: AudioSpec },
}

#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// How many extra half frames this frame should be displayed for.
    pub repeat: u32,
}

#[derive(Debug)]
pub struct AudioFrame {
    pub spec: AudioSpec,
    pub samples: Vec<i16>,
    pub pts: Option<i64>,
}

#[derive(Debug)]
pub enum DecodeError {
    Truncated { expected: usize, actual: usize },
    UnknownPixelFormat(u8),
    Unaligned { len: usize, frame_size: usize },
    Unsupported(CodecParams),
}

#[derive(Debug)]
pub enum ConvertError {
    PlaneSize { expected: usize, actual: usize },
    NoChannels,
}

pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>, DecodeError>;

    /// Drops any state carried between packets. Called on a flush marker.
    fn flush(&mut self);
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>, DecodeError>;

    fn flush(&mut self);
}

/// Reshapes decoded video into planar YUV 4:2:0.
pub trait VideoConverter: Send {
    fn convert(&mut self, frame: &VideoFrame, picture: &mut Picture) -> Result<(), ConvertError>;
}

/// Reshapes decoded audio into interleaved S16 in the output format.
pub trait AudioConverter: Send {
    fn convert(&mut self, frame: &AudioFrame, out: &mut AudioBuffer) -> Result<(), ConvertError>;
}

pub fn open_video_decoder(params: &CodecParams) -> Result<Box<dyn VideoDecoder>, DecodeError> {
    match params {
        CodecParams::RawVideo { .. } => Ok(Box::new(RawVideoDecoder)),
        other => Err(DecodeError::Unsupported(other.clone())),
    }
}

pub fn open_audio_decoder(params: &CodecParams) -> Result<Box<dyn AudioDecoder>, DecodeError> {
    match params {
        CodecParams::PcmS16 { spec } => Ok(Box::new(PcmDecoder::new(*spec))),
        other => Err(DecodeError::Unsupported(other.clone())),
    }
}

/// Packs one raw frame the way [`RawVideoDecoder`] expects it:
/// width and height as little endian u16, a format byte, then pixels.
pub fn encode_raw_video(width: u16, height: u16, format: PixelFormat, pixels: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(RAW_HEADER_LEN + pixels.len());
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.push(format.to_byte());
    data.extend_from_slice(pixels);
    data
}

pub struct RawVideoDecoder;

impl VideoDecoder for RawVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<VideoFrame>, DecodeError> {
        let data = &packet.data;

        if data.len() < RAW_HEADER_LEN {
            return Err(DecodeError::Truncated { expected: RAW_HEADER_LEN, actual: data.len() });
        }

        let width = u32::from(u16::from_le_bytes([data[0], data[1]]));
        let height = u32::from(u16::from_le_bytes([data[2], data[3]]));
        let format = PixelFormat::from_byte(data[4])
            .ok_or(DecodeError::UnknownPixelFormat(data[4]))?;

        let pixels = &data[RAW_HEADER_LEN..];
        let expected = format.frame_len(width, height);
        if pixels.len() < expected {
            return Err(DecodeError::Truncated { expected, actual: pixels.len() });
        }

        Ok(vec![VideoFrame {
            width,
            height,
            format,
            data: pixels[..expected].to_vec(),
            pts: packet.pts,
            dts: packet.dts,
            repeat: 0,
        }])
    }

    fn flush(&mut self) {
        // raw frames carry no inter-packet state
    }
}

pub struct PcmDecoder {
    spec: AudioSpec,
}

impl PcmDecoder {
    pub fn new(spec: AudioSpec) -> Self {
        PcmDecoder { spec }
    }
}

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<AudioFrame>, DecodeError> {
        let frame_size = self.spec.frame_size();

        if packet.data.len() % frame_size != 0 {
            return Err(DecodeError::Unaligned { len: packet.data.len(), frame_size });
        }

        let samples = packet.data
            .chunks_exact(AudioSpec::BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(vec![AudioFrame { spec: self.spec, samples, pts: packet.pts }])
    }

    fn flush(&mut self) {}
}

#[derive(Default)]
pub struct Yuv420Converter;

impl VideoConverter for Yuv420Converter {
    fn convert(&mut self, frame: &VideoFrame, picture: &mut Picture) -> Result<(), ConvertError> {
        let expected = frame.format.frame_len(frame.width, frame.height);
        if frame.data.len() != expected {
            return Err(ConvertError::PlaneSize { expected, actual: frame.data.len() });
        }

        let luma = frame.width as usize * frame.height as usize;
        let chroma = chroma_len(frame.width, frame.height);
        let [y, u, v] = picture.planes_mut();

        y.copy_from_slice(&frame.data[..luma]);

        match frame.format {
            PixelFormat::I420 => {
                u.copy_from_slice(&frame.data[luma..][..chroma]);
                v.copy_from_slice(&frame.data[luma + chroma..][..chroma]);
            }
            PixelFormat::Gray8 => {
                u.fill(128);
                v.fill(128);
            }
        }

        Ok(())
    }
}

/// Remaps channels and linearly resamples to the output format.
pub struct S16Converter {
    target: AudioSpec,
}

impl S16Converter {
    pub fn new(target: AudioSpec) -> Self {
        S16Converter { target }
    }
}

impl AudioConverter for S16Converter {
    fn convert(&mut self, frame: &AudioFrame, out: &mut AudioBuffer) -> Result<(), ConvertError> {
        let in_channels = usize::from(frame.spec.channels);
        let out_channels = usize::from(self.target.channels);

        if in_channels == 0 || out_channels == 0 {
            return Err(ConvertError::NoChannels);
        }

        let in_frames = frame.samples.len() / in_channels;
        let out_frames = if frame.spec.sample_rate == self.target.sample_rate {
            in_frames
        } else {
            (in_frames as u64 * u64::from(self.target.sample_rate)
                / u64::from(frame.spec.sample_rate)) as usize
        };

        let step = frame.spec.sample_rate as f64 / self.target.sample_rate as f64;

        let sample_at = |index: usize, channel: usize| -> f64 {
            let index = index.min(in_frames.saturating_sub(1));
            f64::from(frame.samples[index * in_channels + channel])
        };

        let bytes = out.bytes_mut();
        bytes.clear();
        bytes.reserve(out_frames * self.target.frame_size());

        for out_index in 0..out_frames {
            let position = out_index as f64 * step;
            let index = position as usize;
            let frac = position - index as f64;

            for channel in 0..out_channels {
                let value = if out_channels == 1 && in_channels > 1 {
                    // downmix to mono
                    let sum: f64 = (0..in_channels)
                        .map(|c| lerp(sample_at(index, c), sample_at(index + 1, c), frac))
                        .sum();
                    sum / in_channels as f64
                } else {
                    let source = channel % in_channels;
                    lerp(sample_at(index, source), sample_at(index + 1, source), frac)
                };

                let sample = value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
                bytes.extend_from_slice(&sample.to_ne_bytes());
            }
        }

        Ok(())
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::StreamKind;

    fn video_packet(width: u16, height: u16, format: PixelFormat, fill: u8) -> Packet {
        let len = format.frame_len(u32::from(width), u32::from(height));
        let data = encode_raw_video(width, height, format, &vec![fill; len]);
        Packet::new(StreamKind::Video, data).with_pts(3000)
    }

    #[test]
    fn raw_video_round_trips_header() {
        let packet = video_packet(4, 2, PixelFormat::I420, 7);
        let frames = RawVideoDecoder.decode(&packet).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0].width, frames[0].height), (4, 2));
        assert_eq!(frames[0].data.len(), 8 + 2 + 2);
        assert_eq!(frames[0].pts, Some(3000));
    }

    #[test]
    fn raw_video_rejects_truncated_frames() {
        let mut packet = video_packet(4, 4, PixelFormat::I420, 0);
        packet.data.truncate(10);
        assert!(matches!(RawVideoDecoder.decode(&packet), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn raw_video_rejects_unknown_format() {
        let mut packet = video_packet(2, 2, PixelFormat::Gray8, 0);
        packet.data[4] = 9;
        assert!(matches!(RawVideoDecoder.decode(&packet), Err(DecodeError::UnknownPixelFormat(9))));
    }

    #[test]
    fn gray_converts_with_neutral_chroma() {
        let packet = video_packet(4, 4, PixelFormat::Gray8, 200);
        let frame = RawVideoDecoder.decode(&packet).unwrap().remove(0);
        let mut picture = Picture::allocate(4, 4);
        Yuv420Converter.convert(&frame, &mut picture).unwrap();

        let [y, u, v] = picture.planes();
        assert!(y.iter().all(|&p| p == 200));
        assert!(u.iter().chain(v.iter()).all(|&p| p == 128));
    }

    #[test]
    fn pcm_rejects_partial_frames() {
        let spec = AudioSpec { sample_rate: 48_000, channels: 2 };
        let packet = Packet::new(StreamKind::Audio, vec![0; 6]);
        assert!(PcmDecoder::new(spec).decode(&packet).is_err());
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let frame = AudioFrame {
            spec: AudioSpec { sample_rate: 48_000, channels: 1 },
            samples: vec![1, 2, 3],
            pts: None,
        };
        let target = AudioSpec { sample_rate: 48_000, channels: 2 };
        let mut out = AudioBuffer::new(target);
        S16Converter::new(target).convert(&frame, &mut out).unwrap();
        assert_eq!(out.samples(), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn stereo_is_downmixed_to_mono() {
        let frame = AudioFrame {
            spec: AudioSpec { sample_rate: 48_000, channels: 2 },
            samples: vec![100, 300, -50, -150],
            pts: None,
        };
        let target = AudioSpec { sample_rate: 48_000, channels: 1 };
        let mut out = AudioBuffer::new(target);
        S16Converter::new(target).convert(&frame, &mut out).unwrap();
        assert_eq!(out.samples(), vec![200, -100]);
    }

    #[test]
    fn resample_halves_frame_count() {
        let frame = AudioFrame {
            spec: AudioSpec { sample_rate: 48_000, channels: 1 },
            samples: vec![0, 10, 20, 30, 40, 50, 60, 70],
            pts: None,
        };
        let target = AudioSpec { sample_rate: 24_000, channels: 1 };
        let mut out = AudioBuffer::new(target);
        S16Converter::new(target).convert(&frame, &mut out).unwrap();
        assert_eq!(out.samples(), vec![0, 20, 40, 60]);
    }
}
