//! A generated source for running the engine without any media files.
//!
//! Video is raw I420 with a vertical bar sweeping across the frame, audio
//! is a 440Hz tone. Both streams are interleaved in timestamp order, as a
//! container would be.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use structopt::StructOpt;

use crate::buffer::AudioSpec;
use crate::codec::{self, CodecParams, PixelFormat};
use crate::queue::{Packet, StreamKind};
use crate::seek::SeekFlags;
use crate::source::{DemuxError, Demuxer, ReadResult, StreamInfo};
use crate::time::TimeBase;

const VIDEO_TIME_BASE: TimeBase = TimeBase::new(1, 90_000);

/// Sample frames per audio packet.
pub const AUDIO_UNIT_FRAMES: usize = 1024;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;

const LUMA_BACKGROUND: u8 = 16;
const LUMA_BAR: u8 = 235;

#[derive(StructOpt, Debug, Clone)]
pub struct SyntheticOpt {
    /// Length of the generated media in seconds
    #[structopt(long, env = "AVSYNC_DURATION", default_value = "10")]
    pub duration: f64,

    #[structopt(long, env = "AVSYNC_FPS", default_value = "25")]
    pub fps: f64,

    #[structopt(long, env = "AVSYNC_WIDTH", default_value = "320")]
    pub width: u16,

    #[structopt(long, env = "AVSYNC_HEIGHT", default_value = "240")]
    pub height: u16,

    #[structopt(long, env = "AVSYNC_SAMPLE_RATE", default_value = "48000")]
    pub sample_rate: u32,

    #[structopt(long, env = "AVSYNC_CHANNELS", default_value = "2")]
    pub channels: u16,

    /// Whether to generate an audio stream at all
    #[structopt(long, env = "AVSYNC_AUDIO", default_value = "true", parse(try_from_str))]
    pub audio: bool,

    /// Chance of any read returning "try again", to exercise backoff
    #[structopt(long, env = "AVSYNC_STALL_PROBABILITY", default_value = "0")]
    pub stall_probability: f64,

    #[structopt(long, env = "AVSYNC_SEED")]
    pub seed: Option<u64>,
}

impl Default for SyntheticOpt {
    fn default() -> Self {
        SyntheticOpt {
            duration: 10.0,
            fps: 25.0,
            width: 320,
            height: 240,
            sample_rate: 48_000,
            channels: 2,
            audio: true,
            stall_probability: 0.0,
            seed: None,
        }
    }
}

impl SyntheticOpt {
    /// Applies comma separated `key=value` overrides.
    pub fn with_params(mut self, params: &str) -> Result<Self, DemuxError> {
        for param in params.split(',').filter(|param| !param.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));

            let invalid = || DemuxError::InvalidParameter {
                key: key.to_owned(),
                value: value.to_owned(),
            };

            match key {
                "duration" => self.duration = value.parse().map_err(|_| invalid())?,
                "fps" => self.fps = value.parse().map_err(|_| invalid())?,
                "width" => self.width = value.parse().map_err(|_| invalid())?,
                "height" => self.height = value.parse().map_err(|_| invalid())?,
                "sample_rate" => self.sample_rate = value.parse().map_err(|_| invalid())?,
                "channels" => self.channels = value.parse().map_err(|_| invalid())?,
                "audio" => self.audio = value.parse().map_err(|_| invalid())?,
                "stall_probability" => self.stall_probability = value.parse().map_err(|_| invalid())?,
                "seed" => self.seed = Some(value.parse().map_err(|_| invalid())?),
                _ => return Err(invalid()),
            }
        }

        Ok(self)
    }

    fn validate(&self) -> Result<(), DemuxError> {
        let invalid = |key: &str, value: String| Err(DemuxError::InvalidParameter {
            key: key.to_owned(),
            value,
        });

        if !(self.duration > 0.0) {
            return invalid("duration", self.duration.to_string());
        }
        if !(self.fps > 0.0) {
            return invalid("fps", self.fps.to_string());
        }
        if self.width == 0 || self.height == 0 {
            return invalid("size", format!("{}x{}", self.width, self.height));
        }
        if self.audio && (self.sample_rate == 0 || self.channels == 0) {
            return invalid("audio", format!("{}Hz {}ch", self.sample_rate, self.channels));
        }
        if !(0.0..=1.0).contains(&self.stall_probability) {
            return invalid("stall_probability", self.stall_probability.to_string());
        }

        Ok(())
    }
}

pub struct SyntheticSource {
    opt: SyntheticOpt,
    streams: Vec<StreamInfo>,
    video_frames: u64,
    audio_units: u64,
    audio_samples: u64,
    next_video: u64,
    next_audio: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub const VIDEO_STREAM: usize = 0;
    pub const AUDIO_STREAM: usize = 1;

    pub fn new(opt: SyntheticOpt) -> Result<Self, DemuxError> {
        opt.validate()?;

        let mut streams = vec![StreamInfo {
            index: Self::VIDEO_STREAM,
            kind: StreamKind::Video,
            time_base: VIDEO_TIME_BASE,
            codec: CodecParams::RawVideo {
                width: u32::from(opt.width),
                height: u32::from(opt.height),
                frame_rate: opt.fps,
            },
        }];

        if opt.audio {
            streams.push(StreamInfo {
                index: Self::AUDIO_STREAM,
                kind: StreamKind::Audio,
                time_base: TimeBase::new(1, i64::from(opt.sample_rate)),
                codec: CodecParams::PcmS16 { spec: opt.spec() },
            });
        }

        let video_frames = (opt.duration * opt.fps).ceil() as u64;
        let audio_samples = if opt.audio {
            (opt.duration * f64::from(opt.sample_rate)).round() as u64
        } else {
            0
        };

        let rng = match opt.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::debug!(?opt, video_frames, audio_samples, "opened synthetic source");

        Ok(SyntheticSource {
            video_frames,
            audio_units: audio_samples.div_ceil(AUDIO_UNIT_FRAMES as u64),
            audio_samples,
            next_video: 0,
            next_audio: 0,
            streams,
            opt,
            rng,
        })
    }

    fn video_time(&self, frame: u64) -> f64 {
        frame as f64 / self.opt.fps
    }

    fn audio_time(&self, unit: u64) -> f64 {
        (unit * AUDIO_UNIT_FRAMES as u64) as f64 / f64::from(self.opt.sample_rate)
    }

    fn video_packet(&self, frame: u64) -> Packet {
        let width = usize::from(self.opt.width);
        let height = usize::from(self.opt.height);
        let format = PixelFormat::I420;

        let mut pixels = vec![128u8; format.frame_len(width as u32, height as u32)];
        let (luma, _) = pixels.split_at_mut(width * height);

        let bar_width = (width / 16).max(1);
        let bar_x = (frame as usize * bar_width / 2) % width;

        for row in luma.chunks_exact_mut(width) {
            for (x, pixel) in row.iter_mut().enumerate() {
                let in_bar = x >= bar_x && x < bar_x + bar_width;
                *pixel = if in_bar { LUMA_BAR } else { LUMA_BACKGROUND };
            }
        }

        let pts = VIDEO_TIME_BASE.from_seconds(self.video_time(frame));
        let data = codec::encode_raw_video(self.opt.width, self.opt.height, format, &pixels);

        Packet::new(StreamKind::Video, data).with_pts(pts)
    }

    fn audio_packet(&self, unit: u64) -> Packet {
        let first = unit * AUDIO_UNIT_FRAMES as u64;
        let frames = (self.audio_samples - first).min(AUDIO_UNIT_FRAMES as u64);
        let channels = usize::from(self.opt.channels);
        let rate = f64::from(self.opt.sample_rate);

        let mut data = Vec::with_capacity(frames as usize * channels * AudioSpec::BYTES_PER_SAMPLE);
        for n in first..first + frames {
            let phase = TAU * TONE_HZ * n as f64 / rate;
            let sample = (phase.sin() * TONE_AMPLITUDE * f64::from(i16::MAX)) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }

        Packet::new(StreamKind::Audio, data).with_pts(first as i64)
    }
}

impl SyntheticOpt {
    fn spec(&self) -> AudioSpec {
        AudioSpec { sample_rate: self.sample_rate, channels: self.channels }
    }
}

impl Demuxer for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read(&mut self) -> Result<ReadResult, DemuxError> {
        if self.opt.stall_probability > 0.0 && self.rng.gen_bool(self.opt.stall_probability) {
            return Ok(ReadResult::Again);
        }

        let video = (self.next_video < self.video_frames).then(|| self.video_time(self.next_video));
        let audio = (self.next_audio < self.audio_units).then(|| self.audio_time(self.next_audio));

        let take_audio = match (video, audio) {
            (None, None) => return Ok(ReadResult::Eof),
            (Some(video), Some(audio)) => audio < video,
            (Some(_), None) => false,
            (None, Some(_)) => true,
        };

        if take_audio {
            let packet = self.audio_packet(self.next_audio);
            self.next_audio += 1;
            Ok(ReadResult::Packet { stream: Self::AUDIO_STREAM, packet })
        } else {
            let packet = self.video_packet(self.next_video);
            self.next_video += 1;
            Ok(ReadResult::Packet { stream: Self::VIDEO_STREAM, packet })
        }
    }

    fn seek(&mut self, stream: usize, target: i64, flags: SeekFlags) -> Result<(), DemuxError> {
        let info = self.streams.get(stream).ok_or(DemuxError::NoSuchStream(stream))?;
        let seconds = info.time_base.to_seconds(target).max(0.0);

        if seconds > self.opt.duration {
            return Err(DemuxError::SeekOutOfRange { stream, target });
        }

        // like a container, repositioning one stream moves the whole file
        let backward = flags.contains(SeekFlags::BACKWARD);
        let position = |units_per_second: f64| -> u64 {
            let exact = seconds * units_per_second;
            if backward {
                (exact + 1e-9).floor() as u64
            } else {
                (exact - 1e-9).ceil() as u64
            }
        };

        self.next_video = position(self.opt.fps).min(self.video_frames);
        if self.opt.audio {
            let units_per_second = f64::from(self.opt.sample_rate) / AUDIO_UNIT_FRAMES as f64;
            self.next_audio = position(units_per_second).min(self.audio_units);
        }

        tracing::debug!(seconds, next_video = self.next_video, next_audio = self.next_audio, "synthetic seek");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawVideoDecoder, VideoDecoder};

    fn source(opt: SyntheticOpt) -> SyntheticSource {
        SyntheticSource::new(SyntheticOpt { seed: Some(7), ..opt }).unwrap()
    }

    fn short() -> SyntheticOpt {
        SyntheticOpt {
            duration: 1.0,
            width: 32,
            height: 16,
            sample_rate: 8_000,
            channels: 1,
            ..SyntheticOpt::default()
        }
    }

    fn read_all(source: &mut SyntheticSource) -> Vec<(usize, Packet)> {
        let mut packets = Vec::new();
        loop {
            match source.read().unwrap() {
                ReadResult::Packet { stream, packet } => packets.push((stream, packet)),
                ReadResult::Again => {}
                ReadResult::Eof => return packets,
            }
        }
    }

    fn seconds(stream: usize, packet: &Packet, source: &SyntheticSource) -> f64 {
        source.streams()[stream].time_base.to_seconds(packet.pts.unwrap())
    }

    #[test]
    fn produces_every_frame_and_sample() {
        let mut source = source(short());
        let packets = read_all(&mut source);

        let video = packets.iter().filter(|(stream, _)| *stream == SyntheticSource::VIDEO_STREAM).count();
        let audio_bytes: usize = packets.iter()
            .filter(|(stream, _)| *stream == SyntheticSource::AUDIO_STREAM)
            .map(|(_, packet)| packet.size())
            .sum();

        assert_eq!(video, 25);
        assert_eq!(audio_bytes, 8_000 * 2);
    }

    #[test]
    fn packets_are_interleaved_by_time() {
        let mut source = source(short());
        let packets = read_all(&mut source);

        let times: Vec<f64> = packets.iter()
            .map(|(stream, packet)| seconds(*stream, packet, &source))
            .collect();

        assert!(times.windows(2).all(|pair| pair[0] <= pair[1] + 1.0 / 25.0));
    }

    #[test]
    fn video_packets_decode() {
        let mut source = source(short());
        let ReadResult::Packet { stream, packet } = source.read().unwrap() else {
            panic!("expected packet");
        };
        assert_eq!(stream, SyntheticSource::VIDEO_STREAM);

        let frames = RawVideoDecoder.decode(&packet).unwrap();
        assert_eq!((frames[0].width, frames[0].height), (32, 16));
        assert_eq!(frames[0].format, PixelFormat::I420);
    }

    #[test]
    fn seek_is_idempotent() {
        let mut source = source(short());
        let target = VIDEO_TIME_BASE.from_seconds(0.5);

        source.seek(SyntheticSource::VIDEO_STREAM, target, SeekFlags::empty()).unwrap();
        let first = read_all(&mut source);

        source.seek(SyntheticSource::VIDEO_STREAM, target, SeekFlags::empty()).unwrap();
        source.seek(SyntheticSource::VIDEO_STREAM, target, SeekFlags::empty()).unwrap();
        let second = read_all(&mut source);

        assert_eq!(first, second);
        assert!((seconds(first[0].0, &first[0].1, &source) - 0.5).abs() < 0.02);
    }

    #[test]
    fn backward_seek_lands_at_or_before_target() {
        let mut source = source(short());
        // 0.45s falls in the middle of audio unit 3 (0.384s..0.512s at 8kHz)
        let target = TimeBase::new(1, 8_000).from_seconds(0.45);

        source.seek(SyntheticSource::AUDIO_STREAM, target, SeekFlags::BACKWARD).unwrap();
        let packets = read_all(&mut source);

        let audio_start = packets.iter()
            .find(|(stream, _)| *stream == SyntheticSource::AUDIO_STREAM)
            .map(|(stream, packet)| seconds(*stream, packet, &source))
            .unwrap();
        assert!(audio_start <= 0.45);
        assert!(audio_start > 0.45 - 0.128);

        let video_start = seconds(packets[0].0, &packets[0].1, &source);
        assert!(video_start <= 0.45);
    }

    #[test]
    fn seek_past_end_fails() {
        let mut source = source(short());
        let target = VIDEO_TIME_BASE.from_seconds(5.0);
        assert!(matches!(
            source.seek(SyntheticSource::VIDEO_STREAM, target, SeekFlags::empty()),
            Err(DemuxError::SeekOutOfRange { .. })
        ));
    }

    #[test]
    fn seek_on_missing_stream_fails() {
        let mut source = source(SyntheticOpt { audio: false, ..short() });
        assert!(matches!(
            source.seek(SyntheticSource::AUDIO_STREAM, 0, SeekFlags::empty()),
            Err(DemuxError::NoSuchStream(1))
        ));
    }

    #[test]
    fn stalls_report_again() {
        let mut source = source(SyntheticOpt { stall_probability: 1.0, ..short() });
        assert!(matches!(source.read().unwrap(), ReadResult::Again));
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(SyntheticSource::new(SyntheticOpt { fps: 0.0, ..short() }).is_err());
        assert!(SyntheticSource::new(SyntheticOpt { stall_probability: 2.0, ..short() }).is_err());
        assert!(short().with_params("colour=red").is_err());
        assert!(short().with_params("fps=abc").is_err());
    }
}
