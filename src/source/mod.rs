pub mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::buffer::AudioSpec;
use crate::codec::CodecParams;
use crate::queue::{Packet, StreamKind, Unit};
use crate::seek::{self, SeekFlags};
use crate::session::Session;
use crate::time::TimeBase;

pub use synthetic::{SyntheticOpt, SyntheticSource};

/// Combined byte ceiling of both packet queues before demuxing pauses.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;

/// How long the demux actor backs off when it cannot make progress.
const BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: TimeBase,
    pub codec: CodecParams,
}

#[derive(Debug)]
pub enum ReadResult {
    Packet { stream: usize, packet: Packet },
    /// Nothing available right now, try again later.
    Again,
    Eof,
}

#[derive(Debug)]
pub enum DemuxError {
    UnsupportedUri(String),
    InvalidParameter { key: String, value: String },
    NoSuchStream(usize),
    SeekOutOfRange { stream: usize, target: i64 },
}

/// A container reader. Owned and driven by the demux actor only.
pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    fn read(&mut self) -> Result<ReadResult, DemuxError>;

    /// Repositions so the next packet read is near `target`, in the time
    /// base of `stream`.
    fn seek(&mut self, stream: usize, target: i64, flags: SeekFlags) -> Result<(), DemuxError>;
}

/// Opens the source named by `uri`.
///
/// Supported: `synthetic` and `synthetic:key=value,...`, where keys
/// override the matching fields of `opt`.
pub fn open(uri: &str, opt: &SyntheticOpt) -> Result<Box<dyn Demuxer>, DemuxError> {
    let (scheme, params) = uri.split_once(':').unwrap_or((uri, ""));

    match scheme {
        "synthetic" => {
            let opt = opt.clone().with_params(params)?;
            Ok(Box::new(SyntheticSource::new(opt)?))
        }
        _ => Err(DemuxError::UnsupportedUri(uri.to_owned())),
    }
}

/// The streams a session plays out of everything a source offers.
#[derive(Debug, Clone)]
pub struct Selection {
    pub video: StreamInfo,
    pub audio: Option<StreamInfo>,
}

impl Selection {
    /// Picks the first stream of each kind. Without a video stream there is
    /// nothing to play.
    pub fn select(streams: &[StreamInfo]) -> Option<Selection> {
        let first = |kind| streams.iter().find(|stream| stream.kind == kind).cloned();

        Some(Selection {
            video: first(StreamKind::Video)?,
            audio: first(StreamKind::Audio),
        })
    }

    fn kind_of(&self, stream: usize) -> Option<StreamKind> {
        if stream == self.video.index {
            Some(StreamKind::Video)
        } else if self.audio.as_ref().is_some_and(|audio| audio.index == stream) {
            Some(StreamKind::Audio)
        } else {
            None
        }
    }
}

/// Output format for an audio stream: its own format when it is PCM,
/// otherwise 48kHz stereo.
pub fn output_spec(stream: &StreamInfo) -> AudioSpec {
    match stream.codec {
        CodecParams::PcmS16 { spec } => spec,
        _ => AudioSpec { sample_rate: 48_000, channels: 2 },
    }
}

/// Body of the demux actor: services seeks and keeps the packet queues fed
/// until the source ends and everything queued has been consumed.
pub fn run(session: Arc<Session>, mut demuxer: Box<dyn Demuxer>, selection: Selection, max_queue_bytes: usize) {
    loop {
        if session.is_finished() {
            break;
        }

        seek::poll(&session, demuxer.as_mut(), &selection);

        if session.audioq.size() + session.videoq.size() > max_queue_bytes {
            std::thread::sleep(BACKOFF);
            continue;
        }

        match demuxer.read() {
            Ok(ReadResult::Packet { stream, packet }) => {
                session.stats.packets_read.bump();

                match selection.kind_of(stream) {
                    Some(StreamKind::Video) => {
                        session.stats.video_packets.bump();
                        session.videoq.push(Unit::Data(packet));
                    }
                    Some(StreamKind::Audio) => {
                        session.stats.audio_packets.bump();
                        session.audioq.push(Unit::Data(packet));
                    }
                    None => {
                        tracing::trace!(stream, "discarding packet of unselected stream");
                    }
                }
            }
            Ok(ReadResult::Again) => {
                std::thread::sleep(BACKOFF);
            }
            Ok(ReadResult::Eof) => {
                // a unit the decoders already popped still counts until its
                // output is queued
                let drained = session.videoq.is_drained()
                    && session.audioq.is_drained()
                    && session.pictures.is_empty();

                if drained {
                    tracing::info!("end of stream");
                    session.finish();
                    break;
                }

                // keep polling, a seek may still bring us back
                std::thread::sleep(BACKOFF);
            }
            Err(e) => {
                tracing::error!(error = ?e, "read failed, ending session");
                session.finish();
                break;
            }
        }
    }

    tracing::debug!("demux actor exiting");
}
