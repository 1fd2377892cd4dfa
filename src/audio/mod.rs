pub mod output;
pub mod sync;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{AudioBuffer, AudioSpec};
use crate::clock::SyncType;
use crate::codec::{AudioConverter, AudioDecoder, AudioFrame};
use crate::queue::{Pop, Unit};
use crate::session::Session;
use crate::time::TimeBase;
use crate::audio::sync::AudioSync;

/// Bytes of silence emitted when no decoded audio is available.
pub const SILENCE_BLOCK: usize = 1024;

/// Everything between the audio packet queue and the device buffer. Runs
/// entirely on the device's pull callback and never blocks.
pub struct AudioPipeline {
    session: Arc<Session>,
    decoder: Box<dyn AudioDecoder>,
    converter: Box<dyn AudioConverter>,
    time_base: TimeBase,
    sync: AudioSync,
    pending: VecDeque<AudioFrame>,
    block: AudioBuffer,
    index: usize,
}

impl AudioPipeline {
    pub fn new(
        session: Arc<Session>,
        decoder: Box<dyn AudioDecoder>,
        converter: Box<dyn AudioConverter>,
        time_base: TimeBase,
        spec: AudioSpec,
        callback_samples: usize,
    ) -> Self {
        session.clocks.set_audio_format(spec.bytes_per_second());

        AudioPipeline {
            session,
            decoder,
            converter,
            time_base,
            sync: AudioSync::new(spec, callback_samples),
            pending: VecDeque::new(),
            block: AudioBuffer::new(spec),
            index: 0,
        }
    }

    pub fn spec(&self) -> AudioSpec {
        self.block.spec()
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Fills `out` completely with interleaved native endian S16 samples.
    pub fn fill(&mut self, mut out: &mut [u8]) {
        while !out.is_empty() {
            if self.session.is_finished() {
                out.fill(0);
                break;
            }

            if self.index >= self.block.len() {
                self.refill();
            }

            let available = &self.block.bytes()[self.index..];
            let len = available.len().min(out.len());

            let (head, rest) = std::mem::take(&mut out).split_at_mut(len);
            head.copy_from_slice(&available[..len]);
            out = rest;
            self.index += len;
        }

        self.session.clocks.set_audio_unplayed(self.block.len() - self.index);
    }

    /// Replaces the exhausted block with the next decoded one, or with
    /// silence if nothing is ready.
    fn refill(&mut self) {
        self.index = 0;

        if self.decode_block() {
            let clocks = &self.session.clocks;
            let drift = match clocks.sync_type() {
                SyncType::AudioMaster => None,
                _ => Some(clocks.audio_clock() - clocks.master_clock()),
            };

            let decoded = self.block.len();
            let corrected = self.sync.correct(&mut self.block, drift);

            let stats = &self.session.stats;
            stats.audio_blocks.bump();
            if corrected > decoded {
                stats.audio_bytes_added.add((corrected - decoded) as u64);
            } else {
                stats.audio_bytes_dropped.add((decoded - corrected) as u64);
            }
        } else {
            let silence = self.block.bytes_mut();
            silence.clear();
            silence.resize(SILENCE_BLOCK, 0);
            self.session.stats.audio_underruns.bump();
            tracing::debug!("audio underrun, playing silence");
        }
    }

    /// Decodes into `self.block`, advancing the audio clock past it. Returns
    /// false when the packet queue has nothing to offer right now.
    fn decode_block(&mut self) -> bool {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                if let Err(e) = self.converter.convert(&frame, &mut self.block) {
                    tracing::warn!(error = ?e, "dropping unconvertible audio frame");
                    self.session.stats.decode_errors.bump();
                    continue;
                }

                if self.block.is_empty() {
                    continue;
                }

                self.session.clocks.advance_audio(self.block.len());
                return true;
            }

            let queued = match self.session.audioq.pop(false) {
                Pop::Unit(queued) => queued,
                Pop::Empty | Pop::Finished => return false,
            };

            match queued.unit {
                Unit::Flush => {
                    tracing::debug!(seq = queued.seq, "flushing audio decoder");
                    self.decoder.flush();
                    self.pending.clear();
                    self.sync.reset();
                    self.session.stats.flushes.bump();
                }
                Unit::Data(packet) => {
                    if let Some(pts) = packet.pts {
                        self.session.clocks.set_audio_pts(self.time_base.to_seconds(pts));
                    }

                    match self.decoder.decode(&packet) {
                        Ok(frames) => self.pending.extend(frames),
                        Err(e) => {
                            tracing::warn!(seq = queued.seq, error = ?e, "dropping undecodable audio packet");
                            self.session.stats.decode_errors.bump();
                        }
                    }
                }
            }

            self.session.audioq.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PcmDecoder, S16Converter};
    use crate::queue::{Packet, StreamKind};
    use crate::time::ManualTime;

    const SPEC: AudioSpec = AudioSpec { sample_rate: 48_000, channels: 2 };

    fn pipeline(sync: SyncType) -> (Arc<Session>, AudioPipeline) {
        let session = Session::new(sync, 1, Arc::new(ManualTime::new(0.0)));
        let pipeline = AudioPipeline::new(
            session.clone(),
            Box::new(PcmDecoder::new(SPEC)),
            Box::new(S16Converter::new(SPEC)),
            TimeBase::new(1, 48_000),
            SPEC,
            1024,
        );
        (session, pipeline)
    }

    fn packet(pts: i64, frames: usize, value: i16) -> Unit {
        let data = std::iter::repeat(value.to_le_bytes())
            .take(frames * 2)
            .flatten()
            .collect();
        Unit::Data(Packet::new(StreamKind::Audio, data).with_pts(pts))
    }

    #[test]
    fn empty_queue_plays_silence() {
        let (session, mut pipeline) = pipeline(SyncType::AudioMaster);
        let mut out = vec![0xffu8; 4096];
        pipeline.fill(&mut out);

        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(session.stats.snapshot().audio_underruns, 4);
    }

    #[test]
    fn audio_clock_tracks_device_position() {
        let (session, mut pipeline) = pipeline(SyncType::AudioMaster);
        session.audioq.push(packet(48_000, 1024, 1));

        // one block is 4096 bytes, device took half of it
        let mut out = vec![0u8; 2048];
        pipeline.fill(&mut out);

        let expected = 1.0 + 512.0 / 48_000.0;
        assert!((session.clocks.audio_clock() - expected).abs() < 1e-9);
    }

    #[test]
    fn flush_resets_decoder_without_gap() {
        let (session, mut pipeline) = pipeline(SyncType::AudioMaster);
        session.audioq.push(packet(0, 256, 1));
        session.audioq.push(Unit::Flush);
        session.audioq.push(packet(480_000, 256, 2));

        let mut out = vec![0u8; 2048];
        pipeline.fill(&mut out);

        let samples: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(&out);
        assert!(samples[..512].iter().all(|&s| s == 1));
        assert!(samples[512..].iter().all(|&s| s == 2));

        let stats = session.stats.snapshot();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.audio_underruns, 0);
        assert!((session.clocks.audio_pts() - (10.0 + 256.0 / 48_000.0)).abs() < 1e-9);
    }

    #[test]
    fn undecodable_packet_is_skipped() {
        let (session, mut pipeline) = pipeline(SyncType::AudioMaster);
        session.audioq.push(Unit::Data(Packet::new(StreamKind::Audio, vec![0; 3])));
        session.audioq.push(packet(0, 256, 7));

        let mut out = vec![0u8; 1024];
        pipeline.fill(&mut out);

        let samples: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(&out);
        assert!(samples.iter().all(|&s| s == 7));
        assert_eq!(session.stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn finished_session_outputs_silence() {
        let (session, mut pipeline) = pipeline(SyncType::AudioMaster);
        session.audioq.push(packet(0, 256, 7));
        session.finish();

        let mut out = vec![0xffu8; 512];
        pipeline.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn slave_audio_is_stretched_toward_master() {
        let (session, mut pipeline) = pipeline(SyncType::ExternalMaster);

        // audio starts a quarter second ahead of the external clock
        for n in 0..40 {
            session.audioq.push(packet(12_000 + n * 1024, 1024, 1));
        }

        let mut out = vec![0u8; 4096];
        for _ in 0..30 {
            pipeline.fill(&mut out);
        }

        assert!(session.stats.snapshot().audio_bytes_added > 0);
    }
}
