use std::sync::Arc;

use crate::codec::{CodecParams, VideoConverter, VideoDecoder, VideoFrame};
use crate::queue::{Pop, Queued, Unit};
use crate::session::Session;
use crate::source::StreamInfo;
use crate::time::TimeBase;
use crate::video::picture::QueuePictureError;

/// Picks the most trustworthy timestamp of a decoded frame.
///
/// Counts how often pts and dts each went backwards and prefers whichever
/// has been reliable so far.
#[derive(Debug, Default)]
pub struct PtsCorrection {
    faulty_pts: u64,
    faulty_dts: u64,
    last_pts: Option<i64>,
    last_dts: Option<i64>,
}

impl PtsCorrection {
    pub fn guess(&mut self, pts: Option<i64>, dts: Option<i64>) -> Option<i64> {
        if let Some(dts) = dts {
            if self.last_dts.is_some_and(|last| dts <= last) {
                self.faulty_dts += 1;
            }
            self.last_dts = Some(dts);
        }

        if let Some(pts) = pts {
            if self.last_pts.is_some_and(|last| pts <= last) {
                self.faulty_pts += 1;
            }
            self.last_pts = Some(pts);
        }

        match (pts, dts) {
            (Some(pts), Some(_)) if self.faulty_pts <= self.faulty_dts => Some(pts),
            (Some(pts), None) => Some(pts),
            (_, dts) => dts,
        }
    }

    pub fn reset(&mut self) {
        *self = PtsCorrection::default();
    }
}

/// The video decode actor: packets from the video queue to pictures in the
/// picture ring.
pub struct VideoDecode {
    decoder: Box<dyn VideoDecoder>,
    converter: Box<dyn VideoConverter>,
    time_base: TimeBase,
    /// Nominal display time of one frame in seconds.
    frame_duration: f64,
    correction: PtsCorrection,
}

impl VideoDecode {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        converter: Box<dyn VideoConverter>,
        stream: &StreamInfo,
    ) -> Self {
        let frame_duration = match stream.codec {
            CodecParams::RawVideo { frame_rate, .. } if frame_rate > 0.0 => 1.0 / frame_rate,
            _ => stream.time_base.as_f64(),
        };

        VideoDecode {
            decoder,
            converter,
            time_base: stream.time_base,
            frame_duration,
            correction: PtsCorrection::default(),
        }
    }

    pub fn run(mut self, session: Arc<Session>) {
        loop {
            let queued = match session.videoq.pop(true) {
                Pop::Unit(queued) => queued,
                Pop::Finished => break,
                Pop::Empty => continue,
            };

            let result = self.handle(&session, queued);

            // pictures from this unit are in the ring by now
            session.videoq.done();

            if let Err(QueuePictureError::Finished) = result {
                break;
            }
        }

        tracing::debug!("video decode actor exiting");
    }

    fn handle(&mut self, session: &Session, queued: Queued) -> Result<(), QueuePictureError> {
        match queued.unit {
            Unit::Flush => {
                tracing::debug!(seq = queued.seq, "flushing video decoder");
                self.decoder.flush();
                self.correction.reset();
                session.stats.flushes.bump();
            }
            Unit::Data(packet) => {
                let frames = match self.decoder.decode(&packet) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(seq = queued.seq, error = ?e, "dropping undecodable video packet");
                        session.stats.decode_errors.bump();
                        return Ok(());
                    }
                };

                for frame in frames {
                    self.output(session, frame)?;
                }
            }
        }

        Ok(())
    }

    fn output(&mut self, session: &Session, frame: VideoFrame) -> Result<(), QueuePictureError> {
        session.stats.frames_decoded.bump();

        let pts = self.correction
            .guess(frame.pts, frame.dts)
            .map(|ts| self.time_base.to_seconds(ts));

        // repeated fields extend display by half a frame each
        let base = self.frame_duration;
        let frame_delay = base + f64::from(frame.repeat) * base * 0.5;

        let pts = session.clocks.synchronize_video(pts, frame_delay);
        session.clocks.stamp_video(pts);

        match session.pictures.queue_picture(&frame, pts, self.converter.as_mut()) {
            Err(QueuePictureError::Convert(e)) => {
                tracing::warn!(pts, error = ?e, "dropping unconvertible picture");
                session.stats.decode_errors.bump();
                Ok(())
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_pts_is_preferred() {
        let mut correction = PtsCorrection::default();
        assert_eq!(correction.guess(Some(0), Some(0)), Some(0));
        assert_eq!(correction.guess(Some(3), Some(1)), Some(3));
        assert_eq!(correction.guess(Some(2), Some(2)), Some(2));
    }

    #[test]
    fn unreliable_pts_falls_back_to_dts() {
        let mut correction = PtsCorrection::default();
        correction.guess(Some(10), Some(0));
        // pts goes backwards twice, dts stays monotonic
        correction.guess(Some(5), Some(1));
        assert_eq!(correction.guess(Some(4), Some(2)), Some(2));
    }

    #[test]
    fn missing_timestamps() {
        let mut correction = PtsCorrection::default();
        assert_eq!(correction.guess(None, Some(7)), Some(7));
        assert_eq!(correction.guess(Some(9), None), Some(9));
        assert_eq!(correction.guess(None, None), None);
    }

    #[test]
    fn reset_forgets_history() {
        let mut correction = PtsCorrection::default();
        correction.guess(Some(10), Some(0));
        correction.guess(Some(5), Some(1));
        correction.guess(Some(4), Some(2));
        correction.reset();
        assert_eq!(correction.guess(Some(4), Some(2)), Some(4));
    }
}
