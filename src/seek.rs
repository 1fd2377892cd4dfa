use std::sync::Mutex;

use bitflags::bitflags;

use crate::queue::Unit;
use crate::session::Session;
use crate::source::{DemuxError, Demuxer, Selection};
use crate::time::TimeBase;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SeekFlags: u32 {
        /// Land on the nearest seekable unit at or before the target.
        const BACKWARD = 0b0000_0001;
    }
}

/// A pending seek, target in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target: i64,
    pub flags: SeekFlags,
}

impl SeekRequest {
    /// Seeking backwards lands at or before the target so nothing at the
    /// requested position is skipped.
    pub fn new(position: f64, increment: f64) -> Self {
        let target = TimeBase::MICROS.from_seconds(position);

        let flags = if increment < 0.0 {
            SeekFlags::BACKWARD
        } else {
            SeekFlags::empty()
        };

        SeekRequest { target, flags }
    }

    pub fn position(&self) -> f64 {
        TimeBase::MICROS.to_seconds(self.target)
    }
}

/// Single pending seek request. A newer request replaces one that has not
/// been picked up yet.
#[derive(Debug, Default)]
pub struct SeekSlot {
    pending: Mutex<Option<SeekRequest>>,
}

impl SeekSlot {
    pub fn new() -> Self {
        SeekSlot::default()
    }

    pub fn request(&self, request: SeekRequest) {
        *self.pending.lock().unwrap() = Some(request);
    }

    pub fn take(&self) -> Option<SeekRequest> {
        self.pending.lock().unwrap().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }
}

/// Takes the pending seek, if any, and performs it. Must be called from the
/// demux actor, which owns the demuxer.
///
/// The request is consumed whether or not the seek succeeds.
pub fn poll(
    session: &Session,
    demuxer: &mut dyn Demuxer,
    selection: &Selection,
) -> Option<Result<(), DemuxError>> {
    let request = session.seek.take()?;
    let result = execute(session, demuxer, selection, request);

    match &result {
        Ok(()) => {
            tracing::info!(position = request.position(), "seeked");
            session.stats.seeks.bump();
        }
        Err(e) => {
            tracing::warn!(position = request.position(), error = ?e, "seek failed");
            session.stats.seek_failures.bump();
        }
    }

    Some(result)
}

fn execute(
    session: &Session,
    demuxer: &mut dyn Demuxer,
    selection: &Selection,
    request: SeekRequest,
) -> Result<(), DemuxError> {
    let video_target = TimeBase::MICROS.rescale(request.target, selection.video.time_base);
    demuxer.seek(selection.video.index, video_target, request.flags)?;

    if let Some(audio) = &selection.audio {
        let audio_target = TimeBase::MICROS.rescale(request.target, audio.time_base);
        demuxer.seek(audio.index, audio_target, request.flags)?;
    }

    // only a successful seek invalidates what is already queued
    session.videoq.clear();
    session.videoq.push(Unit::Flush);

    if selection.audio.is_some() {
        session.audioq.clear();
        session.audioq.push(Unit::Flush);
    }

    session.clocks.set_external(request.position());

    Ok(())
}
