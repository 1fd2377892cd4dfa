use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clocks, SyncType};
use crate::session::Session;
use crate::time::seconds_to_duration;
use crate::video::picture::PictureRing;
use crate::video::present::{self, Presenter};

// below this, a frame is considered on time
const SYNC_THRESHOLD: f64 = 0.01;
// beyond this, the clocks are too far apart to correct against
const NOSYNC_THRESHOLD: f64 = 1.0;

/// Delay assumed between frames until two timestamps have been seen.
const INITIAL_FRAME_DELAY: f64 = 0.04;

/// Shortest wait between two refreshes.
const MIN_REFRESH_DELAY: f64 = 0.01;

/// Poll interval while no picture is ready.
pub const IDLE_DELAY: Duration = Duration::from_millis(1);

/// Wait before the first refresh, lets the pipeline fill up.
pub const INITIAL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Nothing to show, check again after [`IDLE_DELAY`].
    Idle,
    Presented { pts: f64, next: Duration },
}

impl Tick {
    pub fn next_delay(&self) -> Duration {
        match self {
            Tick::Idle => IDLE_DELAY,
            Tick::Presented { next, .. } => *next,
        }
    }
}

/// Decides when each picture is shown.
///
/// The frame timer accumulates the nominal delay of every shown frame so
/// presentation does not drift with scheduling jitter.
pub struct Refresh {
    frame_timer: f64,
    last_pts: f64,
    last_delay: f64,
}

impl Refresh {
    pub fn new(now: f64) -> Self {
        Refresh {
            frame_timer: now,
            last_pts: 0.0,
            last_delay: INITIAL_FRAME_DELAY,
        }
    }

    /// Nominal delay before the picture at `pts`, corrected toward the
    /// master clock unless video is the master.
    fn target_delay(&mut self, pts: f64, clocks: &Clocks) -> f64 {
        let mut delay = pts - self.last_pts;
        if delay <= 0.0 || delay > NOSYNC_THRESHOLD {
            // timestamps jumped, keep the previous cadence
            delay = self.last_delay;
        }

        self.last_delay = delay;
        self.last_pts = pts;

        if clocks.sync_type() == SyncType::VideoMaster {
            return delay;
        }

        let diff = pts - clocks.master_clock();
        let threshold = delay.max(SYNC_THRESHOLD);

        if diff.abs() < NOSYNC_THRESHOLD {
            if diff <= -threshold {
                // late, show it right away
                delay = 0.0;
            } else if diff >= threshold {
                // early, hold the previous picture longer
                delay *= 2.0;
            }
        }

        delay
    }

    /// Presents the picture at the read index, if any, and returns when the
    /// next refresh should run.
    pub fn tick(&mut self, pictures: &PictureRing, clocks: &Clocks, presenter: &mut dyn Presenter) -> Tick {
        let Some(pts) = pictures.peek_pts() else {
            return Tick::Idle;
        };

        let delay = self.target_delay(pts, clocks);
        self.frame_timer += delay;

        let real_delay = (self.frame_timer - clocks.now()).max(MIN_REFRESH_DELAY);

        pictures.with_front(|picture| {
            let rect = present::rect_for(presenter, picture);
            presenter.present(picture, rect);
        });
        pictures.advance_read();

        Tick::Presented { pts, next: seconds_to_duration(real_delay) }
    }
}

/// Body of the refresh actor.
pub fn run(session: Arc<Session>, mut presenter: Box<dyn Presenter>) {
    let mut refresh = Refresh::new(session.clocks.now());
    let mut delay = INITIAL_DELAY;

    loop {
        std::thread::sleep(delay);

        if session.is_finished() {
            break;
        }

        let tick = refresh.tick(&session.pictures, &session.clocks, presenter.as_mut());

        if let Tick::Presented { pts, next } = tick {
            session.stats.pictures_presented.bump();
            tracing::trace!(pts, next_ms = next.as_secs_f64() * 1000.0, "refreshed");
        }

        delay = tick.next_delay();
    }

    tracing::debug!("refresh actor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PixelFormat, VideoFrame, Yuv420Converter};
    use crate::session::Finished;
    use crate::time::ManualTime;
    use crate::video::picture::Picture;
    use crate::video::present::{NullPresenter, Rect};

    fn ring_with(pts: f64) -> PictureRing {
        let ring = PictureRing::new(1, Finished::new());
        push(&ring, pts);
        ring
    }

    fn push(ring: &PictureRing, pts: f64) {
        let frame = VideoFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Gray8,
            data: vec![0; 4],
            pts: None,
            dts: None,
            repeat: 0,
        };
        ring.queue_picture(&frame, pts, &mut Yuv420Converter).unwrap();
    }

    fn clocks(sync: SyncType) -> (Arc<ManualTime>, Clocks) {
        let time = Arc::new(ManualTime::new(0.0));
        (time.clone(), Clocks::new(sync, time))
    }

    #[test]
    fn empty_ring_polls_again_in_a_millisecond() {
        let (_, clocks) = clocks(SyncType::VideoMaster);
        let ring = PictureRing::new(1, Finished::new());
        let mut refresh = Refresh::new(0.0);

        let tick = refresh.tick(&ring, &clocks, &mut NullPresenter);
        assert_eq!(tick, Tick::Idle);
        assert_eq!(tick.next_delay(), Duration::from_millis(1));
    }

    #[test]
    fn first_frame_uses_initial_delay() {
        let (_, clocks) = clocks(SyncType::VideoMaster);
        let ring = ring_with(0.0);
        let mut refresh = Refresh::new(0.0);

        let tick = refresh.tick(&ring, &clocks, &mut NullPresenter);
        assert_eq!(tick, Tick::Presented { pts: 0.0, next: seconds_to_duration(0.04) });
        assert!(ring.is_empty());
    }

    #[test]
    fn late_frame_is_shown_immediately() {
        let (_, clocks) = clocks(SyncType::ExternalMaster);
        let mut refresh = Refresh::new(0.0);
        refresh.last_pts = 0.96;

        // master at 1.5, frame at 1.0 is 0.5s late
        clocks.set_external(1.5);
        assert_eq!(refresh.target_delay(1.0, &clocks), 0.0);
    }

    #[test]
    fn early_frame_doubles_delay() {
        let (_, clocks) = clocks(SyncType::ExternalMaster);
        let mut refresh = Refresh::new(0.0);
        refresh.last_pts = 0.96;

        clocks.set_external(0.5);
        let delay = refresh.target_delay(1.0, &clocks);
        assert!((delay - 0.08).abs() < 1e-9);
    }

    #[test]
    fn small_drift_keeps_nominal_delay() {
        let (_, clocks) = clocks(SyncType::ExternalMaster);
        let mut refresh = Refresh::new(0.0);
        refresh.last_pts = 0.96;

        clocks.set_external(0.995);
        let delay = refresh.target_delay(1.0, &clocks);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn far_drift_is_not_corrected() {
        let (_, clocks) = clocks(SyncType::ExternalMaster);
        let mut refresh = Refresh::new(0.0);
        refresh.last_pts = 0.96;

        clocks.set_external(30.0);
        let delay = refresh.target_delay(1.0, &clocks);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn timestamp_jump_reuses_last_delay() {
        let (_, clocks) = clocks(SyncType::VideoMaster);
        let mut refresh = Refresh::new(0.0);
        refresh.last_pts = 1.0;
        refresh.last_delay = 0.033;

        assert!((refresh.target_delay(0.5, &clocks) - 0.033).abs() < 1e-9);
        assert!((refresh.target_delay(9.0, &clocks) - 0.033).abs() < 1e-9);
    }

    #[test]
    fn refresh_delay_has_a_floor() {
        let (time, clocks) = clocks(SyncType::VideoMaster);
        let ring = ring_with(0.0);
        let mut refresh = Refresh::new(0.0);

        // the scheduler woke up far too late
        time.set(5.0);
        let tick = refresh.tick(&ring, &clocks, &mut NullPresenter);
        assert_eq!(tick.next_delay(), Duration::from_millis(10));
    }

    struct Recording(Vec<(f64, Rect)>);

    impl Presenter for Recording {
        fn surface(&self) -> Option<(u32, u32)> {
            Some((8, 4))
        }

        fn present(&mut self, picture: &Picture, rect: Rect) {
            self.0.push((picture.pts, rect));
        }
    }

    #[test]
    fn presenter_receives_fitted_picture() {
        let (_, clocks) = clocks(SyncType::VideoMaster);
        let ring = ring_with(0.25);
        let mut presenter = Recording(Vec::new());

        Refresh::new(0.0).tick(&ring, &clocks, &mut presenter);
        assert_eq!(presenter.0, vec![(0.25, Rect { x: 2, y: 0, width: 4, height: 4 })]);

        push(&ring, 0.5);
        assert_eq!(ring.len(), 1);
    }
}
