use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::Deserialize;

use crate::time::TimeSource;

/// Which clock the other streams are corrected toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
pub enum SyncType {
    #[serde(rename = "audio")]
    AudioMaster,
    #[serde(rename = "video")]
    VideoMaster,
    #[serde(rename = "external")]
    ExternalMaster,
}

impl Default for SyncType {
    fn default() -> Self {
        SyncType::AudioMaster
    }
}

#[derive(Debug)]
pub struct UnknownSyncType(pub String);

impl std::fmt::Display for UnknownSyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown sync type {:?}, expected audio, video or external", self.0)
    }
}

impl FromStr for SyncType {
    type Err = UnknownSyncType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(SyncType::AudioMaster),
            "video" => Ok(SyncType::VideoMaster),
            "external" => Ok(SyncType::ExternalMaster),
            _ => Err(UnknownSyncType(s.to_owned())),
        }
    }
}

impl SyncType {
    fn to_u8(self) -> u8 {
        match self {
            SyncType::AudioMaster => 0,
            SyncType::VideoMaster => 1,
            SyncType::ExternalMaster => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SyncType::AudioMaster,
            1 => SyncType::VideoMaster,
            _ => SyncType::ExternalMaster,
        }
    }
}

/// An f64 that can be shared between actors without a lock. Readers may
/// observe a slightly stale value, which the sync computations tolerate.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// The three session clocks, all in seconds.
///
/// * audio: pts of the end of the last decoded block, less whatever the
///   device has not played yet
/// * video: pts stamped at decode time, extrapolated by wall time since
/// * external: wall time since session start, rebased on seek
pub struct Clocks {
    time: Arc<dyn TimeSource>,
    sync: AtomicU8,

    audio_pts: AtomicF64,
    audio_unplayed: AtomicUsize,
    audio_bytes_per_second: AtomicUsize,

    video_predicted: AtomicF64,
    video_current_pts: AtomicF64,
    video_current_time: AtomicF64,

    external_base: AtomicF64,
    external_time: AtomicF64,
}

impl Clocks {
    pub fn new(sync: SyncType, time: Arc<dyn TimeSource>) -> Self {
        let now = time.now();

        Clocks {
            time,
            sync: AtomicU8::new(sync.to_u8()),
            audio_pts: AtomicF64::new(0.0),
            audio_unplayed: AtomicUsize::new(0),
            audio_bytes_per_second: AtomicUsize::new(0),
            video_predicted: AtomicF64::new(0.0),
            video_current_pts: AtomicF64::new(0.0),
            video_current_time: AtomicF64::new(now),
            external_base: AtomicF64::new(0.0),
            external_time: AtomicF64::new(now),
        }
    }

    pub fn now(&self) -> f64 {
        self.time.now()
    }

    pub fn sync_type(&self) -> SyncType {
        SyncType::from_u8(self.sync.load(Ordering::Acquire))
    }

    pub fn set_sync_type(&self, sync: SyncType) {
        self.sync.store(sync.to_u8(), Ordering::Release);
    }

    pub fn master_clock(&self) -> f64 {
        match self.sync_type() {
            SyncType::AudioMaster => self.audio_clock(),
            SyncType::VideoMaster => self.video_clock(),
            SyncType::ExternalMaster => self.external_clock(),
        }
    }

    /// Audio position actually heard: the decoded position minus the bytes
    /// still sitting in the output buffer.
    pub fn audio_clock(&self) -> f64 {
        let pts = self.audio_pts.load();
        let unplayed = self.audio_unplayed.load(Ordering::Relaxed);

        match self.audio_bytes_per_second.load(Ordering::Relaxed) {
            0 => pts,
            bps => pts - unplayed as f64 / bps as f64,
        }
    }

    pub fn video_clock(&self) -> f64 {
        let delta = self.now() - self.video_current_time.load();
        self.video_current_pts.load() + delta
    }

    pub fn external_clock(&self) -> f64 {
        let delta = self.now() - self.external_time.load();
        self.external_base.load() + delta
    }

    pub fn set_audio_format(&self, bytes_per_second: usize) {
        self.audio_bytes_per_second.store(bytes_per_second, Ordering::Relaxed);
    }

    pub fn set_audio_pts(&self, pts: f64) {
        self.audio_pts.store(pts);
    }

    pub fn audio_pts(&self) -> f64 {
        self.audio_pts.load()
    }

    /// Moves the decoded audio position forward by `bytes` of output.
    pub fn advance_audio(&self, bytes: usize) {
        let bps = self.audio_bytes_per_second.load(Ordering::Relaxed);
        if bps > 0 {
            self.audio_pts.store(self.audio_pts.load() + bytes as f64 / bps as f64);
        }
    }

    pub fn set_audio_unplayed(&self, bytes: usize) {
        self.audio_unplayed.store(bytes, Ordering::Relaxed);
    }

    /// Records that a frame with this pts has just been decoded.
    pub fn stamp_video(&self, pts: f64) {
        self.video_current_pts.store(pts);
        self.video_current_time.store(self.now());
    }

    /// Resolves the pts of a decoded video frame. A frame without a usable
    /// timestamp takes the predicted clock. The prediction then moves on by
    /// `frame_delay`.
    pub fn synchronize_video(&self, pts: Option<f64>, frame_delay: f64) -> f64 {
        let pts = match pts {
            Some(pts) => {
                self.video_predicted.store(pts);
                pts
            }
            None => self.video_predicted.load(),
        };

        self.video_predicted.store(pts + frame_delay);
        pts
    }

    pub fn set_external(&self, position: f64) {
        self.external_base.store(position);
        self.external_time.store(self.now());
    }
}
