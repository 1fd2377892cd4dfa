use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use derive_more::From;

use crate::audio::AudioPipeline;
use crate::audio::output::{Output, OutputConfig, OutputError, OutputKind};
use crate::clock::{Clocks, SyncType};
use crate::codec::{self, DecodeError, S16Converter, Yuv420Converter};
use crate::queue::PacketQueue;
use crate::seek::{SeekRequest, SeekSlot};
use crate::source::{self, Demuxer, Selection};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::time::{SystemTime, TimeSource};
use crate::video::decode::VideoDecode;
use crate::video::picture::PictureRing;
use crate::video::present::Presenter;
use crate::video::refresh;

/// Process wide "stop now" flag. Blocking operations observe it and return
/// a sentinel instead of data once it is set.
#[derive(Debug, Clone, Default)]
pub struct Finished(Arc<AtomicBool>);

impl Finished {
    pub fn new() -> Self {
        Finished::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared by every actor of one playback session.
pub struct Session {
    finished: Finished,
    pub audioq: PacketQueue,
    pub videoq: PacketQueue,
    pub pictures: PictureRing,
    pub clocks: Clocks,
    pub seek: SeekSlot,
    pub stats: SessionStats,
}

impl Session {
    pub fn new(sync: SyncType, picture_capacity: usize, time: Arc<dyn TimeSource>) -> Arc<Self> {
        let finished = Finished::new();

        Arc::new(Session {
            audioq: PacketQueue::new(finished.clone()),
            videoq: PacketQueue::new(finished.clone()),
            pictures: PictureRing::new(picture_capacity, finished.clone()),
            clocks: Clocks::new(sync, time),
            seek: SeekSlot::new(),
            stats: SessionStats::default(),
            finished,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Sets the finished flag and wakes everything that may be waiting on it.
    pub fn finish(&self) {
        if self.finished.is_set() {
            return;
        }

        tracing::debug!("finishing session");
        self.finished.set();
        self.audioq.wake();
        self.videoq.wake();
        self.pictures.wake();
    }

    /// Asks the demux actor to seek. Overwrites any request not yet taken.
    pub fn request_seek(&self, position: f64, increment: f64) {
        let request = SeekRequest::new(position, increment);
        tracing::debug!(?request, "seek requested");
        self.seek.request(request);
    }

    /// Seeks `increment` seconds away from the master clock.
    pub fn seek_relative(&self, increment: f64) {
        let position = self.clocks.master_clock() + increment;
        self.request_seek(position.max(0.0), increment);
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub sync: SyncType,
    pub picture_capacity: usize,
    pub callback_samples: usize,
    pub max_queue_bytes: usize,
    pub output: OutputKind,
    pub device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            sync: SyncType::AudioMaster,
            picture_capacity: crate::video::picture::DEFAULT_CAPACITY,
            callback_samples: 1024,
            max_queue_bytes: source::MAX_QUEUE_SIZE,
            output: OutputKind::Cpal,
            device: None,
        }
    }
}

#[derive(Debug, From)]
pub enum StartError {
    #[from(ignore)]
    NoVideoStream,
    Decoder(DecodeError),
    Output(OutputError),
    Spawn(std::io::Error),
}

pub struct Player {
    session: Arc<Session>,
    threads: Vec<JoinHandle<()>>,
    output: Option<Output>,
}

impl Player {
    pub fn start(
        config: &PlayerConfig,
        demuxer: Box<dyn Demuxer>,
        presenter: Box<dyn Presenter>,
    ) -> Result<Player, StartError> {
        Player::start_with_time(config, demuxer, presenter, Arc::new(SystemTime))
    }

    pub fn start_with_time(
        config: &PlayerConfig,
        demuxer: Box<dyn Demuxer>,
        presenter: Box<dyn Presenter>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Player, StartError> {
        let selection = Selection::select(demuxer.streams())
            .ok_or(StartError::NoVideoStream)?;

        let sync = match (&selection.audio, config.sync) {
            (None, SyncType::AudioMaster) => {
                tracing::warn!("no audio stream, falling back to external clock");
                SyncType::ExternalMaster
            }
            (_, sync) => sync,
        };

        let session = Session::new(sync, config.picture_capacity, time);

        let video = VideoDecode::new(
            codec::open_video_decoder(&selection.video.codec)?,
            Box::new(Yuv420Converter),
            &selection.video,
        );

        // every fallible step happens before the first actor is spawned
        let output = match &selection.audio {
            Some(stream) => {
                let output_config = OutputConfig {
                    kind: config.output,
                    device: config.device.clone(),
                    spec: source::output_spec(stream),
                    callback_samples: config.callback_samples,
                };

                let pipeline = AudioPipeline::new(
                    session.clone(),
                    codec::open_audio_decoder(&stream.codec)?,
                    Box::new(S16Converter::new(output_config.spec)),
                    stream.time_base,
                    output_config.spec,
                    config.callback_samples,
                );

                Some(Output::open(&output_config, pipeline)?)
            }
            None => None,
        };

        tracing::info!(
            video = selection.video.index,
            audio = ?selection.audio.as_ref().map(|stream| stream.index),
            ?sync,
            "starting playback",
        );

        let mut player = Player { session: session.clone(), threads: Vec::new(), output };

        let spawned = (|| -> Result<(), std::io::Error> {
            player.threads.push(crate::thread::spawn("avsync/video", {
                let session = session.clone();
                move || video.run(session)
            })?);

            player.threads.push(crate::thread::spawn("avsync/refresh", {
                let session = session.clone();
                move || refresh::run(session, presenter)
            })?);

            player.threads.push(crate::thread::spawn("avsync/demux", {
                let session = session.clone();
                let max_queue_bytes = config.max_queue_bytes;
                move || source::run(session, demuxer, selection, max_queue_bytes)
            })?);

            Ok(())
        })();

        if let Err(e) = spawned {
            player.quit();
            player.shutdown();
            return Err(StartError::Spawn(e));
        }

        Ok(player)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn quit(&self) {
        self.session.finish();
    }

    /// Blocks until the session finishes on its own or through [`Player::quit`].
    pub fn wait(mut self) -> StatsSnapshot {
        self.shutdown();
        self.session.stats.snapshot()
    }

    /// Stops the session and tears everything down.
    pub fn stop(self) -> StatsSnapshot {
        self.quit();
        self.wait()
    }

    fn shutdown(&mut self) {
        // the demux actor is the last one standing at end of stream, wait
        // for it first then make sure everyone else is released
        let mut threads = std::mem::take(&mut self.threads);
        if let Some(demux) = threads.pop() {
            let _ = demux.join();
        }

        self.session.finish();

        for thread in threads {
            let _ = thread.join();
        }

        if let Some(output) = self.output.take() {
            output.stop();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.session.finish();
        self.shutdown();
    }
}
