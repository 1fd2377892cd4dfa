//! Audio/video synchronisation engine.
//!
//! A [`session::Player`] runs one playback session as a set of actors: a
//! demuxer feeding two packet queues, a video decoder filling the picture
//! ring, a refresh scheduler presenting pictures, and the audio device
//! pulling from the audio pipeline. Everything is timed against the master
//! clock chosen by [`clock::SyncType`].

pub mod audio;
pub mod buffer;
pub mod clock;
pub mod codec;
pub mod config;
pub mod control;
pub mod queue;
pub mod seek;
pub mod session;
pub mod source;
pub mod stats;
pub mod thread;
pub mod time;
pub mod video;

use tracing_subscriber::EnvFilter;

/// Installs the global log subscriber. `RUST_LOG` overrides the default of
/// info level for this crate.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("avsync=info"));

    // a subscriber may already be installed, eg. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
