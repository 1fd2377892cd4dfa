use std::path::PathBuf;
use std::process::ExitCode;

use derive_more::From;
use structopt::StructOpt;
use termcolor::{ColorChoice, StandardStream};

use avsync::audio::output::OutputKind;
use avsync::clock::SyncType;
use avsync::config::{self, ConfigError};
use avsync::control;
use avsync::session::{Player, PlayerConfig, StartError};
use avsync::source::{self, DemuxError, SyntheticOpt};
use avsync::stats::StatsFormat;
use avsync::video::present::{PresenterKind, Surface};

#[derive(StructOpt)]
#[structopt(name = "avsync", about = "Plays audio and video in sync")]
enum Opt {
    /// Plays a source
    Play(PlayOpt),
    /// Prints the streams of a source as JSON
    Probe(ProbeOpt),
}

#[derive(StructOpt)]
struct PlayOpt {
    #[structopt(default_value = "synthetic")]
    uri: String,

    /// Master clock: audio, video or external
    #[structopt(long, env = "AVSYNC_SYNC", default_value = "audio")]
    sync: SyncType,

    /// Audio output: cpal or null
    #[structopt(long, env = "AVSYNC_OUTPUT", default_value = "cpal")]
    output: OutputKind,

    #[structopt(long, env = "AVSYNC_DEVICE")]
    device: Option<String>,

    /// Video presenter: null or log
    #[structopt(long, env = "AVSYNC_PRESENTER", default_value = "log")]
    presenter: PresenterKind,

    /// Presentation surface as WIDTHxHEIGHT, pictures are fitted into it
    #[structopt(long, env = "AVSYNC_SURFACE")]
    surface: Option<Surface>,

    #[structopt(long, env = "AVSYNC_PICTURE_QUEUE", default_value = "1")]
    picture_queue: usize,

    /// Audio device callback period in sample frames
    #[structopt(long, env = "AVSYNC_CALLBACK_SAMPLES", default_value = "1024")]
    callback_samples: usize,

    #[structopt(long, env = "AVSYNC_MAX_QUEUE_BYTES", default_value = "15728640")]
    max_queue_bytes: usize,

    /// Session statistics printed on exit: none, table or json
    #[structopt(long, env = "AVSYNC_STATS", default_value = "table")]
    stats: StatsFormat,

    /// Do not read seek and quit commands from stdin
    #[structopt(long)]
    no_control: bool,

    /// Config file, read before any other option
    #[structopt(long, env = "AVSYNC_CONFIG", parse(from_os_str))]
    config: Option<PathBuf>,

    #[structopt(flatten)]
    source: SyntheticOpt,
}

#[derive(StructOpt)]
struct ProbeOpt {
    #[structopt(default_value = "synthetic")]
    uri: String,

    #[structopt(flatten)]
    source: SyntheticOpt,
}

#[derive(Debug, From)]
enum RunError {
    Config(ConfigError),
    Open(DemuxError),
    Start(StartError),
    Io(std::io::Error),
    Json(serde_json::Error),
}

fn main() -> ExitCode {
    avsync::init_logging();

    match config::load(config::path_from_args(std::env::args_os())) {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded config"),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = ?RunError::Config(e), "could not load config");
            return ExitCode::FAILURE;
        }
    }

    let result = match Opt::from_args() {
        Opt::Play(opt) => play(opt),
        Opt::Probe(opt) => probe(opt),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "exiting with error");
            ExitCode::FAILURE
        }
    }
}

fn play(opt: PlayOpt) -> Result<(), RunError> {
    tracing::debug!(uri = %opt.uri, config = ?opt.config, "starting playback");

    let demuxer = source::open(&opt.uri, &opt.source)?;

    let config = PlayerConfig {
        sync: opt.sync,
        picture_capacity: opt.picture_queue,
        callback_samples: opt.callback_samples,
        max_queue_bytes: opt.max_queue_bytes,
        output: opt.output,
        device: opt.device.clone(),
    };

    let player = Player::start(&config, demuxer, opt.presenter.open(opt.surface))?;

    if !opt.no_control {
        control::spawn(player.session().clone())?;
    }

    let stats = player.wait();

    let mut out = StandardStream::stderr(ColorChoice::Auto);
    stats.write(opt.stats, &mut out)?;

    Ok(())
}

fn probe(opt: ProbeOpt) -> Result<(), RunError> {
    let demuxer = source::open(&opt.uri, &opt.source)?;
    println!("{}", serde_json::to_string_pretty(demuxer.streams())?);
    Ok(())
}
