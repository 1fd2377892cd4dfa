use std::ffi::OsString;
use std::path::{Path, PathBuf};

use derive_more::From;
use serde::Deserialize;

use crate::clock::SyncType;

/// Contents of `avsync.toml`. Every value is optional and only fills in
/// what neither the command line nor the environment set.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    play: Play,
    #[serde(default)]
    synthetic: Synthetic,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Play {
    sync: Option<SyncType>,
    output: Option<String>,
    device: Option<String>,
    picture_queue: Option<usize>,
    callback_samples: Option<usize>,
    max_queue_bytes: Option<usize>,
    stats: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Synthetic {
    duration: Option<f64>,
    fps: Option<f64>,
    width: Option<u16>,
    height: Option<u16>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    audio: Option<bool>,
    stall_probability: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, From)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Xdg(xdg::BaseDirectoriesError),
}

fn set_env_option<T: ToString>(name: &str, value: Option<T>) {
    let Some(value) = value else {
        return;
    };

    // an explicitly set environment variable wins over the file
    if std::env::var_os(name).is_some() {
        return;
    }

    std::env::set_var(name, value.to_string());
}

/// Exports every value of `config` as its `AVSYNC_*` environment variable,
/// where the command line parser picks them up.
pub fn load_into_env(config: &Config) {
    let play = &config.play;
    set_env_option("AVSYNC_SYNC", play.sync.map(sync_name));
    set_env_option("AVSYNC_OUTPUT", play.output.as_ref());
    set_env_option("AVSYNC_DEVICE", play.device.as_ref());
    set_env_option("AVSYNC_PICTURE_QUEUE", play.picture_queue);
    set_env_option("AVSYNC_CALLBACK_SAMPLES", play.callback_samples);
    set_env_option("AVSYNC_MAX_QUEUE_BYTES", play.max_queue_bytes);
    set_env_option("AVSYNC_STATS", play.stats.as_ref());

    let synthetic = &config.synthetic;
    set_env_option("AVSYNC_DURATION", synthetic.duration);
    set_env_option("AVSYNC_FPS", synthetic.fps);
    set_env_option("AVSYNC_WIDTH", synthetic.width);
    set_env_option("AVSYNC_HEIGHT", synthetic.height);
    set_env_option("AVSYNC_SAMPLE_RATE", synthetic.sample_rate);
    set_env_option("AVSYNC_CHANNELS", synthetic.channels);
    set_env_option("AVSYNC_AUDIO", synthetic.audio);
    set_env_option("AVSYNC_STALL_PROBABILITY", synthetic.stall_probability);
    set_env_option("AVSYNC_SEED", synthetic.seed);
}

fn sync_name(sync: SyncType) -> &'static str {
    match sync {
        SyncType::AudioMaster => "audio",
        SyncType::VideoMaster => "video",
        SyncType::ExternalMaster => "external",
    }
}

pub fn parse(text: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(text)?)
}

pub fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// Finds `--config <path>` or `--config=<path>` in raw arguments. The file
/// has to be read before the command line parser runs.
pub fn path_from_args<I: IntoIterator<Item = OsString>>(args: I) -> Option<PathBuf> {
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }

        if let Some(path) = arg.to_str().and_then(|arg| arg.strip_prefix("--config=")) {
            return Some(PathBuf::from(path));
        }
    }

    None
}

/// `explicit` if given, then `$AVSYNC_CONFIG`, otherwise `avsync.toml` in
/// the XDG config directories if one exists.
pub fn path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>, ConfigError> {
    if explicit.is_some() {
        return Ok(explicit);
    }

    if let Some(path) = std::env::var_os("AVSYNC_CONFIG") {
        return Ok(Some(PathBuf::from(path)));
    }

    let dirs = xdg::BaseDirectories::with_prefix("avsync")?;
    Ok(dirs.find_config_file("avsync.toml"))
}

/// Finds, reads and exports the config file. A missing file is not an error.
pub fn load(explicit: Option<PathBuf>) -> Result<Option<PathBuf>, ConfigError> {
    let Some(path) = path(explicit)? else {
        return Ok(None);
    };

    let config = read_file(&path)?;
    load_into_env(&config);
    Ok(Some(path))
}
