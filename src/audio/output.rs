use std::str::FromStr;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{OutputCallbackInfo, SampleFormat, SampleRate, Stream, StreamConfig, StreamError};
use derive_more::From;

use crate::audio::AudioPipeline;
use crate::buffer::AudioSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A real device through cpal.
    Cpal,
    /// Consumes audio in real time without playing it.
    Null,
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpal" => Ok(OutputKind::Cpal),
            "null" => Ok(OutputKind::Null),
            _ => Err(format!("unknown output {s:?}, expected cpal or null")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub kind: OutputKind,
    pub device: Option<String>,
    pub spec: AudioSpec,
    /// Device callback period in sample frames.
    pub callback_samples: usize,
}

#[derive(Debug, From)]
pub enum OutputError {
    #[from(ignore)]
    NoDeviceAvailable,
    #[from(ignore)]
    DeviceNotFound(String),
    Devices(cpal::DevicesError),
    StreamConfigs(cpal::SupportedStreamConfigsError),
    #[from(ignore)]
    NoSupportedStreamConfig(AudioSpec),
    BuildStream(cpal::BuildStreamError),
    PlayStream(cpal::PlayStreamError),
    Spawn(std::io::Error),
}

/// A running audio sink pulling from an [`AudioPipeline`].
pub enum Output {
    Cpal(Stream),
    Null(JoinHandle<()>),
}

impl Output {
    pub fn open(config: &OutputConfig, pipeline: AudioPipeline) -> Result<Output, OutputError> {
        match config.kind {
            OutputKind::Cpal => open_cpal(config, pipeline).map(Output::Cpal),
            OutputKind::Null => open_null(config, pipeline).map(Output::Null),
        }
    }

    pub fn stop(self) {
        match self {
            Output::Cpal(stream) => {
                let _ = stream.pause();
            }
            Output::Null(thread) => {
                let _ = thread.join();
            }
        }
    }
}

fn find_device(name: Option<&str>) -> Result<cpal::Device, OutputError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host.default_output_device().ok_or(OutputError::NoDeviceAvailable);
    };

    for device in host.output_devices()? {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(OutputError::DeviceNotFound(name.to_owned()))
}

/// Picks a stream config matching `spec`, preferring i16 samples.
fn config_for_device(device: &cpal::Device, spec: AudioSpec) -> Result<(StreamConfig, SampleFormat), OutputError> {
    let rate = SampleRate(spec.sample_rate);

    let mut candidates = device.supported_output_configs()?
        .filter(|config| config.channels() == spec.channels)
        .filter(|config| config.min_sample_rate() <= rate && rate <= config.max_sample_rate())
        .filter(|config| matches!(config.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .collect::<Vec<_>>();

    candidates.sort_by_key(|config| config.sample_format() != SampleFormat::I16);

    let config = candidates.into_iter().next()
        .ok_or(OutputError::NoSupportedStreamConfig(spec))?
        .with_sample_rate(rate);

    Ok((config.config(), config.sample_format()))
}

fn open_cpal(config: &OutputConfig, mut pipeline: AudioPipeline) -> Result<Stream, OutputError> {
    let device = find_device(config.device.as_deref())?;
    let (stream_config, format) = config_for_device(&device, config.spec)?;

    tracing::info!(
        device = device.name().ok(),
        rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        ?format,
        "opening audio output",
    );

    let on_error = |err: StreamError| {
        tracing::error!(error = ?err, "audio stream error");
    };

    let stream = match format {
        SampleFormat::I16 => {
            let mut initialized_thread = false;
            device.build_output_stream(&stream_config,
                move |output: &mut [i16], _: &OutputCallbackInfo| {
                    if !initialized_thread {
                        init_audio_thread();
                        initialized_thread = true;
                    }

                    pipeline.fill(bytemuck::cast_slice_mut(output));
                },
                on_error,
                None,
            )?
        }
        _ => {
            let mut initialized_thread = false;
            let mut scratch = Vec::<i16>::new();
            device.build_output_stream(&stream_config,
                move |output: &mut [f32], _: &OutputCallbackInfo| {
                    if !initialized_thread {
                        init_audio_thread();
                        initialized_thread = true;
                    }

                    scratch.resize(output.len(), 0);
                    pipeline.fill(bytemuck::cast_slice_mut(&mut scratch));

                    for (out, sample) in output.iter_mut().zip(&scratch) {
                        *out = f32::from(*sample) / 32768.0;
                    }
                },
                on_error,
                None,
            )?
        }
    };

    stream.play()?;
    Ok(stream)
}

fn init_audio_thread() {
    crate::thread::set_name("avsync/audio");
    crate::thread::set_realtime_priority();
}

fn open_null(config: &OutputConfig, mut pipeline: AudioPipeline) -> Result<JoinHandle<()>, OutputError> {
    let spec = config.spec;
    let period = Duration::from_secs_f64(config.callback_samples as f64 / f64::from(spec.sample_rate));
    let mut buffer = vec![0u8; config.callback_samples * spec.frame_size()];

    tracing::info!(period_ms = period.as_secs_f64() * 1000.0, "opening null audio output");

    let thread = crate::thread::spawn("avsync/audio", move || {
        let mut deadline = Instant::now();

        while !pipeline.is_finished() {
            pipeline.fill(&mut buffer);

            deadline += period;
            if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }
    })?;

    Ok(thread)
}
