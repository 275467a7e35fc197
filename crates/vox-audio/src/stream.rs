//! Output audio stream: owns the cpal callback and calls back into the
//! engine's mix function once per hardware buffer.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vox_core::BufferSize;

use crate::{AudioConfig, AudioError, AudioResult};

/// Mixes `frames` stereo-interleaved samples into `out` (length `frames * 2`).
/// This is the Rust shape of the `pumpAndMixVoices` backend callback.
pub type MixCallback = Box<dyn FnMut(&mut [f64]) + Send + 'static>;

struct StreamState {
    callback: Mutex<MixCallback>,
    running: AtomicBool,
}

/// An open output stream. Dropping it tears down the cpal stream.
pub struct AudioStream {
    _output_stream: Stream,
    state: Arc<StreamState>,
    config: AudioConfig,
}

impl AudioStream {
    pub fn new(device: &Device, config: AudioConfig, callback: MixCallback) -> AudioResult<Self> {
        let state = Arc::new(StreamState {
            callback: Mutex::new(callback),
            running: AtomicBool::new(false),
        });

        let output_config = get_output_stream_config(device, &config)?;
        let output_stream =
            build_output_stream(device, &output_config, config.buffer_size, Arc::clone(&state))?;

        Ok(Self {
            _output_stream: output_stream,
            state,
            config,
        })
    }

    pub fn start(&self) -> AudioResult<()> {
        self._output_stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.state.running.store(true, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self) -> AudioResult<()> {
        self._output_stream
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.state.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

fn get_output_stream_config(device: &Device, config: &AudioConfig) -> AudioResult<SupportedStreamConfig> {
    let sample_rate: cpal::SampleRate = config.sample_rate.as_u32();
    let channels = config.output_channels;

    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= channels
            && supported.min_sample_rate() <= sample_rate
            && supported.max_sample_rate() >= sample_rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(sample_rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "No matching output config for {} channels @ {}Hz",
        channels,
        config.sample_rate.as_u32()
    )))
}

fn build_output_stream(
    device: &Device,
    supported_config: &SupportedStreamConfig,
    buffer_size: BufferSize,
    state: Arc<StreamState>,
) -> AudioResult<Stream> {
    let channels = supported_config.channels() as usize;
    let sample_rate = supported_config.sample_rate();

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate,
        buffer_size: CpalBufferSize::Fixed(buffer_size.as_usize() as u32),
    };

    let mut mix_buffer = vec![0.0f64; buffer_size.as_usize() * 2];

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if frames * 2 > mix_buffer.len() {
                    mix_buffer.resize(frames * 2, 0.0);
                }
                mix_buffer[..frames * 2].fill(0.0);

                {
                    let mut callback = state.callback.lock();
                    callback(&mut mix_buffer[..frames * 2]);
                }

                match channels {
                    1 => {
                        for (i, sample) in data.iter_mut().enumerate() {
                            let mono = (mix_buffer[i * 2] + mix_buffer[i * 2 + 1]) * 0.5;
                            *sample = mono as f32;
                        }
                    }
                    2 => {
                        for (i, sample) in data.iter_mut().enumerate() {
                            *sample = mix_buffer[i] as f32;
                        }
                    }
                    _ => {
                        for (i, chunk) in data.chunks_mut(channels).enumerate() {
                            if i * 2 < mix_buffer.len() {
                                chunk[0] = mix_buffer[i * 2] as f32;
                                chunk[1] = mix_buffer[i * 2 + 1] as f32;
                            }
                            for sample in chunk.iter_mut().skip(2) {
                                *sample = 0.0;
                            }
                        }
                    }
                }
            },
            move |err| {
                log::error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
