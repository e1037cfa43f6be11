//! Audio device boundary
//!
//! The pipeline only sees the blocking `InputStream` / `OutputStream`
//! interface. `CpalBackend` adapts cpal's callback streams to it; tests
//! inject scripted backends instead.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::AudioConfig;
use crate::constants::{CHANNELS, FRAME_SIZE, SAMPLE_RATE};
use crate::error::DeviceError;

/// Parameters a device is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per read/write
    pub frame_size: usize,
}

impl StreamSpec {
    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
        }
    }
}

impl From<&AudioConfig> for StreamSpec {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }
}

/// Enumerated device, for display and selection by index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

/// Open capture stream. Closed when dropped.
pub trait InputStream {
    /// Block until `frame` is completely filled
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError>;
}

/// Open playback stream. Closed when dropped.
pub trait OutputStream {
    /// Block until `frame` has been accepted by the device
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError>;
}

/// Source of audio devices.
///
/// Streams are opened on the thread that uses them and are not required
/// to be `Send`.
pub trait AudioBackend: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Open an input device by index, or the default one
    fn open_input(
        &self,
        device: Option<usize>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn InputStream>, DeviceError>;

    /// Open an output device by index, or the default one
    fn open_output(
        &self,
        device: Option<usize>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn OutputStream>, DeviceError>;
}

/// Backend over the platform's default cpal host
pub struct CpalBackend {
    /// Longest a read or write may stall before the device counts as failed
    stall_timeout: Duration,
}

// Chunks buffered between a cpal callback and the blocking side
const CAPTURE_CHUNKS: usize = 64;
const PLAYBACK_FRAMES: usize = 2;

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            stall_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    fn device_at(&self, index: usize) -> Result<cpal::Device, DeviceError> {
        cpal::default_host()
            .devices()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?
            .nth(index)
            .ok_or(DeviceError::NotFound(index))
    }

    fn stream_config(spec: &StreamSpec) -> StreamConfig {
        StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        let Ok(devices) = host.devices() else {
            return Vec::new();
        };

        devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                let max_input_channels = device
                    .supported_input_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);

                DeviceInfo {
                    index,
                    is_default_input: default_input_name.as_ref() == Some(&name),
                    is_default_output: default_output_name.as_ref() == Some(&name),
                    name,
                    max_input_channels,
                    max_output_channels,
                }
            })
            .collect()
    }

    fn open_input(
        &self,
        device: Option<usize>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn InputStream>, DeviceError> {
        let device = match device {
            Some(index) => self.device_at(index)?,
            None => cpal::default_host()
                .default_input_device()
                .ok_or(DeviceError::NoDefault("input"))?,
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let format = device
            .default_input_config()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?
            .sample_format();
        let config = Self::stream_config(spec);

        let input = match format {
            SampleFormat::I16 => CpalInput::build::<i16>(&device, &config, self.stall_timeout)?,
            SampleFormat::U16 => CpalInput::build::<u16>(&device, &config, self.stall_timeout)?,
            SampleFormat::F32 => CpalInput::build::<f32>(&device, &config, self.stall_timeout)?,
            other => return Err(DeviceError::Unsupported(format!("sample format {:?}", other))),
        };

        tracing::info!(device = %name, rate = spec.sample_rate, "Opened input device");
        Ok(Box::new(input))
    }

    fn open_output(
        &self,
        device: Option<usize>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn OutputStream>, DeviceError> {
        let device = match device {
            Some(index) => self.device_at(index)?,
            None => cpal::default_host()
                .default_output_device()
                .ok_or(DeviceError::NoDefault("output"))?,
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let format = device
            .default_output_config()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?
            .sample_format();
        let config = Self::stream_config(spec);

        let output = match format {
            SampleFormat::I16 => CpalOutput::build::<i16>(&device, &config, self.stall_timeout)?,
            SampleFormat::U16 => CpalOutput::build::<u16>(&device, &config, self.stall_timeout)?,
            SampleFormat::F32 => CpalOutput::build::<f32>(&device, &config, self.stall_timeout)?,
            other => return Err(DeviceError::Unsupported(format!("sample format {:?}", other))),
        };

        tracing::info!(device = %name, rate = spec.sample_rate, "Opened output device");
        Ok(Box::new(output))
    }
}

/// Capture stream fed by a cpal callback
struct CpalInput {
    _stream: cpal::Stream,
    chunks: Receiver<Vec<i16>>,
    errors: Receiver<String>,
    pending: VecDeque<i16>,
    stall_timeout: Duration,
}

impl CpalInput {
    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        stall_timeout: Duration,
    ) -> Result<Self, DeviceError>
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CAPTURE_CHUNKS);
        let (error_tx, error_rx) = bounded::<String>(16);

        let stream = device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let chunk: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
                    // Overrun: the reader fell behind, drop the chunk
                    let _ = chunk_tx.try_send(chunk);
                },
                move |err| {
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            chunks: chunk_rx,
            errors: error_rx,
            pending: VecDeque::new(),
            stall_timeout,
        })
    }
}

impl InputStream for CpalInput {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError> {
        while self.pending.len() < frame.len() {
            if let Ok(err) = self.errors.try_recv() {
                return Err(DeviceError::StreamFailed(err));
            }
            match self.chunks.recv_timeout(self.stall_timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Err(DeviceError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Closed),
            }
        }

        let len = frame.len();
        for (dst, src) in frame.iter_mut().zip(self.pending.drain(..len)) {
            *dst = src;
        }
        Ok(())
    }
}

/// Playback stream draining into a cpal callback
struct CpalOutput {
    _stream: cpal::Stream,
    frames: Sender<Vec<i16>>,
    errors: Receiver<String>,
    stall_timeout: Duration,
}

impl CpalOutput {
    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        stall_timeout: Duration,
    ) -> Result<Self, DeviceError>
    where
        T: SizedSample + FromSample<i16>,
    {
        let (frame_tx, frame_rx) = bounded::<Vec<i16>>(PLAYBACK_FRAMES);
        let (error_tx, error_rx) = bounded::<String>(16);
        let channels = config.channels.max(1) as usize;
        let mut pending: VecDeque<i16> = VecDeque::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for out in data.chunks_mut(channels) {
                        if pending.is_empty() {
                            if let Ok(frame) = frame_rx.try_recv() {
                                pending.extend(frame);
                            }
                        }
                        // Underrun plays silence
                        let sample = pending.pop_front().unwrap_or(0);
                        for slot in out.iter_mut() {
                            *slot = T::from_sample(sample);
                        }
                    }
                },
                move |err| {
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            frames: frame_tx,
            errors: error_rx,
            stall_timeout,
        })
    }
}

impl OutputStream for CpalOutput {
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError> {
        if let Ok(err) = self.errors.try_recv() {
            return Err(DeviceError::StreamFailed(err));
        }
        self.frames
            .send_timeout(frame.to_vec(), self.stall_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeviceError::Timeout,
                SendTimeoutError::Disconnected(_) => DeviceError::Closed,
            })
    }
}
