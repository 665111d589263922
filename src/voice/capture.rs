//! Audio capture from microphone
//!
//! [`AudioInput`] is the capability the session controller depends on: open a
//! mono stream and deliver fixed-size frames out of band. [`MicrophoneInput`]
//! implements it with cpal and forwards frames over a channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per processing window
pub const FRAME_SIZE: usize = 4096;

/// A block of mono PCM samples from the live input stream
pub type AudioFrame = Vec<f32>;

/// Classified microphone acquisition failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or the OS refused microphone access
    #[error("microphone access was denied; allow microphone access in your system settings")]
    PermissionDenied,

    /// No input device present
    #[error("no microphone found; check that an input device is connected")]
    DeviceNotFound,

    /// The device exists but cannot be read
    #[error("microphone is unreadable, it may be in use by another application")]
    DeviceBusy,

    /// The device cannot satisfy the requested stream configuration
    #[error("microphone cannot satisfy the requested configuration: {0}")]
    UnsupportedConfiguration(String),
}

/// Requested stream parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (always mono for speech)
    pub channels: u16,

    /// Samples per delivered frame
    pub frame_size: usize,

    /// Ask the host for echo cancellation
    pub echo_cancellation: bool,

    /// Ask the host for noise suppression
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            frame_size: FRAME_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A microphone-like source owned exclusively by one session
pub trait AudioInput {
    /// Acquire the device and begin delivering frames
    ///
    /// Opening an input that is already open is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a classified [`CaptureError`] if acquisition fails
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError>;

    /// Release the device; no further frames are delivered
    fn close(&mut self);

    /// Whether the device is currently acquired
    fn is_open(&self) -> bool;
}

/// Captures audio from the default input device
pub struct MicrophoneInput {
    frames: UnboundedSender<AudioFrame>,
    stream: Option<Stream>,
}

impl MicrophoneInput {
    /// Create a microphone input that forwards frames to `frames`
    #[must_use]
    pub const fn new(frames: UnboundedSender<AudioFrame>) -> Self {
        Self {
            frames,
            stream: None,
        }
    }

    fn stream_config(
        device: &cpal::Device,
        constraints: &CaptureConstraints,
    ) -> Result<StreamConfig, CaptureError> {
        let rate = SampleRate(constraints.sample_rate);
        let supported = device
            .supported_input_configs()
            .map_err(classify_configs_error)?
            .find(|c| {
                c.channels() == constraints.channels
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .ok_or_else(|| {
                CaptureError::UnsupportedConfiguration(format!(
                    "{} channel(s) at {} Hz",
                    constraints.channels, constraints.sample_rate
                ))
            })?;

        Ok(supported.with_sample_rate(rate).config())
    }
}

impl AudioInput for MicrophoneInput {
    fn open(&mut self, constraints: &CaptureConstraints) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound)?;
        let config = Self::stream_config(&device, constraints)?;

        // cpal has no portable echo/noise processing switch; the host's
        // default processing chain applies
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = constraints.sample_rate,
            frame_size = constraints.frame_size,
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "opening microphone"
        );

        let frames = self.frames.clone();
        let mut chunker = FrameChunker::new(constraints.frame_size);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in chunker.push(data) {
                        // Receiver gone means the session shut down
                        let _ = frames.send(frame);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(classify_build_error)?;

        stream.play().map_err(classify_play_error)?;
        self.stream = Some(stream);

        tracing::info!("microphone opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Regroups arbitrary callback buffers into fixed-size frames
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker producing frames of `frame_size` samples
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Add samples and return every frame completed by them
    pub fn push(&mut self, data: &[f32]) -> Vec<AudioFrame> {
        let mut complete = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                complete.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        complete
    }
}

/// Map a backend error description onto a capture error kind
fn classify_backend_description(description: &str) -> CaptureError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed")
    {
        CaptureError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") || lower.contains("unavailable")
    {
        CaptureError::DeviceBusy
    } else if lower.contains("not found") || lower.contains("no such device") {
        CaptureError::DeviceNotFound
    } else {
        CaptureError::UnsupportedConfiguration(description.to_string())
    }
}

fn classify_configs_error(err: cpal::SupportedStreamConfigsError) -> CaptureError {
    match err {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => CaptureError::DeviceNotFound,
        cpal::SupportedStreamConfigsError::InvalidArgument => {
            CaptureError::UnsupportedConfiguration("invalid argument".to_string())
        }
        cpal::SupportedStreamConfigsError::BackendSpecific { err } => {
            classify_backend_description(&err.description)
        }
    }
}

fn classify_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        cpal::BuildStreamError::BackendSpecific { err } => {
            classify_backend_description(&err.description)
        }
        other => CaptureError::UnsupportedConfiguration(other.to_string()),
    }
}

fn classify_play_error(err: cpal::PlayStreamError) -> CaptureError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        cpal::PlayStreamError::BackendSpecific { err } => {
            classify_backend_description(&err.description)
        }
    }
}
