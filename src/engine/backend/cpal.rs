//! CPAL backend for desktop platforms (Linux, macOS, Windows)
//!
//! `cpal::Stream` is not `Send` on every host, so each stream is built and
//! owned by a dedicated thread. The handle the engine holds only talks to
//! that thread over a command channel.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::callback::{CaptureCallback, FaultKind, FaultReporter, RenderCallback};
use crate::audio::sample::Sample;
use crate::audio::stream_config::{
    PerformanceMode, SampleFormat, SharingMode, StreamConfig, StreamDirection,
};
use crate::error::EngineError;

use super::{AudioStreamHandle, DeviceStreamFactory};

/// Opens streams on the default CPAL host's default devices.
#[derive(Debug, Default)]
pub struct CpalStreamFactory;

impl CpalStreamFactory {
    pub fn new() -> Self {
        Self
    }
}

enum Command {
    Start(mpsc::Sender<Result<(), EngineError>>),
    Close(mpsc::Sender<Result<(), EngineError>>),
}

/// Callback attached at open, moved onto the owner thread.
enum Attached {
    Capture(CaptureCallback),
    Render(RenderCallback),
}

impl Attached {
    fn direction(&self) -> StreamDirection {
        match self {
            Attached::Capture(_) => StreamDirection::Input,
            Attached::Render(_) => StreamDirection::Output,
        }
    }

    fn fault_reporter(&self) -> FaultReporter {
        match self {
            Attached::Capture(callback) => callback.fault_reporter(),
            Attached::Render(callback) => callback.fault_reporter(),
        }
    }
}

impl DeviceStreamFactory for CpalStreamFactory {
    fn open_input(
        &self,
        preferred: &StreamConfig,
        callback: CaptureCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        let handle = CpalStreamHandle::spawn(*preferred, Attached::Capture(callback))?;
        let actual = handle.config;
        Ok((Box::new(handle), actual))
    }

    fn open_output(
        &self,
        preferred: &StreamConfig,
        callback: RenderCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        let handle = CpalStreamHandle::spawn(*preferred, Attached::Render(callback))?;
        let actual = handle.config;
        Ok((Box::new(handle), actual))
    }
}

struct CpalStreamHandle {
    direction: StreamDirection,
    config: StreamConfig,
    commands: mpsc::Sender<Command>,
    owner: Option<JoinHandle<()>>,
}

impl CpalStreamHandle {
    fn spawn(preferred: StreamConfig, attached: Attached) -> Result<Self, EngineError> {
        let direction = attached.direction();
        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<StreamConfig, EngineError>>();

        let owner = thread::Builder::new()
            .name(format!("passthrough-cpal-{}", direction))
            .spawn(move || {
                let stream = match build_stream(&preferred, attached) {
                    Ok((stream, actual)) => {
                        let _ = opened_tx.send(Ok(actual));
                        stream
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };
                serve(stream, command_rx);
            })
            .map_err(EngineError::from)?;

        match opened_rx.recv() {
            Ok(Ok(config)) => Ok(Self {
                direction,
                config,
                commands: command_tx,
                owner: Some(owner),
            }),
            Ok(Err(err)) => {
                let _ = owner.join();
                Err(err)
            }
            Err(_) => {
                let _ = owner.join();
                Err(EngineError::internal(format!(
                    "cpal {} stream thread exited before opening",
                    direction
                )))
            }
        }
    }

    fn request(&self, make: fn(mpsc::Sender<Result<(), EngineError>>) -> Command) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands.send(make(reply_tx)).map_err(|_| {
            EngineError::internal(format!("cpal {} stream thread is gone", self.direction))
        })?;
        reply_rx.recv().map_err(|_| {
            EngineError::internal(format!(
                "cpal {} stream thread dropped the reply",
                self.direction
            ))
        })?
    }
}

impl AudioStreamHandle for CpalStreamHandle {
    fn direction(&self) -> StreamDirection {
        self.direction
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.request(Command::Start)
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        let result = self.request(Command::Close);
        // The stream is dropped on the owner thread before it exits, so
        // joining guarantees no callback can still be running.
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                return Err(EngineError::internal(format!(
                    "cpal {} stream thread panicked",
                    self.direction
                )));
            }
        }
        result
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            let (reply_tx, _reply_rx) = mpsc::channel();
            let _ = self.commands.send(Command::Close(reply_tx));
            let _ = owner.join();
        }
    }
}

fn serve(stream: ::cpal::Stream, commands: mpsc::Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(stream.play().map_err(map_play_error));
            }
            Command::Close(reply) => {
                let paused = stream.pause().map_err(|e| {
                    EngineError::internal(format!("failed to pause stream: {}", e))
                });
                drop(stream);
                let _ = reply.send(paused);
                return;
            }
        }
    }
    // Handle dropped without closing: the stream drops here.
}

fn build_stream(
    preferred: &StreamConfig,
    attached: Attached,
) -> Result<(::cpal::Stream, StreamConfig), EngineError> {
    let direction = attached.direction();
    if preferred.sharing_mode == SharingMode::Exclusive {
        return Err(EngineError::ConfigUnsupported {
            details: "cpal cannot guarantee exclusive device access".to_string(),
        });
    }

    let host = ::cpal::default_host();
    let device = match direction {
        StreamDirection::Input => host.default_input_device(),
        StreamDirection::Output => host.default_output_device(),
    }
    .ok_or_else(|| EngineError::DeviceUnavailable {
        details: format!("no default {} device on host {:?}", direction, host.id()),
    })?;

    let range = find_supported_range(&device, direction, preferred)?;
    let buffer_size = choose_buffer_size(preferred, range.buffer_size())?;

    let cpal_config = ::cpal::StreamConfig {
        channels: preferred.channel_count,
        sample_rate: ::cpal::SampleRate(preferred.sample_rate),
        buffer_size,
    };

    let frames_per_callback =
        reported_frames_per_callback(buffer_size, range.buffer_size(), preferred.sample_rate);
    let actual = StreamConfig {
        frames_per_callback,
        ..*preferred
    };

    let reporter = attached.fault_reporter();
    let stream = match (attached, preferred.format) {
        (Attached::Capture(callback), SampleFormat::Float32) => {
            build_input::<f32>(&device, &cpal_config, callback, reporter)
        }
        (Attached::Capture(callback), SampleFormat::Pcm16) => {
            build_input::<i16>(&device, &cpal_config, callback, reporter)
        }
        (Attached::Render(callback), SampleFormat::Float32) => {
            build_output::<f32>(&device, &cpal_config, callback, reporter)
        }
        (Attached::Render(callback), SampleFormat::Pcm16) => {
            build_output::<i16>(&device, &cpal_config, callback, reporter)
        }
    }
    .map_err(map_build_error)?;

    log::debug!(
        "cpal {} stream opened on {:?}: {}",
        direction,
        device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
        actual
    );
    Ok((stream, actual))
}

fn build_input<S: Sample + ::cpal::SizedSample>(
    device: &::cpal::Device,
    config: &::cpal::StreamConfig,
    mut callback: CaptureCallback,
    reporter: FaultReporter,
) -> Result<::cpal::Stream, ::cpal::BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[S], _: &::cpal::InputCallbackInfo| callback.on_input(data),
        move |err| reporter.report(fault_kind(&err)),
        None,
    )
}

fn build_output<S: Sample + ::cpal::SizedSample>(
    device: &::cpal::Device,
    config: &::cpal::StreamConfig,
    mut callback: RenderCallback,
    reporter: FaultReporter,
) -> Result<::cpal::Stream, ::cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [S], _: &::cpal::OutputCallbackInfo| callback.on_output(data),
        move |err| reporter.report(fault_kind(&err)),
        None,
    )
}

fn find_supported_range(
    device: &::cpal::Device,
    direction: StreamDirection,
    preferred: &StreamConfig,
) -> Result<::cpal::SupportedStreamConfigRange, EngineError> {
    let wanted_format = match preferred.format {
        SampleFormat::Float32 => ::cpal::SampleFormat::F32,
        SampleFormat::Pcm16 => ::cpal::SampleFormat::I16,
    };
    let rate = ::cpal::SampleRate(preferred.sample_rate);

    let ranges: Vec<::cpal::SupportedStreamConfigRange> = match direction {
        StreamDirection::Input => device
            .supported_input_configs()
            .map_err(map_configs_error)?
            .collect(),
        StreamDirection::Output => device
            .supported_output_configs()
            .map_err(map_configs_error)?
            .collect(),
    };

    ranges
        .into_iter()
        .find(|range| {
            range.channels() == preferred.channel_count
                && range.sample_format() == wanted_format
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        })
        .ok_or_else(|| EngineError::ConfigUnsupported {
            details: format!("{} device does not support {}", direction, preferred),
        })
}

fn choose_buffer_size(
    preferred: &StreamConfig,
    supported: &::cpal::SupportedBufferSize,
) -> Result<::cpal::BufferSize, EngineError> {
    if preferred.performance_mode != PerformanceMode::LowLatency {
        return Ok(::cpal::BufferSize::Default);
    }
    match supported {
        ::cpal::SupportedBufferSize::Range { min, max } => {
            let wanted = if preferred.frames_per_callback == 0 {
                *min
            } else {
                preferred.frames_per_callback
            };
            Ok(::cpal::BufferSize::Fixed(wanted.clamp(*min, *max)))
        }
        ::cpal::SupportedBufferSize::Unknown => Err(EngineError::ConfigUnsupported {
            details: "device does not expose a fixed low-latency buffer size".to_string(),
        }),
    }
}

/// Frames per callback to report for the chosen buffer size.
///
/// A host-default buffer gives no period up front, so the largest period the
/// device may deliver is reported instead. Without a known range a 20 ms
/// period is assumed. The result is capped at one second of audio.
fn reported_frames_per_callback(
    buffer_size: ::cpal::BufferSize,
    supported: &::cpal::SupportedBufferSize,
    sample_rate: u32,
) -> u32 {
    let one_second = sample_rate.max(1);
    match buffer_size {
        ::cpal::BufferSize::Fixed(frames) => frames,
        ::cpal::BufferSize::Default => match supported {
            ::cpal::SupportedBufferSize::Range { max, .. } => (*max).clamp(1, one_second),
            ::cpal::SupportedBufferSize::Unknown => (sample_rate / 50).clamp(1, one_second),
        },
    }
}

fn fault_kind(err: &::cpal::StreamError) -> FaultKind {
    match err {
        ::cpal::StreamError::DeviceNotAvailable => FaultKind::Disconnected,
        _ => FaultKind::Errored,
    }
}

fn map_build_error(err: ::cpal::BuildStreamError) -> EngineError {
    match err {
        ::cpal::BuildStreamError::DeviceNotAvailable => EngineError::DeviceUnavailable {
            details: err.to_string(),
        },
        ::cpal::BuildStreamError::StreamConfigNotSupported
        | ::cpal::BuildStreamError::InvalidArgument => EngineError::ConfigUnsupported {
            details: err.to_string(),
        },
        other => EngineError::internal(other.to_string()),
    }
}

fn map_play_error(err: ::cpal::PlayStreamError) -> EngineError {
    match err {
        ::cpal::PlayStreamError::DeviceNotAvailable => EngineError::DeviceUnavailable {
            details: err.to_string(),
        },
        other => EngineError::internal(other.to_string()),
    }
}

fn map_configs_error(err: ::cpal::SupportedStreamConfigsError) -> EngineError {
    match err {
        ::cpal::SupportedStreamConfigsError::DeviceNotAvailable => EngineError::DeviceUnavailable {
            details: err.to_string(),
        },
        ::cpal::SupportedStreamConfigsError::InvalidArgument => EngineError::ConfigUnsupported {
            details: err.to_string(),
        },
        other => EngineError::internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preferred(performance_mode: PerformanceMode, frames: u32) -> StreamConfig {
        StreamConfig {
            sample_rate: 48_000,
            channel_count: 2,
            format: SampleFormat::Float32,
            frames_per_callback: frames,
            sharing_mode: SharingMode::Shared,
            performance_mode,
        }
    }

    #[test]
    fn test_low_latency_clamps_to_supported_range() {
        let range = ::cpal::SupportedBufferSize::Range { min: 64, max: 1024 };
        let chosen = choose_buffer_size(&preferred(PerformanceMode::LowLatency, 16), &range).unwrap();
        assert_eq!(chosen, ::cpal::BufferSize::Fixed(64));

        let chosen = choose_buffer_size(&preferred(PerformanceMode::LowLatency, 0), &range).unwrap();
        assert_eq!(chosen, ::cpal::BufferSize::Fixed(64));

        let chosen = choose_buffer_size(&preferred(PerformanceMode::LowLatency, 256), &range).unwrap();
        assert_eq!(chosen, ::cpal::BufferSize::Fixed(256));
    }

    #[test]
    fn test_low_latency_requires_known_buffer_range() {
        let result = choose_buffer_size(
            &preferred(PerformanceMode::LowLatency, 0),
            &::cpal::SupportedBufferSize::Unknown,
        );
        assert!(matches!(result, Err(EngineError::ConfigUnsupported { .. })));
    }

    #[test]
    fn test_other_modes_use_host_default() {
        let chosen = choose_buffer_size(
            &preferred(PerformanceMode::None, 0),
            &::cpal::SupportedBufferSize::Unknown,
        )
        .unwrap();
        assert_eq!(chosen, ::cpal::BufferSize::Default);
    }

    #[test]
    fn test_default_buffer_reports_range_maximum() {
        let frames = reported_frames_per_callback(
            ::cpal::BufferSize::Default,
            &::cpal::SupportedBufferSize::Range { min: 64, max: 1024 },
            48_000,
        );
        assert_eq!(frames, 1024);
    }

    #[test]
    fn test_default_buffer_without_range_assumes_twenty_ms() {
        let frames = reported_frames_per_callback(
            ::cpal::BufferSize::Default,
            &::cpal::SupportedBufferSize::Unknown,
            48_000,
        );
        assert_eq!(frames, 960);
        assert_ne!(frames, 0);
    }

    #[test]
    fn test_default_buffer_range_capped_at_one_second() {
        let frames = reported_frames_per_callback(
            ::cpal::BufferSize::Default,
            &::cpal::SupportedBufferSize::Range {
                min: 1,
                max: 4_194_304,
            },
            44_100,
        );
        assert_eq!(frames, 44_100);
    }

    #[test]
    fn test_fixed_buffer_reports_requested_frames() {
        let frames = reported_frames_per_callback(
            ::cpal::BufferSize::Fixed(192),
            &::cpal::SupportedBufferSize::Range { min: 64, max: 1024 },
            48_000,
        );
        assert_eq!(frames, 192);
    }

    #[test]
    fn test_build_error_mapping() {
        assert!(matches!(
            map_build_error(::cpal::BuildStreamError::DeviceNotAvailable),
            EngineError::DeviceUnavailable { .. }
        ));
        assert!(matches!(
            map_build_error(::cpal::BuildStreamError::StreamConfigNotSupported),
            EngineError::ConfigUnsupported { .. }
        ));
        assert!(matches!(
            map_build_error(::cpal::BuildStreamError::StreamIdOverflow),
            EngineError::InternalFault { .. }
        ));
    }

    #[test]
    fn test_stream_error_fault_kind() {
        assert_eq!(
            fault_kind(&::cpal::StreamError::DeviceNotAvailable),
            FaultKind::Disconnected
        );
    }
}
