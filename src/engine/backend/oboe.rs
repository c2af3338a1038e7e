//! Oboe backend for Android (AAudio / OpenSL ES)
//!
//! Both directions use Oboe's callback (async) streams. Oboe hands callbacks
//! typed frames (`f32`, `(f32, f32)`, `i16`, `(i16, i16)`); they are copied
//! through a preallocated interleaved scratch buffer in fixed-size chunks so
//! the data path only ever sees flat sample slices.

use std::marker::PhantomData;

use ::oboe::{
    AudioInputCallback, AudioInputStreamSafe, AudioOutputCallback, AudioOutputStreamSafe,
    AudioStream, AudioStreamAsync, AudioStreamBase, AudioStreamBuilder, ChannelCount,
    DataCallbackResult, Input, IsChannelCount, IsFormat, IsFrameType, Mono, Output, Stereo,
};

use crate::audio::callback::{CaptureCallback, FaultKind, FaultReporter, RenderCallback};
use crate::audio::sample::Sample;
use crate::audio::stream_config::{
    PerformanceMode, SampleFormat, SharingMode, StreamConfig, StreamDirection,
};
use crate::error::EngineError;

use super::{AudioStreamHandle, DeviceStreamFactory};

/// Frames converted per scratch pass
const SCRATCH_FRAMES: usize = 256;

/// Opens Oboe streams on the default Android audio devices.
#[derive(Debug, Default)]
pub struct OboeStreamFactory;

impl OboeStreamFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceStreamFactory for OboeStreamFactory {
    fn open_input(
        &self,
        preferred: &StreamConfig,
        callback: CaptureCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        permission::ensure_record_audio()?;

        match (preferred.format, preferred.channel_count) {
            (SampleFormat::Float32, 1) => open_input::<f32, Mono>(preferred, callback),
            (SampleFormat::Float32, 2) => open_input::<f32, Stereo>(preferred, callback),
            (SampleFormat::Pcm16, 1) => open_input::<i16, Mono>(preferred, callback),
            (SampleFormat::Pcm16, 2) => open_input::<i16, Stereo>(preferred, callback),
            (_, channels) => Err(unsupported_channels(channels)),
        }
    }

    fn open_output(
        &self,
        preferred: &StreamConfig,
        callback: RenderCallback,
    ) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError> {
        match (preferred.format, preferred.channel_count) {
            (SampleFormat::Float32, 1) => open_output::<f32, Mono>(preferred, callback),
            (SampleFormat::Float32, 2) => open_output::<f32, Stereo>(preferred, callback),
            (SampleFormat::Pcm16, 1) => open_output::<i16, Mono>(preferred, callback),
            (SampleFormat::Pcm16, 2) => open_output::<i16, Stereo>(preferred, callback),
            (_, channels) => Err(unsupported_channels(channels)),
        }
    }
}

fn unsupported_channels(channels: u16) -> EngineError {
    EngineError::ConfigUnsupported {
        details: format!("oboe streams support 1 or 2 channels, got {}", channels),
    }
}

/// Oboe frame type that can be flattened into interleaved samples.
trait OboeFrame: Copy + Send + 'static {
    type Sample: Sample;
    const CHANNELS: usize;

    fn split(self, out: &mut [Self::Sample]);
    fn join(samples: &[Self::Sample]) -> Self;
}

impl OboeFrame for f32 {
    type Sample = f32;
    const CHANNELS: usize = 1;

    fn split(self, out: &mut [f32]) {
        out[0] = self;
    }

    fn join(samples: &[f32]) -> Self {
        samples[0]
    }
}

impl OboeFrame for (f32, f32) {
    type Sample = f32;
    const CHANNELS: usize = 2;

    fn split(self, out: &mut [f32]) {
        out[0] = self.0;
        out[1] = self.1;
    }

    fn join(samples: &[f32]) -> Self {
        (samples[0], samples[1])
    }
}

impl OboeFrame for i16 {
    type Sample = i16;
    const CHANNELS: usize = 1;

    fn split(self, out: &mut [i16]) {
        out[0] = self;
    }

    fn join(samples: &[i16]) -> Self {
        samples[0]
    }
}

impl OboeFrame for (i16, i16) {
    type Sample = i16;
    const CHANNELS: usize = 2;

    fn split(self, out: &mut [i16]) {
        out[0] = self.0;
        out[1] = self.1;
    }

    fn join(samples: &[i16]) -> Self {
        (samples[0], samples[1])
    }
}

struct OboeCapture<F: IsFrameType>
where
    F::Type: OboeFrame,
{
    callback: CaptureCallback,
    reporter: FaultReporter,
    scratch: Vec<<F::Type as OboeFrame>::Sample>,
    _frame: PhantomData<F>,
}

impl<F: IsFrameType> OboeCapture<F>
where
    F::Type: OboeFrame,
{
    fn new(callback: CaptureCallback) -> Self {
        let reporter = callback.fault_reporter();
        Self {
            callback,
            reporter,
            scratch: vec![
                <<F::Type as OboeFrame>::Sample as Sample>::SILENCE;
                SCRATCH_FRAMES * <F::Type as OboeFrame>::CHANNELS
            ],
            _frame: PhantomData,
        }
    }
}

impl<F: IsFrameType> AudioInputCallback for OboeCapture<F>
where
    F::Type: OboeFrame,
{
    type FrameType = F;

    fn on_error_before_close(
        &mut self,
        _stream: &mut dyn AudioInputStreamSafe,
        error: ::oboe::Error,
    ) {
        self.reporter.report(fault_kind(error));
    }

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioInputStreamSafe,
        frames: &[F::Type],
    ) -> DataCallbackResult {
        let channels = <F::Type as OboeFrame>::CHANNELS;
        for chunk in frames.chunks(SCRATCH_FRAMES) {
            for (frame, slot) in chunk.iter().zip(self.scratch.chunks_exact_mut(channels)) {
                frame.split(slot);
            }
            self.callback.on_input(&self.scratch[..chunk.len() * channels]);
        }
        DataCallbackResult::Continue
    }
}

struct OboeRender<F: IsFrameType>
where
    F::Type: OboeFrame,
{
    callback: RenderCallback,
    reporter: FaultReporter,
    scratch: Vec<<F::Type as OboeFrame>::Sample>,
    _frame: PhantomData<F>,
}

impl<F: IsFrameType> OboeRender<F>
where
    F::Type: OboeFrame,
{
    fn new(callback: RenderCallback) -> Self {
        let reporter = callback.fault_reporter();
        Self {
            callback,
            reporter,
            scratch: vec![
                <<F::Type as OboeFrame>::Sample as Sample>::SILENCE;
                SCRATCH_FRAMES * <F::Type as OboeFrame>::CHANNELS
            ],
            _frame: PhantomData,
        }
    }
}

impl<F: IsFrameType> AudioOutputCallback for OboeRender<F>
where
    F::Type: OboeFrame,
{
    type FrameType = F;

    fn on_error_before_close(
        &mut self,
        _stream: &mut dyn AudioOutputStreamSafe,
        error: ::oboe::Error,
    ) {
        self.reporter.report(fault_kind(error));
    }

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioOutputStreamSafe,
        frames: &mut [F::Type],
    ) -> DataCallbackResult {
        let channels = <F::Type as OboeFrame>::CHANNELS;
        for chunk in frames.chunks_mut(SCRATCH_FRAMES) {
            let samples = chunk.len() * channels;
            self.callback.on_output(&mut self.scratch[..samples]);
            for (frame, slot) in chunk.iter_mut().zip(self.scratch.chunks_exact(channels)) {
                *frame = <F::Type as OboeFrame>::join(slot);
            }
        }
        DataCallbackResult::Continue
    }
}

fn open_input<T, C>(
    preferred: &StreamConfig,
    callback: CaptureCallback,
) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError>
where
    T: IsFormat + 'static,
    C: IsChannelCount + 'static,
    (T, C): IsFrameType,
    <(T, C) as IsFrameType>::Type: OboeFrame,
{
    let mut builder = AudioStreamBuilder::default()
        .set_performance_mode(to_oboe_performance(preferred.performance_mode))
        .set_sharing_mode(to_oboe_sharing(preferred.sharing_mode))
        .set_direction::<Input>()
        .set_sample_rate(preferred.sample_rate as i32)
        .set_channel_count::<C>()
        .set_format::<T>();
    if preferred.frames_per_callback > 0 {
        builder = builder.set_frames_per_callback(preferred.frames_per_callback as i32);
    }

    let stream = builder
        .set_callback(OboeCapture::<(T, C)>::new(callback))
        .open_stream()
        .map_err(map_oboe_error)?;

    let handle = OboeStreamHandle::new(StreamDirection::Input, preferred.format, Box::new(stream))?;
    let actual = handle.config;
    Ok((Box::new(handle), actual))
}

fn open_output<T, C>(
    preferred: &StreamConfig,
    callback: RenderCallback,
) -> Result<(Box<dyn AudioStreamHandle>, StreamConfig), EngineError>
where
    T: IsFormat + 'static,
    C: IsChannelCount + 'static,
    (T, C): IsFrameType,
    <(T, C) as IsFrameType>::Type: OboeFrame,
{
    let mut builder = AudioStreamBuilder::default()
        .set_performance_mode(to_oboe_performance(preferred.performance_mode))
        .set_sharing_mode(to_oboe_sharing(preferred.sharing_mode))
        .set_direction::<Output>()
        .set_sample_rate(preferred.sample_rate as i32)
        .set_channel_count::<C>()
        .set_format::<T>();
    if preferred.frames_per_callback > 0 {
        builder = builder.set_frames_per_callback(preferred.frames_per_callback as i32);
    }

    let stream: AudioStreamAsync<Output, OboeRender<(T, C)>> = builder
        .set_callback(OboeRender::<(T, C)>::new(callback))
        .open_stream()
        .map_err(map_oboe_error)?;

    let handle = OboeStreamHandle::new(StreamDirection::Output, preferred.format, Box::new(stream))?;
    let actual = handle.config;
    Ok((Box::new(handle), actual))
}

/// Owned Oboe stream.
struct OboeStream(Box<dyn AudioStream>);

// SAFETY: the engine only touches the stream from one control thread at a
// time (under its state guard); Oboe invokes the callbacks on its own thread.
unsafe impl Send for OboeStream {}

struct OboeStreamHandle {
    direction: StreamDirection,
    config: StreamConfig,
    stream: OboeStream,
}

impl OboeStreamHandle {
    fn new(
        direction: StreamDirection,
        format: SampleFormat,
        stream: Box<dyn AudioStream>,
    ) -> Result<Self, EngineError> {
        let config = actual_config(stream.as_ref(), format)?;
        log::debug!("[Oboe] {} stream opened: {}", direction, config);
        Ok(Self {
            direction,
            config,
            stream: OboeStream(stream),
        })
    }
}

impl AudioStreamHandle for OboeStreamHandle {
    fn direction(&self) -> StreamDirection {
        self.direction
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.stream.0.request_start().map_err(map_oboe_error)
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        let stopped = self.stream.0.stop().map_err(map_oboe_error);
        // Dropping an async stream closes it and waits out any running callback.
        drop(self);
        stopped
    }
}

fn actual_config(stream: &dyn AudioStream, format: SampleFormat) -> Result<StreamConfig, EngineError> {
    let channel_count = match stream.get_channel_count() {
        ChannelCount::Mono => 1,
        ChannelCount::Stereo => 2,
        other => {
            return Err(EngineError::ConfigUnsupported {
                details: format!("oboe granted channel layout {:?}", other),
            })
        }
    };

    let frames_per_callback = match stream.get_frames_per_callback() {
        frames if frames > 0 => frames as u32,
        _ => stream.get_frames_per_burst().max(0) as u32,
    };

    Ok(StreamConfig {
        sample_rate: stream.get_sample_rate().max(0) as u32,
        channel_count,
        format,
        frames_per_callback,
        sharing_mode: from_oboe_sharing(stream.get_sharing_mode()),
        performance_mode: from_oboe_performance(stream.get_performance_mode()),
    })
}

fn to_oboe_sharing(mode: SharingMode) -> ::oboe::SharingMode {
    match mode {
        SharingMode::Exclusive => ::oboe::SharingMode::Exclusive,
        SharingMode::Shared => ::oboe::SharingMode::Shared,
    }
}

fn from_oboe_sharing(mode: ::oboe::SharingMode) -> SharingMode {
    match mode {
        ::oboe::SharingMode::Exclusive => SharingMode::Exclusive,
        _ => SharingMode::Shared,
    }
}

fn to_oboe_performance(mode: PerformanceMode) -> ::oboe::PerformanceMode {
    match mode {
        PerformanceMode::LowLatency => ::oboe::PerformanceMode::LowLatency,
        PerformanceMode::PowerSaving => ::oboe::PerformanceMode::PowerSaving,
        PerformanceMode::None => ::oboe::PerformanceMode::None,
    }
}

fn from_oboe_performance(mode: ::oboe::PerformanceMode) -> PerformanceMode {
    match mode {
        ::oboe::PerformanceMode::LowLatency => PerformanceMode::LowLatency,
        ::oboe::PerformanceMode::PowerSaving => PerformanceMode::PowerSaving,
        _ => PerformanceMode::None,
    }
}

fn fault_kind(error: ::oboe::Error) -> FaultKind {
    match error {
        ::oboe::Error::Disconnected => FaultKind::Disconnected,
        _ => FaultKind::Errored,
    }
}

fn map_oboe_error(error: ::oboe::Error) -> EngineError {
    let details = format!("oboe: {:?}", error);
    match error {
        ::oboe::Error::Disconnected => EngineError::StreamDisconnected { details },
        ::oboe::Error::NoService | ::oboe::Error::Unavailable => {
            EngineError::DeviceUnavailable { details }
        }
        ::oboe::Error::InvalidFormat
        | ::oboe::Error::InvalidRate
        | ::oboe::Error::IllegalArgument
        | ::oboe::Error::OutOfRange
        | ::oboe::Error::Unimplemented => EngineError::ConfigUnsupported { details },
        _ => EngineError::InternalFault { details },
    }
}

mod permission {
    use jni::objects::{JObject, JValue};
    use jni::JavaVM;

    use crate::error::EngineError;

    const RECORD_AUDIO: &str = "android.permission.RECORD_AUDIO";
    const PERMISSION_GRANTED: i32 = 0;

    /// Check RECORD_AUDIO through `Context.checkSelfPermission`.
    ///
    /// Without an initialized Android context the check is skipped and the
    /// platform open reports the failure instead.
    pub(super) fn ensure_record_audio() -> Result<(), EngineError> {
        if !crate::jni_bridge::android_context_ready() {
            log::debug!("[Oboe] no Android context, skipping permission check");
            return Ok(());
        }
        let ctx = ndk_context::android_context();

        // SAFETY: both pointers come from ndk_context, initialized by the
        // JNI bridge with the process JavaVM and a global application context.
        let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }.map_err(jni_error)?;
        let mut env = vm.attach_current_thread().map_err(jni_error)?;
        let context = unsafe { JObject::from_raw(ctx.context().cast()) };

        let permission = env.new_string(RECORD_AUDIO).map_err(jni_error)?;
        let result = env
            .call_method(
                &context,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValue::Object(permission.as_ref())],
            )
            .and_then(|value| value.i())
            .map_err(jni_error)?;

        if result == PERMISSION_GRANTED {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied)
        }
    }

    fn jni_error(err: jni::errors::Error) -> EngineError {
        EngineError::internal(format!("permission check failed: {}", err))
    }
}
