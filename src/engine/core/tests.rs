use std::sync::Barrier;
use std::time::{Duration, Instant};

use super::*;
use crate::audio::callback::FaultKind;
use crate::audio::stream_config::{PerformanceMode, SharingMode, StreamDirection};
use crate::engine::backend::StubStreamFactory;

fn engine_with(factory: &StubStreamFactory) -> PassthroughEngine {
    PassthroughEngine::new(Arc::new(factory.clone()), AppConfig::default())
}

fn wait_for_state(engine: &PassthroughEngine, wanted: EngineState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if engine.current_state() == wanted {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_new_engine_is_idle() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    assert_eq!(engine.current_state(), EngineState::Idle);
    assert_eq!(engine.last_error(), None);
    assert_eq!(engine.active_config(), None);
    assert_eq!(factory.opens(), 0);
}

#[test]
fn test_start_opens_exactly_one_pair() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);

    engine.start().unwrap();
    engine.start().unwrap();

    assert_eq!(engine.current_state(), EngineState::Running);
    assert_eq!(factory.input_opens(), 1);
    assert_eq!(factory.output_opens(), 1);
    assert!(factory.is_streaming(StreamDirection::Input));
    assert!(factory.is_streaming(StreamDirection::Output));
}

#[test]
fn test_ring_sized_from_actual_callback_size() {
    let factory = StubStreamFactory::new().coerce_frames_per_callback(96);
    let engine = engine_with(&factory);
    engine.start().unwrap();

    let config = engine.active_config().unwrap();
    assert_eq!(config.input.frames_per_callback, 96);
    assert_eq!(config.ring_capacity_frames, 256);
    assert_eq!(engine.stats().ring_capacity_frames, 256);
}

#[test]
fn test_stop_when_idle_is_noop() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    engine.stop();
    engine.stop();
    assert_eq!(engine.current_state(), EngineState::Idle);
    assert_eq!(factory.closes(), 0);
}

#[test]
fn test_stop_closes_both_streams() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    engine.start().unwrap();
    engine.stop();

    assert_eq!(engine.current_state(), EngineState::Idle);
    assert_eq!(factory.open_handles(), 0);
    assert_eq!(factory.closes(), 2);
    assert_eq!(engine.active_config(), None);
}

#[test]
fn test_stop_absorbs_close_errors() {
    let factory = StubStreamFactory::new().fail_close();
    let engine = engine_with(&factory);
    engine.start().unwrap();
    engine.stop();

    assert_eq!(engine.current_state(), EngineState::Idle);
    assert_eq!(factory.open_handles(), 0);
}

#[test]
fn test_frames_flow_while_running() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    engine.start().unwrap();

    let captured: Vec<f32> = (0..8).map(|i| i as f32 / 10.0).collect();
    assert!(factory.push_input(&captured));
    let mut rendered = [0.0_f32; 8];
    assert!(factory.pull_output(&mut rendered));
    assert_eq!(&rendered[..], &captured[..]);

    let stats = engine.stats();
    assert_eq!(stats.frames_captured, 4);
    assert_eq!(stats.frames_rendered, 4);

    engine.stop();
    assert_eq!(engine.stats().frames_captured, 4);
}

#[test]
fn test_async_fault_tears_down_and_faults() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    engine.start().unwrap();

    assert!(factory.inject_fault(StreamDirection::Output, FaultKind::Disconnected));
    assert!(wait_for_state(&engine, EngineState::Faulted));

    assert_eq!(factory.open_handles(), 0);
    assert!(matches!(
        engine.last_error(),
        Some(EngineError::StreamDisconnected { .. })
    ));

    engine.stop();
    assert_eq!(engine.current_state(), EngineState::Idle);
    assert!(engine.last_error().is_some());
}

#[test]
fn test_restart_after_fault_clears_error() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    engine.start().unwrap();
    factory.inject_fault(StreamDirection::Input, FaultKind::Errored);
    assert!(wait_for_state(&engine, EngineState::Faulted));
    assert!(matches!(
        engine.last_error(),
        Some(EngineError::InternalFault { .. })
    ));

    engine.start().unwrap();
    assert_eq!(engine.current_state(), EngineState::Running);
    assert_eq!(engine.last_error(), None);
    assert_eq!(factory.open_handles(), 2);
}

#[test]
fn test_start_failure_leaves_nothing_open() {
    let factory = StubStreamFactory::new().fail_start(
        StreamDirection::Output,
        EngineError::internal("output refused to start"),
    );
    let engine = engine_with(&factory);

    let result = engine.start();
    assert!(matches!(result, Err(EngineError::InternalFault { .. })));
    assert_eq!(engine.current_state(), EngineState::Faulted);
    assert_eq!(factory.opens(), 2);
    assert_eq!(factory.open_handles(), 0);
    assert_eq!(engine.last_error(), result.err());
}

#[test]
fn test_permission_denied_is_retryable() {
    let factory =
        StubStreamFactory::new().fail_open(StreamDirection::Input, EngineError::PermissionDenied);
    let engine = engine_with(&factory);

    let err = engine.start().unwrap_err();
    assert_eq!(err, EngineError::PermissionDenied);
    assert!(err.is_retryable());
    assert_eq!(factory.open_handles(), 0);

    factory.clear_open_failures();
    engine.start().unwrap();
    assert_eq!(engine.current_state(), EngineState::Running);
}

#[test]
fn test_invalid_config_fails_before_opening() {
    let factory = StubStreamFactory::new();
    let mut config = AppConfig::default();
    config.audio.channel_count = 6;
    let engine = PassthroughEngine::new(Arc::new(factory.clone()), config);

    assert!(matches!(
        engine.start(),
        Err(EngineError::ConfigUnsupported { .. })
    ));
    assert!(factory.attempts().is_empty());
}

#[test]
fn test_fallback_reports_permissive_config() {
    let factory = StubStreamFactory::new()
        .reject_modes(PerformanceMode::LowLatency, SharingMode::Exclusive)
        .reject_modes(PerformanceMode::LowLatency, SharingMode::Shared);
    let engine = engine_with(&factory);
    engine.start().unwrap();

    let config = engine.active_config().unwrap();
    assert_eq!(config.input.performance_mode, PerformanceMode::None);
    assert_eq!(config.output.sharing_mode, SharingMode::Shared);
}

#[test]
fn test_lifecycle_events_are_published() {
    let factory = StubStreamFactory::new();
    let engine = engine_with(&factory);
    let mut events = engine.subscribe();

    engine.start().unwrap();
    engine.stop();

    let started = events.try_recv().unwrap();
    assert!(matches!(started.kind, EngineEventKind::Started { .. }));
    let stopped = events.try_recv().unwrap();
    assert_eq!(stopped.kind, EngineEventKind::Stopped);
}

#[test]
fn test_drop_releases_streams() {
    let factory = StubStreamFactory::new();
    {
        let engine = engine_with(&factory);
        engine.start().unwrap();
    }
    assert_eq!(factory.open_handles(), 0);
}

#[test]
fn test_host_sized_period_passes_without_loss() {
    let factory = StubStreamFactory::new().coerce_frames_per_callback(960);
    let engine = engine_with(&factory);
    engine.start().unwrap();

    let config = engine.active_config().unwrap();
    assert!(config.ring_capacity_frames >= 1024);

    let channels = config.input.channel_count as usize;
    let captured: Vec<f32> = (0..1024 * channels)
        .map(|i| (i % 100) as f32 / 100.0)
        .collect();
    assert!(factory.push_input(&captured));
    let mut rendered = vec![0.0_f32; captured.len()];
    assert!(factory.pull_output(&mut rendered));
    assert_eq!(rendered, captured);

    let stats = engine.stats();
    assert_eq!(stats.frames_captured, 1024);
    assert_eq!(stats.frames_rendered, 1024);
    assert_eq!(stats.underrun_frames, 0);
    assert_eq!(stats.overrun_frames, 0);
}

#[test]
fn test_start_and_stop_during_teardown_are_noops() {
    let gate = Arc::new(Barrier::new(2));
    let factory = StubStreamFactory::new().hold_next_close(gate.clone());
    let engine = engine_with(&factory);
    engine.start().unwrap();
    let opens = factory.opens();

    std::thread::scope(|scope| {
        let stopper = scope.spawn(|| engine.stop());
        gate.wait();

        assert_eq!(engine.current_state(), EngineState::Stopping);
        assert_eq!(engine.start(), Ok(()));
        engine.stop();
        assert_eq!(engine.current_state(), EngineState::Stopping);
        assert_eq!(factory.opens(), opens);

        gate.wait();
        stopper.join().unwrap();
    });

    assert_eq!(engine.current_state(), EngineState::Idle);
    assert_eq!(factory.opens(), opens);
    assert_eq!(factory.closes(), opens);
    assert_eq!(factory.open_handles(), 0);
}
