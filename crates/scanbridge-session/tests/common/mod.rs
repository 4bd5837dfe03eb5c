//! Common test utilities for session integration tests.
//!
//! Every test builds its own registry over a mock reader with short timings
//! and plays the user through the [`MockCaptureHandle`]. Helpers poll the
//! registry the way a transport client would instead of peeking at session
//! internals.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scanbridge_core::{EnrollmentRequest, Phase, ProgressSnapshot, SessionId};
use scanbridge_hardware::mock::{MockCaptureDevice, MockCaptureHandle, MockTemplateBuilder};
use scanbridge_hardware::{ExecutorConfig, TemplateBuilder};
use scanbridge_session::{BuilderFactory, SessionConfig, SessionRegistry};

/// Inactivity window used by [`fast_config`].
pub const WINDOW: Duration = Duration::from_millis(300);

/// Upper bound for any single wait in these tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(3);

/// Short timings so timeouts and eviction fit in a test run.
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_inactivity_window(WINDOW)
        .with_eviction_grace(Duration::from_millis(100))
        .with_sweep_interval(Duration::from_millis(50))
        .with_broker_wait(Duration::from_millis(300))
        .with_executor(
            ExecutorConfig::default()
                .with_thread_name("test-device")
                .with_pump_interval(Duration::from_millis(10)),
        )
}

pub fn registry() -> (SessionRegistry, MockCaptureHandle) {
    registry_with(fast_config())
}

pub fn registry_with(config: SessionConfig) -> (SessionRegistry, MockCaptureHandle) {
    SessionRegistry::with_mock(config).expect("registry should start")
}

/// Registry whose sessions use `make` for their template builders.
pub fn registry_with_builder(
    make: fn() -> MockTemplateBuilder,
) -> (SessionRegistry, MockCaptureHandle) {
    let (reader, handle) = MockCaptureDevice::new();
    let builders: BuilderFactory =
        Arc::new(move |_: &EnrollmentRequest| -> Box<dyn TemplateBuilder> { Box::new(make()) });
    let registry =
        SessionRegistry::new(reader, builders, fast_config()).expect("registry should start");
    (registry, handle)
}

/// Poll until the session reports `phase`.
pub async fn wait_for_phase(
    registry: &SessionRegistry,
    id: &SessionId,
    phase: Phase,
) -> ProgressSnapshot {
    wait_for_snapshot(registry, id, |snapshot| snapshot.phase == phase).await
}

/// Poll until `condition` holds for the session's snapshot.
pub async fn wait_for_snapshot(
    registry: &SessionRegistry,
    id: &SessionId,
    mut condition: impl FnMut(&ProgressSnapshot) -> bool,
) -> ProgressSnapshot {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let snapshot = registry.get(id).expect("session should exist");
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until a session has started capture on the reader.
pub async fn wait_until_capturing(reader: &MockCaptureHandle) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !reader.is_capturing() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "reader never started capturing"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// One full touch, good sample and lift.
pub async fn place_finger(reader: &MockCaptureHandle, quality: u8) {
    reader.touch().await.unwrap();
    reader.good_sample(quality).await.unwrap();
    reader.lift().await.unwrap();
}

pub async fn place_finger_times(reader: &MockCaptureHandle, times: usize) {
    for _ in 0..times {
        place_finger(reader, 90).await;
    }
}

/// Wait until no session holds the device.
pub async fn wait_until_released(registry: &SessionRegistry) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while let Some(holder) = registry.active_session() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "device still held by {holder}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
