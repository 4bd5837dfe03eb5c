//! Capture session: one enrollment attempt driven on the device thread.
//!
//! A [`CaptureSession`] is submitted to the device executor as a
//! [`DeviceTask`]. It starts capture, translates reader events into
//! [`EnrollmentStateMachine`] updates, and publishes every resulting snapshot
//! on a `watch` channel that pollers read without touching the device.
//!
//! Exit guarantees, whatever ends the session:
//!
//! - `stop_capture` is called exactly once after a successful start, also when
//!   the event loop panics.
//! - The [`DeviceToken`] is released before the final snapshot is published,
//!   so a poller that sees a terminal phase can start the next session.
//! - A session dropped before it ran publishes an `internal` failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use scanbridge_core::constants::{
    INSTRUCTION_FINGER_DETECTED, INSTRUCTION_PLACE_AGAIN, INSTRUCTION_POOR_QUALITY,
    INSTRUCTION_RESTART,
};
use scanbridge_core::{
    EnrollmentRequest, FailureKind, Phase, ProgressSnapshot, SessionId, percent_complete,
};
use scanbridge_hardware::executor::panic_message;
use scanbridge_hardware::{
    BuilderError, BuilderStatus, CaptureDevice, CaptureEvent, DeviceTask, FeatureSet, Sample,
    TemplateBuilder,
};

use crate::broker::DeviceToken;
use crate::config::SessionConfig;
use crate::state_machine::EnrollmentStateMachine;

/// Cancellation signal shared between a session and the registry.
#[derive(Debug, Default)]
pub struct SessionControl {
    token: CancellationToken,
    requested: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            requested: AtomicBool::new(false),
        }
    }

    /// Ask the session to cancel. Returns `true` only for the first request.
    pub fn request_cancel(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst) || self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// One in-flight enrollment attempt.
pub struct CaptureSession {
    id: SessionId,
    request: EnrollmentRequest,
    builder: Box<dyn TemplateBuilder>,
    machine: EnrollmentStateMachine,
    publisher: watch::Sender<ProgressSnapshot>,
    control: Arc<SessionControl>,
    token: DeviceToken,
    inactivity_window: Duration,
    pump_interval: Duration,
    max_resets: u32,
    resets: u32,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("phase", &self.machine.phase())
            .field("resets", &self.resets)
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    pub fn new(
        id: SessionId,
        request: EnrollmentRequest,
        builder: Box<dyn TemplateBuilder>,
        token: DeviceToken,
        config: &SessionConfig,
    ) -> Self {
        let machine = EnrollmentStateMachine::new(id.clone());
        let (publisher, _) = watch::channel(machine.snapshot().clone());
        Self {
            id,
            request,
            builder,
            machine,
            publisher,
            control: Arc::new(SessionControl::new()),
            token,
            inactivity_window: config.inactivity_window,
            pump_interval: config.executor.pump_interval,
            max_resets: config.max_builder_resets,
            resets: 0,
        }
    }

    /// Replace the cancellation control with one tied to `parent`.
    ///
    /// Call before handing out [`control`](Self::control).
    #[must_use]
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.control = Arc::new(SessionControl::child_of(parent));
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Receiver of every snapshot this session publishes.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.publisher.subscribe()
    }

    pub fn control(&self) -> Arc<SessionControl> {
        Arc::clone(&self.control)
    }

    async fn drive<D: CaptureDevice>(&mut self, device: &mut D) -> ProgressSnapshot {
        if self.control.is_cancel_requested() {
            self.machine.cancel();
            info!("cancelled before capture started");
            return self.finish();
        }

        self.machine.record_activity();
        if let Err(e) = device.start_capture().await {
            error!(error = %e, "failed to start capture");
            self.machine.fail(FailureKind::Device, e.to_string());
            return self.finish();
        }
        info!(quality_threshold = %self.request.quality_threshold, "capture started");
        self.publish();

        if let Err(payload) = AssertUnwindSafe(self.pump(device)).catch_unwind().await {
            let message = panic_message(payload.as_ref());
            error!(%message, "capture session panicked");
            self.machine
                .fail(FailureKind::Internal, format!("Unexpected error: {message}"));
        }

        if let Err(e) = device.stop_capture().await {
            warn!(error = %e, "failed to stop capture");
        }
        self.finish()
    }

    async fn pump<D: CaptureDevice>(&mut self, device: &mut D) {
        let control = Arc::clone(&self.control);
        while !self.machine.is_terminal() {
            if control.is_cancel_requested() {
                self.machine.cancel();
                info!("capture cancelled");
                break;
            }

            let idle = self.machine.inactive_for();
            if idle >= self.inactivity_window {
                let window_ms = self.inactivity_window.as_millis();
                warn!(window_ms = %window_ms, "no activity within inactivity window");
                self.machine.fail(
                    FailureKind::Timeout,
                    format!("Enrollment timed out after {window_ms}ms without activity"),
                );
                break;
            }
            let tick = self.pump_interval.min(self.inactivity_window - idle);

            tokio::select! {
                biased;
                () = control.cancelled() => {}
                event = device.next_event() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        error!(error = %e, "capture device failed");
                        self.machine.fail(FailureKind::Device, e.to_string());
                    }
                },
                () = tokio::time::sleep(tick) => {}
            }
        }
    }

    fn handle_event(&mut self, event: CaptureEvent) {
        debug!(event = event.kind(), phase = %self.machine.phase(), "device event");
        match event {
            CaptureEvent::FingerTouch => {
                self.machine.record_activity();
                self.begin_scanning();
                self.machine.set_instruction(INSTRUCTION_FINGER_DETECTED);
            }
            CaptureEvent::FingerGone => {
                self.machine.record_activity();
                self.machine.set_instruction(INSTRUCTION_PLACE_AGAIN);
            }
            CaptureEvent::SampleQuality(feedback) => {
                self.machine.record_activity();
                self.machine.set_instruction(feedback.instruction());
            }
            CaptureEvent::SampleCaptured(sample) => self.handle_sample(&sample),
            CaptureEvent::ReaderConnected { serial } => {
                info!(%serial, "reader connected");
            }
            CaptureEvent::ReaderDisconnected { serial } => {
                warn!(%serial, "reader disconnected during capture");
                self.machine
                    .fail(FailureKind::Device, format!("Reader {serial} disconnected"));
            }
            other => debug!(event = other.kind(), "ignoring device event"),
        }
        self.publish();
    }

    fn handle_sample(&mut self, sample: &Sample) {
        self.machine.record_activity();
        if !sample.is_acceptable(self.request.quality_threshold) {
            debug!(quality = sample.quality, feedback = ?sample.feedback, "sample not acceptable");
            let text = if sample.feedback.is_good() {
                INSTRUCTION_POOR_QUALITY
            } else {
                sample.feedback.instruction()
            };
            self.machine.set_instruction(text);
            return;
        }
        self.begin_scanning();

        let features = match FeatureSet::extract(sample) {
            Ok(features) => features,
            Err(e) => {
                debug!(error = %e, "feature extraction failed");
                self.machine.set_instruction(INSTRUCTION_POOR_QUALITY);
                return;
            }
        };
        match self.builder.add_features(&features) {
            Ok(()) => {}
            Err(BuilderError::Rejected(reason)) => {
                debug!(%reason, "builder rejected features");
                self.machine.set_instruction(INSTRUCTION_POOR_QUALITY);
                return;
            }
            Err(BuilderError::Fatal(reason)) => {
                error!(%reason, "template builder failed");
                self.machine.fail(FailureKind::Enrollment, reason);
                return;
            }
        }

        let required = self.builder.required_samples();
        let remaining = self.builder.features_needed();
        match self.builder.status() {
            BuilderStatus::Pending => {
                let percent = percent_complete(required, remaining);
                if let Err(e) = self.machine.record_sample(percent, remaining) {
                    warn!(error = %e, "unexpected phase for accepted sample");
                }
                self.machine.set_instruction(format!(
                    "Lift and place finger again... ({remaining} more)"
                ));
                debug!(percent, remaining, "sample accepted");
            }
            BuilderStatus::Ready => self.build_template(percent_complete(required, remaining)),
            BuilderStatus::Failed => self.restart_or_fail(),
        }
    }

    fn begin_scanning(&mut self) {
        if self.machine.phase() == Phase::Waiting {
            if let Err(e) = self.machine.transition_to(Phase::Scanning) {
                warn!(error = %e, "could not enter scanning");
            }
        }
    }

    fn build_template(&mut self, percent: u8) {
        if let Err(e) = self.machine.record_sample(percent, 0) {
            warn!(error = %e, "unexpected phase for final sample");
        }
        if let Err(e) = self.machine.enter_processing() {
            self.machine.fail(FailureKind::Internal, e.to_string());
            return;
        }
        self.publish();

        match self.builder.serialize() {
            Ok(bytes) if !bytes.is_empty() => {
                let len = bytes.len();
                if let Err(e) = self.machine.complete(Bytes::from(bytes)) {
                    self.machine.fail(FailureKind::Internal, e.to_string());
                    return;
                }
                info!(template_bytes = len, "template ready");
            }
            Ok(_) => {
                self.machine
                    .fail(FailureKind::Enrollment, "Template builder produced an empty template");
            }
            Err(e) => {
                error!(error = %e, "template serialization failed");
                self.machine.fail(FailureKind::Enrollment, e.to_string());
            }
        }
    }

    fn restart_or_fail(&mut self) {
        self.resets += 1;
        if self.resets > self.max_resets {
            warn!(resets = self.max_resets, "samples stayed inconsistent");
            self.machine.fail(
                FailureKind::Enrollment,
                format!("Samples remained inconsistent after {} restarts", self.max_resets),
            );
            return;
        }

        warn!(attempt = self.resets, "inconsistent samples, restarting enrollment");
        self.builder.clear();
        self.machine.reset_progress(self.builder.features_needed());
        self.machine.set_instruction(INSTRUCTION_RESTART);
    }

    /// Publish a progress update. Terminal states wait for [`finish`](Self::finish).
    fn publish(&self) {
        if !self.machine.is_terminal() {
            self.publisher.send_replace(self.machine.snapshot().clone());
        }
    }

    fn publish_final(&mut self) {
        self.token.release();
        self.publisher.send_replace(self.machine.snapshot().clone());
    }

    fn finish(&mut self) -> ProgressSnapshot {
        self.publish_final();
        let snapshot = self.machine.snapshot().clone();
        info!(
            phase = %snapshot.phase,
            percent = snapshot.percent_complete,
            "capture session finished"
        );
        snapshot
    }
}

impl<D: CaptureDevice + 'static> DeviceTask<D> for CaptureSession {
    type Output = ProgressSnapshot;

    async fn run(mut self, device: &mut D) -> ProgressSnapshot {
        let span = info_span!(
            "capture_session",
            session_id = %self.id,
            finger = %self.request.finger
        );
        self.drive(device).instrument(span).await
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if !self.machine.is_terminal() {
            warn!(session_id = %self.id, "capture session dropped before completion");
            self.machine.fail(
                FailureKind::Internal,
                "Capture session stopped before completion",
            );
            self.publish_final();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DeviceBroker;
    use scanbridge_core::constants::INSTRUCTION_CANCELLED;
    use scanbridge_hardware::CaptureFeedback;
    use scanbridge_hardware::mock::{
        MOCK_TEMPLATE_MAGIC, MockCaptureDevice, MockCaptureHandle, MockTemplateBuilder,
    };

    fn config() -> SessionConfig {
        SessionConfig::default().with_inactivity_window(Duration::from_millis(200))
    }

    fn session(broker: &DeviceBroker, builder: MockTemplateBuilder) -> CaptureSession {
        let id = SessionId::new();
        let token = broker.try_acquire(&id).unwrap();
        CaptureSession::new(
            id,
            EnrollmentRequest::default(),
            Box::new(builder),
            token,
            &config(),
        )
    }

    async fn run(session: CaptureSession, reader: &mut MockCaptureDevice) -> ProgressSnapshot {
        DeviceTask::<MockCaptureDevice>::run(session, reader).await
    }

    async fn feed_good(handle: &MockCaptureHandle, count: usize) {
        for _ in 0..count {
            handle.touch().await.unwrap();
            handle.good_sample(90).await.unwrap();
            handle.lift().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_completes_with_template() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(2));
        let rx = session.subscribe();

        feed_good(&handle, 2).await;
        let last = run(session, &mut reader).await;

        assert_eq!(last.phase, Phase::Done);
        assert_eq!(last.percent_complete, 100);
        let template = last.template.clone().unwrap();
        assert!(template.starts_with(MOCK_TEMPLATE_MAGIC));
        assert_eq!(*rx.borrow(), last);
        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_poor_samples_do_not_advance() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(1));
        let mut rx = session.subscribe();
        let control = session.control();

        let user = async {
            handle.touch().await.unwrap();
            handle.good_sample(10).await.unwrap();
            handle.poor_sample(95, CaptureFeedback::Partial).await.unwrap();
            rx.wait_for(|s| s.instruction == CaptureFeedback::Partial.instruction())
                .await
                .unwrap();
            assert_eq!(rx.borrow().percent_complete, 0);
            assert_eq!(rx.borrow().phase, Phase::Scanning);
            control.request_cancel();
        };
        let (last, ()) = tokio::join!(run(session, &mut reader), user);

        assert_eq!(last.phase, Phase::Cancelled);
        assert_eq!(last.instruction, INSTRUCTION_CANCELLED);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_device() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(4));
        assert!(session.control().request_cancel());
        assert!(!session.control().request_cancel());

        let last = run(session, &mut reader).await;
        assert_eq!(last.phase, Phase::Cancelled);
        assert!(last.cancel_requested);
        assert_eq!(handle.start_count(), 0);
        assert_eq!(handle.stop_count(), 0);
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_parent_token_cancels_session() {
        let broker = DeviceBroker::new();
        let parent = CancellationToken::new();
        let session = session(&broker, MockTemplateBuilder::new(4)).with_parent_token(&parent);
        let control = session.control();

        parent.cancel();
        assert!(control.is_cancel_requested());
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_activity() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(4));

        let last = run(session, &mut reader).await;
        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.failure, Some(FailureKind::Timeout));
        assert!(last.error_detail.unwrap().contains("timed out"));
        assert_eq!(handle.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_fails_without_stop() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        handle.fail_next_start();
        let session = session(&broker, MockTemplateBuilder::new(4));

        let last = run(session, &mut reader).await;
        assert_eq!(last.failure, Some(FailureKind::Device));
        assert_eq!(handle.start_count(), 0);
        assert_eq!(handle.stop_count(), 0);
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_panic_fails_internal_and_stops() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(4));

        handle.touch().await.unwrap();
        handle.panic_next_event("driver callback blew up").await.unwrap();
        let last = run(session, &mut reader).await;

        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.failure, Some(FailureKind::Internal));
        assert!(last.error_detail.unwrap().contains("driver callback blew up"));
        assert_eq!(handle.stop_count(), 1);
        assert!(!broker.is_held());
    }

    /// Run `session` against a reader whose stop takes a while, and check the
    /// device is free by the time a poller sees `expected`.
    async fn terminal_seen_after_release(
        broker: &DeviceBroker,
        session: CaptureSession,
        reader: &mut MockCaptureDevice,
        expected: Phase,
    ) -> ProgressSnapshot {
        let mut rx = session.subscribe();
        let poller = async {
            let seen = rx.wait_for(|s| s.is_terminal()).await.unwrap().clone();
            assert_eq!(seen.phase, expected);
            assert!(!broker.is_held());
            let next = SessionId::new();
            let mut token = broker.try_acquire(&next).unwrap();
            token.release();
            seen
        };
        let (last, seen) = tokio::join!(run(session, reader), poller);
        assert_eq!(last, seen);
        last
    }

    #[tokio::test]
    async fn test_done_is_published_after_device_release() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        handle.delay_stop(Duration::from_millis(50));
        let session = session(&broker, MockTemplateBuilder::new(4));

        feed_good(&handle, 4).await;
        let last = terminal_seen_after_release(&broker, session, &mut reader, Phase::Done).await;
        assert!(last.template.is_some());
        assert_eq!(handle.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_failure_is_published_after_device_release() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        handle.delay_stop(Duration::from_millis(50));
        let session = session(&broker, MockTemplateBuilder::new(4));

        handle.touch().await.unwrap();
        handle.disconnect().await.unwrap();
        let last = terminal_seen_after_release(&broker, session, &mut reader, Phase::Failed).await;
        assert_eq!(last.failure, Some(FailureKind::Device));
        assert_eq!(handle.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_serialization_failure_fails_enrollment() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(2).with_failing_serialize());

        feed_good(&handle, 2).await;
        let last = run(session, &mut reader).await;

        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.failure, Some(FailureKind::Enrollment));
        assert!(last.error_detail.unwrap().contains("serialization"));
        assert!(last.template.is_none());
        assert_eq!(handle.stop_count(), 1);
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_reader_error_fails_device() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        let session = session(&broker, MockTemplateBuilder::new(4));

        handle.touch().await.unwrap();
        handle.fail_next_event("usb reset").await.unwrap();
        let last = run(session, &mut reader).await;

        assert_eq!(last.phase, Phase::Failed);
        assert_eq!(last.failure, Some(FailureKind::Device));
        assert_eq!(last.error_detail.as_deref(), Some("usb reset"));
        assert_eq!(handle.stop_count(), 1);
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_stop_error_keeps_outcome() {
        let broker = DeviceBroker::new();
        let (mut reader, handle) = MockCaptureDevice::new();
        handle.fail_next_stop();
        let session = session(&broker, MockTemplateBuilder::new(1));

        feed_good(&handle, 1).await;
        let last = run(session, &mut reader).await;

        assert_eq!(last.phase, Phase::Done);
        assert_eq!(handle.stop_count(), 1);
        assert!(!handle.is_capturing());
        assert!(!broker.is_held());
    }

    #[tokio::test]
    async fn test_dropped_session_publishes_failure() {
        let broker = DeviceBroker::new();
        let session = session(&broker, MockTemplateBuilder::new(4));
        let rx = session.subscribe();

        drop(session);
        assert_eq!(rx.borrow().failure, Some(FailureKind::Internal));
        assert!(!broker.is_held());
    }
}
