//! Session registry.
//!
//! The registry is the surface a transport layer talks to. It validates
//! requests, takes the device through the [`DeviceBroker`], submits a
//! [`CaptureSession`] to the device executor and keeps the receiving end of
//! its snapshot channel in a concurrent map. Polls read the latest published
//! snapshot and never wait on the device.
//!
//! # Examples
//!
//! ```no_run
//! use scanbridge_session::{SessionConfig, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> scanbridge_core::Result<()> {
//!     let (registry, reader) = SessionRegistry::with_mock(SessionConfig::default())?;
//!
//!     let id = registry.create("index", 60)?;
//!     for _ in 0..4 {
//!         reader.touch().await?;
//!         reader.good_sample(90).await?;
//!     }
//!     // ... poll `registry.get(&id)` until `done`, then:
//!     let template = registry.finish(&id)?;
//!     println!("{} template bytes", template.len());
//!
//!     registry.shutdown().await
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scanbridge_core::constants::{DEFAULT_REQUIRED_SAMPLES, INSTRUCTION_NO_UPDATES};
use scanbridge_core::{
    EnrollmentRequest, Error, FailureKind, Phase, ProgressSnapshot, Result, SessionId,
};
use scanbridge_hardware::mock::{MockCaptureDevice, MockCaptureHandle, MockTemplateBuilder};
use scanbridge_hardware::{
    AnyCaptureDevice, DeviceExecutor, DeviceInfo, ExecutorHandle, ExecutorStats, QueryDeviceInfo,
    TemplateBuilder,
};

use crate::broker::{DeviceBroker, DeviceToken};
use crate::config::{SessionConfig, UnknownSessionPolicy};
use crate::session::{CaptureSession, SessionControl};

/// Creates a fresh template builder for each session.
pub type BuilderFactory = Arc<dyn Fn(&EnrollmentRequest) -> Box<dyn TemplateBuilder> + Send + Sync>;

#[derive(Debug, Clone)]
struct SessionEntry {
    snapshot: watch::Receiver<ProgressSnapshot>,
    control: Arc<SessionControl>,
}

impl SessionEntry {
    /// Latest snapshot, with a pending cancel request already visible.
    fn current(&self) -> ProgressSnapshot {
        let mut snapshot = self.snapshot.borrow().clone();
        if !snapshot.is_terminal() {
            snapshot.cancel_requested |= self.control.is_cancel_requested();
        }
        snapshot
    }
}

struct RegistryInner {
    sessions: DashMap<SessionId, SessionEntry>,
    /// Ids whose template was handed out, kept until the next sweep past the
    /// eviction cutoff.
    consumed: DashMap<SessionId, Instant>,
    broker: DeviceBroker,
    executor: Arc<DeviceExecutor<AnyCaptureDevice>>,
    handle: ExecutorHandle<AnyCaptureDevice>,
    builders: BuilderFactory,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl RegistryInner {
    fn sweep(&self) -> usize {
        let cutoff = self.config.eviction_cutoff();
        let now = Utc::now();
        let mut evicted = 0;

        self.sessions.retain(|id, entry| {
            let (updated_at, terminal) = {
                let snapshot = entry.snapshot.borrow();
                (snapshot.updated_at, snapshot.is_terminal())
            };
            let age = (now - updated_at).to_std().unwrap_or_default();
            if age <= cutoff {
                return true;
            }
            if terminal {
                debug!(session_id = %id, "evicting finished session");
            } else {
                warn!(session_id = %id, age_ms = age.as_millis() as u64, "evicting stale session");
                entry.control.request_cancel();
            }
            evicted += 1;
            false
        });
        self.consumed.retain(|_, at| at.elapsed() <= cutoff);

        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "session sweep");
        }
        evicted
    }
}

/// Concurrent registry of capture sessions bound to one device.
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.inner.sessions.len())
            .field("active", &self.inner.broker.holder())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Start the device executor for `device` and build a registry on top.
    ///
    /// Inside a Tokio runtime the eviction sweep starts right away. A registry
    /// built outside one must call [`spawn_eviction`](Self::spawn_eviction)
    /// once a runtime is available, or stale sessions are never removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration and
    /// `Error::DeviceFailure` if the device thread cannot start.
    pub fn new(
        device: impl Into<AnyCaptureDevice>,
        builders: BuilderFactory,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(DeviceExecutor::new(device.into(), config.executor.clone()));
        let handle = executor.start()?;

        let registry = Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                consumed: DashMap::new(),
                broker: DeviceBroker::new(),
                executor,
                handle,
                builders,
                config,
                shutdown: CancellationToken::new(),
            }),
            sweeper: Mutex::new(None),
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            registry.spawn_eviction();
        }
        Ok(registry)
    }

    /// Registry over a mock reader and mock builders.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_mock(config: SessionConfig) -> Result<(Self, MockCaptureHandle)> {
        let (reader, handle) = MockCaptureDevice::new();
        let builders: BuilderFactory = Arc::new(|_: &EnrollmentRequest| -> Box<dyn TemplateBuilder> {
            Box::new(MockTemplateBuilder::new(DEFAULT_REQUIRED_SAMPLES))
        });
        let registry = Self::new(reader, builders, config)?;
        Ok((registry, handle))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Validate the request and start a session without waiting for capture.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad finger or threshold, and
    /// `Error::DeviceBusy` if another session holds the device.
    pub fn create(&self, finger: &str, quality_threshold: i32) -> Result<SessionId> {
        let request = EnrollmentRequest::parse(finger, quality_threshold)?;
        let id = SessionId::new();
        let token = self.inner.broker.try_acquire(&id)?;
        self.launch(id.clone(), request, token)?;
        Ok(id)
    }

    fn launch(
        &self,
        id: SessionId,
        request: EnrollmentRequest,
        token: DeviceToken,
    ) -> Result<watch::Receiver<ProgressSnapshot>> {
        let builder = (self.inner.builders)(&request);
        let session = CaptureSession::new(id.clone(), request, builder, token, &self.inner.config)
            .with_parent_token(&self.inner.shutdown);
        let entry = SessionEntry {
            snapshot: session.subscribe(),
            control: session.control(),
        };
        let snapshot = entry.snapshot.clone();
        self.inner.sessions.insert(id.clone(), entry);

        match self.inner.handle.submit(session) {
            Ok(job) => {
                // Progress is observed through the snapshot channel.
                drop(job);
                info!(session_id = %id, finger = %request.finger, "session created");
                Ok(snapshot)
            }
            Err(e) => {
                self.inner.sessions.remove(&id);
                Err(e.into())
            }
        }
    }

    /// Latest snapshot of a session.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionNotFound` for unknown ids unless the registry
    /// is configured with [`UnknownSessionPolicy::ReportWaiting`].
    pub fn get(&self, id: &SessionId) -> Result<ProgressSnapshot> {
        if let Some(entry) = self.inner.sessions.get(id) {
            return Ok(entry.current());
        }
        match self.inner.config.unknown_session {
            UnknownSessionPolicy::NotFound => Err(Error::SessionNotFound(id.clone())),
            UnknownSessionPolicy::ReportWaiting => {
                let mut snapshot = ProgressSnapshot::waiting(id.clone());
                snapshot.instruction = INSTRUCTION_NO_UPDATES.to_string();
                Ok(snapshot)
            }
        }
    }

    /// Signal cancellation. Returns `true` if a live session was signalled
    /// by this call.
    pub fn cancel(&self, id: &SessionId) -> bool {
        let Some(entry) = self.inner.sessions.get(id).map(|entry| entry.value().clone()) else {
            return false;
        };
        if entry.snapshot.borrow().is_terminal() {
            return false;
        }
        let signalled = entry.control.request_cancel();
        if signalled {
            info!(session_id = %id, "cancellation requested");
        }
        signalled
    }

    /// Take the template of a completed session and remove the session.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotReady` before the session is done,
    /// `Error::AlreadyConsumed` if the template was already taken and
    /// `Error::SessionNotFound` for unknown ids.
    pub fn finish(&self, id: &SessionId) -> Result<Bytes> {
        let removed = self
            .inner
            .sessions
            .remove_if(id, |_, entry| entry.snapshot.borrow().is_done());
        if let Some((_, entry)) = removed {
            self.inner.consumed.insert(id.clone(), Instant::now());
            let snapshot = entry.snapshot.borrow().clone();
            info!(session_id = %id, "template consumed");
            return snapshot.template.ok_or(Error::NotReady {
                session_id: id.clone(),
                phase: snapshot.phase,
            });
        }

        if self.inner.consumed.contains_key(id) {
            return Err(Error::AlreadyConsumed(id.clone()));
        }
        match self.inner.sessions.get(id) {
            Some(entry) => Err(Error::NotReady {
                session_id: id.clone(),
                phase: entry.snapshot.borrow().phase,
            }),
            None => Err(Error::SessionNotFound(id.clone())),
        }
    }

    /// Remove stale sessions now. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Start the periodic eviction sweep if it is not running. Needs a Tokio
    /// runtime.
    pub fn spawn_eviction(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep();
                    }
                }
            }
            debug!("eviction sweep stopped");
        }));
    }

    /// Run a whole enrollment and return the template.
    ///
    /// Waits up to the configured broker wait for the device, then up to
    /// `timeout` for the session to finish.
    ///
    /// # Errors
    ///
    /// Returns the error matching the session outcome: `DeviceBusy`,
    /// `Timeout`, `Cancelled`, `DeviceFailure` or `EnrollmentFailed`.
    pub async fn enroll(
        &self,
        finger: &str,
        quality_threshold: i32,
        timeout: Duration,
    ) -> Result<Bytes> {
        let request = EnrollmentRequest::parse(finger, quality_threshold)?;
        let id = SessionId::new();
        let token = self
            .inner
            .broker
            .acquire(&id, self.inner.config.broker_wait)
            .await?;
        let mut snapshots = self.launch(id.clone(), request, token)?;

        let outcome = tokio::time::timeout(
            timeout,
            snapshots.wait_for(ProgressSnapshot::is_terminal),
        )
        .await;
        let last = match outcome {
            Ok(Ok(snapshot)) => snapshot.clone(),
            Ok(Err(_)) => {
                self.inner.sessions.remove(&id);
                return Err(Error::DeviceFailure(
                    "session ended without a result".to_string(),
                ));
            }
            Err(_) => {
                warn!(session_id = %id, timeout_ms = timeout.as_millis() as u64, "enroll timed out");
                self.cancel(&id);
                self.inner.sessions.remove(&id);
                return Err(Error::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                });
            }
        };

        match last.phase {
            Phase::Done => self.finish(&id),
            Phase::Cancelled => {
                self.inner.sessions.remove(&id);
                Err(Error::Cancelled)
            }
            _ => {
                self.inner.sessions.remove(&id);
                let detail = last.error_detail.unwrap_or_default();
                Err(match last.failure {
                    Some(FailureKind::Timeout) => Error::Timeout {
                        duration_ms: self.inner.config.inactivity_window.as_millis() as u64,
                    },
                    Some(FailureKind::Enrollment) => Error::EnrollmentFailed(detail),
                    Some(FailureKind::Device | FailureKind::Internal) | None => {
                        Error::DeviceFailure(detail)
                    }
                })
            }
        }
    }

    /// Query the reader on the device thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceFailure` if the reader cannot be queried.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.inner.handle.submit(QueryDeviceInfo)?.wait().await??)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Session currently holding the device.
    pub fn active_session(&self) -> Option<SessionId> {
        self.inner.broker.holder()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.inner.handle.stats()
    }

    /// Cancel every session, stop the sweep and join the device thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceFailure` if the device thread panicked.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        let executor = Arc::clone(&self.inner.executor);
        tokio::task::spawn_blocking(move || executor.shutdown())
            .await
            .map_err(|e| Error::DeviceFailure(format!("executor shutdown task failed: {e}")))??;
        info!("session registry stopped");
        Ok(())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanbridge_hardware::ExecutorConfig;

    fn config() -> SessionConfig {
        SessionConfig::default().with_executor(
            ExecutorConfig::default()
                .with_thread_name("registry-test")
                .with_pump_interval(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_rejects_invalid_request_before_device() {
        let (registry, _reader) = SessionRegistry::with_mock(config()).unwrap();

        let err = registry.create("elbow", 60).unwrap_err();
        assert!(err.is_validation());
        let err = registry.create("index", 101).unwrap_err();
        assert!(err.is_validation());

        assert!(registry.is_empty());
        assert_eq!(registry.active_session(), None);
        assert_eq!(registry.executor_stats().jobs_submitted, 0);
        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_eviction_starts_with_registry() {
        let (registry, _reader) = SessionRegistry::with_mock(config()).unwrap();
        assert!(registry.sweeper.lock().unwrap().is_some());
        registry.shutdown().await.unwrap();
    }

    #[test]
    fn test_eviction_deferred_outside_runtime() {
        let (registry, _reader) = SessionRegistry::with_mock(config()).unwrap();
        assert!(registry.sweeper.lock().unwrap().is_none());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            registry.spawn_eviction();
            assert!(registry.sweeper.lock().unwrap().is_some());
            registry.shutdown().await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = config().with_broker_wait(Duration::ZERO);
        assert!(matches!(
            SessionRegistry::with_mock(config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_policies() {
        let (registry, _reader) = SessionRegistry::with_mock(config()).unwrap();
        let id = SessionId::from("missing");
        assert!(matches!(registry.get(&id), Err(Error::SessionNotFound(_))));
        assert!(!registry.cancel(&id));
        assert!(matches!(registry.finish(&id), Err(Error::SessionNotFound(_))));
        registry.shutdown().await.unwrap();

        let config = config().with_unknown_session(UnknownSessionPolicy::ReportWaiting);
        let (registry, _reader) = SessionRegistry::with_mock(config).unwrap();
        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.phase, Phase::Waiting);
        assert_eq!(snapshot.instruction, INSTRUCTION_NO_UPDATES);
        assert_eq!(snapshot.session_id, id);
        registry.shutdown().await.unwrap();
    }
}
