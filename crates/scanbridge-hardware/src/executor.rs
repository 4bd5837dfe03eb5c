//! Single-owner device executor.
//!
//! The reader driver must be driven from one thread only, and its event queue
//! must be serviced even when nobody is enrolling. [`DeviceExecutor`] owns the
//! device on a dedicated OS thread running a current-thread Tokio runtime.
//! Work is submitted as [`DeviceTask`]s over a channel and runs with exclusive
//! `&mut` access to the device; between tasks the executor drains and logs
//! whatever the reader emits.
//!
//! # Architecture
//!
//! ```text
//!  callers (any thread)              device thread
//! ┌──────────────────┐  Command   ┌──────────────────────────────┐
//! │ ExecutorHandle   │──────────► │ select! (biased)             │
//! │  submit(task)    │  (mpsc)    │   ├─ next command ─► run task │
//! │                  │◄───────────│   └─ idle event  ─► discard  │
//! │ JobHandle::wait  │  oneshot   └──────────────────────────────┘
//! └──────────────────┘
//! ```
//!
//! A panicking task is caught and reported to its caller as
//! [`HardwareError::TaskPanicked`]; the executor keeps serving later tasks.
//!
//! # Examples
//!
//! ```no_run
//! use scanbridge_hardware::executor::{DeviceExecutor, ExecutorConfig, QueryDeviceInfo};
//! use scanbridge_hardware::mock::MockCaptureDevice;
//!
//! #[tokio::main]
//! async fn main() -> scanbridge_hardware::Result<()> {
//!     let (reader, _handle) = MockCaptureDevice::new();
//!     let executor = DeviceExecutor::new(reader, ExecutorConfig::default());
//!
//!     let handle = executor.start()?;
//!     let info = handle.submit(QueryDeviceInfo)?.wait().await??;
//!     println!("Reader: {}", info.name);
//!
//!     executor.shutdown()
//! }
//! ```

#![allow(async_fn_in_trait)]

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use scanbridge_core::constants::DEFAULT_PUMP_INTERVAL_MS;

use crate::error::{HardwareError, Result};
use crate::traits::CaptureDevice;
use crate::types::{CaptureEvent, DeviceInfo};

/// Default name of the executor thread.
pub const DEFAULT_THREAD_NAME: &str = "scanbridge-device";

/// A unit of work run on the device thread with exclusive device access.
///
/// The returned future runs on a single-threaded runtime and need not be
/// `Send`; the task value itself must be, since it crosses into the device
/// thread.
pub trait DeviceTask<D>: Send + 'static {
    type Output: Send + 'static;

    async fn run(self, device: &mut D) -> Self::Output;
}

/// Adapter running a synchronous closure as a [`DeviceTask`].
pub struct FnTask<F>(pub F);

impl<D, F, R> DeviceTask<D> for FnTask<F>
where
    F: FnOnce(&mut D) -> R + Send + 'static,
    R: Send + 'static,
{
    type Output = R;

    async fn run(self, device: &mut D) -> R {
        (self.0)(device)
    }
}

/// Queries [`CaptureDevice::device_info`] on the device thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryDeviceInfo;

impl<D: CaptureDevice> DeviceTask<D> for QueryDeviceInfo {
    type Output = Result<DeviceInfo>;

    async fn run(self, device: &mut D) -> Self::Output {
        device.device_info().await
    }
}

/// Configuration for the device executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Name of the dedicated OS thread.
    pub thread_name: String,

    /// Back-off after a failed idle poll, and the tick at which sessions
    /// re-check cancellation and timeouts.
    pub pump_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            pump_interval: Duration::from_millis(DEFAULT_PUMP_INTERVAL_MS),
        }
    }
}

impl ExecutorConfig {
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_pump_interval(mut self, interval: Duration) -> Self {
        self.pump_interval = interval;
        self
    }
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub idle_events_discarded: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_panicked: AtomicU64,
    idle_events: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            idle_events_discarded: self.idle_events.load(Ordering::Relaxed),
        }
    }
}

/// How a job left the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobTermination {
    Completed,
    Panicked,
}

trait ErasedJob<D>: Send {
    fn run<'a>(self: Box<Self>, device: &'a mut D) -> LocalBoxFuture<'a, JobTermination>;
}

struct Job<D, T: DeviceTask<D>> {
    task: T,
    reply: oneshot::Sender<Result<T::Output>>,
    _device: PhantomData<fn(&mut D)>,
}

impl<D: 'static, T: DeviceTask<D>> ErasedJob<D> for Job<D, T> {
    fn run<'a>(self: Box<Self>, device: &'a mut D) -> LocalBoxFuture<'a, JobTermination> {
        let Job { task, reply, .. } = *self;
        async move {
            let (termination, result) = match AssertUnwindSafe(task.run(device)).catch_unwind().await {
                Ok(output) => (JobTermination::Completed, Ok(output)),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(%message, "device work unit panicked");
                    (
                        JobTermination::Panicked,
                        Err(HardwareError::task_panicked(message)),
                    )
                }
            };
            // The caller may have stopped waiting.
            let _ = reply.send(result);
            termination
        }
        .boxed_local()
    }
}

enum Command<D> {
    Run(Box<dyn ErasedJob<D>>),
    Shutdown,
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Cloneable submission handle for a running executor.
pub struct ExecutorHandle<D> {
    commands: mpsc::UnboundedSender<Command<D>>,
    stats: Arc<StatCounters>,
}

impl<D> Clone for ExecutorHandle<D> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<D> std::fmt::Debug for ExecutorHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl<D: 'static> ExecutorHandle<D> {
    /// Schedule a task on the device thread.
    ///
    /// Submitted tasks run one at a time in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::ExecutorUnavailable`] if the executor has shut
    /// down.
    pub fn submit<T: DeviceTask<D>>(&self, task: T) -> Result<JobHandle<T::Output>> {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            task,
            reply,
            _device: PhantomData,
        };
        self.commands
            .send(Command::Run(Box::new(job)))
            .map_err(|_| HardwareError::executor_unavailable("executor has shut down"))?;
        self.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(JobHandle { rx })
    }

    /// Schedule a synchronous closure on the device thread.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn submit_fn<F, R>(&self, f: F) -> Result<JobHandle<R>>
    where
        F: FnOnce(&mut D) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(FnTask(f))
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    /// Whether the executor has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Completion handle for a submitted task.
#[must_use = "a job handle does nothing unless waited on"]
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Wait for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::TaskPanicked`] if the task panicked, or
    /// [`HardwareError::ExecutorUnavailable`] if the executor shut down
    /// before running it.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(dropped_job()),
        }
    }
}

fn dropped_job() -> HardwareError {
    HardwareError::executor_unavailable("executor stopped before the task completed")
}

enum ExecutorState<D> {
    Idle(D),
    Running {
        handle: ExecutorHandle<D>,
        thread: JoinHandle<()>,
    },
    Stopped,
}

/// Owner of the device thread.
///
/// Created with the device it will own; nothing runs until
/// [`start`](Self::start).
pub struct DeviceExecutor<D> {
    config: ExecutorConfig,
    state: Mutex<ExecutorState<D>>,
    stats: Arc<StatCounters>,
}

impl<D: CaptureDevice + 'static> DeviceExecutor<D> {
    pub fn new(device: D, config: ExecutorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ExecutorState::Idle(device)),
            stats: Arc::new(StatCounters::default()),
        }
    }

    /// Start the device thread, or return the handle of the running one.
    ///
    /// Blocks until the thread has built its runtime, so a returned handle is
    /// always backed by a live executor.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::ExecutorUnavailable`] if the thread cannot be
    /// spawned, its runtime fails to build, or the executor was shut down.
    pub fn start(&self) -> Result<ExecutorHandle<D>> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, ExecutorState::Stopped) {
            ExecutorState::Running { handle, thread } => {
                let existing = handle.clone();
                *state = ExecutorState::Running { handle, thread };
                Ok(existing)
            }
            ExecutorState::Stopped => Err(HardwareError::executor_unavailable(
                "executor has been shut down",
            )),
            ExecutorState::Idle(device) => {
                let (commands, rx) = mpsc::unbounded_channel();
                let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
                let stats = Arc::clone(&self.stats);
                let pump_interval = self.config.pump_interval;

                let thread = std::thread::Builder::new()
                    .name(self.config.thread_name.clone())
                    .spawn(move || worker_main(device, rx, ready_tx, stats, pump_interval))
                    .map_err(|e| {
                        HardwareError::executor_unavailable(format!("failed to spawn thread: {e}"))
                    })?;

                let ready = ready_rx.recv().unwrap_or_else(|_| {
                    Err(HardwareError::executor_unavailable(
                        "device thread exited before reporting readiness",
                    ))
                });
                if let Err(e) = ready {
                    let _ = thread.join();
                    return Err(e);
                }

                let handle = ExecutorHandle {
                    commands,
                    stats: Arc::clone(&self.stats),
                };
                info!(thread = %self.config.thread_name, "device executor started");
                *state = ExecutorState::Running {
                    handle: handle.clone(),
                    thread,
                };
                Ok(handle)
            }
        }
    }
}

impl<D> DeviceExecutor<D> {
    fn lock_state(&self) -> MutexGuard<'_, ExecutorState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), ExecutorState::Running { .. })
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    /// Stop the device thread and wait for it to exit.
    ///
    /// The task currently running, if any, finishes first; tasks still queued
    /// are dropped and their callers see `ExecutorUnavailable`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::TaskPanicked`] if the device thread itself
    /// panicked.
    pub fn shutdown(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock_state(), ExecutorState::Stopped);
        match previous {
            ExecutorState::Running { handle, thread } => {
                let _ = handle.commands.send(Command::Shutdown);
                drop(handle);
                thread
                    .join()
                    .map_err(|_| HardwareError::task_panicked("device thread panicked"))?;
                info!("device executor stopped");
                Ok(())
            }
            ExecutorState::Idle(_) | ExecutorState::Stopped => Ok(()),
        }
    }
}

impl<D> Drop for DeviceExecutor<D> {
    fn drop(&mut self) {
        if let ExecutorState::Running { handle, .. } = &*self.lock_state() {
            let _ = handle.commands.send(Command::Shutdown);
        }
    }
}

fn worker_main<D: CaptureDevice + 'static>(
    mut device: D,
    mut commands: mpsc::UnboundedReceiver<Command<D>>,
    ready: std::sync::mpsc::SyncSender<Result<()>>,
    stats: Arc<StatCounters>,
    pump_interval: Duration,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(HardwareError::executor_unavailable(format!(
                "failed to build runtime: {e}"
            ))));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    runtime.block_on(pump(&mut device, &mut commands, &stats, pump_interval));
    debug!("device executor loop exited");
}

enum Step<D> {
    Command(Option<Command<D>>),
    Event(std::thread::Result<Result<CaptureEvent>>),
}

async fn pump<D: CaptureDevice + 'static>(
    device: &mut D,
    commands: &mut mpsc::UnboundedReceiver<Command<D>>,
    stats: &StatCounters,
    pump_interval: Duration,
) {
    loop {
        let step = tokio::select! {
            biased;
            command = commands.recv() => Step::Command(command),
            event = AssertUnwindSafe(device.next_event()).catch_unwind() => Step::Event(event),
        };

        match step {
            Step::Command(Some(Command::Run(job))) => match job.run(device).await {
                JobTermination::Completed => {
                    stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
                }
                JobTermination::Panicked => {
                    stats.jobs_panicked.fetch_add(1, Ordering::Relaxed);
                }
            },
            Step::Command(Some(Command::Shutdown) | None) => break,
            Step::Event(Ok(Ok(event))) => {
                stats.idle_events.fetch_add(1, Ordering::Relaxed);
                match &event {
                    CaptureEvent::ReaderConnected { serial } => {
                        info!(%serial, "reader connected");
                    }
                    CaptureEvent::ReaderDisconnected { serial } => {
                        warn!(%serial, "reader disconnected");
                    }
                    other => debug!(event = other.kind(), "discarding idle device event"),
                }
            }
            Step::Event(Ok(Err(e))) => {
                debug!(error = %e, "idle device poll failed");
                tokio::time::sleep(pump_interval).await;
            }
            Step::Event(Err(payload)) => {
                stats.idle_events.fetch_add(1, Ordering::Relaxed);
                error!(message = %panic_message(payload.as_ref()), "device panicked while idle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCaptureDevice;

    fn executor() -> (DeviceExecutor<MockCaptureDevice>, crate::mock::MockCaptureHandle) {
        let (reader, handle) = MockCaptureDevice::new();
        let config = ExecutorConfig::default()
            .with_thread_name("test-device")
            .with_pump_interval(Duration::from_millis(10));
        (DeviceExecutor::new(reader, config), handle)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
        assert_eq!(config.pump_interval, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (executor, _reader) = executor();
        let first = executor.start().unwrap();
        let second = executor.start().unwrap();

        let a = first
            .submit_fn(|_| std::thread::current().id())
            .unwrap()
            .wait()
            .await
            .unwrap();
        let b = second
            .submit_fn(|_| std::thread::current().id())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, std::thread::current().id());

        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_tasks_run_on_named_thread() {
        let (executor, _reader) = executor();
        let handle = executor.start().unwrap();

        let name = handle
            .submit_fn(|_| std::thread::current().name().map(str::to_string))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-device"));

        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let (executor, _reader) = executor();
        let handle = executor.start().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut jobs = Vec::new();
        for i in 0..10 {
            let order = Arc::clone(&order);
            jobs.push(
                handle
                    .submit_fn(move |_| order.lock().unwrap().push(i))
                    .unwrap(),
            );
        }
        for job in jobs {
            job.wait().await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let (executor, _reader) = executor();
        let handle = executor.start().unwrap();

        let result = handle
            .submit_fn(|_: &mut MockCaptureDevice| -> u32 { panic!("driver exploded") })
            .unwrap()
            .wait()
            .await;
        match result {
            Err(HardwareError::TaskPanicked { message }) => {
                assert!(message.contains("driver exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let value = handle.submit_fn(|_| 7).unwrap().wait().await.unwrap();
        assert_eq!(value, 7);

        let stats = handle.stats();
        assert_eq!(stats.jobs_panicked, 1);
        assert_eq!(stats.jobs_completed, 1);
        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_idle_events_are_drained() {
        let (executor, reader) = executor();
        executor.start().unwrap();

        reader.connect().await.unwrap();
        reader.touch().await.unwrap();
        reader.lift().await.unwrap();

        wait_for(|| executor.stats().idle_events_discarded == 3).await;
        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_idle_panic_does_not_kill_executor() {
        let (executor, reader) = executor();
        let handle = executor.start().unwrap();

        reader.panic_next_event("spurious").await.unwrap();
        wait_for(|| executor.stats().idle_events_discarded == 1).await;

        let value = handle.submit_fn(|_| "alive").unwrap().wait().await.unwrap();
        assert_eq!(value, "alive");
        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_query_device_info() {
        let (executor, _reader) = executor();
        let handle = executor.start().unwrap();

        let info = handle.submit(QueryDeviceInfo).unwrap().wait().await.unwrap().unwrap();
        assert_eq!(info.name, "Mock Fingerprint Reader");
        executor.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let (executor, _reader) = executor();
        let handle = executor.start().unwrap();
        executor.shutdown().unwrap();

        assert!(!executor.is_running());
        assert!(matches!(
            handle.submit_fn(|_| ()),
            Err(HardwareError::ExecutorUnavailable { .. })
        ));
        assert!(matches!(
            executor.start(),
            Err(HardwareError::ExecutorUnavailable { .. })
        ));
        // Second shutdown is a no-op.
        executor.shutdown().unwrap();
    }
}
