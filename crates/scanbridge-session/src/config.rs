//! Session configuration.

use std::time::Duration;

use scanbridge_core::constants::{
    DEFAULT_BROKER_WAIT_MS, DEFAULT_EVICTION_GRACE_MS, DEFAULT_INACTIVITY_WINDOW_MS,
    DEFAULT_MAX_BUILDER_RESETS, DEFAULT_SWEEP_INTERVAL_MS,
};
use scanbridge_core::{Error, Result};
use scanbridge_hardware::ExecutorConfig;

/// How polls for ids the registry does not know are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownSessionPolicy {
    /// Report `SessionNotFound`.
    #[default]
    NotFound,
    /// Report a `waiting` snapshot with a "no updates yet" instruction, for
    /// transports where a poll may race session creation.
    ReportWaiting,
}

/// Timing and policy knobs for capture sessions and the registry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use scanbridge_session::{SessionConfig, UnknownSessionPolicy};
///
/// let config = SessionConfig::default()
///     .with_inactivity_window(Duration::from_secs(20))
///     .with_unknown_session(UnknownSessionPolicy::ReportWaiting);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.eviction_cutoff(), Duration::from_secs(25));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time without activity after which a session fails with a timeout.
    pub inactivity_window: Duration,

    /// Extra time past the inactivity window before a stale session is
    /// evicted.
    pub eviction_grace: Duration,

    /// Period of the background eviction sweep.
    pub sweep_interval: Duration,

    /// Bounded wait for the device in blocking enroll mode.
    pub broker_wait: Duration,

    /// Builder resets tolerated before inconsistent samples fail a session.
    pub max_builder_resets: u32,

    pub unknown_session: UnknownSessionPolicy,

    pub executor: ExecutorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_window: Duration::from_millis(DEFAULT_INACTIVITY_WINDOW_MS),
            eviction_grace: Duration::from_millis(DEFAULT_EVICTION_GRACE_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            broker_wait: Duration::from_millis(DEFAULT_BROKER_WAIT_MS),
            max_builder_resets: DEFAULT_MAX_BUILDER_RESETS,
            unknown_session: UnknownSessionPolicy::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_inactivity_window(mut self, window: Duration) -> Self {
        self.inactivity_window = window;
        self
    }

    pub fn with_eviction_grace(mut self, grace: Duration) -> Self {
        self.eviction_grace = grace;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_broker_wait(mut self, wait: Duration) -> Self {
        self.broker_wait = wait;
        self
    }

    pub fn with_max_builder_resets(mut self, resets: u32) -> Self {
        self.max_builder_resets = resets;
        self
    }

    pub fn with_unknown_session(mut self, policy: UnknownSessionPolicy) -> Self {
        self.unknown_session = policy;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Age of `updated_at` past which the sweep evicts a session.
    #[must_use]
    pub fn eviction_cutoff(&self) -> Duration {
        self.inactivity_window + self.eviction_grace
    }

    /// Check the configuration for values the session loop cannot honour.
    ///
    /// # Errors
    /// Returns `Error::Config` for zero durations or a pump interval that is
    /// not shorter than the inactivity window.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("inactivity_window", self.inactivity_window),
            ("sweep_interval", self.sweep_interval),
            ("broker_wait", self.broker_wait),
            ("pump_interval", self.executor.pump_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.executor.pump_interval >= self.inactivity_window {
            return Err(Error::Config(format!(
                "pump_interval ({:?}) must be shorter than inactivity_window ({:?})",
                self.executor.pump_interval, self.inactivity_window
            )));
        }
        if self.executor.thread_name.is_empty() {
            return Err(Error::Config("thread_name must not be empty".to_string()));
        }
        Ok(())
    }
}
