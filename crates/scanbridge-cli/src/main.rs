//! scanbridge - fingerprint enrollment bridge
//!
//! Runs the enrollment core against the mock reader. `demo` creates a session
//! and polls it the way an HTTP client would, `enroll` uses the blocking
//! single-call variant and `info` queries the reader on the device thread.

use std::time::Duration;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanbridge_core::constants::{
    DEFAULT_BROKER_WAIT_MS, DEFAULT_EVICTION_GRACE_MS, DEFAULT_FINGER_TYPE,
    DEFAULT_INACTIVITY_WINDOW_MS, DEFAULT_MAX_BUILDER_RESETS, DEFAULT_PUMP_INTERVAL_MS,
    DEFAULT_QUALITY_THRESHOLD, DEFAULT_SWEEP_INTERVAL_MS,
};
use scanbridge_core::{Phase, ProgressSnapshot};
use scanbridge_hardware::executor::DEFAULT_THREAD_NAME;
use scanbridge_hardware::mock::MockCaptureHandle;
use scanbridge_hardware::{CaptureFeedback, ExecutorConfig};
use scanbridge_session::{SessionConfig, SessionRegistry, UnknownSessionPolicy};

// ============================================================================
// CLI Definition
// ============================================================================

/// Fingerprint enrollment bridge
#[derive(Parser)]
#[command(name = "scanbridge", version, about)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Time without activity before a session fails with a timeout
    #[arg(long, env = "SCANBRIDGE_INACTIVITY_WINDOW_MS", default_value_t = DEFAULT_INACTIVITY_WINDOW_MS)]
    inactivity_window_ms: u64,

    /// Extra time past the inactivity window before a session is evicted
    #[arg(long, env = "SCANBRIDGE_EVICTION_GRACE_MS", default_value_t = DEFAULT_EVICTION_GRACE_MS)]
    eviction_grace_ms: u64,

    /// Period of the background eviction sweep
    #[arg(long, env = "SCANBRIDGE_SWEEP_INTERVAL_MS", default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,

    /// How long `enroll` waits for a busy device
    #[arg(long, env = "SCANBRIDGE_BROKER_WAIT_MS", default_value_t = DEFAULT_BROKER_WAIT_MS)]
    broker_wait_ms: u64,

    /// Device thread tick for cancellation and timeout checks
    #[arg(long, env = "SCANBRIDGE_PUMP_INTERVAL_MS", default_value_t = DEFAULT_PUMP_INTERVAL_MS)]
    pump_interval_ms: u64,

    /// Builder restarts tolerated before inconsistent samples fail a session
    #[arg(long, env = "SCANBRIDGE_MAX_BUILDER_RESETS", default_value_t = DEFAULT_MAX_BUILDER_RESETS)]
    max_builder_resets: u32,

    /// How polls for unknown session ids are answered
    #[arg(long, env = "SCANBRIDGE_UNKNOWN_SESSION", value_enum, default_value_t = UnknownSessionArg::NotFound)]
    unknown_session: UnknownSessionArg,

    /// Name of the device thread
    #[arg(long, env = "SCANBRIDGE_THREAD_NAME", default_value = DEFAULT_THREAD_NAME)]
    thread_name: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnknownSessionArg {
    NotFound,
    ReportWaiting,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session, play a simulated user and poll until it finishes (default)
    Demo {
        #[command(flatten)]
        request: RequestArgs,

        #[command(flatten)]
        user: UserArgs,

        /// Poll period
        #[arg(long, default_value_t = 100)]
        poll_ms: u64,
    },

    /// Run a blocking enrollment and print the template
    Enroll {
        #[command(flatten)]
        request: RequestArgs,

        #[command(flatten)]
        user: UserArgs,

        /// Overall deadline for the enrollment
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },

    /// Print reader information
    Info,
}

#[derive(Args, Clone)]
struct RequestArgs {
    /// Finger to enroll (thumb, index, middle, ring, little)
    #[arg(long, default_value = DEFAULT_FINGER_TYPE)]
    finger: String,

    /// Minimum sample quality (0-100)
    #[arg(long, default_value_t = DEFAULT_QUALITY_THRESHOLD)]
    quality_threshold: i32,
}

#[derive(Args, Clone, Copy)]
struct UserArgs {
    /// Good samples the simulated user provides
    #[arg(long, default_value_t = 4)]
    samples: usize,

    /// Poor samples before the good ones
    #[arg(long, default_value_t = 1)]
    poor_samples: usize,

    /// Start with a sample from a different finger, forcing a builder restart
    #[arg(long)]
    inconsistent: bool,

    /// Pause between finger placements
    #[arg(long, default_value_t = 300)]
    pace_ms: u64,
}

impl ConfigArgs {
    fn session_config(&self) -> SessionConfig {
        let unknown_session = match self.unknown_session {
            UnknownSessionArg::NotFound => UnknownSessionPolicy::NotFound,
            UnknownSessionArg::ReportWaiting => UnknownSessionPolicy::ReportWaiting,
        };
        SessionConfig::default()
            .with_inactivity_window(Duration::from_millis(self.inactivity_window_ms))
            .with_eviction_grace(Duration::from_millis(self.eviction_grace_ms))
            .with_sweep_interval(Duration::from_millis(self.sweep_interval_ms))
            .with_broker_wait(Duration::from_millis(self.broker_wait_ms))
            .with_max_builder_resets(self.max_builder_resets)
            .with_unknown_session(unknown_session)
            .with_executor(
                ExecutorConfig::default()
                    .with_thread_name(self.thread_name.clone())
                    .with_pump_interval(Duration::from_millis(self.pump_interval_ms)),
            )
    }
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.session_config();
    let (registry, reader) =
        SessionRegistry::with_mock(config).context("failed to start the session registry")?;

    let command = cli.command.unwrap_or(Commands::Demo {
        request: RequestArgs {
            finger: DEFAULT_FINGER_TYPE.to_string(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
        },
        user: UserArgs {
            samples: 4,
            poor_samples: 1,
            inconsistent: false,
            pace_ms: 300,
        },
        poll_ms: 100,
    });

    let outcome = match command {
        Commands::Demo {
            request,
            user,
            poll_ms,
        } => cmd_demo(&registry, reader, request, user, poll_ms).await,
        Commands::Enroll {
            request,
            user,
            timeout_ms,
        } => cmd_enroll(&registry, reader, request, user, timeout_ms).await,
        Commands::Info => cmd_info(&registry).await,
    };

    registry.shutdown().await.context("shutdown failed")?;
    outcome
}

async fn cmd_demo(
    registry: &SessionRegistry,
    reader: MockCaptureHandle,
    request: RequestArgs,
    user: UserArgs,
    poll_ms: u64,
) -> anyhow::Result<()> {
    let id = registry.create(&request.finger, request.quality_threshold)?;
    info!(session_id = %id, "session started");
    let player = tokio::spawn(simulate_user(reader, user));

    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
    let mut last: Option<ProgressSnapshot> = None;
    let snapshot = loop {
        ticker.tick().await;
        let snapshot = registry.get(&id)?;
        let changed = last.as_ref().is_none_or(|previous| {
            previous.phase != snapshot.phase
                || previous.percent_complete != snapshot.percent_complete
                || previous.instruction != snapshot.instruction
        });
        if changed {
            println!("{}", serde_json::to_string(&snapshot)?);
        }
        if snapshot.is_terminal() {
            break snapshot;
        }
        last = Some(snapshot);
    };
    player.abort();

    match snapshot.phase {
        Phase::Done => {
            let template = registry.finish(&id)?;
            info!(bytes = template.len(), "template consumed");
            println!("{}", STANDARD.encode(&template));
            Ok(())
        }
        phase => bail!(
            "enrollment ended {phase}: {}",
            snapshot.error_detail.as_deref().unwrap_or("no detail")
        ),
    }
}

async fn cmd_enroll(
    registry: &SessionRegistry,
    reader: MockCaptureHandle,
    request: RequestArgs,
    user: UserArgs,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    let player = tokio::spawn(simulate_user(reader, user));
    let template = registry
        .enroll(
            &request.finger,
            request.quality_threshold,
            Duration::from_millis(timeout_ms),
        )
        .await
        .context("enrollment failed")?;
    player.abort();

    println!("{}", STANDARD.encode(&template));
    Ok(())
}

async fn cmd_info(registry: &SessionRegistry) -> anyhow::Result<()> {
    let info = registry.device_info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    println!("{}", serde_json::to_string_pretty(&registry.executor_stats())?);
    Ok(())
}

/// Play the person in front of the reader once capture has started.
async fn simulate_user(reader: MockCaptureHandle, user: UserArgs) {
    while !reader.is_capturing() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if let Err(e) = play(&reader, user).await {
        warn!(error = %e, "simulated user stopped");
    }
}

async fn play(reader: &MockCaptureHandle, user: UserArgs) -> scanbridge_hardware::Result<()> {
    let pace = Duration::from_millis(user.pace_ms);

    for _ in 0..user.poor_samples {
        tokio::time::sleep(pace).await;
        reader.touch().await?;
        reader.poor_sample(35, CaptureFeedback::LowContrast).await?;
        reader.lift().await?;
    }
    if user.inconsistent {
        tokio::time::sleep(pace).await;
        reader.touch().await?;
        reader.good_sample(85).await?;
        reader.inconsistent_sample(85).await?;
        reader.lift().await?;
    }
    for _ in 0..user.samples {
        tokio::time::sleep(pace).await;
        reader.touch().await?;
        reader.quality_feedback(CaptureFeedback::Good).await?;
        reader.good_sample(85).await?;
        reader.lift().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_map_onto_session_config() {
        let cli = Cli::try_parse_from([
            "scanbridge",
            "--inactivity-window-ms",
            "20000",
            "--unknown-session",
            "report-waiting",
            "--thread-name",
            "reader-0",
            "info",
        ])
        .unwrap();

        let config = cli.config.session_config();
        assert_eq!(config.inactivity_window, Duration::from_secs(20));
        assert_eq!(config.unknown_session, UnknownSessionPolicy::ReportWaiting);
        assert_eq!(config.executor.thread_name, "reader-0");
        assert_eq!(config.broker_wait, Duration::from_millis(DEFAULT_BROKER_WAIT_MS));
        assert!(config.validate().is_ok());
        assert!(matches!(cli.command, Some(Commands::Info)));
    }

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["scanbridge", "demo", "--finger", "thumb"]).unwrap();
        match cli.command {
            Some(Commands::Demo { request, user, .. }) => {
                assert_eq!(request.finger, "thumb");
                assert_eq!(request.quality_threshold, DEFAULT_QUALITY_THRESHOLD);
                assert_eq!(user.samples, 4);
                assert!(!user.inconsistent);
            }
            _ => panic!("expected demo"),
        }
    }
}
