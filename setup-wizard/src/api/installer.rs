// Install pipeline (runs after the last data step)
//
// Phases run strictly one after another; a phase's flag flips only once it has resolved, and the
// next phase does not start before that. No rollback: the first failing phase halts the run.

use crate::models::form::WizardFormState;
use crate::models::responses::{InstallProgress, ProgressPayload, Severity};
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};

pub const EVENT_INSTALL_COMPLETE: &str = "install-complete";
pub const EVENT_INSTALL_ERROR: &str = "install-error";

pub const DEFAULT_PHASE_LABELS: [&str; 5] = [
    "Creating database schema",
    "Installing core modules",
    "Configuring school profile",
    "Preparing administrator account",
    "Finalizing installation",
];

pub type ProgressEmitter = Arc<dyn Fn(ProgressPayload) + Send + Sync>;

/// Emitter that drops every event.
pub fn silent_emitter() -> ProgressEmitter {
    Arc::new(|_payload: ProgressPayload| {})
}

/// One named unit of install work.
#[async_trait]
pub trait InstallPhase: Send + Sync {
    fn label(&self) -> &str;
    async fn run(&self, state: &WizardFormState) -> anyhow::Result<()>;
}

/// Phase whose work is a fixed wait. Stands in for server-side work the UI only observes.
pub struct TimedPhase {
    label: String,
    duration: Duration,
}

impl TimedPhase {
    pub fn new(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            duration,
        }
    }
}

#[async_trait]
impl InstallPhase for TimedPhase {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&self, _state: &WizardFormState) -> anyhow::Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

pub fn timed_phases<I, S>(labels: I, duration: Duration) -> Vec<Arc<dyn InstallPhase>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    labels
        .into_iter()
        .map(|l| Arc::new(TimedPhase::new(l, duration)) as Arc<dyn InstallPhase>)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub index: usize,
    pub label: String,
    pub message: String,
}

/// Shared context for one pipeline run's events.
pub struct RunContext {
    pub correlation_id: String,
    pub started: Instant,
    pub emit: ProgressEmitter,
}

impl RunContext {
    pub fn new(emit: ProgressEmitter) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            emit,
        }
    }

    pub fn emit(&self, step: &str, severity: Severity, percent: i32, message: impl Into<String>) {
        (self.emit)(ProgressPayload {
            correlation_id: self.correlation_id.clone(),
            step: step.to_string(),
            severity,
            phase: "install".to_string(),
            percent,
            message: message.into(),
            elapsed_ms: Some(self.started.elapsed().as_millis()),
        });
    }
}

/// Run every phase in order, flipping `progress` flags as each one resolves.
pub async fn run_phases(
    phases: &[Arc<dyn InstallPhase>],
    state: &WizardFormState,
    progress: &mut InstallProgress,
    phase_timeout: Duration,
    ctx: &RunContext,
) -> Result<(), PhaseFailure> {
    for (index, phase) in phases.iter().enumerate() {
        let step = format!("phase_{}", index + 1);
        let label = phase.label().to_string();
        let phase_started = Instant::now();

        ctx.emit(&step, Severity::Info, progress.percent(), format!("{}...", label));
        info!(
            "[PHASE: install] [STEP: {}] {} started (correlation_id={})",
            step, label, ctx.correlation_id
        );

        let outcome = match timeout(phase_timeout, phase.run(state)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timed out after {}s", phase_timeout.as_secs())),
        };

        if let Err(message) = outcome {
            error!(
                "[PHASE: install] [STEP: {}] {} failed (correlation_id={}): {}",
                step, label, ctx.correlation_id, message
            );
            ctx.emit(
                &step,
                Severity::Error,
                progress.percent(),
                format!("{} failed: {}", label, message),
            );
            return Err(PhaseFailure {
                index,
                label,
                message,
            });
        }

        progress.mark_completed(index);
        info!(
            "[PHASE: install] [STEP: {}] {} done (duration_ms={}, progress={}%)",
            step,
            label,
            phase_started.elapsed().as_millis(),
            progress.percent()
        );
        ctx.emit(&step, Severity::Info, progress.percent(), format!("{} done", label));
    }
    Ok(())
}
