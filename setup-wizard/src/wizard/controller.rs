//! Wizard controller.
//!
//! Drives the step state machine on top of a [`FormContainer`]:
//! `Welcome → Database → School → Admin → Installing → Complete`.
//! The install run executes the configured phases in order and then sends each form section to
//! the setup backend. Only a fully successful run reaches `Complete` and clears the saved form.

use super::container::FormContainer;
use crate::api::installer::{
    run_phases, InstallPhase, ProgressEmitter, RunContext, EVENT_INSTALL_COMPLETE,
    EVENT_INSTALL_ERROR,
};
use crate::api::setup::{finalize_sections, SetupBackend};
use crate::models::form::{FieldUpdate, Section, WizardFormState};
use crate::models::responses::{FinalizeReport, InstallProgress, InstallResultEvent, Severity};
use crate::models::step::{infer_step, WizardStep, FINAL_DATA_STEP, FIRST_DATA_STEP};
use crate::utils::validation::{validate_section, FieldError};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("{} field(s) need attention", .0.len())]
    Validation(Vec<FieldError>),
    #[error("cannot {action} from the '{step}' step")]
    InvalidTransition {
        action: &'static str,
        step: WizardStep,
    },
    #[error("Installation failed during '{label}': {message}")]
    PhaseFailed { label: String, message: String },
    #[error("Setup could not be finalized ({0})")]
    FinalizeFailed(FinalizeReport),
}

pub struct WizardController {
    form: FormContainer,
    step: WizardStep,
    phases: Vec<Arc<dyn InstallPhase>>,
    backend: Arc<dyn SetupBackend>,
    phase_timeout: Duration,
    progress: InstallProgress,
    // Sections the backend already accepted; a retry does not resend them.
    finalized: Vec<Section>,
    last_result: Option<InstallResultEvent>,
}

impl WizardController {
    pub fn new(
        form: FormContainer,
        phases: Vec<Arc<dyn InstallPhase>>,
        backend: Arc<dyn SetupBackend>,
        phase_timeout: Duration,
    ) -> Self {
        let progress = InstallProgress::new(phases.iter().map(|p| p.label().to_string()));
        Self {
            form,
            step: WizardStep::Welcome,
            phases,
            backend,
            phase_timeout,
            progress,
            finalized: Vec::new(),
            last_result: None,
        }
    }

    /// Load the saved form and jump to the inferred resume step.
    pub async fn mount(&mut self) -> WizardStep {
        let state = self.form.load().await;
        self.step = infer_step(state);
        info!(
            "[PHASE: wizard] [STEP: mount] Resuming at '{}' (index={})",
            self.step,
            self.step.index()
        );
        self.step
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn state(&self) -> &WizardFormState {
        self.form.state()
    }

    pub fn is_ready(&self) -> bool {
        self.form.is_ready()
    }

    pub fn progress(&self) -> &InstallProgress {
        &self.progress
    }

    pub fn finalized_sections(&self) -> &[Section] {
        &self.finalized
    }

    /// Terminal event of the most recent install run.
    pub fn last_result(&self) -> Option<&InstallResultEvent> {
        self.last_result.as_ref()
    }

    /// Edit one field. Refused once installing has started.
    pub fn update_field(&mut self, update: FieldUpdate) -> Result<(), WizardError> {
        if self.step.index() > FINAL_DATA_STEP.index() {
            warn!(
                "[PHASE: wizard] [STEP: update_field] Ignoring edit to {}.{} on '{}'",
                update.section(),
                update.field_name(),
                self.step
            );
            return Err(WizardError::InvalidTransition {
                action: "edit answers",
                step: self.step,
            });
        }
        self.form.update_field(update);
        Ok(())
    }

    pub fn subscribe_ready(&self) -> tokio::sync::watch::Receiver<bool> {
        self.form.subscribe_ready()
    }

    /// Wait for queued saves to reach the store.
    pub async fn flush(&self) {
        self.form.flush().await;
    }

    /// Move forward one page. Leaving a data page validates its section first; leaving the last
    /// data page validates every section.
    pub fn advance(&mut self) -> Result<WizardStep, WizardError> {
        let next = match self.step {
            WizardStep::Welcome => FIRST_DATA_STEP,
            step @ (WizardStep::Database | WizardStep::School | WizardStep::Admin) => {
                let sections: Vec<Section> = if step == FINAL_DATA_STEP {
                    Section::ALL.to_vec()
                } else {
                    step.section().into_iter().collect()
                };
                let errors: Vec<FieldError> = sections
                    .iter()
                    .flat_map(|s| validate_section(self.form.state(), *s))
                    .collect();
                if !errors.is_empty() {
                    warn!(
                        "[PHASE: wizard] [STEP: advance] '{}' has {} invalid field(s): {}",
                        step,
                        errors.len(),
                        errors
                            .iter()
                            .map(|e| format!("{}.{}", e.section, e.field))
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    return Err(WizardError::Validation(errors));
                }
                if step == FINAL_DATA_STEP {
                    WizardStep::Installing
                } else {
                    WizardStep::from_index(step.index() + 1).unwrap_or(FINAL_DATA_STEP)
                }
            }
            step => {
                return Err(WizardError::InvalidTransition {
                    action: "advance",
                    step,
                })
            }
        };
        info!("[PHASE: wizard] [STEP: advance] {} -> {}", self.step, next);
        self.step = next;
        Ok(next)
    }

    /// Move back one page within the data pages. Elsewhere this is a no-op.
    pub fn retreat(&mut self) -> WizardStep {
        if matches!(self.step, WizardStep::School | WizardStep::Admin) {
            if let Some(prev) = WizardStep::from_index(self.step.index() - 1) {
                info!("[PHASE: wizard] [STEP: retreat] {} -> {}", self.step, prev);
                self.step = prev;
            }
        }
        self.step
    }

    /// Run the install phases, then finalize every section the backend has not accepted yet.
    ///
    /// Only valid on the `Installing` step. On any failure the step stays `Installing` and the
    /// saved form is kept, so calling this again is the retry.
    pub async fn run_installation(&mut self, emit: ProgressEmitter) -> Result<(), WizardError> {
        if self.step != WizardStep::Installing {
            return Err(WizardError::InvalidTransition {
                action: "run the installation",
                step: self.step,
            });
        }

        let ctx = RunContext::new(emit);
        let snapshot = self.form.state().clone();
        self.progress = InstallProgress::new(self.phases.iter().map(|p| p.label().to_string()));
        info!(
            "[PHASE: install] [STEP: start] Running {} phase(s) (correlation_id={}, already_finalized={:?})",
            self.phases.len(),
            ctx.correlation_id,
            self.finalized
        );

        if let Err(failure) = run_phases(
            &self.phases,
            &snapshot,
            &mut self.progress,
            self.phase_timeout,
            &ctx,
        )
        .await
        {
            let err = WizardError::PhaseFailed {
                label: failure.label,
                message: failure.message,
            };
            return Err(self.fail(&ctx, err, None));
        }

        let pending: Vec<Section> = Section::ALL
            .iter()
            .copied()
            .filter(|s| !self.finalized.contains(s))
            .collect();
        let attempt = finalize_sections(self.backend.as_ref(), &snapshot, &pending).await;
        self.finalized.extend(attempt.succeeded.iter().copied());

        if !attempt.is_success() {
            for failure in &attempt.failed {
                ctx.emit(
                    &format!("finalize_{}", failure.section),
                    Severity::Warn,
                    self.progress.percent(),
                    format!(
                        "{} was not saved and will be resent on retry: {}",
                        WizardStep::for_section(failure.section).title(),
                        failure.message
                    ),
                );
            }
            let report = FinalizeReport {
                succeeded: Section::ALL
                    .iter()
                    .copied()
                    .filter(|s| self.finalized.contains(s))
                    .collect(),
                failed: attempt.failed,
            };
            let details = serde_json::to_value(&report).ok();
            return Err(self.fail(&ctx, WizardError::FinalizeFailed(report), details));
        }

        self.form.clear().await;
        self.step = WizardStep::Complete;

        let message = "School setup completed".to_string();
        ctx.emit(EVENT_INSTALL_COMPLETE, Severity::Info, 100, message.clone());
        info!(
            "[PHASE: install] [STEP: complete] {} (correlation_id={}, elapsed_ms={})",
            message,
            ctx.correlation_id,
            ctx.started.elapsed().as_millis()
        );
        self.last_result = Some(InstallResultEvent {
            correlation_id: ctx.correlation_id.clone(),
            ok: true,
            message,
            details: None,
        });
        Ok(())
    }

    fn fail(
        &mut self,
        ctx: &RunContext,
        err: WizardError,
        details: Option<serde_json::Value>,
    ) -> WizardError {
        let message = err.to_string();
        error!(
            "[PHASE: install] [STEP: error] {} (correlation_id={})",
            message, ctx.correlation_id
        );
        ctx.emit(
            EVENT_INSTALL_ERROR,
            Severity::Error,
            self.progress.percent(),
            message.clone(),
        );
        self.last_result = Some(InstallResultEvent {
            correlation_id: ctx.correlation_id.clone(),
            ok: false,
            message,
            details,
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::installer::{silent_emitter, timed_phases, DEFAULT_PHASE_LABELS};
    use crate::api::setup::FinalizeError;
    use crate::models::form::{
        AdminField, AdminSection, DatabaseField, DatabaseSection, SchoolField, SchoolSection,
    };
    use crate::models::responses::ProgressPayload;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::wizard::persistence::{decode_entry, encode_entry};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const KEY: &str = "setup-wizard-form";

    /// Backend that records calls and fails a section a set number of times.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<Section>>,
        failures_left: Mutex<HashMap<Section, u32>>,
    }

    impl RecordingBackend {
        fn failing(section: Section, times: u32) -> Self {
            let b = Self::default();
            b.failures_left.lock().unwrap().insert(section, times);
            b
        }

        fn outcome(&self, section: Section) -> Result<(), FinalizeError> {
            self.calls.lock().unwrap().push(section);
            let mut left = self.failures_left.lock().unwrap();
            match left.get_mut(&section) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(FinalizeError::Server {
                        status: 503,
                        body: "busy".into(),
                    })
                }
                _ => Ok(()),
            }
        }

        fn calls(&self) -> Vec<Section> {
            let mut c = self.calls.lock().unwrap().clone();
            c.sort_by_key(|s| s.as_str());
            c
        }
    }

    #[async_trait]
    impl SetupBackend for RecordingBackend {
        async fn save_database_config(&self, _db: &DatabaseSection) -> Result<(), FinalizeError> {
            self.outcome(Section::Database)
        }
        async fn save_school_config(&self, _s: &SchoolSection) -> Result<(), FinalizeError> {
            self.outcome(Section::School)
        }
        async fn create_admin_account(&self, _a: &AdminSection) -> Result<(), FinalizeError> {
            self.outcome(Section::Admin)
        }
    }

    struct FailingPhase;

    #[async_trait]
    impl InstallPhase for FailingPhase {
        fn label(&self) -> &str {
            "Installing core modules"
        }
        async fn run(&self, _state: &WizardFormState) -> anyhow::Result<()> {
            anyhow::bail!("module registry unreachable")
        }
    }

    fn complete_state() -> WizardFormState {
        let mut s = WizardFormState::default();
        s.database = DatabaseSection {
            name: "school".into(),
            host: "db.local".into(),
            username: "app".into(),
            password: "pw".into(),
            port: Some(5432),
            db_type: Some("postgres".into()),
        };
        s.school.name = "Acme High".into();
        s.school.phone = "+1 (555) 010-2000".into();
        s.school.address = "1 Main St".into();
        s.school.brand_color = "#1E40AF".into();
        s.admin = AdminSection {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@acme.edu".into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        };
        s
    }

    async fn seeded_store(state: Option<&WizardFormState>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        if let Some(state) = state {
            store.set(KEY, &encode_entry(state).unwrap()).await.unwrap();
        }
        store
    }

    fn controller(
        store: Arc<MemoryStore>,
        phases: Vec<Arc<dyn InstallPhase>>,
        backend: Arc<RecordingBackend>,
    ) -> WizardController {
        let form = FormContainer::new(store, KEY, WizardFormState::default(), Duration::ZERO);
        WizardController::new(form, phases, backend, Duration::from_secs(5))
    }

    fn instant_phases() -> Vec<Arc<dyn InstallPhase>> {
        timed_phases(DEFAULT_PHASE_LABELS, Duration::ZERO)
    }

    async fn at_installing(
        store: Arc<MemoryStore>,
        phases: Vec<Arc<dyn InstallPhase>>,
        backend: Arc<RecordingBackend>,
    ) -> WizardController {
        let mut c = controller(store, phases, backend);
        assert_eq!(c.mount().await, WizardStep::Admin);
        assert_eq!(c.advance().unwrap(), WizardStep::Installing);
        c
    }

    #[tokio::test]
    async fn fresh_install_walks_welcome_school_admin() {
        let store = seeded_store(None).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        assert_eq!(c.mount().await, WizardStep::Welcome);
        assert!(c.is_ready());

        let full = complete_state();
        c.update_field(FieldUpdate::Database(DatabaseField::Host(
            full.database.host.clone(),
        )))
        .unwrap();
        c.update_field(FieldUpdate::Database(DatabaseField::Name(
            full.database.name.clone(),
        )))
        .unwrap();
        c.update_field(FieldUpdate::Database(DatabaseField::Username("app".into()))).unwrap();
        c.update_field(FieldUpdate::Database(DatabaseField::Password("pw".into()))).unwrap();
        assert_eq!(infer_step(c.state()).index(), 2);

        for update in [
            FieldUpdate::from_parts("school", "name", "Acme High".into()).unwrap(),
            FieldUpdate::from_parts("school", "phone", "555-0100".into()).unwrap(),
            FieldUpdate::from_parts("school", "address", "1 Main St".into()).unwrap(),
        ] {
            c.update_field(update).unwrap();
        }
        assert_eq!(infer_step(c.state()).index(), 3);
    }

    #[tokio::test]
    async fn advance_and_retreat_follow_the_page_order() {
        let state = complete_state();
        let store = seeded_store(Some(&state)).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        c.mount().await;
        assert_eq!(c.step(), WizardStep::Admin);

        assert_eq!(c.retreat(), WizardStep::School);
        assert_eq!(c.retreat(), WizardStep::Database);
        // No way back to the welcome page once a data page is open.
        assert_eq!(c.retreat(), WizardStep::Database);

        assert_eq!(c.advance().unwrap(), WizardStep::School);
        assert_eq!(c.advance().unwrap(), WizardStep::Admin);
        assert_eq!(c.advance().unwrap(), WizardStep::Installing);
        assert_eq!(c.retreat(), WizardStep::Installing);
        assert!(matches!(
            c.advance(),
            Err(WizardError::InvalidTransition { step: WizardStep::Installing, .. })
        ));
    }

    #[tokio::test]
    async fn welcome_advances_without_validation_and_cannot_retreat() {
        let store = seeded_store(None).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        c.mount().await;
        assert_eq!(c.retreat(), WizardStep::Welcome);
        assert_eq!(c.advance().unwrap(), WizardStep::Database);
    }

    #[tokio::test]
    async fn invalid_section_blocks_advance() {
        let store = seeded_store(None).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        c.mount().await;
        c.advance().unwrap();
        c.update_field(FieldUpdate::Database(DatabaseField::Host("db".into()))).unwrap();
        c.update_field(FieldUpdate::Database(DatabaseField::Port(Some(0)))).unwrap();

        let err = c.advance().unwrap_err();
        let WizardError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"port"));
        assert!(!fields.contains(&"host"));
        assert_eq!(c.step(), WizardStep::Database);
    }

    #[tokio::test]
    async fn last_data_page_checks_every_section() {
        let mut state = complete_state();
        state.school.brand_color = "blue".into();
        let store = seeded_store(Some(&state)).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        assert_eq!(c.mount().await, WizardStep::Admin);

        let Err(WizardError::Validation(errors)) = c.advance() else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].section, Section::School);
        assert_eq!(c.step(), WizardStep::Admin);
    }

    #[tokio::test]
    async fn installation_requires_installing_step() {
        let store = seeded_store(None).await;
        let mut c = controller(store, instant_phases(), Arc::new(RecordingBackend::default()));
        c.mount().await;
        assert!(matches!(
            c.run_installation(silent_emitter()).await,
            Err(WizardError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn successful_install_completes_and_clears_storage() {
        let state = complete_state();
        let store = seeded_store(Some(&state)).await;
        let backend = Arc::new(RecordingBackend::default());
        let mut c = at_installing(store.clone(), instant_phases(), backend.clone()).await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let emit: ProgressEmitter =
            Arc::new(move |p: ProgressPayload| sink.lock().unwrap().push(p));

        c.run_installation(emit).await.unwrap();

        assert_eq!(c.step(), WizardStep::Complete);
        assert!(c.progress().is_done());
        assert_eq!(c.progress().percent(), 100);
        assert_eq!(
            backend.calls(),
            vec![Section::Admin, Section::Database, Section::School]
        );
        assert_eq!(store.get(KEY).await.unwrap(), None);
        // In-memory form survives the clear.
        assert_eq!(c.state().school.name, "Acme High");

        let result = c.last_result().unwrap();
        assert!(result.ok);
        let events = events.lock().unwrap();
        assert_eq!(events.last().unwrap().step, EVENT_INSTALL_COMPLETE);
        assert!(events.iter().all(|e| e.correlation_id == result.correlation_id));
    }

    #[tokio::test]
    async fn failing_phase_keeps_installing_and_storage() {
        let state = complete_state();
        let store = seeded_store(Some(&state)).await;
        let backend = Arc::new(RecordingBackend::default());
        let mut phases = timed_phases(["Creating database schema"], Duration::ZERO);
        phases.push(Arc::new(FailingPhase));
        phases.extend(timed_phases(["Finalizing installation"], Duration::ZERO));
        let mut c = at_installing(store.clone(), phases, backend.clone()).await;

        let err = c.run_installation(silent_emitter()).await.unwrap_err();
        match &err {
            WizardError::PhaseFailed { label, message } => {
                assert_eq!(label, "Installing core modules");
                assert!(message.contains("module registry unreachable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(c.step(), WizardStep::Installing);
        assert!(c.progress().steps[0].completed);
        assert!(!c.progress().steps[1].completed);
        assert!(!c.progress().steps[2].completed);
        assert!(backend.calls().is_empty());
        assert!(store.get(KEY).await.unwrap().is_some());
        assert!(!c.last_result().unwrap().ok);
    }

    #[tokio::test]
    async fn partial_finalize_failure_retries_only_pending_sections() {
        let state = complete_state();
        let store = seeded_store(Some(&state)).await;
        let backend = Arc::new(RecordingBackend::failing(Section::School, 1));
        let mut c = at_installing(store.clone(), instant_phases(), backend.clone()).await;

        let err = c.run_installation(silent_emitter()).await.unwrap_err();
        let WizardError::FinalizeFailed(report) = err else {
            panic!("expected finalize failure");
        };
        assert_eq!(report.succeeded, vec![Section::Database, Section::Admin]);
        assert_eq!(report.pending_sections(), vec![Section::School]);
        assert_eq!(c.finalized_sections(), &[Section::Database, Section::Admin]);
        assert_eq!(c.step(), WizardStep::Installing);
        assert!(store.get(KEY).await.unwrap().is_some());
        let details = c.last_result().unwrap().details.clone().unwrap();
        assert_eq!(details["failed"][0]["section"], "school");

        c.run_installation(silent_emitter()).await.unwrap();
        assert_eq!(c.step(), WizardStep::Complete);
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3], Section::School);
        assert_eq!(store.get(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn edits_on_a_resumed_session_are_saved() {
        let state = complete_state();
        let store = seeded_store(Some(&state)).await;
        let mut c = controller(
            store.clone(),
            instant_phases(),
            Arc::new(RecordingBackend::default()),
        );
        c.mount().await;
        c.update_field(FieldUpdate::Admin(AdminField::Email("grace@acme.edu".into())))
            .unwrap();
        c.flush().await;

        let saved = decode_entry(&store.get(KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(saved.admin.email, "grace@acme.edu");
        assert_eq!(saved.admin.first_name, "Ada");
    }

    #[tokio::test]
    async fn completed_setup_rejects_edits_and_stays_deleted() {
        let store = seeded_store(Some(&complete_state())).await;
        let mut c = at_installing(
            store.clone(),
            instant_phases(),
            Arc::new(RecordingBackend::default()),
        )
        .await;
        c.run_installation(silent_emitter()).await.unwrap();
        assert_eq!(store.get(KEY).await.unwrap(), None);

        let err = c
            .update_field(FieldUpdate::Admin(AdminField::Email("late@acme.edu".into())))
            .unwrap_err();
        assert_eq!(
            err,
            WizardError::InvalidTransition {
                action: "edit answers",
                step: WizardStep::Complete,
            }
        );
        c.flush().await;
        assert_eq!(store.get(KEY).await.unwrap(), None);
        assert_eq!(c.state().admin.email, complete_state().admin.email);
    }

    #[tokio::test]
    async fn partial_finalize_freezes_answers_for_the_retry() {
        let store = seeded_store(Some(&complete_state())).await;
        let backend = Arc::new(RecordingBackend::failing(Section::School, 1));
        let mut c = at_installing(store.clone(), instant_phases(), backend.clone()).await;
        c.run_installation(silent_emitter()).await.unwrap_err();

        assert!(c
            .update_field(FieldUpdate::School(SchoolField::Name("Renamed".into())))
            .is_err());
        c.run_installation(silent_emitter()).await.unwrap();
        assert_eq!(c.state().school.name, complete_state().school.name);
    }

    #[tokio::test]
    async fn failed_finalize_call_is_announced_as_a_warning() {
        let store = seeded_store(Some(&complete_state())).await;
        let backend = Arc::new(RecordingBackend::failing(Section::Admin, 1));
        let mut c = at_installing(store, instant_phases(), backend).await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let emit: ProgressEmitter =
            Arc::new(move |p: ProgressPayload| sink.lock().unwrap().push(p));
        c.run_installation(emit).await.unwrap_err();

        let events = events.lock().unwrap();
        let warnings: Vec<&ProgressPayload> = events
            .iter()
            .filter(|e| e.severity == Severity::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, "finalize_admin");
        assert!(warnings[0].message.starts_with("Administrator Account was not saved"));
        assert_eq!(events.last().unwrap().step, EVENT_INSTALL_ERROR);
    }
}
