// School Setup Wizard
// Main library entry point

pub mod api;
pub mod config;
pub mod models;
pub mod security;
pub mod storage;
pub mod tui;
pub mod utils;
pub mod wizard;

use anyhow::{Context, Result};
use api::installer::{timed_phases, InstallPhase, ProgressEmitter};
use api::setup::{DryRunBackend, HttpSetupBackend, SetupBackend};
use config::WizardConfig;
use log::{error, info, warn};
use models::form::{FieldUpdate, Section, WizardFormState};
use models::responses::ProgressPayload;
use security::secret_protector::{default_key_path, EncryptedStore, SecretProtector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{FileStore, KeyValueStore, MemoryStore};
use wizard::{FormContainer, WizardController};

/// File store under the configured root, sealed with the wizard key unless disabled.
pub fn build_store(cfg: &WizardConfig) -> Result<Arc<dyn KeyValueStore>> {
    let root = cfg.store_root();
    let files = FileStore::new(&root, &cfg.store.namespace)
        .with_context(|| format!("Failed to open form store under {:?}", root))?;
    if cfg.store.encrypt {
        let protector = SecretProtector::new(default_key_path(&root));
        Ok(Arc::new(EncryptedStore::new(files, protector)))
    } else {
        warn!("[PHASE: initialization] [STEP: store] Encryption disabled; saved form is plaintext");
        Ok(Arc::new(files))
    }
}

/// HTTP backend when a service URL is configured, dry-run otherwise.
pub fn build_backend(cfg: &WizardConfig) -> Result<Arc<dyn SetupBackend>> {
    if cfg.backend.base_url.trim().is_empty() {
        info!("[PHASE: initialization] [STEP: backend] No setup service URL; using dry-run backend");
        return Ok(Arc::new(DryRunBackend));
    }
    let backend = HttpSetupBackend::new(
        &cfg.backend.base_url,
        cfg.backend_timeout(),
        cfg.backend.max_retries,
    )?;
    Ok(Arc::new(backend))
}

pub fn build_phases(cfg: &WizardConfig) -> Vec<Arc<dyn InstallPhase>> {
    timed_phases(cfg.install.phases.iter().cloned(), cfg.phase_delay())
}

/// Must run inside a tokio runtime (the form container spawns its writer).
pub fn build_controller(
    cfg: &WizardConfig,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn SetupBackend>,
) -> WizardController {
    let form = FormContainer::new(
        store,
        cfg.store.key.clone(),
        WizardFormState::default(),
        cfg.save_debounce(),
    );
    WizardController::new(form, build_phases(cfg), backend, cfg.phase_timeout())
}

fn load_config(config_path: Option<&Path>) -> WizardConfig {
    match WizardConfig::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration, using defaults: {:#}", e);
            WizardConfig::default()
        }
    }
}

fn init_logging(cfg: &WizardConfig, owns_terminal: bool) {
    let log_dir = cfg.log_dir();
    let with_stdout = cfg.log_to_stdout(owns_terminal);
    if let Err(e) = utils::logging::init_logging(&log_dir, &cfg.logging.level, with_stdout) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")
}

/// Interactive terminal wizard against the configured store and backend.
pub fn run_tui(config_path: Option<PathBuf>) {
    let cfg = load_config(config_path.as_deref());
    init_logging(&cfg, true);

    info!(
        "[PHASE: initialization] Setup wizard TUI starting at {}",
        chrono::Utc::now()
    );

    let result = runtime().and_then(|rt| {
        let store = build_store(&cfg)?;
        let backend = build_backend(&cfg)?;
        info!(
            "[PHASE: initialization] [STEP: services] store={}, backend={}",
            store.describe(),
            backend.describe()
        );
        let controller = rt.block_on(async { build_controller(&cfg, store, backend) });
        tui::run(&rt, controller)
    });

    if let Err(e) = result {
        error!("[PHASE: tui] [STEP: fatal] TUI exited with error: {:?}", e);
        eprintln!("Setup wizard error: {:#}", e);
        std::process::exit(1);
    }
}

/// Non-interactive TUI smoke mode (for automated checks).
/// Renders a single frame to an in-memory backend and exits.
pub fn run_tui_smoke(target: Option<String>, config_path: Option<PathBuf>) {
    let cfg = load_config(config_path.as_deref());
    init_logging(&cfg, false);

    let target = target.as_deref().unwrap_or("welcome");
    if let Err(e) = tui::smoke(target) {
        error!(
            "[PHASE: tui] [STEP: smoke] TUI smoke exited with error: {:?}",
            e
        );
        eprintln!("Setup wizard error: {:#}", e);
        std::process::exit(1);
    }
    println!("tui-smoke ok: {}", target);
}

fn smoke_answers() -> Vec<(Section, &'static str, &'static str)> {
    vec![
        (Section::Database, "host", "localhost"),
        (Section::Database, "port", "5432"),
        (Section::Database, "name", "school"),
        (Section::Database, "username", "school_app"),
        (Section::Database, "password", "smoke-password"),
        (Section::Database, "type", "postgres"),
        (Section::School, "name", "Smoke Test Academy"),
        (Section::School, "phone", "+1 555 010 2000"),
        (Section::School, "address", "1 Test Way"),
        (Section::School, "brandColor", "#0F766E"),
        (Section::Admin, "firstName", "Ada"),
        (Section::Admin, "lastName", "Lovelace"),
        (Section::Admin, "email", "ada@smoke.test"),
        (Section::Admin, "password", "smoke-admin-pw"),
        (Section::Admin, "confirmPassword", "smoke-admin-pw"),
    ]
}

/// Walk the whole engine once: fill every page, advance to installing, run the pipeline.
/// Uses an in-memory store and the dry-run backend. Returns the printed transcript.
pub async fn install_smoke(phase_delay: Duration) -> Result<Vec<String>> {
    let transcript = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));

    let mut cfg = WizardConfig::default();
    cfg.install.phase_delay_ms = phase_delay.as_millis() as u64;
    cfg.persistence.save_debounce_ms = 0;

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut controller = build_controller(&cfg, Arc::clone(&store), Arc::new(DryRunBackend));

    let push = {
        let transcript = Arc::clone(&transcript);
        move |line: String| {
            if let Ok(mut t) = transcript.lock() {
                t.push(line);
            }
        }
    };

    let step = controller.mount().await;
    push(format!("mount: step={} index={}", step, step.index()));

    controller.advance()?;
    for (section, field, value) in smoke_answers() {
        let update = FieldUpdate::from_parts(section.as_str(), field, value.into())?;
        controller.update_field(update)?;
        if field == "type" || field == "brandColor" {
            let step = controller.advance()?;
            push(format!("advance: step={}", step));
        }
    }
    let step = controller.advance()?;
    push(format!("advance: step={}", step));
    controller.flush().await;
    push(format!(
        "saved: {}",
        if store.get(&cfg.store.key).await?.is_some() {
            "yes"
        } else {
            "no"
        }
    ));

    let emit: ProgressEmitter = {
        let push = push.clone();
        Arc::new(move |p: ProgressPayload| {
            push(serde_json::to_string(&p).unwrap_or_else(|_| "{}".to_string()));
        })
    };
    controller.run_installation(emit).await?;

    if let Some(result) = controller.last_result() {
        push(serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string()));
    }
    push(format!(
        "final: step={} cleared={}",
        controller.step(),
        store.get(&cfg.store.key).await?.is_none()
    ));

    let lines = transcript
        .lock()
        .map(|t| t.clone())
        .map_err(|_| anyhow::anyhow!("transcript lock poisoned"))?;
    Ok(lines)
}

/// Non-interactive install smoke (for automated verification / log capture).
/// Prints the event transcript and exits 0/1.
pub fn run_install_smoke(config_path: Option<PathBuf>) {
    let cfg = load_config(config_path.as_deref());
    init_logging(&cfg, false);

    info!(
        "[PHASE: initialization] Install smoke starting at {}",
        chrono::Utc::now()
    );

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime for install smoke")
        .and_then(|rt| rt.block_on(install_smoke(Duration::from_millis(50))));

    match result {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            error!(
                "[PHASE: install] [STEP: smoke] Smoke exited with error: {:?}",
                e
            );
            eprintln!("Setup wizard error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Print the effective configuration as TOML.
pub fn print_config(config_path: Option<PathBuf>) {
    let result = WizardConfig::load(config_path.as_deref()).and_then(|cfg| cfg.to_toml_string());
    match result {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    }
}
