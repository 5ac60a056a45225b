//! Terminal UI wizard.
//!
//! Layout:
//! - Centered window frame titled "School Setup"
//! - Left banner panel, page content on the right
//! - Bottom button row: [ Back ] [ Next ] [ Cancel ]
//! - Modal confirmations (Cancel, install errors)
//!
//! Note: Logging is file-only in TUI mode (stdout logging is disabled) to avoid corrupting the terminal UI.

use crate::api::installer::ProgressEmitter;
use crate::models::form::{
    FieldUpdate, FieldValue, LogoFile, SchoolField, Section, WizardFormState,
};
use crate::models::responses::{InstallProgress, ProgressPayload, Severity};
use crate::models::step::{WizardStep, STEP_ORDER};
use crate::utils::validation::FieldError;
use crate::wizard::{WizardController, WizardError};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use log::{error, info, warn};
use ratatui::backend::{CrosstermBackend, TestBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const BANNER: &str = r#"
   _____      __                __
  / ___/_____/ /_  ____  ____  / /
  \__ \/ ___/ __ \/ __ \/ __ \/ /
 ___/ / /__/ / / / /_/ / /_/ / /
/____/\___/_/ /_/\____/\____/_/

        S E T U P
"#;

const MAX_DETAIL_LINES: usize = 20;

struct FieldSpec {
    key: &'static str,
    label: &'static str,
    masked: bool,
    /// Empty input clears the value instead of storing "".
    optional: bool,
}

const fn field(key: &'static str, label: &'static str) -> FieldSpec {
    FieldSpec {
        key,
        label,
        masked: false,
        optional: false,
    }
}

const DATABASE_FIELDS: [FieldSpec; 6] = [
    field("host", "Host"),
    FieldSpec {
        optional: true,
        ..field("port", "Port")
    },
    field("name", "Database name"),
    field("username", "Username"),
    FieldSpec {
        masked: true,
        ..field("password", "Password")
    },
    FieldSpec {
        optional: true,
        ..field("type", "Type")
    },
];

const SCHOOL_FIELDS: [FieldSpec; 5] = [
    field("name", "School name"),
    field("phone", "Phone"),
    field("address", "Address"),
    field("brandColor", "Brand color"),
    // Path to an image file; read when leaving the page.
    field("logo", "Logo file"),
];

const ADMIN_FIELDS: [FieldSpec; 5] = [
    field("firstName", "First name"),
    field("lastName", "Last name"),
    field("email", "Email"),
    FieldSpec {
        masked: true,
        ..field("password", "Password")
    },
    FieldSpec {
        masked: true,
        ..field("confirmPassword", "Confirm password")
    },
];

fn fields_for(step: WizardStep) -> &'static [FieldSpec] {
    match step.section() {
        Some(Section::Database) => &DATABASE_FIELDS,
        Some(Section::School) => &SCHOOL_FIELDS,
        Some(Section::Admin) => &ADMIN_FIELDS,
        None => &[],
    }
}

fn field_text(form: &WizardFormState, section: Section, key: &str) -> String {
    let db = &form.database;
    let school = &form.school;
    let admin = &form.admin;
    match (section, key) {
        (Section::Database, "host") => db.host.clone(),
        (Section::Database, "port") => db.port.map(|p| p.to_string()).unwrap_or_default(),
        (Section::Database, "name") => db.name.clone(),
        (Section::Database, "username") => db.username.clone(),
        (Section::Database, "password") => db.password.clone(),
        (Section::Database, "type") => db.db_type.clone().unwrap_or_default(),
        (Section::School, "name") => school.name.clone(),
        (Section::School, "phone") => school.phone.clone(),
        (Section::School, "address") => school.address.clone(),
        (Section::School, "brandColor") => school.brand_color.clone(),
        (Section::School, "logo") => school.logo_preview.clone().unwrap_or_default(),
        (Section::Admin, "firstName") => admin.first_name.clone(),
        (Section::Admin, "lastName") => admin.last_name.clone(),
        (Section::Admin, "email") => admin.email.clone(),
        (Section::Admin, "password") => admin.password.clone(),
        (Section::Admin, "confirmPassword") => admin.confirm_password.clone(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone)]
struct TextInput {
    value: String,
    // Cursor position in chars, not bytes.
    cursor: usize,
    masked: bool,
}

impl TextInput {
    fn new(value: impl Into<String>, masked: bool) -> Self {
        let v = value.into();
        Self {
            cursor: v.chars().count(),
            value: v,
            masked,
        }
    }

    fn len(&self) -> usize {
        self.value.chars().count()
    }

    fn byte_at(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    fn display(&self) -> String {
        if self.masked {
            "*".repeat(self.len())
        } else {
            self.value.clone()
        }
    }

    /// Returns true when the value changed.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char(c) => {
                let at = self.byte_at(self.cursor);
                self.value.insert(at, c);
                self.cursor += 1;
                true
            }
            KeyCode::Backspace => {
                if self.cursor == 0 {
                    return false;
                }
                let at = self.byte_at(self.cursor - 1);
                self.value.remove(at);
                self.cursor -= 1;
                true
            }
            KeyCode::Delete => {
                if self.cursor >= self.len() {
                    return false;
                }
                let at = self.byte_at(self.cursor);
                self.value.remove(at);
                true
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                false
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(self.len());
                false
            }
            KeyCode::Home => {
                self.cursor = 0;
                false
            }
            KeyCode::End => {
                self.cursor = self.len();
                false
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonFocus {
    Back,
    Next,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Field(usize),
    Button(ButtonFocus),
}

#[derive(Debug, Clone)]
enum Modal {
    ConfirmCancel,
    Message { title: String, body: String },
}

/// Everything `draw` needs. Mirrors the controller so frames can be rendered without it.
struct Ui {
    step: WizardStep,
    form: WizardFormState,
    inputs: Vec<TextInput>,
    focus: Focus,
    errors: Vec<FieldError>,
    progress: InstallProgress,
    last_event: Option<ProgressPayload>,
    detail: Vec<String>,
    install_running: bool,
    install_error: Option<String>,
    modal: Option<Modal>,
    // Saved form still being read; nothing is editable yet.
    loading: bool,
    quit: bool,
}

impl Ui {
    fn new(step: WizardStep, form: WizardFormState, progress: InstallProgress) -> Self {
        let mut ui = Self {
            step,
            form,
            inputs: Vec::new(),
            focus: Focus::Button(ButtonFocus::Next),
            errors: Vec::new(),
            progress,
            last_event: None,
            detail: Vec::new(),
            install_running: false,
            install_error: None,
            modal: None,
            loading: false,
            quit: false,
        };
        ui.load_page();
        ui
    }

    /// Placeholder shown between mount and `ready`.
    fn loading() -> Self {
        let mut ui = Self::new(
            WizardStep::Welcome,
            WizardFormState::default(),
            InstallProgress::new(crate::api::installer::DEFAULT_PHASE_LABELS),
        );
        ui.loading = true;
        ui
    }

    fn from_controller(controller: &WizardController) -> Self {
        Self::new(
            controller.step(),
            controller.state().clone(),
            controller.progress().clone(),
        )
    }

    /// Rebuild the inputs for the current step from the form.
    fn load_page(&mut self) {
        self.inputs = match self.step.section() {
            Some(section) => fields_for(self.step)
                .iter()
                .map(|f| TextInput::new(field_text(&self.form, section, f.key), f.masked))
                .collect(),
            None => Vec::new(),
        };
        self.errors.clear();
        self.focus = if self.inputs.is_empty() {
            Focus::Button(ButtonFocus::Next)
        } else {
            Focus::Field(0)
        };
    }

    fn sync(&mut self, controller: &WizardController) {
        let step_changed = self.step != controller.step();
        self.step = controller.step();
        self.form = controller.state().clone();
        self.progress = controller.progress().clone();
        if step_changed {
            self.load_page();
        }
    }

    fn field_errors<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        let section = self.step.section();
        self.errors
            .iter()
            .filter(move |e| Some(e.section) == section && e.field == key)
    }

    fn push_detail(&mut self, line: String) {
        self.detail.push(line);
        if self.detail.len() > MAX_DETAIL_LINES {
            let start = self.detail.len() - MAX_DETAIL_LINES;
            self.detail.drain(..start);
        }
    }
}

fn page_title(step: WizardStep) -> String {
    let data_steps = STEP_ORDER.iter().filter(|s| s.is_data_step()).count();
    if step.is_data_step() {
        format!("{} (step {} of {})", step.title(), step.index(), data_steps)
    } else {
        step.title().to_string()
    }
}

fn next_label(ui: &Ui) -> &'static str {
    match ui.step {
        WizardStep::Admin => "Install",
        WizardStep::Installing => "Retry",
        WizardStep::Complete => "Finish",
        _ => "Next",
    }
}

fn can_go_back(ui: &Ui) -> bool {
    !ui.loading && matches!(ui.step, WizardStep::School | WizardStep::Admin)
}

fn can_go_next(ui: &Ui) -> bool {
    if ui.loading {
        return false;
    }
    match ui.step {
        WizardStep::Installing => !ui.install_running && ui.install_error.is_some(),
        _ => true,
    }
}

fn can_cancel(ui: &Ui) -> bool {
    ui.step != WizardStep::Complete && !ui.install_running
}

/// Owns the controller between frames. While mounting or installing the controller lives in
/// the task.
struct Session<'a> {
    rt: &'a Runtime,
    controller: Option<WizardController>,
    mount_task: Option<JoinHandle<WizardController>>,
    ready: watch::Receiver<bool>,
    install_task: Option<JoinHandle<(WizardController, Result<(), WizardError>)>>,
    tx: mpsc::Sender<ProgressPayload>,
    rx: mpsc::Receiver<ProgressPayload>,
}

impl<'a> Session<'a> {
    /// Start loading the saved form in the background.
    fn mounting(rt: &'a Runtime, mut controller: WizardController) -> Self {
        let ready = controller.subscribe_ready();
        let mount_task = rt.spawn(async move {
            controller.mount().await;
            controller
        });
        let (tx, rx) = mpsc::channel::<ProgressPayload>();
        Self {
            rt,
            controller: None,
            mount_task: Some(mount_task),
            ready,
            install_task: None,
            tx,
            rx,
        }
    }
}

pub fn run(rt: &Runtime, controller: WizardController) -> Result<()> {
    info!("[PHASE: tui] [STEP: start] Starting TUI wizard");

    let mut session = Session::mounting(rt, controller);
    let mut ui = Ui::loading();

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, &mut ui, &mut session);
    restore_terminal(&mut terminal)?;

    // Cancelled while loading: wait for the read to finish so nothing is left mid-flight.
    if let Some(task) = session.mount_task.take() {
        if let Ok(controller) = rt.block_on(task) {
            session.controller = Some(controller);
        }
    }
    if let Some(controller) = session.controller.as_ref() {
        rt.block_on(controller.flush());
    }
    info!(
        "[PHASE: tui] [STEP: exit] TUI closed on step '{}'",
        ui.step
    );
    result
}

fn sample_form(step: WizardStep) -> WizardFormState {
    let mut form = WizardFormState::default();
    if step.index() >= WizardStep::Database.index() {
        form.database.host = "db.district.local".into();
        form.database.port = Some(5432);
        form.database.db_type = Some("postgres".into());
    }
    if step.index() > WizardStep::Database.index() {
        form.database.name = "school".into();
        form.database.username = "school_app".into();
        form.database.password = "sample-password".into();
        form.school.name = "Riverside High".into();
        form.school.brand_color = "#1E40AF".into();
    }
    if step.index() > WizardStep::School.index() {
        form.school.phone = "+1 (555) 010-2000".into();
        form.school.address = "1 River Rd".into();
        form.admin.first_name = "Ada".into();
        form.admin.email = "ada@riverside.edu".into();
        form.admin.password = "sample-password".into();
    }
    form
}

fn new_smoke_ui(target: &str) -> Result<Ui> {
    let step = STEP_ORDER
        .iter()
        .copied()
        .find(|s| s.to_string() == target)
        .with_context(|| format!("Unknown smoke page '{}'", target))?;

    let mut ui = Ui::new(
        step,
        sample_form(step),
        InstallProgress::new(crate::api::installer::DEFAULT_PHASE_LABELS),
    );
    match step {
        WizardStep::School => {
            ui.errors.push(FieldError {
                section: Section::School,
                field: "phone",
                message: "Phone number is required.".to_string(),
            });
        }
        WizardStep::Installing => {
            for i in 0..3 {
                ui.progress.mark_completed(i);
            }
            ui.install_running = true;
            ui.last_event = Some(ProgressPayload {
                correlation_id: "smoke".to_string(),
                step: "phase_4".to_string(),
                severity: Severity::Info,
                phase: "install".to_string(),
                percent: ui.progress.percent(),
                message: "Preparing administrator account...".to_string(),
                elapsed_ms: None,
            });
            ui.push_detail("Configuring school profile done".to_string());
        }
        _ => {}
    }
    Ok(ui)
}

/// Non-interactive smoke mode: render a single frame and exit.
/// Target pages: welcome|database|school|admin|installing|complete
pub fn smoke(target: &str) -> Result<()> {
    info!(
        "[PHASE: tui] [STEP: smoke] Rendering single-frame TUI smoke target={}",
        target
    );

    let t = target.trim().to_ascii_lowercase();
    let ui = new_smoke_ui(t.as_str())?;

    // In-memory backend: no raw mode / alternate screen.
    let backend = TestBackend::new(100, 30);
    let mut terminal = Terminal::new(backend)?;
    terminal.draw(|f| draw(f.size(), f, &ui))?;

    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ui: &mut Ui,
    session: &mut Session<'_>,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    while !ui.quit {
        poll_mount(ui, session)?;
        poll_install(ui, session);
        terminal.draw(|f| draw(f.size(), f, ui))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                handle_key(ui, session, key.code);
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    Ok(())
}

/// Swap the loading page for the resumed page once the saved form has been read.
fn poll_mount(ui: &mut Ui, session: &mut Session<'_>) -> Result<()> {
    let Some(task) = session.mount_task.as_ref() else {
        return Ok(());
    };
    // A finished task without `ready` means mount never got through load.
    if !*session.ready.borrow() && !task.is_finished() {
        return Ok(());
    }
    let Some(task) = session.mount_task.take() else {
        return Ok(());
    };
    let controller = session
        .rt
        .block_on(task)
        .context("Loading the saved form failed")?;

    let modal = ui.modal.take();
    let focus = ui.focus;
    let quit = ui.quit;
    *ui = Ui::from_controller(&controller);
    if modal.is_some() {
        ui.modal = modal;
        ui.focus = focus;
    }
    ui.quit = quit;
    info!(
        "[PHASE: tui] [STEP: mount] Resumed on step '{}'",
        controller.step()
    );
    session.controller = Some(controller);
    Ok(())
}

fn poll_install(ui: &mut Ui, session: &mut Session<'_>) {
    while let Ok(p) = session.rx.try_recv() {
        if let Some(i) = p.step.strip_prefix("phase_").and_then(|n| n.parse::<usize>().ok()) {
            if p.message.ends_with(" done") && i > 0 {
                ui.progress.mark_completed(i - 1);
            }
        }
        if !p.message.trim().is_empty() {
            ui.push_detail(p.message.clone());
        }
        ui.last_event = Some(p);
    }

    let finished = session
        .install_task
        .as_ref()
        .map(|t| t.is_finished())
        .unwrap_or(false);
    if !finished {
        return;
    }
    let Some(task) = session.install_task.take() else {
        return;
    };
    ui.install_running = false;

    match session.rt.block_on(task) {
        Ok((controller, result)) => {
            ui.sync(&controller);
            match result {
                Ok(()) => {
                    ui.install_error = None;
                    ui.focus = Focus::Button(ButtonFocus::Next);
                }
                Err(e) => {
                    let body = e.to_string();
                    ui.install_error = Some(body.clone());
                    ui.modal = Some(Modal::Message {
                        title: "Installation failed".to_string(),
                        body,
                    });
                }
            }
            session.controller = Some(controller);
        }
        Err(e) => {
            error!("[PHASE: tui] [STEP: install] Install task aborted: {}", e);
            ui.install_error = Some(format!("Installer task stopped unexpectedly: {}", e));
            ui.modal = Some(Modal::Message {
                title: "Installation failed".to_string(),
                body: "The installer stopped unexpectedly. Your answers are saved; restart the wizard to resume.".to_string(),
            });
        }
    }
}

fn start_install(ui: &mut Ui, session: &mut Session<'_>) {
    let Some(mut controller) = session.controller.take() else {
        return;
    };
    let tx = session.tx.clone();
    let emit: ProgressEmitter = Arc::new(move |p: ProgressPayload| {
        let _ = tx.send(p);
    });

    ui.install_running = true;
    ui.install_error = None;
    ui.detail.clear();
    ui.last_event = None;
    ui.progress = InstallProgress::new(ui.progress.steps.iter().map(|s| s.label.clone()));

    session.install_task = Some(session.rt.spawn(async move {
        let result = controller.run_installation(emit).await;
        (controller, result)
    }));
}

fn load_logo(path: &str) -> Result<LogoFile> {
    let path = Path::new(path.trim());
    let bytes = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(LogoFile {
        file_name,
        content_type: content_type.to_string(),
        bytes,
    })
}

/// Send the edited input to the controller as a single-field update.
fn commit_field(ui: &mut Ui, session: &mut Session<'_>, idx: usize) {
    let Some(section) = ui.step.section() else {
        return;
    };
    let Some(spec) = fields_for(ui.step).get(idx) else {
        return;
    };
    // Logo path is only read on Next.
    if spec.key == "logo" {
        return;
    }
    let Some(controller) = session.controller.as_mut() else {
        return;
    };

    let raw = ui.inputs[idx].value.clone();
    let value = if spec.optional && raw.trim().is_empty() {
        FieldValue::Empty
    } else {
        FieldValue::Text(raw)
    };

    ui.errors.retain(|e| e.field != spec.key);
    match FieldUpdate::from_parts(section.as_str(), spec.key, value) {
        Ok(update) => {
            if controller.update_field(update).is_ok() {
                ui.form = controller.state().clone();
            }
        }
        Err(e) => {
            warn!("[PHASE: tui] [STEP: edit] Rejected input for {}.{}: {}", section, spec.key, e);
            ui.errors.push(FieldError {
                section,
                field: spec.key,
                message: format!("{} has an invalid value.", spec.label),
            });
        }
    }
}

fn commit_logo(ui: &mut Ui, session: &mut Session<'_>) -> bool {
    let Some(idx) = SCHOOL_FIELDS.iter().position(|f| f.key == "logo") else {
        return true;
    };
    let Some(controller) = session.controller.as_mut() else {
        return false;
    };
    let path = ui.inputs.get(idx).map(|i| i.value.trim().to_string()).unwrap_or_default();
    let current = controller.state().school.logo_preview.clone().unwrap_or_default();
    if path == current {
        return true;
    }
    if path.is_empty() {
        let cleared = controller
            .update_field(FieldUpdate::School(SchoolField::Logo(None)))
            .and_then(|_| {
                controller.update_field(FieldUpdate::School(SchoolField::LogoPreview(None)))
            });
        ui.form = controller.state().clone();
        return cleared.is_ok();
    }
    match load_logo(&path) {
        Ok(logo) => {
            info!(
                "[PHASE: tui] [STEP: logo] Loaded logo {} ({} bytes, {})",
                logo.file_name,
                logo.bytes.len(),
                logo.content_type
            );
            let stored = controller
                .update_field(FieldUpdate::School(SchoolField::Logo(Some(logo))))
                .and_then(|_| {
                    controller
                        .update_field(FieldUpdate::School(SchoolField::LogoPreview(Some(path))))
                });
            ui.form = controller.state().clone();
            stored.is_ok()
        }
        Err(e) => {
            ui.errors.push(FieldError {
                section: Section::School,
                field: "logo",
                message: format!("{:#}", e),
            });
            ui.focus = Focus::Field(idx);
            false
        }
    }
}

fn go_next(ui: &mut Ui, session: &mut Session<'_>) {
    if !can_go_next(ui) {
        return;
    }
    match ui.step {
        WizardStep::Complete => {
            ui.quit = true;
            return;
        }
        WizardStep::Installing => {
            start_install(ui, session);
            return;
        }
        WizardStep::School => {
            if !commit_logo(ui, session) {
                return;
            }
        }
        _ => {}
    }

    let Some(controller) = session.controller.as_mut() else {
        return;
    };
    match controller.advance() {
        Ok(step) => {
            ui.sync(controller);
            if step == WizardStep::Installing {
                start_install(ui, session);
            }
        }
        Err(WizardError::Validation(errors)) => {
            let first = errors.first().map(|e| e.field);
            ui.errors = errors;
            if let Some(idx) =
                first.and_then(|f| fields_for(ui.step).iter().position(|s| s.key == f))
            {
                ui.focus = Focus::Field(idx);
            } else if let Some(section) = ui.errors.first().map(|e| e.section) {
                ui.modal = Some(Modal::Message {
                    title: "Check your answers".to_string(),
                    body: format!(
                        "The {} page has fields that need attention. Go Back to fix them.",
                        WizardStep::for_section(section).title()
                    ),
                });
            }
        }
        Err(e) => {
            ui.modal = Some(Modal::Message {
                title: "Cannot continue".to_string(),
                body: e.to_string(),
            });
        }
    }
}

fn go_back(ui: &mut Ui, session: &mut Session<'_>) {
    if !can_go_back(ui) {
        return;
    }
    if let Some(controller) = session.controller.as_mut() {
        controller.retreat();
        ui.sync(controller);
    }
}

fn next_focus(ui: &Ui, forward: bool) -> Focus {
    let n = ui.inputs.len();
    let order: Vec<Focus> = (0..n)
        .map(Focus::Field)
        .chain([
            Focus::Button(ButtonFocus::Back),
            Focus::Button(ButtonFocus::Next),
            Focus::Button(ButtonFocus::Cancel),
        ])
        .collect();
    let pos = order.iter().position(|f| *f == ui.focus).unwrap_or(0);
    let len = order.len();
    if forward {
        order[(pos + 1) % len]
    } else {
        order[(pos + len - 1) % len]
    }
}

fn handle_key(ui: &mut Ui, session: &mut Session<'_>, code: KeyCode) {
    if let Some(modal) = ui.modal.clone() {
        match modal {
            Modal::ConfirmCancel => match code {
                KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
                    ui.focus = if ui.focus == Focus::Button(ButtonFocus::Cancel) {
                        Focus::Button(ButtonFocus::Next)
                    } else {
                        Focus::Button(ButtonFocus::Cancel)
                    };
                }
                KeyCode::Enter => {
                    if ui.focus == Focus::Button(ButtonFocus::Cancel) {
                        info!("[PHASE: tui] [STEP: cancel] User cancelled; saved answers kept");
                        ui.quit = true;
                    }
                    ui.modal = None;
                    ui.focus = Focus::Button(ButtonFocus::Next);
                }
                KeyCode::Esc => {
                    ui.modal = None;
                    ui.focus = Focus::Button(ButtonFocus::Next);
                }
                _ => {}
            },
            Modal::Message { .. } => {
                if matches!(code, KeyCode::Enter | KeyCode::Esc) {
                    ui.modal = None;
                    ui.focus = Focus::Button(ButtonFocus::Next);
                }
            }
        }
        return;
    }

    match code {
        KeyCode::Esc => {
            if can_cancel(ui) {
                ui.modal = Some(Modal::ConfirmCancel);
                ui.focus = Focus::Button(ButtonFocus::Next);
            }
        }
        KeyCode::Tab | KeyCode::Down => ui.focus = next_focus(ui, true),
        KeyCode::BackTab | KeyCode::Up => ui.focus = next_focus(ui, false),
        KeyCode::Enter => match ui.focus {
            Focus::Field(_) => ui.focus = next_focus(ui, true),
            Focus::Button(ButtonFocus::Back) => go_back(ui, session),
            Focus::Button(ButtonFocus::Next) => go_next(ui, session),
            Focus::Button(ButtonFocus::Cancel) => {
                if can_cancel(ui) {
                    ui.modal = Some(Modal::ConfirmCancel);
                    ui.focus = Focus::Button(ButtonFocus::Next);
                }
            }
        },
        other => match ui.focus {
            Focus::Field(idx) => {
                let changed = ui
                    .inputs
                    .get_mut(idx)
                    .map(|input| input.handle_key(other))
                    .unwrap_or(false);
                if changed {
                    commit_field(ui, session, idx);
                }
            }
            Focus::Button(b) => {
                ui.focus = match (other, b) {
                    (KeyCode::Left, ButtonFocus::Next) => Focus::Button(ButtonFocus::Back),
                    (KeyCode::Left, ButtonFocus::Cancel) => Focus::Button(ButtonFocus::Next),
                    (KeyCode::Right, ButtonFocus::Back) => Focus::Button(ButtonFocus::Next),
                    (KeyCode::Right, ButtonFocus::Next) => Focus::Button(ButtonFocus::Cancel),
                    _ => ui.focus,
                };
            }
        },
    }
}

fn page_text(ui: &Ui) -> Text<'static> {
    if ui.loading {
        return Text::from(vec![
            Line::from("Loading saved answers..."),
            Line::from(""),
            Line::from("The wizard opens on the page where you left off."),
        ]);
    }
    match ui.step {
        WizardStep::Welcome => Text::from(vec![
            Line::from("This wizard sets up your school on the platform."),
            Line::from(""),
            Line::from("You will be asked for:"),
            Line::from("  1. Database connection"),
            Line::from("  2. School profile"),
            Line::from("  3. Administrator account"),
            Line::from(""),
            Line::from("Answers are saved as you type. If you close the wizard, it resumes"),
            Line::from("where you left off."),
        ]),
        WizardStep::Database | WizardStep::School | WizardStep::Admin => {
            let mut lines = Vec::new();
            for (i, spec) in fields_for(ui.step).iter().enumerate() {
                let focused = ui.focus == Focus::Field(i);
                let value = ui.inputs.get(i).map(|t| t.display()).unwrap_or_default();
                let value_style = if focused {
                    Style::default().add_modifier(Modifier::REVERSED)
                } else {
                    Style::default().add_modifier(Modifier::UNDERLINED)
                };
                lines.push(Line::from(vec![
                    Span::raw(format!("{:<18}", spec.label)),
                    Span::styled(format!("{:<32}", value), value_style),
                ]));
                for err in ui.field_errors(spec.key) {
                    lines.push(Line::from(Span::styled(
                        format!("{:<18}{}", "", err.message),
                        Style::default().fg(Color::Red),
                    )));
                }
            }
            lines.push(Line::from(""));
            lines.push(Line::from(
                "Tab/Shift+Tab move between fields. Enter on Next to continue.",
            ));
            Text::from(lines)
        }
        WizardStep::Installing => {
            let pct = ui.progress.percent().clamp(0, 100);
            let width = 30usize;
            let filled = ((pct as usize) * width) / 100;
            let bar = format!(
                "[{}{}] {}%",
                "#".repeat(filled),
                " ".repeat(width.saturating_sub(filled)),
                pct
            );
            let msg = ui
                .last_event
                .as_ref()
                .map(|p| p.message.clone())
                .unwrap_or_default();

            let mut lines = vec![
                Line::from(bar),
                Line::from(format!("Current action: {}", msg)),
                Line::from(""),
            ];
            for s in &ui.progress.steps {
                let mark = if s.completed { "[x]" } else { "[ ]" };
                lines.push(Line::from(format!("  {} {}", mark, s.label)));
            }
            lines.push(Line::from(""));
            for l in ui.detail.iter().rev().take(6).rev() {
                lines.push(Line::from(l.clone()));
            }
            if let Some(err) = &ui.install_error {
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    err.clone(),
                    Style::default().fg(Color::Red),
                )));
                lines.push(Line::from("Select Retry to run the installation again."));
            }
            Text::from(lines)
        }
        WizardStep::Complete => Text::from(vec![
            Line::from(format!(
                "{} is ready.",
                if ui.form.school.name.trim().is_empty() {
                    "Your school"
                } else {
                    ui.form.school.name.trim()
                }
            )),
            Line::from(""),
            Line::from(format!(
                "Sign in as {} to finish configuring the platform.",
                ui.form.admin.email.trim()
            )),
            Line::from(""),
            Line::from("Select Finish to exit."),
        ]),
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame<'_>, ui: &Ui) {
    let window_area = centered_window(area, 100, 30);

    let outer_block = Block::default().borders(Borders::ALL).title("School Setup");
    f.render_widget(outer_block, window_area);

    // Inner layout: banner + content + buttons row
    let inner = window_area.inner(&ratatui::layout::Margin {
        vertical: 1,
        horizontal: 1,
    });
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)].as_ref())
        .split(inner);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(38), Constraint::Min(0)].as_ref())
        .split(rows[0]);

    let logo = Paragraph::new(BANNER)
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });
    f.render_widget(logo, cols[0]);

    let title = if ui.loading {
        "Loading".to_string()
    } else {
        page_title(ui.step)
    };
    let content_block = Block::default().borders(Borders::ALL).title(title);
    f.render_widget(content_block, cols[1]);
    let content_inner = cols[1].inner(&ratatui::layout::Margin {
        vertical: 1,
        horizontal: 1,
    });
    let content = Paragraph::new(page_text(ui))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });
    f.render_widget(content, content_inner);

    draw_buttons(f, rows[1], ui);

    match ui.modal.as_ref() {
        Some(Modal::ConfirmCancel) => draw_cancel_modal(f, window_area, ui),
        Some(Modal::Message { title, body }) => draw_message_modal(f, window_area, title, body),
        None => {}
    }
}

fn centered_window(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width.saturating_sub(2)).max(60).min(area.width);
    let h = height.min(area.height.saturating_sub(2)).max(20).min(area.height);
    let x = area.x + (area.width.saturating_sub(w)) / 2;
    let y = area.y + (area.height.saturating_sub(h)) / 2;
    Rect {
        x,
        y,
        width: w,
        height: h,
    }
}

fn modal_area(window_area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(window_area.width.saturating_sub(4)).max(30);
    let h = height.min(window_area.height);
    Rect {
        x: window_area.x + (window_area.width.saturating_sub(w)) / 2,
        y: window_area.y + (window_area.height.saturating_sub(h)) / 2,
        width: w,
        height: h,
    }
}

fn draw_buttons(f: &mut ratatui::Frame<'_>, area: Rect, ui: &Ui) {
    let back = button_text(
        "Back",
        ui.focus == Focus::Button(ButtonFocus::Back),
        can_go_back(ui),
    );
    let next = button_text(
        next_label(ui),
        ui.focus == Focus::Button(ButtonFocus::Next),
        can_go_next(ui),
    );
    let cancel = button_text(
        "Cancel",
        ui.focus == Focus::Button(ButtonFocus::Cancel),
        can_cancel(ui),
    );

    let line = Line::from(vec![back, Span::raw(" "), next, Span::raw(" "), cancel]);
    let p = Paragraph::new(Text::from(line)).alignment(Alignment::Right);
    f.render_widget(p, area);
}

fn button_text(label: &str, focused: bool, enabled: bool) -> Span<'static> {
    let mut style = Style::default();
    if !enabled {
        style = style.fg(Color::DarkGray);
    }
    if focused && enabled {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(format!("[ {} ]", label), style)
}

fn draw_cancel_modal(f: &mut ratatui::Frame<'_>, window_area: Rect, ui: &Ui) {
    let area = modal_area(window_area, 60, 7);
    f.render_widget(Clear, area);

    let block = Block::default().borders(Borders::ALL).title("Cancel Setup?");
    let body = Paragraph::new(Text::from(vec![
        Line::from("Your answers are saved. Run the wizard again to resume."),
        Line::from(""),
        Line::from(""),
    ]))
    .block(block)
    .wrap(Wrap { trim: false });
    f.render_widget(body, area);

    let buttons_area = Rect {
        x: area.x + 1,
        y: area.y + area.height.saturating_sub(2),
        width: area.width.saturating_sub(2),
        height: 1,
    };
    let yes = button_text(
        "Yes, cancel",
        ui.focus == Focus::Button(ButtonFocus::Cancel),
        true,
    );
    let no = button_text("No", ui.focus == Focus::Button(ButtonFocus::Next), true);
    let line = Line::from(vec![yes, Span::raw(" "), no]);
    f.render_widget(
        Paragraph::new(Text::from(line)).alignment(Alignment::Right),
        buttons_area,
    );
}

fn draw_message_modal(f: &mut ratatui::Frame<'_>, window_area: Rect, title: &str, body: &str) {
    let area = modal_area(window_area, 70, 10);
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string());
    let p = Paragraph::new(Text::from(vec![
        Line::from(body.to_string()),
        Line::from(""),
        Line::from("Press Enter to continue."),
    ]))
    .block(block)
    .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}
