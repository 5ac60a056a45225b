// Wizard steps + resume-point inference

use super::form::{Section, WizardFormState};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WizardStep {
    Welcome,
    Database,
    School,
    Admin,
    Installing,
    Complete,
}

/// Page order of the wizard. Indices are the numbers the UI shows.
pub const STEP_ORDER: [WizardStep; 6] = [
    WizardStep::Welcome,
    WizardStep::Database,
    WizardStep::School,
    WizardStep::Admin,
    WizardStep::Installing,
    WizardStep::Complete,
];

pub const FIRST_DATA_STEP: WizardStep = WizardStep::Database;
pub const FINAL_DATA_STEP: WizardStep = WizardStep::Admin;

impl WizardStep {
    pub fn index(&self) -> usize {
        STEP_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    pub fn from_index(index: usize) -> Option<WizardStep> {
        STEP_ORDER.get(index).copied()
    }

    /// Form section edited on this step, if any.
    pub fn section(&self) -> Option<Section> {
        match self {
            WizardStep::Database => Some(Section::Database),
            WizardStep::School => Some(Section::School),
            WizardStep::Admin => Some(Section::Admin),
            _ => None,
        }
    }

    pub fn for_section(section: Section) -> WizardStep {
        match section {
            Section::Database => WizardStep::Database,
            Section::School => WizardStep::School,
            Section::Admin => WizardStep::Admin,
        }
    }

    pub fn is_data_step(&self) -> bool {
        self.section().is_some()
    }

    pub fn title(&self) -> &'static str {
        match self {
            WizardStep::Welcome => "Welcome to School Setup",
            WizardStep::Database => "Database Connection",
            WizardStep::School => "School Profile",
            WizardStep::Admin => "Administrator Account",
            WizardStep::Installing => "Installing",
            WizardStep::Complete => "Setup Complete",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WizardStep::Welcome => "welcome",
            WizardStep::Database => "database",
            WizardStep::School => "school",
            WizardStep::Admin => "admin",
            WizardStep::Installing => "installing",
            WizardStep::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Pick the step a resumed session lands on.
///
/// Sections gate each other in order: an incomplete earlier section wins even when a later
/// section looks complete. An incomplete database section restarts from `Welcome`.
pub fn infer_step(state: &WizardFormState) -> WizardStep {
    if !state.database.is_complete() {
        return WizardStep::Welcome;
    }
    if !state.school.is_complete() {
        return WizardStep::School;
    }
    // Admin is the last data page whether or not it is filled; installing is an explicit action.
    FINAL_DATA_STEP
}
