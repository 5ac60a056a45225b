// Progress + result models emitted by the install pipeline
//
// Serialized in camelCase so a web front-end can consume them unchanged.

use super::form::Section;
use serde::Serialize;

/// One named phase of the install pipeline as shown on the progress page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStep {
    pub label: String,
    pub completed: bool,
}

/// Per-run progress table. Built fresh for every pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
    pub steps: Vec<InstallationStep>,
}

impl InstallProgress {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: labels
                .into_iter()
                .map(|label| InstallationStep {
                    label: label.into(),
                    completed: false,
                })
                .collect(),
        }
    }

    pub fn mark_completed(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.completed = true;
        }
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }

    /// `completed / total` in `[0.0, 1.0]`. An empty pipeline counts as done.
    pub fn fraction(&self) -> f64 {
        if self.steps.is_empty() {
            return 1.0;
        }
        self.completed_count() as f64 / self.steps.len() as f64
    }

    pub fn percent(&self) -> i32 {
        (self.fraction() * 100.0).round() as i32
    }

    pub fn is_done(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub correlation_id: String,
    pub step: String,
    pub severity: Severity,
    pub phase: String,
    pub percent: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResultEvent {
    pub correlation_id: String,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Outcome of the three finalize calls for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReport {
    pub succeeded: Vec<Section>,
    pub failed: Vec<FinalizeFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeFailure {
    pub section: Section,
    pub message: String,
}

impl FinalizeReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn pending_sections(&self) -> Vec<Section> {
        self.failed.iter().map(|f| f.section).collect()
    }
}

impl std::fmt::Display for FinalizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ok: Vec<&str> = self.succeeded.iter().map(|s| s.as_str()).collect();
        let failed: Vec<String> = self
            .failed
            .iter()
            .map(|x| format!("{} ({})", x.section, x.message))
            .collect();
        write!(
            f,
            "saved: [{}]; needs retry: [{}]",
            ok.join(", "),
            failed.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_after_three_of_five_phases() {
        let mut progress = InstallProgress::new(["a", "b", "c", "d", "e"]);
        for i in 0..3 {
            progress.mark_completed(i);
        }
        assert_eq!(progress.percent(), 60);
        assert!((progress.fraction() - 0.6).abs() < f64::EPSILON);
        assert!(progress.steps[2].completed);
        assert!(!progress.steps[3].completed);
        assert!(!progress.is_done());
    }

    #[test]
    fn empty_pipeline_is_done() {
        let progress = InstallProgress::default();
        assert!(progress.is_done());
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn progress_payload_serializes_camel_case() {
        let payload = ProgressPayload {
            correlation_id: "corr-1".to_string(),
            step: "phase_2".to_string(),
            severity: Severity::Info,
            phase: "install".to_string(),
            percent: 40,
            message: "Installing core modules".to_string(),
            elapsed_ms: Some(12),
        };
        let json = serde_json::to_string(&payload).expect("Should serialize");
        assert!(json.contains("\"correlationId\":\"corr-1\""), "{}", json);
        assert!(json.contains("\"severity\":\"info\""), "{}", json);
        assert!(json.contains("\"elapsedMs\":12"), "{}", json);
    }

    #[test]
    fn finalize_report_lists_pending_sections() {
        let report = FinalizeReport {
            succeeded: vec![Section::Database],
            failed: vec![FinalizeFailure {
                section: Section::School,
                message: "HTTP 503".to_string(),
            }],
        };
        assert!(!report.is_success());
        assert_eq!(report.pending_sections(), vec![Section::School]);
        let text = report.to_string();
        assert!(text.contains("saved: [database]"), "{}", text);
        assert!(text.contains("school (HTTP 503)"), "{}", text);
    }
}
