// Input validation utilities
//
// Per-section checks run before the wizard leaves a data step. They report every failing field
// at once so the page can render messages inline.

use crate::models::form::{AdminSection, DatabaseSection, SchoolSection, Section, WizardFormState};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;

pub const SUPPORTED_DB_TYPES: [&str; 4] = ["postgres", "mysql", "sqlite", "mssql"];
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub section: Section,
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}: {}", self.section, self.field, self.message)
    }
}

fn is_match(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

struct Checker {
    section: Section,
    errors: Vec<FieldError>,
}

impl Checker {
    fn new(section: Section) -> Self {
        Self {
            section,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            section: self.section,
            field,
            message: message.into(),
        });
    }

    /// Returns true when the value is present so callers can chain format checks.
    fn required(&mut self, field: &'static str, label: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.fail(field, format!("{} is required.", label));
            return false;
        }
        true
    }
}

pub fn validate_database(db: &DatabaseSection) -> Vec<FieldError> {
    let mut c = Checker::new(Section::Database);
    c.required("host", "Database host", &db.host);
    if c.required("name", "Database name", &db.name) && db.name.contains('\0') {
        c.fail("name", "Database name cannot contain null bytes.");
    }
    c.required("username", "Database username", &db.username);
    c.required("password", "Database password", &db.password);

    if db.port == Some(0) {
        c.fail("port", "Port must be between 1 and 65535.");
    }
    if let Some(t) = db.db_type.as_deref() {
        let t = t.trim().to_ascii_lowercase();
        if !t.is_empty() && !SUPPORTED_DB_TYPES.contains(&t.as_str()) {
            c.fail(
                "type",
                format!("Database type must be one of: {}.", SUPPORTED_DB_TYPES.join(", ")),
            );
        }
    }
    c.errors
}

pub fn validate_school(school: &SchoolSection) -> Vec<FieldError> {
    let mut c = Checker::new(Section::School);
    c.required("name", "School name", &school.name);
    if c.required("phone", "Phone number", &school.phone) {
        let phone = school.phone.trim();
        let digits = phone.chars().filter(|ch| ch.is_ascii_digit()).count();
        if !is_match(r"^\+?[0-9 ()\-]+$", phone) || !(7..=20).contains(&digits) {
            c.fail("phone", "Enter a valid phone number.");
        }
    }
    c.required("address", "Address", &school.address);

    let color = school.brand_color.trim();
    if !color.is_empty() && !is_match(r"^#([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$", color) {
        c.fail("brandColor", "Brand color must be a hex color like #1E40AF.");
    }
    if let Some(logo) = &school.logo {
        if !logo.content_type.starts_with("image/") {
            c.fail("logo", "Logo must be an image file.");
        }
    }
    c.errors
}

pub fn validate_admin(admin: &AdminSection) -> Vec<FieldError> {
    let mut c = Checker::new(Section::Admin);
    c.required("firstName", "First name", &admin.first_name);
    c.required("lastName", "Last name", &admin.last_name);
    if c.required("email", "Email", &admin.email)
        && !is_match(r"^[^@\s]+@[^@\s]+\.[^@\s]+$", admin.email.trim())
    {
        c.fail("email", "Enter a valid email address.");
    }
    if c.required("password", "Password", &admin.password)
        && admin.password.chars().count() < MIN_PASSWORD_LEN
    {
        c.fail(
            "password",
            format!("Password must be at least {} characters.", MIN_PASSWORD_LEN),
        );
    }
    if c.required("confirmPassword", "Password confirmation", &admin.confirm_password)
        && admin.confirm_password != admin.password
    {
        c.fail("confirmPassword", "Passwords do not match.");
    }
    c.errors
}

pub fn validate_section(state: &WizardFormState, section: Section) -> Vec<FieldError> {
    match section {
        Section::Database => validate_database(&state.database),
        Section::School => validate_school(&state.school),
        Section::Admin => validate_admin(&state.admin),
    }
}

/// Store keys and namespaces become file names, so keep them to a safe alphabet.
pub fn validate_store_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow::anyhow!("Storage key cannot be empty"));
    }
    if key.len() > 128 {
        return Err(anyhow::anyhow!("Storage key cannot exceed 128 characters"));
    }
    if key.starts_with('.') {
        return Err(anyhow::anyhow!("Storage key cannot start with '.'"));
    }
    if !is_match(r"^[A-Za-z0-9_.\-]+$", key) {
        return Err(anyhow::anyhow!(
            "Storage key contains invalid characters: '{}'",
            key
        ));
    }
    Ok(())
}
